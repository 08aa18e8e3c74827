//! Fuzzy company-name resolution.
//!
//! A user may type "Acme", "ACME corp" or "Acme Corporaton"; the corpus only
//! knows "Acme Corp". The resolver embeds the user's string the same way it
//! embedded every canonical name and returns the canonical names whose
//! cosine similarity clears a threshold.

use std::sync::{Arc, RwLock};

use serde::Serialize;

use crate::{
    embedding::{ContextEmbedder, cosine_similarity},
    error::{Error, Result},
    metadata::MetadataCatalog,
};

/// Default minimum similarity for a company to count as a match.
pub const DEFAULT_COMPANY_THRESHOLD: f32 = 0.7;

/// A canonical company a free-text name resolved to.
#[derive(Debug, Clone, PartialEq, Serialize, schemars::JsonSchema)]
pub struct CompanyMatch {
    pub company: String,
    pub similarity: f32,
}

/// Canonical company names with their embeddings, built for one version of
/// the metadata catalog.
#[derive(Debug)]
pub struct RegistrySnapshot {
    fingerprint: u64,
    entries: Vec<(String, Vec<f32>)>,
}

impl RegistrySnapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn companies(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }
}

/// Lazily built cache of canonical company embeddings.
///
/// The cache is rebuilt whenever the catalog's company list changes, or
/// after an explicit [`invalidate`](Self::invalidate). There is no
/// incremental update.
#[derive(Debug, Default)]
pub struct CompanyRegistry {
    cache: RwLock<Option<Arc<RegistrySnapshot>>>,
}

impl CompanyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached snapshot, building it first if it is missing or
    /// was built from a different company list.
    pub fn get_or_build(
        &self,
        catalog: &MetadataCatalog,
        embedder: &ContextEmbedder,
    ) -> Result<Arc<RegistrySnapshot>> {
        let fingerprint = catalog.fingerprint();

        if let Some(snapshot) = self.read_cache()?.as_ref()
            && snapshot.fingerprint == fingerprint
        {
            return Ok(Arc::clone(snapshot));
        }

        let companies = catalog.companies();
        tracing::info!(
            companies = companies.len(),
            "building company registry"
        );
        let vectors = embedder.embed_company_names(&companies)?;
        let snapshot = Arc::new(RegistrySnapshot {
            fingerprint,
            entries: companies.into_iter().zip(vectors).collect(),
        });

        let mut cache = self
            .cache
            .write()
            .map_err(|_| Error::Config("registry lock poisoned".to_string()))?;
        *cache = Some(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    /// Drop the cached snapshot so the next lookup rebuilds it.
    pub fn invalidate(&self) {
        if let Ok(mut cache) = self.cache.write() {
            *cache = None;
        }
    }

    pub fn is_built(&self) -> bool {
        self.cache.read().is_ok_and(|cache| cache.is_some())
    }

    fn read_cache(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, Option<Arc<RegistrySnapshot>>>>
    {
        self.cache
            .read()
            .map_err(|_| Error::Config("registry lock poisoned".to_string()))
    }
}

/// Resolves free-text company names against the canonical company list.
#[derive(Debug)]
pub struct EntityResolver {
    registry: CompanyRegistry,
    threshold: f32,
}

impl EntityResolver {
    pub fn new(threshold: f32) -> Self {
        Self {
            registry: CompanyRegistry::new(),
            threshold,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn registry(&self) -> &CompanyRegistry {
        &self.registry
    }

    /// Canonical companies similar to `name`, most similar first.
    ///
    /// Only companies with similarity at or above the threshold are kept,
    /// and at most `top_k` are returned. A blank name, an empty registry or
    /// no company above the threshold all yield an empty list.
    pub fn resolve(
        &self,
        catalog: &MetadataCatalog,
        embedder: &ContextEmbedder,
        name: &str,
        top_k: usize,
    ) -> Result<Vec<CompanyMatch>> {
        if name.trim().is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let snapshot = self.registry.get_or_build(catalog, embedder)?;
        if snapshot.is_empty() {
            return Ok(Vec::new());
        }

        let query = embedder.embed_company_name(name)?;
        let mut matches: Vec<CompanyMatch> = snapshot
            .entries
            .iter()
            .map(|(company, vector)| CompanyMatch {
                company: company.clone(),
                similarity: cosine_similarity(&query, vector),
            })
            .filter(|m| m.similarity >= self.threshold)
            .collect();

        matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        matches.truncate(top_k);

        tracing::debug!(
            name,
            matches = matches.len(),
            best = matches.first().map(|m| m.company.as_str()),
            "resolved company name"
        );
        Ok(matches)
    }

    /// The single best canonical match for `name`, if any clears the
    /// threshold.
    pub fn best_match(
        &self,
        catalog: &MetadataCatalog,
        embedder: &ContextEmbedder,
        name: &str,
    ) -> Result<Option<CompanyMatch>> {
        Ok(self.resolve(catalog, embedder, name, 1)?.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;
    use crate::{embedding::TextEmbedder, offline::TrigramEmbedder};

    const CSV: &str = "\
COMPANY,FROM YEAR,TO YEAR,ATTACHMENT
Acme Corp,2022,2023,
Globex Industries,2021,2022,
Initech Ltd,2022,2023,
";

    /// Counts how many texts it has embedded.
    struct CountingEmbedder {
        inner: TrigramEmbedder,
        calls: AtomicUsize,
        seen: Mutex<Vec<String>>,
    }

    impl TextEmbedder for CountingEmbedder {
        fn dimension(&self) -> Result<usize> {
            self.inner.dimension()
        }

        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(texts.len(), Ordering::SeqCst);
            self.seen.lock().unwrap().extend(texts.iter().cloned());
            self.inner.embed_batch(texts)
        }
    }

    fn counting() -> Arc<CountingEmbedder> {
        Arc::new(CountingEmbedder {
            inner: TrigramEmbedder::new(384),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn catalog() -> MetadataCatalog {
        MetadataCatalog::from_reader(CSV.as_bytes()).unwrap()
    }

    fn embedder() -> ContextEmbedder {
        ContextEmbedder::new(Arc::new(TrigramEmbedder::new(384)), 384, 32)
            .unwrap()
    }

    #[test]
    fn exact_name_matches_first_with_full_similarity() {
        let resolver = EntityResolver::new(DEFAULT_COMPANY_THRESHOLD);
        let matches = resolver
            .resolve(&catalog(), &embedder(), "Acme Corp", 5)
            .unwrap();
        assert_eq!(matches[0].company, "Acme Corp");
        assert!((matches[0].similarity - 1.0).abs() < 1e-5);
    }

    #[test]
    fn misspelled_name_resolves() {
        let resolver = EntityResolver::new(DEFAULT_COMPANY_THRESHOLD);
        let best = resolver
            .best_match(&catalog(), &embedder(), "Acme Corporaton")
            .unwrap()
            .unwrap();
        assert_eq!(best.company, "Acme Corp");
    }

    #[test]
    fn unrelated_name_yields_nothing() {
        let resolver = EntityResolver::new(DEFAULT_COMPANY_THRESHOLD);
        let matches = resolver
            .resolve(&catalog(), &embedder(), "zzyzx quorble", 5)
            .unwrap();
        assert!(matches.is_empty());
    }

    #[test]
    fn results_are_sorted_and_capped() {
        let resolver = EntityResolver::new(0.0);
        let matches = resolver
            .resolve(&catalog(), &embedder(), "Acme", 2)
            .unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].company, "Acme Corp");
        assert!(matches[0].similarity >= matches[1].similarity);
    }

    #[test]
    fn blank_name_and_empty_catalog_yield_nothing() {
        let resolver = EntityResolver::new(0.0);
        assert!(resolver
            .resolve(&catalog(), &embedder(), "   ", 5)
            .unwrap()
            .is_empty());
        assert!(resolver
            .resolve(&MetadataCatalog::default(), &embedder(), "Acme", 5)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn registry_is_built_once_per_company_list() {
        let model = counting();
        let embedder = ContextEmbedder::new(model.clone(), 384, 32).unwrap();
        let resolver = EntityResolver::new(DEFAULT_COMPANY_THRESHOLD);
        let catalog = catalog();

        assert!(!resolver.registry().is_built());
        resolver.resolve(&catalog, &embedder, "Acme", 5).unwrap();
        resolver.resolve(&catalog, &embedder, "Globex", 5).unwrap();
        assert!(resolver.registry().is_built());

        // Three registry names plus two queries.
        assert_eq!(model.calls.load(Ordering::SeqCst), 5);
        let seen = model.seen.lock().unwrap();
        assert_eq!(seen[0], "Company: Acme Corp");
    }

    #[test]
    fn registry_rebuilds_when_companies_change() {
        let model = counting();
        let embedder = ContextEmbedder::new(model.clone(), 384, 32).unwrap();
        let resolver = EntityResolver::new(DEFAULT_COMPANY_THRESHOLD);

        resolver.resolve(&catalog(), &embedder, "Acme", 5).unwrap();
        let changed = MetadataCatalog::from_reader(
            "COMPANY,FROM YEAR,TO YEAR,ATTACHMENT\nUmbrella Co,2020,2021,\n"
                .as_bytes(),
        )
        .unwrap();
        let matches = resolver
            .resolve(&changed, &embedder, "Umbrella Co", 5)
            .unwrap();
        assert_eq!(matches[0].company, "Umbrella Co");

        // 3 + 1 registry names, 2 queries.
        assert_eq!(model.calls.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn invalidate_forces_rebuild() {
        let model = counting();
        let embedder = ContextEmbedder::new(model.clone(), 384, 32).unwrap();
        let resolver = EntityResolver::new(DEFAULT_COMPANY_THRESHOLD);
        let catalog = catalog();

        resolver.registry().get_or_build(&catalog, &embedder).unwrap();
        resolver.registry().invalidate();
        assert!(!resolver.registry().is_built());
        let snapshot =
            resolver.registry().get_or_build(&catalog, &embedder).unwrap();

        assert_eq!(snapshot.len(), 3);
        assert_eq!(model.calls.load(Ordering::SeqCst), 6);
    }
}
