use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::{
    embedding::ContextEmbedder,
    error::Result,
    metadata::MetadataCatalog,
    reranker::{self, RelevanceScorer},
    resolver::EntityResolver,
    vector_store::{Candidate, VectorStore},
};

pub const DEFAULT_TOP_K: usize = 5;

/// Default number of characters of chunk text shown per result.
pub const DEFAULT_PREVIEW_CHARS: usize = 500;

pub const NO_RESULTS_MESSAGE: &str = "No relevant results found.";

/// Candidates fetched per requested result in the first stage.
const CANDIDATE_MULTIPLIER: usize = 4;
/// Floor on first-stage candidates, so small `top_k` still reranks a
/// meaningful pool.
const MIN_CANDIDATES: usize = 20;

/// How many candidates the first stage retrieves for `top_k` results.
///
/// # Examples
///
/// ```
/// use brsr_search::search::candidate_count;
///
/// assert_eq!(candidate_count(5), 20);
/// assert_eq!(candidate_count(10), 40);
/// ```
pub fn candidate_count(top_k: usize) -> usize {
    top_k.saturating_mul(CANDIDATE_MULTIPLIER).max(MIN_CANDIDATES)
}

/// A search query with its optional narrowing hints.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    /// Free-text company name; resolved fuzzily against the catalog.
    pub company: Option<String>,
    /// A year the report should cover. Only a hint folded into the query
    /// embedding; results from other years are not removed.
    pub year: Option<String>,
    pub top_k: usize,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            company: None,
            year: None,
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn company(mut self, company: impl Into<String>) -> Self {
        self.company = Some(company.into());
        self
    }

    pub fn year(mut self, year: impl Into<String>) -> Self {
        self.year = Some(year.into());
        self
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }
}

/// One ranked chunk.
#[derive(Debug, Clone, PartialEq, Serialize, schemars::JsonSchema)]
pub struct SearchResult {
    pub rank: usize,
    pub chunk_id: String,
    /// Chunk text, truncated to the preview length.
    pub text: String,
    pub company: String,
    pub from_year: String,
    pub to_year: String,
    pub filename: String,
    /// First-stage vector similarity.
    pub retrieval_score: f32,
    /// Cross-encoder relevance; results are ordered by this.
    pub rerank_score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, schemars::JsonSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SearchOutcome {
    Found {
        resolved_company: Option<String>,
        results: Vec<SearchResult>,
    },
    NoResults {
        resolved_company: Option<String>,
        message: String,
    },
}

impl SearchOutcome {
    pub fn results(&self) -> &[SearchResult] {
        match self {
            SearchOutcome::Found { results, .. } => results,
            SearchOutcome::NoResults { .. } => &[],
        }
    }

    pub fn resolved_company(&self) -> Option<&str> {
        match self {
            SearchOutcome::Found {
                resolved_company, ..
            }
            | SearchOutcome::NoResults {
                resolved_company, ..
            } => resolved_company.as_deref(),
        }
    }
}

/// Two-stage retrieval: a broad vector search followed by cross-encoder
/// reranking of the candidates.
pub struct RetrievalEngine<'a> {
    pub embedder: &'a ContextEmbedder,
    pub resolver: &'a EntityResolver,
    pub catalog: &'a MetadataCatalog,
    pub store: &'a dyn VectorStore,
    pub scorer: &'a dyn RelevanceScorer,
    pub preview_chars: usize,
}

impl RetrievalEngine<'_> {
    /// Run a search.
    ///
    /// 1. Resolve the company name, keeping only the best match. A miss
    ///    means no company context.
    /// 2. Embed the query with the resolved company and year as context.
    /// 3. Fetch [`candidate_count`] nearest chunks with their metadata.
    /// 4. Rerank every candidate against the raw query text and keep
    ///    `top_k`.
    pub fn search(&self, request: &SearchRequest) -> Result<SearchOutcome> {
        let top_k = request.top_k.max(1);

        let resolved_company = match request.company.as_deref() {
            Some(name) if !name.trim().is_empty() => {
                let best =
                    self.resolver.best_match(self.catalog, self.embedder, name)?;
                if best.is_none() {
                    tracing::info!(
                        company = name,
                        "no company matched; searching without company context"
                    );
                }
                best.map(|m| m.company)
            }
            _ => None,
        };
        let year = request
            .year
            .as_deref()
            .map(str::trim)
            .filter(|y| !y.is_empty());

        let candidates = self.retrieve(
            &request.query,
            resolved_company.as_deref(),
            year,
            candidate_count(top_k),
        )?;

        if candidates.is_empty() {
            return Ok(SearchOutcome::NoResults {
                resolved_company,
                message: NO_RESULTS_MESSAGE.to_string(),
            });
        }

        let ranked = reranker::rerank(
            self.scorer,
            &request.query,
            candidates,
            |c| c.metadata.as_ref().map(|m| m.text.clone()).unwrap_or_default(),
            top_k,
        )?;

        let results = ranked
            .into_iter()
            .enumerate()
            .filter_map(|(i, r)| {
                let meta = r.item.metadata?;
                Some(SearchResult {
                    rank: i + 1,
                    chunk_id: r.item.id,
                    text: preview(&meta.text, self.preview_chars),
                    company: meta.company,
                    from_year: meta.from_year,
                    to_year: meta.to_year,
                    filename: meta.filename,
                    retrieval_score: r.item.score,
                    rerank_score: r.score,
                })
            })
            .collect();

        Ok(SearchOutcome::Found {
            resolved_company,
            results,
        })
    }

    /// First stage: nearest chunks to the contextualized query.
    fn retrieve(
        &self,
        query: &str,
        company: Option<&str>,
        year: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Candidate>> {
        let vector = self.embedder.embed_query(query, company, year)?;
        let mut candidates = self.store.query(&vector, limit, true)?;

        let before = candidates.len();
        candidates.retain(|c| c.metadata.is_some());
        if candidates.len() < before {
            tracing::warn!(
                dropped = before - candidates.len(),
                "candidates without stored metadata"
            );
        }

        tracing::debug!(
            requested = limit,
            candidates = candidates.len(),
            "first-stage retrieval"
        );
        Ok(candidates)
    }
}

/// The first `max_chars` characters of `text`.
fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => text[..end].to_string(),
        None => text.to_string(),
    }
}

/// Render an outcome for a terminal or a chat transcript.
pub fn render_human(outcome: &SearchOutcome) -> String {
    let mut out = String::new();
    if let Some(company) = outcome.resolved_company() {
        let _ = writeln!(out, "Company: {company}");
    }

    match outcome {
        SearchOutcome::NoResults { message, .. } => {
            out.push_str(message);
            out.push('\n');
        }
        SearchOutcome::Found { results, .. } => {
            for r in results {
                let _ = writeln!(
                    out,
                    "{:>3}. [{:.3}] {} ({}-{}) {}",
                    r.rank,
                    r.rerank_score,
                    r.company,
                    r.from_year,
                    r.to_year,
                    r.filename
                );
                for line in r.text.lines().filter(|l| !l.trim().is_empty()) {
                    let _ = writeln!(out, "     {}", line.trim());
                }
            }
            let _ = writeln!(out, "\n{} result(s)", results.len());
        }
    }
    out
}
