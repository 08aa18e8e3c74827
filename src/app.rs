//! Long-lived service state shared by the CLI and the MCP server.

use std::{
    path::{Path, PathBuf},
    sync::{RwLock, RwLockReadGuard},
};

use serde::Serialize;

use crate::{
    chunking::ChunkBuilder,
    config::Settings,
    config_db::{ConfigDb, DocumentRecord},
    data_dir::DataDir,
    embedding::ContextEmbedder,
    error::{Error, Result},
    extract::{OcrTools, PdfExtractor, TextExtractor},
    ingestion::{DocumentOutcome, IngestReport, Ingestor},
    metadata::MetadataCatalog,
    model_manager::ModelManager,
    resolver::EntityResolver,
    search::{RetrievalEngine, SearchOutcome, SearchRequest},
    vector_store::RedbVectorStore,
    walker,
};

pub const NO_COMPANY_MESSAGE: &str = "No matching company found.";

/// Result of a company lookup.
#[derive(Debug, Clone, PartialEq, Serialize, schemars::JsonSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CompanyInfo {
    Found {
        company: String,
        similarity: f32,
        years: Vec<String>,
    },
    NotFound {
        message: String,
    },
}

pub struct App {
    data_dir: DataDir,
    config_db: ConfigDb,
    settings: Settings,
    models: ModelManager,
    embedder: ContextEmbedder,
    store: RedbVectorStore,
    resolver: EntityResolver,
    catalog: RwLock<MetadataCatalog>,
    extractor: Box<dyn TextExtractor>,
}

impl App {
    /// Open the service state in `data_dir`, with settings resolved from
    /// the config database and environment.
    ///
    /// `metadata` overrides the configured metadata table path.
    pub fn open(data_dir: DataDir, metadata: Option<&Path>) -> Result<Self> {
        let config_db = ConfigDb::open(&data_dir.config_db())?;
        let mut settings = Settings::load(&config_db)?;
        if let Some(path) = metadata {
            settings.metadata_path = Some(path.to_path_buf());
        }
        Self::with_settings(data_dir, config_db, settings)
    }

    /// Open the service state with explicit settings.
    ///
    /// Fails when no metadata table is configured, when it cannot be read,
    /// when the embedding model does not produce `embedding_dimension`
    /// vectors, or when the vector store was built for another dimension.
    pub fn with_settings(
        data_dir: DataDir,
        config_db: ConfigDb,
        settings: Settings,
    ) -> Result<Self> {
        let models = ModelManager::new(
            settings.backend,
            settings.embedding_model.clone(),
            settings.reranker_model.clone(),
            settings.embedding_dimension,
        );
        Self::with_models(data_dir, config_db, settings, models)
    }

    /// Open the service state over already constructed model backends.
    ///
    /// The embedding model is loaded here; a model whose dimension differs
    /// from `embedding_dimension` fails with [`Error::DimensionMismatch`].
    pub fn with_models(
        data_dir: DataDir,
        config_db: ConfigDb,
        settings: Settings,
        models: ModelManager,
    ) -> Result<Self> {
        let metadata_path = settings.metadata_path.clone().ok_or_else(|| {
            Error::Config(
                "no metadata table configured; pass --metadata or set BRSR_METADATA"
                    .to_string(),
            )
        })?;
        let catalog = MetadataCatalog::load(&metadata_path)?;

        let embedder = ContextEmbedder::new(
            models.embedder(),
            settings.embedding_dimension,
            settings.embedding_batch_size,
        )?;
        let store = RedbVectorStore::open(
            &data_dir.vectors_db(),
            settings.embedding_dimension,
            settings.upsert_batch_size,
        )?;

        tracing::debug!(
            data_dir = %data_dir.root().display(),
            backend = %settings.backend,
            companies = catalog.companies().len(),
            "service state opened"
        );

        Ok(Self {
            data_dir,
            config_db,
            resolver: EntityResolver::new(settings.company_threshold),
            settings,
            models,
            embedder,
            store,
            catalog: RwLock::new(catalog),
            extractor: Box::new(PdfExtractor::new(OcrTools::default())),
        })
    }

    /// Replace the text extractor.
    pub fn with_extractor(mut self, extractor: Box<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn data_dir(&self) -> &DataDir {
        &self.data_dir
    }

    pub fn config_db(&self) -> &ConfigDb {
        &self.config_db
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &RedbVectorStore {
        &self.store
    }

    pub fn resolver(&self) -> &EntityResolver {
        &self.resolver
    }

    /// The context embedder over the configured model.
    pub fn embedder(&self) -> &ContextEmbedder {
        &self.embedder
    }

    fn catalog(&self) -> Result<RwLockReadGuard<'_, MetadataCatalog>> {
        self.catalog
            .read()
            .map_err(|_| Error::Config("catalog lock poisoned".to_string()))
    }

    /// Re-read the metadata table and drop the company registry.
    pub fn reload_metadata(&self) -> Result<()> {
        let mut catalog = self
            .catalog
            .write()
            .map_err(|_| Error::Config("catalog lock poisoned".to_string()))?;
        catalog.reload()?;
        self.resolver.registry().invalidate();
        tracing::info!(rows = catalog.rows().len(), "reloaded metadata table");
        Ok(())
    }

    /// Ingest files and directories of reports.
    pub fn ingest(
        &self,
        inputs: &[PathBuf],
        pattern: Option<&str>,
        on_document: impl FnMut(&DocumentOutcome),
    ) -> Result<IngestReport> {
        let filter = pattern
            .map(|p| {
                globset::Glob::new(p)
                    .map(|g| g.compile_matcher())
                    .map_err(|e| {
                        Error::Config(format!("invalid glob pattern: {e}"))
                    })
            })
            .transpose()?;
        let files = walker::collect_inputs(inputs, filter.as_ref())?;
        tracing::info!(files = files.len(), "collected report files");

        let catalog = self.catalog()?;
        let chunker = ChunkBuilder::new(self.settings.chunking());
        let ingestor = Ingestor {
            catalog: &catalog,
            extractor: self.extractor.as_ref(),
            chunker: &chunker,
            embedder: &self.embedder,
            store: &self.store,
            ledger: Some(&self.config_db),
        };

        Ok(ingestor.ingest(&files, on_document))
    }

    pub fn search(&self, request: &SearchRequest) -> Result<SearchOutcome> {
        let catalog = self.catalog()?;
        let scorer = self.models.scorer();
        let engine = RetrievalEngine {
            embedder: &self.embedder,
            resolver: &self.resolver,
            catalog: &catalog,
            store: &self.store,
            scorer: scorer.as_ref(),
            preview_chars: self.settings.preview_chars,
        };
        engine.search(request)
    }

    /// Canonical company names, sorted.
    pub fn companies(&self) -> Result<Vec<String>> {
        Ok(self.catalog()?.companies())
    }

    /// Resolve a company name and list the years it has reports for.
    pub fn company_info(&self, name: &str) -> Result<CompanyInfo> {
        let catalog = self.catalog()?;

        let Some(best) =
            self.resolver.best_match(&catalog, &self.embedder, name)?
        else {
            return Ok(CompanyInfo::NotFound {
                message: NO_COMPANY_MESSAGE.to_string(),
            });
        };

        let years = catalog.years_for_company(&best.company);
        Ok(CompanyInfo::Found {
            company: best.company,
            similarity: best.similarity,
            years,
        })
    }

    /// Documents recorded by previous ingestions.
    pub fn documents(&self) -> Result<Vec<DocumentRecord>> {
        self.config_db.list_documents()
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("data_dir", &self.data_dir)
            .field("settings", &self.settings)
            .field("models", &self.models)
            .finish_non_exhaustive()
    }
}
