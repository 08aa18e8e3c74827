//! Typed view of the persistent settings.
//!
//! Every setting has a built-in default, may be overridden by a value
//! stored in the config database (`brsr-search config set`), and finally by
//! a `BRSR_*` environment variable.

use std::path::PathBuf;

use crate::{
    chunking::{ChunkingConfig, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE},
    config_db::ConfigDb,
    embedding::DEFAULT_EMBEDDING_BATCH_SIZE,
    error::{Error, Result},
    model_manager::{Backend, DEFAULT_EMBEDDING_MODEL, DEFAULT_RERANKER_MODEL},
    resolver::DEFAULT_COMPANY_THRESHOLD,
    search::DEFAULT_PREVIEW_CHARS,
    vector_store::DEFAULT_UPSERT_BATCH_SIZE,
};

pub const DEFAULT_EMBEDDING_DIMENSION: usize = 384;

/// Every setting key, in display order.
pub const KEYS: &[&str] = &[
    "backend",
    "embedding_model",
    "embedding_dimension",
    "reranker_model",
    "chunk_size",
    "chunk_overlap",
    "company_threshold",
    "embedding_batch_size",
    "upsert_batch_size",
    "preview_chars",
    "metadata_path",
];

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub backend: Backend,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub reranker_model: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub company_threshold: f32,
    pub embedding_batch_size: usize,
    pub upsert_batch_size: usize,
    pub preview_chars: usize,
    pub metadata_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
            reranker_model: DEFAULT_RERANKER_MODEL.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            company_threshold: DEFAULT_COMPANY_THRESHOLD,
            embedding_batch_size: DEFAULT_EMBEDDING_BATCH_SIZE,
            upsert_batch_size: DEFAULT_UPSERT_BATCH_SIZE,
            preview_chars: DEFAULT_PREVIEW_CHARS,
            metadata_path: None,
        }
    }
}

impl Settings {
    /// Resolve settings from the config database and the process
    /// environment.
    pub fn load(config_db: &ConfigDb) -> Result<Self> {
        Self::resolve(&config_db.list_settings()?, |name| {
            std::env::var(name).ok()
        })
    }

    /// Resolve settings from stored pairs and an environment lookup.
    ///
    /// Stored keys that are no longer known are ignored with a warning, so
    /// an old database never blocks startup.
    pub fn resolve(
        stored: &[(String, String)],
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut settings = Self::default();

        for (key, value) in stored {
            if KEYS.contains(&key.as_str()) {
                settings.apply(key, value)?;
            } else {
                tracing::warn!(key = %key, "ignoring unknown stored setting");
            }
        }

        for key in KEYS {
            if let Some(value) = env(&env_var(key)) {
                settings.apply(key, &value)?;
            }
        }

        settings.check()?;
        Ok(settings)
    }

    /// Check that `value` is acceptable for `key` without applying it.
    pub fn validate(key: &str, value: &str) -> Result<()> {
        let mut scratch = Self::default();
        scratch.apply(key, value)?;
        scratch.check()
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match key {
            "backend" => self.backend = value.parse()?,
            "embedding_model" => self.embedding_model = non_empty(key, value)?,
            "embedding_dimension" => {
                self.embedding_dimension = parse_positive(key, value)?
            }
            "reranker_model" => self.reranker_model = non_empty(key, value)?,
            "chunk_size" => self.chunk_size = parse_positive(key, value)?,
            "chunk_overlap" => self.chunk_overlap = parse(key, value)?,
            "company_threshold" => self.company_threshold = parse(key, value)?,
            "embedding_batch_size" => {
                self.embedding_batch_size = parse_positive(key, value)?
            }
            "upsert_batch_size" => {
                self.upsert_batch_size = parse_positive(key, value)?
            }
            "preview_chars" => self.preview_chars = parse_positive(key, value)?,
            "metadata_path" => {
                self.metadata_path =
                    (!value.is_empty()).then(|| PathBuf::from(value))
            }
            other => {
                return Err(Error::Config(format!(
                    "unknown setting '{other}' (known: {})",
                    KEYS.join(", ")
                )));
            }
        }
        Ok(())
    }

    fn check(&self) -> Result<()> {
        if self.chunk_overlap >= self.chunk_size {
            return Err(Error::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if !(-1.0..=1.0).contains(&self.company_threshold) {
            return Err(Error::Config(format!(
                "company_threshold must be between -1 and 1, got {}",
                self.company_threshold
            )));
        }
        Ok(())
    }

    /// The effective value of a setting, rendered as text.
    pub fn get(&self, key: &str) -> Option<String> {
        let value = match key {
            "backend" => self.backend.to_string(),
            "embedding_model" => self.embedding_model.clone(),
            "embedding_dimension" => self.embedding_dimension.to_string(),
            "reranker_model" => self.reranker_model.clone(),
            "chunk_size" => self.chunk_size.to_string(),
            "chunk_overlap" => self.chunk_overlap.to_string(),
            "company_threshold" => self.company_threshold.to_string(),
            "embedding_batch_size" => self.embedding_batch_size.to_string(),
            "upsert_batch_size" => self.upsert_batch_size.to_string(),
            "preview_chars" => self.preview_chars.to_string(),
            "metadata_path" => self
                .metadata_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            _ => return None,
        };
        Some(value)
    }

    pub fn chunking(&self) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size: self.chunk_size,
            overlap: self.chunk_overlap,
        }
    }
}

/// The environment variable that overrides `key`.
///
/// # Examples
///
/// ```
/// use brsr_search::config::env_var;
///
/// assert_eq!(env_var("chunk_size"), "BRSR_CHUNK_SIZE");
/// assert_eq!(env_var("metadata_path"), "BRSR_METADATA");
/// ```
pub fn env_var(key: &str) -> String {
    match key {
        "metadata_path" => "BRSR_METADATA".to_string(),
        other => format!("BRSR_{}", other.to_ascii_uppercase()),
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e| {
        Error::Config(format!("invalid value '{value}' for {key}: {e}"))
    })
}

fn parse_positive(key: &str, value: &str) -> Result<usize> {
    match parse::<usize>(key, value)? {
        0 => Err(Error::Config(format!("{key} must be greater than zero"))),
        n => Ok(n),
    }
}

fn non_empty(key: &str, value: &str) -> Result<String> {
    if value.is_empty() {
        return Err(Error::Config(format!("{key} must not be empty")));
    }
    Ok(value.to_string())
}
