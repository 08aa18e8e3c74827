use std::{
    path::{Path, PathBuf},
    str::FromStr,
    sync::{Arc, Mutex},
};

use candle_core::{DType, Device, IndexOp, Tensor};
use candle_nn::{Linear, Module, VarBuilder};
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use tokenizers::{
    PaddingParams, PaddingStrategy, Tokenizer, TruncationParams,
};

use crate::{
    embedding::TextEmbedder,
    error::{Error, Result},
    offline::{LexicalScorer, TrigramEmbedder},
    reranker::RelevanceScorer,
};

pub const DEFAULT_EMBEDDING_MODEL: &str =
    "sentence-transformers/all-MiniLM-L6-v2";
pub const DEFAULT_RERANKER_MODEL: &str = "cross-encoder/ms-marco-MiniLM-L-6-v2";

/// Longest token sequence either model is fed.
const MAX_SEQUENCE_LENGTH: usize = 512;

/// Which implementation backs the embedder and the reranker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// Transformer models run with candle.
    #[default]
    Model,
    /// Deterministic trigram embeddings and lexical reranking.
    Offline,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Model => "model",
            Backend::Offline => "offline",
        }
    }
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "model" => Ok(Backend::Model),
            "offline" => Ok(Backend::Offline),
            other => Err(Error::Config(format!(
                "unknown backend '{other}' (expected 'model' or 'offline')"
            ))),
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Select the best available compute device.
///
/// Uses CUDA when compiled with the `cuda` feature, Metal when compiled with
/// the `metal` feature, and falls back to CPU otherwise.
fn default_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            return device;
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            return device;
        }
    }

    Device::Cpu
}

/// Paths to the files a BERT-style checkpoint is made of.
struct ModelFiles {
    config: PathBuf,
    tokenizer: PathBuf,
    weights: PathBuf,
}

/// Locate a model's files, either in a local directory or on the
/// HuggingFace Hub (downloading into the hub cache on first use).
fn fetch_model_files(model_id: &str) -> Result<ModelFiles> {
    let local = Path::new(model_id);
    if local.is_dir() {
        tracing::debug!(path = %local.display(), "using local model directory");
        return Ok(ModelFiles {
            config: local.join("config.json"),
            tokenizer: local.join("tokenizer.json"),
            weights: local.join("model.safetensors"),
        });
    }

    tracing::info!(model = model_id, "fetching model from HuggingFace Hub");
    let repo = hf_hub::api::sync::Api::new()?.model(model_id.to_string());
    Ok(ModelFiles {
        config: repo.get("config.json")?,
        tokenizer: repo.get("tokenizer.json")?,
        weights: repo.get("model.safetensors")?,
    })
}

/// The subset of `config.json` read directly.
#[derive(serde::Deserialize)]
struct ModelShape {
    hidden_size: usize,
}

fn read_config(path: &Path) -> Result<(BertConfig, usize)> {
    let raw = std::fs::read_to_string(path)?;
    let shape: ModelShape = serde_json::from_str(&raw)?;
    let config: BertConfig = serde_json::from_str(&raw)?;
    Ok((config, shape.hidden_size))
}

fn load_tokenizer(path: &Path) -> Result<Tokenizer> {
    let mut tokenizer =
        Tokenizer::from_file(path).map_err(|e| Error::Tokenizer(e.to_string()))?;
    tokenizer.with_padding(Some(PaddingParams {
        strategy: PaddingStrategy::BatchLongest,
        ..Default::default()
    }));
    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length: MAX_SEQUENCE_LENGTH,
            ..Default::default()
        }))
        .map_err(|e| Error::Tokenizer(e.to_string()))?;
    Ok(tokenizer)
}

/// Token ids, type ids and attention mask for a padded batch.
struct BatchInputs {
    input_ids: Tensor,
    type_ids: Tensor,
    attention_mask: Tensor,
}

fn batch_inputs(
    encodings: &[tokenizers::Encoding],
    device: &Device,
) -> Result<BatchInputs> {
    let batch = encodings.len();
    let seq_len = encodings.first().map_or(0, |e| e.get_ids().len());

    let flatten = |field: fn(&tokenizers::Encoding) -> &[u32]| {
        encodings
            .iter()
            .flat_map(|e| field(e).iter().copied())
            .collect::<Vec<u32>>()
    };

    Ok(BatchInputs {
        input_ids: Tensor::from_vec(
            flatten(tokenizers::Encoding::get_ids),
            (batch, seq_len),
            device,
        )?,
        type_ids: Tensor::from_vec(
            flatten(tokenizers::Encoding::get_type_ids),
            (batch, seq_len),
            device,
        )?,
        attention_mask: Tensor::from_vec(
            flatten(tokenizers::Encoding::get_attention_mask),
            (batch, seq_len),
            device,
        )?,
    })
}

/// Mean of the hidden states over non-padding tokens: `[B, T, H] -> [B, H]`.
///
/// Every row has at least the `[CLS]` token unmasked.
fn masked_mean(hidden: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
    let mask = attention_mask.to_dtype(hidden.dtype())?;
    let summed = hidden.broadcast_mul(&mask.unsqueeze(2)?)?.sum(1)?;
    let counts = mask.sum(1)?.unsqueeze(1)?;
    Ok(summed.broadcast_div(&counts)?)
}

struct LoadedEncoder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    dimension: usize,
}

/// A BERT sentence encoder with mean pooling, loaded on first use.
pub struct SentenceEncoder {
    model_id: String,
    loaded: Mutex<Option<Arc<LoadedEncoder>>>,
}

impl SentenceEncoder {
    pub fn new(model_id: String) -> Self {
        Self {
            model_id,
            loaded: Mutex::new(None),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.lock().is_ok_and(|guard| guard.is_some())
    }

    fn ensure_loaded(&self) -> Result<Arc<LoadedEncoder>> {
        let mut guard = self
            .loaded
            .lock()
            .map_err(|_| Error::Config("model lock poisoned".to_string()))?;
        if let Some(loaded) = guard.as_ref() {
            return Ok(Arc::clone(loaded));
        }

        let files = fetch_model_files(&self.model_id)?;
        let (config, hidden) = read_config(&files.config)?;
        let device = default_device();
        // SAFETY: the weights file is not modified while it is mapped.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(
                &[&files.weights],
                DType::F32,
                &device,
            )?
        };
        let model = BertModel::load(vb, &config)?;
        let tokenizer = load_tokenizer(&files.tokenizer)?;

        tracing::info!(
            model = %self.model_id,
            dimension = hidden,
            "loaded embedding model"
        );

        let loaded = Arc::new(LoadedEncoder {
            model,
            tokenizer,
            device,
            dimension: hidden,
        });
        *guard = Some(Arc::clone(&loaded));
        Ok(loaded)
    }
}

impl TextEmbedder for SentenceEncoder {
    fn dimension(&self) -> Result<usize> {
        Ok(self.ensure_loaded()?.dimension)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let loaded = self.ensure_loaded()?;

        let encodings = loaded
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| Error::Tokenizer(e.to_string()))?;
        let inputs = batch_inputs(&encodings, &loaded.device)?;

        let hidden = loaded.model.forward(
            &inputs.input_ids,
            &inputs.type_ids,
            Some(&inputs.attention_mask),
        )?;
        let pooled = masked_mean(&hidden, &inputs.attention_mask)?;

        Ok(pooled.to_device(&Device::Cpu)?.to_vec2::<f32>()?)
    }
}

struct LoadedCrossEncoder {
    bert: BertModel,
    pooler: Linear,
    classifier: Linear,
    tokenizer: Tokenizer,
    device: Device,
}

/// A BERT cross-encoder that scores (query, passage) pairs with a single
/// relevance logit, loaded on first use.
pub struct CrossEncoder {
    model_id: String,
    loaded: Mutex<Option<Arc<LoadedCrossEncoder>>>,
}

impl CrossEncoder {
    pub fn new(model_id: String) -> Self {
        Self {
            model_id,
            loaded: Mutex::new(None),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.lock().is_ok_and(|guard| guard.is_some())
    }

    fn ensure_loaded(&self) -> Result<Arc<LoadedCrossEncoder>> {
        let mut guard = self
            .loaded
            .lock()
            .map_err(|_| Error::Config("model lock poisoned".to_string()))?;
        if let Some(loaded) = guard.as_ref() {
            return Ok(Arc::clone(loaded));
        }

        let files = fetch_model_files(&self.model_id)?;
        let (config, hidden) = read_config(&files.config)?;
        let device = default_device();
        // SAFETY: the weights file is not modified while it is mapped.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(
                &[&files.weights],
                DType::F32,
                &device,
            )?
        };

        let bert = BertModel::load(vb.pp("bert"), &config)?;
        let pooler = candle_nn::linear(hidden, hidden, vb.pp("bert.pooler.dense"))?;
        let classifier = candle_nn::linear(hidden, 1, vb.pp("classifier"))?;
        let tokenizer = load_tokenizer(&files.tokenizer)?;

        tracing::info!(model = %self.model_id, "loaded reranker model");

        let loaded = Arc::new(LoadedCrossEncoder {
            bert,
            pooler,
            classifier,
            tokenizer,
            device,
        });
        *guard = Some(Arc::clone(&loaded));
        Ok(loaded)
    }
}

impl RelevanceScorer for CrossEncoder {
    fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>> {
        if passages.is_empty() {
            return Ok(Vec::new());
        }
        let loaded = self.ensure_loaded()?;

        let pairs: Vec<(String, String)> = passages
            .iter()
            .map(|p| (query.to_string(), p.clone()))
            .collect();
        let encodings = loaded
            .tokenizer
            .encode_batch(pairs, true)
            .map_err(|e| Error::Tokenizer(e.to_string()))?;
        let inputs = batch_inputs(&encodings, &loaded.device)?;

        let hidden = loaded.bert.forward(
            &inputs.input_ids,
            &inputs.type_ids,
            Some(&inputs.attention_mask),
        )?;
        let cls = hidden.i((.., 0))?;
        let pooled = loaded.pooler.forward(&cls)?.tanh()?;
        let logits = loaded.classifier.forward(&pooled)?.squeeze(1)?;

        Ok(logits.to_device(&Device::Cpu)?.to_vec1::<f32>()?)
    }
}

/// Owns the embedding and reranking backends for the process lifetime.
///
/// Neural models are not loaded until first used, and are then shared by
/// every caller. [`crate::App`] asks the embedder for its dimension at
/// startup, which loads it; the reranker stays unloaded until a search.
pub struct ModelManager {
    backend: Backend,
    embedder: Arc<dyn TextEmbedder>,
    scorer: Arc<dyn RelevanceScorer>,
    embedding_model_id: String,
    reranker_model_id: String,
}

impl ModelManager {
    /// Create the backends. `dimension` sizes the offline embedder; the
    /// neural embedder reports its own.
    pub fn new(
        backend: Backend,
        embedding_model_id: String,
        reranker_model_id: String,
        dimension: usize,
    ) -> Self {
        let (embedder, scorer): (Arc<dyn TextEmbedder>, Arc<dyn RelevanceScorer>) =
            match backend {
                Backend::Model => (
                    Arc::new(SentenceEncoder::new(embedding_model_id.clone())),
                    Arc::new(CrossEncoder::new(reranker_model_id.clone())),
                ),
                Backend::Offline => (
                    Arc::new(TrigramEmbedder::new(dimension)),
                    Arc::new(LexicalScorer),
                ),
            };

        Self {
            backend,
            embedder,
            scorer,
            embedding_model_id,
            reranker_model_id,
        }
    }

    /// Wrap backends constructed elsewhere, such as a local model runtime.
    pub fn from_parts(
        backend: Backend,
        embedder: Arc<dyn TextEmbedder>,
        scorer: Arc<dyn RelevanceScorer>,
    ) -> Self {
        Self {
            backend,
            embedder,
            scorer,
            embedding_model_id: "(custom)".to_string(),
            reranker_model_id: "(custom)".to_string(),
        }
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn embedding_model_id(&self) -> &str {
        &self.embedding_model_id
    }

    pub fn reranker_model_id(&self) -> &str {
        &self.reranker_model_id
    }

    pub fn embedder(&self) -> Arc<dyn TextEmbedder> {
        Arc::clone(&self.embedder)
    }

    pub fn scorer(&self) -> Arc<dyn RelevanceScorer> {
        Arc::clone(&self.scorer)
    }
}

impl std::fmt::Debug for ModelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelManager")
            .field("backend", &self.backend)
            .field("embedding_model_id", &self.embedding_model_id)
            .field("reranker_model_id", &self.reranker_model_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_parses_case_insensitively() {
        assert_eq!("model".parse::<Backend>().unwrap(), Backend::Model);
        assert_eq!(" OFFLINE ".parse::<Backend>().unwrap(), Backend::Offline);
        assert!("gpu".parse::<Backend>().is_err());
        assert_eq!(Backend::Offline.to_string(), "offline");
    }

    #[test]
    fn neural_models_load_lazily() {
        let encoder = SentenceEncoder::new(DEFAULT_EMBEDDING_MODEL.to_string());
        assert!(!encoder.is_loaded());
        assert_eq!(encoder.model_id(), DEFAULT_EMBEDDING_MODEL);

        let reranker = CrossEncoder::new(DEFAULT_RERANKER_MODEL.to_string());
        assert!(!reranker.is_loaded());
        assert!(reranker.score("q", &[]).unwrap().is_empty());
    }

    #[test]
    fn offline_backend_uses_configured_dimension() {
        let manager = ModelManager::new(
            Backend::Offline,
            DEFAULT_EMBEDDING_MODEL.to_string(),
            DEFAULT_RERANKER_MODEL.to_string(),
            96,
        );
        assert_eq!(manager.embedder().dimension().unwrap(), 96);
        let scores = manager
            .scorer()
            .score("emissions", &["emissions fell".to_string()])
            .unwrap();
        assert!(scores[0] > 0.0);
    }

    #[test]
    fn masked_mean_ignores_padding() {
        let hidden = Tensor::from_vec(
            vec![1.0f32, 1.0, 3.0, 3.0, 100.0, 100.0],
            (1, 3, 2),
            &Device::Cpu,
        )
        .unwrap();
        let mask = Tensor::from_vec(vec![1u32, 1, 0], (1, 3), &Device::Cpu)
            .unwrap();
        let pooled = masked_mean(&hidden, &mask).unwrap();
        assert_eq!(pooled.to_vec2::<f32>().unwrap(), vec![vec![2.0, 2.0]]);
    }
}
