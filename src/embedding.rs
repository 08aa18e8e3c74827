use std::sync::Arc;

use crate::{
    chunking::Chunk,
    error::{Error, Result},
};

/// Default number of texts sent to the model per call.
pub const DEFAULT_EMBEDDING_BATCH_SIZE: usize = 32;

/// A model that turns texts into dense vectors.
///
/// Implementations need not normalize; [`ContextEmbedder`] does.
pub trait TextEmbedder: Send + Sync {
    /// The dimension of every vector this model produces.
    fn dimension(&self) -> Result<usize>;

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embeds chunks and queries with their company/year context folded into
/// the text, so stored and query vectors live in one context-aware space.
#[derive(Clone)]
pub struct ContextEmbedder {
    model: Arc<dyn TextEmbedder>,
    dimension: usize,
    batch_size: usize,
}

impl ContextEmbedder {
    /// Wrap a model, checking it produces `expected_dimension`-sized vectors.
    ///
    /// A mismatch is a configuration error: the vector store was built for
    /// one dimension and the model produces another.
    pub fn new(
        model: Arc<dyn TextEmbedder>,
        expected_dimension: usize,
        batch_size: usize,
    ) -> Result<Self> {
        let actual = model.dimension()?;
        if actual != expected_dimension {
            return Err(Error::DimensionMismatch {
                expected: expected_dimension,
                actual,
            });
        }

        Ok(Self {
            model,
            dimension: actual,
            batch_size: batch_size.max(1),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embed chunks for storage, one vector per chunk in input order.
    pub fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>> {
        let texts = chunks.iter().map(chunk_context_text).collect();
        self.embed_texts(texts)
    }

    /// Embed a search query with optional company and year context.
    pub fn embed_query(
        &self,
        text: &str,
        company: Option<&str>,
        year: Option<&str>,
    ) -> Result<Vec<f32>> {
        let input = query_context_text(text, company, year);
        self.embed_one(input)
    }

    /// Embed canonical company names as `Company: {name}`.
    pub fn embed_company_names(
        &self,
        names: &[String],
    ) -> Result<Vec<Vec<f32>>> {
        let texts = names.iter().map(|name| company_text(name)).collect();
        self.embed_texts(texts)
    }

    /// Embed a free-text company name the same way registry entries are.
    pub fn embed_company_name(&self, name: &str) -> Result<Vec<f32>> {
        self.embed_one(company_text(name))
    }

    fn embed_one(&self, text: String) -> Result<Vec<f32>> {
        self.embed_texts(vec![text])?.pop().ok_or_else(|| {
            Error::Config("embedding model returned no vectors".to_string())
        })
    }

    fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            let embedded = self.model.embed_batch(batch)?;
            if embedded.len() != batch.len() {
                return Err(Error::Config(format!(
                    "embedding model returned {} vectors for {} inputs",
                    embedded.len(),
                    batch.len()
                )));
            }

            for mut vector in embedded {
                if vector.len() != self.dimension {
                    return Err(Error::DimensionMismatch {
                        expected: self.dimension,
                        actual: vector.len(),
                    });
                }
                normalize(&mut vector);
                vectors.push(vector);
            }
        }

        Ok(vectors)
    }
}

impl std::fmt::Debug for ContextEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextEmbedder")
            .field("dimension", &self.dimension)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

/// The text a stored chunk is embedded as.
///
/// # Examples
///
/// ```
/// use brsr_search::chunking::Chunk;
/// use brsr_search::embedding::chunk_context_text;
///
/// let chunk = Chunk {
///     chunk_id: "Acme_Corp_2022_2023_chunk_0".into(),
///     text: "Acme reduced emissions by 10%.".into(),
///     company: "Acme Corp".into(),
///     from_year: "2022".into(),
///     to_year: "2023".into(),
///     filename: "acme.pdf".into(),
///     chunk_index: 0,
///     total_chunks: 1,
/// };
/// assert_eq!(
///     chunk_context_text(&chunk),
///     "Company: Acme Corp Years: 2022-2023 Acme reduced emissions by 10%."
/// );
/// ```
pub fn chunk_context_text(chunk: &Chunk) -> String {
    join_segments(&[
        format!("Company: {}", chunk.company),
        format!("Years: {}-{}", chunk.from_year, chunk.to_year),
        chunk.text.clone(),
    ])
}

/// The text a query is embedded as.
///
/// The company segment is always present (bare `Company:` when no company
/// was resolved); the year segment only when a year was given.
///
/// # Examples
///
/// ```
/// use brsr_search::embedding::query_context_text;
///
/// assert_eq!(
///     query_context_text("water usage", Some("Acme Corp"), Some("2023")),
///     "Company: Acme Corp Year: 2023 water usage"
/// );
/// assert_eq!(
///     query_context_text("water usage", None, None),
///     "Company: water usage"
/// );
/// ```
pub fn query_context_text(
    text: &str,
    company: Option<&str>,
    year: Option<&str>,
) -> String {
    let year_segment = year
        .filter(|y| !y.trim().is_empty())
        .map(|y| format!("Year: {y}"))
        .unwrap_or_default();

    join_segments(&[
        format!("Company: {}", company.unwrap_or_default()),
        year_segment,
        text.to_string(),
    ])
}

fn company_text(name: &str) -> String {
    format!("Company: {}", name.trim())
}

fn join_segments(segments: &[String]) -> String {
    segments
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Scale a vector to unit L2 norm in place. Zero vectors are left alone.
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine similarity of two vectors of equal length.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
