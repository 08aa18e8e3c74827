use std::path::Path;

use rayon::prelude::*;
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};

use crate::{
    chunking::Chunk,
    error::{Error, Result},
};

/// Chunk vectors, stored as little-endian `f32` bytes keyed by chunk id.
const VECTORS: TableDefinition<&str, &[u8]> = TableDefinition::new("vectors");
/// Chunk metadata as JSON, keyed by chunk id.
const CHUNKS: TableDefinition<&str, &[u8]> = TableDefinition::new("chunks");
const STORE_INFO: TableDefinition<&str, u64> = TableDefinition::new("store_info");

const DIMENSION_KEY: &str = "dimension";

/// Default number of records written per transaction.
pub const DEFAULT_UPSERT_BATCH_SIZE: usize = 100;

/// A vector with its id and the chunk it was computed from.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: Chunk,
}

/// A nearest-neighbour hit.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: String,
    /// Cosine similarity between the query and stored vector.
    pub score: f32,
    pub metadata: Option<Chunk>,
}

/// Persists vectors and answers nearest-neighbour queries.
///
/// Upserting an existing id overwrites its vector and metadata.
pub trait VectorStore: Send + Sync {
    fn upsert(&self, records: &[VectorRecord]) -> Result<()>;

    /// The `top_k` stored vectors most similar to `vector`, best first.
    fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        include_metadata: bool,
    ) -> Result<Vec<Candidate>>;
}

/// A [`VectorStore`] backed by a redb file, searched exhaustively.
///
/// The store remembers the dimension of the first vectors written to it and
/// refuses vectors of any other size.
pub struct RedbVectorStore {
    db: Database,
    dimension: usize,
    batch_size: usize,
}

impl RedbVectorStore {
    /// Open or create a store at `path` for vectors of `dimension`.
    ///
    /// Opening a store that already holds vectors of another dimension is a
    /// configuration error.
    ///
    /// # Examples
    ///
    /// ```
    /// # let tmp = tempfile::tempdir().unwrap();
    /// use brsr_search::vector_store::RedbVectorStore;
    ///
    /// let store = RedbVectorStore::open(&tmp.path().join("vectors.redb"), 384, 100).unwrap();
    /// assert_eq!(store.len().unwrap(), 0);
    /// ```
    pub fn open(path: &Path, dimension: usize, batch_size: usize) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        {
            txn.open_table(VECTORS)?;
            txn.open_table(CHUNKS)?;
            let mut info = txn.open_table(STORE_INFO)?;
            let stored = info.get(DIMENSION_KEY)?.map(|v| v.value());
            match stored {
                Some(stored) if stored as usize != dimension => {
                    return Err(Error::DimensionMismatch {
                        expected: stored as usize,
                        actual: dimension,
                    });
                }
                Some(_) => {}
                None => {
                    info.insert(DIMENSION_KEY, dimension as u64)?;
                }
            }
        }
        txn.commit()?;

        Ok(Self {
            db,
            dimension,
            batch_size: batch_size.max(1),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of stored vectors.
    pub fn len(&self) -> Result<u64> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(VECTORS)?;
        Ok(table.len()?)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Fetch the stored metadata of one chunk.
    pub fn get(&self, id: &str) -> Result<Option<Chunk>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CHUNKS)?;
        table
            .get(id)?
            .map(|v| serde_json::from_slice(v.value()).map_err(Error::from))
            .transpose()
    }

    fn load_vectors(&self) -> Result<Vec<(String, Vec<f32>)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(VECTORS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            let bytes = v.value();
            if bytes.len() != self.dimension * 4 {
                tracing::warn!(id = k.value(), "skipping malformed vector");
                continue;
            }
            let vector: Vec<f32> = bytemuck::pod_collect_to_vec(bytes);
            result.push((k.value().to_string(), vector));
        }
        Ok(result)
    }

    fn write_batch(&self, records: &[VectorRecord]) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut vectors = txn.open_table(VECTORS)?;
            let mut chunks = txn.open_table(CHUNKS)?;
            for record in records {
                let meta = serde_json::to_vec(&record.metadata)?;
                vectors.insert(
                    record.id.as_str(),
                    bytemuck::cast_slice::<f32, u8>(&record.vector),
                )?;
                chunks.insert(record.id.as_str(), meta.as_slice())?;
            }
        }
        txn.commit()?;
        Ok(())
    }
}

impl VectorStore for RedbVectorStore {
    fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        if let Some(bad) =
            records.iter().find(|r| r.vector.len() != self.dimension)
        {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: bad.vector.len(),
            });
        }

        for batch in records.chunks(self.batch_size) {
            self.write_batch(batch)?;
        }
        tracing::debug!(records = records.len(), "upserted vectors");
        Ok(())
    }

    fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        include_metadata: bool,
    ) -> Result<Vec<Candidate>> {
        if vector.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let stored = self.load_vectors()?;
        let mut scored: Vec<(String, f32)> = stored
            .into_par_iter()
            .map(|(id, v)| {
                let score = crate::embedding::cosine_similarity(vector, &v);
                (id, score)
            })
            .collect();

        // Ties broken by id so results are reproducible.
        scored.sort_by(|a, b| {
            b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(top_k);

        scored
            .into_iter()
            .map(|(id, score)| {
                let metadata = if include_metadata {
                    self.get(&id)?
                } else {
                    None
                };
                Ok(Candidate {
                    id,
                    score,
                    metadata,
                })
            })
            .collect()
    }
}

impl std::fmt::Debug for RedbVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbVectorStore")
            .field("dimension", &self.dimension)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, text: &str) -> Chunk {
        Chunk {
            chunk_id: id.to_string(),
            text: text.to_string(),
            company: "Acme Corp".to_string(),
            from_year: "2022".to_string(),
            to_year: "2023".to_string(),
            filename: "Acme_Corp_2022_2023.pdf".to_string(),
            chunk_index: 0,
            total_chunks: 1,
        }
    }

    fn record(id: &str, vector: Vec<f32>) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            vector,
            metadata: chunk(id, &format!("text of {id}")),
        }
    }

    fn test_store(dimension: usize) -> (tempfile::TempDir, RedbVectorStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store =
            RedbVectorStore::open(&tmp.path().join("vectors.redb"), dimension, 2)
                .unwrap();
        (tmp, store)
    }

    #[test]
    fn query_ranks_by_similarity() {
        let (_tmp, store) = test_store(3);
        store
            .upsert(&[
                record("a", vec![1.0, 0.0, 0.0]),
                record("b", vec![0.0, 1.0, 0.0]),
                record("c", vec![0.7, 0.7, 0.0]),
            ])
            .unwrap();

        let hits = store.query(&[1.0, 0.0, 0.0], 2, false).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "a");
        assert_eq!(hits[1].id, "c");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert!(hits[0].metadata.is_none());
    }

    #[test]
    fn metadata_round_trips_verbatim() {
        let (_tmp, store) = test_store(2);
        let rec = record("Acme_Corp_2022_2023_chunk_0", vec![1.0, 0.0]);
        store.upsert(std::slice::from_ref(&rec)).unwrap();

        let hits = store.query(&[1.0, 0.0], 5, true).unwrap();
        assert_eq!(hits[0].metadata.as_ref(), Some(&rec.metadata));
        assert_eq!(store.get(&rec.id).unwrap(), Some(rec.metadata));
    }

    #[test]
    fn upsert_overwrites_existing_id() {
        let (_tmp, store) = test_store(2);
        store.upsert(&[record("a", vec![1.0, 0.0])]).unwrap();
        store.upsert(&[record("a", vec![0.0, 1.0])]).unwrap();

        assert_eq!(store.len().unwrap(), 1);
        let hits = store.query(&[0.0, 1.0], 1, false).unwrap();
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn upserts_span_multiple_batches() {
        let (_tmp, store) = test_store(2);
        let records: Vec<VectorRecord> = (0..5)
            .map(|i| record(&format!("id{i}"), vec![1.0, i as f32]))
            .collect();
        store.upsert(&records).unwrap();
        assert_eq!(store.len().unwrap(), 5);
    }

    #[test]
    fn wrong_dimension_is_rejected() {
        let (_tmp, store) = test_store(3);
        assert!(matches!(
            store.upsert(&[record("a", vec![1.0, 0.0])]),
            Err(Error::DimensionMismatch { .. })
        ));
        assert!(matches!(
            store.query(&[1.0], 5, false),
            Err(Error::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn reopening_with_another_dimension_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vectors.redb");
        {
            let store = RedbVectorStore::open(&path, 3, 10).unwrap();
            store.upsert(&[record("a", vec![1.0, 0.0, 0.0])]).unwrap();
        }
        assert!(matches!(
            RedbVectorStore::open(&path, 4, 10),
            Err(Error::DimensionMismatch {
                expected: 3,
                actual: 4
            })
        ));

        let store = RedbVectorStore::open(&path, 3, 10).unwrap();
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn empty_store_returns_nothing() {
        let (_tmp, store) = test_store(2);
        assert!(store.is_empty().unwrap());
        assert!(store.query(&[1.0, 0.0], 20, true).unwrap().is_empty());
    }
}
