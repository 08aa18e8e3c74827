use std::path::PathBuf;

use rayon::prelude::*;
use serde::Serialize;

use crate::{
    chunking::ChunkBuilder,
    config_db::{ConfigDb, DocumentRecord},
    embedding::ContextEmbedder,
    error::Result,
    extract::TextExtractor,
    metadata::{DocumentMetadata, MetadataCatalog},
    vector_store::{VectorRecord, VectorStore},
    walker::DiscoveredFile,
};

/// What happened to one input file.
#[derive(Debug, Clone)]
pub enum DocumentOutcome {
    Indexed(DocumentRecord),
    /// No metadata row matched the filename.
    NoMetadata(PathBuf),
    /// Neither embedded text nor OCR produced any text.
    NoText(PathBuf),
    Failed { path: PathBuf, error: String },
}

/// Counts for one ingestion batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, schemars::JsonSchema)]
pub struct IngestReport {
    pub indexed: usize,
    pub chunks: usize,
    pub skipped_no_metadata: usize,
    pub skipped_no_text: usize,
    pub failed: usize,
}

impl IngestReport {
    fn record(&mut self, outcome: &DocumentOutcome) {
        match outcome {
            DocumentOutcome::Indexed(doc) => {
                self.indexed += 1;
                self.chunks += doc.chunks;
            }
            DocumentOutcome::NoMetadata(_) => self.skipped_no_metadata += 1,
            DocumentOutcome::NoText(_) => self.skipped_no_text += 1,
            DocumentOutcome::Failed { .. } => self.failed += 1,
        }
    }

    pub fn skipped(&self) -> usize {
        self.skipped_no_metadata + self.skipped_no_text + self.failed
    }
}

/// Files extracted in parallel before their texts are indexed and dropped.
pub const EXTRACTION_WINDOW: usize = 16;

/// Turns report files into stored chunk vectors.
///
/// Per file: match metadata by filename, extract text, split into chunks,
/// embed with company/year context, upsert. Extraction runs in parallel over
/// windows of [`EXTRACTION_WINDOW`] files; embedding and storage run one
/// document at a time, so at most one window of texts is held in memory.
pub struct Ingestor<'a> {
    pub catalog: &'a MetadataCatalog,
    pub extractor: &'a dyn TextExtractor,
    pub chunker: &'a ChunkBuilder,
    pub embedder: &'a ContextEmbedder,
    pub store: &'a dyn VectorStore,
    /// Where indexed documents are recorded, when set.
    pub ledger: Option<&'a ConfigDb>,
}

impl Ingestor<'_> {
    /// Ingest a batch of files. A failing file never stops the batch.
    ///
    /// `on_document` is called once per input file, in input order.
    pub fn ingest(
        &self,
        files: &[DiscoveredFile],
        mut on_document: impl FnMut(&DocumentOutcome),
    ) -> IngestReport {
        let mut report = IngestReport::default();

        for window in files.chunks(EXTRACTION_WINDOW) {
            let extracted: Vec<Extracted> =
                window.par_iter().map(|file| self.extract(file)).collect();

            for (file, extracted) in window.iter().zip(extracted) {
                let outcome = self.index_extracted(file, extracted);
                report.record(&outcome);
                on_document(&outcome);
            }
        }

        tracing::info!(
            indexed = report.indexed,
            chunks = report.chunks,
            skipped = report.skipped(),
            "ingestion finished"
        );
        report
    }

    fn index_extracted(
        &self,
        file: &DiscoveredFile,
        extracted: Extracted,
    ) -> DocumentOutcome {
        match extracted {
            Extracted::NoMetadata => {
                tracing::warn!(
                    path = %file.relative_path.display(),
                    "no metadata row matches this file, skipping"
                );
                DocumentOutcome::NoMetadata(file.relative_path.clone())
            }
            Extracted::Failed(error) => {
                tracing::warn!(
                    path = %file.relative_path.display(),
                    %error,
                    "text extraction failed, skipping"
                );
                DocumentOutcome::Failed {
                    path: file.relative_path.clone(),
                    error,
                }
            }
            Extracted::Text(meta, text) => {
                match self.index_document(file, &meta, &text) {
                    Ok(Some(record)) => DocumentOutcome::Indexed(record),
                    Ok(None) => {
                        tracing::warn!(
                            path = %file.relative_path.display(),
                            "no text extracted, skipping"
                        );
                        DocumentOutcome::NoText(file.relative_path.clone())
                    }
                    Err(e) => {
                        tracing::error!(
                            path = %file.relative_path.display(),
                            error = %e,
                            "failed to index document"
                        );
                        DocumentOutcome::Failed {
                            path: file.relative_path.clone(),
                            error: e.to_string(),
                        }
                    }
                }
            }
        }
    }

    fn extract(&self, file: &DiscoveredFile) -> Extracted {
        let Some(mut meta) = self.catalog.match_file(&file.relative_path) else {
            return Extracted::NoMetadata;
        };
        meta.local_path = file.absolute_path.clone();

        match self.extractor.extract_text(&file.absolute_path) {
            Ok(text) => Extracted::Text(meta, text),
            Err(e) => Extracted::Failed(e.to_string()),
        }
    }

    /// Chunk, embed and store one document. `None` when it has no text.
    fn index_document(
        &self,
        file: &DiscoveredFile,
        meta: &DocumentMetadata,
        text: &str,
    ) -> Result<Option<DocumentRecord>> {
        let filename = file
            .relative_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| meta.key().filename());

        let chunks = self.chunker.build(text, meta, &filename);
        if chunks.is_empty() {
            return Ok(None);
        }

        let vectors = self.embedder.embed_chunks(&chunks)?;
        let records: Vec<VectorRecord> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| VectorRecord {
                id: chunk.chunk_id.clone(),
                vector,
                metadata: chunk,
            })
            .collect();
        self.store.upsert(&records)?;

        let record = DocumentRecord {
            filename,
            company: meta.company.clone(),
            from_year: meta.from_year.clone(),
            to_year: meta.to_year.clone(),
            source_url: meta.source_url.clone(),
            chunks: records.len(),
            mtime: file.mtime,
        };
        if let Some(ledger) = self.ledger {
            ledger.set_document(&record)?;
        }

        tracing::info!(
            document = %meta.key(),
            chunks = record.chunks,
            "indexed document"
        );
        Ok(Some(record))
    }
}

enum Extracted {
    NoMetadata,
    Failed(String),
    Text(DocumentMetadata, String),
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        path::Path,
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
    };

    use super::*;
    use crate::{
        chunking::ChunkingConfig,
        error::Error,
        offline::TrigramEmbedder,
        vector_store::RedbVectorStore,
    };

    const CSV: &str = "\
COMPANY,FROM YEAR,TO YEAR,ATTACHMENT
Acme Corp,2022,2023,https://example.com/acme.pdf
Globex Industries,2021,2022,https://example.com/globex.pdf
Initech Ltd,2022,2023,https://example.com/initech.pdf
";

    /// Returns canned text per filename; files it does not know fail.
    struct StubExtractor(HashMap<String, String>);

    impl TextExtractor for StubExtractor {
        fn extract_text(&self, path: &Path) -> Result<String> {
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            self.0
                .get(&name)
                .cloned()
                .ok_or_else(|| Error::Pdf(format!("unreadable: {name}")))
        }
    }

    fn file(name: &str) -> DiscoveredFile {
        DiscoveredFile {
            relative_path: PathBuf::from(name),
            absolute_path: PathBuf::from("/reports").join(name),
            mtime: 42,
        }
    }

    #[test]
    fn batch_continues_past_bad_files() {
        let tmp = tempfile::tempdir().unwrap();
        let store =
            RedbVectorStore::open(&tmp.path().join("v.redb"), 64, 10).unwrap();
        let ledger = ConfigDb::open(&tmp.path().join("c.redb")).unwrap();
        let catalog = MetadataCatalog::from_reader(CSV.as_bytes()).unwrap();
        let extractor = StubExtractor(HashMap::from([
            (
                "acme.pdf".to_string(),
                "Acme reduced emissions by 10%.".to_string(),
            ),
            ("globex.pdf".to_string(), "   \n".to_string()),
        ]));
        let chunker = ChunkBuilder::new(ChunkingConfig::default());
        let embedder =
            ContextEmbedder::new(Arc::new(TrigramEmbedder::new(64)), 64, 8)
                .unwrap();

        let ingestor = Ingestor {
            catalog: &catalog,
            extractor: &extractor,
            chunker: &chunker,
            embedder: &embedder,
            store: &store,
            ledger: Some(&ledger),
        };

        let mut seen = Vec::new();
        let report = ingestor.ingest(
            &[
                file("acme.pdf"),
                file("unknown.pdf"),
                file("globex.pdf"),
                file("initech.pdf"),
            ],
            |outcome| seen.push(format!("{outcome:?}")),
        );

        assert_eq!(
            report,
            IngestReport {
                indexed: 1,
                chunks: 1,
                skipped_no_metadata: 1,
                skipped_no_text: 1,
                failed: 1,
            }
        );
        assert_eq!(report.skipped(), 3);
        assert_eq!(seen.len(), 4);
        assert!(seen[0].starts_with("Indexed"));

        assert_eq!(store.len().unwrap(), 1);
        let chunk = store.get("Acme_Corp_2022_2023_chunk_0").unwrap().unwrap();
        assert_eq!(chunk.filename, "acme.pdf");

        let doc = ledger.get_document("acme.pdf").unwrap().unwrap();
        assert_eq!(doc.company, "Acme Corp");
        assert_eq!(doc.chunks, 1);
        assert_eq!(doc.mtime, 42);
        assert_eq!(doc.source_url, "https://example.com/acme.pdf");
    }

    #[test]
    fn reingestion_overwrites_same_ids() {
        let tmp = tempfile::tempdir().unwrap();
        let store =
            RedbVectorStore::open(&tmp.path().join("v.redb"), 64, 10).unwrap();
        let catalog = MetadataCatalog::from_reader(CSV.as_bytes()).unwrap();
        let text = "First paragraph about water.\n\n".repeat(20);
        let extractor =
            StubExtractor(HashMap::from([("acme.pdf".to_string(), text)]));
        let chunker = ChunkBuilder::new(ChunkingConfig {
            chunk_size: 100,
            overlap: 20,
        });
        let embedder =
            ContextEmbedder::new(Arc::new(TrigramEmbedder::new(64)), 64, 8)
                .unwrap();
        let ingestor = Ingestor {
            catalog: &catalog,
            extractor: &extractor,
            chunker: &chunker,
            embedder: &embedder,
            store: &store,
            ledger: None,
        };

        let first = ingestor.ingest(&[file("acme.pdf")], |_| {});
        let count = store.len().unwrap();
        let second = ingestor.ingest(&[file("acme.pdf")], |_| {});

        assert!(first.chunks > 1);
        assert_eq!(first, second);
        assert_eq!(store.len().unwrap(), count);
        assert_eq!(count as usize, first.chunks);
    }

    /// Tracks how many texts were extracted but not yet reported.
    struct TrackingExtractor {
        extracted: AtomicUsize,
        reported: Arc<AtomicUsize>,
        max_in_flight: AtomicUsize,
    }

    impl TextExtractor for TrackingExtractor {
        fn extract_text(&self, _path: &Path) -> Result<String> {
            let extracted = self.extracted.fetch_add(1, Ordering::SeqCst) + 1;
            let in_flight = extracted - self.reported.load(Ordering::SeqCst);
            self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
            Ok(String::new())
        }
    }

    #[test]
    fn extraction_is_bounded_to_one_window() {
        let tmp = tempfile::tempdir().unwrap();
        let store =
            RedbVectorStore::open(&tmp.path().join("v.redb"), 64, 10).unwrap();
        let total = EXTRACTION_WINDOW * 3 + 5;
        let mut csv = String::from("COMPANY,FROM YEAR,TO YEAR,ATTACHMENT\n");
        for i in 0..total {
            csv.push_str(&format!(
                "Company {i},2022,2023,https://example.com/r{i}.pdf\n"
            ));
        }
        let catalog = MetadataCatalog::from_reader(csv.as_bytes()).unwrap();
        let reported = Arc::new(AtomicUsize::new(0));
        let extractor = TrackingExtractor {
            extracted: AtomicUsize::new(0),
            reported: Arc::clone(&reported),
            max_in_flight: AtomicUsize::new(0),
        };
        let chunker = ChunkBuilder::new(ChunkingConfig::default());
        let embedder =
            ContextEmbedder::new(Arc::new(TrigramEmbedder::new(64)), 64, 8)
                .unwrap();
        let ingestor = Ingestor {
            catalog: &catalog,
            extractor: &extractor,
            chunker: &chunker,
            embedder: &embedder,
            store: &store,
            ledger: None,
        };

        let files: Vec<DiscoveredFile> =
            (0..total).map(|i| file(&format!("r{i}.pdf"))).collect();
        let mut order = Vec::new();
        let report = ingestor.ingest(&files, |outcome| {
            reported.fetch_add(1, Ordering::SeqCst);
            if let DocumentOutcome::NoText(path) = outcome {
                order.push(path.clone());
            }
        });

        assert_eq!(report.skipped_no_text, total);
        assert_eq!(extractor.extracted.load(Ordering::SeqCst), total);
        assert!(
            extractor.max_in_flight.load(Ordering::SeqCst) <= EXTRACTION_WINDOW
        );
        let expected: Vec<PathBuf> =
            files.iter().map(|f| f.relative_path.clone()).collect();
        assert_eq!(order, expected);
    }
}
