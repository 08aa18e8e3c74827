//! brsr-search - semantic search over company sustainability (BRSR) reports.
//!
//! Report PDFs are matched to rows of a metadata table (company and
//! reporting years), split into overlapping chunks, and embedded together
//! with their company and year so that the vector space separates
//! companies. Queries resolve a free-text company name to canonical names,
//! retrieve a broad candidate set from the vector store, and rerank it with
//! a cross-encoder.
//!
//! # Quick start
//!
//! ```no_run
//! use brsr_search::{App, DataDir};
//! use brsr_search::search::{self, SearchRequest};
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let app = App::open(data_dir, Some("metadata.csv".as_ref())).unwrap();
//!
//! app.ingest(&["reports/".into()], None, |_| {}).unwrap();
//!
//! let request = SearchRequest::new("water withdrawal")
//!     .company("Acme")
//!     .year("2023")
//!     .top_k(5);
//! let outcome = app.search(&request).unwrap();
//! print!("{}", search::render_human(&outcome));
//! ```

pub mod app;
pub mod chunking;
pub mod cli;
pub mod config;
pub mod config_db;
pub mod data_dir;
pub mod doc_id;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod ingestion;
pub mod mcp;
pub mod metadata;
pub mod model_manager;
pub mod offline;
pub mod reranker;
pub mod resolver;
pub mod search;
pub mod vector_store;
pub mod walker;

pub use app::App;
pub use chunking::{Chunk, ChunkBuilder};
pub use config::Settings;
pub use config_db::ConfigDb;
pub use data_dir::DataDir;
pub use embedding::ContextEmbedder;
pub use error::{Error, Result};
pub use metadata::MetadataCatalog;
pub use model_manager::{Backend, ModelManager};
pub use resolver::EntityResolver;
pub use search::RetrievalEngine;
pub use vector_store::{RedbVectorStore, VectorStore};
