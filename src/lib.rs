//! docsift - a file indexing and retrieval engine.
//!
//! Every ingested document gets three representations: an embedding vector,
//! a full-text entry and a metadata row with tags. Queries go to one or more
//! retrieval methods (semantic, lexical, fuzzy filename, regex, tags), whose
//! rankings can be merged with reciprocal rank fusion and reordered by a
//! relevance scorer such as [ColBERT](https://github.com/stanford-futuredata/ColBERT).
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use docsift::{DataDir, Engine, FeatureHashEmbedder, HybridQuery, IngestMetadata};
//! use docsift::search::SearchMethod;
//!
//! # async fn run() -> docsift::Result<()> {
//! let data_dir = DataDir::resolve(None)?;
//! let engine = Engine::builder()
//!     .embedder(Arc::new(FeatureHashEmbedder::default()))
//!     .open(&data_dir)
//!     .await?;
//!
//! let report = engine
//!     .ingest("notes/rust.md", "ownership and borrowing", IngestMetadata::with_tags(["rust"]))
//!     .await;
//! assert!(report.is_ok());
//!
//! let query = HybridQuery::new("borrowing")
//!     .methods([SearchMethod::Semantic, SearchMethod::Lexical]);
//! for r in engine.hybrid_search(&query).await?.results {
//!     println!("{} {} ({:.3})", r.id, r.path, r.score);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod data_dir;
pub mod doc_id;
pub mod document;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod fusion;
pub mod lexical_index;
pub mod locks;
pub mod metadata_store;
pub mod model_manager;
pub mod pool;
pub mod reranker;
pub mod search;
pub mod vector_index;
pub mod walker;

pub use config::EngineConfig;
pub use coordinator::{BatchReport, IngestReport, IngestStatus};
pub use data_dir::DataDir;
pub use doc_id::DocumentId;
pub use document::{Document, IngestMetadata};
pub use embedding::{Embedder, FeatureHashEmbedder};
pub use engine::{Engine, HybridQuery, SearchFilters, SearchResponse};
pub use error::{Error, Result};
pub use metadata_store::MetadataStore;
pub use model_manager::ColbertModel;
pub use reranker::RelevanceScorer;
