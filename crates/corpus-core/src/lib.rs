//! Core types, traits, and configuration for the corpus knowledge store.
//!
//! Everything the pipeline crates share lives here: the document/chunk/trash
//! data model, the collaborator provider interfaces, the error taxonomy, the
//! per-request context envelope, and configuration loading.

pub mod config;
pub mod context;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{
    CorpusConfig, DependencySettings, IngestionSettings, LifecycleSettings, ResilienceSettings,
};
pub use context::{RequestContext, RequestId};
pub use error::{CorpusError, Result};
pub use traits::{
    Chunker, DocumentIndexProvider, EmbeddingProvider, LlmProvider, VectorStoreProvider,
};
pub use types::{
    ChunkPiece, ChunkPieceMetadata, ChunkRecord, ChunkStrategy, DocumentId, DocumentIdentifier,
    DocumentRecord, DocumentStatus, IdentifierStrategy, IngestDecision, IngestReceipt,
    IngestSource, Namespace, QueryRequest, RankedResult, ScoredChunk, TrashEntry,
};
