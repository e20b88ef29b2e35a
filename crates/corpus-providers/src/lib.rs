//! Reference providers for the corpus knowledge store.
//!
//! In-process implementations of the collaborator interfaces: a document
//! index with an atomic identifier reserve, a vector store with status-aware
//! search, a deterministic embedder, an echo LLM, and the text chunker.
//! Production deployments swap these for real backends behind the same
//! traits.

pub mod chunking;
pub mod memory;

pub use chunking::{ChunkerConfig, TextChunker};
pub use memory::{
    EchoLlmProvider, HashEmbeddingProvider, InMemoryDocumentIndex, InMemoryVectorStore,
};
