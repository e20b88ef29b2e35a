//! In-memory provider implementations.

pub mod embeddings;
pub mod index;
pub mod llm;
pub mod vectors;

pub use embeddings::HashEmbeddingProvider;
pub use index::InMemoryDocumentIndex;
pub use llm::EchoLlmProvider;
pub use vectors::InMemoryVectorStore;
