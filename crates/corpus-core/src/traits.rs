//! Collaborator interfaces consumed by the ingestion core.
//!
//! The core never talks to a real embedding service, vector database, or
//! document index directly; everything goes through these traits. Providers
//! are assumed to offer read-your-own-write consistency per namespace.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::Result;
use crate::types::{
    ChunkPiece, ChunkRecord, ChunkStrategy, DocumentId, DocumentIdentifier, DocumentRecord,
    DocumentStatus, Namespace, ScoredChunk, TrashEntry,
};

/// Turns text into vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn dimensions(&self) -> usize;
}

/// Stores and searches chunk embeddings.
#[async_trait]
pub trait VectorStoreProvider: Send + Sync {
    async fn insert(&self, chunks: Vec<ChunkRecord>) -> Result<()>;

    /// Ranked nearest-neighbor search. Implementations must exclude chunks
    /// whose status is set and not active; absent status counts as active.
    async fn search(
        &self,
        embedding: &[f32],
        namespace: Option<&Namespace>,
        top_k: usize,
        filters: &HashMap<String, serde_json::Value>,
    ) -> Result<Vec<ScoredChunk>>;

    /// Remove every chunk belonging to a document. Returns how many went.
    async fn delete_by_document(&self, doc_id: DocumentId, namespace: &Namespace)
        -> Result<usize>;

    /// Propagate a document status to its chunks. Backends without a status
    /// column may leave this as the default no-op; search then relies on the
    /// document index alone.
    async fn update_status(
        &self,
        _doc_id: DocumentId,
        _namespace: &Namespace,
        _status: DocumentStatus,
    ) -> Result<()> {
        Ok(())
    }

    async fn get_vectors_with_embeddings(&self, doc_id: DocumentId) -> Result<Vec<ChunkRecord>>;

    /// Largest insert batch the backend accepts in one call.
    fn max_batch_size(&self) -> usize {
        64
    }
}

/// Owns document records, the dedup identifier index, and the trash.
#[async_trait]
pub trait DocumentIndexProvider: Send + Sync {
    /// Conditional insert: registers the document and reserves `identifier`
    /// atomically. Fails with `Conflict` when an active document already
    /// holds the identifier, so two racing uploads cannot both win.
    async fn create_document(
        &self,
        document: DocumentRecord,
        identifier: &DocumentIdentifier,
    ) -> Result<()>;

    async fn get_document(
        &self,
        doc_id: DocumentId,
        namespace: &Namespace,
    ) -> Result<Option<DocumentRecord>>;

    /// O(1) secondary-index lookup of the active document holding an
    /// identifier. This is the dedup fast path; it must not scan.
    async fn get_document_by_identifier(
        &self,
        identifier: &DocumentIdentifier,
    ) -> Result<Option<DocumentRecord>>;

    async fn get_document_by_source_path(
        &self,
        namespace: &Namespace,
        path: &str,
    ) -> Result<Option<DocumentRecord>>;

    async fn update_document_metadata(
        &self,
        doc_id: DocumentId,
        namespace: &Namespace,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<()>;

    async fn update_document_status(
        &self,
        doc_id: DocumentId,
        namespace: &Namespace,
        status: DocumentStatus,
    ) -> Result<()>;

    /// Record how many chunks a document produced.
    async fn update_chunk_count(
        &self,
        doc_id: DocumentId,
        namespace: &Namespace,
        chunk_count: usize,
    ) -> Result<()>;

    /// Move a document to the trash: status becomes `Deleting`, its
    /// identifier reservation is released, and a `TrashEntry` is created
    /// with the given retention.
    async fn soft_delete_document(
        &self,
        doc_id: DocumentId,
        namespace: &Namespace,
        retention: chrono::Duration,
    ) -> Result<TrashEntry>;

    /// Bring a trashed document back: status becomes `Active` and the
    /// identifier reservation is retaken. `NotFound` when the entry is
    /// already gone (restored or purged by a racing action); `Conflict`
    /// when another active document took the identifier meanwhile.
    async fn restore_document(
        &self,
        doc_id: DocumentId,
        namespace: &Namespace,
        deleted_at_ms: i64,
    ) -> Result<DocumentRecord>;

    async fn list_trash(&self, namespace: Option<&Namespace>) -> Result<Vec<TrashEntry>>;

    /// Atomically claim a trash entry. Exactly one of a racing restore /
    /// purge pair gets it; the loser sees `NotFound`.
    async fn remove_trash_entry(
        &self,
        doc_id: DocumentId,
        namespace: &Namespace,
        deleted_at_ms: i64,
    ) -> Result<TrashEntry>;

    async fn list_documents_by_status(
        &self,
        status: DocumentStatus,
        namespace: Option<&Namespace>,
    ) -> Result<Vec<DocumentRecord>>;

    /// Final transition to the `Purged` tombstone.
    async fn permanently_delete_document(
        &self,
        doc_id: DocumentId,
        namespace: &Namespace,
    ) -> Result<()>;
}

/// Splits text into ordered pieces.
#[async_trait]
pub trait Chunker: Send + Sync {
    async fn chunk(&self, text: &str, strategy: ChunkStrategy) -> Result<Vec<ChunkPiece>>;
}

/// Completion-model access for enrichment stages (summaries and the like).
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;

    fn model(&self) -> &str;
}
