use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

// Newtype wrappers for type safety

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId(Uuid);

impl DocumentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hierarchical logical partition of the document store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace(String);

impl Namespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Self("default".to_string())
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Namespace {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Document lifecycle status.
///
/// `Active → Deleting → {Active | Purging → Purged}`. A purged document is a
/// tombstone: the record survives, the chunks and the trash entry do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Active,
    Deleting,
    Purging,
    Purged,
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentStatus::Active => write!(f, "active"),
            DocumentStatus::Deleting => write!(f, "deleting"),
            DocumentStatus::Purging => write!(f, "purging"),
            DocumentStatus::Purged => write!(f, "purged"),
        }
    }
}

/// A document owned by the document index. Its chunks live in the vector
/// store and reference it by `doc_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub doc_id: DocumentId,
    pub namespace: Namespace,
    pub filename: String,
    pub source_path: Option<String>,
    pub content_hash: String,
    pub chunk_count: usize,
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl DocumentRecord {
    pub fn new(
        namespace: Namespace,
        filename: impl Into<String>,
        content_hash: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            doc_id: DocumentId::new(),
            namespace,
            filename: filename.into(),
            source_path: None,
            content_hash: content_hash.into(),
            chunk_count: 0,
            status: DocumentStatus::Active,
            created_at: now,
            updated_at: now,
            metadata: HashMap::new(),
        }
    }

    pub fn with_source_path(mut self, path: impl Into<String>) -> Self {
        self.source_path = Some(path.into());
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A stored chunk: embedding plus text plus provenance metadata.
///
/// `status` is `None` for legacy rows written before status propagation;
/// search treats absent status as active.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub vector_id: String,
    pub doc_id: DocumentId,
    pub namespace: Namespace,
    pub chunk_index: usize,
    pub text: String,
    pub embedding: Vec<f32>,
    pub kind: String,
    pub status: Option<DocumentStatus>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ChunkRecord {
    pub fn new(
        doc_id: DocumentId,
        namespace: Namespace,
        chunk_index: usize,
        text: impl Into<String>,
        embedding: Vec<f32>,
    ) -> Self {
        Self {
            vector_id: format!("{}_{}", doc_id, chunk_index),
            doc_id,
            namespace,
            chunk_index,
            text: text.into(),
            embedding,
            kind: "text".to_string(),
            status: Some(DocumentStatus::Active),
            metadata: HashMap::new(),
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Whether this chunk is visible to search.
    pub fn is_searchable(&self) -> bool {
        matches!(self.status, Some(DocumentStatus::Active) | None)
    }
}

/// A search hit from the vector store.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: ChunkRecord,
    pub score: f32,
}

/// A ranked result surfaced to the caller after the result chain ran.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedResult {
    pub vector_id: String,
    pub doc_id: DocumentId,
    pub text: String,
    pub score: f32,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl From<ScoredChunk> for RankedResult {
    fn from(hit: ScoredChunk) -> Self {
        Self {
            vector_id: hit.chunk.vector_id,
            doc_id: hit.chunk.doc_id,
            text: hit.chunk.text,
            score: hit.score,
            metadata: hit.chunk.metadata,
        }
    }
}

/// A soft-deleted document pending restore or permanent purge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrashEntry {
    pub namespace: Namespace,
    pub doc_id: DocumentId,
    pub filename: String,
    pub deleted_at_ms: i64,
    pub purge_after: DateTime<Utc>,
    pub status: DocumentStatus,
}

impl TrashEntry {
    pub fn new(document: &DocumentRecord, retention: Duration) -> Self {
        let now = Utc::now();
        Self {
            namespace: document.namespace.clone(),
            doc_id: document.doc_id,
            filename: document.filename.clone(),
            deleted_at_ms: now.timestamp_millis(),
            purge_after: now + retention,
            status: DocumentStatus::Deleting,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.purge_after < now
    }
}

/// Where an ingest request came from. Decides the identifier strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestSource {
    /// Interactive/UI upload: no stable path, dedup by content fingerprint.
    Interactive,
    /// API-driven ingest with a stable source path.
    Api,
    /// CLI batch ingest with a stable source path.
    Cli,
    /// Bulk batch job with a stable source path.
    Batch,
}

impl IngestSource {
    pub fn identifier_strategy(&self) -> IdentifierStrategy {
        match self {
            IngestSource::Interactive => IdentifierStrategy::Fingerprint,
            IngestSource::Api | IngestSource::Cli | IngestSource::Batch => {
                IdentifierStrategy::SourcePath
            }
        }
    }
}

impl std::fmt::Display for IngestSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestSource::Interactive => write!(f, "interactive"),
            IngestSource::Api => write!(f, "api"),
            IngestSource::Cli => write!(f, "cli"),
            IngestSource::Batch => write!(f, "batch"),
        }
    }
}

/// How a document is keyed for deduplication lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierStrategy {
    Fingerprint,
    SourcePath,
}

/// The dedup lookup key. Serves as the secondary-index key in the document
/// index, so equality here is what "same identifier" means everywhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DocumentIdentifier {
    Fingerprint {
        namespace: Namespace,
        content_hash: String,
        filename: String,
    },
    SourcePath {
        namespace: Namespace,
        path: String,
    },
}

impl DocumentIdentifier {
    pub fn namespace(&self) -> &Namespace {
        match self {
            DocumentIdentifier::Fingerprint { namespace, .. } => namespace,
            DocumentIdentifier::SourcePath { namespace, .. } => namespace,
        }
    }

    /// Stable string form for index backends keyed by string.
    pub fn index_key(&self) -> String {
        match self {
            DocumentIdentifier::Fingerprint {
                namespace,
                content_hash,
                filename,
            } => format!("fp:{}:{}:{}", namespace, content_hash, filename),
            DocumentIdentifier::SourcePath { namespace, path } => {
                format!("path:{}:{}", namespace, path)
            }
        }
    }
}

impl std::fmt::Display for DocumentIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.index_key())
    }
}

/// The dedup guard's verdict for one ingest request. Transient, never
/// persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "decision")]
pub enum IngestDecision {
    /// Identical content already active at this identifier.
    Skip { existing: DocumentId },
    /// No active document holds this identifier.
    IngestNew,
    /// Same identifier, different content: displace the old version.
    ReingestVersion { displaced: DocumentId },
}

impl std::fmt::Display for IngestDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestDecision::Skip { .. } => write!(f, "skip"),
            IngestDecision::IngestNew => write!(f, "ingest_new"),
            IngestDecision::ReingestVersion { .. } => write!(f, "reingest_version"),
        }
    }
}

/// What the caller gets back from a successful ingest (including SKIP).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReceipt {
    pub doc_id: DocumentId,
    pub chunks_created: usize,
    pub decision: IngestDecision,
}

/// Chunking strategy selector passed to the `Chunker` provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    /// Recursive separator-based splitting.
    #[default]
    Recursive,
    /// Sections first, recursive within oversized sections.
    Hierarchical,
    /// Split on markdown headings.
    Markdown,
    /// Keep topically related content together.
    Semantic,
    /// Fixed-size character windows with overlap.
    Character,
    /// Split on speaker turns / timestamps.
    Transcript,
}

/// Metadata attached to each piece the chunker produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkPieceMetadata {
    pub index: usize,
    pub start_offset: usize,
    pub end_offset: usize,
    pub token_count: usize,
    pub section: Option<String>,
    pub kind: String,
}

/// One piece of chunked text, ordered by `metadata.index`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkPiece {
    pub text: String,
    pub metadata: ChunkPieceMetadata,
}

/// A query against the store, threaded through the query/result chains.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub text: String,
    pub namespace: Option<Namespace>,
    pub top_k: usize,
    pub filters: HashMap<String, serde_json::Value>,
}

impl QueryRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            namespace: None,
            top_k: 10,
            filters: HashMap::new(),
        }
    }

    pub fn with_namespace(mut self, namespace: Namespace) -> Self {
        self.namespace = Some(namespace);
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.filters.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_id_uniqueness() {
        let a = DocumentId::new();
        let b = DocumentId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_identifier_strategy_by_source() {
        assert_eq!(
            IngestSource::Interactive.identifier_strategy(),
            IdentifierStrategy::Fingerprint
        );
        assert_eq!(
            IngestSource::Api.identifier_strategy(),
            IdentifierStrategy::SourcePath
        );
        assert_eq!(
            IngestSource::Batch.identifier_strategy(),
            IdentifierStrategy::SourcePath
        );
    }

    #[test]
    fn test_identifier_index_key_distinguishes_strategies() {
        let fp = DocumentIdentifier::Fingerprint {
            namespace: Namespace::new("docs"),
            content_hash: "abc".to_string(),
            filename: "report.pdf".to_string(),
        };
        let path = DocumentIdentifier::SourcePath {
            namespace: Namespace::new("docs"),
            path: "/docs/report.pdf".to_string(),
        };
        assert_ne!(fp.index_key(), path.index_key());
        assert!(fp.index_key().starts_with("fp:"));
        assert!(path.index_key().starts_with("path:"));
    }

    #[test]
    fn test_trash_entry_expiry() {
        let doc = DocumentRecord::new(Namespace::default(), "a.txt", "h1");
        let entry = TrashEntry::new(&doc, Duration::days(30));
        assert!(!entry.is_expired(Utc::now()));
        assert!(entry.is_expired(Utc::now() + Duration::days(31)));
    }

    #[test]
    fn test_chunk_searchability() {
        let mut chunk = ChunkRecord::new(
            DocumentId::new(),
            Namespace::default(),
            0,
            "text",
            vec![0.0; 4],
        );
        assert!(chunk.is_searchable());
        chunk.status = Some(DocumentStatus::Deleting);
        assert!(!chunk.is_searchable());
        // Legacy rows without a status flag stay visible.
        chunk.status = None;
        assert!(chunk.is_searchable());
    }
}
