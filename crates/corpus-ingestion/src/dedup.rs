//! Deduplication guard.
//!
//! Runs strictly before chunking and embedding: a duplicate upload must cost
//! a hash and one index lookup, not an embedding round-trip. The lookup goes
//! through the index's identifier map (O(1)), and the final reserve is the
//! index's conditional insert, so racing uploads of one identifier cannot
//! both decide to ingest.

use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

use corpus_core::{
    CorpusError, DocumentIdentifier, DocumentIndexProvider, IdentifierStrategy, IngestDecision,
    Result,
};

use crate::request::IngestRequest;

pub struct DedupGuard {
    index: Arc<dyn DocumentIndexProvider>,
}

impl DedupGuard {
    pub fn new(index: Arc<dyn DocumentIndexProvider>) -> Self {
        Self { index }
    }

    /// SHA-256 of the raw content bytes, hex-encoded.
    pub fn fingerprint(content: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content);
        hex::encode(hasher.finalize())
    }

    /// The identifier this request competes under.
    ///
    /// Interactive uploads key on (namespace, hash, filename) — conservative,
    /// never displaces. Path-carrying sources key on (namespace, path) and
    /// may displace a changed file.
    pub fn identifier_for(
        request: &IngestRequest,
        content_hash: &str,
    ) -> Result<DocumentIdentifier> {
        match request.source.identifier_strategy() {
            IdentifierStrategy::Fingerprint => Ok(DocumentIdentifier::Fingerprint {
                namespace: request.namespace.clone(),
                content_hash: content_hash.to_string(),
                filename: request.filename.clone(),
            }),
            IdentifierStrategy::SourcePath => {
                let path = request.source_path.as_deref().ok_or_else(|| {
                    CorpusError::Validation(format!(
                        "{} ingest requires a source path",
                        request.source
                    ))
                })?;
                Ok(DocumentIdentifier::SourcePath {
                    namespace: request.namespace.clone(),
                    path: path.to_string(),
                })
            }
        }
    }

    /// Decide SKIP / INGEST_NEW / REINGEST_VERSION for a request.
    pub async fn decide(
        &self,
        request: &IngestRequest,
        content_hash: &str,
    ) -> Result<(IngestDecision, DocumentIdentifier)> {
        let identifier = Self::identifier_for(request, content_hash)?;
        let existing = self.index.get_document_by_identifier(&identifier).await?;

        let decision = match (&identifier, existing) {
            (_, None) => IngestDecision::IngestNew,
            (DocumentIdentifier::Fingerprint { .. }, Some(doc)) => {
                // Identifier equality already implies identical hash here.
                IngestDecision::Skip {
                    existing: doc.doc_id,
                }
            }
            (DocumentIdentifier::SourcePath { .. }, Some(doc)) => {
                if doc.content_hash == content_hash {
                    IngestDecision::Skip {
                        existing: doc.doc_id,
                    }
                } else {
                    IngestDecision::ReingestVersion {
                        displaced: doc.doc_id,
                    }
                }
            }
        };

        debug!(
            identifier = %identifier,
            decision = %decision,
            "Dedup decision"
        );
        Ok((decision, identifier))
    }
}
