//! Reingest recovery protocol.
//!
//! REINGEST_VERSION is a two-step, non-transactional update: soft-delete the
//! old version, then ingest the new one. This module makes the pair look
//! atomic to the caller — if the second step fails (or the caller cancels),
//! the displaced document is restored before the failure surfaces, so there
//! is no window with zero active documents for the identifier and no data
//! loss.

use tracing::{error, info};

use corpus_core::{CorpusError, DocumentId, Namespace, Result};
use corpus_lifecycle::TrashManager;

/// Handle to a document displaced by a reingest, with everything needed to
/// bring it back.
#[derive(Debug, Clone, Copy)]
pub struct DisplacedDocument {
    pub doc_id: DocumentId,
    pub deleted_at_ms: i64,
}

pub struct RecoveryProtocol {
    trash: TrashManager,
}

impl RecoveryProtocol {
    pub fn new(trash: TrashManager) -> Self {
        Self { trash }
    }

    /// Step one of a reingest: move the old version to the trash before any
    /// work on the new version starts. On success the old content is
    /// recoverable for the full retention window.
    pub async fn displace(
        &self,
        doc_id: DocumentId,
        namespace: &Namespace,
    ) -> Result<DisplacedDocument> {
        let entry = self.trash.soft_delete(doc_id, namespace).await?;
        info!(
            doc_id = %doc_id,
            namespace = %namespace,
            "Old version displaced to trash for reingest"
        );
        Ok(DisplacedDocument {
            doc_id,
            deleted_at_ms: entry.deleted_at_ms,
        })
    }

    /// The failure path: restore the displaced document, then hand back the
    /// original failure for the caller. If the restore itself fails there is
    /// no safe fallback left, so that becomes a distinct `RecoveryFailed` —
    /// never conflated with the ingestion failure it grew out of.
    pub async fn recover(
        &self,
        displaced: &DisplacedDocument,
        namespace: &Namespace,
        cause: CorpusError,
    ) -> CorpusError {
        match self
            .trash
            .restore(displaced.doc_id, namespace, displaced.deleted_at_ms)
            .await
        {
            Ok(_) => {
                info!(
                    doc_id = %displaced.doc_id,
                    namespace = %namespace,
                    cause = %cause,
                    "Displaced document restored after failed reingest"
                );
                cause
            }
            Err(restore_err) => {
                error!(
                    doc_id = %displaced.doc_id,
                    namespace = %namespace,
                    restore_error = %restore_err,
                    original_failure = %cause,
                    "RECOVERY FAILED: displaced document could not be restored"
                );
                CorpusError::RecoveryFailed {
                    doc_id: displaced.doc_id,
                    message: format!("{} (after ingestion failure: {})", restore_err, cause),
                }
            }
        }
    }
}
