//! Trash manager
//!
//! Owns the soft-delete/restore/purge transitions. Document status is the
//! source of truth in the index; chunk status in the vector store follows
//! via a non-transactional dual write.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use corpus_core::{
    DocumentId, DocumentIndexProvider, DocumentRecord, DocumentStatus, Namespace, Result,
    TrashEntry, VectorStoreProvider,
};
use corpus_infra::DependencyGuard;

#[derive(Clone)]
pub struct TrashManager {
    index: Arc<dyn DocumentIndexProvider>,
    vectors: Arc<dyn VectorStoreProvider>,
    vector_guard: DependencyGuard,
    retention: chrono::Duration,
}

impl TrashManager {
    pub fn new(
        index: Arc<dyn DocumentIndexProvider>,
        vectors: Arc<dyn VectorStoreProvider>,
        vector_guard: DependencyGuard,
        retention: chrono::Duration,
    ) -> Self {
        Self {
            index,
            vectors,
            vector_guard,
            retention,
        }
    }

    pub fn retention(&self) -> chrono::Duration {
        self.retention
    }

    /// Move a document to the trash. Vectors stay physically present; the
    /// status flag excludes them from search.
    pub async fn soft_delete(&self, doc_id: DocumentId, namespace: &Namespace) -> Result<TrashEntry> {
        let entry = self
            .index
            .soft_delete_document(doc_id, namespace, self.retention)
            .await?;

        self.propagate_status(doc_id, namespace, DocumentStatus::Deleting)
            .await;

        info!(
            doc_id = %doc_id,
            namespace = %namespace,
            purge_after = %entry.purge_after,
            "Document soft-deleted"
        );
        Ok(entry)
    }

    /// Bring a trashed document back to active, chunks included.
    pub async fn restore(
        &self,
        doc_id: DocumentId,
        namespace: &Namespace,
        deleted_at_ms: i64,
    ) -> Result<DocumentRecord> {
        let document = self
            .index
            .restore_document(doc_id, namespace, deleted_at_ms)
            .await?;

        self.propagate_status(doc_id, namespace, DocumentStatus::Active)
            .await;

        info!(doc_id = %doc_id, namespace = %namespace, "Document restored");
        Ok(document)
    }

    /// Claim the trash entry, mark the document purging, and hand the chunk
    /// cleanup to a detached task. Returns as soon as the claim is durable.
    /// Racing restores lose with `NotFound`.
    pub async fn permanently_delete(
        &self,
        doc_id: DocumentId,
        namespace: &Namespace,
        deleted_at_ms: i64,
    ) -> Result<()> {
        self.index
            .remove_trash_entry(doc_id, namespace, deleted_at_ms)
            .await?;
        self.index
            .update_document_status(doc_id, namespace, DocumentStatus::Purging)
            .await?;

        info!(doc_id = %doc_id, namespace = %namespace, "Permanent delete scheduled");

        let manager = self.clone();
        let namespace = namespace.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.finish_purge(doc_id, &namespace).await {
                // The sweeper finds the document still in purging and
                // finishes the job from persisted state.
                error!(
                    doc_id = %doc_id,
                    namespace = %namespace,
                    error = %e,
                    "Purge cleanup failed, leaving for sweeper"
                );
            }
        });

        Ok(())
    }

    pub async fn list_trash(&self, namespace: Option<&Namespace>) -> Result<Vec<TrashEntry>> {
        self.index.list_trash(namespace).await
    }

    /// Delete the chunks and write the purged tombstone. Idempotent, so the
    /// sweeper can re-run it after a crashed job.
    pub async fn finish_purge(&self, doc_id: DocumentId, namespace: &Namespace) -> Result<()> {
        let vectors = self.vectors.clone();
        let ns = namespace.clone();
        let deleted = self
            .vector_guard
            .execute("delete_by_document", move || {
                let vectors = vectors.clone();
                let ns = ns.clone();
                async move { vectors.delete_by_document(doc_id, &ns).await }
            })
            .await?;

        self.index
            .permanently_delete_document(doc_id, namespace)
            .await?;

        debug!(
            doc_id = %doc_id,
            namespace = %namespace,
            chunks_deleted = deleted,
            "Purge complete"
        );
        Ok(())
    }

    /// Purge every trash entry whose retention has lapsed. Returns how many
    /// purges were triggered.
    pub async fn sweep_expired(&self, batch_size: usize) -> Result<usize> {
        let now = chrono::Utc::now();
        let expired: Vec<TrashEntry> = self
            .list_trash(None)
            .await?
            .into_iter()
            .filter(|e| e.is_expired(now))
            .take(batch_size)
            .collect();

        let mut purged = 0;
        for entry in expired {
            match self
                .index
                .remove_trash_entry(entry.doc_id, &entry.namespace, entry.deleted_at_ms)
                .await
            {
                Ok(_) => {}
                Err(corpus_core::CorpusError::NotFound(_)) => continue, // lost to restore/purge
                Err(e) => return Err(e),
            }
            self.index
                .update_document_status(entry.doc_id, &entry.namespace, DocumentStatus::Purging)
                .await?;
            if let Err(e) = self.finish_purge(entry.doc_id, &entry.namespace).await {
                warn!(
                    doc_id = %entry.doc_id,
                    error = %e,
                    "Sweep purge failed, document stays in purging"
                );
                continue;
            }
            purged += 1;
        }
        Ok(purged)
    }

    /// Finish purges a crashed cleanup job left behind. State lives entirely
    /// in the index, so this works across restarts.
    pub async fn finish_interrupted_purges(&self) -> Result<usize> {
        let stuck = self
            .index
            .list_documents_by_status(DocumentStatus::Purging, None)
            .await?;

        let mut finished = 0;
        for doc in stuck {
            if let Err(e) = self.finish_purge(doc.doc_id, &doc.namespace).await {
                warn!(doc_id = %doc.doc_id, error = %e, "Interrupted purge still failing");
                continue;
            }
            finished += 1;
        }
        Ok(finished)
    }

    /// Dual write of document status to the chunk side. Deliberately
    /// best-effort: the index already holds the truth, and a failed chunk
    /// write is logged rather than unwound.
    async fn propagate_status(
        &self,
        doc_id: DocumentId,
        namespace: &Namespace,
        status: DocumentStatus,
    ) {
        let vectors = self.vectors.clone();
        let ns = namespace.clone();
        let result = self
            .vector_guard
            .execute("update_status", move || {
                let vectors = vectors.clone();
                let ns = ns.clone();
                async move { vectors.update_status(doc_id, &ns, status).await }
            })
            .await;

        if let Err(e) = result {
            warn!(
                doc_id = %doc_id,
                namespace = %namespace,
                status = %status,
                error = %e,
                "Chunk status propagation failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corpus_core::{
        CorpusError, DependencySettings, DocumentIdentifier, DocumentRecord, Namespace,
    };
    use corpus_providers::{InMemoryDocumentIndex, InMemoryVectorStore};
    use std::time::Duration;

    fn guard() -> DependencyGuard {
        DependencyGuard::new(
            "vector_store",
            &DependencySettings {
                failure_threshold: 5,
                open_timeout_secs: 30,
                half_open_max_calls: 2,
                max_retries: 0,
                base_delay_ms: 1,
                max_delay_ms: 5,
                call_timeout_secs: 5,
            },
        )
    }

    async fn seeded() -> (TrashManager, Arc<InMemoryDocumentIndex>, Arc<InMemoryVectorStore>, DocumentId) {
        let index = Arc::new(InMemoryDocumentIndex::new());
        let vectors = Arc::new(InMemoryVectorStore::new());
        let ns = Namespace::new("docs");

        let record = DocumentRecord::new(ns.clone(), "a.txt", "h1").with_source_path("/docs/a.txt");
        let doc_id = record.doc_id;
        let identifier = DocumentIdentifier::SourcePath {
            namespace: ns.clone(),
            path: "/docs/a.txt".to_string(),
        };
        index.create_document(record, &identifier).await.unwrap();
        vectors
            .insert(vec![corpus_core::ChunkRecord::new(
                doc_id,
                ns,
                0,
                "text",
                vec![1.0, 0.0],
            )])
            .await
            .unwrap();

        let manager = TrashManager::new(
            index.clone(),
            vectors.clone(),
            guard(),
            chrono::Duration::days(30),
        );
        (manager, index, vectors, doc_id)
    }

    #[tokio::test]
    async fn test_soft_delete_hides_chunks() {
        let (manager, _, vectors, doc_id) = seeded().await;
        let ns = Namespace::new("docs");

        manager.soft_delete(doc_id, &ns).await.unwrap();

        let hits = vectors
            .search(&[1.0, 0.0], Some(&ns), 10, &Default::default())
            .await
            .unwrap();
        assert!(hits.is_empty());
        // Chunks are hidden, not gone.
        assert_eq!(vectors.chunk_count(), 1);
    }

    #[tokio::test]
    async fn test_restore_round_trip() {
        let (manager, index, vectors, doc_id) = seeded().await;
        let ns = Namespace::new("docs");

        let entry = manager.soft_delete(doc_id, &ns).await.unwrap();
        let restored = manager.restore(doc_id, &ns, entry.deleted_at_ms).await.unwrap();

        assert_eq!(restored.status, DocumentStatus::Active);
        assert!(index.list_trash(None).await.unwrap().is_empty());
        let hits = vectors
            .search(&[1.0, 0.0], Some(&ns), 10, &Default::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_restore_of_missing_entry_fails() {
        let (manager, _, _, doc_id) = seeded().await;
        let ns = Namespace::new("docs");

        let entry = manager.soft_delete(doc_id, &ns).await.unwrap();
        manager.restore(doc_id, &ns, entry.deleted_at_ms).await.unwrap();

        let err = manager.restore(doc_id, &ns, entry.deleted_at_ms).await;
        assert!(matches!(err, Err(CorpusError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_permanent_delete_claims_entry_and_purges() {
        let (manager, index, vectors, doc_id) = seeded().await;
        let ns = Namespace::new("docs");

        let entry = manager.soft_delete(doc_id, &ns).await.unwrap();
        manager
            .permanently_delete(doc_id, &ns, entry.deleted_at_ms)
            .await
            .unwrap();

        // A racing restore must lose cleanly once the claim happened.
        let err = manager.restore(doc_id, &ns, entry.deleted_at_ms).await;
        assert!(matches!(err, Err(CorpusError::NotFound(_))));

        // The detached cleanup finishes; wait for the tombstone.
        for _ in 0..50 {
            let doc = index.get_document(doc_id, &ns).await.unwrap().unwrap();
            if doc.status == DocumentStatus::Purged {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let doc = index.get_document(doc_id, &ns).await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Purged);
        assert_eq!(vectors.chunk_count(), 0);
        assert!(index.list_trash(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_purges_expired_entries() {
        let (_, index, vectors, doc_id) = seeded().await;
        let ns = Namespace::new("docs");

        // Already-expired retention puts the entry straight past its TTL.
        let manager = TrashManager::new(
            index.clone(),
            vectors.clone(),
            guard(),
            chrono::Duration::milliseconds(-1),
        );
        manager.soft_delete(doc_id, &ns).await.unwrap();

        let purged = manager.sweep_expired(100).await.unwrap();
        assert_eq!(purged, 1);
        assert!(index.list_trash(None).await.unwrap().is_empty());
        let doc = index.get_document(doc_id, &ns).await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Purged);
    }

    #[tokio::test]
    async fn test_sweep_leaves_unexpired_entries() {
        let (manager, index, _, doc_id) = seeded().await;
        let ns = Namespace::new("docs");

        manager.soft_delete(doc_id, &ns).await.unwrap();
        let purged = manager.sweep_expired(100).await.unwrap();
        assert_eq!(purged, 0);
        assert_eq!(index.list_trash(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_finish_interrupted_purges() {
        let (manager, index, _, doc_id) = seeded().await;
        let ns = Namespace::new("docs");

        // Simulate a crash after the claim: entry gone, document purging.
        let entry = manager.soft_delete(doc_id, &ns).await.unwrap();
        index
            .remove_trash_entry(doc_id, &ns, entry.deleted_at_ms)
            .await
            .unwrap();
        index
            .update_document_status(doc_id, &ns, DocumentStatus::Purging)
            .await
            .unwrap();

        let finished = manager.finish_interrupted_purges().await.unwrap();
        assert_eq!(finished, 1);
        let doc = index.get_document(doc_id, &ns).await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Purged);
    }
}
