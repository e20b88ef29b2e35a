//! In-memory document index.
//!
//! Holds document records, the dedup identifier index, and the trash. The
//! identifier index is a secondary map keyed by the identifier's stable
//! string form, so dedup lookups are O(1) and the reserve step is a
//! conditional insert on one shard lock.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use tracing::debug;

use corpus_core::{
    CorpusError, DocumentId, DocumentIdentifier, DocumentIndexProvider, DocumentRecord,
    DocumentStatus, Namespace, Result, TrashEntry,
};

#[derive(Default)]
pub struct InMemoryDocumentIndex {
    documents: DashMap<(Namespace, DocumentId), DocumentRecord>,
    /// identifier index key → active holder
    identifiers: DashMap<String, DocumentId>,
    /// document → the identifier key it reserved at creation
    reservations: DashMap<DocumentId, String>,
    trash: DashMap<(Namespace, DocumentId, i64), TrashEntry>,
}

impl InMemoryDocumentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    fn doc_key(namespace: &Namespace, doc_id: DocumentId) -> (Namespace, DocumentId) {
        (namespace.clone(), doc_id)
    }
}

#[async_trait]
impl DocumentIndexProvider for InMemoryDocumentIndex {
    async fn create_document(
        &self,
        document: DocumentRecord,
        identifier: &DocumentIdentifier,
    ) -> Result<()> {
        let key = identifier.index_key();

        // Conditional insert: the entry guard holds the shard lock, so two
        // racing creators cannot both see the slot empty.
        match self.identifiers.entry(key.clone()) {
            Entry::Occupied(holder) => {
                return Err(CorpusError::Conflict(format!(
                    "identifier {} already held by document {}",
                    identifier,
                    holder.get()
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(document.doc_id);
            }
        }

        self.reservations.insert(document.doc_id, key);
        debug!(
            doc_id = %document.doc_id,
            namespace = %document.namespace,
            identifier = %identifier,
            "Document registered"
        );
        self.documents.insert(
            Self::doc_key(&document.namespace, document.doc_id),
            document,
        );
        Ok(())
    }

    async fn get_document(
        &self,
        doc_id: DocumentId,
        namespace: &Namespace,
    ) -> Result<Option<DocumentRecord>> {
        Ok(self
            .documents
            .get(&Self::doc_key(namespace, doc_id))
            .map(|d| d.clone()))
    }

    async fn get_document_by_identifier(
        &self,
        identifier: &DocumentIdentifier,
    ) -> Result<Option<DocumentRecord>> {
        let Some(holder) = self.identifiers.get(&identifier.index_key()) else {
            return Ok(None);
        };
        let doc = self
            .documents
            .get(&Self::doc_key(identifier.namespace(), *holder))
            .map(|d| d.clone());
        Ok(doc.filter(|d| d.status == DocumentStatus::Active))
    }

    async fn get_document_by_source_path(
        &self,
        namespace: &Namespace,
        path: &str,
    ) -> Result<Option<DocumentRecord>> {
        let identifier = DocumentIdentifier::SourcePath {
            namespace: namespace.clone(),
            path: path.to_string(),
        };
        self.get_document_by_identifier(&identifier).await
    }

    async fn update_document_metadata(
        &self,
        doc_id: DocumentId,
        namespace: &Namespace,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<()> {
        let mut doc = self
            .documents
            .get_mut(&Self::doc_key(namespace, doc_id))
            .ok_or_else(|| CorpusError::NotFound(format!("document {}", doc_id)))?;
        doc.metadata.extend(metadata);
        doc.updated_at = Utc::now();
        Ok(())
    }

    async fn update_document_status(
        &self,
        doc_id: DocumentId,
        namespace: &Namespace,
        status: DocumentStatus,
    ) -> Result<()> {
        let mut doc = self
            .documents
            .get_mut(&Self::doc_key(namespace, doc_id))
            .ok_or_else(|| CorpusError::NotFound(format!("document {}", doc_id)))?;
        doc.status = status;
        doc.updated_at = Utc::now();
        Ok(())
    }

    async fn update_chunk_count(
        &self,
        doc_id: DocumentId,
        namespace: &Namespace,
        chunk_count: usize,
    ) -> Result<()> {
        let mut doc = self
            .documents
            .get_mut(&Self::doc_key(namespace, doc_id))
            .ok_or_else(|| CorpusError::NotFound(format!("document {}", doc_id)))?;
        doc.chunk_count = chunk_count;
        doc.updated_at = Utc::now();
        Ok(())
    }

    async fn soft_delete_document(
        &self,
        doc_id: DocumentId,
        namespace: &Namespace,
        retention: chrono::Duration,
    ) -> Result<TrashEntry> {
        let entry = {
            let mut doc = self
                .documents
                .get_mut(&Self::doc_key(namespace, doc_id))
                .ok_or_else(|| CorpusError::NotFound(format!("document {}", doc_id)))?;
            if doc.status != DocumentStatus::Active {
                return Err(CorpusError::NotFound(format!(
                    "document {} is not active ({})",
                    doc_id, doc.status
                )));
            }
            doc.status = DocumentStatus::Deleting;
            doc.updated_at = Utc::now();
            TrashEntry::new(&doc, retention)
        };

        // Release the identifier so a successor can take it.
        if let Some(key) = self.reservations.get(&doc_id) {
            self.identifiers.remove_if(key.value(), |_, v| *v == doc_id);
        }

        self.trash.insert(
            (namespace.clone(), doc_id, entry.deleted_at_ms),
            entry.clone(),
        );
        debug!(doc_id = %doc_id, namespace = %namespace, "Document moved to trash");
        Ok(entry)
    }

    async fn restore_document(
        &self,
        doc_id: DocumentId,
        namespace: &Namespace,
        deleted_at_ms: i64,
    ) -> Result<DocumentRecord> {
        let key = self
            .reservations
            .get(&doc_id)
            .map(|k| k.clone())
            .ok_or_else(|| CorpusError::NotFound(format!("document {}", doc_id)))?;

        // Retake the identifier first; failing here must not consume the
        // trash entry.
        let mut reclaimed = false;
        match self.identifiers.entry(key.clone()) {
            Entry::Occupied(holder) => {
                if *holder.get() != doc_id {
                    return Err(CorpusError::Conflict(format!(
                        "identifier for document {} now held by {}",
                        doc_id,
                        holder.get()
                    )));
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(doc_id);
                reclaimed = true;
            }
        }

        let removed = self
            .trash
            .remove(&(namespace.clone(), doc_id, deleted_at_ms));
        if removed.is_none() {
            // Lost the race against a purge (or a second restore): undo the
            // reservation we just took.
            if reclaimed {
                self.identifiers.remove_if(&key, |_, v| *v == doc_id);
            }
            return Err(CorpusError::NotFound(format!(
                "trash entry for document {}",
                doc_id
            )));
        }

        let mut doc = self
            .documents
            .get_mut(&Self::doc_key(namespace, doc_id))
            .ok_or_else(|| CorpusError::NotFound(format!("document {}", doc_id)))?;
        doc.status = DocumentStatus::Active;
        doc.updated_at = Utc::now();
        debug!(doc_id = %doc_id, namespace = %namespace, "Document restored from trash");
        Ok(doc.clone())
    }

    async fn list_trash(&self, namespace: Option<&Namespace>) -> Result<Vec<TrashEntry>> {
        Ok(self
            .trash
            .iter()
            .filter(|e| namespace.map_or(true, |ns| &e.namespace == ns))
            .map(|e| e.clone())
            .collect())
    }

    async fn remove_trash_entry(
        &self,
        doc_id: DocumentId,
        namespace: &Namespace,
        deleted_at_ms: i64,
    ) -> Result<TrashEntry> {
        self.trash
            .remove(&(namespace.clone(), doc_id, deleted_at_ms))
            .map(|(_, entry)| entry)
            .ok_or_else(|| CorpusError::NotFound(format!("trash entry for document {}", doc_id)))
    }

    async fn list_documents_by_status(
        &self,
        status: DocumentStatus,
        namespace: Option<&Namespace>,
    ) -> Result<Vec<DocumentRecord>> {
        Ok(self
            .documents
            .iter()
            .filter(|d| d.status == status && namespace.map_or(true, |ns| &d.namespace == ns))
            .map(|d| d.clone())
            .collect())
    }

    async fn permanently_delete_document(
        &self,
        doc_id: DocumentId,
        namespace: &Namespace,
    ) -> Result<()> {
        let mut doc = self
            .documents
            .get_mut(&Self::doc_key(namespace, doc_id))
            .ok_or_else(|| CorpusError::NotFound(format!("document {}", doc_id)))?;
        doc.status = DocumentStatus::Purged;
        doc.chunk_count = 0;
        doc.updated_at = Utc::now();
        if let Some((_, key)) = self.reservations.remove(&doc_id) {
            self.identifiers.remove_if(&key, |_, v| *v == doc_id);
        }
        debug!(doc_id = %doc_id, namespace = %namespace, "Document purged (tombstone kept)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn doc(ns: &str, filename: &str, hash: &str, path: &str) -> (DocumentRecord, DocumentIdentifier) {
        let record = DocumentRecord::new(Namespace::new(ns), filename, hash).with_source_path(path);
        let identifier = DocumentIdentifier::SourcePath {
            namespace: Namespace::new(ns),
            path: path.to_string(),
        };
        (record, identifier)
    }

    #[tokio::test]
    async fn test_create_and_lookup_by_identifier() {
        let index = InMemoryDocumentIndex::new();
        let (record, identifier) = doc("docs", "a.txt", "h1", "/docs/a.txt");
        let doc_id = record.doc_id;

        index.create_document(record, &identifier).await.unwrap();

        let found = index
            .get_document_by_identifier(&identifier)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.doc_id, doc_id);
    }

    #[tokio::test]
    async fn test_conditional_insert_rejects_second_writer() {
        let index = InMemoryDocumentIndex::new();
        let (first, identifier) = doc("docs", "a.txt", "h1", "/docs/a.txt");
        let (second, _) = doc("docs", "a.txt", "h2", "/docs/a.txt");

        index.create_document(first, &identifier).await.unwrap();
        let err = index.create_document(second, &identifier).await;
        assert!(matches!(err, Err(CorpusError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_concurrent_reserve_single_winner() {
        let index = Arc::new(InMemoryDocumentIndex::new());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let index = index.clone();
            handles.push(tokio::spawn(async move {
                let (record, identifier) = doc("docs", "a.txt", "h1", "/docs/a.txt");
                index.create_document(record, &identifier).await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_soft_delete_releases_identifier() {
        let index = InMemoryDocumentIndex::new();
        let (record, identifier) = doc("docs", "a.txt", "h1", "/docs/a.txt");
        let doc_id = record.doc_id;

        index.create_document(record, &identifier).await.unwrap();
        index
            .soft_delete_document(doc_id, &Namespace::new("docs"), chrono::Duration::days(30))
            .await
            .unwrap();

        assert!(index
            .get_document_by_identifier(&identifier)
            .await
            .unwrap()
            .is_none());

        // Successor can now take the identifier.
        let (successor, _) = doc("docs", "a.txt", "h2", "/docs/a.txt");
        index.create_document(successor, &identifier).await.unwrap();
    }

    #[tokio::test]
    async fn test_restore_round_trip() {
        let index = InMemoryDocumentIndex::new();
        let ns = Namespace::new("docs");
        let (record, identifier) = doc("docs", "a.txt", "h1", "/docs/a.txt");
        let doc_id = record.doc_id;

        index.create_document(record, &identifier).await.unwrap();
        let entry = index
            .soft_delete_document(doc_id, &ns, chrono::Duration::days(30))
            .await
            .unwrap();

        let restored = index
            .restore_document(doc_id, &ns, entry.deleted_at_ms)
            .await
            .unwrap();
        assert_eq!(restored.status, DocumentStatus::Active);
        assert!(index.list_trash(Some(&ns)).await.unwrap().is_empty());

        // Identifier points at the restored document again.
        let found = index
            .get_document_by_identifier(&identifier)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.doc_id, doc_id);
    }

    #[tokio::test]
    async fn test_restore_conflicts_when_identifier_retaken() {
        let index = InMemoryDocumentIndex::new();
        let ns = Namespace::new("docs");
        let (record, identifier) = doc("docs", "a.txt", "h1", "/docs/a.txt");
        let doc_id = record.doc_id;

        index.create_document(record, &identifier).await.unwrap();
        let entry = index
            .soft_delete_document(doc_id, &ns, chrono::Duration::days(30))
            .await
            .unwrap();

        let (successor, _) = doc("docs", "a.txt", "h2", "/docs/a.txt");
        index.create_document(successor, &identifier).await.unwrap();

        let err = index.restore_document(doc_id, &ns, entry.deleted_at_ms).await;
        assert!(matches!(err, Err(CorpusError::Conflict(_))));
        // The losing restore must not consume the trash entry.
        assert_eq!(index.list_trash(Some(&ns)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_restore_and_purge_race_single_winner() {
        let index = InMemoryDocumentIndex::new();
        let ns = Namespace::new("docs");
        let (record, identifier) = doc("docs", "a.txt", "h1", "/docs/a.txt");
        let doc_id = record.doc_id;

        index.create_document(record, &identifier).await.unwrap();
        let entry = index
            .soft_delete_document(doc_id, &ns, chrono::Duration::days(30))
            .await
            .unwrap();

        // Purge claims the entry first; restore then loses cleanly.
        index
            .remove_trash_entry(doc_id, &ns, entry.deleted_at_ms)
            .await
            .unwrap();
        let err = index.restore_document(doc_id, &ns, entry.deleted_at_ms).await;
        assert!(matches!(err, Err(CorpusError::NotFound(_))));

        // The failed restore must not leave a dangling reservation.
        let (successor, _) = doc("docs", "a.txt", "h2", "/docs/a.txt");
        index.create_document(successor, &identifier).await.unwrap();
    }

    #[tokio::test]
    async fn test_purged_document_is_a_tombstone() {
        let index = InMemoryDocumentIndex::new();
        let ns = Namespace::new("docs");
        let (record, identifier) = doc("docs", "a.txt", "h1", "/docs/a.txt");
        let doc_id = record.doc_id;

        index.create_document(record, &identifier).await.unwrap();
        index
            .permanently_delete_document(doc_id, &ns)
            .await
            .unwrap();

        let tombstone = index.get_document(doc_id, &ns).await.unwrap().unwrap();
        assert_eq!(tombstone.status, DocumentStatus::Purged);
        assert_eq!(tombstone.chunk_count, 0);
    }
}
