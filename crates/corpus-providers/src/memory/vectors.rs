//! In-memory vector store with status-aware search.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use tracing::debug;

use corpus_core::{
    ChunkRecord, CorpusError, DocumentId, DocumentStatus, Namespace, Result, ScoredChunk,
    VectorStoreProvider,
};

pub struct InMemoryVectorStore {
    chunks: DashMap<String, ChunkRecord>,
    max_batch_size: usize,
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self {
            chunks: DashMap::new(),
            max_batch_size: 64,
        }
    }
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size.max(1);
        self
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    fn matches_filters(
        chunk: &ChunkRecord,
        filters: &HashMap<String, serde_json::Value>,
    ) -> bool {
        filters.iter().all(|(key, expected)| match key.as_str() {
            "kind" => expected.as_str() == Some(chunk.kind.as_str()),
            _ => chunk.metadata.get(key) == Some(expected),
        })
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorStoreProvider for InMemoryVectorStore {
    async fn insert(&self, chunks: Vec<ChunkRecord>) -> Result<()> {
        if chunks.len() > self.max_batch_size {
            return Err(CorpusError::Validation(format!(
                "batch of {} exceeds max batch size {}",
                chunks.len(),
                self.max_batch_size
            )));
        }
        let count = chunks.len();
        for chunk in chunks {
            self.chunks.insert(chunk.vector_id.clone(), chunk);
        }
        debug!(inserted = count, "Chunks inserted");
        Ok(())
    }

    async fn search(
        &self,
        embedding: &[f32],
        namespace: Option<&Namespace>,
        top_k: usize,
        filters: &HashMap<String, serde_json::Value>,
    ) -> Result<Vec<ScoredChunk>> {
        let mut hits: Vec<ScoredChunk> = self
            .chunks
            .iter()
            .filter(|c| c.is_searchable())
            .filter(|c| namespace.map_or(true, |ns| &c.namespace == ns))
            .filter(|c| Self::matches_filters(&c, filters))
            .map(|c| ScoredChunk {
                score: cosine_similarity(embedding, &c.embedding),
                chunk: c.clone(),
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete_by_document(
        &self,
        doc_id: DocumentId,
        namespace: &Namespace,
    ) -> Result<usize> {
        let victims: Vec<String> = self
            .chunks
            .iter()
            .filter(|c| c.doc_id == doc_id && &c.namespace == namespace)
            .map(|c| c.vector_id.clone())
            .collect();
        for id in &victims {
            self.chunks.remove(id);
        }
        debug!(doc_id = %doc_id, deleted = victims.len(), "Chunks deleted");
        Ok(victims.len())
    }

    async fn update_status(
        &self,
        doc_id: DocumentId,
        namespace: &Namespace,
        status: DocumentStatus,
    ) -> Result<()> {
        for mut c in self.chunks.iter_mut() {
            if c.doc_id == doc_id && &c.namespace == namespace {
                c.status = Some(status);
            }
        }
        Ok(())
    }

    async fn get_vectors_with_embeddings(&self, doc_id: DocumentId) -> Result<Vec<ChunkRecord>> {
        let mut vectors: Vec<ChunkRecord> = self
            .chunks
            .iter()
            .filter(|c| c.doc_id == doc_id)
            .map(|c| c.clone())
            .collect();
        vectors.sort_by_key(|c| c.chunk_index);
        Ok(vectors)
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(doc_id: DocumentId, index: usize, embedding: Vec<f32>) -> ChunkRecord {
        ChunkRecord::new(doc_id, Namespace::new("docs"), index, "text", embedding)
    }

    #[tokio::test]
    async fn test_insert_and_search_ranked() {
        let store = InMemoryVectorStore::new();
        let doc_id = DocumentId::new();
        store
            .insert(vec![
                chunk(doc_id, 0, vec![1.0, 0.0]),
                chunk(doc_id, 1, vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        let hits = store
            .search(&[1.0, 0.0], Some(&Namespace::new("docs")), 10, &HashMap::new())
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.chunk_index, 0);
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn test_search_excludes_deleting_chunks() {
        let store = InMemoryVectorStore::new();
        let doc_id = DocumentId::new();
        store.insert(vec![chunk(doc_id, 0, vec![1.0, 0.0])]).await.unwrap();

        store
            .update_status(doc_id, &Namespace::new("docs"), DocumentStatus::Deleting)
            .await
            .unwrap();

        let hits = store
            .search(&[1.0, 0.0], None, 10, &HashMap::new())
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_search_includes_legacy_unflagged_chunks() {
        let store = InMemoryVectorStore::new();
        let mut legacy = chunk(DocumentId::new(), 0, vec![1.0, 0.0]);
        legacy.status = None;
        store.insert(vec![legacy]).await.unwrap();

        let hits = store
            .search(&[1.0, 0.0], None, 10, &HashMap::new())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_kind_filter() {
        let store = InMemoryVectorStore::new();
        let doc_id = DocumentId::new();
        store
            .insert(vec![
                chunk(doc_id, 0, vec![1.0, 0.0]).with_kind("summary"),
                chunk(doc_id, 1, vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let mut filters = HashMap::new();
        filters.insert("kind".to_string(), serde_json::json!("summary"));
        let hits = store.search(&[1.0, 0.0], None, 10, &filters).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.kind, "summary");
    }

    #[tokio::test]
    async fn test_batch_size_enforced() {
        let store = InMemoryVectorStore::new().with_max_batch_size(1);
        let doc_id = DocumentId::new();
        let result = store
            .insert(vec![
                chunk(doc_id, 0, vec![1.0]),
                chunk(doc_id, 1, vec![1.0]),
            ])
            .await;
        assert!(matches!(result, Err(CorpusError::Validation(_))));
    }

    #[tokio::test]
    async fn test_get_vectors_with_embeddings_ordered() {
        let store = InMemoryVectorStore::new();
        let doc_id = DocumentId::new();
        store
            .insert(vec![
                chunk(doc_id, 2, vec![0.3]),
                chunk(doc_id, 0, vec![0.1]),
                chunk(doc_id, 1, vec![0.2]),
            ])
            .await
            .unwrap();

        let vectors = store.get_vectors_with_embeddings(doc_id).await.unwrap();
        let indexes: Vec<usize> = vectors.iter().map(|c| c.chunk_index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
        assert!(vectors.iter().all(|c| !c.embedding.is_empty()));
    }

    #[tokio::test]
    async fn test_delete_by_document() {
        let store = InMemoryVectorStore::new();
        let keep = DocumentId::new();
        let drop = DocumentId::new();
        store
            .insert(vec![chunk(keep, 0, vec![1.0]), chunk(drop, 0, vec![1.0])])
            .await
            .unwrap();

        let deleted = store
            .delete_by_document(drop, &Namespace::new("docs"))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.chunk_count(), 1);
    }
}
