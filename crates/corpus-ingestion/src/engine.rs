//! Ingestion engine.
//!
//! The facade the API/CLI layer calls: ingest, query, delete, restore,
//! permanent delete. Providers come in through an explicit set constructed
//! once — no ambient lookups — and every outbound call goes through the
//! per-dependency resilience guards.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use corpus_core::{
    ChunkRecord, Chunker, CorpusConfig, CorpusError, DocumentId, DocumentIndexProvider,
    DocumentRecord, EmbeddingProvider, IngestDecision, IngestReceipt, LlmProvider, Namespace,
    QueryRequest, RankedResult, RequestContext, Result, TrashEntry, VectorStoreProvider,
};
use corpus_infra::DependencyGuard;
use corpus_lifecycle::{PurgeSweeper, TrashManager};

use crate::dedup::DedupGuard;
use crate::middleware::{
    ChunkObserver, DeleteObserver, Enricher, IngestDraft, MiddlewareChain, PostIngestOutcome,
    PostIngestProcessor, QueryProcessor, ResultProcessor,
};
use crate::recovery::{DisplacedDocument, RecoveryProtocol};
use crate::request::{decode_text, IngestRequest};

/// Provider handles, constructed once and passed in — never looked up from
/// ambient state.
#[derive(Clone)]
pub struct ProviderSet {
    pub embedding: Arc<dyn EmbeddingProvider>,
    pub vector_store: Arc<dyn VectorStoreProvider>,
    pub document_index: Arc<dyn DocumentIndexProvider>,
    pub chunker: Arc<dyn Chunker>,
    pub llm: Arc<dyn LlmProvider>,
}

/// The six middleware chains, one per stage type.
#[derive(Default)]
pub struct ChainSet {
    pub enrichers: MiddlewareChain<dyn Enricher>,
    pub chunk_observers: MiddlewareChain<dyn ChunkObserver>,
    pub post_ingest: MiddlewareChain<dyn PostIngestProcessor>,
    pub query: MiddlewareChain<dyn QueryProcessor>,
    pub results: MiddlewareChain<dyn ResultProcessor>,
    pub delete: MiddlewareChain<dyn DeleteObserver>,
}

#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    pub documents_ingested: u64,
    pub documents_skipped: u64,
    pub documents_failed: u64,
    pub documents_recovered: u64,
    pub chunks_created: u64,
    pub queries_served: u64,
}

/// Result of one successful ingest, including post-ingest stage outcomes.
#[derive(Debug, Clone)]
pub struct IngestOutput {
    pub receipt: IngestReceipt,
    pub post_ingest: Vec<PostIngestOutcome>,
}

pub struct IngestionEngine {
    config: CorpusConfig,
    providers: ProviderSet,
    chains: ChainSet,
    embedding_guard: DependencyGuard,
    vector_guard: DependencyGuard,
    trash: TrashManager,
    dedup: DedupGuard,
    recovery: RecoveryProtocol,
    stats: Arc<RwLock<EngineStats>>,
}

impl IngestionEngine {
    pub fn new(config: CorpusConfig, providers: ProviderSet, chains: ChainSet) -> Self {
        let embedding_guard = DependencyGuard::new("embedding", &config.resilience.embedding);
        let vector_guard = DependencyGuard::new("vector_store", &config.resilience.vector_store);
        let trash = TrashManager::new(
            providers.document_index.clone(),
            providers.vector_store.clone(),
            vector_guard.clone(),
            config.lifecycle.retention(),
        );
        let dedup = DedupGuard::new(providers.document_index.clone());
        let recovery = RecoveryProtocol::new(trash.clone());

        Self {
            config,
            providers,
            chains,
            embedding_guard,
            vector_guard,
            trash,
            dedup,
            recovery,
            stats: Arc::new(RwLock::new(EngineStats::default())),
        }
    }

    pub fn trash(&self) -> &TrashManager {
        &self.trash
    }

    /// A sweeper wired to this engine's trash manager and config.
    pub fn sweeper(&self) -> PurgeSweeper {
        PurgeSweeper::new(
            self.trash.clone(),
            self.config.lifecycle.sweep_interval(),
            self.config.lifecycle.sweep_batch_size,
        )
    }

    pub async fn stats(&self) -> EngineStats {
        self.stats.read().await.clone()
    }

    /// Ingest with a fresh request context.
    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestOutput> {
        let ctx = RequestContext::new(request.namespace.clone())
            .with_attribute("source", request.source.to_string());
        self.ingest_with_context(request, ctx).await
    }

    /// Ingest under a caller-supplied context (cancellation, principal).
    pub async fn ingest_with_context(
        &self,
        request: IngestRequest,
        ctx: RequestContext,
    ) -> Result<IngestOutput> {
        self.validate(&request)?;
        let content_hash = DedupGuard::fingerprint(&request.content);
        let namespace = request.namespace.clone();

        // Decide and reserve before any expensive work. A lost reserve means
        // a racing upload won; re-read and accept its outcome.
        let mut attempts = 0;
        let (record, displaced, decision) = loop {
            attempts += 1;
            let (decision, identifier) = self.dedup.decide(&request, &content_hash).await?;

            match decision {
                IngestDecision::Skip { existing } => {
                    self.stats.write().await.documents_skipped += 1;
                    info!(
                        request_id = %ctx.request_id,
                        doc_id = %existing,
                        decision = %decision,
                        "Duplicate content, skipping"
                    );
                    return Ok(IngestOutput {
                        receipt: IngestReceipt {
                            doc_id: existing,
                            chunks_created: 0,
                            decision,
                        },
                        post_ingest: Vec::new(),
                    });
                }
                IngestDecision::IngestNew => {
                    let record = self.new_record(&request, &content_hash);
                    match self
                        .providers
                        .document_index
                        .create_document(record.clone(), &identifier)
                        .await
                    {
                        Ok(()) => break (record, None, decision),
                        Err(CorpusError::Conflict(_)) if attempts < 3 => continue,
                        Err(e) => return Err(e),
                    }
                }
                IngestDecision::ReingestVersion { displaced } => {
                    // Old version goes to the trash synchronously, before
                    // the new ingestion starts.
                    let displaced_doc = self.recovery.displace(displaced, &namespace).await?;
                    let record = self.new_record(&request, &content_hash);
                    match self
                        .providers
                        .document_index
                        .create_document(record.clone(), &identifier)
                        .await
                    {
                        Ok(()) => break (record, Some(displaced_doc), decision),
                        Err(e) => {
                            // Reserve lost after displacement; put the old
                            // version back before surfacing anything.
                            let surfaced =
                                self.recovery.recover(&displaced_doc, &namespace, e).await;
                            return Err(surfaced);
                        }
                    }
                }
            }
        };

        // Everything from here runs under the recovery umbrella: any
        // failure, cancellation included, aborts the new document and (for a
        // reingest) restores the displaced one.
        let pipeline = self.run_pipeline(&request, &record, &ctx);
        let result = tokio::select! {
            r = pipeline => r,
            _ = ctx.cancellation().cancelled() => Err(CorpusError::Cancelled),
        };

        match result {
            Ok((chunks_created, post_ingest)) => {
                let mut stats = self.stats.write().await;
                stats.documents_ingested += 1;
                stats.chunks_created += chunks_created as u64;
                drop(stats);

                info!(
                    request_id = %ctx.request_id,
                    doc_id = %record.doc_id,
                    namespace = %namespace,
                    decision = %decision,
                    chunks_created = chunks_created,
                    elapsed_ms = ctx.elapsed_ms(),
                    "Document ingested"
                );
                Ok(IngestOutput {
                    receipt: IngestReceipt {
                        doc_id: record.doc_id,
                        chunks_created,
                        decision,
                    },
                    post_ingest,
                })
            }
            Err(e) => {
                self.abort_new_document(record.doc_id, &namespace).await;
                let mut stats = self.stats.write().await;
                stats.documents_failed += 1;
                drop(stats);

                match displaced {
                    Some(d) => {
                        let surfaced = self.recovery.recover(&d, &namespace, e).await;
                        if !matches!(surfaced, CorpusError::RecoveryFailed { .. }) {
                            self.stats.write().await.documents_recovered += 1;
                        }
                        Err(surfaced)
                    }
                    None => Err(e),
                }
            }
        }
    }

    /// Query through the query/result processor chains.
    pub async fn query(&self, request: QueryRequest) -> Result<Vec<RankedResult>> {
        let ctx = RequestContext::new(request.namespace.clone().unwrap_or_default());
        self.query_with_context(request, ctx).await
    }

    pub async fn query_with_context(
        &self,
        mut request: QueryRequest,
        ctx: RequestContext,
    ) -> Result<Vec<RankedResult>> {
        if request.text.trim().is_empty() {
            return Err(CorpusError::Validation("query text is empty".into()));
        }

        self.chains.query.run(&mut request, &ctx).await?;

        let embedding = {
            let provider = self.providers.embedding.clone();
            let text = request.text.clone();
            self.embedding_guard
                .execute("embed", move || {
                    let provider = provider.clone();
                    let text = text.clone();
                    async move { provider.embed(&text).await }
                })
                .await?
        };

        let hits = {
            let store = self.providers.vector_store.clone();
            let namespace = request.namespace.clone();
            let filters = request.filters.clone();
            let top_k = request.top_k;
            let embedding = embedding.clone();
            self.vector_guard
                .execute("search", move || {
                    let store = store.clone();
                    let namespace = namespace.clone();
                    let filters = filters.clone();
                    let embedding = embedding.clone();
                    async move {
                        store
                            .search(&embedding, namespace.as_ref(), top_k, &filters)
                            .await
                    }
                })
                .await?
        };

        let mut results: Vec<RankedResult> = hits.into_iter().map(Into::into).collect();
        self.chains.results.run(&mut results, &ctx).await?;

        self.stats.write().await.queries_served += 1;
        Ok(results)
    }

    /// Soft-delete, gated by the pre-delete hooks.
    pub async fn delete(&self, doc_id: DocumentId, namespace: &Namespace) -> Result<TrashEntry> {
        let ctx = RequestContext::new(namespace.clone());
        let document = self
            .providers
            .document_index
            .get_document(doc_id, namespace)
            .await?
            .ok_or_else(|| CorpusError::NotFound(format!("document {}", doc_id)))?;

        // A pre-delete failure blocks the deletion outright.
        self.chains.delete.run_pre_delete(&document, &ctx).await?;

        let entry = self.trash.soft_delete(doc_id, namespace).await?;

        // Post-delete failures are logged inside the driver, never surfaced.
        self.chains.delete.run_post_delete(&document, &ctx).await;
        Ok(entry)
    }

    pub async fn restore(
        &self,
        doc_id: DocumentId,
        namespace: &Namespace,
        deleted_at_ms: i64,
    ) -> Result<DocumentRecord> {
        self.trash.restore(doc_id, namespace, deleted_at_ms).await
    }

    pub async fn permanently_delete(
        &self,
        doc_id: DocumentId,
        namespace: &Namespace,
        deleted_at_ms: i64,
    ) -> Result<()> {
        self.trash
            .permanently_delete(doc_id, namespace, deleted_at_ms)
            .await
    }

    pub async fn list_trash(&self, namespace: Option<&Namespace>) -> Result<Vec<TrashEntry>> {
        self.trash.list_trash(namespace).await
    }

    fn validate(&self, request: &IngestRequest) -> Result<()> {
        if request.content.is_empty() {
            return Err(CorpusError::Validation("content is empty".into()));
        }
        if request.content.len() > self.config.ingestion.max_document_size {
            return Err(CorpusError::Validation(format!(
                "document of {} bytes exceeds limit of {}",
                request.content.len(),
                self.config.ingestion.max_document_size
            )));
        }
        if request.filename.trim().is_empty() {
            return Err(CorpusError::Validation("filename is empty".into()));
        }
        Ok(())
    }

    fn new_record(&self, request: &IngestRequest, content_hash: &str) -> DocumentRecord {
        let mut record = DocumentRecord::new(
            request.namespace.clone(),
            &request.filename,
            content_hash,
        )
        .with_metadata(request.metadata.clone());
        if let Some(ref path) = request.source_path {
            record = record.with_source_path(path.clone());
        }
        record
    }

    /// Enrich, chunk, embed, store, observe, post-process.
    async fn run_pipeline(
        &self,
        request: &IngestRequest,
        record: &DocumentRecord,
        ctx: &RequestContext,
    ) -> Result<(usize, Vec<PostIngestOutcome>)> {
        let text = decode_text(&request.content);
        if text.trim().is_empty() {
            return Err(CorpusError::Validation(
                "no textual content after decoding".into(),
            ));
        }

        let mut draft = IngestDraft::new(text);
        draft.metadata = request.metadata.clone();
        if let Some(strategy) = request.strategy {
            draft.strategy = strategy;
        }

        self.chains.enrichers.run(&mut draft, ctx).await?;

        let pieces = self
            .providers
            .chunker
            .chunk(&draft.text, draft.strategy)
            .await?;

        let batch_limit = self.providers.vector_store.max_batch_size().max(1);
        let mut chunks: Vec<ChunkRecord> = Vec::with_capacity(pieces.len());

        for batch in pieces.chunks(batch_limit) {
            let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();

            let embeddings = {
                let provider = self.providers.embedding.clone();
                let texts = texts.clone();
                self.embedding_guard
                    .execute("embed_batch", move || {
                        let provider = provider.clone();
                        let texts = texts.clone();
                        async move { provider.embed_batch(&texts).await }
                    })
                    .await?
            };
            if embeddings.len() != batch.len() {
                return Err(CorpusError::provider(
                    "embedding",
                    format!(
                        "expected {} embeddings, got {}",
                        batch.len(),
                        embeddings.len()
                    ),
                ));
            }

            let mut batch_records = Vec::with_capacity(batch.len());
            for (piece, embedding) in batch.iter().zip(embeddings) {
                let mut chunk = ChunkRecord::new(
                    record.doc_id,
                    record.namespace.clone(),
                    piece.metadata.index,
                    piece.text.clone(),
                    embedding,
                )
                .with_kind(piece.metadata.kind.clone());
                if let Some(ref section) = piece.metadata.section {
                    chunk = chunk.with_metadata("section", serde_json::json!(section));
                }
                chunk = chunk.with_metadata("filename", serde_json::json!(record.filename));
                batch_records.push(chunk);
            }

            {
                let store = self.providers.vector_store.clone();
                let batch_records = batch_records.clone();
                self.vector_guard
                    .execute("insert", move || {
                        let store = store.clone();
                        let batch_records = batch_records.clone();
                        async move { store.insert(batch_records).await }
                    })
                    .await?;
            }

            chunks.extend(batch_records);
        }

        self.providers
            .document_index
            .update_chunk_count(record.doc_id, &record.namespace, chunks.len())
            .await?;

        // Chunks are committed; observers are advisory from here on.
        self.chains.chunk_observers.notify(&chunks, ctx).await?;

        let post_ingest = self.chains.post_ingest.run(record, &chunks, ctx).await?;

        // Fold enricher metadata and post-ingest artifacts into the record.
        let mut metadata: HashMap<String, serde_json::Value> = draft.metadata;
        for outcome in &post_ingest {
            if let Some(ref artifact) = outcome.artifact {
                metadata.insert(outcome.stage.clone(), artifact.clone());
            }
        }
        if !metadata.is_empty() {
            self.providers
                .document_index
                .update_document_metadata(record.doc_id, &record.namespace, metadata)
                .await?;
        }

        Ok((chunks.len(), post_ingest))
    }

    /// Best-effort teardown of a half-ingested document so its identifier
    /// frees up and nothing of it stays searchable.
    async fn abort_new_document(&self, doc_id: DocumentId, namespace: &Namespace) {
        if let Err(e) = self
            .providers
            .vector_store
            .delete_by_document(doc_id, namespace)
            .await
        {
            warn!(doc_id = %doc_id, error = %e, "Abort: chunk cleanup failed");
        }
        if let Err(e) = self
            .providers
            .document_index
            .permanently_delete_document(doc_id, namespace)
            .await
        {
            warn!(doc_id = %doc_id, error = %e, "Abort: document teardown failed");
        }
    }
}
