//! Middleware stage types and their error contracts.
//!
//! Six stage types cover the document lifecycle: enrichment before
//! chunk/embed/store, chunk observation after storage, post-ingest
//! processing, query and result shaping, and delete hooks. Each type has an
//! exact error contract, enforced by the drivers here rather than left to
//! stage authors:
//!
//! | type | on failure |
//! |---|---|
//! | Enricher, QueryProcessor, ResultProcessor | abort the request |
//! | ChunkObserver | log and continue (storage is already committed) |
//! | PostIngestProcessor | convert to a skip outcome, continue |
//! | DeleteObserver | pre-hook blocks deletion; post-hook logs only |

pub mod chain;
pub mod stages;

pub use chain::{ChainBuilder, MiddlewareChain, RegisteredStage};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use corpus_core::{
    ChunkRecord, ChunkStrategy, CorpusError, DocumentRecord, QueryRequest, RankedResult,
    RequestContext, Result,
};

/// Reaction to a stage failure or timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    /// Log and continue; nothing is recorded.
    Allow,
    /// Record a skip outcome and continue.
    Skip,
    /// Abort the chain and surface the failure.
    Reject,
}

/// Registration metadata for one stage.
///
/// Priority orders unconstrained stages (lower runs earlier); `depends_on`
/// and `runs_before` add hard ordering edges. `on_error` overrides the stage
/// type's default failure reaction.
#[derive(Debug, Clone)]
pub struct StageRegistration {
    pub name: String,
    pub priority: i32,
    pub depends_on: Vec<String>,
    pub runs_before: Vec<String>,
    pub timeout: Option<Duration>,
    pub on_error: Option<OnError>,
}

impl StageRegistration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: 100,
            depends_on: Vec::new(),
            runs_before: Vec::new(),
            timeout: None,
            on_error: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_depends_on<I, T>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.depends_on = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_runs_before<I, T>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.runs_before = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_on_error(mut self, on_error: OnError) -> Self {
        self.on_error = Some(on_error);
        self
    }
}

/// Working state an enricher chain transforms before chunking.
#[derive(Debug, Clone)]
pub struct IngestDraft {
    pub text: String,
    pub metadata: HashMap<String, serde_json::Value>,
    pub strategy: ChunkStrategy,
}

impl IngestDraft {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: HashMap::new(),
            strategy: ChunkStrategy::default(),
        }
    }

    pub fn with_strategy(mut self, strategy: ChunkStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}

/// Transforms the draft before chunking/embedding. Fail-fast.
#[async_trait]
pub trait Enricher: Send + Sync {
    async fn enrich(&self, draft: &mut IngestDraft, ctx: &RequestContext) -> Result<()>;
}

/// Notified after chunks are stored. Advisory: stored chunks are never
/// rolled back on observer failure.
#[async_trait]
pub trait ChunkObserver: Send + Sync {
    async fn observe(&self, chunks: &[ChunkRecord], ctx: &RequestContext) -> Result<()>;
}

/// Produces derived artifacts once a document is stored. Failures become
/// skip outcomes.
#[async_trait]
pub trait PostIngestProcessor: Send + Sync {
    async fn process(
        &self,
        document: &DocumentRecord,
        chunks: &[ChunkRecord],
        ctx: &RequestContext,
    ) -> Result<Option<serde_json::Value>>;
}

/// Rewrites a query before the vector search. Fail-fast.
#[async_trait]
pub trait QueryProcessor: Send + Sync {
    async fn process_query(&self, query: &mut QueryRequest, ctx: &RequestContext) -> Result<()>;
}

/// Reshapes ranked results before they reach the caller. Fail-fast.
#[async_trait]
pub trait ResultProcessor: Send + Sync {
    async fn process_results(
        &self,
        results: &mut Vec<RankedResult>,
        ctx: &RequestContext,
    ) -> Result<()>;
}

/// Two-phase delete hook: a pre-delete failure blocks the deletion, a
/// post-delete failure is logged only.
#[async_trait]
pub trait DeleteObserver: Send + Sync {
    async fn pre_delete(&self, document: &DocumentRecord, ctx: &RequestContext) -> Result<()>;

    async fn post_delete(&self, document: &DocumentRecord, ctx: &RequestContext) -> Result<()>;
}

/// Outcome of one post-ingest stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostIngestOutcome {
    pub stage: String,
    pub status: PostIngestStatus,
    pub artifact: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum PostIngestStatus {
    Completed,
    Skipped { reason: String },
}

/// Run one stage body under its registration's timeout.
async fn execute_stage<F>(registration: &StageRegistration, fut: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    match registration.timeout {
        Some(timeout) => match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CorpusError::Middleware {
                stage: registration.name.clone(),
                message: format!("timed out after {:?}", timeout),
            }),
        },
        None => fut.await,
    }
}

impl MiddlewareChain<dyn Enricher> {
    /// Run enrichers strictly in order; stage N+1 never starts before stage
    /// N completes.
    pub async fn run(&self, draft: &mut IngestDraft, ctx: &RequestContext) -> Result<()> {
        for entry in self.iter() {
            let result = execute_stage(&entry.registration, entry.stage.enrich(draft, ctx)).await;
            if let Err(e) = result {
                match Self::effective_on_error(entry, OnError::Reject) {
                    OnError::Reject => {
                        warn!(
                            request_id = %ctx.request_id,
                            stage = %entry.registration.name,
                            error = %e,
                            "Enricher failed, aborting request"
                        );
                        return Err(e);
                    }
                    OnError::Allow | OnError::Skip => {
                        warn!(
                            request_id = %ctx.request_id,
                            stage = %entry.registration.name,
                            error = %e,
                            "Enricher failed, configured to continue"
                        );
                    }
                }
            }
        }
        Ok(())
    }
}

impl MiddlewareChain<dyn ChunkObserver> {
    /// Notify observers. Storage is already committed, so failures are
    /// logged and the chain continues unless a stage explicitly escalates.
    pub async fn notify(&self, chunks: &[ChunkRecord], ctx: &RequestContext) -> Result<()> {
        for entry in self.iter() {
            let result =
                execute_stage(&entry.registration, entry.stage.observe(chunks, ctx)).await;
            if let Err(e) = result {
                match Self::effective_on_error(entry, OnError::Allow) {
                    OnError::Reject => return Err(e),
                    OnError::Allow | OnError::Skip => {
                        warn!(
                            request_id = %ctx.request_id,
                            stage = %entry.registration.name,
                            error = %e,
                            "Chunk observer failed, continuing (chunks stay committed)"
                        );
                    }
                }
            }
        }
        Ok(())
    }
}

impl MiddlewareChain<dyn PostIngestProcessor> {
    /// Run post-ingest processors; failures become skip outcomes with a
    /// reason.
    pub async fn run(
        &self,
        document: &DocumentRecord,
        chunks: &[ChunkRecord],
        ctx: &RequestContext,
    ) -> Result<Vec<PostIngestOutcome>> {
        let mut outcomes = Vec::with_capacity(self.len());

        for entry in self.iter() {
            let mut artifact_slot = None;
            let result = execute_stage(&entry.registration, async {
                artifact_slot = entry.stage.process(document, chunks, ctx).await?;
                Ok(())
            })
            .await;

            match result {
                Ok(()) => outcomes.push(PostIngestOutcome {
                    stage: entry.registration.name.clone(),
                    status: PostIngestStatus::Completed,
                    artifact: artifact_slot,
                }),
                Err(e) => match Self::effective_on_error(entry, OnError::Skip) {
                    OnError::Reject => return Err(e),
                    OnError::Allow | OnError::Skip => {
                        debug!(
                            request_id = %ctx.request_id,
                            stage = %entry.registration.name,
                            error = %e,
                            "Post-ingest stage skipped"
                        );
                        outcomes.push(PostIngestOutcome {
                            stage: entry.registration.name.clone(),
                            status: PostIngestStatus::Skipped {
                                reason: e.to_string(),
                            },
                            artifact: None,
                        });
                    }
                },
            }
        }

        Ok(outcomes)
    }
}

impl MiddlewareChain<dyn QueryProcessor> {
    pub async fn run(&self, query: &mut QueryRequest, ctx: &RequestContext) -> Result<()> {
        for entry in self.iter() {
            let result =
                execute_stage(&entry.registration, entry.stage.process_query(query, ctx)).await;
            if let Err(e) = result {
                match Self::effective_on_error(entry, OnError::Reject) {
                    OnError::Reject => return Err(e),
                    OnError::Allow | OnError::Skip => {
                        warn!(
                            request_id = %ctx.request_id,
                            stage = %entry.registration.name,
                            error = %e,
                            "Query processor failed, configured to continue"
                        );
                    }
                }
            }
        }
        Ok(())
    }
}

impl MiddlewareChain<dyn ResultProcessor> {
    pub async fn run(&self, results: &mut Vec<RankedResult>, ctx: &RequestContext) -> Result<()> {
        for entry in self.iter() {
            let result = execute_stage(
                &entry.registration,
                entry.stage.process_results(results, ctx),
            )
            .await;
            if let Err(e) = result {
                match Self::effective_on_error(entry, OnError::Reject) {
                    OnError::Reject => return Err(e),
                    OnError::Allow | OnError::Skip => {
                        warn!(
                            request_id = %ctx.request_id,
                            stage = %entry.registration.name,
                            error = %e,
                            "Result processor failed, configured to continue"
                        );
                    }
                }
            }
        }
        Ok(())
    }
}

impl MiddlewareChain<dyn DeleteObserver> {
    /// Pre-delete hooks run before any state changes; a failure blocks the
    /// deletion.
    pub async fn run_pre_delete(
        &self,
        document: &DocumentRecord,
        ctx: &RequestContext,
    ) -> Result<()> {
        for entry in self.iter() {
            let result =
                execute_stage(&entry.registration, entry.stage.pre_delete(document, ctx)).await;
            if let Err(e) = result {
                match Self::effective_on_error(entry, OnError::Reject) {
                    OnError::Reject => {
                        warn!(
                            request_id = %ctx.request_id,
                            stage = %entry.registration.name,
                            error = %e,
                            "Pre-delete hook failed, blocking deletion"
                        );
                        return Err(e);
                    }
                    OnError::Allow | OnError::Skip => {}
                }
            }
        }
        Ok(())
    }

    /// Post-delete hooks run after the state change; failures are logged
    /// only.
    pub async fn run_post_delete(&self, document: &DocumentRecord, ctx: &RequestContext) {
        for entry in self.iter() {
            let result =
                execute_stage(&entry.registration, entry.stage.post_delete(document, ctx)).await;
            if let Err(e) = result {
                warn!(
                    request_id = %ctx.request_id,
                    stage = %entry.registration.name,
                    error = %e,
                    "Post-delete hook failed (deletion already happened)"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corpus_core::Namespace;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct RecordingEnricher {
        name: &'static str,
        log: Arc<order_log::OrderLog>,
        fail: bool,
    }

    // Tiny order log without extra deps.
    mod order_log {
        use std::sync::Mutex;

        #[derive(Default)]
        pub struct OrderLog(Mutex<Vec<&'static str>>);

        impl OrderLog {
            pub fn push(&self, name: &'static str) {
                self.0.lock().unwrap().push(name);
            }

            pub fn snapshot(&self) -> Vec<&'static str> {
                self.0.lock().unwrap().clone()
            }
        }
    }

    #[async_trait]
    impl Enricher for RecordingEnricher {
        async fn enrich(&self, draft: &mut IngestDraft, _ctx: &RequestContext) -> Result<()> {
            self.log.push(self.name);
            if self.fail {
                return Err(CorpusError::Validation(format!("{} failed", self.name)));
            }
            draft.text.push('.');
            Ok(())
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::new(Namespace::new("docs"))
    }

    #[tokio::test]
    async fn test_enrichers_run_in_resolved_order() {
        let log = Arc::new(order_log::OrderLog::default());
        let chain = MiddlewareChain::<dyn Enricher>::builder()
            .register(
                StageRegistration::new("m2").with_priority(20).with_depends_on(["m1"]),
                Arc::new(RecordingEnricher {
                    name: "m2",
                    log: log.clone(),
                    fail: false,
                }),
            )
            .unwrap()
            .register(
                StageRegistration::new("m1").with_priority(10),
                Arc::new(RecordingEnricher {
                    name: "m1",
                    log: log.clone(),
                    fail: false,
                }),
            )
            .unwrap()
            .build()
            .unwrap();

        let mut draft = IngestDraft::new("text");
        chain.run(&mut draft, &ctx()).await.unwrap();
        assert_eq!(log.snapshot(), vec!["m1", "m2"]);
    }

    #[tokio::test]
    async fn test_enricher_failure_aborts_chain() {
        let log = Arc::new(order_log::OrderLog::default());
        let chain = MiddlewareChain::<dyn Enricher>::builder()
            .register(
                StageRegistration::new("bad").with_priority(1),
                Arc::new(RecordingEnricher {
                    name: "bad",
                    log: log.clone(),
                    fail: true,
                }),
            )
            .unwrap()
            .register(
                StageRegistration::new("never").with_priority(2),
                Arc::new(RecordingEnricher {
                    name: "never",
                    log: log.clone(),
                    fail: false,
                }),
            )
            .unwrap()
            .build()
            .unwrap();

        let mut draft = IngestDraft::new("text");
        assert!(chain.run(&mut draft, &ctx()).await.is_err());
        assert_eq!(log.snapshot(), vec!["bad"]);
    }

    struct FailingObserver(Arc<AtomicUsize>);

    #[async_trait]
    impl ChunkObserver for FailingObserver {
        async fn observe(&self, _chunks: &[ChunkRecord], _ctx: &RequestContext) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(CorpusError::Validation("observer broke".into()))
        }
    }

    #[tokio::test]
    async fn test_chunk_observer_failure_is_advisory() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = MiddlewareChain::<dyn ChunkObserver>::builder()
            .register(
                StageRegistration::new("o1"),
                Arc::new(FailingObserver(calls.clone())),
            )
            .unwrap()
            .register(
                StageRegistration::new("o2"),
                Arc::new(FailingObserver(calls.clone())),
            )
            .unwrap()
            .build()
            .unwrap();

        // Both observers fail; the chain still completes.
        chain.notify(&[], &ctx()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    struct FlakyPostIngest {
        fail: bool,
    }

    #[async_trait]
    impl PostIngestProcessor for FlakyPostIngest {
        async fn process(
            &self,
            _document: &DocumentRecord,
            _chunks: &[ChunkRecord],
            _ctx: &RequestContext,
        ) -> Result<Option<serde_json::Value>> {
            if self.fail {
                Err(CorpusError::provider("llm", "unavailable"))
            } else {
                Ok(Some(serde_json::json!({"ok": true})))
            }
        }
    }

    #[tokio::test]
    async fn test_post_ingest_failure_becomes_skip() {
        let chain = MiddlewareChain::<dyn PostIngestProcessor>::builder()
            .register(
                StageRegistration::new("good").with_priority(1),
                Arc::new(FlakyPostIngest { fail: false }),
            )
            .unwrap()
            .register(
                StageRegistration::new("bad").with_priority(2),
                Arc::new(FlakyPostIngest { fail: true }),
            )
            .unwrap()
            .build()
            .unwrap();

        let document = DocumentRecord::new(Namespace::new("docs"), "a.txt", "h1");
        let outcomes = chain.run(&document, &[], &ctx()).await.unwrap();

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].status, PostIngestStatus::Completed);
        assert!(matches!(
            outcomes[1].status,
            PostIngestStatus::Skipped { .. }
        ));
    }

    struct SlowEnricher;

    #[async_trait]
    impl Enricher for SlowEnricher {
        async fn enrich(&self, _draft: &mut IngestDraft, _ctx: &RequestContext) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_stage_timeout_follows_policy() {
        let chain = MiddlewareChain::<dyn Enricher>::builder()
            .register(
                StageRegistration::new("slow").with_timeout(Duration::from_millis(10)),
                Arc::new(SlowEnricher),
            )
            .unwrap()
            .build()
            .unwrap();

        let mut draft = IngestDraft::new("text");
        let err = chain.run(&mut draft, &ctx()).await.unwrap_err();
        assert!(matches!(err, CorpusError::Middleware { .. }));
    }

    #[tokio::test]
    async fn test_stage_timeout_with_allow_override_continues() {
        let chain = MiddlewareChain::<dyn Enricher>::builder()
            .register(
                StageRegistration::new("slow")
                    .with_timeout(Duration::from_millis(10))
                    .with_on_error(OnError::Allow),
                Arc::new(SlowEnricher),
            )
            .unwrap()
            .build()
            .unwrap();

        let mut draft = IngestDraft::new("text");
        chain.run(&mut draft, &ctx()).await.unwrap();
    }
}
