//! Built-in middleware stages.
//!
//! The stages every deployment wants: text normalization and stats on the
//! way in, an LLM summary artifact after storage, namespace defaulting and
//! score filtering around queries, and an audit trail on deletes. External
//! extensions implement the same traits and register through the same
//! registry.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use corpus_core::{
    ChunkRecord, DocumentRecord, LlmProvider, Namespace, QueryRequest, RankedResult,
    RequestContext, Result,
};
use corpus_infra::DependencyGuard;

use super::{
    ChunkObserver, DeleteObserver, Enricher, IngestDraft, PostIngestProcessor, QueryProcessor,
    ResultProcessor,
};

/// Collapses runs of whitespace and trims the draft text.
pub struct WhitespaceNormalizer;

#[async_trait]
impl Enricher for WhitespaceNormalizer {
    async fn enrich(&self, draft: &mut IngestDraft, _ctx: &RequestContext) -> Result<()> {
        let mut prev_whitespace = false;
        let normalized: String = draft
            .text
            .chars()
            .filter_map(|c| {
                if c.is_whitespace() {
                    if prev_whitespace {
                        None
                    } else {
                        prev_whitespace = true;
                        Some(' ')
                    }
                } else {
                    prev_whitespace = false;
                    Some(c)
                }
            })
            .collect();
        draft.text = normalized.trim().to_string();
        Ok(())
    }
}

/// Adds word/sentence/char counts to the draft metadata.
pub struct StatsEnricher;

#[async_trait]
impl Enricher for StatsEnricher {
    async fn enrich(&self, draft: &mut IngestDraft, _ctx: &RequestContext) -> Result<()> {
        let word_count = draft.text.split_whitespace().count();
        let sentence_count = draft
            .text
            .chars()
            .filter(|&c| c == '.' || c == '!' || c == '?')
            .count()
            .max(1);

        draft.metadata.insert(
            "stats".to_string(),
            serde_json::json!({
                "word_count": word_count,
                "sentence_count": sentence_count,
                "char_count": draft.text.len(),
            }),
        );

        debug!(word_count, "Draft stats computed");
        Ok(())
    }
}

/// Generates a short summary of the document through the LLM and returns it
/// as a post-ingest artifact. Failures downgrade to a skip outcome by the
/// chain's contract, so a flaky model never fails an ingest.
pub struct SummaryProcessor {
    llm: Arc<dyn LlmProvider>,
    guard: DependencyGuard,
    max_input_chars: usize,
}

impl SummaryProcessor {
    pub fn new(llm: Arc<dyn LlmProvider>, guard: DependencyGuard) -> Self {
        Self {
            llm,
            guard,
            max_input_chars: 4000,
        }
    }

    pub fn with_max_input_chars(mut self, max: usize) -> Self {
        self.max_input_chars = max;
        self
    }
}

#[async_trait]
impl PostIngestProcessor for SummaryProcessor {
    async fn process(
        &self,
        document: &DocumentRecord,
        chunks: &[ChunkRecord],
        _ctx: &RequestContext,
    ) -> Result<Option<serde_json::Value>> {
        let mut input = String::new();
        for chunk in chunks {
            if input.len() >= self.max_input_chars {
                break;
            }
            input.push_str(&chunk.text);
            input.push('\n');
        }
        input.truncate(self.max_input_chars);

        let prompt = format!(
            "Summarize the following document '{}' in two sentences:\n\n{}",
            document.filename, input
        );

        let llm = self.llm.clone();
        let summary = self
            .guard
            .execute("complete", move || {
                let llm = llm.clone();
                let prompt = prompt.clone();
                async move { llm.complete(&prompt).await }
            })
            .await?;

        Ok(Some(serde_json::json!({ "summary": summary })))
    }
}

/// Logs how many chunks a document produced.
pub struct ChunkCountObserver;

#[async_trait]
impl ChunkObserver for ChunkCountObserver {
    async fn observe(&self, chunks: &[ChunkRecord], ctx: &RequestContext) -> Result<()> {
        info!(
            request_id = %ctx.request_id,
            chunk_count = chunks.len(),
            "Chunks committed"
        );
        Ok(())
    }
}

/// Fills in a default namespace when the query does not carry one.
pub struct NamespaceDefaulter {
    default: Namespace,
}

impl NamespaceDefaulter {
    pub fn new(default: Namespace) -> Self {
        Self { default }
    }
}

#[async_trait]
impl QueryProcessor for NamespaceDefaulter {
    async fn process_query(&self, query: &mut QueryRequest, _ctx: &RequestContext) -> Result<()> {
        if query.namespace.is_none() {
            query.namespace = Some(self.default.clone());
        }
        Ok(())
    }
}

/// Drops results scoring below a threshold.
pub struct ScoreThresholdFilter {
    min_score: f32,
}

impl ScoreThresholdFilter {
    pub fn new(min_score: f32) -> Self {
        Self { min_score }
    }
}

#[async_trait]
impl ResultProcessor for ScoreThresholdFilter {
    async fn process_results(
        &self,
        results: &mut Vec<RankedResult>,
        _ctx: &RequestContext,
    ) -> Result<()> {
        results.retain(|r| r.score >= self.min_score);
        Ok(())
    }
}

/// Writes an audit line before and after each deletion.
pub struct AuditDeleteObserver;

#[async_trait]
impl DeleteObserver for AuditDeleteObserver {
    async fn pre_delete(&self, document: &DocumentRecord, ctx: &RequestContext) -> Result<()> {
        info!(
            request_id = %ctx.request_id,
            doc_id = %document.doc_id,
            namespace = %document.namespace,
            filename = %document.filename,
            "Delete requested"
        );
        Ok(())
    }

    async fn post_delete(&self, document: &DocumentRecord, ctx: &RequestContext) -> Result<()> {
        info!(
            request_id = %ctx.request_id,
            doc_id = %document.doc_id,
            "Delete completed"
        );
        Ok(())
    }
}
