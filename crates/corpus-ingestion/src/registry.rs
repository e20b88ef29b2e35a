//! Stage registry.
//!
//! An explicit name→factory map, populated at startup and consulted while
//! building the middleware chains from configuration. External extensions
//! implement a stage trait and register a factory the same way the
//! built-ins do; nothing is discovered at runtime.

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use corpus_core::{CorpusError, LlmProvider, Namespace, Result};
use corpus_infra::DependencyGuard;

use crate::engine::ChainSet;
use crate::middleware::stages::{
    AuditDeleteObserver, ChunkCountObserver, NamespaceDefaulter, ScoreThresholdFilter,
    StatsEnricher, SummaryProcessor, WhitespaceNormalizer,
};
use crate::middleware::{
    ChunkObserver, DeleteObserver, Enricher, MiddlewareChain, OnError, PostIngestProcessor,
    QueryProcessor, ResultProcessor, StageRegistration,
};

/// One stage in the middleware configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StageSpec {
    /// Unique stage identity within its chain.
    pub name: String,
    /// Factory name in the registry.
    pub stage: String,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub runs_before: Vec<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub on_error: Option<OnError>,
    /// Factory-specific settings, passed through verbatim.
    #[serde(default)]
    pub settings: serde_json::Value,
}

fn default_priority() -> i32 {
    100
}

impl StageSpec {
    pub fn new(name: impl Into<String>, stage: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stage: stage.into(),
            priority: default_priority(),
            depends_on: Vec::new(),
            runs_before: Vec::new(),
            timeout_ms: None,
            on_error: None,
            settings: serde_json::Value::Null,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_settings(mut self, settings: serde_json::Value) -> Self {
        self.settings = settings;
        self
    }

    fn registration(&self) -> StageRegistration {
        let mut registration = StageRegistration::new(&self.name)
            .with_priority(self.priority)
            .with_depends_on(self.depends_on.clone())
            .with_runs_before(self.runs_before.clone());
        if let Some(ms) = self.timeout_ms {
            registration = registration.with_timeout(Duration::from_millis(ms));
        }
        if let Some(on_error) = self.on_error {
            registration = registration.with_on_error(on_error);
        }
        registration
    }
}

/// Stage lists per chain, as loaded from configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MiddlewareConfig {
    #[serde(default)]
    pub enrichers: Vec<StageSpec>,
    #[serde(default)]
    pub chunk_observers: Vec<StageSpec>,
    #[serde(default)]
    pub post_ingest: Vec<StageSpec>,
    #[serde(default)]
    pub query: Vec<StageSpec>,
    #[serde(default)]
    pub results: Vec<StageSpec>,
    #[serde(default)]
    pub delete: Vec<StageSpec>,
}

type Factory<S> = Box<dyn Fn(&serde_json::Value) -> Result<Arc<S>> + Send + Sync>;

#[derive(Default)]
pub struct StageRegistry {
    enrichers: HashMap<String, Factory<dyn Enricher>>,
    chunk_observers: HashMap<String, Factory<dyn ChunkObserver>>,
    post_ingest: HashMap<String, Factory<dyn PostIngestProcessor>>,
    query: HashMap<String, Factory<dyn QueryProcessor>>,
    results: HashMap<String, Factory<dyn ResultProcessor>>,
    delete: HashMap<String, Factory<dyn DeleteObserver>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-loaded with the built-in stages.
    pub fn with_builtins(llm: Arc<dyn LlmProvider>, llm_guard: DependencyGuard) -> Self {
        let mut registry = Self::new();

        registry.register_enricher("whitespace_normalizer", |_| {
            Ok(Arc::new(WhitespaceNormalizer))
        });
        registry.register_enricher("stats", |_| Ok(Arc::new(StatsEnricher)));

        registry.register_post_ingest("summary", move |settings| {
            let mut processor = SummaryProcessor::new(llm.clone(), llm_guard.clone());
            if let Some(max) = settings.get("max_input_chars").and_then(|v| v.as_u64()) {
                processor = processor.with_max_input_chars(max as usize);
            }
            Ok(Arc::new(processor))
        });

        registry.register_chunk_observer("chunk_count", |_| Ok(Arc::new(ChunkCountObserver)));

        registry.register_query("namespace_defaulter", |settings| {
            let namespace = settings
                .get("namespace")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    CorpusError::Configuration(
                        "namespace_defaulter requires a 'namespace' setting".into(),
                    )
                })?;
            Ok(Arc::new(NamespaceDefaulter::new(Namespace::new(namespace))))
        });

        registry.register_result("score_threshold", |settings| {
            let min_score = settings
                .get("min_score")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0) as f32;
            Ok(Arc::new(ScoreThresholdFilter::new(min_score)))
        });

        registry.register_delete("audit", |_| Ok(Arc::new(AuditDeleteObserver)));

        registry
    }

    pub fn register_enricher<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&serde_json::Value) -> Result<Arc<dyn Enricher>> + Send + Sync + 'static,
    {
        self.enrichers.insert(name.to_string(), Box::new(factory));
    }

    pub fn register_chunk_observer<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&serde_json::Value) -> Result<Arc<dyn ChunkObserver>> + Send + Sync + 'static,
    {
        self.chunk_observers
            .insert(name.to_string(), Box::new(factory));
    }

    pub fn register_post_ingest<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&serde_json::Value) -> Result<Arc<dyn PostIngestProcessor>> + Send + Sync + 'static,
    {
        self.post_ingest.insert(name.to_string(), Box::new(factory));
    }

    pub fn register_query<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&serde_json::Value) -> Result<Arc<dyn QueryProcessor>> + Send + Sync + 'static,
    {
        self.query.insert(name.to_string(), Box::new(factory));
    }

    pub fn register_result<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&serde_json::Value) -> Result<Arc<dyn ResultProcessor>> + Send + Sync + 'static,
    {
        self.results.insert(name.to_string(), Box::new(factory));
    }

    pub fn register_delete<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&serde_json::Value) -> Result<Arc<dyn DeleteObserver>> + Send + Sync + 'static,
    {
        self.delete.insert(name.to_string(), Box::new(factory));
    }

    /// Build all six chains from configuration. Any unknown factory,
    /// duplicate identity, unknown reference, or cycle fails here, at
    /// startup.
    pub fn build_chains(
        &self,
        config: &MiddlewareConfig,
        default_timeout: Duration,
    ) -> Result<ChainSet> {
        Ok(ChainSet {
            enrichers: build_chain(&config.enrichers, &self.enrichers, default_timeout)?,
            chunk_observers: build_chain(
                &config.chunk_observers,
                &self.chunk_observers,
                default_timeout,
            )?,
            post_ingest: build_chain(&config.post_ingest, &self.post_ingest, default_timeout)?,
            query: build_chain(&config.query, &self.query, default_timeout)?,
            results: build_chain(&config.results, &self.results, default_timeout)?,
            delete: build_chain(&config.delete, &self.delete, default_timeout)?,
        })
    }
}

fn build_chain<S: ?Sized>(
    specs: &[StageSpec],
    factories: &HashMap<String, Factory<S>>,
    default_timeout: Duration,
) -> Result<MiddlewareChain<S>> {
    let mut builder = MiddlewareChain::<S>::builder().with_default_timeout(default_timeout);
    for spec in specs {
        let factory = factories.get(&spec.stage).ok_or_else(|| {
            CorpusError::Configuration(format!(
                "no stage factory named '{}' (wanted by '{}')",
                spec.stage, spec.name
            ))
        })?;
        let stage = factory(&spec.settings)?;
        builder = builder.register(spec.registration(), stage)?;
    }
    builder.build()
}
