use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the ingestion core.
#[derive(Debug, Clone, Deserialize)]
pub struct CorpusConfig {
    pub ingestion: IngestionSettings,
    pub lifecycle: LifecycleSettings,
    pub resilience: ResilienceSettings,
}

impl CorpusConfig {
    /// Load configuration from environment variables with the `CORPUS`
    /// prefix (`CORPUS__LIFECYCLE__RETENTION_DAYS=14` and so on).
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_env("CORPUS")
    }

    pub fn load_from_env(prefix: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(
                Environment::with_prefix(prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .set_default("ingestion.max_document_size", 50 * 1024 * 1024_i64)?
            .set_default("ingestion.chunk_size", 512)?
            .set_default("ingestion.chunk_overlap", 50)?
            .set_default("ingestion.min_chunk_size", 10)?
            .set_default("ingestion.max_chunk_size", 1000)?
            .set_default("ingestion.stage_timeout_ms", 30_000)?
            .set_default("lifecycle.retention_days", 30)?
            .set_default("lifecycle.sweep_interval_secs", 3600)?
            .set_default("lifecycle.sweep_batch_size", 100)?
            .set_default("resilience.embedding.failure_threshold", 5)?
            .set_default("resilience.embedding.open_timeout_secs", 30)?
            .set_default("resilience.embedding.half_open_max_calls", 3)?
            .set_default("resilience.embedding.max_retries", 3)?
            .set_default("resilience.embedding.base_delay_ms", 100)?
            .set_default("resilience.embedding.max_delay_ms", 10_000)?
            .set_default("resilience.embedding.call_timeout_secs", 30)?
            .set_default("resilience.llm.failure_threshold", 5)?
            .set_default("resilience.llm.open_timeout_secs", 60)?
            .set_default("resilience.llm.half_open_max_calls", 2)?
            .set_default("resilience.llm.max_retries", 2)?
            .set_default("resilience.llm.base_delay_ms", 250)?
            .set_default("resilience.llm.max_delay_ms", 20_000)?
            .set_default("resilience.llm.call_timeout_secs", 60)?
            .set_default("resilience.vector_store.failure_threshold", 5)?
            .set_default("resilience.vector_store.open_timeout_secs", 15)?
            .set_default("resilience.vector_store.half_open_max_calls", 3)?
            .set_default("resilience.vector_store.max_retries", 3)?
            .set_default("resilience.vector_store.base_delay_ms", 50)?
            .set_default("resilience.vector_store.max_delay_ms", 5_000)?
            .set_default("resilience.vector_store.call_timeout_secs", 15)?;

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load configuration from file with environment overrides.
    pub fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("CORPUS").separator("__"));

        let config = builder.build()?;
        config.try_deserialize()
    }
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            ingestion: IngestionSettings::default(),
            lifecycle: LifecycleSettings::default(),
            resilience: ResilienceSettings::default(),
        }
    }
}

/// Pipeline-side settings.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestionSettings {
    pub max_document_size: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_chunk_size: usize,
    pub max_chunk_size: usize,
    /// Default per-stage timeout; individual registrations may override.
    pub stage_timeout_ms: u64,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            max_document_size: 50 * 1024 * 1024,
            chunk_size: 512,
            chunk_overlap: 50,
            min_chunk_size: 10,
            max_chunk_size: 1000,
            stage_timeout_ms: 30_000,
        }
    }
}

impl IngestionSettings {
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_millis(self.stage_timeout_ms)
    }
}

/// Trash/purge settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleSettings {
    pub retention_days: i64,
    pub sweep_interval_secs: u64,
    pub sweep_batch_size: usize,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            retention_days: 30,
            sweep_interval_secs: 3600,
            sweep_batch_size: 100,
        }
    }
}

impl LifecycleSettings {
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.retention_days)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Per-dependency resilience settings; each outbound dependency gets its own
/// independent breaker and retry budget.
#[derive(Debug, Clone, Deserialize)]
pub struct ResilienceSettings {
    pub embedding: DependencySettings,
    pub llm: DependencySettings,
    pub vector_store: DependencySettings,
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        Self {
            embedding: DependencySettings::default(),
            llm: DependencySettings {
                open_timeout_secs: 60,
                half_open_max_calls: 2,
                max_retries: 2,
                base_delay_ms: 250,
                max_delay_ms: 20_000,
                call_timeout_secs: 60,
                ..DependencySettings::default()
            },
            vector_store: DependencySettings {
                open_timeout_secs: 15,
                base_delay_ms: 50,
                max_delay_ms: 5_000,
                call_timeout_secs: 15,
                ..DependencySettings::default()
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DependencySettings {
    pub failure_threshold: u32,
    pub open_timeout_secs: u64,
    pub half_open_max_calls: u32,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub call_timeout_secs: u64,
}

impl Default for DependencySettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout_secs: 30,
            half_open_max_calls: 3,
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 10_000,
            call_timeout_secs: 30,
        }
    }
}

impl DependencySettings {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.open_timeout_secs)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}
