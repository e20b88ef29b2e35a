use crate::types::DocumentId;

/// Error taxonomy shared across the workspace.
///
/// A duplicate upload is not represented here: SKIP is a normal
/// `IngestDecision` outcome, not a failure.
#[derive(Debug, thiserror::Error)]
pub enum CorpusError {
    /// Bad input. Never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// An outbound dependency (embedding, LLM, storage) failed. Retried per
    /// the resilience policy before it reaches the caller.
    #[error("{dependency} provider error: {message}")]
    Provider {
        dependency: String,
        message: String,
        retryable: bool,
    },

    /// A displaced document could not be restored after its replacement
    /// failed to ingest. The one failure mode with no safe fallback; always
    /// surfaced distinctly and logged at the highest severity.
    #[error("recovery failed for document {doc_id}: {message}")]
    RecoveryFailed {
        doc_id: DocumentId,
        message: String,
    },

    /// A middleware stage failed or timed out and its policy escalated.
    #[error("middleware stage '{stage}' failed: {message}")]
    Middleware { stage: String, message: String },

    /// Invalid middleware wiring. Raised when a chain is built, never while
    /// serving a request.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Restore/purge target missing, or already claimed by a racing action.
    #[error("not found: {0}")]
    NotFound(String),

    /// Conditional write lost: another writer holds the identifier.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The caller disconnected mid-flight. Routed through the same failure
    /// channel as an error so recovery still runs.
    #[error("request cancelled")]
    Cancelled,
}

impl CorpusError {
    pub fn provider(dependency: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            dependency: dependency.into(),
            message: message.into(),
            retryable: true,
        }
    }

    pub fn provider_fatal(dependency: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            dependency: dependency.into(),
            message: message.into(),
            retryable: false,
        }
    }

    /// Whether the resilience layer may retry this failure.
    pub fn is_retryable(&self) -> bool {
        match self {
            CorpusError::Provider { retryable, .. } => *retryable,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, CorpusError>;
