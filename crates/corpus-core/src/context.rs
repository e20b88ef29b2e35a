//! Per-request identity and tracing envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::types::Namespace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Threaded through every middleware stage and provider call.
///
/// Carries identity for tracing and a cancellation token: a caller
/// disconnect cancels the token, and the engine converts that into the same
/// failure channel as any other error so recovery still runs.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: RequestId,
    pub namespace: Namespace,
    pub principal: Option<String>,
    pub attributes: HashMap<String, String>,
    pub started_at: DateTime<Utc>,
    cancellation: CancellationToken,
}

impl RequestContext {
    pub fn new(namespace: Namespace) -> Self {
        Self {
            request_id: RequestId::new(),
            namespace,
            principal: None,
            attributes: HashMap::new(),
            started_at: Utc::now(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn elapsed_ms(&self) -> i64 {
        (Utc::now() - self.started_at).num_milliseconds()
    }
}
