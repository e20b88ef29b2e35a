//! In-process completion provider.
//!
//! Returns a clipped echo of the prompt, or a canned response when one is
//! configured. Enough for summary enrichers in tests and local runs.

use async_trait::async_trait;

use corpus_core::{LlmProvider, Result};

pub struct EchoLlmProvider {
    model: String,
    canned_response: Option<String>,
    max_echo_chars: usize,
}

impl Default for EchoLlmProvider {
    fn default() -> Self {
        Self {
            model: "echo".to_string(),
            canned_response: None,
            max_echo_chars: 240,
        }
    }
}

impl EchoLlmProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.canned_response = Some(response.into());
        self
    }

    pub fn with_max_echo_chars(mut self, max: usize) -> Self {
        self.max_echo_chars = max;
        self
    }
}

#[async_trait]
impl LlmProvider for EchoLlmProvider {
    async fn complete(&self, prompt: &str) -> Result<String> {
        if let Some(ref canned) = self.canned_response {
            return Ok(canned.clone());
        }
        Ok(prompt.chars().take(self.max_echo_chars).collect())
    }

    fn model(&self) -> &str {
        &self.model
    }
}
