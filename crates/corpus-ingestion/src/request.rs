//! Ingest request envelope and content decoding.

use std::collections::HashMap;
use std::path::Path;

use corpus_core::{ChunkStrategy, CorpusError, IngestSource, Namespace, Result};

/// Everything the engine needs to ingest one piece of content.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub content: Vec<u8>,
    pub namespace: Namespace,
    pub filename: String,
    pub source_path: Option<String>,
    pub source: IngestSource,
    pub strategy: Option<ChunkStrategy>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl IngestRequest {
    pub fn new(
        namespace: Namespace,
        filename: impl Into<String>,
        content: Vec<u8>,
        source: IngestSource,
    ) -> Self {
        Self {
            content,
            namespace,
            filename: filename.into(),
            source_path: None,
            source,
            strategy: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_source_path(mut self, path: impl Into<String>) -> Self {
        self.source_path = Some(path.into());
        self
    }

    pub fn with_strategy(mut self, strategy: ChunkStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Build a request from a file on disk. The path becomes the source
    /// path and the guessed content type lands in the metadata.
    pub async fn from_file(
        path: impl AsRef<Path>,
        namespace: Namespace,
        source: IngestSource,
    ) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read(path)
            .await
            .map_err(|e| CorpusError::Validation(format!("cannot read {}: {}", path.display(), e)))?;

        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        let content_type = mime_guess::from_path(path)
            .first_or_text_plain()
            .to_string();

        Ok(Self::new(namespace, filename, content, source)
            .with_source_path(path.to_string_lossy())
            .with_metadata("content_type", serde_json::json!(content_type)))
    }
}

/// Decode raw bytes to text: UTF-8 fast path, Windows-1252 fallback for the
/// long tail of legacy uploads.
pub fn decode_text(content: &[u8]) -> String {
    match std::str::from_utf8(content) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(content);
            decoded.into_owned()
        }
    }
}
