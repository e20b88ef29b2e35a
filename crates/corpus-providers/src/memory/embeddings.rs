//! Deterministic hash-based embedder.
//!
//! Maps identical text to identical vectors, which is all the pipeline
//! needs for dedup, wiring, and tests. Real deployments put a model behind
//! the same trait.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use corpus_core::{CorpusError, EmbeddingProvider, Result};

pub struct HashEmbeddingProvider {
    dimensions: usize,
}

impl Default for HashEmbeddingProvider {
    fn default() -> Self {
        Self { dimensions: 64 }
    }
}

impl HashEmbeddingProvider {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        // Stretch the digest over the requested width by re-hashing with a
        // block counter, then normalize to unit length.
        let mut values = Vec::with_capacity(self.dimensions);
        let mut block: u32 = 0;
        while values.len() < self.dimensions {
            let mut hasher = Sha256::new();
            hasher.update(block.to_be_bytes());
            hasher.update(text.as_bytes());
            let digest = hasher.finalize();
            for byte in digest.iter() {
                if values.len() == self.dimensions {
                    break;
                }
                values.push((*byte as f32 - 127.5) / 127.5);
            }
            block += 1;
        }

        let norm: f32 = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in values.iter_mut() {
                *v /= norm;
            }
        }
        values
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.is_empty() {
            return Err(CorpusError::Validation("cannot embed empty text".into()));
        }
        Ok(self.embed_sync(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| {
            if t.is_empty() {
                Err(CorpusError::Validation("cannot embed empty text".into()))
            } else {
                Ok(self.embed_sync(t))
            }
        }).collect()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
