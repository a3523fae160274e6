//! Text embedding seam.
//!
//! The ranking core treats embedding as an opaque `embed(texts) -> vectors`
//! service. Production hosts plug in their sentence-embedding model behind
//! [`Embedder`]; [`HashingEmbedder`] is a dependency-free local implementation
//! (signed feature hashing over word unigrams and bigrams) used by the CLI,
//! the simulator, and tests.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::EmbedderConfig;

#[derive(Debug, Clone, thiserror::Error)]
pub enum EmbedError {
    #[error("embedder unavailable: {0}")]
    Unavailable(String),
    #[error("embedder returned {got} vectors for {expected} texts")]
    CountMismatch { expected: usize, got: usize },
    #[error("embedder error: {0}")]
    Message(String),
}

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier; folded into cache keys.
    fn model_name(&self) -> &str;

    /// Embed a batch of texts. The output has one vector per input, in order,
    /// all of the same dimension.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, EmbedError>;
}

#[async_trait]
impl<T: Embedder + ?Sized> Embedder for Arc<T> {
    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, EmbedError> {
        (**self).embed(texts).await
    }
}

/// Signed feature-hashing embedder.
///
/// Each lowercase alphanumeric token (and each adjacent token pair) is hashed
/// with blake3 into one of `dimension` buckets with a ±1 sign; the result is
/// L2-normalised. Texts with no tokens embed to the zero vector.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
    model_name: String,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            model_name: format!("feature-hash-v1-d{}", dimension.max(1)),
        }
    }

    pub fn from_config(cfg: &EmbedderConfig) -> Self {
        Self {
            dimension: cfg.dimension.max(1),
            model_name: cfg.model_name.clone(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Synchronous single-text embedding.
    pub fn embed_one(&self, text: &str) -> Vec<f64> {
        let mut v = vec![0.0; self.dimension];
        let tokens = tokenize(text);

        for tok in &tokens {
            self.accumulate(&mut v, tok.as_bytes(), 1.0);
        }
        for pair in tokens.windows(2) {
            let joined = format!("{} {}", pair[0], pair[1]);
            self.accumulate(&mut v, joined.as_bytes(), 0.5);
        }

        let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }

    pub fn embed_batch(&self, texts: &[String]) -> Vec<Vec<f64>> {
        texts.iter().map(|t| self.embed_one(t)).collect()
    }

    fn accumulate(&self, v: &mut [f64], feature: &[u8], weight: f64) {
        let hash = blake3::hash(feature);
        let bytes = hash.as_bytes();
        let mut idx_bytes = [0u8; 8];
        idx_bytes.copy_from_slice(&bytes[..8]);
        let idx = (u64::from_le_bytes(idx_bytes) % self.dimension as u64) as usize;
        let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
        v[idx] += sign * weight;
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, EmbedError> {
        Ok(self.embed_batch(texts))
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}
