//! Deterministic text→vector embedding contract.
//!
//! The core assumes a pretrained embedding model (spec Non-goals); this
//! module defines the contract both a production, provider-backed
//! implementation and a dependency-free deterministic fallback satisfy.

use crate::error::StoreError;
use async_trait::async_trait;
use rig::embeddings::EmbeddingModel;

/// `embed(texts) -> [vector]`. Pure/deterministic modulo model weights;
/// safe to batch and to call concurrently (implementations must be
/// `Send + Sync`).
#[async_trait]
pub trait EmbeddingFunction: Send + Sync {
    /// Embed a batch of texts, preserving input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, StoreError>;

    /// Fixed output dimension for this instance.
    fn dim(&self) -> usize;
}

/// A deterministic, network-free embedding function used for tests and as
/// an offline fallback. Projects stable n-gram hashes into a fixed-size,
/// L2-normalized vector — not semantically meaningful, but bit-exact and
/// reproducible, which is all invariant 5 (spec §8) requires of it.
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        assert!(dim > 0, "embedding dimension must be positive");
        Self { dim }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];
        let normalized = text.to_lowercase();
        for token in normalized.split_whitespace() {
            for n in 1..=3 {
                for gram in ngrams(token, n) {
                    let bucket = fnv1a(gram.as_bytes()) as usize % self.dim;
                    vector[bucket] += 1.0;
                }
            }
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingFunction for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, StoreError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

fn ngrams(token: &str, n: usize) -> Vec<String> {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() < n {
        return vec![token.to_string()];
    }
    chars.windows(n).map(|w| w.iter().collect()).collect()
}

/// FNV-1a, chosen over `std::hash` for stability across process runs and
/// Rust versions (`DefaultHasher` is explicitly not guaranteed stable).
fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Production embedding function wrapping any `rig-core` [`EmbeddingModel`]
/// (OpenAI, Cohere, local GGUF via rig's provider modules, ...). Keeps the
/// provider dependency the teacher already pins (`rig-core`) rather than
/// hand-rolling an HTTP client.
pub struct RigEmbedder<E> {
    model: E,
}

impl<E> RigEmbedder<E>
where
    E: EmbeddingModel,
{
    pub fn new(model: E) -> Self {
        Self { model }
    }
}

#[async_trait]
impl<E> EmbeddingFunction for RigEmbedder<E>
where
    E: EmbeddingModel + Send + Sync,
{
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, StoreError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let embeddings = self
            .model
            .embed_texts(texts.to_vec())
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        Ok(embeddings
            .into_iter()
            .map(|e| e.vec.into_iter().map(|v| v as f32).collect())
            .collect())
    }

    fn dim(&self) -> usize {
        self.model.ndims()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embed_is_deterministic() {
        let embedder = HashEmbedder::new(64);
        let a = embedder.embed(&["tomato price in Bargarh".to_string()]).await.unwrap();
        let b = embedder.embed(&["tomato price in Bargarh".to_string()]).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn embed_respects_declared_dimension() {
        let embedder = HashEmbedder::new(32);
        let out = embedder.embed(&["wheat".to_string()]).await.unwrap();
        assert_eq!(out[0].len(), 32);
        assert_eq!(embedder.dim(), 32);
    }

    #[tokio::test]
    async fn distinct_texts_embed_differently() {
        let embedder = HashEmbedder::new(64);
        let out = embedder
            .embed(&["tomato price".to_string(), "soil nitrogen levels".to_string()])
            .await
            .unwrap();
        assert_ne!(out[0], out[1]);
    }
}
