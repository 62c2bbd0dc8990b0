//! Embedding seam for the Chitta memory engine.
//!
//! The engine never talks to a model directly; it consumes the [`Embedder`]
//! trait. Production deployments attach a real model behind this trait.
//! [`HashEmbedder`] is the deterministic fallback used by tests and by
//! stores opened without a model: same text, same vector, every time.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Default embedding dimension shared with the storage layer.
pub const DEFAULT_DIMENSION: usize = 384;

#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("empty input text")]
    EmptyInput,
    #[error("embedding model unavailable: {0}")]
    Unavailable(String),
}

/// A model that maps text to a fixed-dimension unit vector.
pub trait Embedder: Send + Sync {
    /// Output dimension. Constant for the lifetime of the embedder.
    fn dimension(&self) -> usize;

    /// Embed `text` into a unit-norm vector of `dimension()` components.
    fn transform(&self, text: &str) -> Result<Vec<f32>, EmbedError>;

    /// Whether the model is loaded and able to serve transforms.
    fn ready(&self) -> bool {
        true
    }
}

/// Deterministic feature-hash embedder.
///
/// Each token contributes a pseudo-random direction seeded from its hash,
/// weighted down for repeats; the sum is normalized. Overlapping token sets
/// produce high cosine, disjoint ones hover near zero.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn token_seed(token: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        hasher.finish()
    }

    fn tokenize(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_string())
            .collect()
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

impl Embedder for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn transform(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let tokens = Self::tokenize(text);
        if tokens.is_empty() {
            return Err(EmbedError::EmptyInput);
        }

        let mut accum = vec![0.0f32; self.dimension];
        for token in &tokens {
            let mut rng = StdRng::seed_from_u64(Self::token_seed(token));
            for slot in accum.iter_mut() {
                *slot += rng.gen_range(-1.0f32..1.0f32);
            }
        }

        let norm: f32 = accum.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 1e-8 {
            for v in accum.iter_mut() {
                *v /= norm;
            }
        }
        Ok(accum)
    }
}

/// Normalize a vector in place. Returns false when the norm is ~zero.
pub fn normalize(vector: &mut [f32]) -> bool {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm <= 1e-8 {
        return false;
    }
    for v in vector.iter_mut() {
        *v /= norm;
    }
    true
}

/// Cosine similarity between two equal-length vectors.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom > 0.0 {
        dot / denom
    } else {
        0.0
    }
}
