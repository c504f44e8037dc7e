//! Embedding provider trait and vector utilities.
//!
//! Concrete providers (feature hashing, fastembed, OpenAI) live in the
//! `incident-rca` app crate. The core only needs something that turns a
//! batch of texts into fixed-length vectors, deterministically.

use anyhow::Result;
use async_trait::async_trait;

/// Trait for embedding providers.
///
/// Implementations must return one vector per input, in input order, all
/// of length [`dims`](Embedder::dims). Identical input must produce an
/// identical vector, otherwise cache decisions stop being reproducible.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"all-minilm-l6-v2"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `384`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Squared Euclidean distance between two vectors.
///
/// This is the metric a flat L2 index reports; no square root is taken.
/// Returns `f32::INFINITY` for vectors of different lengths.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Map a squared L2 distance to a similarity score.
///
/// ```text
///                  1
/// similarity = ─────────
///               1 + dist
/// ```
///
/// Distance 0 maps to 1.0 and the score decreases monotonically with
/// distance. It is not a probability; stored thresholds are calibrated
/// against exactly this curve.
pub fn similarity_from_distance(distance: f32) -> f32 {
    1.0 / (1.0 + distance)
}

/// Scale a vector to unit length in place. Zero vectors are left as-is.
pub fn normalize(vec: &mut [f32]) {
    let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in vec.iter_mut() {
            *x /= norm;
        }
    }
}
