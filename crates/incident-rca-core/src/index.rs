//! Flat (brute-force) nearest-neighbor index over description embeddings.
//!
//! The index is built from one snapshot of the solution corpus and never
//! updated in place; every lookup builds a fresh one. At the corpus sizes
//! this tool handles an exact scan is cheaper than maintaining an ANN
//! structure, and rebuilding rules out stale entries.

use tracing::debug;

use crate::embedding::{squared_l2, Embedder};
use crate::error::CacheError;

/// One query result: the entry's position in build order and its squared
/// L2 distance from the query vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub position: usize,
    pub distance: f32,
}

/// Exact nearest-neighbor index. Positions follow the input ordering.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    vectors: Vec<Vec<f32>>,
    dims: usize,
}

impl FlatIndex {
    /// Embed every description and index the vectors by input position.
    ///
    /// # Errors
    ///
    /// - [`CacheError::EmptyCorpus`] if `descriptions` is empty. The
    ///   embedder is not called in that case.
    /// - [`CacheError::Embedding`] if the provider fails or returns the
    ///   wrong number of vectors.
    pub async fn build(
        embedder: &dyn Embedder,
        descriptions: &[String],
    ) -> Result<Self, CacheError> {
        if descriptions.is_empty() {
            return Err(CacheError::EmptyCorpus);
        }

        let vectors = embedder
            .embed(descriptions)
            .await
            .map_err(|e| CacheError::Embedding(format!("{:#}", e)))?;

        if vectors.len() != descriptions.len() {
            return Err(CacheError::Embedding(format!(
                "provider returned {} vectors for {} texts",
                vectors.len(),
                descriptions.len()
            )));
        }

        let index = Self::from_vectors(vectors)?;
        debug!(
            entries = index.len(),
            dims = index.dims,
            model = embedder.model_name(),
            "built similarity index"
        );
        Ok(index)
    }

    /// Build directly from precomputed vectors.
    ///
    /// All vectors must share the first vector's dimension.
    pub fn from_vectors(vectors: Vec<Vec<f32>>) -> Result<Self, CacheError> {
        let dims = match vectors.first() {
            Some(v) => v.len(),
            None => return Err(CacheError::EmptyCorpus),
        };
        if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
            return Err(CacheError::DimensionMismatch {
                expected: dims,
                actual: bad.len(),
            });
        }
        Ok(Self { vectors, dims })
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Embed `text` and return its `k` nearest entries.
    pub async fn query(
        &self,
        embedder: &dyn Embedder,
        text: &str,
        k: usize,
    ) -> Result<Vec<Neighbor>, CacheError> {
        if k == 0 {
            return Err(CacheError::InvalidK);
        }
        let query_vec = embedder
            .embed(&[text.to_string()])
            .await
            .map_err(|e| CacheError::Embedding(format!("{:#}", e)))?
            .into_iter()
            .next()
            .ok_or_else(|| CacheError::Embedding("empty embedding response".to_string()))?;

        self.search(&query_vec, k)
    }

    /// Return the `k` entries closest to `query_vec`, ascending by squared
    /// L2 distance. Equidistant entries keep build order, so the earliest
    /// position wins a tie. Fewer than `k` entries returns all of them.
    pub fn search(&self, query_vec: &[f32], k: usize) -> Result<Vec<Neighbor>, CacheError> {
        if k == 0 {
            return Err(CacheError::InvalidK);
        }
        if query_vec.len() != self.dims {
            return Err(CacheError::DimensionMismatch {
                expected: self.dims,
                actual: query_vec.len(),
            });
        }

        let mut neighbors: Vec<Neighbor> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(position, v)| Neighbor {
                position,
                distance: squared_l2(query_vec, v),
            })
            .collect();

        // sort_by is stable: ties stay in position order
        neighbors.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        neighbors.truncate(k);
        Ok(neighbors)
    }
}
