//! Cache engine: decide whether a stored artifact can be reused for a new
//! incident instead of paying for another generation call.
//!
//! # Decision
//!
//! 1. Empty corpus → miss, without touching the embedder.
//! 2. Build a [`FlatIndex`] over the corpus descriptions, query with `k = 1`.
//! 3. `similarity = 1 / (1 + distance)`; below `threshold` → miss.
//! 4. Matched record older than `staleness` → miss. Staleness overrides
//!    similarity: an exact duplicate of a two-year-old incident is still
//!    regenerated.
//! 5. Otherwise → hit.
//!
//! The engine is a pure function of its inputs. It holds no state between
//! calls and is safe to run concurrently for different incidents.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::embedding::{similarity_from_distance, Embedder};
use crate::error::CacheError;
use crate::index::FlatIndex;
use crate::models::SolutionRecord;

/// Default minimum similarity for reuse.
pub const DEFAULT_THRESHOLD: f32 = 0.85;

/// Default maximum age of a reusable record, in days.
pub const DEFAULT_STALENESS_DAYS: i64 = 60;

/// Reuse thresholds, decoupled from application config.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CachePolicy {
    /// Minimum similarity (inclusive) to treat two descriptions as the same problem.
    pub threshold: f32,
    /// Maximum age (inclusive) of a record that may be reused.
    pub staleness: Duration,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            staleness: Duration::days(DEFAULT_STALENESS_DAYS),
        }
    }
}

/// A reusable record and the evidence for reusing it.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit {
    pub record: SolutionRecord,
    /// Position of the record in the corpus passed to the lookup.
    pub position: usize,
    pub distance: f32,
    pub similarity: f32,
    pub age: Duration,
}

/// Why a lookup did not produce a reusable record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MissReason {
    EmptyCorpus,
    BelowThreshold { similarity: f32 },
    Stale { similarity: f32, age: Duration },
}

/// Outcome of [`evaluate`].
#[derive(Debug, Clone, PartialEq)]
pub enum CacheDecision {
    Hit(CacheHit),
    Miss(MissReason),
}

impl CacheDecision {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheDecision::Hit(_))
    }

    pub fn into_record(self) -> Option<SolutionRecord> {
        match self {
            CacheDecision::Hit(hit) => Some(hit.record),
            CacheDecision::Miss(_) => None,
        }
    }

    /// Similarity of the nearest record, when one was compared.
    pub fn similarity(&self) -> Option<f32> {
        match self {
            CacheDecision::Hit(hit) => Some(hit.similarity),
            CacheDecision::Miss(MissReason::BelowThreshold { similarity })
            | CacheDecision::Miss(MissReason::Stale { similarity, .. }) => Some(*similarity),
            CacheDecision::Miss(MissReason::EmptyCorpus) => None,
        }
    }
}

/// Find the nearest prior record and apply threshold and staleness rules.
///
/// # Errors
///
/// Only embedding failures surface as errors; an empty corpus is
/// [`MissReason::EmptyCorpus`].
pub async fn evaluate(
    embedder: &dyn Embedder,
    description: &str,
    corpus: &[SolutionRecord],
    policy: &CachePolicy,
    now: DateTime<Utc>,
) -> Result<CacheDecision, CacheError> {
    if corpus.is_empty() {
        debug!("cache miss: empty corpus");
        return Ok(CacheDecision::Miss(MissReason::EmptyCorpus));
    }

    let descriptions: Vec<String> = corpus.iter().map(|r| r.description.clone()).collect();
    let index = match FlatIndex::build(embedder, &descriptions).await {
        Ok(index) => index,
        Err(CacheError::EmptyCorpus) => return Ok(CacheDecision::Miss(MissReason::EmptyCorpus)),
        Err(e) => return Err(e),
    };

    let nearest = match index.query(embedder, description, 1).await?.into_iter().next() {
        Some(n) => n,
        None => return Ok(CacheDecision::Miss(MissReason::EmptyCorpus)),
    };

    if !nearest.distance.is_finite() {
        return Err(CacheError::Embedding(format!(
            "non-finite distance {} to record at position {}",
            nearest.distance, nearest.position
        )));
    }

    let similarity = similarity_from_distance(nearest.distance);
    let record = &corpus[nearest.position];

    if !(similarity >= policy.threshold) {
        debug!(
            similarity,
            threshold = policy.threshold,
            nearest = %record.number,
            "cache miss: below threshold"
        );
        return Ok(CacheDecision::Miss(MissReason::BelowThreshold { similarity }));
    }

    let age = now.signed_duration_since(record.created_at);
    if age > policy.staleness {
        debug!(
            similarity,
            age_days = age.num_days(),
            nearest = %record.number,
            "cache miss: stale"
        );
        return Ok(CacheDecision::Miss(MissReason::Stale { similarity, age }));
    }

    debug!(
        similarity,
        age_days = age.num_days(),
        matched = %record.number,
        "cache hit"
    );
    Ok(CacheDecision::Hit(CacheHit {
        record: record.clone(),
        position: nearest.position,
        distance: nearest.distance,
        similarity,
        age,
    }))
}

/// Return the reusable record for `description`, if any.
///
/// Thin wrapper over [`evaluate`] for callers that only need the record.
pub async fn lookup(
    embedder: &dyn Embedder,
    description: &str,
    corpus: &[SolutionRecord],
    policy: &CachePolicy,
    now: DateTime<Utc>,
) -> Result<Option<SolutionRecord>, CacheError> {
    Ok(evaluate(embedder, description, corpus, policy, now)
        .await?
        .into_record())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CountingEmbedder, FixedEmbedder};
    use pretty_assertions::assert_eq;

    fn record(number: &str, desc: &str, created_at: DateTime<Utc>) -> SolutionRecord {
        SolutionRecord::new(number, desc, created_at).with_artifact(
            crate::models::ArtifactKind::Solution,
            format!("fix for {}", number),
        )
    }

    #[tokio::test]
    async fn test_fresh_exact_match_is_reused() {
        let now = Utc::now();
        let corpus = vec![record("INC0001", "disk full on node A", now - Duration::days(10))];
        let embedder = CountingEmbedder::new();

        let found = lookup(
            &embedder,
            "disk full on node A",
            &corpus,
            &CachePolicy::default(),
            now,
        )
        .await
        .unwrap();

        assert_eq!(found, Some(corpus[0].clone()));
    }

    #[tokio::test]
    async fn test_stale_exact_match_is_rejected() {
        let now = Utc::now();
        let corpus = vec![record("INC0001", "disk full on node A", now - Duration::days(90))];
        let embedder = CountingEmbedder::new();

        let decision = evaluate(
            &embedder,
            "disk full on node A",
            &corpus,
            &CachePolicy::default(),
            now,
        )
        .await
        .unwrap();

        match decision {
            CacheDecision::Miss(MissReason::Stale { similarity, age }) => {
                assert!((similarity - 1.0).abs() < 1e-6);
                assert_eq!(age.num_days(), 90);
            }
            other => panic!("expected stale miss, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_corpus_never_embeds() {
        let embedder = CountingEmbedder::new();
        let decision = evaluate(
            &embedder,
            "anything",
            &[],
            &CachePolicy::default(),
            Utc::now(),
        )
        .await
        .unwrap();

        assert_eq!(decision, CacheDecision::Miss(MissReason::EmptyCorpus));
        assert_eq!(embedder.calls(), 0);
    }

    #[tokio::test]
    async fn test_below_threshold_is_rejected() {
        let now = Utc::now();
        // squared distance 1.0 → similarity 0.5
        let embedder = FixedEmbedder::new(vec![
            ("disk full", vec![1.0, 0.0]),
            ("cert expired", vec![0.0, 0.0]),
        ]);
        let corpus = vec![record("INC1", "disk full", now)];

        let decision = evaluate(
            &embedder,
            "cert expired",
            &corpus,
            &CachePolicy::default(),
            now,
        )
        .await
        .unwrap();

        match decision {
            CacheDecision::Miss(MissReason::BelowThreshold { similarity }) => {
                assert!((similarity - 0.5).abs() < 1e-6)
            }
            other => panic!("expected below-threshold miss, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_nan_embedding_is_an_error_not_a_hit() {
        let now = Utc::now();
        let embedder = FixedEmbedder::new(vec![("a", vec![f32::NAN]), ("b", vec![0.0])]);
        let corpus = vec![record("INC1", "a", now)];

        let result = evaluate(&embedder, "b", &corpus, &CachePolicy::default(), now).await;
        assert!(matches!(result, Err(CacheError::Embedding(_))));

        let found = lookup(&embedder, "b", &corpus, &CachePolicy::default(), now).await;
        assert!(found.is_err());
    }

    #[tokio::test]
    async fn test_threshold_is_inclusive() {
        let now = Utc::now();
        // squared distance 1.0 → similarity exactly 0.5
        let embedder = FixedEmbedder::new(vec![("a", vec![1.0]), ("b", vec![0.0])]);
        let corpus = vec![record("INC1", "a", now)];
        let policy = CachePolicy {
            threshold: 0.5,
            ..CachePolicy::default()
        };

        let decision = evaluate(&embedder, "b", &corpus, &policy, now).await.unwrap();
        assert!(decision.is_hit());
    }

    #[tokio::test]
    async fn test_age_at_window_edge_is_reusable() {
        let now = Utc::now();
        let policy = CachePolicy::default();
        let corpus = vec![record("INC1", "queue backlog", now - policy.staleness)];
        let embedder = CountingEmbedder::new();

        let decision = evaluate(&embedder, "queue backlog", &corpus, &policy, now)
            .await
            .unwrap();
        assert!(decision.is_hit());

        let later = now + Duration::seconds(1);
        let decision = evaluate(&embedder, "queue backlog", &corpus, &policy, later)
            .await
            .unwrap();
        assert!(!decision.is_hit());
    }

    #[tokio::test]
    async fn test_equidistant_records_pick_first() {
        let now = Utc::now();
        let embedder = FixedEmbedder::new(vec![
            ("left", vec![-0.1]),
            ("right", vec![0.1]),
            ("q", vec![0.0]),
        ]);
        let corpus = vec![record("INC-L", "left", now), record("INC-R", "right", now)];

        let decision = evaluate(&embedder, "q", &corpus, &CachePolicy::default(), now)
            .await
            .unwrap();
        match decision {
            CacheDecision::Hit(hit) => {
                assert_eq!(hit.position, 0);
                assert_eq!(hit.record.number, "INC-L");
            }
            other => panic!("expected hit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_nearest_record_wins_over_older_duplicates() {
        let now = Utc::now();
        let corpus = vec![
            record("INC1", "disk full on node A", now - Duration::days(5)),
            record("INC2", "login page returns 500", now - Duration::days(5)),
        ];
        let embedder = CountingEmbedder::new();

        let found = lookup(
            &embedder,
            "login page returns 500",
            &corpus,
            &CachePolicy::default(),
            now,
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(found.number, "INC2");
    }

    #[tokio::test]
    async fn test_embedding_failure_is_an_error() {
        let embedder = CountingEmbedder::failing();
        let corpus = vec![record("INC1", "x", Utc::now())];
        let err = evaluate(&embedder, "x", &corpus, &CachePolicy::default(), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Embedding(_)));
    }
}
