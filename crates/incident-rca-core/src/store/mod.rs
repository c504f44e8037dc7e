//! Storage abstraction for incidents and their generated artifacts.
//!
//! The pipeline talks to persistence only through [`IncidentStore`] and
//! [`SolutionStore`], so backends are pluggable (SQLite in the app crate,
//! [`memory`] for tests and embedding).
//!
//! Stage changes go through compare-and-swap operations
//! ([`claim`](IncidentStore::claim), [`release`](IncidentStore::release),
//! [`complete`](IncidentStore::complete)) rather than read-then-write, so
//! two runs racing on the same incident cannot both do the same stage.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::models::{ArtifactKind, Incident, SolutionRecord, Stage};

/// Filter for [`IncidentStore::list`].
#[derive(Debug, Clone, Default)]
pub struct IncidentFilter {
    /// Case-insensitive priority match.
    pub priority: Option<String>,
    pub stage: Option<Stage>,
    /// Exclude incidents whose stage is [`Stage::Done`].
    pub unfinished_only: bool,
    pub limit: Option<usize>,
}

impl IncidentFilter {
    pub fn matches(&self, incident: &Incident) -> bool {
        if let Some(ref p) = self.priority {
            match incident.priority {
                Some(ref ip) if ip.eq_ignore_ascii_case(p) => {}
                _ => return false,
            }
        }
        if let Some(stage) = self.stage {
            if incident.stage != stage {
                return false;
            }
        }
        !(self.unfinished_only && incident.stage == Stage::Done)
    }
}

/// Durable incident records and their processing stage.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get`](IncidentStore::get) | Fetch one incident by number |
/// | [`upsert`](IncidentStore::upsert) | Insert, or refresh descriptive fields |
/// | [`insert_if_absent`](IncidentStore::insert_if_absent) | Atomic duplicate-ingestion guard |
/// | [`claim`](IncidentStore::claim) | CAS ready → pending (or take over a stale claim) |
/// | [`release`](IncidentStore::release) | CAS pending → ready after a failure |
/// | [`complete`](IncidentStore::complete) | CAS pending → done |
/// | [`list`](IncidentStore::list) | Filtered listing, newest first |
#[async_trait]
pub trait IncidentStore: Send + Sync {
    async fn get(&self, number: &str) -> Result<Option<Incident>>;

    /// Insert the incident, or update the descriptive fields of an existing
    /// one. Never changes `stage`, `claimed_at` or `ingested_at` of a
    /// stored incident.
    async fn upsert(&self, incident: &Incident) -> Result<()>;

    /// Insert only if no incident with this number exists.
    ///
    /// Returns `true` if the row was inserted.
    async fn insert_if_absent(&self, incident: &Incident) -> Result<bool>;

    /// Claim `kind` for processing.
    ///
    /// Succeeds when the incident is in `kind.ready_stage()`, or when it is
    /// in `kind.pending_stage()` with a claim at or before `now - stale_after`.
    /// On success the stage becomes pending with `claimed_at = now`.
    async fn claim(
        &self,
        number: &str,
        kind: ArtifactKind,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<bool>;

    /// Give back a claim made at `claimed_at`, returning to the ready stage.
    async fn release(
        &self,
        number: &str,
        kind: ArtifactKind,
        claimed_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Finish a claim made at `claimed_at`, moving to `kind.done_stage()`.
    ///
    /// Returns `false` if the claim is no longer held (taken over or already
    /// finished), in which case nothing changes.
    async fn complete(
        &self,
        number: &str,
        kind: ArtifactKind,
        claimed_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Incidents matching `filter`, ordered by `opened_at` descending.
    async fn list(&self, filter: &IncidentFilter) -> Result<Vec<Incident>>;
}

/// Durable generated artifacts, one record per incident number.
#[async_trait]
pub trait SolutionStore: Send + Sync {
    /// Every record, ordered by `created_at` then `number`.
    ///
    /// The order is what the similarity index uses as build order, so it
    /// must be stable for a given store state.
    async fn list_all(&self) -> Result<Vec<SolutionRecord>>;

    async fn get(&self, number: &str) -> Result<Option<SolutionRecord>>;

    /// Insert a record, or merge its artifacts into the existing one.
    ///
    /// See [`SolutionRecord::merge`]: description and `created_at` of an
    /// existing record are immutable.
    async fn put(&self, record: &SolutionRecord) -> Result<()>;
}

/// Milliseconds used by backends to compare claim times.
///
/// Claim times round-trip through storage at millisecond precision, so CAS
/// comparisons must too.
pub fn claim_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Millisecond cutoff at or before which a pending claim counts as abandoned.
///
/// `None` means no claim is ever stale: `stale_after` is negative, or
/// `now - stale_after` is out of range.
pub fn stale_cutoff(now: DateTime<Utc>, stale_after: Duration) -> Option<i64> {
    if stale_after < Duration::zero() {
        return None;
    }
    now.checked_sub_signed(stale_after).map(claim_millis)
}
