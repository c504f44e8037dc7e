//! In-memory store implementations for tests and library embedding.
//!
//! Uses `BTreeMap` behind `std::sync::RwLock`. Every mutating call is
//! counted so tests can assert that a code path performed no writes.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::models::{ArtifactKind, Incident, SolutionRecord};

use super::{claim_millis, stale_cutoff, IncidentFilter, IncidentStore, SolutionStore};

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn claim_matches(incident: &Incident, claimed_at: DateTime<Utc>) -> bool {
    incident.claimed_at.map(claim_millis) == Some(claim_millis(claimed_at))
}

/// In-memory [`IncidentStore`].
#[derive(Default)]
pub struct InMemoryIncidentStore {
    incidents: RwLock<BTreeMap<String, Incident>>,
    writes: AtomicUsize,
}

impl InMemoryIncidentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of state-changing calls that modified the store.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl IncidentStore for InMemoryIncidentStore {
    async fn get(&self, number: &str) -> Result<Option<Incident>> {
        Ok(read(&self.incidents)?.get(number).cloned())
    }

    async fn upsert(&self, incident: &Incident) -> Result<()> {
        let mut incidents = write(&self.incidents)?;
        match incidents.get_mut(&incident.number) {
            Some(existing) => {
                existing.short_description = incident.short_description.clone();
                existing.description = incident.description.clone();
                existing.priority = incident.priority.clone();
                existing.business_service = incident.business_service.clone();
                existing.opened_at = incident.opened_at;
            }
            None => {
                incidents.insert(incident.number.clone(), incident.clone());
            }
        }
        self.bump();
        Ok(())
    }

    async fn insert_if_absent(&self, incident: &Incident) -> Result<bool> {
        let mut incidents = write(&self.incidents)?;
        if incidents.contains_key(&incident.number) {
            return Ok(false);
        }
        incidents.insert(incident.number.clone(), incident.clone());
        self.bump();
        Ok(true)
    }

    async fn claim(
        &self,
        number: &str,
        kind: ArtifactKind,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<bool> {
        let mut incidents = write(&self.incidents)?;
        let Some(incident) = incidents.get_mut(number) else {
            return Ok(false);
        };

        let cutoff = stale_cutoff(now, stale_after);
        let claimable = incident.stage == kind.ready_stage()
            || (incident.stage == kind.pending_stage()
                && incident.claimed_at.map_or(true, |at| {
                    cutoff.is_some_and(|cutoff| claim_millis(at) <= cutoff)
                }));
        if !claimable {
            return Ok(false);
        }

        incident.stage = kind.pending_stage();
        incident.claimed_at = Some(now);
        self.bump();
        Ok(true)
    }

    async fn release(
        &self,
        number: &str,
        kind: ArtifactKind,
        claimed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut incidents = write(&self.incidents)?;
        match incidents.get_mut(number) {
            Some(incident)
                if incident.stage == kind.pending_stage()
                    && claim_matches(incident, claimed_at) =>
            {
                incident.stage = kind.ready_stage();
                incident.claimed_at = None;
                self.bump();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete(
        &self,
        number: &str,
        kind: ArtifactKind,
        claimed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut incidents = write(&self.incidents)?;
        match incidents.get_mut(number) {
            Some(incident)
                if incident.stage == kind.pending_stage()
                    && claim_matches(incident, claimed_at) =>
            {
                incident.stage = kind.done_stage();
                incident.claimed_at = None;
                self.bump();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list(&self, filter: &IncidentFilter) -> Result<Vec<Incident>> {
        let incidents = read(&self.incidents)?;
        let mut matched: Vec<Incident> = incidents
            .values()
            .filter(|i| filter.matches(i))
            .cloned()
            .collect();
        // BTreeMap yields number order; stable sort keeps it within equal opened_at
        matched.sort_by(|a, b| b.opened_at.cmp(&a.opened_at));
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }
}

/// In-memory [`SolutionStore`].
#[derive(Default)]
pub struct InMemorySolutionStore {
    records: RwLock<BTreeMap<String, SolutionRecord>>,
    writes: AtomicUsize,
}

impl InMemorySolutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SolutionStore for InMemorySolutionStore {
    async fn list_all(&self) -> Result<Vec<SolutionRecord>> {
        let records = read(&self.records)?;
        let mut all: Vec<SolutionRecord> = records.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(all)
    }

    async fn get(&self, number: &str) -> Result<Option<SolutionRecord>> {
        Ok(read(&self.records)?.get(number).cloned())
    }

    async fn put(&self, record: &SolutionRecord) -> Result<()> {
        let mut records = write(&self.records)?;
        match records.get_mut(&record.number) {
            Some(existing) => existing.merge(record),
            None => {
                records.insert(record.number.clone(), record.clone());
            }
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Stage;
    use pretty_assertions::assert_eq;

    fn incident(number: &str) -> Incident {
        Incident::new(number, "replication lag on db-3", Utc::now())
    }

    #[tokio::test]
    async fn test_insert_if_absent_is_idempotent() {
        let store = InMemoryIncidentStore::new();
        assert!(store.insert_if_absent(&incident("INC1")).await.unwrap());
        assert!(!store.insert_if_absent(&incident("INC1")).await.unwrap());
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn test_upsert_preserves_stage() {
        let store = InMemoryIncidentStore::new();
        store.insert_if_absent(&incident("INC1")).await.unwrap();
        let now = Utc::now();
        assert!(store
            .claim("INC1", ArtifactKind::Analysis, now, Duration::minutes(15))
            .await
            .unwrap());

        let mut updated = incident("INC1");
        updated.short_description = "replication lag on db-4".into();
        store.upsert(&updated).await.unwrap();

        let stored = store.get("INC1").await.unwrap().unwrap();
        assert_eq!(stored.short_description, "replication lag on db-4");
        assert_eq!(stored.stage, Stage::AnalysisPending);
    }

    #[tokio::test]
    async fn test_claim_is_exclusive_until_stale() {
        let store = InMemoryIncidentStore::new();
        store.insert_if_absent(&incident("INC1")).await.unwrap();
        let ttl = Duration::minutes(15);
        let t0 = Utc::now();

        assert!(store.claim("INC1", ArtifactKind::Analysis, t0, ttl).await.unwrap());
        let t1 = t0 + Duration::minutes(1);
        assert!(!store.claim("INC1", ArtifactKind::Analysis, t1, ttl).await.unwrap());

        let t2 = t0 + Duration::minutes(16);
        assert!(store.claim("INC1", ArtifactKind::Analysis, t2, ttl).await.unwrap());

        // the first claimant can no longer finish
        assert!(!store.complete("INC1", ArtifactKind::Analysis, t0).await.unwrap());
        assert!(store.complete("INC1", ArtifactKind::Analysis, t2).await.unwrap());
        let stored = store.get("INC1").await.unwrap().unwrap();
        assert_eq!(stored.stage, Stage::AnalysisDone);
        assert_eq!(stored.claimed_at, None);
    }

    #[tokio::test]
    async fn test_out_of_range_timeout_never_goes_stale() {
        let store = InMemoryIncidentStore::new();
        store.insert_if_absent(&incident("INC1")).await.unwrap();
        let t0 = Utc::now();
        let huge = Duration::seconds(10_000_000_000_000);

        assert!(store.claim("INC1", ArtifactKind::Analysis, t0, huge).await.unwrap());
        let t1 = t0 + Duration::days(365);
        assert!(!store.claim("INC1", ArtifactKind::Analysis, t1, huge).await.unwrap());

        let negative = Duration::seconds(-3600);
        assert!(!store
            .claim("INC1", ArtifactKind::Analysis, t1, negative)
            .await
            .unwrap());
        assert!(store.complete("INC1", ArtifactKind::Analysis, t0).await.unwrap());
    }

    #[tokio::test]
    async fn test_solution_claim_requires_analysis_done() {
        let store = InMemoryIncidentStore::new();
        store.insert_if_absent(&incident("INC1")).await.unwrap();
        let now = Utc::now();
        assert!(!store
            .claim("INC1", ArtifactKind::Solution, now, Duration::minutes(15))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_release_returns_to_ready() {
        let store = InMemoryIncidentStore::new();
        store.insert_if_absent(&incident("INC1")).await.unwrap();
        let now = Utc::now();
        store
            .claim("INC1", ArtifactKind::Analysis, now, Duration::minutes(15))
            .await
            .unwrap();
        assert!(store.release("INC1", ArtifactKind::Analysis, now).await.unwrap());
        let stored = store.get("INC1").await.unwrap().unwrap();
        assert_eq!(stored.stage, Stage::Intake);
        assert!(!stored.analysis_done());
    }

    #[tokio::test]
    async fn test_list_filters_and_orders() {
        let store = InMemoryIncidentStore::new();
        let now = Utc::now();
        for (n, prio, age) in [("INC1", "High", 3), ("INC2", "low", 1), ("INC3", "high", 2)] {
            let mut i = Incident::new(n, "x", now - Duration::days(age));
            i.priority = Some(prio.to_string());
            store.insert_if_absent(&i).await.unwrap();
        }

        let filter = IncidentFilter {
            priority: Some("HIGH".into()),
            ..Default::default()
        };
        let numbers: Vec<String> = store
            .list(&filter)
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.number)
            .collect();
        assert_eq!(numbers, vec!["INC3".to_string(), "INC1".to_string()]);
    }

    #[tokio::test]
    async fn test_solution_put_merges() {
        let store = InMemorySolutionStore::new();
        let created = Utc::now() - Duration::days(3);
        store
            .put(
                &SolutionRecord::new("INC1", "disk full", created)
                    .with_artifact(ArtifactKind::Analysis, "logs filled /var"),
            )
            .await
            .unwrap();
        store
            .put(
                &SolutionRecord::new("INC1", "ignored", Utc::now())
                    .with_artifact(ArtifactKind::Solution, "rotate logs"),
            )
            .await
            .unwrap();

        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].created_at, created);
        assert_eq!(all[0].description, "disk full");
        assert_eq!(all[0].rca.as_deref(), Some("logs filled /var"));
        assert_eq!(all[0].solution.as_deref(), Some("rotate logs"));
    }
}
