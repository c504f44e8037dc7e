//! SQLite-backed [`IncidentStore`] and [`SolutionStore`].
//!
//! Stage transitions are single conditional `UPDATE` statements; the
//! compare-and-swap result is read from `rows_affected()`, so two
//! processes sharing the database can never both claim the same stage.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use incident_rca_core::models::{ArtifactKind, Incident, SolutionRecord, Stage};
use incident_rca_core::store::{
    claim_millis, stale_cutoff, IncidentFilter, IncidentStore, SolutionStore,
};

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("timestamp out of range: {}", ms))
}

fn incident_from_row(row: &SqliteRow) -> Result<Incident> {
    let stage: String = row.get("stage");
    let claimed_at: Option<i64> = row.get("claimed_at");
    Ok(Incident {
        number: row.get("number"),
        short_description: row.get("short_description"),
        description: row.get("description"),
        priority: row.get("priority"),
        business_service: row.get("business_service"),
        opened_at: from_millis(row.get("opened_at"))?,
        stage: stage.parse()?,
        claimed_at: claimed_at.map(from_millis).transpose()?,
        ingested_at: from_millis(row.get("ingested_at"))?,
    })
}

fn record_from_row(row: &SqliteRow) -> Result<SolutionRecord> {
    Ok(SolutionRecord {
        number: row.get("number"),
        description: row.get("description"),
        rca: row.get("rca"),
        solution: row.get("solution"),
        created_at: from_millis(row.get("created_at"))?,
    })
}

const INCIDENT_COLUMNS: &str = "number, short_description, description, priority, \
     business_service, opened_at, stage, claimed_at, ingested_at";

/// SQLite implementation of [`IncidentStore`] over the `incidents` table.
#[derive(Clone)]
pub struct SqliteIncidentStore {
    pool: SqlitePool,
}

impl SqliteIncidentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Incident counts per stage, in stage order. Stages with no rows are omitted.
    pub async fn count_by_stage(&self) -> Result<Vec<(Stage, i64)>> {
        let rows = sqlx::query("SELECT stage, COUNT(*) AS n FROM incidents GROUP BY stage")
            .fetch_all(&self.pool)
            .await?;

        let mut counts = Vec::with_capacity(rows.len());
        for row in &rows {
            let stage: String = row.get("stage");
            counts.push((stage.parse::<Stage>()?, row.get::<i64, _>("n")));
        }
        counts.sort_by_key(|(stage, _)| *stage);
        Ok(counts)
    }

    async fn transition(
        &self,
        number: &str,
        from: Stage,
        to: Stage,
        claimed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE incidents SET stage = ?, claimed_at = NULL \
             WHERE number = ? AND stage = ? AND claimed_at = ?",
        )
        .bind(to.as_str())
        .bind(number)
        .bind(from.as_str())
        .bind(claim_millis(claimed_at))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl IncidentStore for SqliteIncidentStore {
    async fn get(&self, number: &str) -> Result<Option<Incident>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM incidents WHERE number = ?",
            INCIDENT_COLUMNS
        ))
        .bind(number)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(incident_from_row).transpose()
    }

    async fn upsert(&self, incident: &Incident) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO incidents (number, short_description, description, priority,
                                   business_service, opened_at, stage, claimed_at, ingested_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(number) DO UPDATE SET
                short_description = excluded.short_description,
                description = excluded.description,
                priority = excluded.priority,
                business_service = excluded.business_service,
                opened_at = excluded.opened_at
            "#,
        )
        .bind(&incident.number)
        .bind(&incident.short_description)
        .bind(&incident.description)
        .bind(&incident.priority)
        .bind(&incident.business_service)
        .bind(incident.opened_at.timestamp_millis())
        .bind(incident.stage.as_str())
        .bind(incident.claimed_at.map(claim_millis))
        .bind(incident.ingested_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_if_absent(&self, incident: &Incident) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO incidents (number, short_description, description, priority,
                                   business_service, opened_at, stage, claimed_at, ingested_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(number) DO NOTHING
            "#,
        )
        .bind(&incident.number)
        .bind(&incident.short_description)
        .bind(&incident.description)
        .bind(&incident.priority)
        .bind(&incident.business_service)
        .bind(incident.opened_at.timestamp_millis())
        .bind(incident.stage.as_str())
        .bind(incident.claimed_at.map(claim_millis))
        .bind(incident.ingested_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn claim(
        &self,
        number: &str,
        kind: ArtifactKind,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<bool> {
        let pending = kind.pending_stage().as_str();
        // NULL cutoff: no existing claim is ever stale
        let cutoff = stale_cutoff(now, stale_after);
        let result = sqlx::query(
            r#"
            UPDATE incidents SET stage = ?, claimed_at = ?
            WHERE number = ?
              AND (stage = ?
                   OR (stage = ? AND (claimed_at IS NULL OR claimed_at <= ?)))
            "#,
        )
        .bind(pending)
        .bind(claim_millis(now))
        .bind(number)
        .bind(kind.ready_stage().as_str())
        .bind(pending)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(
        &self,
        number: &str,
        kind: ArtifactKind,
        claimed_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.transition(number, kind.pending_stage(), kind.ready_stage(), claimed_at)
            .await
    }

    async fn complete(
        &self,
        number: &str,
        kind: ArtifactKind,
        claimed_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.transition(number, kind.pending_stage(), kind.done_stage(), claimed_at)
            .await
    }

    async fn list(&self, filter: &IncidentFilter) -> Result<Vec<Incident>> {
        let stage = filter.stage.map(|s| s.as_str());
        let limit = filter.limit.map(|l| l as i64).unwrap_or(-1);

        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM incidents
            WHERE (? IS NULL OR LOWER(priority) = LOWER(?))
              AND (? IS NULL OR stage = ?)
              AND (? = 0 OR stage != 'done')
            ORDER BY opened_at DESC, number ASC
            LIMIT ?
            "#,
            INCIDENT_COLUMNS
        ))
        .bind(&filter.priority)
        .bind(&filter.priority)
        .bind(stage)
        .bind(stage)
        .bind(filter.unfinished_only)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(incident_from_row).collect()
    }
}

/// SQLite implementation of [`SolutionStore`] over the `solutions` table.
#[derive(Clone)]
pub struct SqliteSolutionStore {
    pool: SqlitePool,
}

impl SqliteSolutionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// `(records, with_rca, with_solution)`.
    pub async fn counts(&self) -> Result<(i64, i64, i64)> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total, COUNT(rca) AS with_rca, COUNT(solution) AS with_solution \
             FROM solutions",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok((
            row.get("total"),
            row.get("with_rca"),
            row.get("with_solution"),
        ))
    }
}

#[async_trait]
impl SolutionStore for SqliteSolutionStore {
    async fn list_all(&self) -> Result<Vec<SolutionRecord>> {
        let rows = sqlx::query(
            "SELECT number, description, rca, solution, created_at FROM solutions \
             ORDER BY created_at ASC, number ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn get(&self, number: &str) -> Result<Option<SolutionRecord>> {
        let row = sqlx::query(
            "SELECT number, description, rca, solution, created_at FROM solutions WHERE number = ?",
        )
        .bind(number)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn put(&self, record: &SolutionRecord) -> Result<()> {
        // description and created_at keep their first-written values
        sqlx::query(
            r#"
            INSERT INTO solutions (number, description, rca, solution, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(number) DO UPDATE SET
                rca = COALESCE(excluded.rca, solutions.rca),
                solution = COALESCE(excluded.solution, solutions.solution)
            "#,
        )
        .bind(&record.number)
        .bind(&record.description)
        .bind(&record.rca)
        .bind(&record.solution)
        .bind(record.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
