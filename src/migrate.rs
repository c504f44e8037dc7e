use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Safe to run repeatedly.
///
/// Timestamps are stored as Unix milliseconds.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Create incidents table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS incidents (
            number TEXT PRIMARY KEY,
            short_description TEXT NOT NULL,
            description TEXT,
            priority TEXT,
            business_service TEXT,
            opened_at INTEGER NOT NULL,
            stage TEXT NOT NULL DEFAULT 'intake',
            claimed_at INTEGER,
            ingested_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create solutions table, one row per incident number
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS solutions (
            number TEXT PRIMARY KEY,
            description TEXT NOT NULL,
            rca TEXT,
            solution TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_incidents_stage ON incidents(stage)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_incidents_opened_at ON incidents(opened_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_solutions_created_at ON solutions(created_at, number)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
