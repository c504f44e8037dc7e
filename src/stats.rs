//! Database statistics and health overview.
//!
//! Provides a quick summary of pipeline progress: incidents per stage,
//! how many have artifacts stored, and how many claims look abandoned.
//! Used by `rca stats` to confirm the pipeline is draining.

use anyhow::Result;
use chrono::{DateTime, Utc};

use incident_rca_core::models::Stage;
use incident_rca_core::store::{IncidentFilter, IncidentStore};

use crate::config::Config;
use crate::runner::Stores;

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let stores = Stores::open(config).await?;

    let by_stage = stores.incidents.count_by_stage().await?;
    let (records, with_rca, with_solution) = stores.solutions.counts().await?;

    let now = Utc::now();
    let stale_after = config.pipeline_params().claim_timeout;
    let stale_claims = stores
        .incidents
        .list(&IncidentFilter {
            unfinished_only: true,
            ..Default::default()
        })
        .await?
        .into_iter()
        .filter(|i| i.stage.is_pending())
        .filter(|i| i.claimed_at.is_some_and(|at| now - at >= stale_after))
        .count();

    stores.close().await;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);
    let total: i64 = by_stage.iter().map(|(_, n)| n).sum();

    println!("Incident RCA: Database Stats");
    println!("=============================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Incidents:   {}", total);
    for stage in Stage::ALL {
        let n = by_stage
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, n)| *n)
            .unwrap_or(0);
        println!("    {:<18} {:>6}", stage.as_str(), n);
    }
    if stale_claims > 0 {
        println!("  Stale claims: {}", stale_claims);
    }
    println!();
    println!("  Records:     {}", records);
    println!("    with rca         {:>6}", with_rca);
    println!("    with solution    {:>6}", with_solution);
    println!();

    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

pub(crate) fn format_ts_iso(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M").to_string()
}
