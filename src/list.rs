//! The `list` command: incidents with their stage, as a table or JSON.

use anyhow::Result;

use incident_rca_core::models::Stage;
use incident_rca_core::store::{IncidentFilter, IncidentStore};

use crate::config::Config;
use crate::runner::Stores;
use crate::stats::format_ts_iso;

pub async fn run_list(
    config: &Config,
    priority: Option<String>,
    stage: Option<Stage>,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let stores = Stores::open(config).await?;
    let filter = IncidentFilter {
        priority,
        stage,
        unfinished_only: false,
        limit,
    };
    let incidents = stores.incidents.list(&filter).await;
    stores.close().await;
    let incidents = incidents?;

    if json {
        println!("{}", serde_json::to_string_pretty(&incidents)?);
        return Ok(());
    }

    if incidents.is_empty() {
        println!("No incidents.");
        return Ok(());
    }

    println!(
        "{:<14} {:<18} {:<17} {:<16} {}",
        "NUMBER", "STAGE", "OPENED", "PRIORITY", "SUMMARY"
    );
    println!("{}", "-".repeat(100));
    for i in &incidents {
        println!(
            "{:<14} {:<18} {:<17} {:<16} {}",
            i.number,
            i.stage.as_str(),
            format_ts_iso(i.opened_at),
            i.priority.as_deref().unwrap_or("-"),
            truncate(&i.short_description, 48)
        );
    }
    println!();
    println!("{} incident(s)", incidents.len());

    Ok(())
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}
