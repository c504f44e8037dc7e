//! Incident retrieval by number.
//!
//! Fetches an incident with its stage and any generated artifacts. Used by
//! `rca show`.

use anyhow::{bail, Result};
use serde::Serialize;

use incident_rca_core::models::Incident;
use incident_rca_core::store::{IncidentStore, SolutionStore};

use crate::config::Config;
use crate::runner::Stores;
use crate::stats::format_ts_iso;

/// An incident together with its stored artifacts.
#[derive(Debug, Clone, Serialize)]
pub struct IncidentView {
    #[serde(flatten)]
    pub incident: Incident,
    pub rca: Option<String>,
    pub solution: Option<String>,
}

/// Load one incident and its artifacts.
pub async fn get_incident(stores: &Stores, number: &str) -> Result<IncidentView> {
    let incident = match stores.incidents.get(number).await? {
        Some(i) => i,
        None => bail!("incident not found: {}", number),
    };
    let record = stores.solutions.get(number).await?;

    Ok(IncidentView {
        incident,
        rca: record.as_ref().and_then(|r| r.rca.clone()),
        solution: record.and_then(|r| r.solution),
    })
}

/// Run the `show` command.
pub async fn run_show(config: &Config, number: &str, json: bool) -> Result<()> {
    let stores = Stores::open(config).await?;
    let view = get_incident(&stores, number).await;
    stores.close().await;
    let view = view?;

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    let i = &view.incident;
    println!("--- Incident ---");
    println!("number:       {}", i.number);
    println!("summary:      {}", i.short_description);
    println!("priority:     {}", i.priority.as_deref().unwrap_or("-"));
    println!(
        "service:      {}",
        i.business_service.as_deref().unwrap_or("-")
    );
    println!("opened_at:    {}", format_ts_iso(i.opened_at));
    println!("stage:        {}", i.stage);
    if let Some(claimed) = i.claimed_at {
        println!("claimed_at:   {}", format_ts_iso(claimed));
    }
    if let Some(ref desc) = i.description {
        println!();
        println!("--- Description ---");
        println!("{}", desc);
    }

    println!();
    println!("--- Root Cause Analysis ---");
    println!("{}", view.rca.as_deref().unwrap_or("(not generated yet)"));
    println!();
    println!("--- Solution ---");
    println!("{}", view.solution.as_deref().unwrap_or("(not generated yet)"));

    Ok(())
}
