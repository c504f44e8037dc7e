//! The `process` command: run or resume the pipeline for stored incidents.

use anyhow::{bail, Result};

use incident_rca_core::error::PipelineError;
use incident_rca_core::store::{IncidentFilter, IncidentStore};

use crate::config::Config;
use crate::progress::ProgressMode;
use crate::runner::{self, Job, Stores};

/// Process one incident by number, or every unfinished one with `pending`.
pub async fn run_process(
    config: &Config,
    number: Option<&str>,
    pending: bool,
    limit: Option<usize>,
    progress: ProgressMode,
) -> Result<()> {
    let stores = Stores::open(config).await?;
    let controller = runner::build_controller(config, &stores)?;

    let numbers: Vec<String> = match (number, pending) {
        (Some(number), false) => vec![number.to_string()],
        (None, true) => {
            let filter = IncidentFilter {
                unfinished_only: true,
                limit,
                ..Default::default()
            };
            stores
                .incidents
                .list(&filter)
                .await?
                .into_iter()
                .map(|i| i.number)
                .collect()
        }
        _ => bail!("specify exactly one of <NUMBER> or --pending"),
    };

    if numbers.is_empty() {
        println!("No pending incidents.");
        stores.close().await;
        return Ok(());
    }

    let jobs = numbers.iter().map(|n| Job::Resume(n.as_str())).collect();
    let results = runner::run_batch(&controller, jobs, progress.reporter().as_ref()).await;
    let failures = runner::print_reports(&results);

    stores.close().await;

    if let (Some(number), [(_, Err(PipelineError::NotFound(_)))]) = (number, results.as_slice()) {
        bail!("incident not found: {}", number);
    }
    if failures > 0 {
        tracing::warn!(failures, "some incidents did not finish; they will be retried");
    }
    Ok(())
}
