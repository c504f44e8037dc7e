//! Incident intake from JSON exports.
//!
//! Reads a JSON array of ticket records (the shape a ServiceNow or
//! Salesforce export produces), applies the duplicate-ingestion guard to
//! each, and optionally runs the pipeline for the ones that were new.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use std::path::Path;

use incident_rca_core::models::Incident;
use incident_rca_core::error::PipelineError;
use incident_rca_core::pipeline::{IntakeStatus, RunReport};
use incident_rca_core::store::IncidentStore;

use crate::config::Config;
use crate::progress::ProgressMode;
use crate::runner::{self, Job, Stores};

/// One record of an intake file. Only `number` and `short_description`
/// are required.
#[derive(Debug, Clone, Deserialize)]
pub struct IncidentInput {
    pub number: String,
    pub short_description: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub business_service: Option<String>,
    /// RFC 3339, or ServiceNow's `YYYY-MM-DD HH:MM:SS` (UTC).
    #[serde(default)]
    pub opened_at: Option<String>,
}

/// Parse a ticket timestamp.
pub fn parse_opened_at(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .with_context(|| format!("unrecognized timestamp: '{}'", raw))?;
    Ok(naive.and_utc())
}

impl IncidentInput {
    pub fn into_incident(self) -> Result<Incident> {
        if self.number.trim().is_empty() {
            bail!("incident number must not be empty");
        }
        // descriptions without a word all embed to the same vector
        if !self.short_description.chars().any(char::is_alphanumeric) {
            bail!(
                "{}: short_description must contain at least one letter or digit",
                self.number
            );
        }
        let opened_at = match self.opened_at.as_deref() {
            Some(raw) => parse_opened_at(raw).with_context(|| format!("{}: opened_at", self.number))?,
            None => Utc::now(),
        };

        let mut incident = Incident::new(self.number.trim(), self.short_description, opened_at);
        incident.description = self.description;
        incident.priority = self.priority;
        incident.business_service = self.business_service;
        Ok(incident)
    }
}

/// Parse an intake file's contents.
pub fn parse_incidents(content: &str) -> Result<Vec<Incident>> {
    let inputs: Vec<IncidentInput> =
        serde_json::from_str(content).context("intake file must be a JSON array of incidents")?;
    inputs.into_iter().map(IncidentInput::into_incident).collect()
}

/// Counts printed by `rca intake --process`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntakeTally {
    pub accepted: usize,
    pub skipped: usize,
    /// Runs that errored before their intake status was known.
    pub failed: usize,
}

impl IntakeTally {
    /// `total` is the number of incidents in the file; numbers already
    /// stored never reach `results` and count as skipped.
    pub fn from_results(
        total: usize,
        results: &[(String, Result<RunReport, PipelineError>)],
    ) -> Self {
        let accepted = results
            .iter()
            .filter(|(_, r)| matches!(r, Ok(report) if report.intake == IntakeStatus::Accepted))
            .count();
        let failed = results.iter().filter(|(_, r)| r.is_err()).count();
        Self {
            accepted,
            skipped: total.saturating_sub(accepted + failed),
            failed,
        }
    }
}

/// Run the `intake` command.
pub async fn run_intake(
    config: &Config,
    file: &Path,
    process: bool,
    progress: ProgressMode,
) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read intake file: {}", file.display()))?;
    let incidents = parse_incidents(&content)?;

    let stores = Stores::open(config).await?;

    if !process {
        let mut accepted = 0;
        for incident in &incidents {
            if stores.incidents.insert_if_absent(incident).await? {
                accepted += 1;
            }
        }
        println!("intake {}", file.display());
        println!("  accepted: {}", accepted);
        println!("  skipped duplicates: {}", incidents.len() - accepted);
        stores.close().await;
        return Ok(());
    }

    let controller = runner::build_controller(config, &stores)?;

    let mut fresh = Vec::new();
    for incident in &incidents {
        if stores.incidents.get(&incident.number).await?.is_none() {
            fresh.push(Job::Run(incident));
        }
    }

    let results = runner::run_batch(&controller, fresh, progress.reporter().as_ref()).await;
    let tally = IntakeTally::from_results(incidents.len(), &results);

    println!("intake {}", file.display());
    println!("  accepted: {}", tally.accepted);
    println!("  skipped duplicates: {}", tally.skipped);
    if tally.failed > 0 {
        println!("  failed: {}", tally.failed);
    }
    println!();
    runner::print_reports(&results);

    stores.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_servicenow_export() {
        let incidents = parse_incidents(
            r#"[
                {"number": "INC0010001", "short_description": "Disk full on node A",
                 "priority": "1 - Critical", "business_service": "Storage",
                 "opened_at": "2025-03-04 05:06:07"},
                {"number": "INC0010002", "short_description": "Login returns 500",
                 "opened_at": "2025-03-05T10:00:00+02:00"}
            ]"#,
        )
        .unwrap();

        assert_eq!(incidents.len(), 2);
        assert_eq!(incidents[0].priority.as_deref(), Some("1 - Critical"));
        assert_eq!(incidents[0].opened_at.day(), 4);
        assert_eq!(incidents[0].opened_at.hour(), 5);
        assert_eq!(incidents[1].opened_at.hour(), 8);
        assert!(!incidents[1].analysis_done());
    }

    #[test]
    fn test_rejects_missing_description() {
        assert!(parse_incidents(r#"[{"number": "INC1", "short_description": "  "}]"#).is_err());
        assert!(parse_incidents(r#"{"number": "INC1"}"#).is_err());
    }

    #[test]
    fn test_rejects_description_without_words() {
        for summary in ["---", "???", " !! "] {
            let json = format!(
                r#"[{{"number": "INC1", "short_description": "{}"}}]"#,
                summary
            );
            let err = parse_incidents(&json).unwrap_err();
            assert!(err.to_string().contains("letter or digit"), "{}", summary);
        }
        assert!(parse_incidents(r#"[{"number": "INC1", "short_description": "502"}]"#).is_ok());
    }

    #[test]
    fn test_tally_counts_failed_runs_apart_from_duplicates() {
        use incident_rca_core::models::ArtifactKind;
        use incident_rca_core::pipeline::{StageReport, StageStatus};

        let report = |number: &str, intake: IntakeStatus| RunReport {
            number: number.to_string(),
            intake,
            analysis: StageReport {
                kind: ArtifactKind::Analysis,
                status: StageStatus::AlreadyDone,
                text: None,
            },
            solution: StageReport {
                kind: ArtifactKind::Solution,
                status: StageStatus::AlreadyDone,
                text: None,
            },
        };
        let results = vec![
            ("INC1".to_string(), Ok(report("INC1", IntakeStatus::Accepted))),
            ("INC2".to_string(), Ok(report("INC2", IntakeStatus::SkippedDuplicate))),
            (
                "INC3".to_string(),
                Err(PipelineError::Store(anyhow::anyhow!("database is locked"))),
            ),
        ];

        // five in the file, one already stored before the batch
        let tally = IntakeTally::from_results(5, &results);
        assert_eq!(
            tally,
            IntakeTally {
                accepted: 1,
                skipped: 3,
                failed: 1
            }
        );
    }

    #[test]
    fn test_rejects_bad_timestamp() {
        let err = parse_incidents(
            r#"[{"number": "INC1", "short_description": "x", "opened_at": "yesterday"}]"#,
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("INC1"));
    }
}
