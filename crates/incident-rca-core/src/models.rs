//! Core data models for incidents and their generated artifacts.
//!
//! An [`Incident`] moves through a small, forward-only [`Stage`] machine.
//! The two progress flags exposed by older tooling (`analysis_done`,
//! `solution_done`) are derived from the stage rather than stored, so they
//! can only ever flip from `false` to `true` once.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Processing stage of an incident.
///
/// ```text
/// Intake ──claim──▶ AnalysisPending ──complete──▶ AnalysisDone
///   ▲                    │                           │
///   └──────release───────┘                         claim
///                                                    ▼
///                 Done ◀──complete── SolutionPending ─┘ (release → AnalysisDone)
/// ```
///
/// A `*Pending` stage means some run has claimed the work; the claim time
/// is kept in [`Incident::claimed_at`] so abandoned claims can be taken over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Intake,
    AnalysisPending,
    AnalysisDone,
    SolutionPending,
    Done,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Intake,
        Stage::AnalysisPending,
        Stage::AnalysisDone,
        Stage::SolutionPending,
        Stage::Done,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Intake => "intake",
            Stage::AnalysisPending => "analysis_pending",
            Stage::AnalysisDone => "analysis_done",
            Stage::SolutionPending => "solution_pending",
            Stage::Done => "done",
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Stage::AnalysisPending | Stage::SolutionPending)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Unknown stage: '{}'. Must be one of intake, analysis_pending, analysis_done, solution_pending, done.",
                    s
                )
            })
    }
}

/// The two kinds of generated text an incident accumulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Root-cause analysis.
    Analysis,
    /// Remediation steps.
    Solution,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Analysis => "analysis",
            ArtifactKind::Solution => "solution",
        }
    }

    /// Stage an incident must be in before this kind can be claimed.
    pub fn ready_stage(&self) -> Stage {
        match self {
            ArtifactKind::Analysis => Stage::Intake,
            ArtifactKind::Solution => Stage::AnalysisDone,
        }
    }

    /// Stage held while a run is producing this kind.
    pub fn pending_stage(&self) -> Stage {
        match self {
            ArtifactKind::Analysis => Stage::AnalysisPending,
            ArtifactKind::Solution => Stage::SolutionPending,
        }
    }

    /// Stage reached once this kind is stored.
    pub fn done_stage(&self) -> Stage {
        match self {
            ArtifactKind::Analysis => Stage::AnalysisDone,
            ArtifactKind::Solution => Stage::Done,
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "analysis" | "rca" => Ok(ArtifactKind::Analysis),
            "solution" => Ok(ArtifactKind::Solution),
            other => anyhow::bail!(
                "Unknown artifact kind: '{}'. Must be analysis or solution.",
                other
            ),
        }
    }
}

/// An incident as ingested from the upstream ticketing system.
///
/// Identity is the ticket `number`, which is assigned upstream and never
/// changes. Incidents are never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub number: String,
    pub short_description: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub business_service: Option<String>,
    pub opened_at: DateTime<Utc>,
    #[serde(default = "default_stage")]
    pub stage: Stage,
    #[serde(default)]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default = "Utc::now")]
    pub ingested_at: DateTime<Utc>,
}

fn default_stage() -> Stage {
    Stage::Intake
}

impl Incident {
    /// A freshly ingested incident with only the required fields set.
    pub fn new(
        number: impl Into<String>,
        short_description: impl Into<String>,
        opened_at: DateTime<Utc>,
    ) -> Self {
        Self {
            number: number.into(),
            short_description: short_description.into(),
            description: None,
            priority: None,
            business_service: None,
            opened_at,
            stage: Stage::Intake,
            claimed_at: None,
            ingested_at: Utc::now(),
        }
    }

    pub fn analysis_done(&self) -> bool {
        self.stage >= Stage::AnalysisDone
    }

    pub fn solution_done(&self) -> bool {
        self.stage == Stage::Done
    }

    pub fn is_done(&self, kind: ArtifactKind) -> bool {
        match kind {
            ArtifactKind::Analysis => self.analysis_done(),
            ArtifactKind::Solution => self.solution_done(),
        }
    }
}

/// Generated artifacts for one incident, keyed by incident number.
///
/// `description` is the text that gets embedded for similarity lookups.
/// `created_at` is fixed by the first write and drives staleness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionRecord {
    pub number: String,
    pub description: String,
    pub rca: Option<String>,
    pub solution: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SolutionRecord {
    pub fn new(
        number: impl Into<String>,
        description: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            number: number.into(),
            description: description.into(),
            rca: None,
            solution: None,
            created_at,
        }
    }

    pub fn artifact(&self, kind: ArtifactKind) -> Option<&str> {
        match kind {
            ArtifactKind::Analysis => self.rca.as_deref(),
            ArtifactKind::Solution => self.solution.as_deref(),
        }
    }

    pub fn with_artifact(mut self, kind: ArtifactKind, text: impl Into<String>) -> Self {
        match kind {
            ArtifactKind::Analysis => self.rca = Some(text.into()),
            ArtifactKind::Solution => self.solution = Some(text.into()),
        }
        self
    }

    /// Fold `incoming` into this record.
    ///
    /// Identity, description and creation time stay as first written;
    /// artifacts present in `incoming` replace stored ones, absent ones
    /// never erase.
    pub fn merge(&mut self, incoming: &SolutionRecord) {
        if incoming.rca.is_some() {
            self.rca = incoming.rca.clone();
        }
        if incoming.solution.is_some() {
            self.solution = incoming.solution.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_follow_stage() {
        let mut incident = Incident::new("INC0001", "disk full on node A", Utc::now());
        assert!(!incident.analysis_done());
        assert!(!incident.solution_done());

        incident.stage = Stage::AnalysisPending;
        assert!(!incident.analysis_done());

        incident.stage = Stage::SolutionPending;
        assert!(incident.analysis_done());
        assert!(!incident.solution_done());

        incident.stage = Stage::Done;
        assert!(incident.is_done(ArtifactKind::Analysis));
        assert!(incident.is_done(ArtifactKind::Solution));
    }

    #[test]
    fn test_stage_parse_roundtrip() {
        for stage in Stage::ALL {
            assert_eq!(stage.as_str().parse::<Stage>().unwrap(), stage);
        }
        assert!("finished".parse::<Stage>().is_err());
    }

    #[test]
    fn test_kind_stage_chain() {
        assert_eq!(
            ArtifactKind::Analysis.done_stage(),
            ArtifactKind::Solution.ready_stage()
        );
        assert_eq!(ArtifactKind::Solution.done_stage(), Stage::Done);
    }

    #[test]
    fn test_merge_keeps_identity_and_artifacts() {
        let created = Utc::now();
        let mut stored = SolutionRecord::new("INC1", "db timeout", created)
            .with_artifact(ArtifactKind::Analysis, "pool exhausted");
        let incoming = SolutionRecord::new("INC1", "other text", Utc::now())
            .with_artifact(ArtifactKind::Solution, "raise pool size");

        stored.merge(&incoming);

        assert_eq!(stored.description, "db timeout");
        assert_eq!(stored.created_at, created);
        assert_eq!(stored.rca.as_deref(), Some("pool exhausted"));
        assert_eq!(stored.solution.as_deref(), Some("raise pool size"));
    }
}
