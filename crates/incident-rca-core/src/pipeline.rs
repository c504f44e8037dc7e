//! Pipeline controller: drive one incident through intake, analysis and
//! solution, doing each stage at most once.
//!
//! # Stage order
//!
//! For each [`ArtifactKind`]:
//!
//! 1. Guard on the derived flag; a finished stage is [`StageStatus::AlreadyDone`].
//! 2. CAS claim. A lost claim defers the stage to whoever holds it.
//! 3. Recovery: a run that stored the artifact but crashed before the
//!    flag flip left the text in the incident's own record; adopt it.
//! 4. Cache decision over the records that carry this artifact.
//! 5. Hit: adopt the matched text, or in [`ReuseMode::Context`] pass it to
//!    the generator.
//! 6. Miss: call the generator. The solution generator always sees the
//!    incident's stored analysis.
//! 7. Merge the text into the solution store.
//! 8. CAS complete.
//!
//! A failure after the claim releases it so the next run retries the
//! stage. Failures never cross the incident boundary: callers get a
//! [`StageReport`] per stage.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::{self, CacheDecision, CacheHit, CachePolicy};
use crate::embedding::Embedder;
use crate::error::{GenerationError, PipelineError};
use crate::generator::Generator;
use crate::models::{ArtifactKind, Incident, SolutionRecord, Stage};
use crate::store::{IncidentStore, SolutionStore};

/// What to do with a cache hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReuseMode {
    /// Store the matched text as this incident's artifact.
    #[default]
    Adopt,
    /// Generate anyway, passing the matched text as context.
    Context,
}

impl FromStr for ReuseMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "adopt" => Ok(ReuseMode::Adopt),
            "context" => Ok(ReuseMode::Context),
            other => anyhow::bail!(
                "Unknown reuse mode: '{}'. Must be adopt or context.",
                other
            ),
        }
    }
}

/// Tunables for [`PipelineController`].
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineParams {
    pub policy: CachePolicy,
    pub reuse_mode: ReuseMode,
    /// Age after which a pending claim is considered abandoned.
    pub claim_timeout: Duration,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            policy: CachePolicy::default(),
            reuse_mode: ReuseMode::Adopt,
            claim_timeout: Duration::seconds(900),
        }
    }
}

/// Result of the duplicate-ingestion guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeStatus {
    Accepted,
    SkippedDuplicate,
}

impl fmt::Display for IntakeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntakeStatus::Accepted => f.write_str("accepted"),
            IntakeStatus::SkippedDuplicate => f.write_str("skipped-duplicate"),
        }
    }
}

/// Where a successful stage got its text.
#[derive(Debug, Clone, PartialEq)]
pub enum StageSource {
    /// Adopted from a similar incident's record.
    Reused { from: String, similarity: f32 },
    Generated,
    /// Found already stored for this incident by an interrupted run.
    Recovered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferReason {
    /// Another run holds the claim.
    ClaimHeld,
    /// The solution stage waits for the analysis.
    AnalysisIncomplete,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StageStatus {
    Succeeded(StageSource),
    AlreadyDone,
    Deferred(DeferReason),
    Failed(String),
}

impl StageStatus {
    /// True when the stage's artifact is stored and its flag is set.
    pub fn is_done(&self) -> bool {
        matches!(self, StageStatus::Succeeded(_) | StageStatus::AlreadyDone)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StageStatus::Failed(_))
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageStatus::Succeeded(StageSource::Reused { from, similarity }) => {
                write!(f, "reused from {} (similarity {:.3})", from, similarity)
            }
            StageStatus::Succeeded(StageSource::Generated) => f.write_str("generated"),
            StageStatus::Succeeded(StageSource::Recovered) => f.write_str("recovered"),
            StageStatus::AlreadyDone => f.write_str("already done"),
            StageStatus::Deferred(DeferReason::ClaimHeld) => {
                f.write_str("deferred (claimed by another run)")
            }
            StageStatus::Deferred(DeferReason::AnalysisIncomplete) => {
                f.write_str("deferred (analysis incomplete)")
            }
            StageStatus::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Outcome of one stage for one incident.
#[derive(Debug, Clone, PartialEq)]
pub struct StageReport {
    pub kind: ArtifactKind,
    pub status: StageStatus,
    /// The stored artifact text, when known.
    pub text: Option<String>,
}

impl StageReport {
    fn new(kind: ArtifactKind, status: StageStatus) -> Self {
        Self {
            kind,
            status,
            text: None,
        }
    }

    fn with_text(mut self, text: Option<String>) -> Self {
        self.text = text;
        self
    }
}

/// Outcome of a whole run for one incident.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub number: String,
    pub intake: IntakeStatus,
    pub analysis: StageReport,
    pub solution: StageReport,
}

impl RunReport {
    pub fn is_complete(&self) -> bool {
        self.analysis.status.is_done() && self.solution.status.is_done()
    }

    pub fn has_failure(&self) -> bool {
        self.analysis.status.is_failed() || self.solution.status.is_failed()
    }
}

/// Orchestrates the stages over pluggable stores, embedder and generators.
pub struct PipelineController {
    incidents: Arc<dyn IncidentStore>,
    solutions: Arc<dyn SolutionStore>,
    embedder: Arc<dyn Embedder>,
    analysis_generator: Arc<dyn Generator>,
    solution_generator: Arc<dyn Generator>,
    params: PipelineParams,
}

impl PipelineController {
    pub fn new(
        incidents: Arc<dyn IncidentStore>,
        solutions: Arc<dyn SolutionStore>,
        embedder: Arc<dyn Embedder>,
        analysis_generator: Arc<dyn Generator>,
        solution_generator: Arc<dyn Generator>,
        params: PipelineParams,
    ) -> Self {
        Self {
            incidents,
            solutions,
            embedder,
            analysis_generator,
            solution_generator,
            params,
        }
    }

    pub fn params(&self) -> &PipelineParams {
        &self.params
    }

    /// Store `incident` unless its number is already known.
    ///
    /// The stored copy always starts at [`Stage::Intake`] with no claim,
    /// whatever the caller's struct says.
    pub async fn intake(&self, incident: &Incident) -> Result<IntakeStatus, PipelineError> {
        let mut fresh = incident.clone();
        fresh.stage = Stage::Intake;
        fresh.claimed_at = None;

        if self.incidents.insert_if_absent(&fresh).await? {
            info!(number = %incident.number, "incident accepted");
            Ok(IntakeStatus::Accepted)
        } else {
            debug!(number = %incident.number, "incident already ingested");
            Ok(IntakeStatus::SkippedDuplicate)
        }
    }

    /// Produce the root-cause analysis for `incident`.
    pub async fn process_analysis(
        &self,
        incident: &Incident,
        corpus: &[SolutionRecord],
    ) -> StageReport {
        self.process_stage(ArtifactKind::Analysis, incident, corpus)
            .await
    }

    /// Produce the remediation for `incident`. Deferred until its analysis
    /// is done.
    pub async fn process_solution(
        &self,
        incident: &Incident,
        corpus: &[SolutionRecord],
    ) -> StageReport {
        if !incident.analysis_done() {
            let report = StageReport::new(
                ArtifactKind::Solution,
                StageStatus::Deferred(DeferReason::AnalysisIncomplete),
            );
            log_stage(&incident.number, &report);
            return report;
        }
        self.process_stage(ArtifactKind::Solution, incident, corpus)
            .await
    }

    /// Intake `incident`, then run both stages against the stored copy.
    ///
    /// A duplicate is not an error: its stages still run, and the flag
    /// guards make that a no-op for finished work.
    pub async fn run(&self, incident: &Incident) -> Result<RunReport, PipelineError> {
        let intake = self.intake(incident).await?;
        self.drive(&incident.number, intake).await
    }

    /// Run the remaining stages of an incident that is already stored.
    pub async fn resume(&self, number: &str) -> Result<RunReport, PipelineError> {
        self.drive(number, IntakeStatus::SkippedDuplicate).await
    }

    async fn drive(&self, number: &str, intake: IntakeStatus) -> Result<RunReport, PipelineError> {
        let incident = self.load(number).await?;

        let corpus = self.solutions.list_all().await?;
        let analysis = self.process_analysis(&incident, &corpus).await;

        let solution = if analysis.status.is_done() || incident.analysis_done() {
            match self.snapshot(number).await {
                Ok((incident, corpus)) => self.process_solution(&incident, &corpus).await,
                Err(e) => StageReport::new(
                    ArtifactKind::Solution,
                    StageStatus::Failed(format!("{:#}", e)),
                ),
            }
        } else {
            let report = StageReport::new(
                ArtifactKind::Solution,
                StageStatus::Deferred(DeferReason::AnalysisIncomplete),
            );
            log_stage(number, &report);
            report
        };

        Ok(RunReport {
            number: number.to_string(),
            intake,
            analysis,
            solution,
        })
    }

    async fn load(&self, number: &str) -> Result<Incident, PipelineError> {
        self.incidents
            .get(number)
            .await?
            .ok_or_else(|| PipelineError::NotFound(number.to_string()))
    }

    /// Reload the incident and take a fresh corpus snapshot.
    async fn snapshot(&self, number: &str) -> Result<(Incident, Vec<SolutionRecord>), PipelineError> {
        let incident = self.load(number).await?;
        let corpus = self.solutions.list_all().await?;
        Ok((incident, corpus))
    }

    async fn process_stage(
        &self,
        kind: ArtifactKind,
        incident: &Incident,
        corpus: &[SolutionRecord],
    ) -> StageReport {
        let number = incident.number.as_str();

        let report = if incident.is_done(kind) {
            self.already_done(kind, number).await
        } else {
            self.claim_and_produce(kind, incident, corpus).await
        };

        log_stage(number, &report);
        report
    }

    async fn claim_and_produce(
        &self,
        kind: ArtifactKind,
        incident: &Incident,
        corpus: &[SolutionRecord],
    ) -> StageReport {
        let number = incident.number.as_str();
        let claimed_at = Utc::now();

        match self
            .incidents
            .claim(number, kind, claimed_at, self.params.claim_timeout)
            .await
        {
            Ok(true) => {}
            Ok(false) => return self.claim_lost(kind, number).await,
            Err(e) => return StageReport::new(kind, StageStatus::Failed(format!("{:#}", e))),
        }

        let (source, text) = match self.produce(kind, incident, corpus, claimed_at).await {
            Ok(produced) => produced,
            Err(reason) => {
                self.release(kind, number, claimed_at).await;
                return StageReport::new(kind, StageStatus::Failed(reason));
            }
        };

        match self.incidents.complete(number, kind, claimed_at).await {
            Ok(true) => StageReport::new(kind, StageStatus::Succeeded(source)).with_text(Some(text)),
            Ok(false) => {
                // stored, but a takeover owns the flag now; it will recover the text
                warn!(number, stage = %kind, "claim taken over before completion");
                StageReport::new(kind, StageStatus::Deferred(DeferReason::ClaimHeld))
                    .with_text(Some(text))
            }
            Err(e) => {
                self.release(kind, number, claimed_at).await;
                StageReport::new(kind, StageStatus::Failed(format!("{:#}", e)))
            }
        }
    }

    /// Steps 3 to 7: recover, consult the cache, generate, store.
    async fn produce(
        &self,
        kind: ArtifactKind,
        incident: &Incident,
        corpus: &[SolutionRecord],
        now: DateTime<Utc>,
    ) -> Result<(StageSource, String), String> {
        let number = incident.number.as_str();
        let own = self
            .solutions
            .get(number)
            .await
            .map_err(|e| format!("{:#}", e))?;

        if let Some(text) = own.as_ref().and_then(|r| r.artifact(kind)) {
            debug!(number, stage = %kind, "recovering stored artifact");
            return Ok((StageSource::Recovered, text.to_string()));
        }

        let hit = self.consult_cache(kind, incident, corpus, now).await;

        let mut similar = None;
        if let Some(hit) = hit {
            if let Some(text) = hit.record.artifact(kind) {
                match self.params.reuse_mode {
                    ReuseMode::Adopt => {
                        let source = StageSource::Reused {
                            from: hit.record.number.clone(),
                            similarity: hit.similarity,
                        };
                        let text = text.to_string();
                        self.store(kind, incident, &text, now).await?;
                        return Ok((source, text));
                    }
                    ReuseMode::Context => similar = Some(text.to_string()),
                }
            }
        }

        let own_analysis = match kind {
            ArtifactKind::Analysis => None,
            ArtifactKind::Solution => own.as_ref().and_then(|r| r.rca.clone()),
        };
        let context = build_context(kind, own_analysis.as_deref(), similar.as_deref());

        let generator = match kind {
            ArtifactKind::Analysis => &self.analysis_generator,
            ArtifactKind::Solution => &self.solution_generator,
        };
        debug!(number, stage = %kind, generator = generator.name(), "generating");
        let text = generator
            .generate(incident, context.as_deref())
            .await
            .and_then(|text| {
                if text.trim().is_empty() {
                    Err(GenerationError::EmptyResponse)
                } else {
                    Ok(text)
                }
            })
            .map_err(|e| e.to_string())?;

        self.store(kind, incident, &text, now).await?;
        Ok((StageSource::Generated, text))
    }

    async fn consult_cache(
        &self,
        kind: ArtifactKind,
        incident: &Incident,
        corpus: &[SolutionRecord],
        now: DateTime<Utc>,
    ) -> Option<CacheHit> {
        let candidates: Vec<SolutionRecord> = corpus
            .iter()
            .filter(|r| r.number != incident.number && r.artifact(kind).is_some())
            .cloned()
            .collect();

        match cache::evaluate(
            self.embedder.as_ref(),
            &incident.short_description,
            &candidates,
            &self.params.policy,
            now,
        )
        .await
        {
            Ok(CacheDecision::Hit(hit)) => Some(hit),
            Ok(CacheDecision::Miss(reason)) => {
                debug!(number = %incident.number, stage = %kind, ?reason, "no reusable record");
                None
            }
            Err(e) => {
                warn!(
                    number = %incident.number,
                    stage = %kind,
                    error = %e,
                    "cache lookup failed, generating fresh"
                );
                None
            }
        }
    }

    async fn store(
        &self,
        kind: ArtifactKind,
        incident: &Incident,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<(), String> {
        let record = SolutionRecord::new(&incident.number, &incident.short_description, now)
            .with_artifact(kind, text);
        self.solutions
            .put(&record)
            .await
            .map_err(|e| format!("{:#}", e))
    }

    async fn release(&self, kind: ArtifactKind, number: &str, claimed_at: DateTime<Utc>) {
        match self.incidents.release(number, kind, claimed_at).await {
            Ok(true) => {}
            Ok(false) => debug!(number, stage = %kind, "claim already gone at release"),
            Err(e) => warn!(number, stage = %kind, error = %e, "failed to release claim"),
        }
    }

    /// A claim failed: either the work finished elsewhere or someone holds it.
    async fn claim_lost(&self, kind: ArtifactKind, number: &str) -> StageReport {
        match self.incidents.get(number).await {
            Ok(Some(current)) if current.is_done(kind) => self.already_done(kind, number).await,
            Ok(Some(current)) if kind == ArtifactKind::Solution && !current.analysis_done() => {
                StageReport::new(kind, StageStatus::Deferred(DeferReason::AnalysisIncomplete))
            }
            Ok(Some(_)) => StageReport::new(kind, StageStatus::Deferred(DeferReason::ClaimHeld)),
            Ok(None) => StageReport::new(
                kind,
                StageStatus::Failed(PipelineError::NotFound(number.to_string()).to_string()),
            ),
            Err(e) => StageReport::new(kind, StageStatus::Failed(format!("{:#}", e))),
        }
    }

    /// Read back the stored text without writing anything.
    async fn already_done(&self, kind: ArtifactKind, number: &str) -> StageReport {
        let text = match self.solutions.get(number).await {
            Ok(record) => record.and_then(|r| r.artifact(kind).map(str::to_string)),
            Err(e) => {
                warn!(number, stage = %kind, error = %e, "could not read stored artifact");
                None
            }
        };
        StageReport::new(kind, StageStatus::AlreadyDone).with_text(text)
    }
}

fn build_context(
    kind: ArtifactKind,
    own_analysis: Option<&str>,
    similar: Option<&str>,
) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(rca) = own_analysis {
        parts.push(format!("Root cause analysis for this incident:\n{}", rca));
    }
    if let Some(similar) = similar {
        parts.push(format!("{} from a similar past incident:\n{}", label(kind), similar));
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n\n"))
    }
}

fn label(kind: ArtifactKind) -> &'static str {
    match kind {
        ArtifactKind::Analysis => "Root cause analysis",
        ArtifactKind::Solution => "Remediation",
    }
}

fn log_stage(number: &str, report: &StageReport) {
    match report.status {
        StageStatus::Failed(_) => {
            warn!(number, stage = %report.kind, status = %report.status, "stage failed")
        }
        _ => info!(number, stage = %report.kind, status = %report.status, "stage finished"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{InMemoryIncidentStore, InMemorySolutionStore};
    use crate::testing::{CountingEmbedder, ScriptedGenerator};
    use pretty_assertions::assert_eq;

    struct Harness {
        controller: PipelineController,
        incidents: Arc<InMemoryIncidentStore>,
        solutions: Arc<InMemorySolutionStore>,
        analyst: Arc<ScriptedGenerator>,
        fixer: Arc<ScriptedGenerator>,
    }

    fn harness_with(embedder: CountingEmbedder, params: PipelineParams) -> Harness {
        let incidents = Arc::new(InMemoryIncidentStore::new());
        let solutions = Arc::new(InMemorySolutionStore::new());
        let analyst = Arc::new(ScriptedGenerator::new("analysis"));
        let fixer = Arc::new(ScriptedGenerator::new("solution"));
        let controller = PipelineController::new(
            incidents.clone(),
            solutions.clone(),
            Arc::new(embedder),
            analyst.clone(),
            fixer.clone(),
            params,
        );
        Harness {
            controller,
            incidents,
            solutions,
            analyst,
            fixer,
        }
    }

    fn harness() -> Harness {
        harness_with(CountingEmbedder::new(), PipelineParams::default())
    }

    fn incident(number: &str, desc: &str) -> Incident {
        Incident::new(number, desc, Utc::now())
    }

    #[tokio::test]
    async fn test_run_generates_both_stages() {
        let h = harness();
        let report = h
            .controller
            .run(&incident("INC1", "disk full on node A"))
            .await
            .unwrap();

        assert_eq!(report.intake, IntakeStatus::Accepted);
        assert_eq!(
            report.analysis.status,
            StageStatus::Succeeded(StageSource::Generated)
        );
        assert_eq!(
            report.solution.status,
            StageStatus::Succeeded(StageSource::Generated)
        );
        assert!(report.is_complete());

        let stored = h.incidents.get("INC1").await.unwrap().unwrap();
        assert_eq!(stored.stage, Stage::Done);
        let record = h.solutions.get("INC1").await.unwrap().unwrap();
        assert_eq!(record.rca.as_deref(), Some("analysis for INC1"));
        assert_eq!(record.solution.as_deref(), Some("solution for INC1"));

        let contexts = h.fixer.contexts();
        assert_eq!(contexts.len(), 1);
        assert!(contexts[0]
            .as_deref()
            .unwrap()
            .contains("analysis for INC1"));
    }

    #[tokio::test]
    async fn test_process_analysis_twice_generates_once() {
        let h = harness();
        let inc = incident("INC1", "cert expired on gateway");
        h.controller.intake(&inc).await.unwrap();

        // the same, now stale, struct both times
        let first = h.controller.process_analysis(&inc, &[]).await;
        let second = h.controller.process_analysis(&inc, &[]).await;

        assert_eq!(h.analyst.calls(), 1);
        assert_eq!(first.status, StageStatus::Succeeded(StageSource::Generated));
        assert_eq!(second.status, StageStatus::AlreadyDone);
        assert_eq!(second.text, first.text);
    }

    #[tokio::test]
    async fn test_finished_analysis_is_a_pure_noop() {
        let h = harness();
        let inc = incident("INC0001", "queue backlog on billing");
        h.controller.intake(&inc).await.unwrap();
        let t = Utc::now();
        h.incidents
            .claim("INC0001", ArtifactKind::Analysis, t, Duration::minutes(15))
            .await
            .unwrap();
        h.incidents
            .complete("INC0001", ArtifactKind::Analysis, t)
            .await
            .unwrap();
        let stored = h.incidents.get("INC0001").await.unwrap().unwrap();
        let incident_writes = h.incidents.writes();
        let solution_writes = h.solutions.writes();

        let report = h.controller.process_analysis(&stored, &[]).await;

        assert_eq!(report.status, StageStatus::AlreadyDone);
        assert_eq!(h.analyst.calls(), 0);
        assert_eq!(h.incidents.writes(), incident_writes);
        assert_eq!(h.solutions.writes(), solution_writes);
    }

    #[tokio::test]
    async fn test_failed_analysis_leaves_stage_for_retry() {
        let h = harness();
        h.analyst.set_failing(true);

        let report = h
            .controller
            .run(&incident("INC1", "login page returns 500"))
            .await
            .unwrap();
        assert!(report.analysis.status.is_failed());
        assert_eq!(
            report.solution.status,
            StageStatus::Deferred(DeferReason::AnalysisIncomplete)
        );
        assert_eq!(h.fixer.calls(), 0);
        assert_eq!(h.solutions.get("INC1").await.unwrap(), None);
        let stored = h.incidents.get("INC1").await.unwrap().unwrap();
        assert_eq!(stored.stage, Stage::Intake);
        assert_eq!(stored.claimed_at, None);

        h.analyst.set_failing(false);
        let retry = h.controller.resume("INC1").await.unwrap();
        assert_eq!(retry.intake, IntakeStatus::SkippedDuplicate);
        assert!(retry.is_complete());
        assert_eq!(h.analyst.calls(), 2);
        assert_eq!(h.fixer.calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_solution_keeps_analysis() {
        let h = harness();
        h.fixer.set_failing(true);

        let report = h
            .controller
            .run(&incident("INC1", "dns resolution failing"))
            .await
            .unwrap();
        assert!(report.analysis.status.is_done());
        assert!(report.solution.status.is_failed());
        let stored = h.incidents.get("INC1").await.unwrap().unwrap();
        assert_eq!(stored.stage, Stage::AnalysisDone);

        h.fixer.set_failing(false);
        let retry = h.controller.resume("INC1").await.unwrap();
        assert_eq!(retry.analysis.status, StageStatus::AlreadyDone);
        assert!(retry.solution.status.is_done());
        assert_eq!(h.analyst.calls(), 1);
    }

    #[tokio::test]
    async fn test_solution_gated_on_analysis() {
        let h = harness();
        let inc = incident("INC1", "disk full on node A");
        h.controller.intake(&inc).await.unwrap();

        let report = h.controller.process_solution(&inc, &[]).await;

        assert_eq!(
            report.status,
            StageStatus::Deferred(DeferReason::AnalysisIncomplete)
        );
        assert_eq!(h.fixer.calls(), 0);
        assert_eq!(h.solutions.get("INC1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_duplicate_intake_is_skipped() {
        let h = harness();
        let inc = incident("INC1", "disk full on node A");

        let first = h.controller.run(&inc).await.unwrap();
        let second = h.controller.run(&inc).await.unwrap();

        assert_eq!(first.intake, IntakeStatus::Accepted);
        assert_eq!(second.intake, IntakeStatus::SkippedDuplicate);
        assert_eq!(second.analysis.status, StageStatus::AlreadyDone);
        assert_eq!(second.solution.status, StageStatus::AlreadyDone);
        assert_eq!(h.analyst.calls(), 1);
        assert_eq!(h.fixer.calls(), 1);
    }

    #[tokio::test]
    async fn test_similar_incident_reuses_artifacts() {
        let h = harness();
        h.controller
            .run(&incident("INC1", "disk full on node A"))
            .await
            .unwrap();

        let report = h
            .controller
            .run(&incident("INC2", "disk full on node A"))
            .await
            .unwrap();

        match &report.analysis.status {
            StageStatus::Succeeded(StageSource::Reused { from, similarity }) => {
                assert_eq!(from, "INC1");
                assert!((similarity - 1.0).abs() < 1e-6);
            }
            other => panic!("expected reuse, got {:?}", other),
        }
        assert!(matches!(
            report.solution.status,
            StageStatus::Succeeded(StageSource::Reused { .. })
        ));
        assert_eq!(h.analyst.calls(), 1);
        assert_eq!(h.fixer.calls(), 1);

        let record = h.solutions.get("INC2").await.unwrap().unwrap();
        assert_eq!(record.rca.as_deref(), Some("analysis for INC1"));
        assert_eq!(record.solution.as_deref(), Some("solution for INC1"));
    }

    #[tokio::test]
    async fn test_context_mode_generates_with_match() {
        let params = PipelineParams {
            reuse_mode: ReuseMode::Context,
            ..PipelineParams::default()
        };
        let h = harness_with(CountingEmbedder::new(), params);
        h.controller
            .run(&incident("INC1", "disk full on node A"))
            .await
            .unwrap();

        let report = h
            .controller
            .run(&incident("INC2", "disk full on node A"))
            .await
            .unwrap();

        assert_eq!(
            report.analysis.status,
            StageStatus::Succeeded(StageSource::Generated)
        );
        assert_eq!(h.analyst.calls(), 2);
        let contexts = h.analyst.contexts();
        assert_eq!(contexts[0], None);
        assert!(contexts[1]
            .as_deref()
            .unwrap()
            .contains("analysis for INC1"));
    }

    #[tokio::test]
    async fn test_stored_artifact_is_recovered() {
        let h = harness();
        let inc = incident("INC1", "memory leak in worker");
        h.controller.intake(&inc).await.unwrap();
        h.solutions
            .put(
                &SolutionRecord::new("INC1", "memory leak in worker", Utc::now())
                    .with_artifact(ArtifactKind::Analysis, "unbounded cache"),
            )
            .await
            .unwrap();

        let report = h.controller.resume("INC1").await.unwrap();

        assert_eq!(
            report.analysis.status,
            StageStatus::Succeeded(StageSource::Recovered)
        );
        assert_eq!(report.analysis.text.as_deref(), Some("unbounded cache"));
        assert_eq!(h.analyst.calls(), 0);
        assert!(h.fixer.contexts()[0]
            .as_deref()
            .unwrap()
            .contains("unbounded cache"));
    }

    #[tokio::test]
    async fn test_held_claim_defers_and_stale_claim_is_taken_over() {
        let h = harness();
        let inc = incident("INC1", "memory leak in worker");
        h.controller.intake(&inc).await.unwrap();

        h.incidents
            .claim("INC1", ArtifactKind::Analysis, Utc::now(), Duration::minutes(15))
            .await
            .unwrap();
        let held = h.controller.resume("INC1").await.unwrap();
        assert_eq!(
            held.analysis.status,
            StageStatus::Deferred(DeferReason::ClaimHeld)
        );
        assert_eq!(h.analyst.calls(), 0);

        let abandoned = Utc::now() - Duration::hours(2);
        let h = harness();
        h.controller.intake(&inc).await.unwrap();
        h.incidents
            .claim("INC1", ArtifactKind::Analysis, abandoned, Duration::minutes(15))
            .await
            .unwrap();
        let taken = h.controller.resume("INC1").await.unwrap();
        assert_eq!(
            taken.analysis.status,
            StageStatus::Succeeded(StageSource::Generated)
        );
        assert!(taken.is_complete());
    }

    #[tokio::test]
    async fn test_embedding_failure_falls_back_to_generation() {
        let h = harness_with(CountingEmbedder::failing(), PipelineParams::default());
        h.solutions
            .put(
                &SolutionRecord::new("INC0", "disk full on node A", Utc::now())
                    .with_artifact(ArtifactKind::Analysis, "old analysis"),
            )
            .await
            .unwrap();

        let report = h
            .controller
            .run(&incident("INC1", "disk full on node A"))
            .await
            .unwrap();

        assert_eq!(
            report.analysis.status,
            StageStatus::Succeeded(StageSource::Generated)
        );
    }

    #[tokio::test]
    async fn test_resume_unknown_incident() {
        let h = harness();
        let err = h.controller.resume("INC404").await.unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(n) if n == "INC404"));
    }
}
