//! Wiring between configuration, SQLite stores, providers and the core
//! [`PipelineController`].

use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info_span, Instrument};

use incident_rca_core::embedding::Embedder;
use incident_rca_core::error::PipelineError;
use incident_rca_core::models::Incident;
use incident_rca_core::pipeline::{PipelineController, RunReport};

use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::generation::create_generators;
use crate::migrate;
use crate::progress::{BatchProgress, ProgressReporter};
use crate::sqlite_store::{SqliteIncidentStore, SqliteSolutionStore};

/// Open database handles for one command invocation.
pub struct Stores {
    pub pool: SqlitePool,
    pub incidents: Arc<SqliteIncidentStore>,
    pub solutions: Arc<SqliteSolutionStore>,
}

impl Stores {
    /// Connect and make sure the schema exists.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;
        Ok(Self {
            incidents: Arc::new(SqliteIncidentStore::new(pool.clone())),
            solutions: Arc::new(SqliteSolutionStore::new(pool.clone())),
            pool,
        })
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

/// A controller over `stores` using the configured embedder and generators.
pub fn build_controller(config: &Config, stores: &Stores) -> Result<PipelineController> {
    let embedder: Arc<dyn Embedder> = create_embedder(&config.embedding)?;
    let (analysis, solution) = create_generators(&config.generation)?;

    Ok(PipelineController::new(
        stores.incidents.clone(),
        stores.solutions.clone(),
        embedder,
        analysis,
        solution,
        config.pipeline_params(),
    ))
}

/// What a batch run should do for each incident.
pub enum Job<'a> {
    Run(&'a Incident),
    Resume(&'a str),
}

impl Job<'_> {
    fn number(&self) -> &str {
        match self {
            Job::Run(incident) => incident.number.as_str(),
            Job::Resume(number) => *number,
        }
    }
}

/// Run one incident inside its own `pipeline` span.
pub async fn run_job(
    controller: &PipelineController,
    job: Job<'_>,
) -> Result<RunReport, PipelineError> {
    let run_id = uuid::Uuid::new_v4().to_string();
    let span = info_span!("pipeline", number = %job.number(), run_id = %run_id);

    async move {
        match job {
            Job::Run(incident) => controller.run(incident).await,
            Job::Resume(number) => controller.resume(number).await,
        }
    }
    .instrument(span)
    .await
}

/// Run every job in order. One incident's error never stops the batch.
pub async fn run_batch(
    controller: &PipelineController,
    jobs: Vec<Job<'_>>,
    progress: &dyn ProgressReporter,
) -> Vec<(String, Result<RunReport, PipelineError>)> {
    let total = jobs.len() as u64;
    let mut results = Vec::with_capacity(jobs.len());

    for (i, job) in jobs.into_iter().enumerate() {
        let number = job.number().to_string();
        progress.report(&BatchProgress {
            number: &number,
            n: i as u64 + 1,
            total,
        });
        let result = run_job(controller, job).await;
        if let Err(ref e) = result {
            tracing::warn!(number = %number, error = %e, "incident run failed");
        }
        results.push((number, result));
    }

    results
}

/// Print one line per stage for each result. Returns how many runs failed.
pub fn print_reports(results: &[(String, Result<RunReport, PipelineError>)]) -> usize {
    let mut failures = 0;
    for (number, result) in results {
        match result {
            Ok(report) => {
                if report.has_failure() {
                    failures += 1;
                }
                println!("{}", number);
                println!("  intake:    {}", report.intake);
                println!("  analysis:  {}", report.analysis.status);
                println!("  solution:  {}", report.solution.status);
            }
            Err(e) => {
                failures += 1;
                println!("{}", number);
                println!("  failed: {}", e);
            }
        }
    }
    failures
}
