//! Dry-run cache lookup.
//!
//! Answers "would this description reuse a prior incident's artifact?"
//! without claiming, generating or writing anything.

use anyhow::{bail, Result};
use chrono::Utc;

use incident_rca_core::cache::{self, CacheDecision, MissReason};
use incident_rca_core::models::ArtifactKind;
use incident_rca_core::store::SolutionStore;

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::runner::Stores;

/// Run the `lookup` command.
pub async fn run_lookup(config: &Config, text: &str, kind: ArtifactKind) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("lookup needs an embedding provider, but [embedding] provider is 'disabled'");
    }

    let stores = Stores::open(config).await?;
    let embedder = create_embedder(&config.embedding)?;
    let policy = config.cache_policy();

    let corpus: Vec<_> = stores
        .solutions
        .list_all()
        .await?
        .into_iter()
        .filter(|r| r.artifact(kind).is_some())
        .collect();
    stores.close().await;

    let decision =
        cache::evaluate(embedder.as_ref(), text, &corpus, &policy, Utc::now()).await?;

    println!("lookup ({}, {} candidates)", kind, corpus.len());
    println!(
        "  threshold: {:.3}   staleness: {} days",
        policy.threshold,
        policy.staleness.num_days()
    );
    match decision {
        CacheDecision::Hit(hit) => {
            println!(
                "  hit: {}  similarity {:.3}  age {} days",
                hit.record.number,
                hit.similarity,
                hit.age.num_days()
            );
            println!();
            println!("{}", hit.record.artifact(kind).unwrap_or_default());
        }
        CacheDecision::Miss(MissReason::EmptyCorpus) => {
            println!("  miss: no prior {} to compare against", kind);
        }
        CacheDecision::Miss(MissReason::BelowThreshold { similarity }) => {
            println!("  miss: nearest similarity {:.3} is below threshold", similarity);
        }
        CacheDecision::Miss(MissReason::Stale { similarity, age }) => {
            println!(
                "  miss: nearest similarity {:.3} but {} days old",
                similarity,
                age.num_days()
            );
        }
    }

    Ok(())
}
