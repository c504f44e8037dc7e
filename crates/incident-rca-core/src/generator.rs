//! Text generator trait for root-cause analyses and remediation steps.
//!
//! The remote model call itself (prompting, transport, retries) belongs to
//! the application. The pipeline only sees this trait and treats every call
//! as an expensive, fallible black box.

use async_trait::async_trait;

use crate::error::GenerationError;
use crate::models::Incident;

/// Produces one artifact for an incident.
///
/// `similar_context` carries related text the caller wants folded into the
/// prompt: a similar past artifact, or for remediation the incident's own
/// analysis. Calls must be safe to retry; a failed call leaves no trace the
/// pipeline depends on.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Short identifier used in logs (e.g. `"openai:deepseek-r1"`).
    fn name(&self) -> &str;

    async fn generate(
        &self,
        incident: &Incident,
        similar_context: Option<&str>,
    ) -> Result<String, GenerationError>;
}
