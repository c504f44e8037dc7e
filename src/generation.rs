//! Text generators for root-cause analyses and remediations.
//!
//! Providers, selected by `[generation].provider`:
//! - **`disabled`**: every call fails, so stages stay unclaimed for a later run.
//! - **`template`**: deterministic offline text built from the incident fields.
//! - **`openai`**: any OpenAI-compatible `POST {url}/chat/completions`
//!   endpoint (the Hugging Face router by default).
//!
//! Every generator returned by [`create_generators`] is wrapped in a
//! [`TimeoutGenerator`], so a hung model call fails the stage with
//! [`GenerationError::Timeout`] instead of blocking the run.

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;

use incident_rca_core::error::GenerationError;
use incident_rca_core::generator::Generator;
use incident_rca_core::models::{ArtifactKind, Incident};

use crate::config::GenerationConfig;
use crate::embedding::backoff_delay;

// ============ Prompts ============

const RCA_INSTRUCTIONS: &str = "You are a cross-platform database and infrastructure log expert. \
Review the following incident and generate a root cause analysis using this structure:\n\n\
1. Detection of Issues:\n- List key symptoms or anomalies observed.\n\n\
2. Root Cause Analysis:\n- Explain the most probable root causes, using technical insight derived from the incident.\n\n\
3. Impact Assessment:\n- Briefly describe how the issue might affect systems, services, or users.\n\n\
4. Supporting Evidence:\n- Point out the log entries or technical signals that justify the analysis.\n";

const SOLUTION_INSTRUCTIONS: &str = "You are a cross-platform database and infrastructure troubleshooting expert. \
Based on the following incident details, provide a detailed solution using this format:\n\n\
1. Issue Summary:\n- Describe the main issue in 1-2 sentences.\n\n\
2. Remediation Steps:\n- Provide a step-by-step resolution plan. Use SQL or CLI commands where appropriate.\n\n\
3. Verification:\n- Explain how to validate that the issue has been resolved.\n\n\
4. Generalization:\n- Suggest how the solution can be adapted to similar systems.\n";

fn or_na(value: Option<&str>) -> &str {
    value.filter(|v| !v.trim().is_empty()).unwrap_or("N/A")
}

/// Full prompt for one artifact.
pub fn build_prompt(kind: ArtifactKind, incident: &Incident, context: Option<&str>) -> String {
    let instructions = match kind {
        ArtifactKind::Analysis => RCA_INSTRUCTIONS,
        ArtifactKind::Solution => SOLUTION_INSTRUCTIONS,
    };

    let mut prompt = format!(
        "{}\nIncident Details:\nNumber: {}\nShort Description: {}\nDescription: {}\nPriority: {}\nBusiness Service: {}\n",
        instructions,
        incident.number,
        incident.short_description,
        or_na(incident.description.as_deref()),
        or_na(incident.priority.as_deref()),
        or_na(incident.business_service.as_deref()),
    );

    if let Some(context) = context.map(str::trim).filter(|c| !c.is_empty()) {
        prompt.push_str("\nRelated Context:\n");
        prompt.push_str(context);
        prompt.push('\n');
    }

    prompt.push_str(match kind {
        ArtifactKind::Analysis => {
            "\nBased on the above, provide the complete structured root cause analysis. \
             Focus on technical accuracy and clarity."
        }
        ArtifactKind::Solution => {
            "\nBased on the above, provide the complete structured solution. \
             Focus on actionable, verifiable steps."
        }
    });
    prompt
}

// ============ Response cleanup ============

/// Strips reasoning blocks and markdown emphasis from model output.
pub struct ResponseCleaner {
    think: Regex,
    bold: Regex,
    heading: Regex,
}

impl ResponseCleaner {
    pub fn new() -> Result<Self> {
        Ok(Self {
            think: Regex::new(r"(?s)<think>.*?</think>")?,
            bold: Regex::new(r"\*\*(.*?)\*\*")?,
            heading: Regex::new(r"(?m)^#+\s*")?,
        })
    }

    pub fn clean(&self, text: &str) -> String {
        let text = self.think.replace_all(text, "");
        let text = self.bold.replace_all(&text, "$1");
        let text = self.heading.replace_all(&text, "");
        text.trim().to_string()
    }
}

// ============ Disabled ============

pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn generate(
        &self,
        _incident: &Incident,
        _similar_context: Option<&str>,
    ) -> Result<String, GenerationError> {
        Err(GenerationError::Unavailable(
            "generation provider is disabled".to_string(),
        ))
    }
}

// ============ Template ============

/// Offline generator producing fixed-format text from the incident fields.
pub struct TemplateGenerator {
    kind: ArtifactKind,
}

impl TemplateGenerator {
    pub fn new(kind: ArtifactKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl Generator for TemplateGenerator {
    fn name(&self) -> &str {
        match self.kind {
            ArtifactKind::Analysis => "template:analysis",
            ArtifactKind::Solution => "template:solution",
        }
    }

    async fn generate(
        &self,
        incident: &Incident,
        similar_context: Option<&str>,
    ) -> Result<String, GenerationError> {
        let details = or_na(incident.description.as_deref());
        let details = if details == "N/A" {
            incident.short_description.as_str()
        } else {
            details
        };

        let mut text = match self.kind {
            ArtifactKind::Analysis => format!(
                "Root cause analysis for {}\n\n\
                 1. Detection of Issues:\n- {}\n\n\
                 2. Root Cause Analysis:\n- Requires review; generated without a model.\n\n\
                 3. Impact Assessment:\n- Priority {} on {}.\n\n\
                 4. Supporting Evidence:\n- {}",
                incident.number,
                incident.short_description,
                or_na(incident.priority.as_deref()),
                or_na(incident.business_service.as_deref()),
                details,
            ),
            ArtifactKind::Solution => format!(
                "Remediation for {}\n\n\
                 1. Issue Summary:\n- {}\n\n\
                 2. Remediation Steps:\n- Follow the runbook for {}.\n\n\
                 3. Verification:\n- Confirm the symptom no longer reproduces.\n\n\
                 4. Generalization:\n- Apply the same checks to services sharing this dependency.",
                incident.number,
                incident.short_description,
                or_na(incident.business_service.as_deref()),
            ),
        };

        if let Some(context) = similar_context {
            text.push_str("\n\nContext:\n");
            text.push_str(context.trim());
        }
        Ok(text)
    }
}

// ============ OpenAI-compatible chat completions ============

/// Generator calling an OpenAI-compatible chat completions endpoint.
///
/// Retry strategy matches the embedding providers: 429, 5xx and network
/// errors back off and retry, any other 4xx fails at once.
pub struct OpenAIGenerator {
    kind: ArtifactKind,
    label: String,
    endpoint: String,
    model: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
    cleaner: ResponseCleaner,
}

impl OpenAIGenerator {
    /// # Errors
    ///
    /// Returns an error if the API key variable named by `api_key_env` is unset.
    pub fn new(kind: ArtifactKind, config: &GenerationConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            anyhow::anyhow!("{} environment variable not set", config.api_key_env)
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            kind,
            label: format!("openai:{}", config.model),
            endpoint: format!("{}/chat/completions", config.url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
            max_retries: config.max_retries,
            client,
            cleaner: ResponseCleaner::new()?,
        })
    }
}

#[async_trait]
impl Generator for OpenAIGenerator {
    fn name(&self) -> &str {
        &self.label
    }

    async fn generate(
        &self,
        incident: &Incident,
        similar_context: Option<&str>,
    ) -> Result<String, GenerationError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": build_prompt(self.kind, incident, similar_context),
            }],
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(attempt)).await;
            }

            let resp = self
                .client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| GenerationError::Request(e.to_string()))?;
                        let content = parse_chat_response(&json)?;
                        let cleaned = self.cleaner.clean(&content);
                        if cleaned.is_empty() {
                            return Err(GenerationError::EmptyResponse);
                        }
                        return Ok(cleaned);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::warn!(%status, attempt, number = %incident.number, "generation request failed, retrying");
                        last_err = Some(GenerationError::Request(format!(
                            "API error {}: {}",
                            status, body_text
                        )));
                        continue;
                    }

                    return Err(GenerationError::Request(format!(
                        "API error {}: {}",
                        status, body_text
                    )));
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempt, number = %incident.number, "generation request failed, retrying");
                    last_err = Some(GenerationError::Request(e.to_string()));
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| GenerationError::Request("generation failed after retries".into())))
    }
}

fn parse_chat_response(json: &serde_json::Value) -> Result<String, GenerationError> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            GenerationError::Request("invalid response: missing choices[0].message.content".into())
        })
}

// ============ Timeout ============

/// Applies a caller-level deadline to every call of the wrapped generator.
pub struct TimeoutGenerator {
    inner: Arc<dyn Generator>,
    timeout: Duration,
}

impl TimeoutGenerator {
    pub fn new(inner: Arc<dyn Generator>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl Generator for TimeoutGenerator {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn generate(
        &self,
        incident: &Incident,
        similar_context: Option<&str>,
    ) -> Result<String, GenerationError> {
        match tokio::time::timeout(self.timeout, self.inner.generate(incident, similar_context))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(GenerationError::Timeout {
                secs: self.timeout.as_secs(),
            }),
        }
    }
}

fn create_generator(kind: ArtifactKind, config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    let inner: Arc<dyn Generator> = match config.provider.as_str() {
        "disabled" => Arc::new(DisabledGenerator),
        "template" => Arc::new(TemplateGenerator::new(kind)),
        "openai" => Arc::new(OpenAIGenerator::new(kind, config)?),
        other => anyhow::bail!("Unknown generation provider: {}", other),
    };
    Ok(Arc::new(TimeoutGenerator::new(inner, overall_deadline(config))))
}

/// Deadline for one `generate` call across all its attempts.
///
/// `timeout_secs` bounds each HTTP request, so the whole call gets one
/// request timeout per attempt plus every backoff sleep between them.
pub fn overall_deadline(config: &GenerationConfig) -> Duration {
    let per_request = Duration::from_secs(config.timeout_secs);
    let attempts = config.max_retries.saturating_add(1);
    (1..=config.max_retries)
        .map(backoff_delay)
        .fold(per_request.saturating_mul(attempts), Duration::saturating_add)
}

/// `(analysis, solution)` generators for the configured provider.
pub fn create_generators(
    config: &GenerationConfig,
) -> Result<(Arc<dyn Generator>, Arc<dyn Generator>)> {
    Ok((
        create_generator(ArtifactKind::Analysis, config)?,
        create_generator(ArtifactKind::Solution, config)?,
    ))
}
