//! TOML configuration.
//!
//! Only `[db]` is required; every other section falls back to defaults
//! for the cache and providers (threshold 0.85,
//! 60-day staleness window, all-MiniLM-L6-v2 sized vectors).

use anyhow::{Context, Result};
use chrono::Duration;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use incident_rca_core::cache::{CachePolicy, DEFAULT_STALENESS_DAYS, DEFAULT_THRESHOLD};
use incident_rca_core::pipeline::{PipelineParams, ReuseMode};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default = "default_staleness_days")]
    pub staleness_days: i64,
    #[serde(default)]
    pub reuse_mode: ReuseMode,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            staleness_days: DEFAULT_STALENESS_DAYS,
            reuse_mode: ReuseMode::Adopt,
        }
    }
}

fn default_threshold() -> f32 {
    DEFAULT_THRESHOLD
}
fn default_staleness_days() -> i64 {
    DEFAULT_STALENESS_DAYS
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_embedding_retries(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

fn default_embedding_provider() -> String {
    "hash".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_embedding_retries() -> u32 {
    5
}
fn default_embedding_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default = "default_generation_url")]
    pub url: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_generation_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            url: default_generation_url(),
            model: default_generation_model(),
            api_key_env: default_api_key_env(),
            max_retries: default_generation_retries(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

fn default_generation_provider() -> String {
    "template".to_string()
}
fn default_generation_url() -> String {
    "https://router.huggingface.co/v1".to_string()
}
fn default_generation_model() -> String {
    "deepseek-ai/DeepSeek-R1".to_string()
}
fn default_api_key_env() -> String {
    "HF_API_KEY".to_string()
}
fn default_generation_retries() -> u32 {
    3
}
fn default_generation_timeout() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_claim_timeout")]
    pub claim_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            claim_timeout_secs: default_claim_timeout(),
        }
    }
}

fn default_claim_timeout() -> u64 {
    900
}

/// One hundred years.
const MAX_STALENESS_DAYS: i64 = 36_500;
/// One year.
const MAX_CLAIM_TIMEOUT_SECS: u64 = 365 * 24 * 3600;

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl Config {
    /// Pipeline tunables derived from `[cache]` and `[pipeline]`.
    pub fn pipeline_params(&self) -> PipelineParams {
        PipelineParams {
            policy: self.cache_policy(),
            reuse_mode: self.cache.reuse_mode,
            claim_timeout: Duration::seconds(self.pipeline.claim_timeout_secs as i64),
        }
    }

    pub fn cache_policy(&self) -> CachePolicy {
        CachePolicy {
            threshold: self.cache.threshold,
            staleness: Duration::days(self.cache.staleness_days),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate cache
    if !(config.cache.threshold > 0.0 && config.cache.threshold <= 1.0) {
        anyhow::bail!("cache.threshold must be in (0.0, 1.0]");
    }
    if !(0..=MAX_STALENESS_DAYS).contains(&config.cache.staleness_days) {
        anyhow::bail!("cache.staleness_days must be in 0..={}", MAX_STALENESS_DAYS);
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "hash" | "local" => {}
        "openai" => {
            if config.embedding.model.is_none() {
                anyhow::bail!("embedding.model must be specified when provider is 'openai'");
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hash, local, or openai.",
            other
        ),
    }
    if config.embedding.dims == Some(0) {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    // Validate generation
    match config.generation.provider.as_str() {
        "disabled" | "template" | "openai" => {}
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be disabled, template, or openai.",
            other
        ),
    }
    if config.generation.timeout_secs == 0 {
        anyhow::bail!("generation.timeout_secs must be > 0");
    }

    if !(1..=MAX_CLAIM_TIMEOUT_SECS).contains(&config.pipeline.claim_timeout_secs) {
        anyhow::bail!(
            "pipeline.claim_timeout_secs must be in 1..={}",
            MAX_CLAIM_TIMEOUT_SECS
        );
    }

    Ok(config)
}
