//! Test doubles shared by the core unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::embedding::{normalize, Embedder};
use crate::error::GenerationError;
use crate::generator::Generator;
use crate::models::Incident;

/// Character-frequency embedder that counts how often it is called.
pub struct CountingEmbedder {
    calls: AtomicUsize,
    fail: bool,
}

impl CountingEmbedder {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for CountingEmbedder {
    fn model_name(&self) -> &str {
        "char-freq"
    }

    fn dims(&self) -> usize {
        36
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            bail!("embedder offline");
        }
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; 36];
                for c in t.to_lowercase().chars() {
                    if let Some(d) = c.to_digit(36) {
                        v[d as usize] += 1.0;
                    }
                }
                normalize(&mut v);
                v
            })
            .collect())
    }
}

/// Embedder returning hand-picked vectors per text.
pub struct FixedEmbedder {
    vectors: HashMap<String, Vec<f32>>,
}

impl FixedEmbedder {
    pub fn new(entries: Vec<(&str, Vec<f32>)>) -> Self {
        Self {
            vectors: entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        }
    }
}

#[async_trait]
impl Embedder for FixedEmbedder {
    fn model_name(&self) -> &str {
        "fixed"
    }

    fn dims(&self) -> usize {
        self.vectors.values().next().map(|v| v.len()).unwrap_or(0)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts
            .iter()
            .map(|t| match self.vectors.get(t) {
                Some(v) => Ok(v.clone()),
                None => bail!("no fixed vector for {:?}", t),
            })
            .collect()
    }
}

/// Generator that records its calls and can be told to fail.
pub struct ScriptedGenerator {
    label: String,
    calls: AtomicUsize,
    contexts: Mutex<Vec<Option<String>>>,
    fail: Mutex<bool>,
}

impl ScriptedGenerator {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            calls: AtomicUsize::new(0),
            contexts: Mutex::new(Vec::new()),
            fail: Mutex::new(false),
        }
    }

    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn contexts(&self) -> Vec<Option<String>> {
        self.contexts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn name(&self) -> &str {
        &self.label
    }

    async fn generate(
        &self,
        incident: &Incident,
        similar_context: Option<&str>,
    ) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.contexts
            .lock()
            .unwrap()
            .push(similar_context.map(str::to_string));
        if *self.fail.lock().unwrap() {
            return Err(GenerationError::Request("remote model returned 503".into()));
        }
        Ok(format!("{} for {}", self.label, incident.number))
    }
}
