//! Batch progress reporting for `rca process --pending` and `rca intake --process`.
//!
//! Progress goes to **stderr** so the per-incident report on stdout stays
//! parseable for scripts.

use std::io::Write;

/// One step of a batch run.
#[derive(Clone, Debug)]
pub struct BatchProgress<'a> {
    pub number: &'a str,
    /// 1-based position in the batch.
    pub n: u64,
    pub total: u64,
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: &BatchProgress<'_>);
}

/// Human-friendly progress on stderr: "process  INC0012  3 / 1,200".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: &BatchProgress<'_>) {
        let line = format!(
            "process  {}  {} / {}\n",
            event.number,
            format_number(event.n),
            format_number(event.total)
        );
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: &BatchProgress<'_>) {
        let obj = serde_json::json!({
            "event": "progress",
            "number": event.number,
            "n": event.n,
            "total": event.total,
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
        }
    }
}

pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: &BatchProgress<'_>) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
