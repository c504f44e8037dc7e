//! Tracing subscriber setup for the `rca` binary.
//!
//! Events go to stderr so stdout stays parseable (`rca list --json`).
//! `RUST_LOG` wins when set; otherwise the level is `info`, or `debug`
//! with `--verbose`.

use tracing_subscriber::EnvFilter;

pub fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
