//! # Incident RCA CLI (`rca`)
//!
//! ## Usage
//!
//! ```bash
//! rca --config ./config/rca.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rca init` | Create the SQLite database and run schema migrations |
//! | `rca intake <file.json>` | Ingest incidents, skipping known numbers |
//! | `rca process <number>` | Run or resume the pipeline for one incident |
//! | `rca process --pending` | Run every unfinished incident |
//! | `rca lookup "<text>"` | Dry-run the similarity cache |
//! | `rca show <number>` | Print an incident and its artifacts |
//! | `rca list` | List incidents and their stage |
//! | `rca stats` | Per-stage counts and database size |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use incident_rca::progress::ProgressMode;
use incident_rca::{config, intake, list, logging, lookup, migrate, process, show, stats};
use incident_rca_core::models::{ArtifactKind, Stage};

/// Incident RCA CLI: reuse past root-cause analyses for similar incidents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/rca.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "rca",
    about = "Incident RCA: a semantic cache and idempotent pipeline for incident analyses",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rca.toml")]
    config: PathBuf,

    /// Log at debug level unless `RUST_LOG` is set.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Ingest incidents from a JSON array export.
    ///
    /// Incidents whose number is already stored are skipped.
    Intake {
        /// Path to the JSON file.
        file: PathBuf,

        /// Run the pipeline for each newly accepted incident.
        #[arg(long)]
        process: bool,

        /// Progress output on stderr (defaults to human on a TTY).
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Run or resume the pipeline.
    ///
    /// Finished stages are never regenerated, so re-running is safe.
    Process {
        /// Incident number to process.
        #[arg(conflicts_with = "pending", required_unless_present = "pending")]
        number: Option<String>,

        /// Process every incident that is not done yet.
        #[arg(long)]
        pending: bool,

        /// Maximum number of incidents with `--pending`.
        #[arg(long, requires = "pending")]
        limit: Option<usize>,

        /// Progress output on stderr (defaults to human on a TTY).
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Show whether a description would reuse a past incident's artifact.
    Lookup {
        /// Incident description to look up.
        text: String,

        /// Artifact to look for: `analysis` or `solution`.
        #[arg(long, default_value = "analysis")]
        kind: ArtifactKind,
    },

    /// Print an incident with its stage and artifacts.
    Show {
        number: String,

        /// Emit JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// List incidents, newest first.
    List {
        /// Only incidents with this priority (case-insensitive).
        #[arg(long)]
        priority: Option<String>,

        /// Only incidents in this stage.
        #[arg(long)]
        stage: Option<Stage>,

        #[arg(long)]
        limit: Option<usize>,

        /// Emit JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Show incident counts per stage and database size.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Intake {
            file,
            process,
            progress,
        } => {
            let progress = progress.unwrap_or_else(ProgressMode::default_for_tty);
            intake::run_intake(&cfg, &file, process, progress).await?;
        }
        Commands::Process {
            number,
            pending,
            limit,
            progress,
        } => {
            let progress = progress.unwrap_or_else(ProgressMode::default_for_tty);
            process::run_process(&cfg, number.as_deref(), pending, limit, progress).await?;
        }
        Commands::Lookup { text, kind } => {
            lookup::run_lookup(&cfg, &text, kind).await?;
        }
        Commands::Show { number, json } => {
            show::run_show(&cfg, &number, json).await?;
        }
        Commands::List {
            priority,
            stage,
            limit,
            json,
        } => {
            list::run_list(&cfg, priority, stage, limit, json).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
