//! # Spatial Harvest CLI (`harvest`)
//!
//! The `harvest` binary is the primary interface for Spatial Harvest. It
//! provides commands for database initialization, running harvest jobs and
//! inspecting what they did.
//!
//! ## Usage
//!
//! ```bash
//! harvest --config ./config/harvest.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `harvest init` | Create the SQLite database and run schema migrations |
//! | `harvest sources` | List configured sources |
//! | `harvest run <target>` | Harvest `all`, a kind (`csw`, `waf`, `doc`) or one source |
//! | `harvest reimport <kind:name>` | Re-import a source's current records without fetching |
//! | `harvest report <job-id>` | Show every attempt a job made and its messages |
//! | `harvest history <guid>` | Show every attempt made for one identity |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! harvest init --config ./config/harvest.toml
//!
//! # Harvest one web-accessible folder
//! harvest run waf:rivers --config ./config/harvest.toml
//!
//! # Harvest every source, updating entries even when unchanged
//! harvest run all --force --config ./config/harvest.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use spatial_harvest::progress::{HarvestProgressReporter, ProgressMode};
use spatial_harvest::{config, ingest, migrate, report, sources};

/// Spatial Harvest CLI: harvests GEMINI/ISO19139 metadata into a catalog.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/harvest.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "harvest",
    about = "Spatial Harvest: harvests GEMINI/ISO19139 metadata from CSW services, documents and WAFs",
    version,
    long_about = "Spatial Harvest gathers metadata records from CSW catalog services, single \
    documents and web-accessible folders, reconciles each record against earlier harvests, \
    and creates or updates the matching catalog entry."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/harvest.toml")]
    config: PathBuf,

    /// Progress output on stderr. Defaults to `human` on a terminal, `off` otherwise.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. Running it
    /// more than once is safe.
    Init,

    /// List configured sources.
    Sources,

    /// Run harvest jobs.
    ///
    /// Target format: `all`, `<kind>`, or `<kind>:<name>`.
    /// Examples: `all`, `waf`, `waf:rivers`, `csw:national`.
    Run {
        /// Source specifier.
        target: String,

        /// Update entries even when the metadata date has not changed.
        #[arg(long)]
        force: bool,
    },

    /// Re-import a source's current records from stored content.
    Reimport {
        /// Source id, e.g. `waf:rivers`.
        source: String,
    },

    /// Show what a job did.
    Report {
        /// Job id, as printed by `harvest run`.
        job_id: String,

        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Show every harvest attempt for one GUID.
    History {
        guid: String,

        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },
}

fn init_logging(filter: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

/// Cancel the returned token on Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current record");
            child.cancel();
        }
    });
    token
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = config::load_config(&cli.config)?;
    init_logging(&cfg.logging.filter);

    let progress: Arc<dyn HarvestProgressReporter> = Arc::from(
        cli.progress
            .unwrap_or_else(ProgressMode::default_for_tty)
            .reporter(),
    );

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sources => {
            sources::list_sources(&cfg)?;
        }
        Commands::Run { target, force } => {
            ingest::run_harvest(&cfg, &target, force, progress, cancel_on_ctrl_c()).await?;
        }
        Commands::Reimport { source } => {
            ingest::run_reimport(&cfg, &source, progress, cancel_on_ctrl_c()).await?;
        }
        Commands::Report { job_id, json } => {
            report::run_report(&cfg, &job_id, json).await?;
        }
        Commands::History { guid, json } => {
            report::run_history(&cfg, &guid, json).await?;
        }
    }

    Ok(())
}
