//! # Report Analyst CLI (`report-analyst`)
//!
//! ## Usage
//!
//! ```bash
//! report-analyst --config ./config/report-analyst.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `report-analyst init` | Create the SQLite database and run schema migrations |
//! | `report-analyst analyze <file>` | Analyze one report file and print the answer |
//! | `report-analyst sweep` | Analyze every matching file in the upload directory |
//! | `report-analyst reports` | List stored analyses |
//! | `report-analyst serve` | Start the report HTTP API |
//!
//! Logging is controlled by `REPORT_ANALYST_LOG` (an `EnvFilter` directive,
//! default `info`); `--verbose` lowers the default to `debug`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use report_analyst::orchestrator::{self, AnalyzeRequest};
use report_analyst::progress::ProgressMode;
use report_analyst::{config, migrate, reports, server, sweep};

/// Report Analyst: upload periodic reports, have them analyzed, keep the
/// answers.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/report-analyst.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "report-analyst",
    about = "Upload report files to a retrieval service, analyze them and store the results",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/report-analyst.toml")]
    config: PathBuf,

    /// Debug-level logging unless `REPORT_ANALYST_LOG` says otherwise.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the `ai_analysis` table.
    /// Safe to run repeatedly.
    Init,

    /// Analyze a single report file.
    ///
    /// Uploads the file if the dataset does not have it yet, waits for
    /// parsing, asks the question and prints the answer. Exits non-zero
    /// when the analysis fails.
    Analyze {
        /// Path to the report file.
        file: PathBuf,

        /// Question to ask instead of the configured template.
        #[arg(long)]
        question: Option<String>,

        /// Do not store the answer.
        #[arg(long)]
        no_save: bool,

        /// Trigger parsing but do not wait for it to finish.
        #[arg(long)]
        no_wait: bool,

        /// Progress output on stderr. Defaults to `human` on a TTY, else `off`.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Analyze every matching file in the upload directory.
    ///
    /// Files are processed one at a time in name order. A failing file is
    /// reported and skipped.
    Sweep {
        /// Progress output on stderr. Defaults to `off`.
        #[arg(long, value_enum, default_value = "off")]
        progress: ProgressMode,
    },

    /// List stored analyses.
    Reports,

    /// Start the report HTTP API on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    init_tracing(cli.verbose)?;

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Analyze {
            file,
            question,
            no_save,
            no_wait,
            progress,
        } => {
            let mut request = AnalyzeRequest::new(file);
            request.question = question;
            if no_save {
                request = request.save_to_db(false);
            }
            if no_wait {
                request = request.wait_for_parsing(false);
            }
            let progress = progress.unwrap_or_else(ProgressMode::default_for_tty);
            orchestrator::run_analyze(&cfg, request, progress.reporter()).await?;
        }
        Commands::Sweep { progress } => {
            let summary = sweep::run_sweep(&cfg, progress).await?;
            if summary.failed > 0 {
                tracing::warn!(failed = summary.failed, "sweep finished with failures");
            }
        }
        Commands::Reports => {
            reports::run_reports(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose { "debug" } else { "info" };

    let filter = tracing_subscriber::EnvFilter::try_from_env("REPORT_ANALYST_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;

    Ok(())
}
