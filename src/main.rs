//! # Coda Sentinel CLI (`sentinel`)
//!
//! ## Usage
//!
//! ```bash
//! sentinel --config ./config/sentinel.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sentinel scan` | Run one scan and print the alerts |
//! | `sentinel serve` | Start the HTTP API with background scanning |
//! | `sentinel remediate <doc_id>` | Delete a document or revoke its public access |
//! | `sentinel documents` | List the workspace's documents |
//!
//! The API token is read from `CODA_API_TOKEN` (or the variable named by
//! `workspace.token_env`). Log verbosity follows `RUST_LOG`; `--verbose`
//! switches the default to `debug`.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use coda_sentinel::commands;
use coda_sentinel::config;
use coda_sentinel::progress::ProgressMode;
use coda_sentinel::remediate::RemediationAction;

/// Coda Sentinel: security auditing for Coda workspaces.
#[derive(Parser)]
#[command(
    name = "sentinel",
    about = "Coda Sentinel: security auditing for Coda workspaces",
    version,
    long_about = "Scans a Coda workspace for stale documents, public and external sharing, \
    and sensitive keywords in table rows and pages, and offers remediation actions."
)]
struct Cli {
    /// Path to configuration file (TOML). Defaults to
    /// `./config/sentinel.toml`, falling back to built-in defaults when that
    /// file does not exist. An explicit path must exist.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Run one scan cycle and print the alerts.
    Scan {
        /// Print the report and alerts as JSON.
        #[arg(long)]
        json: bool,

        /// Progress output on stderr: off, human, or json.
        /// Defaults to human when stderr is a terminal.
        #[arg(long, value_enum)]
        progress: Option<ProgressArg>,
    },

    /// Start the HTTP API.
    ///
    /// Binds to `[server].bind`, runs an initial scan when
    /// `scan.scan_on_startup` is set, and rescans every
    /// `scan.interval_secs` if configured.
    Serve,

    /// Apply a remediation to one document.
    Remediate {
        /// Document id.
        doc_id: String,

        /// What to do. Deleting a document cannot be undone.
        #[arg(long, value_enum, default_value = "delete")]
        action: ActionArg,
    },

    /// List documents visible to the API token.
    Documents,
}

#[derive(Clone, Copy, ValueEnum)]
enum ActionArg {
    Delete,
    RemovePublicAccess,
}

impl From<ActionArg> for RemediationAction {
    fn from(arg: ActionArg) -> Self {
        match arg {
            ActionArg::Delete => RemediationAction::DeleteDocument,
            ActionArg::RemovePublicAccess => RemediationAction::RemovePublicAccess,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

impl From<ProgressArg> for ProgressMode {
    fn from(arg: ProgressArg) -> Self {
        match arg {
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "coda_sentinel=debug,sentinel=debug,info"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Scan { json, progress } => {
            let mode = progress
                .map(ProgressMode::from)
                .unwrap_or_else(ProgressMode::default_for_tty);
            commands::run_scan(&cfg, json, mode).await?;
        }
        Commands::Serve => {
            commands::run_serve(&cfg).await?;
        }
        Commands::Remediate { doc_id, action } => {
            commands::run_remediate(&cfg, &doc_id, action.into()).await?;
        }
        Commands::Documents => {
            commands::run_documents(&cfg).await?;
        }
    }

    Ok(())
}
