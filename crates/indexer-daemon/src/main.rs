//! Event Indexer Daemon
//!
//! Keeps the event search index current by batching event changes and
//! running the external build/ingest stages.
//!
//! # Usage
//!
//! ```bash
//! indexer-daemon start [--debounce-ms N] [--changes-dir DIR] < notifications.ndjson
//! indexer-daemon rebuild
//! indexer-daemon status
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/event-indexer/config.toml)
//! 3. Environment variables (INDEXER_*)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use indexer_daemon::{run_rebuild, show_status, start_daemon, Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            debounce_ms,
            changes_dir,
        } => {
            start_daemon(
                cli.config.as_deref(),
                cli.log_level.as_deref(),
                cli.project_root.as_deref(),
                debounce_ms,
                changes_dir.as_deref(),
            )
            .await?;
        }
        Commands::Rebuild => {
            run_rebuild(
                cli.config.as_deref(),
                cli.log_level.as_deref(),
                cli.project_root.as_deref(),
            )
            .await?;
        }
        Commands::Status => {
            show_status(cli.config.as_deref(), cli.project_root.as_deref())?;
        }
    }

    Ok(())
}
