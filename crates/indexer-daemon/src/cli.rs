//! CLI argument parsing for the indexer daemon.
//!
//! CLI flags override all other config sources.

use clap::{Parser, Subcommand};

/// Event Indexer Daemon
///
/// Coalesces event changes and drives the external index build/ingest stages.
#[derive(Parser, Debug)]
#[command(name = "indexer-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/event-indexer/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Override the project root used to resolve relative paths
    #[arg(long, global = true)]
    pub project_root: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Daemon commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Read change notifications from stdin and keep the index current
    Start {
        /// Override debounce delay in milliseconds
        #[arg(short, long)]
        debounce_ms: Option<u64>,

        /// Override the directory holding the changes and status files
        #[arg(long)]
        changes_dir: Option<String>,
    },

    /// Run the build and ingest stages now and wait for the outcome
    Rebuild,

    /// Show the last recorded pipeline status
    Status,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_start_defaults() {
        let cli = Cli::parse_from(["indexer-daemon", "start"]);
        match cli.command {
            Commands::Start {
                debounce_ms,
                changes_dir,
            } => {
                assert_eq!(debounce_ms, None);
                assert_eq!(changes_dir, None);
            }
            _ => panic!("Expected Start command"),
        }
    }

    #[test]
    fn test_cli_start_with_debounce() {
        let cli = Cli::parse_from(["indexer-daemon", "start", "-d", "250"]);
        match cli.command {
            Commands::Start { debounce_ms, .. } => assert_eq!(debounce_ms, Some(250)),
            _ => panic!("Expected Start command"),
        }
    }

    #[test]
    fn test_cli_start_with_changes_dir() {
        let cli = Cli::parse_from(["indexer-daemon", "start", "--changes-dir", "/var/tmp/idx"]);
        match cli.command {
            Commands::Start { changes_dir, .. } => {
                assert_eq!(changes_dir, Some("/var/tmp/idx".to_string()))
            }
            _ => panic!("Expected Start command"),
        }
    }

    #[test]
    fn test_cli_with_config() {
        let cli = Cli::parse_from(["indexer-daemon", "--config", "/path/to/config.toml", "rebuild"]);
        assert_eq!(cli.config, Some("/path/to/config.toml".to_string()));
        assert!(matches!(cli.command, Commands::Rebuild));
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "indexer-daemon",
            "status",
            "--log-level",
            "debug",
            "--project-root",
            "/srv/app",
        ]);
        assert!(matches!(cli.command, Commands::Status));
        assert_eq!(cli.log_level, Some("debug".to_string()));
        assert_eq!(cli.project_root, Some("/srv/app".to_string()));
    }

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["indexer-daemon"]).is_err());
    }
}
