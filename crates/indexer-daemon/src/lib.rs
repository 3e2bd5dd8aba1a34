//! Indexer daemon library exports.
//!
//! This crate provides the CLI daemon binary for the event indexer.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (start, rebuild, status)

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands};
pub use commands::{run_rebuild, serve, show_status, start_daemon, Notification, ServeStats};
