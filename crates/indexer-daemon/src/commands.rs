//! Command implementations for the indexer daemon.
//!
//! Handles:
//! - start: Load config, build the coordinator, feed it notifications from stdin
//! - rebuild: One-shot manual pipeline run
//! - status: Print the last recorded pipeline status

use std::future::Future;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use indexer_pipeline::{IndexCoordinator, PipelineError, RunOutcome, StatusRecorder};
use indexer_types::{event::normalize_id, PipelineStatus, Settings};

/// One line of the notification stream.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Notification {
    /// An event was created or updated
    Upsert { event: Value },
    /// An event was deleted
    Delete { id: Value },
    /// Run the pipeline now
    Rebuild,
    /// Print the last status
    Status,
}

/// Counters reported when the notification loop ends.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ServeStats {
    pub upserts: u64,
    pub deletes: u64,
    pub rebuilds: u64,
    pub status_requests: u64,
    pub malformed: u64,
    /// Stopped by a shutdown signal rather than end of input
    pub interrupted: bool,
}

/// Parse a notification line.
pub fn parse_notification(line: &str) -> Result<Notification> {
    serde_json::from_str(line).context("Invalid notification")
}

/// JSON line describing a manual rebuild outcome.
pub fn outcome_json(outcome: &Result<RunOutcome, PipelineError>) -> Value {
    match outcome {
        Ok(RunOutcome::Completed(report)) => json!({
            "ok": true,
            "outcome": "completed",
            "attempts": report.attempts,
            "changes": report.batch_len,
            "changes_file": report.changes_file.as_ref().map(|p| p.display().to_string()),
        }),
        Ok(RunOutcome::Skipped) => json!({
            "ok": true,
            "outcome": "skipped",
        }),
        Err(e) => json!({
            "ok": false,
            "outcome": "failed",
            "error": e.to_string(),
        }),
    }
}

/// JSON line describing the last status.
pub fn status_json(status: Option<PipelineStatus>) -> Result<Value> {
    match status {
        Some(status) => serde_json::to_value(status).context("Failed to encode status"),
        None => Ok(json!({ "message": "no status yet" })),
    }
}

/// Load settings and apply global CLI overrides.
pub fn load_settings(
    config_path: Option<&str>,
    log_level_override: Option<&str>,
    project_root_override: Option<&str>,
) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;

    if let Some(log_level) = log_level_override {
        settings.log_level = log_level.to_string();
    }
    if let Some(project_root) = project_root_override {
        settings.project_root = project_root.to_string();
    }

    Ok(settings)
}

/// Initialize logging. Stdout is reserved for command output.
fn init_logging(settings: &Settings) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_level)),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

/// Start the indexer daemon.
///
/// 1. Load configuration (defaults -> file -> env -> CLI)
/// 2. Build the coordinator
/// 3. Feed it notifications from stdin until end of input or a shutdown signal
pub async fn start_daemon(
    config_path: Option<&str>,
    log_level_override: Option<&str>,
    project_root_override: Option<&str>,
    debounce_override: Option<u64>,
    changes_dir_override: Option<&str>,
) -> Result<()> {
    let mut settings = load_settings(config_path, log_level_override, project_root_override)?;
    if let Some(debounce_ms) = debounce_override {
        settings.debounce_ms = debounce_ms;
    }
    if let Some(changes_dir) = changes_dir_override {
        settings.changes_dir = changes_dir.to_string();
    }

    init_logging(&settings)?;

    info!("Indexer daemon starting...");
    info!("Configuration:");
    info!("  Project root: {}", settings.root_dir().display());
    info!("  Changes dir: {}", settings.changes_dir_path().display());
    info!("  Build script: {}", settings.build_script_path().display());
    info!("  Ingest script: {}", settings.ingest_script_path().display());
    info!("  Debounce: {} ms", settings.debounce_ms);
    info!("  Log level: {}", settings.log_level);

    let coordinator = IndexCoordinator::new(&settings).context("Failed to create coordinator")?;

    let stats = serve(
        &coordinator,
        BufReader::new(tokio::io::stdin()),
        shutdown_signal(),
    )
    .await?;

    info!(
        upserts = stats.upserts,
        deletes = stats.deletes,
        rebuilds = stats.rebuilds,
        malformed = stats.malformed,
        interrupted = stats.interrupted,
        "Indexer daemon stopped"
    );
    Ok(())
}

/// Apply notifications from `input` until it ends or `shutdown` resolves.
///
/// Either way the pending debounce timer is cancelled and in-flight runs
/// (debounced or manual) are awaited. At end of input the pipeline then runs
/// once more if changes are still pending; after a shutdown signal it does not.
pub async fn serve<R, S>(coordinator: &IndexCoordinator, input: R, shutdown: S) -> Result<ServeStats>
where
    R: AsyncBufRead + Unpin,
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut lines = input.lines();
    let mut stats = ServeStats::default();
    let mut rebuilds = JoinSet::new();

    loop {
        let line = tokio::select! {
            biased;
            _ = &mut shutdown => {
                stats.interrupted = true;
                break;
            }
            line = lines.next_line() => line.context("Failed to read notifications")?,
        };
        let Some(line) = line else {
            break;
        };
        while let Some(finished) = rebuilds.try_join_next() {
            if let Err(e) = finished {
                warn!(error = %e, "Rebuild task failed");
            }
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let notification = match parse_notification(line) {
            Ok(notification) => notification,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "Ignoring malformed notification");
                stats.malformed += 1;
                continue;
            }
        };
        debug!(?notification, "Notification received");

        match notification {
            Notification::Upsert { event } => {
                coordinator.notify_upsert_value(event);
                stats.upserts += 1;
            }
            Notification::Delete { id } => match normalize_id(&id) {
                Ok(id) => {
                    coordinator.notify_delete(&id);
                    stats.deletes += 1;
                }
                Err(e) => {
                    warn!(error = %e, "Ignoring delete notification");
                    stats.malformed += 1;
                }
            },
            Notification::Rebuild => {
                stats.rebuilds += 1;
                let coordinator = coordinator.clone();
                rebuilds.spawn(async move {
                    let outcome = coordinator.trigger_rebuild_now().await;
                    println!("{}", outcome_json(&outcome));
                });
            }
            Notification::Status => {
                stats.status_requests += 1;
                match coordinator.last_status() {
                    Ok(status) => println!("{}", status_json(status)?),
                    Err(e) => warn!(error = %e, "Could not read status file"),
                }
            }
        }
    }

    if stats.interrupted {
        info!("Shutdown requested, waiting for in-flight runs");
    } else {
        info!("End of input, draining");
    }
    coordinator.shutdown();
    while let Some(finished) = rebuilds.join_next().await {
        if let Err(e) = finished {
            warn!(error = %e, "Rebuild task failed");
        }
    }
    coordinator.wait_idle().await;

    if !stats.interrupted && coordinator.pending_len() > 0 {
        let outcome = coordinator.trigger_rebuild_now().await;
        if let Err(e) = &outcome {
            warn!(error = %e, "Final run failed");
        }
    }

    Ok(stats)
}

/// Run the pipeline once and print the outcome.
///
/// Returns an error (nonzero exit) when the run failed.
pub async fn run_rebuild(
    config_path: Option<&str>,
    log_level_override: Option<&str>,
    project_root_override: Option<&str>,
) -> Result<()> {
    let settings = load_settings(config_path, log_level_override, project_root_override)?;
    init_logging(&settings)?;

    let coordinator = IndexCoordinator::new(&settings).context("Failed to create coordinator")?;
    let outcome = coordinator.trigger_rebuild_now().await;
    println!("{}", outcome_json(&outcome));

    outcome.context("Index rebuild failed")?;
    Ok(())
}

/// Show the last recorded pipeline status.
pub fn show_status(config_path: Option<&str>, project_root_override: Option<&str>) -> Result<()> {
    let settings = load_settings(config_path, None, project_root_override)?;
    let recorder = StatusRecorder::new(settings.status_file_path());

    match recorder.read().context("Failed to read status file")? {
        Some(status) => {
            let rendered =
                serde_json::to_string_pretty(&status).context("Failed to encode status")?;
            println!("{}", rendered);
        }
        None => println!("no status yet"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use indexer_pipeline::{RunReport, StageError};
    use indexer_types::Stage;
    use pretty_assertions::assert_eq;

    fn test_settings(dir: &tempfile::TempDir) -> Settings {
        Settings {
            project_root: dir.path().to_string_lossy().to_string(),
            interpreter: "none".to_string(),
            debounce_ms: 60_000,
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_notifications() {
        assert_eq!(
            parse_notification(r#"{"op":"upsert","event":{"id":"42","title":"Expo"}}"#).unwrap(),
            Notification::Upsert {
                event: json!({"id": "42", "title": "Expo"})
            }
        );
        assert_eq!(
            parse_notification(r#"{"op":"delete","id":7}"#).unwrap(),
            Notification::Delete { id: json!(7) }
        );
        assert_eq!(
            parse_notification(r#"{"op":"rebuild"}"#).unwrap(),
            Notification::Rebuild
        );
        assert_eq!(
            parse_notification(r#"{"op":"status"}"#).unwrap(),
            Notification::Status
        );
    }

    #[test]
    fn test_parse_malformed() {
        assert!(parse_notification("not json").is_err());
        assert!(parse_notification(r#"{"op":"truncate"}"#).is_err());
        assert!(parse_notification(r#"{"op":"upsert"}"#).is_err());
    }

    #[test]
    fn test_outcome_json() {
        let completed = Ok(RunOutcome::Completed(RunReport {
            attempts: 2,
            changes_file: Some(PathBuf::from("/srv/tmp/model_changes.json")),
            batch_len: 3,
        }));
        assert_eq!(
            outcome_json(&completed),
            json!({
                "ok": true,
                "outcome": "completed",
                "attempts": 2,
                "changes": 3,
                "changes_file": "/srv/tmp/model_changes.json",
            })
        );

        assert_eq!(outcome_json(&Ok(RunOutcome::Skipped))["outcome"], "skipped");

        let failed = Err(PipelineError::Exhausted {
            attempts: 1,
            stage: Stage::Build,
            last: StageError::Exit {
                program: "build".to_string(),
                code: Some(1),
            },
        });
        let value = outcome_json(&failed);
        assert_eq!(value["ok"], false);
        assert!(value["error"].as_str().unwrap().contains("exited with code 1"));
    }

    #[test]
    fn test_status_json_without_status() {
        assert_eq!(
            status_json(None).unwrap(),
            json!({ "message": "no status yet" })
        );
    }

    #[test]
    fn test_load_settings_overrides() {
        let settings = load_settings(None, Some("debug"), Some("/srv/app")).unwrap();
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.project_root, "/srv/app");
    }

    #[tokio::test]
    async fn test_serve_records_notifications() {
        let dir = tempfile::TempDir::new().unwrap();
        let settings = test_settings(&dir);
        let coordinator = IndexCoordinator::new(&settings).unwrap();

        let input = concat!(
            "{\"op\":\"upsert\",\"event\":{\"id\":\"42\",\"title\":\"Expo\"}}\n",
            "\n",
            "{\"op\":\"delete\",\"id\":7}\n",
            "garbage\n",
            "{\"op\":\"delete\",\"id\":null}\n",
            "{\"op\":\"status\"}\n",
        );
        let stats = serve(&coordinator, input.as_bytes(), std::future::pending())
            .await
            .unwrap();

        assert_eq!(
            stats,
            ServeStats {
                upserts: 1,
                deletes: 1,
                rebuilds: 0,
                status_requests: 1,
                malformed: 2,
                interrupted: false,
            }
        );

        // no stage scripts exist, so the final run fails before flushing
        assert_eq!(coordinator.pending_len(), 2);
        let status = coordinator.last_status().unwrap().unwrap();
        assert!(!status.ok);
        assert!(status.error.unwrap().contains("executable not found"));
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let dir = tempfile::TempDir::new().unwrap();
        let coordinator = IndexCoordinator::new(&test_settings(&dir)).unwrap();

        let (_writer, reader) = tokio::io::duplex(64);
        let stats = serve(&coordinator, BufReader::new(reader), std::future::ready(()))
            .await
            .unwrap();

        assert!(stats.interrupted);
        assert!(coordinator.last_status().unwrap().is_none());
    }
}
