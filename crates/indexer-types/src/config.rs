//! Configuration loading for the event indexer.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! Environment variables use the `INDEXER_` prefix with the field name in
//! upper case (`INDEXER_DEBOUNCE_MS`, `INDEXER_BUILD_SCRIPT`, ...).

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File, Map};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

/// File name of the handoff batch inside `changes_dir`.
pub const CHANGES_FILE_NAME: &str = "model_changes.json";

/// File name of the status record inside `changes_dir`.
pub const STATUS_FILE_NAME: &str = "model_last_status.json";

/// Interpreter setting value that resolves an interpreter automatically.
pub const INTERPRETER_AUTO: &str = "auto";

/// Interpreter setting value that executes stage scripts directly.
pub const INTERPRETER_NONE: &str = "none";

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Base directory for resolving relative paths
    #[serde(default = "default_project_root")]
    pub project_root: String,

    /// Directory holding the handoff and status files
    #[serde(default = "default_changes_dir")]
    pub changes_dir: String,

    /// Build-stage executable
    #[serde(default = "default_build_script")]
    pub build_script: String,

    /// Ingest-stage executable
    #[serde(default = "default_ingest_script")]
    pub ingest_script: String,

    /// Execution-environment selector: "auto", "none" (or empty), or an
    /// interpreter path
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Debounce delay in milliseconds (0 = next tick)
    #[serde(default)]
    pub debounce_ms: u64,

    /// Per-stage timeout in milliseconds (0 = no timeout)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Attempts per pipeline run
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay between failed attempts in milliseconds
    #[serde(default)]
    pub retry_backoff_ms: u64,

    /// Merge a failed batch back into the pending changes
    #[serde(default = "default_requeue_on_failure")]
    pub requeue_on_failure: bool,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_project_root() -> String {
    ".".to_string()
}

fn default_changes_dir() -> String {
    "tmp".to_string()
}

fn default_build_script() -> String {
    "scripts/build_model.py".to_string()
}

fn default_ingest_script() -> String {
    "scripts/ingest.py".to_string()
}

fn default_interpreter() -> String {
    INTERPRETER_AUTO.to_string()
}

fn default_timeout_ms() -> u64 {
    30 * 60 * 1000
}

fn default_max_attempts() -> u32 {
    1
}

fn default_requeue_on_failure() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            project_root: default_project_root(),
            changes_dir: default_changes_dir(),
            build_script: default_build_script(),
            ingest_script: default_ingest_script(),
            interpreter: default_interpreter(),
            debounce_ms: 0,
            timeout_ms: default_timeout_ms(),
            max_attempts: default_max_attempts(),
            retry_backoff_ms: 0,
            requeue_on_failure: default_requeue_on_failure(),
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/event-indexer/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (INDEXER_*)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, IndexerError> {
        let config_dir = ProjectDirs::from("", "", "event-indexer")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        Self::load_layers(Some(&default_config_path), cli_config_path, None)
    }

    /// Build the layered config.
    ///
    /// `env` replaces the process environment as the `INDEXER_*` source when given.
    fn load_layers(
        default_config_path: Option<&Path>,
        cli_config_path: Option<&str>,
        env: Option<Map<String, String>>,
    ) -> Result<Self, IndexerError> {
        let mut builder = Config::builder()
            .set_default("project_root", default_project_root())
            .map_err(|e| IndexerError::Config(e.to_string()))?
            .set_default("changes_dir", default_changes_dir())
            .map_err(|e| IndexerError::Config(e.to_string()))?
            .set_default("build_script", default_build_script())
            .map_err(|e| IndexerError::Config(e.to_string()))?
            .set_default("ingest_script", default_ingest_script())
            .map_err(|e| IndexerError::Config(e.to_string()))?
            .set_default("interpreter", default_interpreter())
            .map_err(|e| IndexerError::Config(e.to_string()))?
            .set_default("timeout_ms", default_timeout_ms() as i64)
            .map_err(|e| IndexerError::Config(e.to_string()))?
            .set_default("max_attempts", default_max_attempts() as i64)
            .map_err(|e| IndexerError::Config(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| IndexerError::Config(e.to_string()))?;

        if let Some(path) = default_config_path {
            builder = builder.add_source(File::with_name(&path.to_string_lossy()).required(false));
        }

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Flat keys: INDEXER_DEBOUNCE_MS -> debounce_ms
        builder = builder.add_source(
            Environment::with_prefix("INDEXER")
                .prefix_separator("_")
                .try_parsing(true)
                .source(env),
        );

        let config = builder
            .build()
            .map_err(|e| IndexerError::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| IndexerError::Config(e.to_string()))
    }

    /// Resolve a configured path against the project root, expanding `~`.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let expanded = PathBuf::from(shellexpand::tilde(path).as_ref());
        if expanded.is_absolute() {
            return expanded;
        }
        self.root_dir().join(expanded)
    }

    /// Project root with `~` expanded.
    pub fn root_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.project_root).as_ref())
    }

    /// Directory holding the handoff and status files
    pub fn changes_dir_path(&self) -> PathBuf {
        self.resolve_path(&self.changes_dir)
    }

    /// Location of the handoff batch
    pub fn changes_file_path(&self) -> PathBuf {
        self.changes_dir_path().join(CHANGES_FILE_NAME)
    }

    /// Location of the status record
    pub fn status_file_path(&self) -> PathBuf {
        self.changes_dir_path().join(STATUS_FILE_NAME)
    }

    /// Build-stage executable
    pub fn build_script_path(&self) -> PathBuf {
        self.resolve_path(&self.build_script)
    }

    /// Ingest-stage executable
    pub fn ingest_script_path(&self) -> PathBuf {
        self.resolve_path(&self.ingest_script)
    }

    /// Debounce delay
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Per-stage timeout, `None` when disabled
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    /// Attempts per run, never below one
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Initial delay between failed attempts
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Interpreter used to launch the stage scripts.
    ///
    /// Returns `None` when scripts are executed directly.
    pub fn resolved_interpreter(&self) -> Option<PathBuf> {
        let python_bin = std::env::var("PYTHON_BIN").ok();
        self.resolve_interpreter_with(python_bin.as_deref())
    }

    fn resolve_interpreter_with(&self, python_bin: Option<&str>) -> Option<PathBuf> {
        let selector = self.interpreter.trim();
        if selector.is_empty() || selector.eq_ignore_ascii_case(INTERPRETER_NONE) {
            return None;
        }
        if !selector.eq_ignore_ascii_case(INTERPRETER_AUTO) {
            return Some(PathBuf::from(shellexpand::tilde(selector).as_ref()));
        }

        if let Some(bin) = python_bin.filter(|b| Path::new(b).exists()) {
            return Some(PathBuf::from(bin));
        }

        let venv = if cfg!(windows) {
            self.root_dir().join("venv").join("Scripts").join("python.exe")
        } else {
            self.root_dir().join("venv").join("bin").join("python")
        };
        if venv.exists() {
            return Some(venv);
        }

        // Fall back to the launcher on PATH
        if cfg!(windows) {
            Some(PathBuf::from("py"))
        } else {
            Some(PathBuf::from("python"))
        }
    }
}
