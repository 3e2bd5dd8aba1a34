//! End-to-end test infrastructure for the event indexer.
//!
//! Provides a shared TestHarness that lays out a throwaway project with
//! shell scripts standing in for the build and ingest stages. Each script
//! appends its invocation to a log so tests can assert on what ran.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use indexer_pipeline::{IndexCoordinator, ProcessExecutor};
use indexer_types::{ChangeBatch, Settings};

/// Build script that logs its arguments and keeps a copy of the batch it saw.
pub const LOGGING_BUILD: &str = r#"echo "build $*" >> "$STAGE_LOG"
if [ -n "$CHANGES_FILE" ]; then cp "$CHANGES_FILE" "$SEEN_BATCH"; fi"#;

/// Ingest script that logs its arguments.
pub const LOGGING_INGEST: &str = r#"echo "ingest $*" >> "$STAGE_LOG""#;

/// Shared test harness for E2E tests.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    /// Project root
    pub root: PathBuf,
    /// Settings pointing at the harness scripts
    pub settings: Settings,
    /// Invocation log appended to by the stage scripts
    pub log_path: PathBuf,
    /// Copy of the last batch the build stage received
    pub seen_batch_path: PathBuf,
}

impl TestHarness {
    /// Create a harness whose stages log and succeed.
    pub fn new() -> Self {
        Self::with_scripts(LOGGING_BUILD, LOGGING_INGEST)
    }

    /// Create a harness with custom stage script bodies.
    ///
    /// Bodies run under `/bin/sh` with `STAGE_LOG`, `SEEN_BATCH` and
    /// `STATE_DIR` exported.
    pub fn with_scripts(build_body: &str, ingest_body: &str) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path().to_path_buf();
        let log_path = root.join("stages.log");
        let seen_batch_path = root.join("seen_batch.json");

        let scripts = root.join("scripts");
        std::fs::create_dir_all(&scripts).expect("Failed to create scripts dir");
        let prelude = format!(
            "#!/bin/sh\nexport STAGE_LOG='{}'\nexport SEEN_BATCH='{}'\nexport STATE_DIR='{}'\n",
            log_path.display(),
            seen_batch_path.display(),
            root.display()
        );
        write_script(&scripts.join("build.sh"), &format!("{}{}\n", prelude, build_body));
        write_script(&scripts.join("ingest.sh"), &format!("{}{}\n", prelude, ingest_body));

        let settings = Settings {
            project_root: root.to_string_lossy().to_string(),
            build_script: "scripts/build.sh".to_string(),
            ingest_script: "scripts/ingest.sh".to_string(),
            interpreter: "none".to_string(),
            debounce_ms: 100,
            timeout_ms: 10_000,
            ..Default::default()
        };

        Self {
            _temp_dir: temp_dir,
            root,
            settings,
            log_path,
            seen_batch_path,
        }
    }

    /// Build a coordinator over the harness settings. Must run inside a runtime.
    pub fn coordinator(&self) -> IndexCoordinator {
        IndexCoordinator::with_executor(&self.settings, Arc::new(ProcessExecutor))
            .expect("Failed to create coordinator")
    }

    /// Logged stage invocations, one per line.
    pub fn invocations(&self) -> Vec<String> {
        std::fs::read_to_string(&self.log_path)
            .map(|log| log.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Logged invocations of one stage.
    pub fn invocations_of(&self, stage: &str) -> Vec<String> {
        self.invocations()
            .into_iter()
            .filter(|line| line.split_whitespace().next() == Some(stage))
            .collect()
    }

    /// The batch the build stage last received.
    pub fn seen_batch(&self) -> ChangeBatch {
        let bytes = std::fs::read(&self.seen_batch_path).expect("Build stage saw no batch");
        ChangeBatch::from_bytes(&bytes).expect("Failed to parse seen batch")
    }

    /// Remove a stage script.
    pub fn remove_script(&self, name: &str) {
        std::fs::remove_file(self.root.join("scripts").join(name))
            .expect("Failed to remove script");
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn write_script(path: &Path, contents: &str) {
    std::fs::write(path, contents).expect("Failed to write script");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(path)
            .expect("Failed to stat script")
            .permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(path, perms).expect("Failed to make script executable");
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
