//! End-to-end coordinator tests against real stage processes.
//!
//! Notifications flow through the debounce timer, the handoff file and
//! both stage scripts; assertions read the scripts' invocation log.
#![cfg(unix)]

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;

use e2e_tests::{wait_for, TestHarness, LOGGING_BUILD};
use indexer_pipeline::{RunOutcome, RunReport};
use indexer_types::EventRecord;

#[tokio::test]
async fn test_notifications_run_pipeline_once() {
    let harness = TestHarness::new();
    let coordinator = harness.coordinator();

    coordinator.notify_upsert_value(json!({"id": "42", "title": "Expo", "city": "Lisbon"}));
    coordinator.notify_delete("7");

    let finished = wait_for(Duration::from_secs(5), || {
        matches!(coordinator.last_status(), Ok(Some(_)))
    })
    .await;
    assert!(finished, "pipeline did not record a status");

    let changes_file = harness.settings.changes_file_path();
    assert_eq!(
        harness.invocations(),
        vec![
            format!("build --rebuild --changes-file {}", changes_file.display()),
            format!("ingest --ingest-all --changes-file {}", changes_file.display()),
        ]
    );

    let batch = harness.seen_batch();
    assert_eq!(batch.upserts.len(), 1);
    assert_eq!(batch.upserts[0].id, "42");
    assert_eq!(batch.upserts[0].field("city"), Some(&json!("Lisbon")));
    assert_eq!(batch.deletes, vec!["7".to_string()]);

    let status = coordinator.last_status().unwrap().unwrap();
    assert!(status.ok);
    assert_eq!(status.attempts, Some(1));
    assert_eq!(coordinator.pending_len(), 0);
}

#[tokio::test]
async fn test_burst_coalesces_into_single_run() {
    let mut harness = TestHarness::new();
    harness.settings.debounce_ms = 200;
    let coordinator = harness.coordinator();

    for i in 0..10 {
        coordinator.notify_upsert(EventRecord::new(i.to_string()).with_field("rank", i));
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(harness.invocations().is_empty());

    let finished = wait_for(Duration::from_secs(5), || {
        harness.invocations_of("ingest").len() == 1
    })
    .await;
    assert!(finished, "pipeline did not run");

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(harness.invocations_of("build").len(), 1);
    assert_eq!(harness.seen_batch().upserts.len(), 10);
}

#[tokio::test]
async fn test_manual_trigger_while_running_is_skipped() {
    let mut harness = TestHarness::with_scripts(
        &format!("sleep 1\n{}", LOGGING_BUILD),
        e2e_tests::LOGGING_INGEST,
    );
    harness.settings.debounce_ms = 0;
    let coordinator = harness.coordinator();

    coordinator.notify_delete("1");
    assert!(wait_for(Duration::from_secs(5), || coordinator.is_running()).await);

    assert_eq!(
        coordinator.trigger_rebuild_now().await.unwrap(),
        RunOutcome::Skipped
    );

    // recorded during the run, picked up by the next one
    coordinator.notify_delete("2");
    assert!(wait_for(Duration::from_secs(5), || !coordinator.is_running()).await);
    assert_eq!(harness.invocations_of("build").len(), 1);
    assert_eq!(coordinator.pending_len(), 1);

    let outcome = coordinator.trigger_rebuild_now().await.unwrap();
    assert!(matches!(outcome, RunOutcome::Completed(RunReport { batch_len: 1, .. })));
    assert_eq!(harness.seen_batch().deletes, vec!["2".to_string()]);
}

#[tokio::test]
async fn test_manual_trigger_with_nothing_pending_runs_full_rebuild() {
    let harness = TestHarness::new();
    let coordinator = harness.coordinator();

    let outcome = coordinator.trigger_rebuild_now().await.unwrap();
    assert!(matches!(
        outcome,
        RunOutcome::Completed(RunReport {
            changes_file: None,
            ..
        })
    ));
    assert_eq!(
        harness.invocations(),
        vec!["build --rebuild".to_string(), "ingest --ingest-all".to_string()]
    );
}

#[tokio::test]
async fn test_handoff_write_failure_keeps_pending_changes() {
    let mut harness = TestHarness::new();
    std::fs::write(harness.root.join("blocked"), "not a directory").unwrap();
    harness.settings.changes_dir = "blocked".to_string();
    harness.settings.debounce_ms = 60_000;
    let coordinator = harness.coordinator();

    coordinator.notify_upsert(EventRecord::new("1"));
    coordinator.notify_delete("2");

    assert!(coordinator.flush().is_none());
    assert_eq!(coordinator.pending_len(), 2);

    // the run falls back to a full rebuild and keeps the changes
    let outcome = coordinator.trigger_rebuild_now().await.unwrap();
    assert!(matches!(
        outcome,
        RunOutcome::Completed(RunReport {
            changes_file: None,
            ..
        })
    ));
    assert_eq!(coordinator.pending_len(), 2);
    assert_eq!(harness.invocations_of("build"), vec!["build --rebuild".to_string()]);
    coordinator.shutdown();
}
