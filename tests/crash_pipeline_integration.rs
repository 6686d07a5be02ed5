//! ---
//! vigil_section: "15-testing-qa-runbook"
//! vigil_subsection: "integration-tests"
//! vigil_type: "source"
//! vigil_scope: "code"
//! vigil_description: "Stop hook classification, crash records and alert delivery."
//! vigil_version: "v0.0.0-prealpha"
//! vigil_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use vigil_common::AlertConfig;
use vigil_supervisor::{
    AlertDispatcher, Classification, CrashClassifier, CrashLog, DispatchOutcome, ExitReason,
    FileCrashLog, MemoryCrashLog, StopEvent, UnavailableNotifier,
};
use vigil_testharness::{configured_alerts, Harness, RecordingNotifier};

const TIMEOUT: Duration = Duration::from_secs(5);

fn broker_killed() -> StopEvent {
    StopEvent::from_supervisor_env("broker", Some("signal"), Some("killed"), Some("KILL"))
}

#[tokio::test]
async fn signal_kill_without_token_is_recorded_only() {
    let harness = Harness::new();
    let notifier = Arc::new(RecordingNotifier::accepting());
    let (classifier, log) = harness.classifier(notifier.clone(), AlertConfig::default(), TIMEOUT);

    let handling = classifier.handle(broker_killed()).await;

    assert_eq!(handling.dispatch, Some(DispatchOutcome::Skipped));
    assert!(handling.record_persisted);
    assert_eq!(notifier.attempt_count(), 0);
    let records = log.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].service_name, "broker");
    assert_eq!(records[0].exit_reason, ExitReason::Signaled);
    assert_eq!(records[0].exit_code, Some(137));
}

#[tokio::test]
async fn failure_with_credentials_is_delivered_once() {
    let harness = Harness::new();
    let notifier = Arc::new(RecordingNotifier::accepting());
    let (classifier, log) = harness.classifier(notifier.clone(), configured_alerts(), TIMEOUT);

    let event = StopEvent::from_supervisor_env(
        "orchestrator",
        Some("exit-code"),
        Some("exited"),
        Some("2"),
    );
    let handling = classifier.handle(event).await;

    assert_eq!(handling.dispatch, Some(DispatchOutcome::Delivered));
    assert_eq!(log.len(), 1);
    let sent = notifier.attempts();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].bot_token, "42:test-token");
    assert_eq!(sent[0].chat_id, "-1001");
    assert!(sent[0].text.contains("General Hospital"));
    assert!(sent[0].text.contains("East"));
    assert!(sent[0].text.contains("orchestrator"));
    assert!(sent[0].text.contains("test-gateway"));
    assert!(sent[0].text.contains("Exit code: 2"));
}

#[tokio::test]
async fn clean_exit_has_no_record_and_no_dispatch() {
    let harness = Harness::new();
    let notifier = Arc::new(RecordingNotifier::accepting());
    let (classifier, log) = harness.classifier(notifier.clone(), configured_alerts(), TIMEOUT);

    let event = StopEvent::from_supervisor_env("dashboard", Some("success"), Some("exited"), Some("0"));
    let handling = classifier.handle(event).await;

    assert_eq!(handling.classification, Classification::Clean);
    assert_eq!(handling.dispatch, None);
    assert!(log.is_empty());
    assert_eq!(notifier.attempt_count(), 0);
}

#[tokio::test]
async fn unrecognised_result_is_a_failure() {
    let harness = Harness::new();
    let notifier = Arc::new(RecordingNotifier::accepting());
    let (classifier, log) = harness.classifier(notifier, AlertConfig::default(), TIMEOUT);

    let event = StopEvent::from_supervisor_env("broker", Some("watchdog"), None, None);
    let handling = classifier.handle(event).await;

    assert!(handling.classification.is_failure());
    assert_eq!(log.records()[0].exit_reason, ExitReason::Unknown);
    assert_eq!(log.records()[0].exit_code, None);
}

#[tokio::test]
async fn rejected_delivery_still_leaves_one_record() {
    let harness = Harness::new();
    let notifier = Arc::new(RecordingNotifier::rejecting("chat not found"));
    let (classifier, log) = harness.classifier(notifier.clone(), configured_alerts(), TIMEOUT);

    let handling = classifier.handle(broker_killed()).await;

    assert!(matches!(handling.dispatch, Some(DispatchOutcome::Failed(ref reason)) if reason.contains("chat not found")));
    assert_eq!(log.len(), 1);
    assert_eq!(notifier.attempt_count(), 1);
}

#[tokio::test]
async fn unusable_alert_client_still_leaves_one_record() {
    let log = Arc::new(MemoryCrashLog::new());
    let dispatcher = AlertDispatcher::new(Arc::new(UnavailableNotifier::new("no TLS backend")), TIMEOUT);
    let classifier = CrashClassifier::new(log.clone(), dispatcher, Arc::new(configured_alerts()));

    let handling = classifier.handle(broker_killed()).await;

    assert!(matches!(handling.dispatch, Some(DispatchOutcome::Failed(ref reason)) if reason.contains("no TLS backend")));
    assert!(handling.record_persisted);
    assert_eq!(log.len(), 1);
}

#[test]
fn recording_without_a_runtime_appends_the_record() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("crashes.jsonl");
    let dispatcher = AlertDispatcher::new(Arc::new(UnavailableNotifier::new("offline")), TIMEOUT);
    let classifier = CrashClassifier::new(
        Arc::new(FileCrashLog::new(&path)),
        dispatcher,
        Arc::new(configured_alerts()),
    );

    let handling = classifier.record(broker_killed());

    assert!(handling.classification.is_failure());
    assert_eq!(handling.dispatch, None);
    let records = FileCrashLog::new(&path).recent(10).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].exit_reason, ExitReason::Signaled);
}

#[tokio::test(start_paused = true)]
async fn stalled_endpoint_times_out_after_recording() {
    let harness = Harness::new();
    let notifier = Arc::new(RecordingNotifier::hanging());
    let (classifier, log) =
        harness.classifier(notifier, configured_alerts(), Duration::from_secs(2));

    let handling = classifier.handle(broker_killed()).await;

    assert!(matches!(handling.dispatch, Some(DispatchOutcome::Failed(_))));
    assert_eq!(log.len(), 1);
}

#[tokio::test]
async fn controller_stop_is_not_reported_as_a_crash() {
    let harness = Harness::new();
    harness.controller.install().await.unwrap();
    harness.controller.start().await.unwrap();
    let notifier = Arc::new(RecordingNotifier::accepting());
    let (classifier, log) = harness.classifier(notifier.clone(), configured_alerts(), TIMEOUT);

    // systemd reports SIGTERM for a requested stop; the hook runs while the
    // intent marker is present.
    harness.controller.intents().mark("broker").unwrap();
    let handling = classifier
        .handle(StopEvent::from_supervisor_env("broker", Some("signal"), Some("killed"), Some("TERM")))
        .await;

    assert_eq!(handling.classification, Classification::Clean);
    assert!(log.is_empty());
    assert_eq!(notifier.attempt_count(), 0);
    assert!(!harness.controller.intents().is_marked("broker"));

    // A later crash of the same service is a failure again.
    let handling = classifier.handle(broker_killed()).await;
    assert!(handling.classification.is_failure());
    assert_eq!(log.len(), 1);
}

#[tokio::test]
async fn timed_out_stop_keeps_intent_for_the_late_hook() {
    let harness = Harness::new();
    harness.controller.install().await.unwrap();
    harness.controller.start().await.unwrap();
    harness.supervisor.fail_stop(&harness.unit("dashboard"));

    assert!(harness.controller.stop().await.is_err());
    assert!(harness.controller.intents().is_marked("dashboard"));
    assert!(!harness.controller.intents().is_marked("orchestrator"));

    // systemd finishes the stop job after the client gave up.
    let notifier = Arc::new(RecordingNotifier::accepting());
    let (classifier, log) = harness.classifier(notifier.clone(), configured_alerts(), TIMEOUT);
    let handling = classifier
        .handle(StopEvent::from_supervisor_env("dashboard", Some("signal"), Some("killed"), Some("TERM")))
        .await;

    assert_eq!(handling.classification, Classification::Clean);
    assert!(log.is_empty());
    assert_eq!(notifier.attempt_count(), 0);
    assert!(!harness.controller.intents().is_marked("dashboard"));
}

#[tokio::test]
async fn recorded_stop_updates_controller_state() {
    let harness = Harness::new();
    harness.controller.install().await.unwrap();
    harness.controller.start().await.unwrap();

    harness.controller.record_stop(&broker_killed());

    let broker = harness
        .controller
        .status()
        .into_iter()
        .find(|state| state.name() == "broker")
        .unwrap();
    assert_eq!(broker.last_exit_reason(), Some(ExitReason::Signaled));
    assert_eq!(broker.last_exit_code(), Some(137));
    assert!(!harness.controller.all_running());
}

#[test]
fn file_crash_log_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("crashes.jsonl");
    let event = broker_killed();
    {
        let log = FileCrashLog::new(&path);
        log.append(&vigil_supervisor::CrashRecord::from_event(&event)).unwrap();
    }
    let reopened = FileCrashLog::new(&path);
    let records = reopened.recent(10).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].exit_code, Some(137));
}
