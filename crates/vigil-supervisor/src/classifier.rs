//! ---
//! vigil_section: "07-resilience-fault-tolerance"
//! vigil_subsection: "module"
//! vigil_type: "source"
//! vigil_scope: "code"
//! vigil_description: "Stop-event classification feeding the crash log and alert dispatcher."
//! vigil_version: "v0.0.0-prealpha"
//! vigil_owner: "tbd"
//! ---
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error};
use vigil_common::AlertConfig;
use vigil_logging::{vigil_warn, LogContext};

use crate::alert::{AlertDispatcher, DispatchOutcome};
use crate::crash_log::{CrashLog, CrashRecord};
use crate::exit::StopEvent;
use crate::intent::StopIntents;

/// Verdict for one stop event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Clean,
    Failure(CrashRecord),
}

impl Classification {
    pub fn is_failure(&self) -> bool {
        matches!(self, Classification::Failure(_))
    }
}

/// Everything that happened while handling one stop event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopHandling {
    /// The event after stop-intent reclassification.
    pub event: StopEvent,
    pub classification: Classification,
    pub record_persisted: bool,
    /// `None` for clean stops; the dispatcher is not invoked for them.
    pub dispatch: Option<DispatchOutcome>,
}

/// Decides clean stop versus crash and fans failures out to the crash log
/// and the alert dispatcher.
pub struct CrashClassifier {
    log: Arc<dyn CrashLog>,
    dispatcher: AlertDispatcher,
    alert_config: Arc<AlertConfig>,
    intents: Option<StopIntents>,
}

impl CrashClassifier {
    pub fn new(log: Arc<dyn CrashLog>, dispatcher: AlertDispatcher, alert_config: Arc<AlertConfig>) -> Self {
        Self {
            log,
            dispatcher,
            alert_config,
            intents: None,
        }
    }

    /// Consult stop-intent markers before classifying.
    pub fn with_intents(mut self, intents: StopIntents) -> Self {
        self.intents = Some(intents);
        self
    }

    /// Only `Success` is clean.
    pub fn is_failure(event: &StopEvent) -> bool {
        !event.is_clean()
    }

    fn classify_and_record(&self, event: StopEvent) -> (StopEvent, Classification, bool) {
        let event = match &self.intents {
            Some(intents) if intents.consume(&event.service) => {
                debug!(
                    service = %event.service,
                    raw_reason = %event.raw_reason,
                    "stop was requested by the operator"
                );
                event.into_intentional()
            }
            _ => event,
        };

        if !Self::is_failure(&event) {
            debug!(service = %event.service, "clean stop");
            return (event, Classification::Clean, false);
        }

        let record = CrashRecord::from_event(&event);
        vigil_warn!(
            context = LogContext::new().with_service(&event.service),
            "service failure: {} (exit code {:?})",
            event.reason,
            event.exit_code
        );
        // The record must exist before any delivery attempt.
        let persisted = match self.log.append(&record) {
            Ok(()) => true,
            Err(err) => {
                error!(service = %event.service, error = %err, "unable to persist crash record");
                false
            }
        };
        (event, Classification::Failure(record), persisted)
    }

    /// Classify and record without attempting delivery.
    pub fn record(&self, event: StopEvent) -> StopHandling {
        let (event, classification, record_persisted) = self.classify_and_record(event);
        StopHandling {
            event,
            classification,
            record_persisted,
            dispatch: None,
        }
    }

    /// Classify, record and dispatch, waiting for the bounded delivery attempt.
    pub async fn handle(&self, event: StopEvent) -> StopHandling {
        let mut handling = self.record(event);
        if handling.classification.is_failure() {
            handling.dispatch = Some(self.dispatcher.notify(&handling.event, &self.alert_config).await);
        }
        handling
    }

    /// Classify and record now; delivery continues on a background task.
    pub fn handle_detached(&self, event: StopEvent) -> (Classification, Option<JoinHandle<DispatchOutcome>>) {
        let (event, classification, _) = self.classify_and_record(event);
        let task = classification
            .is_failure()
            .then(|| self.dispatcher.spawn_notify(event, Arc::clone(&self.alert_config)));
        (classification, task)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tempfile::tempdir;

    use super::*;
    use crate::alert::Notifier;
    use crate::crash_log::MemoryCrashLog;
    use crate::error::DeliveryError;
    use crate::exit::ExitReason;

    #[derive(Default)]
    struct Counting(Mutex<usize>);

    #[async_trait]
    impl Notifier for Counting {
        async fn send(&self, _: &str, _: &str, _: &str) -> Result<(), DeliveryError> {
            *self.0.lock() += 1;
            Err(DeliveryError::Transport("offline".into()))
        }
    }

    fn classifier(log: Arc<MemoryCrashLog>, notifier: Arc<Counting>) -> CrashClassifier {
        let mut config = AlertConfig::default();
        config.bot_token = Some("t".into());
        config.chat_id = Some("c".into());
        let dispatcher = AlertDispatcher::new(notifier, Duration::from_secs(1));
        CrashClassifier::new(log, dispatcher, Arc::new(config))
    }

    #[tokio::test]
    async fn failure_is_recorded_once_even_when_delivery_fails() {
        let log = Arc::new(MemoryCrashLog::new());
        let notifier = Arc::new(Counting::default());
        let classifier = classifier(log.clone(), notifier.clone());

        let handling = classifier
            .handle(StopEvent::new("broker", ExitReason::NonZeroExit, Some(2)))
            .await;
        assert!(handling.classification.is_failure());
        assert!(handling.record_persisted);
        assert!(matches!(handling.dispatch, Some(DispatchOutcome::Failed(_))));
        assert_eq!(log.len(), 1);
        assert_eq!(*notifier.0.lock(), 1);
    }

    #[test]
    fn record_persists_failures_without_dispatching() {
        let log = Arc::new(MemoryCrashLog::new());
        let notifier = Arc::new(Counting::default());
        let classifier = classifier(log.clone(), notifier.clone());

        let handling = classifier.record(StopEvent::new("orchestrator", ExitReason::Signaled, Some(137)));
        assert!(handling.classification.is_failure());
        assert!(handling.record_persisted);
        assert_eq!(handling.dispatch, None);
        assert_eq!(log.len(), 1);
        assert_eq!(*notifier.0.lock(), 0);
    }

    #[tokio::test]
    async fn clean_stop_has_no_side_effects() {
        let log = Arc::new(MemoryCrashLog::new());
        let notifier = Arc::new(Counting::default());
        let classifier = classifier(log.clone(), notifier.clone());

        let handling = classifier
            .handle(StopEvent::new("broker", ExitReason::Success, Some(0)))
            .await;
        assert_eq!(handling.classification, Classification::Clean);
        assert_eq!(handling.dispatch, None);
        assert!(log.is_empty());
        assert_eq!(*notifier.0.lock(), 0);
    }

    #[tokio::test]
    async fn intentional_stop_is_clean_once() {
        let dir = tempdir().unwrap();
        let intents = StopIntents::new(dir.path());
        let log = Arc::new(MemoryCrashLog::new());
        let classifier =
            classifier(log.clone(), Arc::new(Counting::default())).with_intents(intents.clone());

        intents.mark("dashboard").unwrap();
        let first = classifier
            .handle(StopEvent::new("dashboard", ExitReason::Signaled, Some(143)))
            .await;
        assert_eq!(first.classification, Classification::Clean);
        assert_eq!(first.event.reason, ExitReason::Success);

        let second = classifier
            .handle(StopEvent::new("dashboard", ExitReason::Signaled, Some(143)))
            .await;
        assert!(second.classification.is_failure());
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn detached_dispatch_records_before_returning() {
        let log = Arc::new(MemoryCrashLog::new());
        let classifier = classifier(log.clone(), Arc::new(Counting::default()));
        let (classification, task) =
            classifier.handle_detached(StopEvent::new("orchestrator", ExitReason::Unknown, None));
        assert!(classification.is_failure());
        assert_eq!(log.len(), 1);
        let outcome = task.unwrap().await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Failed(_)));
    }
}
