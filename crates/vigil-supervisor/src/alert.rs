//! ---
//! vigil_section: "07-resilience-fault-tolerance"
//! vigil_subsection: "module"
//! vigil_type: "source"
//! vigil_scope: "code"
//! vigil_description: "Crash alert formatting and best-effort remote delivery."
//! vigil_version: "v0.0.0-prealpha"
//! vigil_owner: "tbd"
//! ---
//! One network attempt per alert, bounded by a timeout and never retried.
//! Failures are logged and otherwise swallowed; the crash log already holds
//! the durable record.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use vigil_common::{AlertConfig, AlertSettings};

use crate::error::DeliveryError;
use crate::exit::{ExitReason, StopEvent};

/// Remote notification endpoint.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, bot_token: &str, chat_id: &str, text: &str) -> Result<(), DeliveryError>;
}

/// Telegram Bot API `sendMessage` client.
#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    client: reqwest::Client,
    api_base: String,
}

impl TelegramNotifier {
    pub fn new(api_base: impl Into<String>, timeout: Duration) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| DeliveryError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_owned(),
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, bot_token: &str, chat_id: &str, text: &str) -> Result<(), DeliveryError> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, bot_token);
        let response = self
            .client
            .post(url)
            .json(&json!({ "chat_id": chat_id, "text": text }))
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        let accepted = body.get("ok").and_then(Value::as_bool).unwrap_or(status.is_success());
        if status.is_success() && accepted {
            return Ok(());
        }
        let description = body
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("rejected").to_owned());
        Err(DeliveryError::Rejected {
            status: status.as_u16(),
            description,
        })
    }
}

/// Endpoint that could not be set up; every send fails with the setup error.
#[derive(Debug, Clone)]
pub struct UnavailableNotifier {
    reason: String,
}

impl UnavailableNotifier {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

#[async_trait]
impl Notifier for UnavailableNotifier {
    async fn send(&self, _: &str, _: &str, _: &str) -> Result<(), DeliveryError> {
        Err(DeliveryError::Transport(format!("notifier unavailable: {}", self.reason)))
    }
}

// The request URL embeds the bot token; keep it out of error messages.
fn transport_error(err: reqwest::Error) -> DeliveryError {
    DeliveryError::Transport(err.without_url().to_string())
}

/// What happened to one alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    /// No credentials configured; the alert was logged locally only.
    Skipped,
    Failed(String),
}

impl DispatchOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DispatchOutcome::Delivered)
    }
}

fn describe_reason(reason: ExitReason) -> &'static str {
    match reason {
        ExitReason::Success => "stopped cleanly",
        ExitReason::Signaled => "killed by a signal",
        ExitReason::NonZeroExit => "exited with a non-zero status",
        ExitReason::Unknown => "stopped for an unknown reason",
    }
}

/// Operator-facing alert text.
pub fn format_alert(config: &AlertConfig, event: &StopEvent, host: &str, at: DateTime<Utc>) -> String {
    let exit_code = event
        .exit_code
        .map(|code| code.to_string())
        .unwrap_or_else(|| "n/a".to_owned());
    format!(
        "[ALERT] Service failure at {hospital} ({region})\n\
         Service: {service}\n\
         Reason: {reason} ({raw})\n\
         Exit code: {exit_code}\n\
         Host: {host}\n\
         Time: {time}",
        hospital = config.hospital_name,
        region = config.region,
        service = event.service,
        reason = describe_reason(event.reason),
        raw = event.raw_reason,
        time = at.to_rfc3339_opts(SecondsFormat::Secs, true),
    )
}

fn local_host_name() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_owned())
}

/// Formats crash alerts and hands them to a [`Notifier`].
#[derive(Clone)]
pub struct AlertDispatcher {
    notifier: Arc<dyn Notifier>,
    timeout: Duration,
    host: String,
}

impl std::fmt::Debug for AlertDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertDispatcher")
            .field("timeout", &self.timeout)
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

impl AlertDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, timeout: Duration) -> Self {
        Self {
            notifier,
            timeout,
            host: local_host_name(),
        }
    }

    /// Dispatcher talking to the Telegram endpoint from `[alert]` settings.
    pub fn telegram(settings: &AlertSettings) -> Result<Self, DeliveryError> {
        let notifier = TelegramNotifier::new(settings.api_base.clone(), settings.timeout)?;
        Ok(Self::new(Arc::new(notifier), settings.timeout))
    }

    /// Like [`AlertDispatcher::telegram`], degrading to a notifier that
    /// always fails when the HTTP client cannot be built.
    pub fn telegram_or_unavailable(settings: &AlertSettings) -> Self {
        Self::telegram(settings).unwrap_or_else(|err| {
            warn!(error = %err, "alert client unavailable; failures are recorded locally only");
            Self::new(Arc::new(UnavailableNotifier::new(err.to_string())), settings.timeout)
        })
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Deliver one alert for `event`. Never fails.
    pub async fn notify(&self, event: &StopEvent, config: &AlertConfig) -> DispatchOutcome {
        let text = format_alert(config, event, &self.host, Utc::now());
        self.deliver(&event.service, config, &text).await
    }

    /// Run [`AlertDispatcher::notify`] on a background task.
    pub fn spawn_notify(&self, event: StopEvent, config: Arc<AlertConfig>) -> JoinHandle<DispatchOutcome> {
        let dispatcher = self.clone();
        tokio::spawn(async move { dispatcher.notify(&event, &config).await })
    }

    /// Send a synthetic alert so operators can verify credentials.
    pub async fn send_test(&self, config: &AlertConfig) -> DispatchOutcome {
        let text = format!(
            "[TEST] Vigil alert channel check from {} ({})\nHost: {}\nTime: {}",
            config.hospital_name,
            config.region,
            self.host,
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        self.deliver("alert-test", config, &text).await
    }

    async fn deliver(&self, service: &str, config: &AlertConfig, text: &str) -> DispatchOutcome {
        let Some((token, chat_id)) = config.credentials() else {
            info!(service, "alert credentials not configured; failure recorded locally only");
            return DispatchOutcome::Skipped;
        };
        match tokio::time::timeout(self.timeout, self.notifier.send(token, chat_id, text)).await {
            Ok(Ok(())) => {
                info!(service, "crash alert delivered");
                DispatchOutcome::Delivered
            }
            Ok(Err(err)) => {
                warn!(service, error = %err, "crash alert delivery failed");
                DispatchOutcome::Failed(err.to_string())
            }
            Err(_) => {
                let err = DeliveryError::Timeout(self.timeout);
                warn!(service, error = %err, "crash alert delivery failed");
                DispatchOutcome::Failed(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    struct Capture {
        sent: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl Notifier for Capture {
        async fn send(&self, bot_token: &str, chat_id: &str, text: &str) -> Result<(), DeliveryError> {
            self.sent
                .lock()
                .push((bot_token.to_owned(), chat_id.to_owned(), text.to_owned()));
            Ok(())
        }
    }

    struct Stalled;

    #[async_trait]
    impl Notifier for Stalled {
        async fn send(&self, _: &str, _: &str, _: &str) -> Result<(), DeliveryError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    fn configured() -> AlertConfig {
        let mut config = AlertConfig::default();
        config.hospital_name = "St. Example".into();
        config.region = "North".into();
        config.bot_token = Some("123:abc".into());
        config.chat_id = Some("-100".into());
        config
    }

    #[test]
    fn message_embeds_site_service_and_code() {
        let event = StopEvent::new("broker", ExitReason::Signaled, Some(137));
        let at = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let text = format_alert(&configured(), &event, "gw-01", at);
        assert!(text.contains("St. Example (North)"));
        assert!(text.contains("Service: broker"));
        assert!(text.contains("killed by a signal (signaled)"));
        assert!(text.contains("Exit code: 137"));
        assert!(text.contains("Host: gw-01"));
        assert!(text.contains("Time: 2024-05-01T10:00:00Z"));
    }

    #[test]
    fn message_keeps_the_supervisor_result() {
        let event = StopEvent::from_supervisor_env("orchestrator", Some("oom-kill"), Some("killed"), Some("KILL"));
        let text = format_alert(&configured(), &event, "gw-01", Utc::now());
        assert!(text.contains("stopped for an unknown reason (oom-kill)"), "{text}");
    }

    #[tokio::test]
    async fn delivers_with_credentials() {
        let capture = Arc::new(Capture::default());
        let dispatcher = AlertDispatcher::new(capture.clone(), Duration::from_secs(1)).with_host("gw");
        let event = StopEvent::new("dashboard", ExitReason::NonZeroExit, Some(1));
        let outcome = dispatcher.notify(&event, &configured()).await;
        assert_eq!(outcome, DispatchOutcome::Delivered);
        let sent = capture.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "123:abc");
        assert_eq!(sent[0].1, "-100");
    }

    #[tokio::test]
    async fn skips_without_credentials() {
        let capture = Arc::new(Capture::default());
        let dispatcher = AlertDispatcher::new(capture.clone(), Duration::from_secs(1));
        let event = StopEvent::new("broker", ExitReason::Signaled, Some(137));
        let outcome = dispatcher.notify(&event, &AlertConfig::default()).await;
        assert_eq!(outcome, DispatchOutcome::Skipped);
        assert!(capture.sent.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_endpoint_times_out() {
        let dispatcher = AlertDispatcher::new(Arc::new(Stalled), Duration::from_secs(5));
        let event = StopEvent::new("broker", ExitReason::Unknown, None);
        let outcome = dispatcher
            .spawn_notify(event, Arc::new(configured()))
            .await
            .unwrap();
        assert!(matches!(outcome, DispatchOutcome::Failed(ref reason) if reason.contains("timed out")));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_failed_outcome() {
        let dispatcher = AlertDispatcher::telegram(&AlertSettings {
            api_base: "http://127.0.0.1:9".into(),
            timeout: Duration::from_secs(2),
        })
        .unwrap();
        let outcome = dispatcher.send_test(&configured()).await;
        match outcome {
            DispatchOutcome::Failed(reason) => assert!(!reason.contains("123:abc")),
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
