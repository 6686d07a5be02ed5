//! ---
//! vigil_section: "03-persistence-logging"
//! vigil_subsection: "module"
//! vigil_type: "source"
//! vigil_scope: "code"
//! vigil_description: "Structured logging adapters and sinks."
//! vigil_version: "v0.0.0-prealpha"
//! vigil_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Structured logging helpers shared by the supervisor and its CLI.

use tracing::Level;
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

pub mod macros;

#[doc(hidden)]
pub use tracing;

/// Initialize a baseline tracing subscriber suitable for tests and tooling.
pub fn init() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Managed service name.
    pub service: Option<&'a str>,
    /// Unit name registered with the process supervisor.
    pub unit: Option<&'a str>,
    /// Process identifier, when known.
    pub pid: Option<u32>,
    /// Lifecycle operation in progress (install, start, ...).
    pub operation: Option<&'a str>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a service name.
    pub fn with_service(mut self, service: &'a str) -> Self {
        self.service = Some(service);
        self
    }

    /// Attach a unit name.
    pub fn with_unit(mut self, unit: &'a str) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Attach a process id.
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    /// Attach the lifecycle operation.
    pub fn with_operation(mut self, operation: &'a str) -> Self {
        self.operation = Some(operation);
        self
    }
}

/// High-level outcome used when emitting lifecycle log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEventOutcome {
    /// The operation completed successfully.
    Success,
    /// The operation completed with recoverable problems.
    Degraded,
    /// The operation failed or was aborted.
    Fault,
}

impl SystemEventOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            SystemEventOutcome::Success => "success",
            SystemEventOutcome::Degraded => "degraded",
            SystemEventOutcome::Fault => "fault",
        }
    }
}

/// Emit a standardized system event with an outcome.
pub fn log_system_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: SystemEventOutcome,
) {
    let ctx = context.cloned().unwrap_or_default();
    // `tracing::event!` needs a constant level, hence the match.
    match outcome {
        SystemEventOutcome::Success => tracing::event!(
            Level::INFO,
            event,
            outcome = outcome.as_str(),
            service = ctx.service.unwrap_or(""),
            unit = ctx.unit.unwrap_or(""),
            pid = ctx.pid.unwrap_or_default(),
            operation = ctx.operation.unwrap_or(""),
            message = %message
        ),
        SystemEventOutcome::Degraded => tracing::event!(
            Level::WARN,
            event,
            outcome = outcome.as_str(),
            service = ctx.service.unwrap_or(""),
            unit = ctx.unit.unwrap_or(""),
            pid = ctx.pid.unwrap_or_default(),
            operation = ctx.operation.unwrap_or(""),
            message = %message
        ),
        SystemEventOutcome::Fault => tracing::event!(
            Level::ERROR,
            event,
            outcome = outcome.as_str(),
            service = ctx.service.unwrap_or(""),
            unit = ctx.unit.unwrap_or(""),
            pid = ctx.pid.unwrap_or_default(),
            operation = ctx.operation.unwrap_or(""),
            message = %message
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macros_emit_without_panic() {
        init();
        let ctx = LogContext::new()
            .with_service("broker")
            .with_unit("vigil-broker.service")
            .with_pid(4242);
        vigil_info!(context = ctx.clone(), "service online");
        vigil_warn!("reclaim skipped port {}", 1883);
        vigil_error!(context = ctx, "exit code: {}", 137);
    }

    #[test]
    fn system_event_helper_emits_every_outcome() {
        init();
        let ctx = LogContext::new()
            .with_service("dashboard")
            .with_operation("start");
        for outcome in [
            SystemEventOutcome::Success,
            SystemEventOutcome::Degraded,
            SystemEventOutcome::Fault,
        ] {
            log_system_event(Some(&ctx), "test.event", "helper executed", outcome);
        }
        log_system_event(None, "test.event", "no context", SystemEventOutcome::Success);
    }
}
