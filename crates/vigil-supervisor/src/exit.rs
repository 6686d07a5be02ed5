//! ---
//! vigil_section: "07-resilience-fault-tolerance"
//! vigil_subsection: "module"
//! vigil_type: "source"
//! vigil_scope: "code"
//! vigil_description: "Exit reasons and stop events reported by the process supervisor."
//! vigil_version: "v0.0.0-prealpha"
//! vigil_owner: "tbd"
//! ---
use std::str::FromStr;

use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};

/// Why a service process stopped. Anything unrecognised is `Unknown`, and
/// only `Success` counts as a clean stop.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ExitReason {
    Success,
    Signaled,
    NonZeroExit,
    Unknown,
}

impl ExitReason {
    /// Map a systemd `$SERVICE_RESULT` value.
    pub fn from_service_result(raw: &str) -> Self {
        match raw.trim() {
            "success" => ExitReason::Success,
            "signal" | "core-dump" => ExitReason::Signaled,
            "exit-code" => ExitReason::NonZeroExit,
            _ => ExitReason::Unknown,
        }
    }

    /// Fallback mapping from `$EXIT_CODE` (`exited`, `killed`, `dumped`)
    /// when no service result was provided.
    fn from_exit_kind(kind: &str, status: Option<i32>) -> Self {
        match (kind.trim(), status) {
            ("killed" | "dumped", _) => ExitReason::Signaled,
            ("exited", Some(code)) if code != 0 => ExitReason::NonZeroExit,
            _ => ExitReason::Unknown,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExitReason::Success)
    }
}

/// Parse `$EXIT_STATUS`: a numeric status, or a signal name mapped to `128 + signo`.
pub fn parse_exit_status(raw: &str) -> Option<i32> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(code) = raw.parse::<i32>() {
        return Some(code);
    }
    let upper = raw.to_ascii_uppercase();
    let name = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{upper}")
    };
    Signal::from_str(&name).ok().map(|signal| 128 + signal as i32)
}

/// One stop of a managed service as observed by the stop hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StopEvent {
    pub service: String,
    pub reason: ExitReason,
    pub exit_code: Option<i32>,
    /// Raw supervisor result, kept for diagnostics.
    pub raw_reason: String,
}

impl StopEvent {
    pub fn new(service: impl Into<String>, reason: ExitReason, exit_code: Option<i32>) -> Self {
        Self {
            service: service.into(),
            raw_reason: reason.to_string(),
            reason,
            exit_code,
        }
    }

    /// Build an event from the variables systemd exports to `ExecStopPost=`.
    pub fn from_supervisor_env(
        service: impl Into<String>,
        service_result: Option<&str>,
        exit_code_kind: Option<&str>,
        exit_status: Option<&str>,
    ) -> Self {
        let exit_code = exit_status.and_then(parse_exit_status);
        let (reason, raw_reason) = match service_result.map(str::trim).filter(|r| !r.is_empty()) {
            Some(result) => (ExitReason::from_service_result(result), result.to_owned()),
            None => {
                let kind = exit_code_kind.unwrap_or_default();
                (ExitReason::from_exit_kind(kind, exit_code), kind.to_owned())
            }
        };
        Self {
            service: service.into(),
            reason,
            exit_code,
            raw_reason,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.reason.is_success()
    }

    /// The same event reclassified as an intentional, clean stop.
    pub(crate) fn into_intentional(self) -> Self {
        Self {
            reason: ExitReason::Success,
            ..self
        }
    }
}
