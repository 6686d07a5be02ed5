//! ---
//! vigil_section: "07-resilience-fault-tolerance"
//! vigil_subsection: "module"
//! vigil_type: "source"
//! vigil_scope: "code"
//! vigil_description: "Error taxonomy for lifecycle supervision and crash alerting."
//! vigil_version: "v0.0.0-prealpha"
//! vigil_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::time::Duration;

use crate::lifecycle::OperationReport;

/// Result alias used throughout the supervisor crate.
pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Fatal configuration problems. Operations abort before mutating anything.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    /// The executable for a service is absent or lacks an execute bit.
    #[error("service '{service}' executable {} is missing or not executable", .path.display())]
    MissingExecutable { service: String, path: PathBuf },
    /// The artifact provider could not produce an executable.
    #[error("artifact for service '{service}' unavailable: {reason}")]
    ArtifactUnavailable { service: String, reason: String },
    /// A dependency names a service that is not declared.
    #[error("service '{service}' depends on unknown service '{dependency}'")]
    UnknownDependency { service: String, dependency: String },
    /// A service lists itself as a dependency.
    #[error("service '{0}' depends on itself")]
    SelfDependency(String),
    /// The dependency graph contains a cycle.
    #[error("dependency cycle detected between: {}", .0.join(", "))]
    CyclicDependency(Vec<String>),
    /// Two services share a name.
    #[error("service '{0}' declared more than once")]
    DuplicateService(String),
    /// The unit for a service has not been installed.
    #[error("service '{0}' is not installed; run `install` first")]
    NotInstalled(String),
}

/// Recoverable reclamation problems; logged and otherwise ignored.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReclamationError {
    /// The socket or process table could not be read.
    #[error("unable to inspect {target}: {reason}")]
    Discovery { target: String, reason: String },
    /// A discovered process survived the termination attempt.
    #[error("unable to terminate pid {pid} ({name}) holding {target}: {reason}")]
    Terminate {
        pid: u32,
        name: String,
        target: String,
        reason: String,
    },
}

/// Failures of the crash record log.
#[derive(Debug, thiserror::Error)]
pub enum CrashLogError {
    /// Wrapper for IO errors encountered while appending or reading.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON serialization issues.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// The advisory file lock could not be taken.
    #[error("unable to lock crash log: {0}")]
    Lock(String),
}

/// Failed delivery of a remote notification. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The endpoint did not answer within the configured bound.
    #[error("notification timed out after {0:?}")]
    Timeout(Duration),
    /// Transport-level failure (DNS, TLS, connection refused, ...).
    #[error("transport error: {0}")]
    Transport(String),
    /// The endpoint answered but refused the message.
    #[error("endpoint rejected notification (status {status}): {description}")]
    Rejected { status: u16, description: String },
}

/// Top-level error for lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// Fatal configuration error.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    /// A service did not reach Running. Already started services are left running.
    #[error("service '{service}' failed to start: {reason}")]
    StartFailure {
        service: String,
        reason: String,
        partial: Box<OperationReport>,
    },
    /// One or more services could not be stopped.
    #[error("failed to stop {}", .services.join(", "))]
    StopFailure {
        services: Vec<String>,
        partial: Box<OperationReport>,
    },
    /// The external process supervisor rejected or timed out a command.
    #[error("process supervisor command failed: {0}")]
    Unit(String),
    /// Another lifecycle invocation holds the operation lock.
    #[error("another lifecycle operation is in progress (lock {})", .0.display())]
    Busy(PathBuf),
    /// Wrapper for IO errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SupervisorError {
    /// Partial report attached to start/stop failures.
    pub fn partial_report(&self) -> Option<&OperationReport> {
        match self {
            SupervisorError::StartFailure { partial, .. }
            | SupervisorError::StopFailure { partial, .. } => Some(partial),
            _ => None,
        }
    }

    /// Whether this is a fatal configuration problem.
    pub fn is_configuration(&self) -> bool {
        matches!(self, SupervisorError::Configuration(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_lists_members() {
        let err = ConfigurationError::CyclicDependency(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "dependency cycle detected between: a, b");
    }

    #[test]
    fn missing_executable_mentions_path() {
        let err = ConfigurationError::MissingExecutable {
            service: "broker".into(),
            path: PathBuf::from("/opt/vigil/bin/broker"),
        };
        assert!(err.to_string().contains("/opt/vigil/bin/broker"));
    }
}
