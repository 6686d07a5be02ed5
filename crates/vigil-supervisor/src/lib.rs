//! ---
//! vigil_section: "07-resilience-fault-tolerance"
//! vigil_subsection: "module"
//! vigil_type: "source"
//! vigil_scope: "code"
//! vigil_description: "Service lifecycle supervisor with port reclamation and crash alerting."
//! vigil_version: "v0.0.0-prealpha"
//! vigil_owner: "tbd"
//! ---
//! Host-local supervision for a fixed set of interdependent services.
//!
//! The [`LifecycleController`] installs and drives services through an
//! external [`ProcessSupervisor`] (systemd in production), clearing stale
//! listeners with the [`ReclaimEngine`] before every start. Each stop of a
//! managed service reaches the [`CrashClassifier`] through the unit stop
//! hook; failures are written to the [`CrashLog`] and handed to the
//! [`AlertDispatcher`].

pub mod alert;
pub mod artifact;
pub mod classifier;
pub mod crash_log;
pub mod error;
pub mod exit;
pub mod helpers;
pub mod intent;
pub mod lifecycle;
pub mod lock;
pub mod reclaim;
pub mod registry;
pub mod state;
pub mod unit;

pub use alert::{
    format_alert, AlertDispatcher, DispatchOutcome, Notifier, TelegramNotifier, UnavailableNotifier,
};
pub use artifact::{ArtifactProvider, LocalArtifacts};
pub use classifier::{Classification, CrashClassifier, StopHandling};
pub use crash_log::{CrashLog, CrashRecord, FileCrashLog, MemoryCrashLog};
pub use error::{
    ConfigurationError, CrashLogError, DeliveryError, ReclamationError, Result, SupervisorError,
};
pub use exit::{ExitReason, StopEvent};
pub use helpers::HelperCommands;
pub use intent::StopIntents;
pub use lifecycle::{
    LifecycleController, LifecycleSettings, Operation, OperationReport, ServiceAction,
    ServiceOutcome,
};
pub use lock::OperationLock;
pub use reclaim::{
    KillOutcome, ProcessInfo, ProcessTable, ReclaimEngine, ReclaimReport, ReclaimTarget,
    SystemProcessTable, Termination,
};
pub use registry::{RestartPolicy, ServiceRegistry, ServiceSpec};
pub use state::{ServiceState, ServiceStatus, StateTable};
pub use unit::{ActiveState, ProcessSupervisor, SystemdSupervisor, UnitDefinition, UnitStatus};
