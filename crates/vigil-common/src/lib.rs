//! ---
//! vigil_section: "01-core-functionality"
//! vigil_subsection: "module"
//! vigil_type: "source"
//! vigil_scope: "code"
//! vigil_description: "Shared primitives and utilities for the supervisor."
//! vigil_version: "v0.0.0-prealpha"
//! vigil_owner: "tbd"
//! ---
//! Core shared primitives for the Vigil supervisor workspace.
//! This crate exposes configuration loading, alert credential handling,
//! tracing initialisation and version metadata consumed across the workspace.

pub mod alert_config;
pub mod config;
pub mod logging;
pub mod version;

pub use alert_config::{AlertConfig, AlertConfigKey};
pub use config::{
    AlertSettings, InstallConfig, LifecycleConfig, LoadedSupervisorConfig, LoggingConfig,
    PathsConfig, ReclaimConfig, RestartPolicyKind, ServiceConfig, SupervisorConfig,
};
pub use logging::{init_console, init_tracing, LogFormat};
pub use version::VersionInfo;
