//! ---
//! vigil_section: "07-resilience-fault-tolerance"
//! vigil_subsection: "module"
//! vigil_type: "source"
//! vigil_scope: "code"
//! vigil_description: "Lifecycle controller driving install, start, stop, restart and uninstall."
//! vigil_version: "v0.0.0-prealpha"
//! vigil_owner: "tbd"
//! ---
//! Operations walk the registry in dependency order (reverse order for
//! stops). They are sequential; callers serialize invocations with
//! [`crate::lock::OperationLock`].

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};
use vigil_common::SupervisorConfig;
use vigil_logging::{log_system_event, vigil_error, vigil_info, LogContext, SystemEventOutcome};

use crate::artifact::{ArtifactProvider, LocalArtifacts};
use crate::error::{ConfigurationError, ReclamationError, Result, SupervisorError};
use crate::exit::{ExitReason, StopEvent};
use crate::helpers::HelperCommands;
use crate::intent::StopIntents;
use crate::reclaim::{ReclaimEngine, ReclaimReport};
use crate::registry::{ServiceRegistry, ServiceSpec};
use crate::state::{ServiceState, ServiceStatus, StateTable};
use crate::unit::{
    stop_hook_command, unit_name, ActiveState, ProcessSupervisor, SystemdSupervisor, UnitDefinition,
    UnitStatus,
};

/// Runtime knobs for the controller.
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub unit_prefix: String,
    pub state_dir: PathBuf,
    pub bin_dir: PathBuf,
    /// Binary referenced by unit stop hooks and helper commands.
    pub control_binary: PathBuf,
    pub config_path: Option<PathBuf>,
    pub readiness_timeout: Duration,
    pub poll_interval: Duration,
    pub extra_ports: Vec<u16>,
    pub extra_process_names: Vec<String>,
}

impl LifecycleSettings {
    pub fn from_config(
        config: &SupervisorConfig,
        control_binary: PathBuf,
        config_path: Option<PathBuf>,
    ) -> Self {
        Self {
            unit_prefix: config.install.unit_prefix.clone(),
            state_dir: config.paths.state_dir.clone(),
            bin_dir: config.install.bin_dir.clone(),
            control_binary: config.install.control_binary.clone().unwrap_or(control_binary),
            config_path,
            readiness_timeout: config.lifecycle.readiness_timeout,
            poll_interval: config.lifecycle.poll_interval,
            extra_ports: config.reclaim.extra_ports.clone(),
            extra_process_names: config.reclaim.extra_process_names.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Operation {
    Install,
    Start,
    Stop,
    Restart,
    Uninstall,
}

/// What an operation did to one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", content = "detail", rename_all = "kebab-case")]
pub enum ServiceAction {
    Installed,
    Started { pid: u32 },
    AlreadyRunning,
    Stopped,
    AlreadyStopped,
    Removed,
    NotInstalled,
    Skipped(String),
    Failed(String),
}

impl ServiceAction {
    pub fn is_failure(&self) -> bool {
        matches!(self, ServiceAction::Failed(_))
    }
}

impl fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceAction::Installed => f.write_str("installed"),
            ServiceAction::Started { pid } => write!(f, "started (pid {pid})"),
            ServiceAction::AlreadyRunning => f.write_str("already running"),
            ServiceAction::Stopped => f.write_str("stopped"),
            ServiceAction::AlreadyStopped => f.write_str("already stopped"),
            ServiceAction::Removed => f.write_str("removed"),
            ServiceAction::NotInstalled => f.write_str("not installed"),
            ServiceAction::Skipped(reason) => write!(f, "skipped: {reason}"),
            ServiceAction::Failed(reason) => write!(f, "FAILED: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceOutcome {
    pub service: String,
    #[serde(flatten)]
    pub action: ServiceAction,
}

/// Per-service summary of one lifecycle operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationReport {
    pub operation: Operation,
    pub outcomes: Vec<ServiceOutcome>,
    pub reclaim: ReclaimReport,
}

impl OperationReport {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            outcomes: Vec::new(),
            reclaim: ReclaimReport::default(),
        }
    }

    fn push(&mut self, service: &str, action: ServiceAction) {
        self.outcomes.push(ServiceOutcome {
            service: service.to_owned(),
            action,
        });
    }

    /// Services in the order they were acted on with the given action kind.
    pub fn services_with<F>(&self, predicate: F) -> Vec<&str>
    where
        F: Fn(&ServiceAction) -> bool,
    {
        self.outcomes
            .iter()
            .filter(|outcome| predicate(&outcome.action))
            .map(|outcome| outcome.service.as_str())
            .collect()
    }

    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(|outcome| outcome.action.is_failure())
    }
}

/// Drives install/start/stop/restart/uninstall across the registry.
pub struct LifecycleController {
    registry: Arc<ServiceRegistry>,
    states: StateTable,
    supervisor: Arc<dyn ProcessSupervisor>,
    reclaimer: Arc<ReclaimEngine>,
    artifacts: Arc<dyn ArtifactProvider>,
    intents: StopIntents,
    helpers: HelperCommands,
    settings: LifecycleSettings,
}

impl fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleController")
            .field("services", &self.registry.names().collect::<Vec<_>>())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl LifecycleController {
    pub fn new(
        registry: ServiceRegistry,
        settings: LifecycleSettings,
        supervisor: Arc<dyn ProcessSupervisor>,
        reclaimer: Arc<ReclaimEngine>,
        artifacts: Arc<dyn ArtifactProvider>,
    ) -> Self {
        let states = StateTable::new(&registry);
        let intents = StopIntents::new(&settings.state_dir);
        let helpers = HelperCommands::new(
            &settings.bin_dir,
            settings.unit_prefix.clone(),
            &settings.control_binary,
            settings.config_path.clone(),
        );
        Self {
            registry: Arc::new(registry),
            states,
            supervisor,
            reclaimer,
            artifacts,
            intents,
            helpers,
            settings,
        }
    }

    /// Production wiring: systemd, the OS process table and local artifacts.
    pub fn for_system(
        config: &SupervisorConfig,
        control_binary: PathBuf,
        config_path: Option<PathBuf>,
    ) -> std::result::Result<Self, ConfigurationError> {
        let registry = ServiceRegistry::from_config(config)?;
        let settings = LifecycleSettings::from_config(config, control_binary, config_path);
        let supervisor = SystemdSupervisor::new(
            &config.install.unit_dir,
            &config.install.systemctl,
            config.lifecycle.command_timeout,
        );
        Ok(Self::new(
            registry,
            settings,
            Arc::new(supervisor),
            Arc::new(ReclaimEngine::system()),
            Arc::new(LocalArtifacts),
        ))
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn intents(&self) -> &StopIntents {
        &self.intents
    }

    pub fn helpers(&self) -> &HelperCommands {
        &self.helpers
    }

    pub fn unit_name(&self, service: &str) -> String {
        unit_name(&self.settings.unit_prefix, service)
    }

    /// Snapshot of every service state. No side effects.
    pub fn status(&self) -> Vec<ServiceState> {
        self.states.snapshot()
    }

    /// Whether every service is currently `Running`.
    pub fn all_running(&self) -> bool {
        self.states
            .snapshot()
            .iter()
            .all(|state| state.status() == ServiceStatus::Running)
    }

    /// Re-read each unit from the process supervisor into the state table.
    pub async fn refresh(&self) -> Result<Vec<ServiceState>> {
        for spec in self.registry.list_services() {
            let unit = self.unit_name(&spec.name);
            let status = if self.supervisor.is_installed(&unit).await? {
                self.supervisor.status(&unit).await?
            } else {
                UnitStatus::inactive()
            };
            self.observe(&spec.name, &status);
        }
        Ok(self.states.snapshot())
    }

    /// Apply a stop-hook event to the state table.
    pub fn record_stop(&self, event: &StopEvent) {
        if !self.states.update(&event.service, |state| state.apply_stop(event)) {
            debug!(service = %event.service, "stop event for unmanaged service ignored");
        }
    }

    fn observe(&self, service: &str, status: &UnitStatus) {
        self.states.update(service, |state| {
            if status.is_running() {
                if let Some(pid) = status.main_pid {
                    state.mark_running(pid);
                }
            } else if status.is_failed() {
                if state.status() != ServiceStatus::Crashed {
                    let reason = status
                        .result
                        .as_deref()
                        .map(ExitReason::from_service_result)
                        .unwrap_or(ExitReason::Unknown);
                    state.mark_crashed(reason, None);
                }
            } else {
                match status.active {
                    ActiveState::Activating | ActiveState::Reloading => state.mark_starting(),
                    ActiveState::Deactivating => state.mark_stopping(),
                    _ => state.mark_stopped(),
                }
            }
            state.set_restart_count(status.restarts);
        });
    }

    /// Every unit must exist before anything is started.
    async fn preflight_installed(&self) -> Result<()> {
        for spec in self.registry.list_services() {
            if !self.supervisor.is_installed(&self.unit_name(&spec.name)).await? {
                return Err(ConfigurationError::NotInstalled(spec.name.clone()).into());
            }
        }
        Ok(())
    }

    /// One sweep over the services that are not running, on a blocking thread.
    async fn reclaim_pass(&self) -> ReclaimReport {
        let idle: Vec<&ServiceSpec> = self
            .registry
            .list_services()
            .iter()
            .filter(|spec| !self.states.is_running(&spec.name))
            .collect();
        let mut names: Vec<String> = Vec::new();
        let mut ports: Vec<u16> = Vec::new();
        for spec in idle {
            if !spec.process_name.is_empty() && !names.contains(&spec.process_name) {
                names.push(spec.process_name.clone());
            }
            ports.extend(spec.port);
        }
        names.extend(self.settings.extra_process_names.iter().cloned());
        ports.extend(self.settings.extra_ports.iter().copied());
        let spared: HashSet<u32> = self.states.running_pids().into_iter().collect();

        let reclaimer = Arc::clone(&self.reclaimer);
        match tokio::task::spawn_blocking(move || reclaimer.sweep(&names, &ports, &spared)).await {
            Ok(report) => report,
            Err(err) => {
                let failure = ReclamationError::Discovery {
                    target: "reclamation pass".into(),
                    reason: err.to_string(),
                };
                warn!(error = %failure, "reclamation pass aborted; continuing");
                ReclaimReport {
                    terminated: Vec::new(),
                    failures: vec![failure],
                }
            }
        }
    }

    /// Poll the unit until it is active with a main pid.
    async fn wait_until_running(&self, unit: &str) -> std::result::Result<u32, (String, UnitStatus)> {
        let deadline = Instant::now() + self.settings.readiness_timeout;
        loop {
            let status = self
                .supervisor
                .status(unit)
                .await
                .map_err(|err| (err.to_string(), UnitStatus::inactive()))?;
            if let Some(pid) = status.main_pid.filter(|_| status.is_running()) {
                return Ok(pid);
            }
            if status.active == ActiveState::Failed {
                let result = status.result.clone().unwrap_or_else(|| "unknown".into());
                return Err((format!("unit entered failed state ({result})"), status));
            }
            if Instant::now() >= deadline {
                let reason = format!(
                    "not running after {:?} (state {}/{})",
                    self.settings.readiness_timeout, status.active, status.sub_state
                );
                return Err((reason, status));
            }
            sleep(self.settings.poll_interval).await;
        }
    }

    /// Resolve every artifact, reclaim, write units and helpers, reload, enable.
    pub async fn install(&self) -> Result<OperationReport> {
        let mut report = OperationReport::new(Operation::Install);

        let mut resolved: Vec<ServiceSpec> = Vec::with_capacity(self.registry.len());
        for spec in self.registry.list_services() {
            let executable = self.artifacts.resolve(spec).map_err(|err| {
                vigil_error!(
                    context = LogContext::new().with_service(&spec.name).with_operation("install"),
                    "{}",
                    err
                );
                err
            })?;
            let mut spec = spec.clone();
            spec.executable = executable;
            resolved.push(spec);
        }

        self.refresh().await?;
        report.reclaim = self.reclaim_pass().await;

        let mut written: Vec<String> = Vec::new();
        for spec in &resolved {
            let hook = stop_hook_command(
                &self.settings.control_binary,
                self.settings.config_path.as_deref(),
                &spec.name,
            );
            let unit = UnitDefinition::for_service(spec, &self.settings.unit_prefix, hook);
            if let Err(err) = self.supervisor.install_unit(&unit).await {
                self.roll_back_install(&written, &[]).await;
                return Err(err);
            }
            written.push(unit.unit_name.clone());
            report.push(&spec.name, ServiceAction::Installed);
        }

        if let Err(err) = self.helpers.install() {
            self.roll_back_install(&written, &[]).await;
            return Err(err.into());
        }

        if let Err(err) = self.supervisor.reload().await {
            self.roll_back_install(&written, &[]).await;
            return Err(err);
        }
        let mut enabled: Vec<String> = Vec::with_capacity(written.len());
        for unit in &written {
            if let Err(err) = self.supervisor.enable(unit).await {
                self.roll_back_install(&written, &enabled).await;
                return Err(err);
            }
            enabled.push(unit.clone());
        }

        self.finish(&report);
        Ok(report)
    }

    async fn roll_back_install(&self, written: &[String], enabled: &[String]) {
        warn!(units = written.len(), "install failed; removing written units");
        for unit in enabled {
            if let Err(err) = self.supervisor.disable(unit).await {
                warn!(%unit, error = %err, "unable to disable unit during rollback");
            }
        }
        for unit in written {
            if let Err(err) = self.supervisor.remove_unit(unit).await {
                warn!(%unit, error = %err, "unable to remove unit during rollback");
            }
        }
        if let Err(err) = self.helpers.remove() {
            warn!(error = %err, "unable to remove helper commands during rollback");
        }
        if !written.is_empty() {
            if let Err(err) = self.supervisor.reload().await {
                warn!(error = %err, "unable to reload after rollback");
            }
        }
    }

    /// Start every service in dependency order.
    pub async fn start(&self) -> Result<OperationReport> {
        self.preflight_installed().await?;
        let mut report = OperationReport::new(Operation::Start);
        self.start_all(&mut report).await?;
        self.finish(&report);
        Ok(report)
    }

    /// Stop every service in reverse dependency order.
    pub async fn stop(&self) -> Result<OperationReport> {
        let mut report = OperationReport::new(Operation::Stop);
        let failed = self.stop_all(&mut report).await?;
        self.finish(&report);
        if !failed.is_empty() {
            return Err(SupervisorError::StopFailure {
                services: failed,
                partial: Box::new(report),
            });
        }
        Ok(report)
    }

    /// Stop in reverse order, then start in forward order.
    pub async fn restart(&self) -> Result<OperationReport> {
        self.preflight_installed().await?;
        let mut report = OperationReport::new(Operation::Restart);
        let failed = self.stop_all(&mut report).await?;
        if !failed.is_empty() {
            self.finish(&report);
            return Err(SupervisorError::StopFailure {
                services: failed,
                partial: Box::new(report),
            });
        }
        self.start_all(&mut report).await?;
        self.finish(&report);
        Ok(report)
    }

    /// Stop everything, reclaim, and remove units and helpers.
    pub async fn uninstall(&self) -> Result<OperationReport> {
        let mut report = OperationReport::new(Operation::Uninstall);
        let failed = self.stop_all(&mut report).await?;
        if !failed.is_empty() {
            warn!(services = ?failed, "continuing uninstall despite stop failures");
        }
        // Nothing is spared: units are going away.
        for spec in self.registry.list_services() {
            self.states.update(&spec.name, |state| state.mark_stopped());
        }
        report.reclaim = self.reclaim_pass().await;

        for spec in self.registry.list_services() {
            let unit = self.unit_name(&spec.name);
            if !self.supervisor.is_installed(&unit).await? {
                report.push(&spec.name, ServiceAction::NotInstalled);
                continue;
            }
            if let Err(err) = self.supervisor.disable(&unit).await {
                warn!(%unit, error = %err, "unable to disable unit; removing anyway");
            }
            self.supervisor.remove_unit(&unit).await?;
            self.intents.clear(&spec.name);
            report.push(&spec.name, ServiceAction::Removed);
        }
        self.helpers.remove()?;
        self.supervisor.reload().await?;

        self.finish(&report);
        Ok(report)
    }

    async fn start_all(&self, report: &mut OperationReport) -> Result<()> {
        self.refresh().await?;
        report.reclaim.merge(self.reclaim_pass().await);

        let services = self.registry.list_services();
        for (position, spec) in services.iter().enumerate() {
            let ctx = LogContext::new()
                .with_service(&spec.name)
                .with_operation("start");
            if self.states.is_running(&spec.name) {
                report.push(&spec.name, ServiceAction::AlreadyRunning);
                continue;
            }

            let failure = match spec
                .depends_on
                .iter()
                .find(|dependency| !self.states.is_running(dependency))
            {
                Some(dependency) => Some(format!("dependency '{dependency}' is not running")),
                None => self.start_one(spec, report).await,
            };

            if let Some(reason) = failure {
                vigil_error!(context = ctx, "start failed: {}", reason);
                report.push(&spec.name, ServiceAction::Failed(reason.clone()));
                for skipped in &services[position + 1..] {
                    report.push(
                        &skipped.name,
                        ServiceAction::Skipped(format!("'{}' failed to start", spec.name)),
                    );
                }
                self.finish(report);
                return Err(SupervisorError::StartFailure {
                    service: spec.name.clone(),
                    reason,
                    partial: Box::new(report.clone()),
                });
            }
        }
        Ok(())
    }

    /// Start one service; `Some(reason)` on failure.
    async fn start_one(&self, spec: &ServiceSpec, report: &mut OperationReport) -> Option<String> {
        let unit = self.unit_name(&spec.name);
        self.states.update(&spec.name, |state| state.mark_starting());
        if let Err(err) = self.supervisor.start(&unit).await {
            self.states.update(&spec.name, |state| state.mark_stopped());
            return Some(err.to_string());
        }
        match self.wait_until_running(&unit).await {
            Ok(pid) => {
                self.states.update(&spec.name, |state| state.mark_running(pid));
                vigil_info!(
                    context = LogContext::new()
                        .with_service(&spec.name)
                        .with_unit(&unit)
                        .with_pid(pid),
                    "service running"
                );
                report.push(&spec.name, ServiceAction::Started { pid });
                None
            }
            Err((reason, status)) => {
                self.observe(&spec.name, &status);
                if self.states.get(&spec.name).map(|s| s.status()) == Some(ServiceStatus::Starting) {
                    self.states.update(&spec.name, |state| state.mark_stopped());
                }
                Some(reason)
            }
        }
    }

    /// Returns the services that could not be stopped.
    async fn stop_all(&self, report: &mut OperationReport) -> Result<Vec<String>> {
        let mut failed = Vec::new();
        for spec in self.registry.reverse() {
            let unit = self.unit_name(&spec.name);
            if !self.supervisor.is_installed(&unit).await? {
                self.states.update(&spec.name, |state| state.mark_stopped());
                report.push(&spec.name, ServiceAction::NotInstalled);
                continue;
            }
            let status = self.supervisor.status(&unit).await?;
            if matches!(status.active, ActiveState::Inactive | ActiveState::Failed) {
                self.observe(&spec.name, &status);
                report.push(&spec.name, ServiceAction::AlreadyStopped);
                continue;
            }

            self.states.update(&spec.name, |state| state.mark_stopping());
            // Marked before the stop so the hook sees an intentional stop.
            if let Err(err) = self.intents.mark(&spec.name) {
                warn!(service = %spec.name, error = %err, "unable to record stop intent");
            }
            match self.supervisor.stop(&unit).await {
                Ok(()) => {
                    self.intents.clear(&spec.name);
                    self.states.update(&spec.name, |state| state.mark_stopped());
                    vigil_info!(
                        context = LogContext::new().with_service(&spec.name).with_unit(&unit),
                        "service stopped"
                    );
                    report.push(&spec.name, ServiceAction::Stopped);
                }
                Err(err) => {
                    // The stop job may still complete after the client gave up;
                    // the marker stays for the hook and expires by age.
                    vigil_error!(
                        context = LogContext::new().with_service(&spec.name).with_unit(&unit),
                        "stop failed: {}",
                        err
                    );
                    if let Ok(status) = self.supervisor.status(&unit).await {
                        self.observe(&spec.name, &status);
                    }
                    report.push(&spec.name, ServiceAction::Failed(err.to_string()));
                    failed.push(spec.name.clone());
                }
            }
        }
        Ok(failed)
    }

    fn finish(&self, report: &OperationReport) {
        let operation = report.operation.to_string();
        let ctx = LogContext::new().with_operation(&operation);
        let outcome = if report.has_failures() {
            SystemEventOutcome::Fault
        } else if !report.reclaim.is_clean() {
            SystemEventOutcome::Degraded
        } else {
            SystemEventOutcome::Success
        };
        let message = format!(
            "{} services acted on, {} stale processes terminated",
            report.outcomes.len(),
            report.reclaim.terminated.len()
        );
        log_system_event(Some(&ctx), "lifecycle.operation", &message, outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_follow_configuration() {
        let mut config = SupervisorConfig::default();
        config.install.control_binary = Some(PathBuf::from("/usr/bin/vigilctl"));
        config.reclaim.extra_ports = vec![9001];
        let settings = LifecycleSettings::from_config(
            &config,
            PathBuf::from("/tmp/current-exe"),
            Some(PathBuf::from("/etc/vigil/vigil.toml")),
        );
        assert_eq!(settings.control_binary, PathBuf::from("/usr/bin/vigilctl"));
        assert_eq!(settings.unit_prefix, "vigil");
        assert_eq!(settings.extra_ports, vec![9001]);
        assert_eq!(settings.readiness_timeout, Duration::from_secs(30));
    }

    #[test]
    fn report_serializes_actions_for_json_output() {
        let mut report = OperationReport::new(Operation::Start);
        report.push("broker", ServiceAction::Started { pid: 10 });
        report.push("dashboard", ServiceAction::Skipped("upstream".into()));
        let json = serde_json::to_value(&report.outcomes).unwrap();
        assert_eq!(json[0]["service"], "broker");
        assert_eq!(json[0]["action"], "started");
        assert_eq!(json[0]["detail"]["pid"], 10);
        assert_eq!(json[1]["action"], "skipped");
        assert_eq!(report.services_with(|a| matches!(a, ServiceAction::Started { .. })), vec!["broker"]);
        assert_eq!(ServiceAction::Failed("x".into()).to_string(), "FAILED: x");
    }
}
