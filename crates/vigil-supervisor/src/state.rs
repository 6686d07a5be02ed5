//! ---
//! vigil_section: "07-resilience-fault-tolerance"
//! vigil_subsection: "module"
//! vigil_type: "source"
//! vigil_scope: "code"
//! vigil_description: "In-memory service state table owned by the lifecycle controller."
//! vigil_version: "v0.0.0-prealpha"
//! vigil_owner: "tbd"
//! ---
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;

use crate::exit::{ExitReason, StopEvent};
use crate::registry::ServiceRegistry;

/// Lifecycle status of a single service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ServiceStatus {
    Stopped,
    Starting,
    Running,
    Crashed,
    Stopping,
}

/// Runtime state of one service.
///
/// Transitions go through the `mark_*` methods so that a `Running` state
/// always carries a pid and `Stopped`/`Crashed` states never do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceState {
    name: String,
    status: ServiceStatus,
    pid: Option<u32>,
    last_exit_reason: Option<ExitReason>,
    last_exit_code: Option<i32>,
    restart_count: u32,
}

impl ServiceState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: ServiceStatus::Stopped,
            pid: None,
            last_exit_reason: None,
            last_exit_code: None,
            restart_count: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> ServiceStatus {
        self.status
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn last_exit_reason(&self) -> Option<ExitReason> {
        self.last_exit_reason
    }

    pub fn last_exit_code(&self) -> Option<i32> {
        self.last_exit_code
    }

    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }

    pub fn is_running(&self) -> bool {
        self.status == ServiceStatus::Running
    }

    pub(crate) fn mark_starting(&mut self) {
        self.status = ServiceStatus::Starting;
        self.pid = None;
    }

    pub(crate) fn mark_running(&mut self, pid: u32) {
        self.status = ServiceStatus::Running;
        self.pid = Some(pid);
    }

    pub(crate) fn mark_stopping(&mut self) {
        self.status = ServiceStatus::Stopping;
    }

    pub(crate) fn mark_stopped(&mut self) {
        self.status = ServiceStatus::Stopped;
        self.pid = None;
    }

    pub(crate) fn mark_crashed(&mut self, reason: ExitReason, exit_code: Option<i32>) {
        self.status = ServiceStatus::Crashed;
        self.pid = None;
        self.last_exit_reason = Some(reason);
        self.last_exit_code = exit_code;
    }

    pub(crate) fn set_restart_count(&mut self, restarts: u32) {
        self.restart_count = restarts;
    }

    /// Apply a stop-hook event.
    pub(crate) fn apply_stop(&mut self, event: &StopEvent) {
        if event.is_clean() {
            self.last_exit_reason = Some(event.reason);
            self.last_exit_code = event.exit_code;
            self.mark_stopped();
        } else {
            self.mark_crashed(event.reason, event.exit_code);
        }
    }
}

/// Table of service states keyed by service name, in registry order.
#[derive(Debug)]
pub struct StateTable {
    inner: Mutex<IndexMap<String, ServiceState>>,
}

impl StateTable {
    pub fn new(registry: &ServiceRegistry) -> Self {
        let inner = registry
            .names()
            .map(|name| (name.to_owned(), ServiceState::new(name)))
            .collect();
        Self {
            inner: Mutex::new(inner),
        }
    }

    pub fn get(&self, name: &str) -> Option<ServiceState> {
        self.inner.lock().get(name).cloned()
    }

    pub fn snapshot(&self) -> Vec<ServiceState> {
        self.inner.lock().values().cloned().collect()
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.inner
            .lock()
            .get(name)
            .map(ServiceState::is_running)
            .unwrap_or(false)
    }

    pub fn running_pids(&self) -> Vec<u32> {
        self.inner
            .lock()
            .values()
            .filter(|state| state.is_running())
            .filter_map(ServiceState::pid)
            .collect()
    }

    /// Mutate the state for `name`; unknown names are ignored.
    pub(crate) fn update<F>(&self, name: &str, apply: F) -> bool
    where
        F: FnOnce(&mut ServiceState),
    {
        match self.inner.lock().get_mut(name) {
            Some(state) => {
                apply(state);
                true
            }
            None => false,
        }
    }
}
