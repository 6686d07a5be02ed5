//! ---
//! vigil_section: "11-simulation"
//! vigil_subsection: "02-fakes"
//! vigil_type: "source"
//! vigil_scope: "code"
//! vigil_description: "In-memory process supervisor with a call journal."
//! vigil_version: "v0.1.0"
//! vigil_owner: "tbd"
//! ---
use std::collections::HashSet;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use vigil_supervisor::{
    ActiveState, ProcessSupervisor, Result, StopIntents, SupervisorError, UnitDefinition,
    UnitStatus,
};

/// Mutating calls received by [`FakeSupervisor`], in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorCall {
    InstallUnit(String),
    RemoveUnit(String),
    Reload,
    Enable(String),
    Disable(String),
    Start(String),
    Stop(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum UnitState {
    Inactive,
    Activating,
    Running(u32),
    Failed(String),
}

#[derive(Debug, Clone)]
struct FakeUnit {
    definition: UnitDefinition,
    state: UnitState,
    restarts: u32,
    enabled: bool,
}

#[derive(Debug)]
struct Inner {
    units: IndexMap<String, FakeUnit>,
    journal: Vec<SupervisorCall>,
    next_pid: u32,
    refuse_start: HashSet<String>,
    never_ready: HashSet<String>,
    fail_stop: HashSet<String>,
    fail_install: HashSet<String>,
    fail_enable: HashSet<String>,
    intent_probe: Option<StopIntents>,
    intent_seen: Vec<(String, bool)>,
}

/// Stand-in for systemd. Units live in memory and start instantly unless
/// told otherwise.
#[derive(Debug)]
pub struct FakeSupervisor {
    inner: Mutex<Inner>,
}

impl Default for FakeSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeSupervisor {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                units: IndexMap::new(),
                journal: Vec::new(),
                next_pid: 6_000_000,
                refuse_start: HashSet::new(),
                never_ready: HashSet::new(),
                fail_stop: HashSet::new(),
                fail_install: HashSet::new(),
                fail_enable: HashSet::new(),
                intent_probe: None,
                intent_seen: Vec::new(),
            }),
        }
    }

    /// `start` of `unit` returns an error.
    pub fn refuse_start(&self, unit: &str) {
        self.inner.lock().refuse_start.insert(unit.to_owned());
    }

    /// `unit` stays `activating` forever after start.
    pub fn never_ready(&self, unit: &str) {
        self.inner.lock().never_ready.insert(unit.to_owned());
    }

    pub fn fail_stop(&self, unit: &str) {
        self.inner.lock().fail_stop.insert(unit.to_owned());
    }

    pub fn fail_install(&self, unit: &str) {
        self.inner.lock().fail_install.insert(unit.to_owned());
    }

    pub fn fail_enable(&self, unit: &str) {
        self.inner.lock().fail_enable.insert(unit.to_owned());
    }

    /// Record, on every stop, whether a stop intent existed for the service.
    pub fn probe_intents(&self, intents: StopIntents) {
        self.inner.lock().intent_probe = Some(intents);
    }

    pub fn intent_seen(&self) -> Vec<(String, bool)> {
        self.inner.lock().intent_seen.clone()
    }

    /// Simulate a crash: the unit enters `failed` with the given result.
    pub fn crash(&self, unit: &str, result: &str) {
        if let Some(fake) = self.inner.lock().units.get_mut(unit) {
            fake.state = UnitState::Failed(result.to_owned());
            fake.restarts += 1;
        }
    }

    /// Put an installed unit into the running state without a journal entry.
    pub fn run_externally(&self, unit: &str) -> Option<u32> {
        let mut inner = self.inner.lock();
        inner.next_pid += 1;
        let pid = inner.next_pid;
        let fake = inner.units.get_mut(unit)?;
        fake.state = UnitState::Running(pid);
        Some(pid)
    }

    pub fn journal(&self) -> Vec<SupervisorCall> {
        self.inner.lock().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.inner.lock().journal.clear();
    }

    pub fn starts(&self) -> Vec<String> {
        self.calls(|call| match call {
            SupervisorCall::Start(unit) => Some(unit.clone()),
            _ => None,
        })
    }

    pub fn stops(&self) -> Vec<String> {
        self.calls(|call| match call {
            SupervisorCall::Stop(unit) => Some(unit.clone()),
            _ => None,
        })
    }

    fn calls<F>(&self, select: F) -> Vec<String>
    where
        F: Fn(&SupervisorCall) -> Option<String>,
    {
        self.inner.lock().journal.iter().filter_map(select).collect()
    }

    pub fn installed_units(&self) -> Vec<String> {
        self.inner.lock().units.keys().cloned().collect()
    }

    pub fn definition(&self, unit: &str) -> Option<UnitDefinition> {
        self.inner.lock().units.get(unit).map(|u| u.definition.clone())
    }

    pub fn is_enabled(&self, unit: &str) -> bool {
        self.inner.lock().units.get(unit).map(|u| u.enabled).unwrap_or(false)
    }

    pub fn pid_of(&self, unit: &str) -> Option<u32> {
        match self.inner.lock().units.get(unit)?.state {
            UnitState::Running(pid) => Some(pid),
            _ => None,
        }
    }

    pub fn running_units(&self) -> Vec<String> {
        self.inner
            .lock()
            .units
            .iter()
            .filter(|(_, u)| matches!(u.state, UnitState::Running(_)))
            .map(|(name, _)| name.clone())
            .collect()
    }
}

fn missing(unit: &str) -> SupervisorError {
    SupervisorError::Unit(format!("Unit {unit} not found."))
}

#[async_trait]
impl ProcessSupervisor for FakeSupervisor {
    async fn install_unit(&self, unit: &UnitDefinition) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.journal.push(SupervisorCall::InstallUnit(unit.unit_name.clone()));
        if inner.fail_install.contains(&unit.unit_name) {
            return Err(SupervisorError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only unit directory",
            )));
        }
        let previous = inner.units.get(&unit.unit_name).map(|u| (u.state.clone(), u.restarts));
        let (state, restarts) = previous.unwrap_or((UnitState::Inactive, 0));
        inner.units.insert(
            unit.unit_name.clone(),
            FakeUnit {
                definition: unit.clone(),
                state,
                restarts,
                enabled: false,
            },
        );
        Ok(())
    }

    async fn remove_unit(&self, unit_name: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.journal.push(SupervisorCall::RemoveUnit(unit_name.to_owned()));
        inner.units.shift_remove(unit_name);
        Ok(())
    }

    async fn is_installed(&self, unit_name: &str) -> Result<bool> {
        Ok(self.inner.lock().units.contains_key(unit_name))
    }

    async fn reload(&self) -> Result<()> {
        self.inner.lock().journal.push(SupervisorCall::Reload);
        Ok(())
    }

    async fn enable(&self, unit_name: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.journal.push(SupervisorCall::Enable(unit_name.to_owned()));
        if inner.fail_enable.contains(unit_name) {
            return Err(SupervisorError::Unit(format!(
                "Failed to enable unit: {unit_name} is masked."
            )));
        }
        let unit = inner.units.get_mut(unit_name).ok_or_else(|| missing(unit_name))?;
        unit.enabled = true;
        Ok(())
    }

    async fn disable(&self, unit_name: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.journal.push(SupervisorCall::Disable(unit_name.to_owned()));
        let unit = inner.units.get_mut(unit_name).ok_or_else(|| missing(unit_name))?;
        unit.enabled = false;
        Ok(())
    }

    async fn start(&self, unit_name: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.journal.push(SupervisorCall::Start(unit_name.to_owned()));
        if !inner.units.contains_key(unit_name) {
            return Err(missing(unit_name));
        }
        if inner.refuse_start.contains(unit_name) {
            return Err(SupervisorError::Unit(format!(
                "Job for {unit_name} failed because the control process exited with error code."
            )));
        }
        inner.next_pid += 1;
        let pid = inner.next_pid;
        let never_ready = inner.never_ready.contains(unit_name);
        if let Some(unit) = inner.units.get_mut(unit_name) {
            if !matches!(unit.state, UnitState::Running(_)) {
                unit.state = if never_ready {
                    UnitState::Activating
                } else {
                    UnitState::Running(pid)
                };
            }
        }
        Ok(())
    }

    async fn stop(&self, unit_name: &str) -> Result<()> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.journal.push(SupervisorCall::Stop(unit_name.to_owned()));
        let service = inner
            .units
            .get(unit_name)
            .map(|u| u.definition.service.clone())
            .ok_or_else(|| missing(unit_name))?;
        if let Some(probe) = &inner.intent_probe {
            let marked = probe.is_marked(&service);
            inner.intent_seen.push((service, marked));
        }
        if inner.fail_stop.contains(unit_name) {
            return Err(SupervisorError::Unit(format!("Job for {unit_name} timed out.")));
        }
        if let Some(unit) = inner.units.get_mut(unit_name) {
            unit.state = UnitState::Inactive;
        }
        Ok(())
    }

    async fn status(&self, unit_name: &str) -> Result<UnitStatus> {
        let inner = self.inner.lock();
        let unit = inner.units.get(unit_name).ok_or_else(|| missing(unit_name))?;
        let mut status = match &unit.state {
            UnitState::Inactive => UnitStatus::inactive(),
            UnitState::Running(pid) => UnitStatus::running(*pid),
            UnitState::Activating => UnitStatus {
                active: ActiveState::Activating,
                sub_state: "start".into(),
                main_pid: None,
                restarts: 0,
                result: None,
            },
            UnitState::Failed(result) => UnitStatus {
                active: ActiveState::Failed,
                sub_state: "failed".into(),
                main_pid: None,
                restarts: 0,
                result: Some(result.clone()),
            },
        };
        status.restarts = unit.restarts;
        Ok(status)
    }
}
