//! ---
//! vigil_section: "11-simulation"
//! vigil_subsection: "02-fakes"
//! vigil_type: "source"
//! vigil_scope: "code"
//! vigil_description: "Scriptable socket and process table."
//! vigil_version: "v0.1.0"
//! vigil_owner: "tbd"
//! ---
use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use vigil_supervisor::{KillOutcome, ProcessInfo, ProcessTable, ReclamationError};

#[derive(Debug, Default)]
struct Inner {
    listeners: HashMap<u16, Vec<u32>>,
    processes: Vec<ProcessInfo>,
    killed: Vec<u32>,
    unkillable: HashSet<u32>,
    broken_ports: HashSet<u16>,
}

/// Process table whose contents are set up by the test. Killing a pid removes
/// it from every listener, so a second reclamation pass finds nothing.
#[derive(Debug, Default)]
pub struct FakeProcessTable {
    inner: Mutex<Inner>,
}

impl FakeProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_process(&self, process: ProcessInfo) {
        self.inner.lock().processes.push(process);
    }

    /// Register `process` (adding it if needed) as listening on `port`.
    pub fn add_listener(&self, port: u16, process: ProcessInfo) {
        let mut inner = self.inner.lock();
        if !inner.processes.iter().any(|p| p.pid == process.pid) {
            inner.processes.push(process.clone());
        }
        inner.listeners.entry(port).or_default().push(process.pid);
    }

    pub fn make_unkillable(&self, pid: u32) {
        self.inner.lock().unkillable.insert(pid);
    }

    /// Discovery on `port` fails.
    pub fn break_port(&self, port: u16) {
        self.inner.lock().broken_ports.insert(port);
    }

    pub fn killed(&self) -> Vec<u32> {
        self.inner.lock().killed.clone()
    }

    pub fn alive(&self, pid: u32) -> bool {
        self.inner.lock().processes.iter().any(|p| p.pid == pid)
    }
}

impl ProcessTable for FakeProcessTable {
    fn listeners_on(&self, port: u16) -> Result<Vec<ProcessInfo>, ReclamationError> {
        let inner = self.inner.lock();
        if inner.broken_ports.contains(&port) {
            return Err(ReclamationError::Discovery {
                target: format!("port {port}"),
                reason: "permission denied".into(),
            });
        }
        let pids = inner.listeners.get(&port).cloned().unwrap_or_default();
        Ok(inner
            .processes
            .iter()
            .filter(|p| pids.contains(&p.pid))
            .cloned()
            .collect())
    }

    fn processes(&self) -> Result<Vec<ProcessInfo>, ReclamationError> {
        Ok(self.inner.lock().processes.clone())
    }

    fn kill(&self, pid: u32) -> Result<KillOutcome, ReclamationError> {
        let mut inner = self.inner.lock();
        if inner.unkillable.contains(&pid) {
            return Err(ReclamationError::Terminate {
                pid,
                name: String::new(),
                target: String::new(),
                reason: "Operation not permitted".into(),
            });
        }
        if !inner.processes.iter().any(|p| p.pid == pid) {
            return Ok(KillOutcome::AlreadyGone);
        }
        inner.killed.push(pid);
        inner.processes.retain(|p| p.pid != pid);
        for holders in inner.listeners.values_mut() {
            holders.retain(|held| *held != pid);
        }
        Ok(KillOutcome::Killed)
    }
}
