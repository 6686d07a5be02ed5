//! ---
//! vigil_section: "07-resilience-fault-tolerance"
//! vigil_subsection: "module"
//! vigil_type: "source"
//! vigil_scope: "code"
//! vigil_description: "Port reclamation and orphaned process sweep."
//! vigil_version: "v0.0.0-prealpha"
//! vigil_owner: "tbd"
//! ---
//! Frees listening ports and kills stray service processes before a start,
//! whoever owns them. Nothing found is not an error and every failure is
//! recoverable: the report carries it and the caller carries on.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use sysinfo::{ProcessesToUpdate, System};
use tracing::{debug, info, warn};

use crate::error::ReclamationError;

/// A process observed in the socket or process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub executable: Option<PathBuf>,
}

impl ProcessInfo {
    pub fn new(pid: u32, name: impl Into<String>) -> Self {
        Self {
            pid,
            name: name.into(),
            executable: None,
        }
    }

    pub fn with_executable(mut self, executable: impl Into<PathBuf>) -> Self {
        self.executable = Some(executable.into());
        self
    }

    /// Exact match on the process name or the executable's file name.
    pub fn matches_executable_name(&self, pattern: &str) -> bool {
        if pattern.is_empty() {
            return false;
        }
        self.name == pattern
            || self
                .executable
                .as_deref()
                .and_then(Path::file_name)
                .map(|name| name == pattern)
                .unwrap_or(false)
    }
}

/// Result of a termination attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    Killed,
    AlreadyGone,
}

/// OS facilities used by the reclamation engine.
pub trait ProcessTable: Send + Sync {
    /// Processes holding a listening socket on `port`.
    fn listeners_on(&self, port: u16) -> Result<Vec<ProcessInfo>, ReclamationError>;

    /// Every visible process.
    fn processes(&self) -> Result<Vec<ProcessInfo>, ReclamationError>;

    /// Forcefully terminate `pid`.
    fn kill(&self, pid: u32) -> Result<KillOutcome, ReclamationError>;
}

/// Production process table backed by `listeners`, `sysinfo` and `nix`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessTable;

impl ProcessTable for SystemProcessTable {
    fn listeners_on(&self, port: u16) -> Result<Vec<ProcessInfo>, ReclamationError> {
        let listeners = listeners::get_all().map_err(|err| ReclamationError::Discovery {
            target: format!("port {port}"),
            reason: err.to_string(),
        })?;
        let mut found: Vec<ProcessInfo> = listeners
            .into_iter()
            .filter(|listener| listener.socket.port() == port)
            .map(|listener| ProcessInfo::new(listener.process.pid, listener.process.name))
            .collect();
        found.sort_by_key(|info| info.pid);
        found.dedup_by_key(|info| info.pid);
        Ok(found)
    }

    fn processes(&self) -> Result<Vec<ProcessInfo>, ReclamationError> {
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, true);
        Ok(system
            .processes()
            .iter()
            .map(|(pid, process)| ProcessInfo {
                pid: pid.as_u32(),
                name: process.name().to_string_lossy().into_owned(),
                executable: process.exe().map(Path::to_path_buf),
            })
            .collect())
    }

    fn kill(&self, pid: u32) -> Result<KillOutcome, ReclamationError> {
        let raw = i32::try_from(pid).map_err(|_| ReclamationError::Terminate {
            pid,
            name: String::new(),
            target: String::new(),
            reason: "pid out of range".into(),
        })?;
        match kill(Pid::from_raw(raw), Signal::SIGKILL) {
            Ok(()) => Ok(KillOutcome::Killed),
            Err(Errno::ESRCH) => Ok(KillOutcome::AlreadyGone),
            Err(errno) => Err(ReclamationError::Terminate {
                pid,
                name: String::new(),
                target: String::new(),
                reason: errno.desc().to_owned(),
            }),
        }
    }
}

/// What a termination was aimed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReclaimTarget {
    Port(u16),
    Executable(String),
}

impl fmt::Display for ReclaimTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReclaimTarget::Port(port) => write!(f, "port {port}"),
            ReclaimTarget::Executable(name) => write!(f, "executable '{name}'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Termination {
    pub target: ReclaimTarget,
    pub pid: u32,
    pub process_name: String,
}

/// Terminations and recoverable failures from one reclamation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    pub terminated: Vec<Termination>,
    pub failures: Vec<ReclamationError>,
}

impl ReclaimReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn terminated_pids(&self) -> Vec<u32> {
        self.terminated.iter().map(|t| t.pid).collect()
    }

    pub fn merge(&mut self, other: ReclaimReport) {
        self.terminated.extend(other.terminated);
        self.failures.extend(other.failures);
    }
}

/// Forcibly frees ports and sweeps orphaned service processes.
pub struct ReclaimEngine {
    table: Arc<dyn ProcessTable>,
    protected: HashSet<u32>,
}

impl fmt::Debug for ReclaimEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReclaimEngine")
            .field("protected", &self.protected)
            .finish_non_exhaustive()
    }
}

impl ReclaimEngine {
    /// Engine over `table`; the current process is always protected.
    pub fn new(table: Arc<dyn ProcessTable>) -> Self {
        let mut protected = HashSet::new();
        protected.insert(std::process::id());
        Self { table, protected }
    }

    pub fn system() -> Self {
        Self::new(Arc::new(SystemProcessTable))
    }

    /// Free every port in `ports`.
    pub fn reclaim(&self, ports: &[u16]) -> ReclaimReport {
        self.run_pass(&[], ports, &HashSet::new())
    }

    /// Kill every process whose executable is exactly `pattern`.
    pub fn kill_by_executable_name(&self, pattern: &str) -> ReclaimReport {
        self.run_pass(&[pattern.to_owned()], &[], &HashSet::new())
    }

    /// Name sweep followed by port reclamation, sparing `spared` pids.
    pub fn sweep(&self, names: &[String], ports: &[u16], spared: &HashSet<u32>) -> ReclaimReport {
        self.run_pass(names, ports, spared)
    }

    fn run_pass(&self, names: &[String], ports: &[u16], spared: &HashSet<u32>) -> ReclaimReport {
        let mut pass = Pass {
            engine: self,
            spared,
            handled: HashSet::new(),
            report: ReclaimReport::default(),
        };

        if !names.is_empty() {
            match self.table.processes() {
                Ok(processes) => {
                    for name in names {
                        let target = ReclaimTarget::Executable(name.clone());
                        for process in processes.iter().filter(|p| p.matches_executable_name(name)) {
                            pass.terminate(&target, process);
                        }
                    }
                }
                Err(err) => pass.fail(err),
            }
        }

        let mut seen_ports = HashSet::new();
        for &port in ports {
            if !seen_ports.insert(port) {
                continue;
            }
            let target = ReclaimTarget::Port(port);
            match self.table.listeners_on(port) {
                Ok(holders) if holders.is_empty() => debug!(port, "port already free"),
                Ok(holders) => {
                    for process in &holders {
                        pass.terminate(&target, process);
                    }
                }
                Err(err) => pass.fail(err),
            }
        }

        let report = pass.report;
        if !report.terminated.is_empty() || !report.failures.is_empty() {
            info!(
                terminated = report.terminated.len(),
                failures = report.failures.len(),
                "reclamation pass finished"
            );
        }
        report
    }
}

struct Pass<'a> {
    engine: &'a ReclaimEngine,
    spared: &'a HashSet<u32>,
    handled: HashSet<u32>,
    report: ReclaimReport,
}

impl Pass<'_> {
    fn terminate(&mut self, target: &ReclaimTarget, process: &ProcessInfo) {
        if self.engine.protected.contains(&process.pid) || self.spared.contains(&process.pid) {
            debug!(pid = process.pid, %target, "sparing protected process");
            return;
        }
        if !self.handled.insert(process.pid) {
            return;
        }
        match self.engine.table.kill(process.pid) {
            Ok(KillOutcome::Killed) => {
                info!(pid = process.pid, process = %process.name, %target, "terminated stale process");
                self.report.terminated.push(Termination {
                    target: target.clone(),
                    pid: process.pid,
                    process_name: process.name.clone(),
                });
            }
            Ok(KillOutcome::AlreadyGone) => {
                debug!(pid = process.pid, %target, "process exited before termination");
            }
            Err(err) => {
                let err = match err {
                    ReclamationError::Terminate { pid, reason, .. } => {
                        ReclamationError::Terminate {
                            pid,
                            name: process.name.clone(),
                            target: target.to_string(),
                            reason,
                        }
                    }
                    other => other,
                };
                self.fail(err);
            }
        }
    }

    fn fail(&mut self, err: ReclamationError) {
        warn!(error = %err, "reclamation step failed; continuing");
        self.report.failures.push(err);
    }
}
