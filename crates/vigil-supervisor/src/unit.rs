//! ---
//! vigil_section: "07-resilience-fault-tolerance"
//! vigil_subsection: "module"
//! vigil_type: "source"
//! vigil_scope: "code"
//! vigil_description: "Process supervisor abstraction and the systemd adapter."
//! vigil_version: "v0.0.0-prealpha"
//! vigil_owner: "tbd"
//! ---
use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Result, SupervisorError};
use crate::registry::{RestartPolicy, ServiceSpec};

/// `ActiveState` reported by the process supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ActiveState {
    Active,
    Reloading,
    Inactive,
    Failed,
    Activating,
    Deactivating,
    Unknown,
}

impl ActiveState {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "active" => ActiveState::Active,
            "reloading" => ActiveState::Reloading,
            "inactive" => ActiveState::Inactive,
            "failed" => ActiveState::Failed,
            "activating" => ActiveState::Activating,
            "deactivating" => ActiveState::Deactivating,
            _ => ActiveState::Unknown,
        }
    }
}

/// Point-in-time view of one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitStatus {
    pub active: ActiveState,
    pub sub_state: String,
    pub main_pid: Option<u32>,
    pub restarts: u32,
    /// Last `Result=` value (`success`, `signal`, `exit-code`, ...).
    pub result: Option<String>,
}

impl UnitStatus {
    pub fn inactive() -> Self {
        Self {
            active: ActiveState::Inactive,
            sub_state: "dead".into(),
            main_pid: None,
            restarts: 0,
            result: None,
        }
    }

    pub fn running(pid: u32) -> Self {
        Self {
            active: ActiveState::Active,
            sub_state: "running".into(),
            main_pid: Some(pid),
            restarts: 0,
            result: Some("success".into()),
        }
    }

    /// Active with a live main process.
    pub fn is_running(&self) -> bool {
        self.active == ActiveState::Active && self.main_pid.is_some()
    }

    /// The unit gave up or is waiting to be restarted after a failure.
    pub fn is_failed(&self) -> bool {
        self.active == ActiveState::Failed
            || (self.active == ActiveState::Activating && self.sub_state == "auto-restart")
    }

    /// Parse `systemctl show --property=...` output.
    pub fn from_show_output(output: &str) -> Self {
        let mut status = Self::inactive();
        for line in output.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            match key.trim() {
                "ActiveState" => status.active = ActiveState::parse(value),
                "SubState" => status.sub_state = value.trim().to_owned(),
                "MainPID" => status.main_pid = value.trim().parse().ok().filter(|pid| *pid != 0),
                "NRestarts" => status.restarts = value.trim().parse().unwrap_or(0),
                "Result" => {
                    let value = value.trim();
                    status.result = (!value.is_empty()).then(|| value.to_owned());
                }
                _ => {}
            }
        }
        status
    }
}

/// Definition of one supervised unit, rendered into a systemd unit file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitDefinition {
    pub unit_name: String,
    pub service: String,
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub working_directory: PathBuf,
    pub environment: Vec<(String, String)>,
    pub restart: RestartPolicy,
    pub restart_delay: Duration,
    /// Unit names this unit is ordered after and requires.
    pub requires: Vec<String>,
    /// Command line run by `ExecStopPost=`.
    pub stop_hook: Vec<String>,
}

impl UnitDefinition {
    pub fn for_service(spec: &ServiceSpec, prefix: &str, stop_hook: Vec<String>) -> Self {
        Self {
            unit_name: unit_name(prefix, &spec.name),
            service: spec.name.clone(),
            executable: spec.executable.clone(),
            args: spec.args.clone(),
            working_directory: spec.working_directory.clone(),
            environment: spec.environment.clone(),
            restart: spec.restart_policy,
            restart_delay: spec.restart_delay,
            requires: spec
                .depends_on
                .iter()
                .map(|dependency| unit_name(prefix, dependency))
                .collect(),
            stop_hook,
        }
    }

    /// Render the unit file.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Managed by vigilctl; edits are overwritten on install.");
        let _ = writeln!(out, "[Unit]");
        let _ = writeln!(out, "Description=Vigil managed service {}", self.service);
        let mut after = vec!["network.target".to_owned()];
        after.extend(self.requires.iter().cloned());
        let _ = writeln!(out, "After={}", after.join(" "));
        if !self.requires.is_empty() {
            let _ = writeln!(out, "Requires={}", self.requires.join(" "));
        }
        // Restart=always must never trip the start rate limiter.
        let _ = writeln!(out, "StartLimitIntervalSec=0");
        let _ = writeln!(out);

        let _ = writeln!(out, "[Service]");
        let _ = writeln!(out, "Type=simple");
        let mut exec = vec![quote_word(&self.executable.to_string_lossy())];
        exec.extend(self.args.iter().map(|arg| quote_word(arg)));
        let _ = writeln!(out, "ExecStart={}", exec.join(" "));
        let _ = writeln!(
            out,
            "WorkingDirectory={}",
            quote_word(&self.working_directory.to_string_lossy())
        );
        for (key, value) in &self.environment {
            let _ = writeln!(out, "Environment={}", quote_word(&format!("{key}={value}")));
        }
        let restart = match self.restart {
            RestartPolicy::Always => "always",
            RestartPolicy::Never => "no",
        };
        let _ = writeln!(out, "Restart={restart}");
        let _ = writeln!(out, "RestartSec={}", self.restart_delay.as_secs());
        if !self.stop_hook.is_empty() {
            let hook: Vec<String> = self.stop_hook.iter().map(|w| quote_word(w)).collect();
            let _ = writeln!(out, "ExecStopPost={}", hook.join(" "));
        }
        let _ = writeln!(out);

        let _ = writeln!(out, "[Install]");
        let _ = writeln!(out, "WantedBy=multi-user.target");
        out
    }
}

pub fn unit_name(prefix: &str, service: &str) -> String {
    format!("{prefix}-{service}.service")
}

/// Quote a word for systemd command lines, escaping specifiers and variables.
fn quote_word(word: &str) -> String {
    let escaped = word.replace('%', "%%").replace('$', "$$");
    let needs_quotes = escaped.is_empty()
        || escaped
            .chars()
            .any(|ch| ch.is_whitespace() || matches!(ch, '"' | '\'' | '\\' | ';'));
    if !needs_quotes {
        return escaped;
    }
    let mut quoted = String::with_capacity(escaped.len() + 2);
    quoted.push('"');
    for ch in escaped.chars() {
        if matches!(ch, '"' | '\\') {
            quoted.push('\\');
        }
        quoted.push(ch);
    }
    quoted.push('"');
    quoted
}

/// External process supervisor that owns the managed processes.
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    async fn install_unit(&self, unit: &UnitDefinition) -> Result<()>;
    async fn remove_unit(&self, unit_name: &str) -> Result<()>;
    async fn is_installed(&self, unit_name: &str) -> Result<bool>;
    /// Re-read unit definitions.
    async fn reload(&self) -> Result<()>;
    async fn enable(&self, unit_name: &str) -> Result<()>;
    async fn disable(&self, unit_name: &str) -> Result<()>;
    async fn start(&self, unit_name: &str) -> Result<()>;
    /// Stop the unit; returns once the stop hook has run.
    async fn stop(&self, unit_name: &str) -> Result<()>;
    async fn status(&self, unit_name: &str) -> Result<UnitStatus>;
}

/// systemd adapter driving `systemctl`.
#[derive(Debug, Clone)]
pub struct SystemdSupervisor {
    unit_dir: PathBuf,
    systemctl: PathBuf,
    timeout: Duration,
}

impl SystemdSupervisor {
    pub fn new(unit_dir: impl Into<PathBuf>, systemctl: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            unit_dir: unit_dir.into(),
            systemctl: systemctl.into(),
            timeout,
        }
    }

    fn unit_path(&self, unit_name: &str) -> PathBuf {
        self.unit_dir.join(unit_name)
    }

    async fn systemctl(&self, args: &[&str]) -> Result<String> {
        debug!(systemctl = %self.systemctl.display(), ?args, "invoking process supervisor");
        let mut command = Command::new(&self.systemctl);
        command.args(args).kill_on_drop(true);
        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| {
                SupervisorError::Unit(format!(
                    "`systemctl {}` timed out after {:?}",
                    args.join(" "),
                    self.timeout
                ))
            })?
            .map_err(|err| {
                SupervisorError::Unit(format!(
                    "unable to run {}: {err}",
                    self.systemctl.display()
                ))
            })?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(SupervisorError::Unit(format!(
                "`systemctl {}` failed ({}): {}",
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

#[async_trait]
impl ProcessSupervisor for SystemdSupervisor {
    async fn install_unit(&self, unit: &UnitDefinition) -> Result<()> {
        tokio::fs::create_dir_all(&self.unit_dir).await?;
        let path = self.unit_path(&unit.unit_name);
        tokio::fs::write(&path, unit.render()).await?;
        debug!(unit = %unit.unit_name, path = %path.display(), "unit file written");
        Ok(())
    }

    async fn remove_unit(&self, unit_name: &str) -> Result<()> {
        match tokio::fs::remove_file(self.unit_path(unit_name)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn is_installed(&self, unit_name: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.unit_path(unit_name)).await?)
    }

    async fn reload(&self) -> Result<()> {
        self.systemctl(&["daemon-reload"]).await.map(|_| ())
    }

    async fn enable(&self, unit_name: &str) -> Result<()> {
        self.systemctl(&["enable", "--quiet", unit_name]).await.map(|_| ())
    }

    async fn disable(&self, unit_name: &str) -> Result<()> {
        self.systemctl(&["disable", "--quiet", unit_name]).await.map(|_| ())
    }

    async fn start(&self, unit_name: &str) -> Result<()> {
        self.systemctl(&["start", unit_name]).await.map(|_| ())
    }

    async fn stop(&self, unit_name: &str) -> Result<()> {
        self.systemctl(&["stop", unit_name]).await.map(|_| ())
    }

    async fn status(&self, unit_name: &str) -> Result<UnitStatus> {
        let output = self
            .systemctl(&[
                "show",
                unit_name,
                "--property=ActiveState,SubState,MainPID,NRestarts,Result",
            ])
            .await?;
        Ok(UnitStatus::from_show_output(&output))
    }
}

/// Stop-hook command line for `service`.
pub fn stop_hook_command(control_binary: &Path, config_path: Option<&Path>, service: &str) -> Vec<String> {
    let mut argv = vec![control_binary.to_string_lossy().into_owned()];
    if let Some(config) = config_path {
        argv.push("--config".into());
        argv.push(config.to_string_lossy().into_owned());
    }
    argv.push("hook".into());
    argv.push(service.to_owned());
    argv
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn broker_unit() -> UnitDefinition {
        let mut spec = ServiceSpec::new("orchestrator", "/opt/vigil/bin/orchestrator")
            .depends_on("broker");
        spec.args = vec!["--listen".into(), "0.0.0.0:8000".into()];
        spec.environment = vec![("LOG_LEVEL".into(), "info warn".into())];
        let hook = stop_hook_command(
            Path::new("/usr/local/bin/vigilctl"),
            Some(Path::new("/etc/vigil/vigil.toml")),
            "orchestrator",
        );
        UnitDefinition::for_service(&spec, "vigil", hook)
    }

    #[test]
    fn renders_restart_policy_delay_and_hook() {
        let rendered = broker_unit().render();
        assert!(rendered.contains("Restart=always\n"));
        assert!(rendered.contains("RestartSec=5\n"));
        assert!(rendered.contains("After=network.target vigil-broker.service\n"));
        assert!(rendered.contains("Requires=vigil-broker.service\n"));
        assert!(rendered.contains(
            "ExecStopPost=/usr/local/bin/vigilctl --config /etc/vigil/vigil.toml hook orchestrator\n"
        ));
        assert!(rendered.contains("ExecStart=/opt/vigil/bin/orchestrator --listen 0.0.0.0:8000\n"));
        assert!(rendered.contains("Environment=\"LOG_LEVEL=info warn\"\n"));
        assert!(rendered.contains("WorkingDirectory=/opt/vigil/bin\n"));
    }

    #[test]
    fn never_policy_renders_restart_no() {
        let spec = ServiceSpec::new("dashboard", "/opt/dash").with_restart_policy(RestartPolicy::Never);
        let rendered = UnitDefinition::for_service(&spec, "vigil", Vec::new()).render();
        assert!(rendered.contains("Restart=no\n"));
        assert!(!rendered.contains("ExecStopPost"));
        assert!(!rendered.contains("Requires="));
    }

    #[test]
    fn quoting_escapes_specifiers() {
        assert_eq!(quote_word("plain"), "plain");
        assert_eq!(quote_word("100%"), "100%%");
        assert_eq!(quote_word("$HOME"), "$$HOME");
        assert_eq!(quote_word("a \"b\""), "\"a \\\"b\\\"\"");
    }

    #[test]
    fn parses_show_output() {
        let status = UnitStatus::from_show_output(
            "ActiveState=active\nSubState=running\nMainPID=812\nNRestarts=3\nResult=success\n",
        );
        assert!(status.is_running());
        assert_eq!(status.main_pid, Some(812));
        assert_eq!(status.restarts, 3);

        let restarting = UnitStatus::from_show_output(
            "ActiveState=activating\nSubState=auto-restart\nMainPID=0\nResult=signal\n",
        );
        assert!(!restarting.is_running());
        assert!(restarting.is_failed());
        assert_eq!(restarting.result.as_deref(), Some("signal"));
    }

    #[tokio::test]
    async fn unit_files_are_written_and_removed() {
        let dir = tempdir().unwrap();
        let supervisor = SystemdSupervisor::new(dir.path(), "systemctl", Duration::from_secs(1));
        let unit = broker_unit();
        assert!(!supervisor.is_installed(&unit.unit_name).await.unwrap());
        supervisor.install_unit(&unit).await.unwrap();
        assert!(supervisor.is_installed(&unit.unit_name).await.unwrap());
        supervisor.remove_unit(&unit.unit_name).await.unwrap();
        supervisor.remove_unit(&unit.unit_name).await.unwrap();
        assert!(!supervisor.is_installed(&unit.unit_name).await.unwrap());
    }

    #[tokio::test]
    async fn missing_systemctl_binary_is_a_unit_error() {
        let dir = tempdir().unwrap();
        let supervisor = SystemdSupervisor::new(
            dir.path(),
            dir.path().join("no-such-systemctl"),
            Duration::from_secs(1),
        );
        let err = supervisor.reload().await.unwrap_err();
        assert!(matches!(err, SupervisorError::Unit(_)));
    }
}
