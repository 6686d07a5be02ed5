//! ---
//! vigil_section: "01-core-functionality"
//! vigil_subsection: "module"
//! vigil_type: "source"
//! vigil_scope: "code"
//! vigil_description: "Shared primitives and utilities for the supervisor."
//! vigil_version: "v0.0.0-prealpha"
//! vigil_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_unit_dir() -> PathBuf {
    PathBuf::from("/etc/systemd/system")
}

fn default_unit_prefix() -> String {
    "vigil".to_owned()
}

fn default_bin_dir() -> PathBuf {
    PathBuf::from("/usr/local/bin")
}

fn default_systemctl() -> PathBuf {
    PathBuf::from("systemctl")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/vigil")
}

fn default_crash_log() -> PathBuf {
    PathBuf::from("/var/log/vigil/crashes.jsonl")
}

fn default_alert_config() -> PathBuf {
    PathBuf::from("/etc/vigil/alert.conf")
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("/var/log/vigil")
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_readiness_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_alert_api_base() -> String {
    "https://api.telegram.org".to_owned()
}

fn default_alert_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_restart_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_install_root() -> PathBuf {
    PathBuf::from("/opt/vigil")
}

fn default_services() -> IndexMap<String, ServiceConfig> {
    let root = default_install_root();
    let mut services = IndexMap::new();
    services.insert(
        "broker".to_owned(),
        ServiceConfig::new(root.join("bin/broker"))
            .with_working_directory(root.join("broker"))
            .with_port(1883),
    );
    services.insert(
        "orchestrator".to_owned(),
        ServiceConfig::new(root.join("bin/orchestrator"))
            .with_working_directory(root.join("orchestrator"))
            .with_port(8000)
            .depends_on("broker"),
    );
    services.insert(
        "dashboard".to_owned(),
        ServiceConfig::new(root.join("bin/dashboard"))
            .with_working_directory(root.join("dashboard"))
            .with_port(3000)
            .depends_on("orchestrator"),
    );
    services
}

/// Primary configuration object for the supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default)]
    pub install: InstallConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub alert: AlertSettings,
    #[serde(default)]
    pub reclaim: ReclaimConfig,
    #[serde(default = "default_services")]
    pub services: IndexMap<String, ServiceConfig>,
}

/// Metadata describing where a [`SupervisorConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedSupervisorConfig {
    pub config: SupervisorConfig,
    /// `None` when no file was found and built-in defaults are in effect.
    pub source: Option<PathBuf>,
}

impl SupervisorConfig {
    pub const ENV_CONFIG_PATH: &str = "VIGIL_CONFIG";

    /// Load configuration from disk, respecting the `VIGIL_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration together with the effective source path.
    ///
    /// An explicit `VIGIL_CONFIG` path must exist. When none of the candidates
    /// exist the built-in defaults are used, so a freshly provisioned gateway
    /// can run `install` before any configuration file has been written.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedSupervisorConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedSupervisorConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedSupervisorConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        debug!(
            inspected = %candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            "no configuration file found; using defaults"
        );
        let config = Self::default();
        config.validate()?;
        Ok(LoadedSupervisorConfig {
            config,
            source: None,
        })
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<SupervisorConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Retrieve a service configuration by name.
    pub fn service(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.get(name)
    }

    /// Validate structural invariants.
    ///
    /// Dependency graph checks (unknown references, cycles) belong to the
    /// service registry and are reported there as configuration errors.
    pub fn validate(&self) -> Result<()> {
        if self.services.is_empty() {
            return Err(anyhow!("configuration must declare at least one service"));
        }
        if !is_unit_safe(&self.install.unit_prefix) {
            return Err(anyhow!(
                "unit prefix '{}' may only contain ASCII letters, digits, '-' and '_'",
                self.install.unit_prefix
            ));
        }
        for (name, service) in &self.services {
            service.validate(name)?;
        }
        self.lifecycle.validate()?;
        self.alert.validate()?;
        Ok(())
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            install: InstallConfig::default(),
            paths: PathsConfig::default(),
            logging: LoggingConfig::default(),
            lifecycle: LifecycleConfig::default(),
            alert: AlertSettings::default(),
            reclaim: ReclaimConfig::default(),
            services: default_services(),
        }
    }
}

impl std::str::FromStr for SupervisorConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: SupervisorConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

fn is_unit_safe(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
}

/// Restart behaviour requested from the external process supervisor.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum RestartPolicyKind {
    #[default]
    Always,
    Never,
}

impl std::str::FromStr for RestartPolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "always" => Ok(RestartPolicyKind::Always),
            "never" | "no" => Ok(RestartPolicyKind::Never),
            other => Err(format!("unknown restart policy: {}", other)),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub executable: PathBuf,
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub restart: RestartPolicyKind,
    #[serde(default = "default_restart_delay")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub restart_delay: Duration,
    /// Executable file name used when sweeping orphaned processes.
    #[serde(default)]
    pub process_name: Option<String>,
    #[serde(default)]
    pub environment: IndexMap<String, String>,
}

impl ServiceConfig {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            working_directory: None,
            args: Vec::new(),
            port: None,
            depends_on: Vec::new(),
            restart: RestartPolicyKind::Always,
            restart_delay: default_restart_delay(),
            process_name: None,
            environment: IndexMap::new(),
        }
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn depends_on(mut self, service: impl Into<String>) -> Self {
        self.depends_on.push(service.into());
        self
    }

    pub fn validate(&self, name: &str) -> Result<()> {
        if !is_unit_safe(name) {
            return Err(anyhow!(
                "service name '{}' may only contain ASCII letters, digits, '-' and '_'",
                name
            ));
        }
        if self.executable.as_os_str().is_empty() {
            return Err(anyhow!("service '{}' must declare an executable", name));
        }
        if self.port == Some(0) {
            return Err(anyhow!("service '{}' declares invalid port 0", name));
        }
        if let Some(process_name) = &self.process_name {
            if process_name.trim().is_empty() || process_name.contains('/') {
                return Err(anyhow!(
                    "service '{}' process_name must be a bare executable name",
                    name
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallConfig {
    #[serde(default = "default_unit_dir")]
    pub unit_dir: PathBuf,
    #[serde(default = "default_unit_prefix")]
    pub unit_prefix: String,
    /// Directory receiving the `<prefix>-start` style helper commands.
    #[serde(default = "default_bin_dir")]
    pub bin_dir: PathBuf,
    #[serde(default = "default_systemctl")]
    pub systemctl: PathBuf,
    /// Path of the control binary referenced by unit hooks and helpers.
    /// Defaults to the currently running executable.
    #[serde(default)]
    pub control_binary: Option<PathBuf>,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            unit_dir: default_unit_dir(),
            unit_prefix: default_unit_prefix(),
            bin_dir: default_bin_dir(),
            systemctl: default_systemctl(),
            control_binary: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default = "default_crash_log")]
    pub crash_log: PathBuf,
    #[serde(default = "default_alert_config")]
    pub alert_config: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            crash_log: default_crash_log(),
            alert_config: default_alert_config(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    #[serde(default = "default_readiness_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub readiness_timeout: Duration,
    #[serde(default = "default_poll_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub poll_interval: Duration,
    /// Upper bound for a single `systemctl` invocation.
    #[serde(default = "default_command_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub command_timeout: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            readiness_timeout: default_readiness_timeout(),
            poll_interval: default_poll_interval(),
            command_timeout: default_command_timeout(),
        }
    }
}

impl LifecycleConfig {
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(anyhow!("lifecycle.poll_interval must be greater than zero"));
        }
        if self.poll_interval > self.readiness_timeout {
            return Err(anyhow!(
                "lifecycle.poll_interval must not exceed lifecycle.readiness_timeout"
            ));
        }
        Ok(())
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertSettings {
    #[serde(default = "default_alert_api_base")]
    pub api_base: String,
    #[serde(default = "default_alert_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub timeout: Duration,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            api_base: default_alert_api_base(),
            timeout: default_alert_timeout(),
        }
    }
}

impl AlertSettings {
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(anyhow!("alert.timeout must be greater than zero"));
        }
        if !(self.api_base.starts_with("http://") || self.api_base.starts_with("https://")) {
            return Err(anyhow!(
                "alert.api_base '{}' must be an http(s) URL",
                self.api_base
            ));
        }
        Ok(())
    }
}

/// Extra targets swept on every reclamation pass in addition to the ports and
/// executables declared by the services themselves.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReclaimConfig {
    #[serde(default)]
    pub extra_ports: Vec<u16>,
    #[serde(default)]
    pub extra_process_names: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_declare_three_service_chain() {
        let config = SupervisorConfig::default();
        config.validate().unwrap();
        let names: Vec<_> = config.services.keys().cloned().collect();
        assert_eq!(names, vec!["broker", "orchestrator", "dashboard"]);
        assert_eq!(config.services["orchestrator"].depends_on, vec!["broker"]);
        assert_eq!(config.services["broker"].port, Some(1883));
    }

    #[test]
    fn parses_services_and_durations() {
        let raw = r#"
            [lifecycle]
            readiness_timeout = 10
            poll_interval = 250

            [services.broker]
            executable = "/usr/sbin/mosquitto"
            port = 1883
            restart_delay = 2

            [services.dashboard]
            executable = "/opt/dash/run"
            depends_on = ["broker"]
            restart = "never"
        "#;
        let config: SupervisorConfig = raw.parse().unwrap();
        assert_eq!(config.services.len(), 2);
        assert_eq!(config.lifecycle.poll_interval, Duration::from_millis(250));
        assert_eq!(
            config.services["broker"].restart_delay,
            Duration::from_secs(2)
        );
        assert_eq!(config.services["dashboard"].restart, RestartPolicyKind::Never);
        assert_eq!(config.alert.timeout, Duration::from_secs(5));
    }

    #[test]
    fn rejects_unit_unsafe_service_names() {
        let raw = r#"
            [services."bad name"]
            executable = "/bin/true"
        "#;
        let err = raw.parse::<SupervisorConfig>().unwrap_err();
        assert!(err.to_string().contains("bad name"));
    }

    #[test]
    fn rejects_poll_interval_longer_than_timeout() {
        let mut config = SupervisorConfig::default();
        config.lifecycle.poll_interval = Duration::from_secs(60);
        assert!(config.validate().is_err());
    }
}
