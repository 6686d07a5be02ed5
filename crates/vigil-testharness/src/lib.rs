//! ---
//! vigil_section: "11-simulation"
//! vigil_subsection: "01-bootstrap"
//! vigil_type: "source"
//! vigil_scope: "code"
//! vigil_description: "Test harness fixtures and shared exports."
//! vigil_version: "v0.1.0"
//! vigil_owner: "tbd"
//! ---
//! In-memory stand-ins for the facilities the supervisor drives: systemd,
//! the OS socket/process table and the remote alert endpoint. [`Harness`]
//! wires them into a [`LifecycleController`] over a temporary state
//! directory.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tempfile::TempDir;
use vigil_common::AlertConfig;
use vigil_supervisor::{
    AlertDispatcher, ArtifactProvider, ConfigurationError, CrashClassifier, LifecycleController,
    LifecycleSettings, MemoryCrashLog, ReclaimEngine, ServiceRegistry, ServiceSpec,
};

pub mod notifier;
pub mod process_table;
pub mod supervisor;

pub use notifier::{RecordingNotifier, SentAlert};
pub use process_table::FakeProcessTable;
pub use supervisor::{FakeSupervisor, SupervisorCall};

pub const CONTROL_BINARY: &str = "/usr/local/bin/vigilctl";

/// Artifact provider that trusts configured paths unless told a service is missing.
#[derive(Debug, Default)]
pub struct StaticArtifacts {
    missing: Mutex<HashSet<String>>,
}

impl StaticArtifacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remove(&self, service: &str) {
        self.missing.lock().insert(service.to_owned());
    }
}

impl ArtifactProvider for StaticArtifacts {
    fn resolve(&self, spec: &ServiceSpec) -> Result<PathBuf, ConfigurationError> {
        if self.missing.lock().contains(&spec.name) {
            return Err(ConfigurationError::MissingExecutable {
                service: spec.name.clone(),
                path: spec.executable.clone(),
            });
        }
        Ok(spec.executable.clone())
    }
}

/// broker:1883 -> orchestrator:8000 -> dashboard:3000.
pub fn chain_specs() -> Vec<ServiceSpec> {
    vec![
        ServiceSpec::new("broker", "/opt/vigil/bin/broker").with_port(1883),
        ServiceSpec::new("orchestrator", "/opt/vigil/bin/orchestrator")
            .with_port(8000)
            .depends_on("broker"),
        ServiceSpec::new("dashboard", "/opt/vigil/bin/dashboard")
            .with_port(3000)
            .depends_on("orchestrator"),
    ]
}

pub fn chain_registry() -> ServiceRegistry {
    match ServiceRegistry::new(chain_specs()) {
        Ok(registry) => registry,
        Err(err) => panic!("fixture registry is invalid: {err}"),
    }
}

/// Alert configuration with credentials present.
pub fn configured_alerts() -> AlertConfig {
    let mut config = AlertConfig::default();
    config.hospital_name = "General Hospital".into();
    config.region = "East".into();
    config.bot_token = Some("42:test-token".into());
    config.chat_id = Some("-1001".into());
    config
}

/// A controller over fakes and a temporary state directory.
pub struct Harness {
    pub dir: TempDir,
    pub supervisor: Arc<FakeSupervisor>,
    pub table: Arc<FakeProcessTable>,
    pub artifacts: Arc<StaticArtifacts>,
    pub controller: LifecycleController,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_registry(chain_registry())
    }

    pub fn with_registry(registry: ServiceRegistry) -> Self {
        let dir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(err) => panic!("unable to create harness directory: {err}"),
        };
        let supervisor = Arc::new(FakeSupervisor::new());
        let table = Arc::new(FakeProcessTable::new());
        let artifacts = Arc::new(StaticArtifacts::new());
        let controller = LifecycleController::new(
            registry,
            Self::settings(dir.path()),
            supervisor.clone(),
            Arc::new(ReclaimEngine::new(table.clone())),
            artifacts.clone(),
        );
        Self {
            dir,
            supervisor,
            table,
            artifacts,
            controller,
        }
    }

    pub fn settings(root: &Path) -> LifecycleSettings {
        LifecycleSettings {
            unit_prefix: "vigil".into(),
            state_dir: root.join("state"),
            bin_dir: root.join("bin"),
            control_binary: PathBuf::from(CONTROL_BINARY),
            config_path: Some(root.join("vigil.toml")),
            readiness_timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(10),
            extra_ports: Vec::new(),
            extra_process_names: Vec::new(),
        }
    }

    pub fn unit(&self, service: &str) -> String {
        self.controller.unit_name(service)
    }

    pub fn units(&self, services: &[&str]) -> Vec<String> {
        services.iter().map(|service| self.unit(service)).collect()
    }

    /// Classifier over an in-memory crash log, sharing this harness' stop intents.
    pub fn classifier(
        &self,
        notifier: Arc<RecordingNotifier>,
        alerts: AlertConfig,
        timeout: Duration,
    ) -> (CrashClassifier, Arc<MemoryCrashLog>) {
        let log = Arc::new(MemoryCrashLog::new());
        let dispatcher = AlertDispatcher::new(notifier, timeout).with_host("test-gateway");
        let classifier = CrashClassifier::new(log.clone(), dispatcher, Arc::new(alerts))
            .with_intents(self.controller.intents().clone());
        (classifier, log)
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
