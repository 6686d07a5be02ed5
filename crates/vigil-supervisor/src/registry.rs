//! ---
//! vigil_section: "07-resilience-fault-tolerance"
//! vigil_subsection: "module"
//! vigil_type: "source"
//! vigil_scope: "code"
//! vigil_description: "Static service registry ordered by start dependencies."
//! vigil_version: "v0.0.0-prealpha"
//! vigil_owner: "tbd"
//! ---
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::Serialize;
use vigil_common::{ServiceConfig, SupervisorConfig};

use crate::error::ConfigurationError;

pub use vigil_common::RestartPolicyKind as RestartPolicy;

/// Immutable description of a managed service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceSpec {
    pub name: String,
    pub executable: PathBuf,
    pub working_directory: PathBuf,
    pub args: Vec<String>,
    pub port: Option<u16>,
    pub depends_on: Vec<String>,
    pub restart_policy: RestartPolicy,
    pub restart_delay: Duration,
    /// Executable file name matched by the orphan sweep.
    pub process_name: String,
    pub environment: Vec<(String, String)>,
}

impl ServiceSpec {
    /// Minimal spec: restart always, 5s delay, working directory next to the binary.
    pub fn new(name: impl Into<String>, executable: impl Into<PathBuf>) -> Self {
        let executable = executable.into();
        Self {
            name: name.into(),
            working_directory: default_working_directory(&executable),
            process_name: file_name_of(&executable),
            executable,
            args: Vec::new(),
            port: None,
            depends_on: Vec::new(),
            restart_policy: RestartPolicy::Always,
            restart_delay: Duration::from_secs(5),
            environment: Vec::new(),
        }
    }

    pub fn from_config(name: &str, config: &ServiceConfig) -> Self {
        let mut spec = ServiceSpec::new(name, config.executable.clone());
        if let Some(dir) = &config.working_directory {
            spec.working_directory = dir.clone();
        }
        if let Some(process_name) = &config.process_name {
            spec.process_name = process_name.clone();
        }
        spec.args = config.args.clone();
        spec.port = config.port;
        spec.depends_on = config.depends_on.clone();
        spec.restart_policy = config.restart;
        spec.restart_delay = config.restart_delay;
        spec.environment = config
            .environment
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        spec
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn depends_on(mut self, service: impl Into<String>) -> Self {
        self.depends_on.push(service.into());
        self
    }

    pub fn with_restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart_policy = policy;
        self
    }

    pub fn with_process_name(mut self, name: impl Into<String>) -> Self {
        self.process_name = name.into();
        self
    }
}

fn default_working_directory(executable: &Path) -> PathBuf {
    executable
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"))
}

fn file_name_of(executable: &Path) -> String {
    executable
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Validated, dependency-ordered set of services.
///
/// Services are stored in start order: every service appears after all of
/// its dependencies, and services with no ordering constraint between them
/// keep their declaration order.
#[derive(Debug, Clone)]
pub struct ServiceRegistry {
    ordered: Vec<ServiceSpec>,
}

impl ServiceRegistry {
    pub fn new(specs: Vec<ServiceSpec>) -> Result<Self, ConfigurationError> {
        let mut index: HashMap<&str, NodeIndex> = HashMap::with_capacity(specs.len());
        let mut graph: DiGraph<usize, ()> = DiGraph::with_capacity(specs.len(), specs.len());

        for (position, spec) in specs.iter().enumerate() {
            let node = graph.add_node(position);
            if index.insert(spec.name.as_str(), node).is_some() {
                return Err(ConfigurationError::DuplicateService(spec.name.clone()));
            }
        }

        for spec in &specs {
            let dependent = index[spec.name.as_str()];
            for dependency in &spec.depends_on {
                if dependency == &spec.name {
                    return Err(ConfigurationError::SelfDependency(spec.name.clone()));
                }
                let Some(&prerequisite) = index.get(dependency.as_str()) else {
                    return Err(ConfigurationError::UnknownDependency {
                        service: spec.name.clone(),
                        dependency: dependency.clone(),
                    });
                };
                graph.update_edge(prerequisite, dependent, ());
            }
        }

        let order = stable_topological_order(&graph).ok_or_else(|| {
            let members = cycle_members(&graph, &specs);
            ConfigurationError::CyclicDependency(members)
        })?;

        let mut slots: Vec<Option<ServiceSpec>> = specs.into_iter().map(Some).collect();
        let ordered = order
            .into_iter()
            .filter_map(|node| slots[graph[node]].take())
            .collect();
        Ok(Self { ordered })
    }

    /// Build the registry from the `[services]` table of the configuration.
    pub fn from_config(config: &SupervisorConfig) -> Result<Self, ConfigurationError> {
        let specs = config
            .services
            .iter()
            .map(|(name, service)| ServiceSpec::from_config(name, service))
            .collect();
        Self::new(specs)
    }

    /// Services in start order.
    pub fn list_services(&self) -> &[ServiceSpec] {
        &self.ordered
    }

    /// Services in stop order.
    pub fn reverse(&self) -> impl Iterator<Item = &ServiceSpec> {
        self.ordered.iter().rev()
    }

    pub fn get(&self, name: &str) -> Option<&ServiceSpec> {
        self.ordered.iter().find(|spec| spec.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.ordered.iter().map(|spec| spec.name.as_str())
    }

    /// Every declared listening port, deduplicated, in start order.
    pub fn ports(&self) -> Vec<u16> {
        let mut ports = Vec::new();
        for port in self.ordered.iter().filter_map(|spec| spec.port) {
            if !ports.contains(&port) {
                ports.push(port);
            }
        }
        ports
    }

    /// Executable names swept for orphaned processes.
    pub fn process_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for spec in &self.ordered {
            if !spec.process_name.is_empty() && !names.contains(&spec.process_name) {
                names.push(spec.process_name.clone());
            }
        }
        names
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

/// Kahn's algorithm with a min-heap keyed on declaration position.
fn stable_topological_order(graph: &DiGraph<usize, ()>) -> Option<Vec<NodeIndex>> {
    let mut in_degree: Vec<usize> = graph
        .node_indices()
        .map(|node| graph.neighbors_directed(node, Direction::Incoming).count())
        .collect();
    let mut ready: BinaryHeap<Reverse<NodeIndex>> = graph
        .node_indices()
        .filter(|node| in_degree[node.index()] == 0)
        .map(Reverse)
        .collect();

    let mut order = Vec::with_capacity(graph.node_count());
    while let Some(Reverse(node)) = ready.pop() {
        order.push(node);
        for next in graph.neighbors_directed(node, Direction::Outgoing) {
            in_degree[next.index()] -= 1;
            if in_degree[next.index()] == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    (order.len() == graph.node_count()).then_some(order)
}

fn cycle_members(graph: &DiGraph<usize, ()>, specs: &[ServiceSpec]) -> Vec<String> {
    let mut members: Vec<usize> = tarjan_scc(graph)
        .into_iter()
        .filter(|component| component.len() > 1)
        .flatten()
        .map(|node| graph[node])
        .collect();
    members.sort_unstable();
    members
        .into_iter()
        .map(|position| specs[position].name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> ServiceSpec {
        ServiceSpec::new(name, format!("/opt/vigil/bin/{name}"))
    }

    fn names(registry: &ServiceRegistry) -> Vec<&str> {
        registry.names().collect()
    }

    #[test]
    fn orders_dependencies_before_dependents() {
        let registry = ServiceRegistry::new(vec![
            spec("dashboard").depends_on("orchestrator"),
            spec("orchestrator").depends_on("broker"),
            spec("broker"),
        ])
        .unwrap();
        assert_eq!(names(&registry), vec!["broker", "orchestrator", "dashboard"]);
        let stop: Vec<_> = registry.reverse().map(|s| s.name.as_str()).collect();
        assert_eq!(stop, vec!["dashboard", "orchestrator", "broker"]);
    }

    #[test]
    fn independent_services_keep_declaration_order() {
        let registry = ServiceRegistry::new(vec![
            spec("zeta"),
            spec("alpha"),
            spec("web").depends_on("alpha").depends_on("zeta"),
            spec("mid"),
        ])
        .unwrap();
        assert_eq!(names(&registry), vec!["zeta", "alpha", "web", "mid"]);
    }

    #[test]
    fn cycle_lists_every_member() {
        let err = ServiceRegistry::new(vec![
            spec("standalone"),
            spec("a").depends_on("c"),
            spec("b").depends_on("a"),
            spec("c").depends_on("b"),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::CyclicDependency(vec!["a".into(), "b".into(), "c".into()])
        );
    }

    #[test]
    fn rejects_unknown_duplicate_and_self_references() {
        let unknown = ServiceRegistry::new(vec![spec("a").depends_on("ghost")]).unwrap_err();
        assert!(matches!(
            unknown,
            ConfigurationError::UnknownDependency { ref dependency, .. } if dependency == "ghost"
        ));

        let duplicate = ServiceRegistry::new(vec![spec("a"), spec("a")]).unwrap_err();
        assert_eq!(duplicate, ConfigurationError::DuplicateService("a".into()));

        let looped = ServiceRegistry::new(vec![spec("a").depends_on("a")]).unwrap_err();
        assert_eq!(looped, ConfigurationError::SelfDependency("a".into()));
    }

    #[test]
    fn default_config_builds_three_service_chain() {
        let registry = ServiceRegistry::from_config(&SupervisorConfig::default()).unwrap();
        assert_eq!(names(&registry), vec!["broker", "orchestrator", "dashboard"]);
        assert_eq!(registry.ports(), vec![1883, 8000, 3000]);
        assert_eq!(
            registry.process_names(),
            vec!["broker", "orchestrator", "dashboard"]
        );
        let broker = registry.get("broker").unwrap();
        assert_eq!(broker.restart_policy, RestartPolicy::Always);
        assert_eq!(broker.restart_delay, Duration::from_secs(5));
        assert_eq!(broker.working_directory, PathBuf::from("/opt/vigil/broker"));
    }

    #[test]
    fn working_directory_defaults_to_executable_parent() {
        let spec = ServiceSpec::new("api", "/srv/api/bin/api-server");
        assert_eq!(spec.working_directory, PathBuf::from("/srv/api/bin"));
        assert_eq!(spec.process_name, "api-server");
    }
}
