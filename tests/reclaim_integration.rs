//! ---
//! vigil_section: "15-testing-qa-runbook"
//! vigil_subsection: "integration-tests"
//! vigil_type: "source"
//! vigil_scope: "code"
//! vigil_description: "Port reclamation and orphan sweep scenarios."
//! vigil_version: "v0.0.0-prealpha"
//! vigil_owner: "tbd"
//! ---
use std::sync::Arc;

use vigil_supervisor::{ProcessInfo, ReclaimEngine, ReclaimTarget};
use vigil_testharness::{FakeProcessTable, Harness};

fn stale(pid: u32, name: &str) -> ProcessInfo {
    ProcessInfo::new(pid, name).with_executable(format!("/usr/bin/{name}"))
}

#[test]
fn reclaim_twice_is_idempotent() {
    let table = Arc::new(FakeProcessTable::new());
    table.add_listener(1883, stale(5_200_001, "mosquitto"));
    table.add_listener(8000, stale(5_200_002, "python3"));
    let engine = ReclaimEngine::new(table.clone());

    let first = engine.reclaim(&[1883, 8000, 3000]);
    assert!(first.is_clean());
    assert_eq!(first.terminated_pids(), vec![5_200_001, 5_200_002]);

    let second = engine.reclaim(&[1883, 8000, 3000]);
    assert!(second.is_clean());
    assert!(second.terminated.is_empty());
    assert_eq!(table.killed(), vec![5_200_001, 5_200_002]);
}

#[test]
fn process_on_several_ports_is_killed_once() {
    let table = Arc::new(FakeProcessTable::new());
    let holder = stale(5_200_010, "node");
    table.add_listener(3000, holder.clone());
    table.add_listener(3001, holder);
    let report = ReclaimEngine::new(table.clone()).reclaim(&[3000, 3001]);
    assert_eq!(report.terminated_pids(), vec![5_200_010]);
    assert_eq!(table.killed(), vec![5_200_010]);
}

#[test]
fn discovery_failure_is_recoverable() {
    let table = Arc::new(FakeProcessTable::new());
    table.break_port(1883);
    table.add_listener(8000, stale(5_200_020, "uvicorn"));
    let report = ReclaimEngine::new(table.clone()).reclaim(&[1883, 8000]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.terminated_pids(), vec![5_200_020]);
}

#[test]
fn name_sweep_is_exact() {
    let table = Arc::new(FakeProcessTable::new());
    table.add_process(stale(5_200_030, "broker"));
    table.add_process(stale(5_200_031, "broker-helper"));
    table.add_process(stale(5_200_032, "mybroker"));
    let report = ReclaimEngine::new(table.clone()).kill_by_executable_name("broker");
    assert_eq!(report.terminated_pids(), vec![5_200_030]);
    assert!(table.alive(5_200_031));
    assert!(table.alive(5_200_032));
    assert!(matches!(
        report.terminated[0].target,
        ReclaimTarget::Executable(ref name) if name == "broker"
    ));
}

#[tokio::test]
async fn start_reclaims_stale_listeners_before_spawning() {
    let harness = Harness::new();
    harness.table.add_listener(1883, stale(5_200_040, "mosquitto"));
    harness.table.add_process(ProcessInfo::new(5_200_041, "dashboard"));
    harness.table.add_process(ProcessInfo::new(5_200_042, "dashboard-worker"));
    harness.controller.install().await.unwrap();
    // Install already sweeps once: names first, then ports.
    assert_eq!(harness.table.killed(), vec![5_200_041, 5_200_040]);

    harness.table.add_listener(8000, stale(5_200_043, "gunicorn"));
    let report = harness.controller.start().await.unwrap();
    assert_eq!(report.reclaim.terminated_pids(), vec![5_200_043]);
    assert!(harness.table.alive(5_200_042));
}

#[tokio::test]
async fn running_services_are_spared() {
    let harness = Harness::new();
    harness.controller.install().await.unwrap();
    harness.controller.start().await.unwrap();

    let broker_pid = harness.supervisor.pid_of(&harness.unit("broker")).unwrap();
    harness.table.add_listener(1883, ProcessInfo::new(broker_pid, "broker"));

    let report = harness.controller.start().await.unwrap();
    assert!(report.reclaim.terminated.is_empty());
    assert!(harness.table.killed().is_empty());
    assert!(harness.table.alive(broker_pid));
}

#[tokio::test]
async fn unkillable_holder_does_not_block_start() {
    let harness = Harness::new();
    harness.controller.install().await.unwrap();
    harness.table.add_listener(3000, stale(5_200_050, "grafana"));
    harness.table.make_unkillable(5_200_050);

    let report = harness.controller.start().await.unwrap();
    assert!(!report.reclaim.is_clean());
    assert!(harness.controller.all_running());
}
