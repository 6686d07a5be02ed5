//! ---
//! vigil_section: "05-networking-external-interfaces"
//! vigil_subsection: "binary"
//! vigil_type: "source"
//! vigil_scope: "code"
//! vigil_description: "Plain-text rendering of reports, states and crash records."
//! vigil_version: "v0.0.0-prealpha"
//! vigil_owner: "tbd"
//! ---
use vigil_supervisor::{CrashRecord, OperationReport, ServiceState};

pub fn print_report(report: &OperationReport) {
    println!("{}:", report.operation);
    for outcome in &report.outcomes {
        println!("  {:<16} {}", outcome.service, outcome.action);
    }
    for terminated in &report.reclaim.terminated {
        println!(
            "  reclaimed {} from pid {} ({})",
            terminated.target, terminated.pid, terminated.process_name
        );
    }
    for failure in &report.reclaim.failures {
        println!("  warning: {failure}");
    }
}

pub fn print_status(states: &[ServiceState]) {
    println!(
        "{:<16} {:<9} {:>8} {:>8}  LAST EXIT",
        "SERVICE", "STATUS", "PID", "RESTARTS"
    );
    for state in states {
        let pid = state
            .pid()
            .map(|pid| pid.to_string())
            .unwrap_or_else(|| "-".into());
        let last_exit = match (state.last_exit_reason(), state.last_exit_code()) {
            (Some(reason), Some(code)) => format!("{reason} ({code})"),
            (Some(reason), None) => reason.to_string(),
            _ => "-".into(),
        };
        println!(
            "{:<16} {:<9} {:>8} {:>8}  {}",
            state.name(),
            state.status().to_string(),
            pid,
            state.restart_count(),
            last_exit
        );
    }
}

pub fn print_crashes(records: &[CrashRecord]) {
    if records.is_empty() {
        println!("no crashes recorded");
        return;
    }
    for record in records {
        let code = record
            .exit_code
            .map(|code| code.to_string())
            .unwrap_or_else(|| "n/a".into());
        println!(
            "{}  {:<16} {:<14} exit {}",
            record.timestamp.to_rfc3339(),
            record.service_name,
            record.exit_reason.to_string(),
            code
        );
    }
}
