//! ---
//! vigil_section: "07-resilience-fault-tolerance"
//! vigil_subsection: "binary"
//! vigil_type: "source"
//! vigil_scope: "code"
//! vigil_description: "Stop hook entry point and crash log inspection."
//! vigil_version: "v0.0.0-prealpha"
//! vigil_owner: "tbd"
//! ---
//! `hook` runs as the unit's `ExecStopPost=` command. It classifies the stop
//! from the variables systemd exports, records failures and attempts one
//! bounded alert delivery. Every outcome is logged; nothing is returned to
//! systemd but success.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use tokio::runtime::Runtime;
use tracing::{error, info, warn};
use vigil_common::AlertConfig;
use vigil_supervisor::{
    AlertDispatcher, Classification, CrashClassifier, CrashLog, FileCrashLog, StopEvent,
    StopIntents,
};

use crate::output;
use crate::CliContext;

#[derive(Debug, Args)]
pub struct HookArgs {
    /// Managed service whose unit stopped.
    service: String,
    #[arg(long, env = "SERVICE_RESULT", hide_env_values = true)]
    service_result: Option<String>,
    #[arg(long, env = "EXIT_CODE", hide_env_values = true)]
    exit_code: Option<String>,
    #[arg(long, env = "EXIT_STATUS", hide_env_values = true)]
    exit_status: Option<String>,
    /// Also print the classification on stdout.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
pub struct CrashesArgs {
    /// Number of most recent records to show.
    #[arg(long, short = 'n', default_value_t = 20)]
    limit: usize,
    #[arg(long)]
    json: bool,
}

/// Never fails: a failure is recorded even when delivery cannot be set up.
pub fn run(ctx: &CliContext, args: HookArgs) {
    if ctx.config.service(&args.service).is_none() {
        warn!(service = %args.service, "stop hook invoked for unmanaged service");
    }
    let event = StopEvent::from_supervisor_env(
        args.service.clone(),
        args.service_result.as_deref(),
        args.exit_code.as_deref(),
        args.exit_status.as_deref(),
    );

    let alerts = AlertConfig::load(&ctx.config.paths.alert_config).unwrap_or_else(|err| {
        warn!(error = %format!("{err:#}"), "alert config unreadable; alerting is log-only");
        AlertConfig::default()
    });
    let dispatcher = AlertDispatcher::telegram_or_unavailable(&ctx.config.alert);
    let log = Arc::new(FileCrashLog::new(&ctx.config.paths.crash_log));
    let classifier = CrashClassifier::new(log, dispatcher, Arc::new(alerts))
        .with_intents(StopIntents::new(&ctx.config.paths.state_dir));

    let handling = match Runtime::new() {
        Ok(runtime) => runtime.block_on(classifier.handle(event)),
        Err(err) => {
            error!(error = %err, "unable to start async runtime; recording without alert delivery");
            classifier.record(event)
        }
    };
    match &handling.classification {
        Classification::Clean => {
            info!(service = %handling.event.service, reason = %handling.event.raw_reason, "clean stop")
        }
        Classification::Failure(record) => info!(
            service = %record.service_name,
            reason = %record.exit_reason,
            exit_code = ?record.exit_code,
            persisted = handling.record_persisted,
            dispatch = ?handling.dispatch,
            "failure handled"
        ),
    }
    if args.json {
        println!(
            "{}",
            serde_json::json!({
                "service": handling.event.service,
                "failure": handling.classification.is_failure(),
                "reason": handling.event.reason,
                "exit_code": handling.event.exit_code,
                "persisted": handling.record_persisted,
            })
        );
    }
}

pub fn crashes(ctx: &CliContext, args: CrashesArgs) -> Result<ExitCode> {
    let log = FileCrashLog::new(&ctx.config.paths.crash_log);
    let records = log.recent(args.limit)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        output::print_crashes(&records);
    }
    Ok(ExitCode::SUCCESS)
}
