//! ---
//! vigil_section: "05-networking-external-interfaces"
//! vigil_subsection: "binary"
//! vigil_type: "source"
//! vigil_scope: "code"
//! vigil_description: "Lifecycle and status subcommands."
//! vigil_version: "v0.0.0-prealpha"
//! vigil_owner: "tbd"
//! ---
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use tokio::runtime::Runtime;
use vigil_supervisor::{LifecycleController, Operation, OperationLock};

use crate::output;
use crate::CliContext;

const EXIT_NOT_RUNNING: u8 = 3;

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Emit the service states as JSON.
    #[arg(long)]
    json: bool,
}

fn controller(ctx: &CliContext) -> Result<LifecycleController> {
    let control_binary =
        std::env::current_exe().context("unable to resolve the vigilctl executable path")?;
    let controller =
        LifecycleController::for_system(&ctx.config, control_binary, ctx.source.clone())?;
    Ok(controller)
}

/// Run one mutating operation under the operation lock and print its summary.
pub fn execute(ctx: &CliContext, operation: Operation) -> Result<ExitCode> {
    let controller = controller(ctx)?;
    let _lock = OperationLock::acquire(&ctx.config.paths.state_dir)?;
    let runtime = Runtime::new()?;
    let result = runtime.block_on(async {
        match operation {
            Operation::Install => controller.install().await,
            Operation::Start => controller.start().await,
            Operation::Stop => controller.stop().await,
            Operation::Restart => controller.restart().await,
            Operation::Uninstall => controller.uninstall().await,
        }
    });
    match result {
        Ok(report) => {
            output::print_report(&report);
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            if let Some(partial) = err.partial_report() {
                output::print_report(partial);
            }
            Err(err.into())
        }
    }
}

pub fn status(ctx: &CliContext, args: StatusArgs) -> Result<ExitCode> {
    let controller = controller(ctx)?;
    let runtime = Runtime::new()?;
    let states = runtime.block_on(controller.refresh())?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&states)?);
    } else {
        output::print_status(&states);
    }
    if controller.all_running() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_NOT_RUNNING))
    }
}
