//! ---
//! vigil_section: "05-networking-external-interfaces"
//! vigil_subsection: "binary"
//! vigil_type: "source"
//! vigil_scope: "code"
//! vigil_description: "Alert configuration subcommands."
//! vigil_version: "v0.0.0-prealpha"
//! vigil_owner: "tbd"
//! ---
use std::process::ExitCode;

use anyhow::{anyhow, bail, Result};
use clap::{Args, Subcommand};
use tokio::runtime::Runtime;
use vigil_common::{AlertConfig, AlertConfigKey};
use vigil_logging::{log_system_event, SystemEventOutcome};
use vigil_supervisor::{AlertDispatcher, DispatchOutcome};

use crate::CliContext;

pub fn run(ctx: &CliContext, command: AlertCommand) -> Result<ExitCode> {
    match command {
        AlertCommand::Show => show(ctx),
        AlertCommand::Set(cmd) => cmd.execute(ctx),
        AlertCommand::Test => send_test(ctx),
    }
}

#[derive(Debug, Subcommand)]
pub enum AlertCommand {
    /// Print the alert configuration with the bot token masked.
    Show,
    /// Set one key (HOSPITAL_NAME, REGION, BOT_TOKEN, CHAT_ID).
    Set(SetCommand),
    /// Send a test message through the configured channel.
    Test,
}

#[derive(Debug, Args)]
pub struct SetCommand {
    #[arg(value_name = "KEY")]
    key: String,
    /// New value; an empty string clears optional keys.
    #[arg(value_name = "VALUE", allow_hyphen_values = true)]
    value: String,
}

impl SetCommand {
    fn execute(self, ctx: &CliContext) -> Result<ExitCode> {
        let key: AlertConfigKey = self.key.parse().map_err(|err: String| anyhow!(err))?;
        let path = &ctx.config.paths.alert_config;
        let mut alerts = AlertConfig::load(path)?;
        alerts.set(key, &self.value)?;
        alerts.persist(path)?;
        log_system_event(
            None,
            "alert.config",
            &format!("{} updated in {}", key, path.display()),
            SystemEventOutcome::Success,
        );
        println!("{}={}", key, alerts.display_value(key));
        Ok(ExitCode::SUCCESS)
    }
}

fn show(ctx: &CliContext) -> Result<ExitCode> {
    let path = &ctx.config.paths.alert_config;
    let alerts = AlertConfig::load(path)?;
    println!("# {}", path.display());
    for key in AlertConfigKey::ALL {
        println!("{}={}", key, alerts.display_value(key));
    }
    if !alerts.has_credentials() {
        println!("# BOT_TOKEN and CHAT_ID are required for remote delivery; failures are logged locally only");
    }
    Ok(ExitCode::SUCCESS)
}

fn send_test(ctx: &CliContext) -> Result<ExitCode> {
    let alerts = AlertConfig::load(&ctx.config.paths.alert_config)?;
    if !alerts.has_credentials() {
        bail!("alert credentials not configured; set BOT_TOKEN and CHAT_ID first");
    }
    let dispatcher = AlertDispatcher::telegram(&ctx.config.alert)?;
    let runtime = Runtime::new()?;
    match runtime.block_on(dispatcher.send_test(&alerts)) {
        DispatchOutcome::Delivered => {
            println!("test alert delivered to chat {}", alerts.display_value(AlertConfigKey::ChatId));
            Ok(ExitCode::SUCCESS)
        }
        DispatchOutcome::Skipped => bail!("alert credentials not configured"),
        DispatchOutcome::Failed(reason) => bail!("test alert failed: {reason}"),
    }
}
