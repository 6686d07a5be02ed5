//! ---
//! vigil_section: "05-networking-external-interfaces"
//! vigil_subsection: "binary"
//! vigil_type: "source"
//! vigil_scope: "code"
//! vigil_description: "Control CLI for operators managing Vigil services."
//! vigil_version: "v0.0.0-prealpha"
//! vigil_owner: "tbd"
//! ---
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use vigil_common::{init_console, init_tracing, LogFormat, SupervisorConfig, VersionInfo};
use vigil_supervisor::Operation;

mod alert;
mod hook;
mod lifecycle;
mod output;

const DEFAULT_CONFIG: &str = "/etc/vigil/vigil.toml";

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    about = "Vigil service supervisor control utility",
    long_about = None
)]
struct Cli {
    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print extended version information and exit"
    )]
    version: bool,
    /// Configuration file (defaults to /etc/vigil/vigil.toml, then built-in defaults).
    #[arg(long, global = true, value_name = "FILE", env = "VIGIL_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Write units and helper commands, then enable the services")]
    Install,
    #[command(about = "Stop all services and remove units and helper commands")]
    Uninstall,
    #[command(about = "Start all services in dependency order")]
    Start,
    #[command(about = "Stop all services in reverse dependency order")]
    Stop,
    #[command(about = "Stop, then start, all services")]
    Restart,
    #[command(about = "Show service states; exits 3 unless every service is running")]
    Status(lifecycle::StatusArgs),
    #[command(about = "Stop hook invoked by the process supervisor")]
    Hook(hook::HookArgs),
    #[command(about = "Show recent crash records")]
    Crashes(hook::CrashesArgs),
    #[command(subcommand, about = "Inspect or change the alert configuration")]
    Alert(alert::AlertCommand),
}

/// Effective configuration plus the file it came from.
pub(crate) struct CliContext {
    pub config: SupervisorConfig,
    pub source: Option<PathBuf>,
}

fn load_config(explicit: Option<PathBuf>) -> Result<CliContext> {
    match explicit {
        Some(path) => {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("unable to read config file {}", path.display()))?;
            let config = raw
                .parse::<SupervisorConfig>()
                .with_context(|| format!("invalid config file {}", path.display()))?;
            Ok(CliContext {
                config,
                source: Some(path),
            })
        }
        None => {
            let loaded = SupervisorConfig::load_with_source(&[DEFAULT_CONFIG])?;
            Ok(CliContext {
                config: loaded.config,
                source: loaded.source,
            })
        }
    }
}

fn init_logging(config: &SupervisorConfig) {
    if let Err(err) = init_tracing("vigilctl", &config.logging) {
        init_console(config.logging.format);
        tracing::warn!(
            error = %err,
            directory = %config.logging.directory.display(),
            "log directory unavailable; logging to console only"
        );
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    if cli.version {
        let info = VersionInfo::new(
            env!("CARGO_PKG_VERSION"),
            option_env!("VERGEN_BUILD_TIMESTAMP"),
            option_env!("VERGEN_CARGO_TARGET_TRIPLE"),
            option_env!("VERGEN_CARGO_OPT_LEVEL"),
        );
        println!("{}", info.extended());
        return Ok(ExitCode::SUCCESS);
    }
    let Some(command) = cli.command else {
        eprintln!("no command given; see `vigilctl --help`");
        return Ok(ExitCode::from(2));
    };

    let ctx = match load_config(cli.config) {
        Ok(ctx) => ctx,
        // The stop hook must never report failure back to the process supervisor.
        Err(err) if matches!(command, Commands::Hook(_)) => {
            init_console(LogFormat::Pretty);
            tracing::error!(error = %format!("{err:#}"), "configuration unavailable; stop hook using defaults");
            CliContext {
                config: SupervisorConfig::default(),
                source: None,
            }
        }
        Err(err) => {
            init_console(LogFormat::Pretty);
            return Err(err);
        }
    };
    init_logging(&ctx.config);

    match command {
        Commands::Install => lifecycle::execute(&ctx, Operation::Install),
        Commands::Uninstall => lifecycle::execute(&ctx, Operation::Uninstall),
        Commands::Start => lifecycle::execute(&ctx, Operation::Start),
        Commands::Stop => lifecycle::execute(&ctx, Operation::Stop),
        Commands::Restart => lifecycle::execute(&ctx, Operation::Restart),
        Commands::Status(args) => lifecycle::status(&ctx, args),
        Commands::Crashes(args) => hook::crashes(&ctx, args),
        Commands::Alert(cmd) => alert::run(&ctx, cmd),
        Commands::Hook(args) => {
            hook::run(&ctx, args);
            Ok(ExitCode::SUCCESS)
        }
    }
}
