//! CLI command definitions and dispatch.

pub mod check;
pub mod provision;
pub mod run;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use hutch_common::config::HutchConfig;

/// hutch: run one payload in an isolated, resource-limited container.
#[derive(Parser, Debug)]
#[command(name = "hutch", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// JSON configuration file. Flags override its values.
    #[arg(long, global = true, env = "HUTCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a payload in a new container and clean up afterwards.
    Run(run::RunArgs),
    /// Make sure a root filesystem exists, bootstrapping it if needed.
    Provision(provision::ProvisionArgs),
    /// Report whether this host can run containers.
    Check(check::CheckArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded or the command
/// fails.
pub fn execute(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = HutchConfig::load_or_default(cli.config.as_deref())?;
    match cli.command {
        Command::Run(args) => run::execute(args, config),
        Command::Provision(args) => provision::execute(&args, &config).map(|()| ExitCode::SUCCESS),
        Command::Check(args) => check::execute(&args, &config),
    }
}
