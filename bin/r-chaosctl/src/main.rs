//! ---
//! chaos_section: "04-cli"
//! chaos_subsection: "binary"
//! chaos_type: "source"
//! chaos_scope: "code"
//! chaos_description: "Control CLI for running and inspecting chaos experiments."
//! chaos_version: "v0.1.0"
//! chaos_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use clap::{ArgAction, Parser, Subcommand};
use r_chaos_common::config::{AppConfig, LoadedAppConfig};
use r_chaos_core::TargetId;

mod inspect;
mod run;

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    about = "R-Chaos experiment driver",
    long_about = None
)]
struct Cli {
    #[arg(
        long,
        value_name = "FILE",
        global = true,
        help = "Path to the experiment configuration (R_CHAOS_CONFIG takes precedence)"
    )]
    config: Option<PathBuf>,

    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print version information and exit"
    )]
    version: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the configured experiment and print its result record")]
    Run(run::RunArgs),
    #[command(about = "Load and validate the configuration without touching any target")]
    Validate,
    #[command(about = "Show which targets the experiment would select")]
    Select(inspect::SelectArgs),
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    if cli.version {
        println!("r-chaosctl {}", env!("CARGO_PKG_VERSION"));
        return Ok(ExitCode::SUCCESS);
    }
    let Some(command) = cli.command else {
        return Err(anyhow!("no command given; try `r-chaosctl --help`"));
    };

    let (loaded, load_time) = load_config(cli.config)?;
    match command {
        Commands::Run(args) => run::execute(args, loaded, load_time).await,
        Commands::Validate => {
            inspect::validate(&loaded)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Select(args) => {
            inspect::select(args, &loaded)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_config(explicit: Option<PathBuf>) -> Result<(LoadedAppConfig, Duration)> {
    let mut candidates = Vec::new();
    if let Some(path) = explicit {
        candidates.push(path);
    }
    candidates.push(PathBuf::from("r-chaos.toml"));
    candidates.push(PathBuf::from("configs/r-chaos.toml"));

    let started = Instant::now();
    let loaded = AppConfig::load_with_source(&candidates)?;
    Ok((loaded, started.elapsed()))
}

/// Targets from the command line when given, otherwise from the configuration.
pub(crate) fn resolve_candidates(cli: &[String], configured: &[String]) -> Result<Vec<TargetId>> {
    let raw = if cli.is_empty() { configured } else { cli };
    raw.iter()
        .map(|value| value.parse::<TargetId>().map_err(|err| anyhow!(err)))
        .collect()
}
