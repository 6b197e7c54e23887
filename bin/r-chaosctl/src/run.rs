//! ---
//! chaos_section: "04-cli"
//! chaos_subsection: "binary"
//! chaos_type: "source"
//! chaos_scope: "code"
//! chaos_description: "The `run` subcommand: drive one experiment end to end."
//! chaos_version: "v0.1.0"
//! chaos_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use r_chaos_common::config::LoadedAppConfig;
use r_chaos_common::logging::init_tracing;
use r_chaos_core::{
    AbortHandle, AbortReason, ChaosMetrics, ChaosRunner, ChaosSpec, CommandPlatform, Platform,
    ProbeDescriptor, Verdict,
};
use r_chaos_logging::{log_system_event, LogContext, SystemEventOutcome};
use r_chaos_metrics::{new_registry, spawn_http_server, CtlMetrics};
use tracing::{info, warn};

use crate::resolve_candidates;

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Candidate target, repeatable. Replaces `experiment.candidates` when given.
    #[arg(long = "target", value_name = "ID")]
    targets: Vec<String>,

    /// Also write the result record to this file.
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Override the experiment seed.
    #[arg(long)]
    seed: Option<u64>,
}

pub async fn execute(args: RunArgs, loaded: LoadedAppConfig, load_time: Duration) -> Result<ExitCode> {
    let LoadedAppConfig { config, source } = loaded;
    init_tracing("r-chaosctl", &config.experiment.name, &config.logging)?;
    info!(config = %source.display(), "configuration loaded");

    let registry = new_registry();
    let ctl_metrics = CtlMetrics::new(registry.clone())?;
    ctl_metrics.observe_config_load(load_time.as_secs_f64());
    ctl_metrics.set_build_info(env!("CARGO_PKG_VERSION"));
    let chaos_metrics = ChaosMetrics::new(registry.clone())?;

    let metrics_server = if config.metrics.enabled {
        info!(address = %config.metrics.listen, "metrics exporter enabled");
        Some(spawn_http_server(registry.clone(), config.metrics.listen)?)
    } else {
        None
    };

    let mut experiment = config.experiment.clone();
    if let Some(seed) = args.seed {
        experiment.seed = Some(seed);
    }
    let spec = ChaosSpec::from_config(&experiment).context("invalid experiment section")?;
    let candidates = resolve_candidates(&args.targets, &experiment.candidates)?;
    let platform: Arc<dyn Platform> = Arc::new(CommandPlatform::from_config(
        spec.target_kind.clone(),
        &config.platform,
    ));

    let mut runner = ChaosRunner::new(spec, platform)?.with_metrics(Some(chaos_metrics));
    for probe in &config.probes {
        let descriptor = ProbeDescriptor::try_from(probe)
            .with_context(|| format!("invalid probe '{}'", probe.name))?;
        runner.register_probe(descriptor)?;
    }

    let signals = tokio::spawn(forward_interrupts(runner.abort_handle()));
    let report = runner.run(&candidates).await;
    signals.abort();

    let result = report.result;
    ctl_metrics.record_run(result.verdict.as_str());
    let rendered = serde_json::to_string_pretty(&result)?;
    println!("{rendered}");
    if let Some(path) = &args.output {
        std::fs::write(path, &rendered)
            .with_context(|| format!("unable to write result to {}", path.display()))?;
    }

    let ctx = LogContext::new().with_experiment(&result.experiment);
    let outcome = if result.passed() {
        SystemEventOutcome::Success
    } else {
        SystemEventOutcome::Fault
    };
    log_system_event(
        Some(&ctx),
        "chaosctl.run",
        &format!("experiment finished with verdict {}", result.verdict),
        outcome,
    );

    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    Ok(exit_code(result.verdict))
}

fn exit_code(verdict: Verdict) -> ExitCode {
    match verdict {
        Verdict::Passed => ExitCode::SUCCESS,
        Verdict::Stopped => ExitCode::from(130),
        Verdict::Failed | Verdict::Awaited => ExitCode::FAILURE,
    }
}

/// Turn the first Ctrl-C or SIGTERM into an abort of the running experiment.
async fn forward_interrupts(abort: AbortHandle) {
    match wait_for_interrupt().await {
        Ok(()) => {
            if abort.trigger(AbortReason::Interrupt) {
                warn!("interrupt received; aborting experiment and reverting targets");
            }
        }
        Err(err) => warn!(error = %err, "unable to listen for interrupts"),
    }
}

#[cfg(unix)]
async fn wait_for_interrupt() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_interrupt() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
