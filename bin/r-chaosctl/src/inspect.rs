//! ---
//! chaos_section: "04-cli"
//! chaos_subsection: "binary"
//! chaos_type: "source"
//! chaos_scope: "code"
//! chaos_description: "Read-only subcommands: validate and select."
//! chaos_version: "v0.1.0"
//! chaos_owner: "tbd"
//! ---
use anyhow::{Context, Result};
use clap::Args;
use r_chaos_common::config::LoadedAppConfig;
use r_chaos_core::{ChaosSpec, ProbeDescriptor, TargetSelector};
use r_chaos_logging::{log_system_event, LogContext, SystemEventOutcome};
use serde_json::json;

use crate::resolve_candidates;

#[derive(Debug, Args)]
pub struct SelectArgs {
    /// Candidate target, repeatable. Replaces `experiment.candidates` when given.
    #[arg(long = "target", value_name = "ID")]
    targets: Vec<String>,

    /// Override the experiment seed.
    #[arg(long)]
    seed: Option<u64>,
}

/// Resolve the configuration into a spec and typed probes, then print them.
pub fn validate(loaded: &LoadedAppConfig) -> Result<()> {
    r_chaos_logging::init();
    let config = &loaded.config;
    let spec = ChaosSpec::from_config(&config.experiment).context("invalid experiment section")?;
    let probes = config
        .probes
        .iter()
        .map(|probe| {
            ProbeDescriptor::try_from(probe)
                .with_context(|| format!("invalid probe '{}'", probe.name))
        })
        .collect::<Result<Vec<_>>>()?;

    let summary = json!({
        "source": loaded.source.display().to_string(),
        "spec": spec,
        "candidates": config.experiment.candidates.len(),
        "probes": probes
            .iter()
            .map(|probe| json!({
                "name": probe.name,
                "kind": probe.kind.label(),
                "mode": probe.mode,
                "attempts": probe.run.attempts,
            }))
            .collect::<Vec<_>>(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    let ctx = LogContext::new().with_experiment(&spec.experiment);
    log_system_event(
        Some(&ctx),
        "chaosctl.validate",
        "configuration is valid",
        SystemEventOutcome::Success,
    );
    Ok(())
}

/// Run target selection only and print the chosen targets in execution order.
pub fn select(args: SelectArgs, loaded: &LoadedAppConfig) -> Result<()> {
    r_chaos_logging::init();
    let mut experiment = loaded.config.experiment.clone();
    if let Some(seed) = args.seed {
        experiment.seed = Some(seed);
    }
    let spec = ChaosSpec::from_config(&experiment).context("invalid experiment section")?;
    let candidates = resolve_candidates(&args.targets, &experiment.candidates)?;

    let mut selector = match spec.seed {
        Some(seed) => TargetSelector::new().with_seed(seed),
        None => TargetSelector::new(),
    };
    let targets = selector.select(
        &candidates,
        spec.affected_percentage,
        spec.randomize_order,
    )?;

    let summary = json!({
        "experiment": spec.experiment,
        "affected_percentage": spec.affected_percentage,
        "mode": spec.mode,
        "targets": targets.iter().map(ToString::to_string).collect::<Vec<_>>(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
