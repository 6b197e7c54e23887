//! ---
//! chaos_section: "02-chaos-lifecycle"
//! chaos_subsection: "module"
//! chaos_type: "source"
//! chaos_scope: "code"
//! chaos_description: "Prometheus metrics for the chaos lifecycle."
//! chaos_version: "v0.1.0"
//! chaos_owner: "tbd"
//! ---
use std::time::Duration;

use anyhow::Result;
use prometheus::{self, HistogramOpts, HistogramVec, IntCounterVec, Opts};
use r_chaos_metrics::SharedRegistry;

use crate::abort::AbortReason;
use crate::model::Verdict;

/// Metrics published by the chaos coordinator.
#[derive(Clone)]
pub struct ChaosMetrics {
    registry: SharedRegistry,
    injections_total: IntCounterVec,
    reverts_total: IntCounterVec,
    probe_evaluations_total: IntCounterVec,
    verdicts_total: IntCounterVec,
    aborts_total: IntCounterVec,
    chaos_window_seconds: HistogramVec,
}

impl ChaosMetrics {
    /// Register the chaos metric family against the provided registry.
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let injections_total = IntCounterVec::new(
            Opts::new(
                "r_chaos_injections_total",
                "Inject actions issued against targets",
            ),
            &["kind", "outcome"],
        )?;
        registry.register(Box::new(injections_total.clone()))?;

        let reverts_total = IntCounterVec::new(
            Opts::new(
                "r_chaos_reverts_total",
                "Revert actions issued against targets",
            ),
            &["kind", "outcome"],
        )?;
        registry.register(Box::new(reverts_total.clone()))?;

        let probe_evaluations_total = IntCounterVec::new(
            Opts::new(
                "r_chaos_probe_evaluations_total",
                "Probe evaluations by probe and outcome",
            ),
            &["probe", "outcome"],
        )?;
        registry.register(Box::new(probe_evaluations_total.clone()))?;

        let verdicts_total = IntCounterVec::new(
            Opts::new("r_chaos_verdicts_total", "Finalised run verdicts"),
            &["experiment", "verdict"],
        )?;
        registry.register(Box::new(verdicts_total.clone()))?;

        let aborts_total = IntCounterVec::new(
            Opts::new("r_chaos_aborts_total", "Runs stopped by the abort path"),
            &["reason"],
        )?;
        registry.register(Box::new(aborts_total.clone()))?;

        let histogram_opts = HistogramOpts::new(
            "r_chaos_window_seconds",
            "Time spent inside the chaos window per run",
        )
        .buckets(prometheus::exponential_buckets(0.01, 2.0, 16)?);
        let chaos_window_seconds = HistogramVec::new(histogram_opts, &["experiment"])?;
        registry.register(Box::new(chaos_window_seconds.clone()))?;

        Ok(Self {
            registry,
            injections_total,
            reverts_total,
            probe_evaluations_total,
            verdicts_total,
            aborts_total,
            chaos_window_seconds,
        })
    }

    /// Expose the underlying shared registry for convenience.
    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn record_injection(&self, kind: &str, success: bool) {
        self.injections_total
            .with_label_values(&[kind, outcome(success)])
            .inc();
    }

    pub fn record_revert(&self, kind: &str, success: bool) {
        self.reverts_total
            .with_label_values(&[kind, outcome(success)])
            .inc();
    }

    pub fn record_probe(&self, probe: &str, success: bool) {
        self.probe_evaluations_total
            .with_label_values(&[probe, outcome(success)])
            .inc();
    }

    pub fn record_verdict(&self, experiment: &str, verdict: Verdict) {
        self.verdicts_total
            .with_label_values(&[experiment, verdict.as_str()])
            .inc();
    }

    pub fn record_abort(&self, reason: &AbortReason) {
        self.aborts_total.with_label_values(&[reason.label()]).inc();
    }

    pub fn observe_chaos_window(&self, experiment: &str, elapsed: Duration) {
        self.chaos_window_seconds
            .with_label_values(&[experiment])
            .observe(elapsed.as_secs_f64());
    }
}

fn outcome(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "failure"
    }
}

impl std::fmt::Debug for ChaosMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChaosMetrics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_labelled() {
        let registry = r_chaos_metrics::new_registry();
        let metrics = ChaosMetrics::new(registry.clone()).unwrap();
        metrics.record_injection("pod", true);
        metrics.record_injection("pod", false);
        metrics.record_abort(&AbortReason::Interrupt);
        metrics.record_verdict("pod-delete", Verdict::Stopped);

        let families = registry.gather();
        let injections = families
            .iter()
            .find(|family| family.get_name() == "r_chaos_injections_total")
            .unwrap();
        assert_eq!(injections.get_metric().len(), 2);
        let aborts = families
            .iter()
            .find(|family| family.get_name() == "r_chaos_aborts_total")
            .unwrap();
        assert_eq!(aborts.get_metric()[0].get_counter().get_value() as u64, 1);
    }
}
