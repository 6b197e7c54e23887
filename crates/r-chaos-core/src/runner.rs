//! ---
//! chaos_section: "02-chaos-lifecycle"
//! chaos_subsection: "module"
//! chaos_type: "source"
//! chaos_scope: "code"
//! chaos_description: "Run orchestration across selector, probes, sequencer and watcher."
//! chaos_version: "v0.1.0"
//! chaos_owner: "tbd"
//! ---
//! One chaos run, end to end:
//!
//! select → pre-chaos probes → ramp → chaos loop → ramp → post-chaos probes →
//! verdict. The abort watcher runs beside every step after selection and owns
//! the verdict whenever the abort fires.

use std::sync::Arc;
use std::time::Duration;

use r_chaos_logging::{chaos_info, chaos_warn, log_system_event, LogContext, SystemEventOutcome};
use tokio::time::sleep;

use crate::abort::{AbortHandle, AbortSignal, AbortWatcher, WatcherContext};
use crate::error::ChaosError;
use crate::ledger::TargetLedger;
use crate::metrics::ChaosMetrics;
use crate::model::{ChaosPhase, PhaseTracker, TargetId};
use crate::platform::{Platform, TargetActions};
use crate::probe::{ProbeContext, ProbeDescriptor, ProbeEngine, ProbeTransport, RoutingTransport};
use crate::selector::TargetSelector;
use crate::sequencer::{Sequencer, SequencerReport};
use crate::sink::{ResultSink, TracingSink, VerdictLatch};
use crate::spec::ChaosSpec;
use crate::verdict::{ChaosResult, RunEvidence, VerdictAggregator};

/// Everything a caller gets back from [`ChaosRunner::run`].
#[derive(Debug)]
pub struct RunReport {
    pub result: ChaosResult,
    /// Present when the chaos loop ran to completion.
    pub sequencer: Option<SequencerReport>,
    /// First fatal error, if any. Aborts surface here as `ExperimentAborted`.
    pub error: Option<ChaosError>,
}

/// Coordinates one chaos run against a platform.
pub struct ChaosRunner {
    spec: Arc<ChaosSpec>,
    platform: Arc<dyn Platform>,
    transport: Option<Arc<dyn ProbeTransport>>,
    sink: Arc<dyn ResultSink>,
    metrics: Option<ChaosMetrics>,
    probes: Vec<ProbeDescriptor>,
    abort: AbortHandle,
    phase: PhaseTracker,
}

impl ChaosRunner {
    /// Validates the spec once; nothing downstream re-checks it.
    pub fn new(spec: ChaosSpec, platform: Arc<dyn Platform>) -> Result<Self, ChaosError> {
        spec.validate()?;
        let sink: Arc<dyn ResultSink> = Arc::new(TracingSink::new(spec.experiment.clone()));
        Ok(Self {
            spec: Arc::new(spec),
            platform,
            transport: None,
            sink,
            metrics: None,
            probes: Vec::new(),
            abort: AbortHandle::new(),
            phase: PhaseTracker::new(),
        })
    }

    /// Replace the default routing transport (HTTP, shell, platform state).
    pub fn with_transport(mut self, transport: Arc<dyn ProbeTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_metrics(mut self, metrics: Option<ChaosMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn register_probe(&mut self, descriptor: ProbeDescriptor) -> Result<(), ChaosError> {
        if self.probes.iter().any(|probe| probe.name == descriptor.name) {
            return Err(ChaosError::Config(format!(
                "probe '{}' is already registered",
                descriptor.name
            )));
        }
        self.probes.push(descriptor);
        Ok(())
    }

    pub fn spec(&self) -> &ChaosSpec {
        &self.spec
    }

    /// Handle for raising the abort from outside the run (signal handlers).
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn phase(&self) -> PhaseTracker {
        self.phase.clone()
    }

    /// Execute the run against `candidates`. Never panics on run failures; every
    /// outcome lands in the returned report.
    pub async fn run(self, candidates: &[TargetId]) -> RunReport {
        let aggregator = VerdictAggregator::new(&self.spec);
        let latch = VerdictLatch::new(self.sink.clone());
        let ledger = TargetLedger::new();
        let actions = TargetActions::new(
            &self.spec,
            self.platform.clone(),
            ledger.clone(),
            self.sink.clone(),
            self.metrics.clone(),
        );
        let log_ctx = LogContext::new().with_experiment(&self.spec.experiment);

        let mut selector = match self.spec.seed {
            Some(seed) => TargetSelector::new().with_seed(seed),
            None => TargetSelector::new(),
        };
        let targets = match selector.select(
            candidates,
            self.spec.affected_percentage,
            self.spec.randomize_order,
        ) {
            Ok(targets) => targets,
            Err(err) => return self.fail_before_start(aggregator, latch, err),
        };
        ledger.mark_not_targeted(candidates);
        actions.mark_targeted(&targets);

        let engine = match self.build_engine() {
            Ok(engine) => engine,
            Err(err) => return self.fail_before_start(aggregator, latch, err),
        };

        let sequencer = Sequencer::new(self.spec.clone(), actions.clone(), self.abort.signal())
            .with_probes(engine.clone())
            .with_metrics(self.metrics.clone());
        let watcher = AbortWatcher::spawn(WatcherContext {
            signal: self.abort.signal(),
            actions: actions.clone(),
            phase: self.phase.clone(),
            sequencer: sequencer.subscribe(),
            latch: latch.clone(),
            grace: self.spec.abort_grace,
            experiment: self.spec.experiment.clone(),
            metrics: self.metrics.clone(),
        });
        chaos_info!(
            context = log_ctx.clone(),
            "starting chaos run: {} of {} candidate(s) targeted, {:?} mode",
            targets.len(),
            candidates.len(),
            self.spec.mode
        );

        let signal = self.abort.signal();
        let mut error: Option<(ChaosPhase, ChaosError)> = None;
        let mut sequencer_report = None;

        let pre_chaos = tokio::select! {
            biased;
            reason = signal.raised() => Err(ChaosError::ExperimentAborted { reason }),
            outcome = engine.evaluate_phase(ChaosPhase::PreChaos) => outcome,
        };
        if let Err(err) = pre_chaos {
            error = Some((ChaosPhase::PreChaos, err));
        }
        if error.is_none() {
            if let Err(err) = pause(&signal, self.spec.ramp_time).await {
                error = Some((ChaosPhase::PreChaos, err));
            }
        }

        if error.is_none() {
            self.enter(ChaosPhase::ChaosInject);
            match sequencer.run(&targets).await {
                Ok(report) => sequencer_report = Some(report),
                Err(err) => error = Some((ChaosPhase::ChaosInject, err)),
            }
        } else {
            sequencer.cancel_pending();
        }

        if error.is_none() {
            if let Err(err) = pause(&signal, self.spec.ramp_time).await {
                error = Some((ChaosPhase::ChaosInject, err));
            }
        }
        self.enter(ChaosPhase::PostChaos);
        if error.is_none() && !self.abort.is_raised() {
            if let Err(err) = engine.evaluate_phase(ChaosPhase::PostChaos).await {
                error = Some((ChaosPhase::PostChaos, err));
            }
        }

        let abort = if self.abort.is_raised() {
            watcher.join().await
        } else {
            watcher.disarm_and_join().await
        };
        engine.shutdown();
        self.enter(ChaosPhase::Completed);

        if let Some((phase, err)) = &error {
            chaos_warn!(context = log_ctx, "run failed during {}: {}", phase, err);
        }

        let evidence = RunEvidence {
            error: error.clone(),
            abort,
            probes: engine.summaries(),
            targets: ledger.snapshot(),
            revert_failures: sequencer_report
                .as_ref()
                .map(|report| report.revert_failures.clone())
                .unwrap_or_default(),
        };
        let result = self.conclude(&aggregator, &latch, evidence);
        RunReport {
            result,
            sequencer: sequencer_report,
            error: error.map(|(_, err)| err),
        }
    }

    fn enter(&self, phase: ChaosPhase) {
        if self.phase.advance(phase) {
            let ctx = LogContext::new()
                .with_experiment(&self.spec.experiment)
                .with_phase(phase.as_str());
            log_system_event(
                Some(&ctx),
                "chaos.phase",
                &format!("entered {}", phase),
                SystemEventOutcome::Success,
            );
        }
    }

    fn build_engine(&self) -> Result<ProbeEngine, ChaosError> {
        let transport = match &self.transport {
            Some(transport) => transport.clone(),
            None => {
                let routing = RoutingTransport::new(Some(self.platform.clone()))
                    .map_err(|err| ChaosError::Config(err.to_string()))?;
                Arc::new(routing)
            }
        };
        let engine = ProbeEngine::new(
            ProbeContext {
                experiment: self.spec.experiment.clone(),
                phase: self.phase.clone(),
                abort: self.abort.clone(),
                chaos_duration: self.spec.duration,
            },
            transport,
            self.metrics.clone(),
        );
        for descriptor in &self.probes {
            engine.register_probe(descriptor.clone())?;
        }
        Ok(engine)
    }

    fn fail_before_start(
        &self,
        aggregator: VerdictAggregator,
        latch: VerdictLatch,
        err: ChaosError,
    ) -> RunReport {
        let evidence = RunEvidence {
            error: Some((ChaosPhase::PreChaos, err.clone())),
            ..Default::default()
        };
        let result = self.conclude(&aggregator, &latch, evidence);
        RunReport {
            result,
            sequencer: None,
            error: Some(err),
        }
    }

    /// Aggregate, then defer to whatever verdict was latched first.
    fn conclude(
        &self,
        aggregator: &VerdictAggregator,
        latch: &VerdictLatch,
        evidence: RunEvidence,
    ) -> ChaosResult {
        let mut result = aggregator.aggregate(evidence);
        latch.finalize(result.verdict, result.fail_step.clone());
        if let Some((verdict, fail_step)) = latch.get() {
            result.verdict = verdict;
            result.fail_step = fail_step;
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_verdict(&self.spec.experiment, result.verdict);
        }
        chaos_info!(
            context = LogContext::new().with_experiment(&self.spec.experiment),
            "chaos run finished with verdict {} ({}% probes passed)",
            result.verdict,
            result.probe_success_percentage
        );
        result
    }
}

/// Sleep that gives way to the abort.
async fn pause(signal: &AbortSignal, duration: Duration) -> Result<(), ChaosError> {
    if duration.is_zero() {
        return Ok(());
    }
    tokio::select! {
        biased;
        reason = signal.raised() => Err(ChaosError::ExperimentAborted { reason }),
        _ = sleep(duration) => Ok(()),
    }
}

impl std::fmt::Debug for ChaosRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChaosRunner")
            .field("spec", &self.spec)
            .field("probes", &self.probes.len())
            .finish_non_exhaustive()
    }
}
