//! ---
//! chaos_section: "02-chaos-lifecycle"
//! chaos_subsection: "module"
//! chaos_type: "source"
//! chaos_scope: "code"
//! chaos_description: "Injection sequencer: timed serial/parallel fault loop."
//! chaos_version: "v0.1.0"
//! chaos_owner: "tbd"
//! ---
//! The injection sequencer owns the chaos timer. It walks the target set in
//! serial or parallel mode until the duration has elapsed, checking the bound
//! only between whole iterations, and stops at its next wait once the abort
//! signal is raised. Cleanup after an abort belongs to the watcher; cleanup
//! after a failed injection belongs to the sequencer.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use r_chaos_logging::{chaos_error, chaos_info, chaos_warn, LogContext};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};

use crate::abort::AbortSignal;
use crate::error::{ChaosError, TargetFailure};
use crate::metrics::ChaosMetrics;
use crate::model::{ChaosPhase, TargetId};
use crate::platform::TargetActions;
use crate::probe::ProbeEngine;
use crate::selector::TargetSet;
use crate::spec::{ChaosSpec, ExecutionMode};

/// Lifecycle of one sequencer run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SequencerState {
    /// Not started.
    Idle,
    /// Inside the chaos loop.
    Running,
    /// Duration elapsed, every target reverted.
    Completed,
    /// Stopped by the abort signal.
    Aborted,
    /// Stopped by an unrecoverable error.
    Failed,
}

impl SequencerState {
    /// Whether the sequencer has stopped touching targets.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SequencerState::Completed | SequencerState::Aborted | SequencerState::Failed
        )
    }
}

/// Summary of a completed sequencer run.
#[derive(Debug, Clone, Serialize)]
pub struct SequencerReport {
    /// Whole passes over the target set.
    pub iterations: u32,
    /// Successful inject actions.
    pub injections: u32,
    /// Wall-clock time spent in the loop.
    pub elapsed: Duration,
    /// Revert failures that did not stop the run (parallel mode, partial).
    pub revert_failures: Vec<TargetFailure>,
}

/// Drives inject → settle → interval → revert → settle across the target set.
pub struct Sequencer {
    spec: Arc<ChaosSpec>,
    actions: TargetActions,
    abort: AbortSignal,
    probes: Option<ProbeEngine>,
    metrics: Option<ChaosMetrics>,
    state: watch::Sender<SequencerState>,
    rng: Mutex<StdRng>,
}

impl Sequencer {
    pub fn new(spec: Arc<ChaosSpec>, actions: TargetActions, abort: AbortSignal) -> Self {
        let rng = match spec.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(1)),
            None => StdRng::from_entropy(),
        };
        let (state, _) = watch::channel(SequencerState::Idle);
        Self {
            spec,
            actions,
            abort,
            probes: None,
            metrics: None,
            state,
            rng: Mutex::new(rng),
        }
    }

    /// Probe engine whose during-chaos probes start after the first settle.
    pub fn with_probes(mut self, probes: ProbeEngine) -> Self {
        self.probes = Some(probes);
        self
    }

    pub fn with_metrics(mut self, metrics: Option<ChaosMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn state(&self) -> SequencerState {
        *self.state.borrow()
    }

    /// Receiver used by the abort watcher to wait for the sequencer to stop.
    pub fn subscribe(&self) -> watch::Receiver<SequencerState> {
        self.state.subscribe()
    }

    /// Mark a sequencer that will never run as aborted.
    pub fn cancel_pending(&self) {
        self.state.send_if_modified(|state| {
            if *state == SequencerState::Idle {
                *state = SequencerState::Aborted;
                true
            } else {
                false
            }
        });
    }

    /// Run the chaos loop. Blocks until the duration elapses, an unrecoverable
    /// error occurs, or the abort signal is observed.
    pub async fn run(&self, targets: &TargetSet) -> Result<SequencerReport, ChaosError> {
        if let Some(reason) = self.abort.reason() {
            self.cancel_pending();
            return Err(ChaosError::ExperimentAborted { reason });
        }
        if self.state() != SequencerState::Idle {
            return Err(ChaosError::Config("sequencer can only run once".into()));
        }
        self.state.send_replace(SequencerState::Running);

        let started = Instant::now();
        let outcome = self.run_loop(targets, started).await;
        let elapsed = started.elapsed();
        if let Some(metrics) = &self.metrics {
            metrics.observe_chaos_window(&self.spec.experiment, elapsed);
        }

        let ctx = LogContext::new()
            .with_experiment(&self.spec.experiment)
            .with_phase(ChaosPhase::ChaosInject.as_str());
        let next = match &outcome {
            Ok(report) => {
                chaos_info!(
                    context = ctx,
                    "chaos loop completed: {} iteration(s), {} injection(s) in {:?}",
                    report.iterations,
                    report.injections,
                    elapsed
                );
                SequencerState::Completed
            }
            Err(err) if err.is_abort() => {
                chaos_warn!(context = ctx, "chaos loop stopped: {}", err);
                SequencerState::Aborted
            }
            Err(err) => {
                chaos_error!(context = ctx, "chaos loop failed: {}", err);
                SequencerState::Failed
            }
        };
        self.state.send_replace(next);
        outcome
    }

    async fn run_loop(
        &self,
        targets: &TargetSet,
        started: Instant,
    ) -> Result<SequencerReport, ChaosError> {
        let mut report = SequencerReport {
            iterations: 0,
            injections: 0,
            elapsed: Duration::ZERO,
            revert_failures: Vec::new(),
        };
        let mut probes_started = false;

        while started.elapsed() < self.spec.duration {
            self.check_abort()?;
            match self.spec.mode {
                ExecutionMode::Serial => {
                    self.serial_pass(targets, &mut report, &mut probes_started)
                        .await?
                }
                ExecutionMode::Parallel => {
                    self.parallel_pass(targets, &mut report, &mut probes_started)
                        .await?
                }
            }
            report.iterations += 1;
        }
        report.elapsed = started.elapsed();
        Ok(report)
    }

    async fn serial_pass(
        &self,
        targets: &TargetSet,
        report: &mut SequencerReport,
        probes_started: &mut bool,
    ) -> Result<(), ChaosError> {
        for target in targets {
            self.check_abort()?;
            if let Err(failure) = self.actions.inject(target).await {
                self.cleanup().await;
                return Err(ChaosError::ChaosInject(vec![failure]));
            }
            report.injections += 1;
            if let Err(err) = self.actions.await_injected(target).await {
                self.cleanup().await;
                return Err(err);
            }
            self.start_probes_once(probes_started).await;
            self.wait_interval().await?;

            let reverted = self
                .actions
                .revert(target)
                .await
                .map_err(|failure| ChaosError::ChaosRevert(vec![failure]))?;
            if reverted {
                self.actions
                    .await_reverted(target)
                    .await
                    .map_err(|failure| ChaosError::ChaosRevert(vec![failure]))?;
            }
        }
        Ok(())
    }

    async fn parallel_pass(
        &self,
        targets: &TargetSet,
        report: &mut SequencerReport,
        probes_started: &mut bool,
    ) -> Result<(), ChaosError> {
        self.check_abort()?;
        let injected = join_all(targets.iter().map(|target| self.actions.inject(target))).await;
        let failures: Vec<TargetFailure> = injected.into_iter().filter_map(Result::err).collect();
        report.injections += (targets.len() - failures.len()) as u32;
        if !failures.is_empty() {
            self.cleanup().await;
            return Err(ChaosError::ChaosInject(failures));
        }

        let settled =
            join_all(targets.iter().map(|target| self.actions.await_injected(target))).await;
        if let Some(err) = settled.into_iter().find_map(Result::err) {
            self.cleanup().await;
            return Err(err);
        }
        self.start_probes_once(probes_started).await;
        self.wait_interval().await?;

        let reverts = join_all(targets.iter().map(|target| async move {
            match self.actions.revert(target).await {
                Ok(true) => self.actions.await_reverted(target).await,
                Ok(false) => Ok(()),
                Err(failure) => Err(failure),
            }
        }))
        .await;
        let failures: Vec<TargetFailure> = reverts.into_iter().filter_map(Result::err).collect();
        if !failures.is_empty() {
            if failures.len() == targets.len() {
                return Err(ChaosError::ChaosRevert(failures));
            }
            chaos_warn!(
                context = LogContext::new().with_experiment(&self.spec.experiment),
                "{} of {} target(s) failed to revert",
                failures.len(),
                targets.len()
            );
            report.revert_failures.extend(failures);
        }
        Ok(())
    }

    async fn start_probes_once(&self, started: &mut bool) {
        if *started {
            return;
        }
        *started = true;
        if let Some(probes) = &self.probes {
            // During-chaos probes only spawn here; their failures surface at post-chaos.
            let _ = probes.evaluate_phase(ChaosPhase::ChaosInject).await;
        }
    }

    async fn wait_interval(&self) -> Result<(), ChaosError> {
        let wait = self.spec.interval.next(&mut self.rng.lock());
        tokio::select! {
            biased;
            reason = self.abort.raised() => Err(ChaosError::ExperimentAborted { reason }),
            _ = sleep(wait) => Ok(()),
        }
    }

    fn check_abort(&self) -> Result<(), ChaosError> {
        match self.abort.reason() {
            Some(reason) => Err(ChaosError::ExperimentAborted { reason }),
            None => Ok(()),
        }
    }

    async fn cleanup(&self) {
        if self.abort.is_raised() {
            return;
        }
        let failures = self.actions.cleanup_injected().await;
        for failure in failures {
            let name = failure.target.to_string();
            chaos_error!(
                context = LogContext::new()
                    .with_experiment(&self.spec.experiment)
                    .with_target(&name),
                "cleanup revert failed: {}",
                failure.reason
            );
        }
    }

    /// Targets the sequencer left injected, for reporting.
    pub fn still_injected(&self) -> Vec<TargetId> {
        self.actions.ledger().injected()
    }
}

impl std::fmt::Debug for Sequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequencer")
            .field("experiment", &self.spec.experiment)
            .field("mode", &self.spec.mode)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
