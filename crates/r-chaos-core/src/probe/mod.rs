//! ---
//! chaos_section: "02-chaos-lifecycle"
//! chaos_subsection: "module"
//! chaos_type: "source"
//! chaos_scope: "code"
//! chaos_description: "Probe engine: phase-driven health checks with retries."
//! chaos_version: "v0.1.0"
//! chaos_owner: "tbd"
//! ---
//! The probe engine. Probes are registered before the phase their mode first
//! touches, then driven by [`ProbeEngine::evaluate_phase`]:
//!
//! * `PreChaos` runs SOT and Edge probes in registration order, stopping at the
//!   first failure, then starts Continuous probes.
//! * `ChaosInject` starts OnChaos probes (once per run).
//! * `PostChaos` waits for the during-chaos probes, then runs EOT and Edge probes
//!   and reports the first failure seen.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use r_chaos_logging::{chaos_debug, chaos_info, chaos_warn, LogContext};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

use crate::abort::{AbortHandle, AbortReason};
use crate::error::ChaosError;
use crate::metrics::ChaosMetrics;
use crate::model::{ChaosPhase, PhaseTracker};

pub mod comparator;
pub mod descriptor;
pub mod retry;
pub mod transport;

pub use comparator::{Comparator, ComparatorKind, Criteria};
pub use descriptor::{
    CmdProbe, HttpMethod, HttpProbe, ProbeDescriptor, ProbeKind, ProbeMode, RunProperties,
    StateProbe,
};
pub use retry::{AttemptFailure, RetryExhausted, RetryPolicy};
pub use transport::{CommandTransport, HttpTransport, ProbeTransport, RoutingTransport};

/// Outcome of a probe within one phase window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PhaseStatus {
    #[serde(rename = "N/A")]
    NotApplicable,
    Awaited,
    Passed,
    Failed,
}

/// Mutable per-probe state, owned by the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeRunState {
    pub pre_chaos: PhaseStatus,
    pub during_chaos: PhaseStatus,
    pub post_chaos: PhaseStatus,
    pub last_error: Option<String>,
    pub failed_phase: Option<ChaosPhase>,
    pub completed: bool,
    pub description: String,
}

impl ProbeRunState {
    fn for_mode(mode: ProbeMode) -> Self {
        let slot = |applies: bool| {
            if applies {
                PhaseStatus::Awaited
            } else {
                PhaseStatus::NotApplicable
            }
        };
        Self {
            pre_chaos: slot(mode.runs_pre_chaos()),
            during_chaos: slot(mode.runs_during_chaos()),
            post_chaos: slot(mode.runs_post_chaos()),
            last_error: None,
            failed_phase: None,
            completed: false,
            description: "awaiting evaluation".to_string(),
        }
    }

    fn statuses(&self) -> [PhaseStatus; 3] {
        [self.pre_chaos, self.during_chaos, self.post_chaos]
    }

    /// Every applicable window passed.
    pub fn passed(&self) -> bool {
        self.statuses()
            .iter()
            .all(|status| matches!(status, PhaseStatus::NotApplicable | PhaseStatus::Passed))
    }
}

/// Reported view of one probe.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeSummary {
    pub name: String,
    pub kind: &'static str,
    pub mode: ProbeMode,
    /// Individual attempts, retries included.
    pub attempts: u64,
    /// Evaluations (each one a full retry budget).
    pub evaluations: u64,
    pub passed: bool,
    #[serde(flatten)]
    pub state: ProbeRunState,
}

#[derive(Debug)]
struct ProbeRecord {
    descriptor: ProbeDescriptor,
    attempts: AtomicU64,
    evaluations: AtomicU64,
    state: Mutex<ProbeRunState>,
}

impl ProbeRecord {
    fn new(descriptor: ProbeDescriptor) -> Self {
        Self {
            state: Mutex::new(ProbeRunState::for_mode(descriptor.mode)),
            descriptor,
            attempts: AtomicU64::new(0),
            evaluations: AtomicU64::new(0),
        }
    }

    fn record(&self, phase: ChaosPhase, status: PhaseStatus, description: String) {
        let mut state = self.state.lock();
        let slot = if self.descriptor.mode.runs_during_chaos() {
            &mut state.during_chaos
        } else {
            match phase {
                ChaosPhase::PreChaos => &mut state.pre_chaos,
                ChaosPhase::ChaosInject => &mut state.during_chaos,
                ChaosPhase::PostChaos | ChaosPhase::Completed => &mut state.post_chaos,
            }
        };
        // A failed window stays failed.
        if *slot != PhaseStatus::Failed {
            *slot = status;
        }
        if status == PhaseStatus::Failed {
            state.last_error = Some(description.clone());
            state.failed_phase.get_or_insert(phase);
        }
        state.description = description;
    }

    fn complete(&self) {
        self.state.lock().completed = true;
    }

    fn summary(&self) -> ProbeSummary {
        let state = self.state.lock().clone();
        ProbeSummary {
            name: self.descriptor.name.clone(),
            kind: self.descriptor.kind.label(),
            mode: self.descriptor.mode,
            attempts: self.attempts.load(Ordering::SeqCst),
            evaluations: self.evaluations.load(Ordering::SeqCst),
            passed: state.passed(),
            state,
        }
    }
}

/// Run-scoped collaborators of the engine.
#[derive(Debug, Clone)]
pub struct ProbeContext {
    pub experiment: String,
    pub phase: PhaseTracker,
    /// Raised by stop-on-failure probes.
    pub abort: AbortHandle,
    /// Window of OnChaos probes.
    pub chaos_duration: Duration,
}

struct EngineInner {
    ctx: ProbeContext,
    transport: Arc<dyn ProbeTransport>,
    metrics: Option<ChaosMetrics>,
    probes: RwLock<IndexMap<String, Arc<ProbeRecord>>>,
    evaluated: Mutex<Option<ChaosPhase>>,
    tasks: Mutex<Vec<JoinHandle<Result<(), ChaosError>>>>,
    on_chaos_started: AtomicBool,
}

/// Evaluates registered probes phase by phase.
#[derive(Clone)]
pub struct ProbeEngine {
    inner: Arc<EngineInner>,
}

impl ProbeEngine {
    pub fn new(
        ctx: ProbeContext,
        transport: Arc<dyn ProbeTransport>,
        metrics: Option<ChaosMetrics>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                ctx,
                transport,
                metrics,
                probes: RwLock::new(IndexMap::new()),
                evaluated: Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
                on_chaos_started: AtomicBool::new(false),
            }),
        }
    }

    /// Add a probe. Fails once the phase its mode first touches has been evaluated.
    pub fn register_probe(&self, descriptor: ProbeDescriptor) -> Result<(), ChaosError> {
        let first = descriptor.mode.first_phase();
        if let Some(evaluated) = *self.inner.evaluated.lock() {
            if evaluated >= first {
                return Err(ChaosError::Config(format!(
                    "probe '{}' ({}) registered after {} began",
                    descriptor.name, descriptor.mode, first
                )));
            }
        }
        let mut probes = self.inner.probes.write();
        if probes.contains_key(&descriptor.name) {
            return Err(ChaosError::Config(format!(
                "probe '{}' is already registered",
                descriptor.name
            )));
        }
        probes.insert(
            descriptor.name.clone(),
            Arc::new(ProbeRecord::new(descriptor)),
        );
        Ok(())
    }

    /// Trigger every probe that applies to `phase`.
    pub async fn evaluate_phase(&self, phase: ChaosPhase) -> Result<(), ChaosError> {
        {
            let mut evaluated = self.inner.evaluated.lock();
            *evaluated = Some(evaluated.map_or(phase, |previous| previous.max(phase)));
        }
        match phase {
            ChaosPhase::PreChaos => {
                for record in self.records(|mode| mode.runs_pre_chaos()) {
                    let outcome = self.evaluate(&record, ChaosPhase::PreChaos).await;
                    if record.descriptor.mode == ProbeMode::Sot {
                        record.complete();
                    }
                    outcome?;
                }
                self.spawn_during(ProbeMode::Continuous);
                Ok(())
            }
            ChaosPhase::ChaosInject => {
                if !self.inner.on_chaos_started.swap(true, Ordering::SeqCst) {
                    self.spawn_during(ProbeMode::OnChaos);
                }
                Ok(())
            }
            ChaosPhase::PostChaos => {
                let mut first_error = self.join_during().await;
                for record in self.records(|mode| mode.runs_post_chaos()) {
                    if record.state.lock().pre_chaos == PhaseStatus::Failed {
                        continue;
                    }
                    if let Err(err) = self.evaluate(&record, ChaosPhase::PostChaos).await {
                        first_error.get_or_insert(err);
                    }
                    record.complete();
                }
                match first_error {
                    Some(err) => Err(err),
                    None => Ok(()),
                }
            }
            ChaosPhase::Completed => Ok(()),
        }
    }

    /// Stop during-chaos probes that are still running.
    pub fn shutdown(&self) {
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
    }

    pub fn summaries(&self) -> Vec<ProbeSummary> {
        self.inner
            .probes
            .read()
            .values()
            .map(|record| record.summary())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.probes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn records(&self, filter: impl Fn(ProbeMode) -> bool) -> Vec<Arc<ProbeRecord>> {
        self.inner
            .probes
            .read()
            .values()
            .filter(|record| filter(record.descriptor.mode))
            .cloned()
            .collect()
    }

    async fn evaluate(&self, record: &ProbeRecord, phase: ChaosPhase) -> Result<(), ChaosError> {
        let descriptor = &record.descriptor;
        let comparator = descriptor.comparator();
        let transport = &self.inner.transport;
        let ctx = LogContext::new()
            .with_experiment(&self.inner.ctx.experiment)
            .with_phase(phase.as_str())
            .with_probe(&descriptor.name);

        record.evaluations.fetch_add(1, Ordering::SeqCst);
        let outcome = descriptor
            .run
            .retry_policy()
            .execute(|_attempt| {
                record.attempts.fetch_add(1, Ordering::SeqCst);
                let comparator = &comparator;
                async move {
                    let observed = transport
                        .send(descriptor)
                        .await
                        .map_err(|err| err.to_string())?;
                    comparator.compare(&observed)?;
                    Ok(observed)
                }
            })
            .await;

        match outcome {
            Ok(observed) => {
                if let Some(metrics) = &self.inner.metrics {
                    metrics.record_probe(&descriptor.name, true);
                }
                chaos_debug!(context = ctx, "probe passed with outcome '{}'", observed);
                record.record(
                    phase,
                    PhaseStatus::Passed,
                    format!(
                        "{} probe passed: '{}' satisfied {}",
                        descriptor.kind.label(),
                        observed,
                        comparator
                    ),
                );
                Ok(())
            }
            Err(exhausted) => {
                if let Some(metrics) = &self.inner.metrics {
                    metrics.record_probe(&descriptor.name, false);
                }
                chaos_warn!(
                    context = ctx,
                    "probe failed after {} attempt(s): {}",
                    exhausted.attempts,
                    exhausted.last
                );
                record.record(
                    phase,
                    PhaseStatus::Failed,
                    format!(
                        "{} probe failed after {} attempt(s): {}",
                        descriptor.kind.label(),
                        exhausted.attempts,
                        exhausted.last
                    ),
                );
                Err(match exhausted.last {
                    AttemptFailure::TimedOut(_) => ChaosError::ProbeTimeout {
                        probe: descriptor.name.clone(),
                        phase,
                        attempts: exhausted.attempts,
                    },
                    AttemptFailure::Failed(reason) => ChaosError::Probe {
                        probe: descriptor.name.clone(),
                        phase,
                        reason,
                    },
                })
            }
        }
    }

    fn spawn_during(&self, mode: ProbeMode) {
        let records = self.records(|candidate| candidate == mode);
        let mut tasks = self.inner.tasks.lock();
        for record in records {
            let engine = self.clone();
            let task = match mode {
                ProbeMode::OnChaos => tokio::spawn(engine.run_on_chaos(record)),
                _ => tokio::spawn(engine.run_continuous(record)),
            };
            tasks.push(task);
        }
    }

    /// Continuous: from registration until the phase moves past `ChaosInject`.
    async fn run_continuous(self, record: Arc<ProbeRecord>) -> Result<(), ChaosError> {
        let phase = self.inner.ctx.phase.clone();
        let abort = self.inner.ctx.abort.signal();
        let run = record.descriptor.run;
        sleep(run.initial_delay).await;
        loop {
            let current = phase.current();
            if let Err(err) = self.evaluate(&record, current).await {
                self.on_during_failure(&record);
                return Err(err);
            }
            tokio::select! {
                biased;
                _ = phase.passed(ChaosPhase::ChaosInject) => break,
                _ = abort.raised() => break,
                _ = sleep(run.polling_interval) => {}
            }
        }
        record.complete();
        Ok(())
    }

    /// OnChaos: for the chaos duration from trigger, initial delay included.
    async fn run_on_chaos(self, record: Arc<ProbeRecord>) -> Result<(), ChaosError> {
        let deadline = Instant::now() + self.inner.ctx.chaos_duration;
        let abort = self.inner.ctx.abort.signal();
        let run = record.descriptor.run;
        sleep(run.initial_delay).await;
        loop {
            if let Err(err) = self.evaluate(&record, ChaosPhase::ChaosInject).await {
                self.on_during_failure(&record);
                return Err(err);
            }
            if Instant::now() + run.polling_interval >= deadline {
                break;
            }
            tokio::select! {
                biased;
                _ = abort.raised() => break,
                _ = sleep(run.polling_interval) => {}
            }
        }
        record.complete();
        Ok(())
    }

    fn on_during_failure(&self, record: &ProbeRecord) {
        record.complete();
        if !record.descriptor.run.stop_on_failure {
            return;
        }
        let name = &record.descriptor.name;
        let triggered = self.inner.ctx.abort.trigger(AbortReason::ProbeFailure {
            probe: name.clone(),
        });
        if triggered {
            chaos_info!(
                context = LogContext::new()
                    .with_experiment(&self.inner.ctx.experiment)
                    .with_probe(name),
                "stop-on-failure probe raised the abort"
            );
        }
    }

    async fn join_during(&self) -> Option<ChaosError> {
        let tasks: Vec<_> = self.inner.tasks.lock().drain(..).collect();
        let mut first_error = None;
        for task in tasks {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    first_error.get_or_insert(err);
                }
                Err(join_err) if join_err.is_cancelled() => {}
                Err(join_err) => {
                    tracing::error!(target: "r_chaos::probe", error = %join_err, "probe task panicked");
                }
            }
        }
        first_error
    }
}

impl std::fmt::Debug for ProbeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeEngine")
            .field("experiment", &self.inner.ctx.experiment)
            .field("probes", &self.len())
            .finish_non_exhaustive()
    }
}
