//! ---
//! chaos_section: "02-chaos-lifecycle"
//! chaos_subsection: "module"
//! chaos_type: "source"
//! chaos_scope: "code"
//! chaos_description: "Abort signal plumbing and the abort/revert watcher."
//! chaos_version: "v0.1.0"
//! chaos_owner: "tbd"
//! ---
//! Abort plumbing. An [`AbortHandle`] raises the abort at most once; every
//! [`AbortSignal`] cloned from it observes the same reason. The
//! [`AbortWatcher`] runs beside the sequencer and, once the abort fires, reverts
//! every target still marked targeted or injected, then returns a typed
//! [`AbortReport`] instead of terminating the process.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use r_chaos_logging::{chaos_error, chaos_info, chaos_warn, LogContext};
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::error::{ErrorCode, TargetFailure};
use crate::metrics::ChaosMetrics;
use crate::model::{ChaosPhase, PhaseTracker, TargetId, TargetState, Verdict};
use crate::platform::TargetActions;
use crate::sequencer::SequencerState;
use crate::sink::VerdictLatch;
use crate::verdict::FailStep;

/// Why a run was aborted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbortReason {
    /// External interrupt (signal, operator request).
    Interrupt,
    /// A probe with stop-on-failure failed.
    ProbeFailure {
        /// Probe that failed.
        probe: String,
    },
}

impl AbortReason {
    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            AbortReason::Interrupt => "interrupt",
            AbortReason::ProbeFailure { .. } => "probe_failure",
        }
    }

    /// Verdict the abort path records. Interrupts stop the run; probe failures fail it.
    pub fn verdict(&self) -> Verdict {
        match self {
            AbortReason::Interrupt => Verdict::Stopped,
            AbortReason::ProbeFailure { .. } => Verdict::Failed,
        }
    }

    /// Error code carried by the fail step.
    pub fn code(&self) -> ErrorCode {
        match self {
            AbortReason::Interrupt => ErrorCode::ExperimentAborted,
            AbortReason::ProbeFailure { .. } => ErrorCode::Probe,
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Interrupt => f.write_str("external interrupt received"),
            AbortReason::ProbeFailure { probe } => {
                write!(f, "probe '{}' failed with stop-on-failure set", probe)
            }
        }
    }
}

/// Raises the abort. Cloneable; only the first trigger wins.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<Option<AbortReason>>>,
}

impl Default for AbortHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Raise the abort. Returns `false` when it had already been raised.
    pub fn trigger(&self, reason: AbortReason) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        })
    }

    /// New observer of this handle.
    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            rx: self.tx.subscribe(),
        }
    }

    pub fn is_raised(&self) -> bool {
        self.tx.borrow().is_some()
    }
}

/// Observes an [`AbortHandle`].
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<Option<AbortReason>>,
}

impl AbortSignal {
    pub fn is_raised(&self) -> bool {
        self.rx.borrow().is_some()
    }

    pub fn reason(&self) -> Option<AbortReason> {
        self.rx.borrow().clone()
    }

    /// Resolve with the reason once the abort is raised. Never resolves if the
    /// handle is dropped without raising.
    pub async fn raised(&self) -> AbortReason {
        let mut rx = self.rx.clone();
        let reason = match rx.wait_for(Option::is_some).await {
            Ok(guard) => guard.clone(),
            Err(_) => None,
        };
        match reason {
            Some(reason) => reason,
            None => futures::future::pending().await,
        }
    }
}

/// Outcome of the abort path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AbortReport {
    /// What triggered the abort.
    pub reason: AbortReason,
    /// Phase the run was in when the abort fired.
    pub phase: ChaosPhase,
    /// Targets reverted by the watcher.
    pub reverted: Vec<TargetId>,
    /// Targets whose revert failed; each one was logged.
    pub failures: Vec<TargetFailure>,
}

/// Everything the watcher needs, handed over at construction.
#[derive(Debug, Clone)]
pub struct WatcherContext {
    pub signal: AbortSignal,
    pub actions: TargetActions,
    pub phase: PhaseTracker,
    pub sequencer: watch::Receiver<SequencerState>,
    pub latch: VerdictLatch,
    pub grace: Duration,
    pub experiment: String,
    pub metrics: Option<ChaosMetrics>,
}

/// Background observer guaranteeing cleanup when the abort fires.
pub struct AbortWatcher;

impl AbortWatcher {
    /// Start the watcher for the lifetime of one run.
    pub fn spawn(ctx: WatcherContext) -> WatcherHandle {
        let (disarm_tx, disarm_rx) = oneshot::channel();
        let task = tokio::spawn(watch_for_abort(ctx, disarm_rx));
        WatcherHandle {
            disarm: Some(disarm_tx),
            task,
        }
    }
}

async fn watch_for_abort(
    ctx: WatcherContext,
    disarm: oneshot::Receiver<()>,
) -> Option<AbortReport> {
    let reason = tokio::select! {
        biased;
        reason = ctx.signal.raised() => reason,
        _ = disarm => return None,
    };
    let phase = ctx.phase.current();
    let log_ctx = LogContext::new()
        .with_experiment(&ctx.experiment)
        .with_phase(phase.as_str());
    chaos_warn!(context = log_ctx.clone(), "abort raised: {}", reason);
    if let Some(metrics) = &ctx.metrics {
        metrics.record_abort(&reason);
    }

    // The sequencer stops at its next check point; give it a bounded window so
    // the two writers do not act on the same target at once.
    let mut sequencer = ctx.sequencer.clone();
    let stopped = timeout(ctx.grace, sequencer.wait_for(SequencerState::is_terminal))
        .await
        .is_ok();
    if !stopped {
        chaos_warn!(
            context = log_ctx.clone(),
            "sequencer still running after {:?}, reverting anyway",
            ctx.grace
        );
    }

    let mut reverted = Vec::new();
    let mut failures = revert_pending(&ctx, &log_ctx, &mut reverted).await;
    if !stopped {
        // An inject still in flight lands after the first pass; sweep again
        // once the sequencer can no longer touch targets.
        let _ = sequencer.wait_for(SequencerState::is_terminal).await;
        failures = revert_pending(&ctx, &log_ctx, &mut reverted).await;
    }

    let ledger = ctx.actions.ledger();
    reverted.retain(|target| ledger.state(target) == Some(TargetState::Reverted));
    failures.retain(|failure| ledger.state(&failure.target) != Some(TargetState::Reverted));

    let step = FailStep {
        phase,
        code: reason.code(),
        reason: reason.to_string(),
        target: None,
    };
    ctx.latch.finalize(reason.verdict(), Some(step));
    chaos_info!(
        context = log_ctx,
        "abort cleanup finished: {} reverted, {} failed",
        reverted.len(),
        failures.len()
    );

    Some(AbortReport {
        reason,
        phase,
        reverted,
        failures,
    })
}

/// Revert every target the ledger still marks targeted or injected. Targets that
/// revert are appended to `reverted`; failures are logged and returned.
async fn revert_pending(
    ctx: &WatcherContext,
    log_ctx: &LogContext<'_>,
    reverted: &mut Vec<TargetId>,
) -> Vec<TargetFailure> {
    let mut failures = Vec::new();
    for target in ctx.actions.ledger().pending_revert() {
        match ctx.actions.revert_and_verify(&target).await {
            Ok(()) => {
                if !reverted.contains(&target) {
                    reverted.push(target);
                }
            }
            Err(failure) => {
                let name = failure.target.to_string();
                chaos_error!(
                    context = log_ctx.clone().with_target(&name),
                    "abort revert failed: {}",
                    failure.reason
                );
                failures.push(failure);
            }
        }
    }
    failures
}

/// Handle to a running watcher.
#[derive(Debug)]
pub struct WatcherHandle {
    disarm: Option<oneshot::Sender<()>>,
    task: JoinHandle<Option<AbortReport>>,
}

impl WatcherHandle {
    /// Stop watching after a normal finish. If the abort already fired the
    /// cleanup is awaited and its report returned.
    pub async fn disarm_and_join(mut self) -> Option<AbortReport> {
        if let Some(tx) = self.disarm.take() {
            let _ = tx.send(());
        }
        self.task.await.unwrap_or_else(|err| {
            tracing::error!(target: "r_chaos::abort", error = %err, "abort watcher join error");
            None
        })
    }

    /// Wait for the abort cleanup to finish without disarming.
    pub async fn join(self) -> Option<AbortReport> {
        let WatcherHandle { disarm, task } = self;
        let _keep_armed = disarm;
        task.await.unwrap_or_else(|err| {
            tracing::error!(target: "r_chaos::abort", error = %err, "abort watcher join error");
            None
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_first_trigger_wins() {
        let handle = AbortHandle::new();
        let signal = handle.signal();
        assert!(!signal.is_raised());
        assert!(handle.trigger(AbortReason::ProbeFailure {
            probe: "frontend".into()
        }));
        assert!(!handle.trigger(AbortReason::Interrupt));
        assert_eq!(
            signal.reason(),
            Some(AbortReason::ProbeFailure {
                probe: "frontend".into()
            })
        );
    }

    #[tokio::test]
    async fn raised_resolves_for_late_subscribers() {
        let handle = AbortHandle::new();
        handle.trigger(AbortReason::Interrupt);
        let signal = handle.signal();
        assert_eq!(signal.raised().await, AbortReason::Interrupt);
    }

    #[test]
    fn reasons_map_to_verdicts() {
        assert_eq!(AbortReason::Interrupt.verdict(), Verdict::Stopped);
        assert_eq!(
            AbortReason::ProbeFailure { probe: "p".into() }.verdict(),
            Verdict::Failed
        );
    }
}
