//! ---
//! chaos_section: "02-chaos-lifecycle"
//! chaos_subsection: "module"
//! chaos_type: "source"
//! chaos_scope: "code"
//! chaos_description: "Result sinks and the single-shot verdict latch."
//! chaos_version: "v0.1.0"
//! chaos_owner: "tbd"
//! ---
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use r_chaos_logging::{chaos_info, log_system_event, LogContext, SystemEventOutcome};

use crate::error::ErrorCode;
use crate::model::{TargetId, TargetState, Verdict};
use crate::verdict::FailStep;

/// Receives target transitions and the final verdict of a run.
pub trait ResultSink: Send + Sync {
    /// A target moved to a new lifecycle state.
    fn record_target_state(&self, target: &TargetId, state: TargetState, kind: &str);

    /// The run reached its terminal verdict.
    fn record_verdict(&self, verdict: Verdict, fail_step: Option<&FailStep>, code: Option<ErrorCode>);
}

/// Sink that only emits structured tracing events.
#[derive(Debug, Default, Clone)]
pub struct TracingSink {
    experiment: String,
}

impl TracingSink {
    pub fn new(experiment: impl Into<String>) -> Self {
        Self {
            experiment: experiment.into(),
        }
    }
}

impl ResultSink for TracingSink {
    fn record_target_state(&self, target: &TargetId, state: TargetState, kind: &str) {
        let target = target.to_string();
        let ctx = LogContext::new()
            .with_experiment(&self.experiment)
            .with_target(&target);
        chaos_info!(context = ctx, "{} target is {}", kind, state);
    }

    fn record_verdict(&self, verdict: Verdict, fail_step: Option<&FailStep>, code: Option<ErrorCode>) {
        let phase = fail_step.map(|step| step.phase.as_str()).unwrap_or("");
        let ctx = LogContext::new()
            .with_experiment(&self.experiment)
            .with_phase(phase);
        let outcome = if verdict.is_pass() {
            SystemEventOutcome::Success
        } else {
            SystemEventOutcome::Fault
        };
        let message = match (fail_step, code) {
            (Some(step), Some(code)) => format!("verdict {} [{}]: {}", verdict, code, step.reason),
            _ => format!("verdict {}", verdict),
        };
        log_system_event(Some(&ctx), "chaos.verdict", &message, outcome);
    }
}

/// Event captured by [`MemorySink`].
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    TargetState {
        target: TargetId,
        state: TargetState,
        kind: String,
    },
    Verdict {
        verdict: Verdict,
        fail_step: Option<FailStep>,
        code: Option<ErrorCode>,
    },
}

/// In-memory sink for tests and embedding callers.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<SinkEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().clone()
    }

    /// States recorded for one target, in order.
    pub fn states_of(&self, target: &TargetId) -> Vec<TargetState> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                SinkEvent::TargetState {
                    target: recorded,
                    state,
                    ..
                } if recorded == target => Some(*state),
                _ => None,
            })
            .collect()
    }

    pub fn verdicts(&self) -> Vec<Verdict> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                SinkEvent::Verdict { verdict, .. } => Some(*verdict),
                _ => None,
            })
            .collect()
    }
}

impl ResultSink for MemorySink {
    fn record_target_state(&self, target: &TargetId, state: TargetState, kind: &str) {
        self.events.lock().push(SinkEvent::TargetState {
            target: target.clone(),
            state,
            kind: kind.to_string(),
        });
    }

    fn record_verdict(&self, verdict: Verdict, fail_step: Option<&FailStep>, code: Option<ErrorCode>) {
        self.events.lock().push(SinkEvent::Verdict {
            verdict,
            fail_step: fail_step.cloned(),
            code,
        });
    }
}

/// Records the verdict exactly once, whichever of the runner or the abort
/// watcher gets there first.
#[derive(Clone)]
pub struct VerdictLatch {
    cell: Arc<OnceCell<(Verdict, Option<FailStep>)>>,
    sink: Arc<dyn ResultSink>,
}

impl VerdictLatch {
    pub fn new(sink: Arc<dyn ResultSink>) -> Self {
        Self {
            cell: Arc::new(OnceCell::new()),
            sink,
        }
    }

    /// Returns `true` when this call set the verdict.
    pub fn finalize(&self, verdict: Verdict, fail_step: Option<FailStep>) -> bool {
        let mut won = false;
        let stored = self.cell.get_or_init(|| {
            won = true;
            (verdict, fail_step)
        });
        if won {
            let (verdict, fail_step) = stored;
            self.sink
                .record_verdict(*verdict, fail_step.as_ref(), fail_step.as_ref().map(|s| s.code));
        }
        won
    }

    pub fn get(&self) -> Option<(Verdict, Option<FailStep>)> {
        self.cell.get().cloned()
    }
}

impl std::fmt::Debug for VerdictLatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerdictLatch")
            .field("verdict", &self.cell.get().map(|(verdict, _)| *verdict))
            .finish_non_exhaustive()
    }
}
