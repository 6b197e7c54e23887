//! ---
//! chaos_section: "02-chaos-lifecycle"
//! chaos_subsection: "module"
//! chaos_type: "source"
//! chaos_scope: "code"
//! chaos_description: "Chaos lifecycle coordinator: sequencing, abort/revert, probes and verdicts."
//! chaos_version: "v0.1.0"
//! chaos_owner: "tbd"
//! ---
//! Drives timed, interruptible fault injection across a target set while health
//! probes run around it, and guarantees every injected target is reverted however
//! the run ends.
#![warn(missing_docs)]

pub mod abort;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod model;
pub mod platform;
pub mod probe;
pub mod runner;
pub mod selector;
pub mod sequencer;
pub mod sink;
pub mod spec;
pub mod verdict;

pub use abort::{AbortHandle, AbortReason, AbortReport, AbortSignal, AbortWatcher, WatcherHandle};
pub use error::{ChaosError, ErrorCode, PlatformError, TargetFailure, TransportError};
pub use ledger::TargetLedger;
pub use metrics::ChaosMetrics;
pub use model::{ChaosPhase, PhaseTracker, ResourceState, TargetId, TargetState, Verdict};
pub use platform::{CommandPlatform, Platform, TargetActions};
pub use probe::{
    Comparator, PhaseStatus, ProbeContext, ProbeDescriptor, ProbeEngine, ProbeKind, ProbeMode,
    ProbeSummary, ProbeTransport, RoutingTransport, RunProperties,
};
pub use runner::{ChaosRunner, RunReport};
pub use selector::{TargetSelector, TargetSet};
pub use sequencer::{Sequencer, SequencerReport, SequencerState};
pub use sink::{MemorySink, ResultSink, TracingSink, VerdictLatch};
pub use spec::{ChaosSpec, ExecutionMode, IntervalPolicy};
pub use verdict::{ChaosResult, FailStep, RunEvidence, TargetRecord, VerdictAggregator};

/// Crate prelude collecting the types an orchestrating caller usually needs.
pub mod prelude {
    pub use super::abort::{AbortHandle, AbortReason};
    pub use super::model::{ChaosPhase, TargetId, Verdict};
    pub use super::platform::Platform;
    pub use super::probe::{ProbeDescriptor, ProbeMode, RunProperties};
    pub use super::runner::{ChaosRunner, RunReport};
    pub use super::spec::{ChaosSpec, ExecutionMode};
}
