//! ---
//! chaos_section: "02-chaos-lifecycle"
//! chaos_subsection: "module"
//! chaos_type: "source"
//! chaos_scope: "code"
//! chaos_description: "Error taxonomy for the chaos lifecycle coordinator."
//! chaos_version: "v0.1.0"
//! chaos_owner: "tbd"
//! ---
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::abort::AbortReason;
use crate::model::{ChaosPhase, TargetId};

/// Stable machine-readable code attached to every fatal error and fail step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// No eligible targets could be selected.
    #[serde(rename = "TARGET_SELECTION_ERROR")]
    TargetSelection,
    /// A platform inject action failed.
    #[serde(rename = "CHAOS_INJECT_ERROR")]
    ChaosInject,
    /// A platform revert action failed.
    #[serde(rename = "CHAOS_REVERT_ERROR")]
    ChaosRevert,
    /// A target never settled into the expected state.
    #[serde(rename = "STATUS_CHECKS_ERROR")]
    StatusCheck,
    /// A health probe failed after exhausting its retries.
    #[serde(rename = "PROBE_ERROR")]
    Probe,
    /// A health probe exceeded its allotted window.
    #[serde(rename = "PROBE_TIMEOUT")]
    ProbeTimeout,
    /// The experiment was aborted by an external interrupt.
    #[serde(rename = "EXPERIMENT_ABORTED")]
    ExperimentAborted,
    /// Configuration was rejected before the run started.
    #[serde(rename = "CONFIG_ERROR")]
    Config,
}

impl ErrorCode {
    /// Wire representation of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::TargetSelection => "TARGET_SELECTION_ERROR",
            ErrorCode::ChaosInject => "CHAOS_INJECT_ERROR",
            ErrorCode::ChaosRevert => "CHAOS_REVERT_ERROR",
            ErrorCode::StatusCheck => "STATUS_CHECKS_ERROR",
            ErrorCode::Probe => "PROBE_ERROR",
            ErrorCode::ProbeTimeout => "PROBE_TIMEOUT",
            ErrorCode::ExperimentAborted => "EXPERIMENT_ABORTED",
            ErrorCode::Config => "CONFIG_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A platform action that failed for one specific target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetFailure {
    /// Target the action was applied to.
    pub target: TargetId,
    /// Human readable failure description.
    pub reason: String,
}

impl TargetFailure {
    /// Build a failure record for a target.
    pub fn new(target: TargetId, reason: impl Into<String>) -> Self {
        Self {
            target,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for TargetFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.target, self.reason)
    }
}

fn join_failures(failures: &[TargetFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors surfaced by platform collaborators.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlatformError {
    /// A failure worth retrying inside the status polling budget.
    #[error("transient platform error: {0}")]
    Transient(String),
    /// A failure that must not be retried.
    #[error("platform action failed: {0}")]
    Fatal(String),
    /// The resource did not reach the desired state in time.
    #[error("resource did not settle within {0:?}")]
    Timeout(Duration),
}

impl PlatformError {
    /// Whether the error can be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, PlatformError::Transient(_))
    }
}

/// Errors surfaced by probe transports for a single attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The request or command could not be completed.
    #[error("probe request failed: {0}")]
    Request(String),
    /// No transport is configured for the probe kind.
    #[error("no transport available for {0} probes")]
    Unsupported(&'static str),
}

/// Fatal and reportable errors of a chaos run.
#[derive(Debug, Clone, Error)]
pub enum ChaosError {
    /// No eligible targets.
    #[error("target selection failed: {0}")]
    TargetSelection(String),
    /// One or more inject actions failed.
    #[error("chaos injection failed: {}", join_failures(.0))]
    ChaosInject(Vec<TargetFailure>),
    /// Revert failures, reported together.
    #[error("chaos revert failed: {}", join_failures(.0))]
    ChaosRevert(Vec<TargetFailure>),
    /// A target did not settle into the expected state.
    #[error("status check failed for {target}: {reason}")]
    StatusCheck {
        /// Target that never settled.
        target: TargetId,
        /// Underlying platform failure.
        reason: String,
    },
    /// A probe failed after exhausting its retries.
    #[error("probe '{probe}' failed during {phase}: {reason}")]
    Probe {
        /// Probe name.
        probe: String,
        /// Phase in which the failure was observed.
        phase: ChaosPhase,
        /// Last failure reason.
        reason: String,
    },
    /// Every probe attempt timed out.
    #[error("probe '{probe}' timed out during {phase} after {attempts} attempt(s)")]
    ProbeTimeout {
        /// Probe name.
        probe: String,
        /// Phase in which the timeout was observed.
        phase: ChaosPhase,
        /// Attempts made before giving up.
        attempts: u32,
    },
    /// The run was stopped by the abort path.
    #[error("experiment aborted: {reason}")]
    ExperimentAborted {
        /// What triggered the abort.
        reason: AbortReason,
    },
    /// Invalid configuration or registration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ChaosError {
    /// Machine-readable code for the error.
    pub fn code(&self) -> ErrorCode {
        match self {
            ChaosError::TargetSelection(_) => ErrorCode::TargetSelection,
            ChaosError::ChaosInject(_) => ErrorCode::ChaosInject,
            ChaosError::ChaosRevert(_) => ErrorCode::ChaosRevert,
            ChaosError::StatusCheck { .. } => ErrorCode::StatusCheck,
            ChaosError::Probe { .. } => ErrorCode::Probe,
            ChaosError::ProbeTimeout { .. } => ErrorCode::ProbeTimeout,
            ChaosError::ExperimentAborted { .. } => ErrorCode::ExperimentAborted,
            ChaosError::Config(_) => ErrorCode::Config,
        }
    }

    /// First target the error is attributed to, when there is one.
    pub fn target(&self) -> Option<&TargetId> {
        match self {
            ChaosError::ChaosInject(failures) | ChaosError::ChaosRevert(failures) => {
                failures.first().map(|failure| &failure.target)
            }
            ChaosError::StatusCheck { target, .. } => Some(target),
            _ => None,
        }
    }

    /// Whether the error came from the abort path rather than a failure.
    pub fn is_abort(&self) -> bool {
        matches!(self, ChaosError::ExperimentAborted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_serialize_to_wire_names() {
        let json = serde_json::to_string(&ErrorCode::StatusCheck).unwrap();
        assert_eq!(json, "\"STATUS_CHECKS_ERROR\"");
        assert_eq!(ErrorCode::ProbeTimeout.to_string(), "PROBE_TIMEOUT");
    }

    #[test]
    fn revert_error_lists_every_failure() {
        let err = ChaosError::ChaosRevert(vec![
            TargetFailure::new(TargetId::namespaced("shop", "cart-0"), "denied"),
            TargetFailure::new(TargetId::namespaced("shop", "cart-1"), "gone"),
        ]);
        let message = err.to_string();
        assert!(message.contains("shop/cart-0: denied"));
        assert!(message.contains("shop/cart-1: gone"));
        assert_eq!(err.code(), ErrorCode::ChaosRevert);
        assert_eq!(err.target().map(|t| t.name()), Some("cart-0"));
    }
}
