//! ---
//! chaos_section: "02-chaos-lifecycle"
//! chaos_subsection: "module"
//! chaos_type: "source"
//! chaos_scope: "code"
//! chaos_description: "Verdict aggregation over sequencer, abort and probe outcomes."
//! chaos_version: "v0.1.0"
//! chaos_owner: "tbd"
//! ---
//! Folds the sequencer outcome, the abort report and the probe summaries into
//! one [`ChaosResult`]. Precedence: abort, then run error, then failed probes.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::abort::AbortReport;
use crate::error::{ChaosError, ErrorCode, TargetFailure};
use crate::model::{ChaosPhase, TargetId, TargetState, Verdict};
use crate::probe::ProbeSummary;
use crate::spec::ChaosSpec;

/// Where and why a run failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailStep {
    pub phase: ChaosPhase,
    pub code: ErrorCode,
    pub reason: String,
    /// Target the failure is attributed to, when there is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetId>,
}

impl FailStep {
    pub fn from_error(phase: ChaosPhase, error: &ChaosError) -> Self {
        let phase = match error {
            ChaosError::Probe { phase, .. } | ChaosError::ProbeTimeout { phase, .. } => *phase,
            _ => phase,
        };
        Self {
            phase,
            code: error.code(),
            reason: error.to_string(),
            target: error.target().cloned(),
        }
    }
}

/// Final state of one target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetRecord {
    pub target: TargetId,
    pub state: TargetState,
}

/// Result record of one chaos run.
#[derive(Debug, Clone, Serialize)]
pub struct ChaosResult {
    pub experiment: String,
    pub target_kind: String,
    pub verdict: Verdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fail_step: Option<FailStep>,
    /// Share of probes that passed every applicable window, 0 to 100.
    pub probe_success_percentage: f64,
    pub probes: Vec<ProbeSummary>,
    pub targets: Vec<TargetRecord>,
    /// Non-fatal revert failures (parallel passes where some targets reverted).
    pub revert_failures: Vec<TargetFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort: Option<AbortReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ChaosResult {
    pub fn passed(&self) -> bool {
        self.verdict.is_pass()
    }

    /// Recorded final state of `target`.
    pub fn target_state(&self, target: &TargetId) -> Option<TargetState> {
        self.targets
            .iter()
            .find(|record| &record.target == target)
            .map(|record| record.state)
    }

    pub fn probe(&self, name: &str) -> Option<&ProbeSummary> {
        self.probes.iter().find(|probe| probe.name == name)
    }
}

/// What the runner observed, handed to the aggregator at the end of a run.
#[derive(Debug, Default)]
pub struct RunEvidence {
    /// First fatal error and the phase it surfaced in.
    pub error: Option<(ChaosPhase, ChaosError)>,
    pub abort: Option<AbortReport>,
    pub probes: Vec<ProbeSummary>,
    pub targets: Vec<(TargetId, TargetState)>,
    pub revert_failures: Vec<TargetFailure>,
}

/// Builds the [`ChaosResult`] of a run.
#[derive(Debug, Clone)]
pub struct VerdictAggregator {
    experiment: String,
    target_kind: String,
    started_at: DateTime<Utc>,
}

impl VerdictAggregator {
    /// Start timing a run.
    pub fn new(spec: &ChaosSpec) -> Self {
        Self {
            experiment: spec.experiment.clone(),
            target_kind: spec.target_kind.clone(),
            started_at: Utc::now(),
        }
    }

    pub fn aggregate(&self, evidence: RunEvidence) -> ChaosResult {
        let RunEvidence {
            error,
            abort,
            probes,
            targets,
            revert_failures,
        } = evidence;

        let (verdict, fail_step) = if let Some(report) = &abort {
            (
                report.reason.verdict(),
                Some(FailStep {
                    phase: report.phase,
                    code: report.reason.code(),
                    reason: report.reason.to_string(),
                    target: None,
                }),
            )
        } else if let Some((phase, err)) = &error {
            (Verdict::Failed, Some(FailStep::from_error(*phase, err)))
        } else if let Some(failed) = probes.iter().find(|probe| !probe.passed) {
            let reason = failed
                .state
                .last_error
                .clone()
                .unwrap_or_else(|| format!("probe '{}' did not pass", failed.name));
            (
                Verdict::Failed,
                Some(FailStep {
                    phase: failed.state.failed_phase.unwrap_or(ChaosPhase::PostChaos),
                    code: ErrorCode::Probe,
                    reason: format!("probe '{}': {}", failed.name, reason),
                    target: None,
                }),
            )
        } else {
            (Verdict::Passed, None)
        };

        ChaosResult {
            experiment: self.experiment.clone(),
            target_kind: self.target_kind.clone(),
            verdict,
            fail_step,
            probe_success_percentage: success_percentage(&probes),
            probes,
            targets: targets
                .into_iter()
                .map(|(target, state)| TargetRecord { target, state })
                .collect(),
            revert_failures,
            abort,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

fn success_percentage(probes: &[ProbeSummary]) -> f64 {
    if probes.is_empty() {
        return 100.0;
    }
    let passed = probes.iter().filter(|probe| probe.passed).count();
    (passed as f64 * 100.0 / probes.len() as f64).round()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abort::AbortReason;

    fn aggregator() -> VerdictAggregator {
        VerdictAggregator::new(&ChaosSpec::new("verdicts"))
    }

    #[test]
    fn clean_run_passes() {
        let result = aggregator().aggregate(RunEvidence {
            targets: vec![(TargetId::new("a"), TargetState::Reverted)],
            ..Default::default()
        });
        assert_eq!(result.verdict, Verdict::Passed);
        assert_eq!(result.probe_success_percentage, 100.0);
        assert_eq!(
            result.target_state(&TargetId::new("a")),
            Some(TargetState::Reverted)
        );
        assert!(result.finished_at >= result.started_at);
    }

    #[test]
    fn abort_takes_precedence_over_errors() {
        let report = AbortReport {
            reason: AbortReason::Interrupt,
            phase: ChaosPhase::ChaosInject,
            reverted: vec![TargetId::new("c")],
            failures: Vec::new(),
        };
        let result = aggregator().aggregate(RunEvidence {
            error: Some((
                ChaosPhase::ChaosInject,
                ChaosError::ExperimentAborted {
                    reason: AbortReason::Interrupt,
                },
            )),
            abort: Some(report),
            ..Default::default()
        });
        assert_eq!(result.verdict, Verdict::Stopped);
        let step = result.fail_step.unwrap();
        assert_eq!(step.code, ErrorCode::ExperimentAborted);
        assert_eq!(step.phase, ChaosPhase::ChaosInject);
    }

    #[test]
    fn run_error_is_attributed_to_target() {
        let failure = TargetFailure::new(TargetId::new("b"), "permission denied");
        let result = aggregator().aggregate(RunEvidence {
            error: Some((ChaosPhase::ChaosInject, ChaosError::ChaosInject(vec![failure]))),
            ..Default::default()
        });
        assert_eq!(result.verdict, Verdict::Failed);
        let step = result.fail_step.unwrap();
        assert_eq!(step.code, ErrorCode::ChaosInject);
        assert_eq!(step.target, Some(TargetId::new("b")));

        let json = serde_json::to_value(&result.verdict).unwrap();
        assert_eq!(json, "Fail");
    }

    #[test]
    fn probe_errors_keep_their_own_phase() {
        let err = ChaosError::Probe {
            probe: "frontend".into(),
            phase: ChaosPhase::PreChaos,
            reason: "actual value '500' does not satisfy == 200".into(),
        };
        let step = FailStep::from_error(ChaosPhase::PostChaos, &err);
        assert_eq!(step.phase, ChaosPhase::PreChaos);
        assert_eq!(step.code, ErrorCode::Probe);
    }
}
