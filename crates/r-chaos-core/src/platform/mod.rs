//! ---
//! chaos_section: "02-chaos-lifecycle"
//! chaos_subsection: "module"
//! chaos_type: "source"
//! chaos_scope: "code"
//! chaos_description: "Platform action seam and the target action helper."
//! chaos_version: "v0.1.0"
//! chaos_owner: "tbd"
//! ---
//! The platform seam. Concrete fault actions (delete a pod, stop a VM, detach a
//! volume) live behind [`Platform`]; the coordinator only asks for inject,
//! revert and state observations.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use r_chaos_logging::{chaos_debug, chaos_error, chaos_info, LogContext};
use tokio::time::{sleep, Instant};

use crate::error::{ChaosError, PlatformError, TargetFailure};
use crate::ledger::TargetLedger;
use crate::metrics::ChaosMetrics;
use crate::model::{ResourceState, TargetId, TargetState};
use crate::sink::ResultSink;
use crate::spec::ChaosSpec;

pub mod command;

pub use command::CommandPlatform;

/// Fault actions for one kind of platform resource.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Resource kind label (pod, node, instance, volume, ...).
    fn kind(&self) -> &str;

    /// Apply the fault to a target.
    async fn inject(&self, target: &TargetId) -> Result<(), PlatformError>;

    /// Remove the fault from a target.
    async fn revert(&self, target: &TargetId) -> Result<(), PlatformError>;

    /// Observe the current condition of a target.
    async fn current_state(&self, target: &TargetId) -> Result<ResourceState, PlatformError>;

    /// Poll until the target reports `desired`, retrying transient errors, for at most `timeout`.
    async fn wait_for_state(
        &self,
        target: &TargetId,
        desired: ResourceState,
        timeout: Duration,
        poll: Duration,
    ) -> Result<(), PlatformError> {
        poll_for_state(self, target, desired, timeout, poll).await
    }
}

/// Poll `platform` until `target` reports `desired`. Transient errors are
/// retried until `timeout`; any other error ends the wait.
pub(crate) async fn poll_for_state<P: Platform + ?Sized>(
    platform: &P,
    target: &TargetId,
    desired: ResourceState,
    timeout: Duration,
    poll: Duration,
) -> Result<(), PlatformError> {
    let deadline = Instant::now() + timeout;
    loop {
        match platform.current_state(target).await {
            Ok(state) if state == desired => return Ok(()),
            Ok(_) => {}
            Err(err) if err.is_transient() => {
                tracing::debug!(
                    target: "r_chaos::platform",
                    kind = platform.kind(),
                    resource = %target,
                    error = %err,
                    "transient state check failure"
                );
            }
            Err(err) => return Err(err),
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(PlatformError::Timeout(timeout));
        }
        sleep(poll.min(deadline - now)).await;
    }
}

/// Inject/revert with state verification, ledger bookkeeping and sink records.
///
/// Shared by the sequencer and the abort watcher so both paths apply the same
/// idempotence rules.
#[derive(Clone)]
pub struct TargetActions {
    platform: Arc<dyn Platform>,
    ledger: TargetLedger,
    sink: Arc<dyn ResultSink>,
    metrics: Option<ChaosMetrics>,
    experiment: String,
    kind: String,
    status_timeout: Duration,
    status_delay: Duration,
}

impl TargetActions {
    pub fn new(
        spec: &ChaosSpec,
        platform: Arc<dyn Platform>,
        ledger: TargetLedger,
        sink: Arc<dyn ResultSink>,
        metrics: Option<ChaosMetrics>,
    ) -> Self {
        Self {
            kind: platform.kind().to_string(),
            platform,
            ledger,
            sink,
            metrics,
            experiment: spec.experiment.clone(),
            status_timeout: spec.status_timeout,
            status_delay: spec.status_delay,
        }
    }

    pub fn ledger(&self) -> &TargetLedger {
        &self.ledger
    }

    pub fn platform(&self) -> Arc<dyn Platform> {
        self.platform.clone()
    }

    /// Apply the fault. A target already faulted is marked injected without a platform call.
    pub async fn inject(&self, target: &TargetId) -> Result<(), TargetFailure> {
        let name = target.to_string();
        let ctx = LogContext::new()
            .with_experiment(&self.experiment)
            .with_target(&name)
            .with_phase("ChaosInject");

        match self.platform.current_state(target).await {
            Ok(ResourceState::Faulted) => {
                chaos_info!(context = ctx, "target already faulted, skipping inject");
                self.transition(target, TargetState::Injected);
                return Ok(());
            }
            Ok(_) => {}
            Err(err) => chaos_debug!(context = ctx, "pre-inject state check failed: {}", err),
        }

        match self.platform.inject(target).await {
            Ok(()) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_injection(&self.kind, true);
                }
                chaos_info!(context = ctx, "fault injected");
                self.transition(target, TargetState::Injected);
                Ok(())
            }
            Err(err) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_injection(&self.kind, false);
                }
                chaos_error!(context = ctx, "inject failed: {}", err);
                Err(TargetFailure::new(target.clone(), err.to_string()))
            }
        }
    }

    /// Wait for the fault to take effect.
    pub async fn await_injected(&self, target: &TargetId) -> Result<(), ChaosError> {
        self.platform
            .wait_for_state(
                target,
                ResourceState::Faulted,
                self.status_timeout,
                self.status_delay,
            )
            .await
            .map_err(|err| ChaosError::StatusCheck {
                target: target.clone(),
                reason: err.to_string(),
            })
    }

    /// Remove the fault. Returns `Ok(false)` when nothing had to be done.
    pub async fn revert(&self, target: &TargetId) -> Result<bool, TargetFailure> {
        if self.ledger.state(target) == Some(TargetState::Reverted) {
            return Ok(false);
        }
        let name = target.to_string();
        let ctx = LogContext::new()
            .with_experiment(&self.experiment)
            .with_target(&name);

        match self.platform.current_state(target).await {
            Ok(ResourceState::Nominal) => {
                chaos_info!(context = ctx, "target already nominal, skipping revert");
                self.transition(target, TargetState::Reverted);
                return Ok(false);
            }
            Ok(_) => {}
            Err(err) => chaos_debug!(context = ctx, "pre-revert state check failed: {}", err),
        }

        match self.platform.revert(target).await {
            Ok(()) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_revert(&self.kind, true);
                }
                chaos_info!(context = ctx, "fault reverted");
                self.transition(target, TargetState::Reverted);
                Ok(true)
            }
            Err(err) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_revert(&self.kind, false);
                }
                chaos_error!(context = ctx, "revert failed: {}", err);
                Err(TargetFailure::new(target.clone(), err.to_string()))
            }
        }
    }

    /// Wait for the target to report nominal again.
    pub async fn await_reverted(&self, target: &TargetId) -> Result<(), TargetFailure> {
        self.platform
            .wait_for_state(
                target,
                ResourceState::Nominal,
                self.status_timeout,
                self.status_delay,
            )
            .await
            .map_err(|err| TargetFailure::new(target.clone(), err.to_string()))
    }

    /// Revert then verify. Used for cleanup, where each target is handled on its own.
    pub async fn revert_and_verify(&self, target: &TargetId) -> Result<(), TargetFailure> {
        if self.revert(target).await? {
            self.await_reverted(target).await?;
        }
        Ok(())
    }

    /// Best-effort revert of every still-injected target. Failures are logged and returned.
    pub async fn cleanup_injected(&self) -> Vec<TargetFailure> {
        let mut failures = Vec::new();
        for target in self.ledger.injected() {
            if let Err(failure) = self.revert_and_verify(&target).await {
                failures.push(failure);
            }
        }
        failures
    }

    fn transition(&self, target: &TargetId, state: TargetState) {
        let changed = match state {
            TargetState::Injected => {
                self.ledger.mark_injected(target);
                true
            }
            TargetState::Reverted => self.ledger.mark_reverted(target),
            TargetState::Targeted => {
                self.ledger.mark_targeted([target]);
                true
            }
            TargetState::NotTargeted => {
                self.ledger.mark_not_targeted([target]);
                true
            }
        };
        if changed {
            self.sink.record_target_state(target, state, &self.kind);
        }
    }

    /// Tag freshly selected targets.
    pub fn mark_targeted<'a>(&self, targets: impl IntoIterator<Item = &'a TargetId>) {
        for target in targets {
            self.transition(target, TargetState::Targeted);
        }
    }
}

impl std::fmt::Debug for TargetActions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetActions")
            .field("kind", &self.kind)
            .field("experiment", &self.experiment)
            .finish_non_exhaustive()
    }
}
