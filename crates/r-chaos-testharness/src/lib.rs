//! ---
//! chaos_section: "05-testing"
//! chaos_subsection: "module"
//! chaos_type: "source"
//! chaos_scope: "code"
//! chaos_description: "Fake platform, scripted probe transport and run fixtures."
//! chaos_version: "v0.1.0"
//! chaos_owner: "tbd"
//! ---
//! Test doubles for driving [`r_chaos_core::ChaosRunner`] without a real
//! platform. [`FakePlatform`] keeps resource states in memory and records every
//! action; [`ScriptedTransport`] answers probes from per-probe scripts.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use r_chaos_core::{
    ChaosSpec, ExecutionMode, Platform, PlatformError, ProbeDescriptor, ProbeTransport,
    ResourceState, TargetId, TransportError,
};
use tokio::time::sleep;

/// Action recorded by [`FakePlatform`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformOp {
    Inject(TargetId),
    Revert(TargetId),
}

#[derive(Debug, Default)]
struct FakeState {
    states: HashMap<TargetId, ResourceState>,
    log: Vec<PlatformOp>,
    max_faulted: usize,
}

impl FakeState {
    fn faulted(&self) -> usize {
        self.states
            .values()
            .filter(|state| **state != ResourceState::Nominal)
            .count()
    }
}

/// In-memory platform. Every target starts nominal.
#[derive(Debug)]
pub struct FakePlatform {
    kind: String,
    latency: Duration,
    fail_inject: HashSet<TargetId>,
    fail_revert: HashSet<TargetId>,
    stuck: HashSet<TargetId>,
    state: Mutex<FakeState>,
}

impl Default for FakePlatform {
    fn default() -> Self {
        Self::new("pod")
    }
}

impl FakePlatform {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            latency: Duration::ZERO,
            fail_inject: HashSet::new(),
            fail_revert: HashSet::new(),
            stuck: HashSet::new(),
            state: Mutex::new(FakeState::default()),
        }
    }

    /// Delay applied to every inject and revert.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn fail_inject_on(mut self, target: TargetId) -> Self {
        self.fail_inject.insert(target);
        self
    }

    pub fn fail_revert_on(mut self, target: TargetId) -> Self {
        self.fail_revert.insert(target);
        self
    }

    /// Inject succeeds but the target never reports faulted.
    pub fn stuck_on(mut self, target: TargetId) -> Self {
        self.stuck.insert(target);
        self
    }

    /// Force a target into a state, e.g. to simulate leftovers from an earlier run.
    pub fn set_state(&self, target: &TargetId, state: ResourceState) {
        self.state.lock().states.insert(target.clone(), state);
    }

    pub fn state_of(&self, target: &TargetId) -> ResourceState {
        self.state
            .lock()
            .states
            .get(target)
            .copied()
            .unwrap_or(ResourceState::Nominal)
    }

    pub fn operations(&self) -> Vec<PlatformOp> {
        self.state.lock().log.clone()
    }

    pub fn injections_of(&self, target: &TargetId) -> usize {
        self.count(|op| matches!(op, PlatformOp::Inject(t) if t == target))
    }

    pub fn reverts_of(&self, target: &TargetId) -> usize {
        self.count(|op| matches!(op, PlatformOp::Revert(t) if t == target))
    }

    /// Highest number of targets away from nominal at the same time.
    pub fn max_concurrent_faulted(&self) -> usize {
        self.state.lock().max_faulted
    }

    /// Targets not currently nominal.
    pub fn faulted(&self) -> Vec<TargetId> {
        let mut faulted: Vec<_> = self
            .state
            .lock()
            .states
            .iter()
            .filter(|(_, state)| **state != ResourceState::Nominal)
            .map(|(target, _)| target.clone())
            .collect();
        faulted.sort();
        faulted
    }

    fn count(&self, predicate: impl Fn(&PlatformOp) -> bool) -> usize {
        self.state.lock().log.iter().filter(|op| predicate(op)).count()
    }
}

#[async_trait]
impl Platform for FakePlatform {
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn inject(&self, target: &TargetId) -> Result<(), PlatformError> {
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }
        if self.fail_inject.contains(target) {
            return Err(PlatformError::Fatal(format!("inject refused for {}", target)));
        }
        let mut state = self.state.lock();
        let next = if self.stuck.contains(target) {
            ResourceState::Transitioning
        } else {
            ResourceState::Faulted
        };
        state.states.insert(target.clone(), next);
        state.log.push(PlatformOp::Inject(target.clone()));
        state.max_faulted = state.max_faulted.max(state.faulted());
        Ok(())
    }

    async fn revert(&self, target: &TargetId) -> Result<(), PlatformError> {
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }
        if self.fail_revert.contains(target) {
            return Err(PlatformError::Fatal(format!("revert refused for {}", target)));
        }
        let mut state = self.state.lock();
        state.states.insert(target.clone(), ResourceState::Nominal);
        state.log.push(PlatformOp::Revert(target.clone()));
        Ok(())
    }

    async fn current_state(&self, target: &TargetId) -> Result<ResourceState, PlatformError> {
        Ok(self.state_of(target))
    }
}

type Outcome = Result<String, String>;

/// Probe transport answering from scripts keyed by probe name.
///
/// Scripted outcomes are consumed first; afterwards the probe's fixed answer, or
/// the transport-wide default, is returned on every call.
#[derive(Debug)]
pub struct ScriptedTransport {
    default: Outcome,
    latency: Duration,
    fixed: Mutex<HashMap<String, Outcome>>,
    scripts: Mutex<HashMap<String, VecDeque<Outcome>>>,
    calls: Mutex<HashMap<String, u32>>,
}

impl ScriptedTransport {
    /// Every unscripted probe observes `default`.
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            default: Ok(default.into()),
            latency: Duration::ZERO,
            fixed: Mutex::new(HashMap::new()),
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Always answer `outcome` for `probe`.
    pub fn respond(self, probe: &str, outcome: impl Into<String>) -> Self {
        self.fixed.lock().insert(probe.to_string(), Ok(outcome.into()));
        self
    }

    /// Always fail `probe` with `reason`.
    pub fn fail(self, probe: &str, reason: impl Into<String>) -> Self {
        self.fixed.lock().insert(probe.to_string(), Err(reason.into()));
        self
    }

    /// Answer the given outcomes in order before falling back.
    pub fn script<I, S>(self, probe: &str, outcomes: I) -> Self
    where
        I: IntoIterator<Item = Result<S, S>>,
        S: Into<String>,
    {
        let queue = outcomes
            .into_iter()
            .map(|outcome| outcome.map(Into::into).map_err(Into::into))
            .collect();
        self.scripts.lock().insert(probe.to_string(), queue);
        self
    }

    /// Attempts made for `probe` so far.
    pub fn calls(&self, probe: &str) -> u32 {
        self.calls.lock().get(probe).copied().unwrap_or(0)
    }

    fn next(&self, probe: &str) -> Outcome {
        *self.calls.lock().entry(probe.to_string()).or_insert(0) += 1;
        if let Some(outcome) = self
            .scripts
            .lock()
            .get_mut(probe)
            .and_then(VecDeque::pop_front)
        {
            return outcome;
        }
        self.fixed
            .lock()
            .get(probe)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }
}

#[async_trait]
impl ProbeTransport for ScriptedTransport {
    async fn send(&self, probe: &ProbeDescriptor) -> Result<String, TransportError> {
        let outcome = self.next(&probe.name);
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }
        outcome.map_err(TransportError::Request)
    }
}

/// `count` targets named `pod-0..` in the `chaos` namespace.
pub fn pods(count: usize) -> Vec<TargetId> {
    (0..count)
        .map(|idx| TargetId::namespaced("chaos", format!("pod-{}", idx)))
        .collect()
}

/// Serial spec on a millisecond scale, targeting every candidate.
pub fn fast_spec(name: &str) -> ChaosSpec {
    ChaosSpec::new(name)
        .with_duration(Duration::from_millis(200))
        .with_interval(Duration::from_millis(40))
        .with_mode(ExecutionMode::Serial)
        .with_affected_percentage(100)
        .with_seed(7)
        .with_status_checks(Duration::from_millis(300), Duration::from_millis(5))
        .with_abort_grace(Duration::from_millis(500))
}

/// Install a test-writer subscriber once per process.
pub fn init_test_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_platform_tracks_faulted_targets() {
        let targets = pods(2);
        let platform = FakePlatform::default().stuck_on(targets[1].clone());
        platform.inject(&targets[0]).await.unwrap();
        platform.inject(&targets[1]).await.unwrap();
        assert_eq!(
            platform.current_state(&targets[1]).await.unwrap(),
            ResourceState::Transitioning
        );
        assert_eq!(platform.max_concurrent_faulted(), 2);
        platform.revert(&targets[0]).await.unwrap();
        assert_eq!(platform.faulted(), vec![targets[1].clone()]);
        assert_eq!(platform.reverts_of(&targets[0]), 1);
    }

    #[tokio::test]
    async fn scripted_transport_falls_back_after_script() {
        let transport = ScriptedTransport::new("200").script("edge", [Err("refused"), Ok("503")]);
        let probe = ProbeDescriptor::http_get(
            "edge",
            r_chaos_core::ProbeMode::Edge,
            "http://127.0.0.1:1/",
            200,
        )
        .unwrap();
        assert!(transport.send(&probe).await.is_err());
        assert_eq!(transport.send(&probe).await.unwrap(), "503");
        assert_eq!(transport.send(&probe).await.unwrap(), "200");
        assert_eq!(transport.calls("edge"), 3);
    }
}
