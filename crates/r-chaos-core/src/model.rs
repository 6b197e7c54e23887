//! ---
//! chaos_section: "02-chaos-lifecycle"
//! chaos_subsection: "module"
//! chaos_type: "source"
//! chaos_scope: "code"
//! chaos_description: "Target identifiers, lifecycle enums and the phase tracker."
//! chaos_version: "v0.1.0"
//! chaos_owner: "tbd"
//! ---
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Identifier of a platform resource, optionally scoped to a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TargetId {
    namespace: Option<String>,
    name: String,
}

impl TargetId {
    /// Unscoped identifier (node name, instance id, volume id, ...).
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    /// Identifier scoped to a namespace.
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Resource name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Namespace, if any.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{}/{}", namespace, self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl std::str::FromStr for TargetId {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        let (namespace, name) = match trimmed.split_once('/') {
            Some((namespace, name)) => (Some(namespace.trim()), name.trim()),
            None => (None, trimmed),
        };
        if name.is_empty() || namespace.is_some_and(str::is_empty) {
            return Err(format!("'{}' is not a valid target identifier", input));
        }
        Ok(match namespace {
            Some(namespace) => TargetId::namespaced(namespace, name),
            None => TargetId::new(name),
        })
    }
}

impl TryFrom<String> for TargetId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TargetId> for String {
    fn from(value: TargetId) -> Self {
        value.to_string()
    }
}

/// Phase of a chaos run. Ordered; the tracker never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ChaosPhase {
    /// Before the first injection.
    PreChaos,
    /// The chaos window.
    ChaosInject,
    /// After the final revert.
    PostChaos,
    /// Run finished.
    Completed,
}

impl ChaosPhase {
    /// Label used in logs and results.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChaosPhase::PreChaos => "PreChaos",
            ChaosPhase::ChaosInject => "ChaosInject",
            ChaosPhase::PostChaos => "PostChaos",
            ChaosPhase::Completed => "Completed",
        }
    }
}

impl fmt::Display for ChaosPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared, monotonic view of the current phase.
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    tx: Arc<watch::Sender<ChaosPhase>>,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseTracker {
    /// Tracker starting at [`ChaosPhase::PreChaos`].
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ChaosPhase::PreChaos);
        Self { tx: Arc::new(tx) }
    }

    /// Current phase.
    pub fn current(&self) -> ChaosPhase {
        *self.tx.borrow()
    }

    /// Move forward to `phase`. Returns `false` when that would regress or stay put.
    pub fn advance(&self, phase: ChaosPhase) -> bool {
        self.tx.send_if_modified(|current| {
            if phase > *current {
                *current = phase;
                true
            } else {
                false
            }
        })
    }

    /// Receiver for phase changes.
    pub fn subscribe(&self) -> watch::Receiver<ChaosPhase> {
        self.tx.subscribe()
    }

    /// Resolve once the tracker has moved past `phase`.
    pub async fn passed(&self, phase: ChaosPhase) {
        let mut rx = self.subscribe();
        if rx.wait_for(|current| *current > phase).await.is_err() {
            futures::future::pending::<()>().await;
        }
    }
}

/// Final classification of a run. Set exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    /// Not yet decided.
    Awaited,
    /// Every step and probe succeeded.
    #[serde(rename = "Pass")]
    Passed,
    /// A step or probe failed.
    #[serde(rename = "Fail")]
    Failed,
    /// Terminated by an external interrupt.
    Stopped,
}

impl Verdict {
    /// Wire label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Awaited => "Awaited",
            Verdict::Passed => "Pass",
            Verdict::Failed => "Fail",
            Verdict::Stopped => "Stopped",
        }
    }

    /// Whether the verdict is a success.
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Passed)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-target lifecycle tag kept by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetState {
    /// Known candidate, not selected.
    NotTargeted,
    /// Selected but not yet injected.
    Targeted,
    /// Fault applied.
    Injected,
    /// Fault removed.
    Reverted,
}

impl TargetState {
    /// Label used in logs and sink records.
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetState::NotTargeted => "not-targeted",
            TargetState::Targeted => "targeted",
            TargetState::Injected => "injected",
            TargetState::Reverted => "reverted",
        }
    }

    /// Whether the abort path must revert a target in this state.
    pub fn needs_revert(&self) -> bool {
        matches!(self, TargetState::Targeted | TargetState::Injected)
    }
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Platform-observed condition of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceState {
    /// Healthy, fault not present.
    Nominal,
    /// The fault is in effect.
    Faulted,
    /// Neither; the resource is moving between states.
    Transitioning,
}

impl ResourceState {
    /// Label used by state probes and command output matching.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceState::Nominal => "nominal",
            ResourceState::Faulted => "faulted",
            ResourceState::Transitioning => "transitioning",
        }
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResourceState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "nominal" => Ok(ResourceState::Nominal),
            "faulted" => Ok(ResourceState::Faulted),
            "transitioning" => Ok(ResourceState::Transitioning),
            other => Err(format!("'{}' is not a resource state", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_ids_parse_with_and_without_namespace() {
        let scoped: TargetId = "shop/cart-0".parse().unwrap();
        assert_eq!(scoped.namespace(), Some("shop"));
        assert_eq!(scoped.name(), "cart-0");
        assert_eq!(scoped.to_string(), "shop/cart-0");

        let bare: TargetId = "i-0abc".parse().unwrap();
        assert_eq!(bare.namespace(), None);
        assert!("shop/".parse::<TargetId>().is_err());
        assert!("/cart".parse::<TargetId>().is_err());
    }

    #[test]
    fn phase_tracker_never_regresses() {
        let tracker = PhaseTracker::new();
        assert!(tracker.advance(ChaosPhase::ChaosInject));
        assert!(!tracker.advance(ChaosPhase::PreChaos));
        assert!(!tracker.advance(ChaosPhase::ChaosInject));
        assert_eq!(tracker.current(), ChaosPhase::ChaosInject);
        assert!(tracker.advance(ChaosPhase::Completed));
        assert_eq!(tracker.current(), ChaosPhase::Completed);
    }

    #[tokio::test]
    async fn passed_resolves_after_advance() {
        let tracker = PhaseTracker::new();
        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.passed(ChaosPhase::ChaosInject).await })
        };
        tracker.advance(ChaosPhase::ChaosInject);
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        tracker.advance(ChaosPhase::PostChaos);
        waiter.await.unwrap();
    }

    #[test]
    fn verdict_labels() {
        assert_eq!(serde_json::to_string(&Verdict::Passed).unwrap(), "\"Pass\"");
        assert_eq!(Verdict::Stopped.to_string(), "Stopped");
        assert!(TargetState::Injected.needs_revert());
        assert!(!TargetState::Reverted.needs_revert());
    }
}
