//! ---
//! chaos_section: "02-chaos-lifecycle"
//! chaos_subsection: "module"
//! chaos_type: "source"
//! chaos_scope: "code"
//! chaos_description: "Shared per-target lifecycle ledger."
//! chaos_version: "v0.1.0"
//! chaos_owner: "tbd"
//! ---
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::model::{TargetId, TargetState};

/// Per-target lifecycle tags shared by the sequencer and the abort watcher.
///
/// Writers are the sequencer during normal flow and the watcher after an abort.
/// Every transition is a single locked update, so the brief overlap between the
/// two at most produces a repeated `Reverted` mark, which is ignored.
#[derive(Debug, Clone, Default)]
pub struct TargetLedger {
    entries: Arc<Mutex<IndexMap<TargetId, TargetState>>>,
}

impl TargetLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record candidates that were not selected, for reporting.
    pub fn mark_not_targeted<'a>(&self, targets: impl IntoIterator<Item = &'a TargetId>) {
        let mut entries = self.entries.lock();
        for target in targets {
            entries
                .entry(target.clone())
                .or_insert(TargetState::NotTargeted);
        }
    }

    pub fn mark_targeted<'a>(&self, targets: impl IntoIterator<Item = &'a TargetId>) {
        let mut entries = self.entries.lock();
        for target in targets {
            entries.insert(target.clone(), TargetState::Targeted);
        }
    }

    pub fn mark_injected(&self, target: &TargetId) {
        self.entries
            .lock()
            .insert(target.clone(), TargetState::Injected);
    }

    /// Returns `false` when the target was already reverted.
    pub fn mark_reverted(&self, target: &TargetId) -> bool {
        let mut entries = self.entries.lock();
        match entries.get_mut(target) {
            Some(state) if *state == TargetState::Reverted => false,
            Some(state) => {
                *state = TargetState::Reverted;
                true
            }
            None => {
                entries.insert(target.clone(), TargetState::Reverted);
                true
            }
        }
    }

    pub fn state(&self, target: &TargetId) -> Option<TargetState> {
        self.entries.lock().get(target).copied()
    }

    /// Targets the abort path still has to revert, in selection order.
    pub fn pending_revert(&self) -> Vec<TargetId> {
        self.entries
            .lock()
            .iter()
            .filter(|(_, state)| state.needs_revert())
            .map(|(target, _)| target.clone())
            .collect()
    }

    pub fn injected(&self) -> Vec<TargetId> {
        self.entries
            .lock()
            .iter()
            .filter(|(_, state)| **state == TargetState::Injected)
            .map(|(target, _)| target.clone())
            .collect()
    }

    pub fn count_in(&self, state: TargetState) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|current| **current == state)
            .count()
    }

    pub fn snapshot(&self) -> Vec<(TargetId, TargetState)> {
        self.entries
            .lock()
            .iter()
            .map(|(target, state)| (target.clone(), *state))
            .collect()
    }
}
