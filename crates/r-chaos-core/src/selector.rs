//! ---
//! chaos_section: "02-chaos-lifecycle"
//! chaos_subsection: "module"
//! chaos_type: "source"
//! chaos_scope: "code"
//! chaos_description: "Target selection by affected percentage."
//! chaos_version: "v0.1.0"
//! chaos_owner: "tbd"
//! ---
use indexmap::IndexSet;
use rand::rngs::StdRng;
use rand::seq::{index, SliceRandom};
use rand::SeedableRng;
use serde::Serialize;
use tracing::info;

use crate::error::ChaosError;
use crate::model::TargetId;

/// Ordered, duplicate-free set of targets chosen for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetSet {
    targets: Vec<TargetId>,
}

impl TargetSet {
    /// Wrap an already-selected list, dropping duplicates.
    pub fn new(targets: impl IntoIterator<Item = TargetId>) -> Self {
        let unique: IndexSet<TargetId> = targets.into_iter().collect();
        Self {
            targets: unique.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TargetId> {
        self.targets.iter()
    }

    pub fn as_slice(&self) -> &[TargetId] {
        &self.targets
    }
}

impl<'a> IntoIterator for &'a TargetSet {
    type Item = &'a TargetId;
    type IntoIter = std::slice::Iter<'a, TargetId>;

    fn into_iter(self) -> Self::IntoIter {
        self.targets.iter()
    }
}

/// Picks the subset of candidates a run acts on.
#[derive(Debug)]
pub struct TargetSelector {
    rng: StdRng,
    floor: usize,
}

impl Default for TargetSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl TargetSelector {
    /// Selector seeded from OS entropy with a floor of one target.
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            floor: 1,
        }
    }

    /// Seed the RNG for reproducible selection.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Minimum number of targets picked from a non-empty pool. `0` disables the floor.
    pub fn with_floor(mut self, floor: usize) -> Self {
        self.floor = floor;
        self
    }

    /// Choose `ceil(n * percentage / 100)` distinct candidates.
    ///
    /// The percentage is clamped to `[0, 100]`. At 100 the full list is returned in
    /// candidate order; below that the pick is uniform without replacement and keeps
    /// candidate order unless `randomize_order` asks for a permutation.
    pub fn select(
        &mut self,
        candidates: &[TargetId],
        percentage: u32,
        randomize_order: bool,
    ) -> Result<TargetSet, ChaosError> {
        let pool: Vec<TargetId> = candidates
            .iter()
            .cloned()
            .collect::<IndexSet<_>>()
            .into_iter()
            .collect();
        if pool.is_empty() {
            return Err(ChaosError::TargetSelection(
                "no candidate targets available".into(),
            ));
        }

        let percentage = percentage.min(100) as usize;
        let computed = (pool.len() * percentage).div_ceil(100);
        let count = computed.max(self.floor).min(pool.len());
        if count == 0 {
            return Err(ChaosError::TargetSelection(format!(
                "affected percentage {} selects no targets out of {}",
                percentage,
                pool.len()
            )));
        }

        let mut chosen = if count == pool.len() {
            pool
        } else {
            let mut picked = index::sample(&mut self.rng, pool.len(), count).into_vec();
            picked.sort_unstable();
            picked.into_iter().map(|idx| pool[idx].clone()).collect()
        };
        if randomize_order {
            chosen.shuffle(&mut self.rng);
        }

        info!(
            target: "r_chaos::selector",
            candidates = candidates.len(),
            percentage,
            selected = chosen.len(),
            randomize_order,
            "selected chaos targets"
        );
        Ok(TargetSet { targets: chosen })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(n: usize) -> Vec<TargetId> {
        (0..n)
            .map(|i| TargetId::namespaced("shop", format!("pod-{i}")))
            .collect()
    }

    #[test]
    fn size_matches_ceiling_for_every_percentage() {
        let mut selector = TargetSelector::new().with_seed(42);
        for n in 1..=12 {
            let candidates = pool(n);
            for percentage in 1..=100u32 {
                let set = selector.select(&candidates, percentage, false).unwrap();
                let expected = (n * percentage as usize).div_ceil(100);
                assert_eq!(set.len(), expected, "n={n} percentage={percentage}");
                let unique: IndexSet<_> = set.iter().collect();
                assert_eq!(unique.len(), set.len());
                assert!(set.iter().all(|t| candidates.contains(t)));
            }
        }
    }

    #[test]
    fn full_percentage_keeps_candidate_order() {
        let candidates = pool(5);
        let set = TargetSelector::new()
            .with_seed(1)
            .select(&candidates, 100, false)
            .unwrap();
        assert_eq!(set.as_slice(), candidates.as_slice());
    }

    #[test]
    fn zero_percentage_uses_floor() {
        let candidates = pool(4);
        let set = TargetSelector::new()
            .with_seed(9)
            .select(&candidates, 0, false)
            .unwrap();
        assert_eq!(set.len(), 1);

        let err = TargetSelector::new()
            .with_floor(0)
            .select(&candidates, 0, false)
            .unwrap_err();
        assert!(matches!(err, ChaosError::TargetSelection(_)));
    }

    #[test]
    fn empty_pool_is_rejected() {
        let err = TargetSelector::new().select(&[], 50, false).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::TargetSelection);
    }

    #[test]
    fn percentage_above_hundred_is_clamped_and_duplicates_dropped() {
        let mut candidates = pool(3);
        candidates.push(candidates[0].clone());
        let set = TargetSelector::new()
            .with_seed(5)
            .select(&candidates, 250, true)
            .unwrap();
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn seeded_selection_is_reproducible() {
        let candidates = pool(10);
        let a = TargetSelector::new()
            .with_seed(77)
            .select(&candidates, 30, true)
            .unwrap();
        let b = TargetSelector::new()
            .with_seed(77)
            .select(&candidates, 30, true)
            .unwrap();
        assert_eq!(a, b);
    }
}
