//! ---
//! chaos_section: "02-chaos-lifecycle"
//! chaos_subsection: "module"
//! chaos_type: "source"
//! chaos_scope: "code"
//! chaos_description: "Immutable run specification resolved once from configuration."
//! chaos_version: "v0.1.0"
//! chaos_owner: "tbd"
//! ---
use std::time::Duration;

use r_chaos_common::config::{ExperimentConfig, PercentageTunable, SequenceSetting};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::debug;

use crate::error::ChaosError;

/// How the target set is walked on every iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExecutionMode {
    /// One target at a time.
    Serial,
    /// All targets together.
    Parallel,
}

/// Wait applied between injection and revert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IntervalPolicy {
    /// Always the same wait.
    Fixed(Duration),
    /// Uniformly drawn from `[lower, upper]` on every wait.
    Random {
        /// Inclusive lower bound.
        lower: Duration,
        /// Inclusive upper bound.
        upper: Duration,
    },
}

impl IntervalPolicy {
    /// Draw the next wait.
    pub fn next(&self, rng: &mut StdRng) -> Duration {
        match *self {
            IntervalPolicy::Fixed(interval) => interval,
            IntervalPolicy::Random { lower, upper } => {
                if upper <= lower {
                    return lower;
                }
                let millis = rng.gen_range(lower.as_millis()..=upper.as_millis());
                Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
            }
        }
    }

    /// Longest wait the policy can produce.
    pub fn upper_bound(&self) -> Duration {
        match *self {
            IntervalPolicy::Fixed(interval) => interval,
            IntervalPolicy::Random { upper, .. } => upper,
        }
    }
}

/// Immutable configuration for one chaos run.
#[derive(Debug, Clone, Serialize)]
pub struct ChaosSpec {
    /// Experiment name used in logs and the result record.
    pub experiment: String,
    /// Kind of resource targeted (pod, node, instance, volume, ...).
    pub target_kind: String,
    /// Total chaos duration.
    pub duration: Duration,
    /// Wait between injection and revert.
    pub interval: IntervalPolicy,
    /// Quiet wait before and after the chaos window.
    pub ramp_time: Duration,
    /// Serial or parallel execution.
    pub mode: ExecutionMode,
    /// Percentage of candidates affected, already resolved to a single value.
    pub affected_percentage: u32,
    /// Shuffle the selected targets.
    pub randomize_order: bool,
    /// Seed for target selection and interval jitter.
    pub seed: Option<u64>,
    /// Budget for a target to settle into a state.
    pub status_timeout: Duration,
    /// Poll cadence while waiting for a target to settle.
    pub status_delay: Duration,
    /// How long the abort watcher waits for the sequencer to stop before reverting.
    pub abort_grace: Duration,
}

impl ChaosSpec {
    /// Spec with conservative defaults.
    pub fn new(experiment: impl Into<String>) -> Self {
        Self {
            experiment: experiment.into(),
            target_kind: "pod".to_string(),
            duration: Duration::from_secs(30),
            interval: IntervalPolicy::Fixed(Duration::from_secs(10)),
            ramp_time: Duration::ZERO,
            mode: ExecutionMode::Parallel,
            affected_percentage: 0,
            randomize_order: false,
            seed: None,
            status_timeout: Duration::from_secs(180),
            status_delay: Duration::from_secs(2),
            abort_grace: Duration::from_secs(5),
        }
    }

    pub fn with_target_kind(mut self, kind: impl Into<String>) -> Self {
        self.target_kind = kind.into();
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = IntervalPolicy::Fixed(interval);
        self
    }

    pub fn with_random_interval(mut self, lower: Duration, upper: Duration) -> Self {
        self.interval = IntervalPolicy::Random { lower, upper };
        self
    }

    pub fn with_ramp_time(mut self, ramp_time: Duration) -> Self {
        self.ramp_time = ramp_time;
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_affected_percentage(mut self, percentage: u32) -> Self {
        self.affected_percentage = percentage;
        self
    }

    pub fn with_randomize_order(mut self, randomize: bool) -> Self {
        self.randomize_order = randomize;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Settle budget and poll cadence for platform state waits.
    pub fn with_status_checks(mut self, timeout: Duration, delay: Duration) -> Self {
        self.status_timeout = timeout;
        self.status_delay = delay;
        self
    }

    pub fn with_abort_grace(mut self, grace: Duration) -> Self {
        self.abort_grace = grace;
        self
    }

    /// Reject specs the sequencer cannot run.
    pub fn validate(&self) -> Result<(), ChaosError> {
        if self.experiment.trim().is_empty() {
            return Err(ChaosError::Config("experiment name cannot be empty".into()));
        }
        if self.affected_percentage > 100 {
            return Err(ChaosError::Config(format!(
                "affected percentage {} exceeds 100",
                self.affected_percentage
            )));
        }
        if self.status_delay.is_zero() {
            return Err(ChaosError::Config("status delay must be non-zero".into()));
        }
        if let IntervalPolicy::Random { lower, upper } = self.interval {
            if lower > upper {
                return Err(ChaosError::Config(format!(
                    "random interval lower bound {:?} exceeds upper bound {:?}",
                    lower, upper
                )));
            }
        }
        Ok(())
    }

    /// Resolve an experiment section into a spec. Range tunables and the
    /// `random` sequence are drawn here, once, from the seeded RNG.
    pub fn from_config(config: &ExperimentConfig) -> Result<Self, ChaosError> {
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let affected_percentage = match config.affected_percentage {
            PercentageTunable::Fixed(value) => value,
            PercentageTunable::Range { low, high } => rng.gen_range(low..=high),
        };

        let mode = match config.sequence {
            SequenceSetting::Serial => ExecutionMode::Serial,
            SequenceSetting::Parallel => ExecutionMode::Parallel,
            SequenceSetting::Random => {
                if rng.gen_bool(0.5) {
                    ExecutionMode::Serial
                } else {
                    ExecutionMode::Parallel
                }
            }
        };

        let interval = if config.randomness {
            match config.interval_max {
                Some(upper) => IntervalPolicy::Random {
                    lower: config.interval,
                    upper,
                },
                None => IntervalPolicy::Random {
                    lower: Duration::ZERO,
                    upper: config.interval,
                },
            }
        } else {
            IntervalPolicy::Fixed(config.interval)
        };

        let spec = Self {
            experiment: config.name.clone(),
            target_kind: config.target_kind.clone(),
            duration: config.duration,
            interval,
            ramp_time: config.ramp_time,
            mode,
            affected_percentage,
            randomize_order: config.randomize_order,
            seed: config.seed,
            status_timeout: config.status_timeout,
            status_delay: config.status_delay,
            abort_grace: config.abort_grace,
        };
        spec.validate()?;
        debug!(
            target: "r_chaos::spec",
            experiment = %spec.experiment,
            mode = ?spec.mode,
            affected_percentage = spec.affected_percentage,
            "resolved chaos spec"
        );
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use r_chaos_common::AppConfig;

    fn experiment(extra: &str) -> ExperimentConfig {
        let raw = format!("[experiment]\nname = \"pod-delete\"\nseed = 11\n{}", extra);
        raw.parse::<AppConfig>().unwrap().experiment
    }

    #[test]
    fn range_percentage_resolves_inside_bounds() {
        let spec = ChaosSpec::from_config(&experiment("affected_percentage = \"20-40\"")).unwrap();
        assert!((20..=40).contains(&spec.affected_percentage));
        let again = ChaosSpec::from_config(&experiment("affected_percentage = \"20-40\"")).unwrap();
        assert_eq!(spec.affected_percentage, again.affected_percentage);
    }

    #[test]
    fn random_interval_without_upper_bound_starts_at_zero() {
        let spec = ChaosSpec::from_config(&experiment("interval = 4\nrandomness = true")).unwrap();
        assert_eq!(
            spec.interval,
            IntervalPolicy::Random {
                lower: Duration::ZERO,
                upper: Duration::from_secs(4)
            }
        );
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..32 {
            assert!(spec.interval.next(&mut rng) <= Duration::from_secs(4));
        }
    }

    #[test]
    fn random_sequence_resolves_to_concrete_mode() {
        let spec = ChaosSpec::from_config(&experiment("sequence = \"random\"")).unwrap();
        assert!(matches!(spec.mode, ExecutionMode::Serial | ExecutionMode::Parallel));
    }

    #[test]
    fn validate_rejects_bad_specs() {
        assert!(ChaosSpec::new("").validate().is_err());
        assert!(ChaosSpec::new("x")
            .with_affected_percentage(101)
            .validate()
            .is_err());
        assert!(ChaosSpec::new("x")
            .with_status_checks(Duration::from_secs(1), Duration::ZERO)
            .validate()
            .is_err());
        assert!(ChaosSpec::new("x")
            .with_random_interval(Duration::from_secs(3), Duration::from_secs(1))
            .validate()
            .is_err());
        assert!(ChaosSpec::new("x").validate().is_ok());
    }
}
