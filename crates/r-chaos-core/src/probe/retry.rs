//! ---
//! chaos_section: "02-chaos-lifecycle"
//! chaos_subsection: "module"
//! chaos_type: "source"
//! chaos_scope: "code"
//! chaos_description: "Bounded retry policy for probe attempts."
//! chaos_version: "v0.1.0"
//! chaos_owner: "tbd"
//! ---
use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, timeout, Instant};
use tracing::debug;

/// Up to `attempts` tries, each bounded by `timeout`, separated by `interval`.
///
/// Worst case wall time is `attempts * timeout + (attempts - 1) * interval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub timeout: Duration,
    pub interval: Duration,
}

/// Why a single attempt did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptFailure {
    TimedOut(Duration),
    Failed(String),
}

impl std::fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptFailure::TimedOut(limit) => write!(f, "attempt timed out after {:?}", limit),
            AttemptFailure::Failed(reason) => f.write_str(reason),
        }
    }
}

/// All attempts were used up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryExhausted {
    pub attempts: u32,
    pub last: AttemptFailure,
    pub elapsed: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, timeout: Duration, interval: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            timeout,
            interval,
        }
    }

    /// Run `operation` until it succeeds or the budget is spent. The closure
    /// receives the 1-indexed attempt number.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T, RetryExhausted>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, String>>,
    {
        let started = Instant::now();
        let mut last = AttemptFailure::Failed("no attempt made".into());
        for attempt in 1..=self.attempts {
            match timeout(self.timeout, operation(attempt)).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(reason)) => last = AttemptFailure::Failed(reason),
                Err(_) => last = AttemptFailure::TimedOut(self.timeout),
            }
            debug!(
                target: "r_chaos::probe::retry",
                attempt,
                attempts = self.attempts,
                failure = %last,
                "probe attempt failed"
            );
            if attempt < self.attempts {
                sleep(self.interval).await;
            }
        }
        Err(RetryExhausted {
            attempts: self.attempts,
            last,
            elapsed: started.elapsed(),
        })
    }
}
