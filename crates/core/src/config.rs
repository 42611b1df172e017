//! Timeout configuration read from the environment.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Per-operation time budgets. Kinds scale these for long operations (a
/// cluster create waits several read budgets).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    /// Budget for describe calls and status waits.
    pub read: Duration,
    /// Budget for issuing a mutation (create/modify/delete call retries).
    pub write: Duration,
    /// Sleep between status polls.
    pub poll_interval: Duration,
    /// Sleep between attempts of a retried call.
    pub retry_interval: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            read: Duration::from_secs(180),
            write: Duration::from_secs(300),
            poll_interval: Duration::from_secs(5),
            retry_interval: Duration::from_secs(1),
        }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|s| s.parse::<u64>().ok())
}

impl Timeouts {
    /// Defaults overridden by `CONVERGE_READ_TIMEOUT_SECS`,
    /// `CONVERGE_WRITE_TIMEOUT_SECS`, `CONVERGE_POLL_INTERVAL_MS` and
    /// `CONVERGE_RETRY_INTERVAL_MS`.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            read: env_u64("CONVERGE_READ_TIMEOUT_SECS").map(Duration::from_secs).unwrap_or(d.read),
            write: env_u64("CONVERGE_WRITE_TIMEOUT_SECS").map(Duration::from_secs).unwrap_or(d.write),
            poll_interval: env_u64("CONVERGE_POLL_INTERVAL_MS").map(Duration::from_millis).unwrap_or(d.poll_interval),
            retry_interval: env_u64("CONVERGE_RETRY_INTERVAL_MS").map(Duration::from_millis).unwrap_or(d.retry_interval),
        }
    }

    /// Same budget for reads and writes, same interval for polls and retries.
    pub fn uniform(budget: Duration, interval: Duration) -> Self {
        Self { read: budget, write: budget, poll_interval: interval, retry_interval: interval }
    }
}
