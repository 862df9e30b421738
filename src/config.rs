//! Dispatch timing configuration.

use std::time::{Duration, Instant};

/// Short re-check interval for a worker's completion wait.
const DEFAULT_WAIT_INTERVAL: Duration = Duration::from_millis(25);

/// Overall ceiling on one worker's wait for a runtime result.
const DEFAULT_WAIT_CEILING: Duration = Duration::from_secs(120);

/// Tunables for the worker-side completion wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    /// How often a blocked worker re-checks the completed flag.
    pub wait_interval: Duration,
    /// Total wait budget before `submit_and_await` gives up with `Timeout`.
    pub wait_ceiling: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            wait_interval: DEFAULT_WAIT_INTERVAL,
            wait_ceiling: DEFAULT_WAIT_CEILING,
        }
    }
}

impl DispatchConfig {
    /// Defaults overridden by `EVALBRIDGE_WAIT_INTERVAL_MS` and
    /// `EVALBRIDGE_WAIT_CEILING_MS` where set and parseable.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            wait_interval: env_ms("EVALBRIDGE_WAIT_INTERVAL_MS")
                .unwrap_or(defaults.wait_interval),
            wait_ceiling: env_ms("EVALBRIDGE_WAIT_CEILING_MS").unwrap_or(defaults.wait_ceiling),
        }
    }

    /// Resolve into a concrete wait policy for one submission.
    ///
    /// The deadline is fixed at submit time; the per-iteration wait is
    /// clamped to the remaining budget rather than recomputed, so clock-tick
    /// jitter cannot stretch the total wait.
    #[must_use]
    pub fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy {
            interval: self.wait_interval.max(Duration::from_millis(1)),
            deadline: Instant::now() + self.wait_ceiling,
        }
    }
}

/// A resolved (interval, deadline) pair governing one completion wait.
#[derive(Debug, Clone, Copy)]
pub struct WaitPolicy {
    pub interval: Duration,
    pub deadline: Instant,
}

impl WaitPolicy {
    /// Remaining budget, or `None` once the deadline has passed.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.checked_duration_since(Instant::now())
    }
}

fn env_ms(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = DispatchConfig::default();
        assert_eq!(config.wait_interval, Duration::from_millis(25));
        assert_eq!(config.wait_ceiling, Duration::from_secs(120));
    }

    #[test]
    fn wait_policy_budget_shrinks() {
        let config = DispatchConfig {
            wait_interval: Duration::from_millis(5),
            wait_ceiling: Duration::from_millis(50),
        };
        let policy = config.wait_policy();
        let first = policy.remaining().expect("fresh policy has budget");
        assert!(first <= Duration::from_millis(50));
        std::thread::sleep(Duration::from_millis(60));
        assert!(policy.remaining().is_none());
    }
}
