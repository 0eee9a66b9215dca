//! Retry delay sequence for connection attempts.

use std::time::Duration;

use super::base::BackoffConfig;

/// Stateful view over a [`BackoffConfig`].
///
/// One instance covers one connect call. Delays never decrease across
/// consecutive failures.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    failures: u32,
    last_delay_ms: u64,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            failures: 0,
            last_delay_ms: 0,
        }
    }

    /// Failed attempts recorded so far.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Record a failed attempt and return the delay before the next one, or
    /// `None` once the attempt budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.failures = self.failures.saturating_add(1);
        if !self.config.should_retry(self.failures) {
            return None;
        }
        let delay = self
            .config
            .calculate_delay(self.failures)
            .max(self.last_delay_ms);
        self.last_delay_ms = delay;
        Some(Duration::from_millis(delay))
    }
}
