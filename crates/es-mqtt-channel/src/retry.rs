//! Exponential reconnect backoff.

use std::time::Duration;

/// Capped exponential backoff between connection attempts.
///
/// `current_delay` always stays within `[initial_delay, max_delay]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    current_delay: Duration,
    initial_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    /// Build a policy. A `max_delay` below `initial_delay` is raised to it.
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        let max_delay = max_delay.max(initial_delay);
        Self {
            current_delay: initial_delay,
            initial_delay,
            max_delay,
        }
    }

    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Record a failed attempt.
    ///
    /// Returns the delay to wait before the next attempt, then doubles the
    /// stored delay (capped at `max_delay`).
    pub fn record_failure(&mut self) -> Duration {
        let delay = self.current_delay;
        self.current_delay = delay.saturating_mul(2).min(self.max_delay);
        delay
    }

    /// Back to `initial_delay` after a successful connection.
    pub fn reset(&mut self) {
        self.current_delay = self.initial_delay;
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(300))
    }
}
