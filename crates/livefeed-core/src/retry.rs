//! Reconnect policy and linear backoff.
//!
//! - [`ReconnectPolicy`]: the constants (attempt cap, base delay, optional
//!   stable-uptime threshold)
//! - [`ReconnectState`]: the attempt counter the lifecycle controller mutates
//! - [`RetryDecision`]: what to do after an unexpected close
//!
//! Backoff is linear: attempt `n` waits `n * base_delay`.

use std::time::Duration;

/// Default cap on consecutive reconnect attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Default base delay between attempts.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(2000);

/// Reconnect constants.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Maximum consecutive attempts before giving up.
    pub max_attempts: u32,
    /// Delay unit; attempt `n` waits `n * base_delay`.
    pub base_delay: Duration,
    /// When set, the counter is only reset if the channel stayed open at
    /// least this long. When unset, every successful open resets it.
    pub min_stable_uptime: Option<Duration>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            min_stable_uptime: None,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given 1-based attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

/// Outcome of asking the policy for another attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Schedule attempt number `attempt` after `delay`.
    Retry {
        /// 1-based attempt number.
        attempt: u32,
        /// How long to wait first.
        delay: Duration,
    },
    /// The cap was reached.
    Exhausted {
        /// Attempts made in this outage.
        attempts: u32,
    },
}

/// Consecutive-attempt counter.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconnectState {
    attempt_count: u32,
}

impl ReconnectState {
    /// Attempts made since the last reset.
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Back to zero, after a successful open or an explicit reconnect.
    pub fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Consume one attempt if the cap allows it.
    pub fn next_retry(&mut self, policy: &ReconnectPolicy) -> RetryDecision {
        if self.attempt_count < policy.max_attempts {
            self.attempt_count += 1;
            RetryDecision::Retry {
                attempt: self.attempt_count,
                delay: policy.delay_for_attempt(self.attempt_count),
            }
        } else {
            RetryDecision::Exhausted {
                attempts: self.attempt_count,
            }
        }
    }
}
