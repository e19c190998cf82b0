//! Store reconnect policy.
//!
//! Delays grow linearly per attempt and are capped; retrying stops after a
//! maximum attempt count, after a maximum cumulative retry window, or at once
//! when the server refuses connections.

use std::time::Duration;

const DEFAULT_STEP: Duration = Duration::from_millis(100);
const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(3000);
const DEFAULT_MAX_ATTEMPTS: u32 = 10;
const DEFAULT_MAX_ELAPSED: Duration = Duration::from_secs(60 * 60);

/// Outcome of consulting the policy after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp(GiveUpReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUpReason {
    ConnectionRefused,
    AttemptsExhausted,
    WindowExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub step: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            step: DEFAULT_STEP,
            max_delay: DEFAULT_MAX_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_elapsed: DEFAULT_MAX_ELAPSED,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt number `attempt` (1-based), ignoring limits.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.step.saturating_mul(attempt).min(self.max_delay)
    }

    /// Decide whether to retry after `attempt` failed attempts spanning
    /// `elapsed` in total.
    pub fn next(&self, attempt: u32, elapsed: Duration, refused: bool) -> RetryDecision {
        if refused {
            return RetryDecision::GiveUp(GiveUpReason::ConnectionRefused);
        }
        if elapsed > self.max_elapsed {
            return RetryDecision::GiveUp(GiveUpReason::WindowExhausted);
        }
        if attempt > self.max_attempts {
            return RetryDecision::GiveUp(GiveUpReason::AttemptsExhausted);
        }
        RetryDecision::RetryAfter(self.delay(attempt))
    }
}
