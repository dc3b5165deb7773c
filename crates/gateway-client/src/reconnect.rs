//! Reconnect backoff.
//!
//! Delays follow an explicit schedule for the first attempts, then double
//! from the last scheduled value until they reach the cap:
//!
//! ```text
//! attempt:  0     1     2     3     4      5      6 ...
//! delay:    500   1000  2000  5000  10000  20000  30000 (cap)
//! ```
//!
//! Scheduling itself (at most one pending timer, never while an attempt is
//! in flight) is enforced by the connection manager; this module only does
//! the arithmetic and the attempt bookkeeping.

use std::time::Duration;

/// Base delay used when the explicit schedule is empty.
const FALLBACK_BASE_DELAY: Duration = Duration::from_millis(1000);
/// No delay, scheduled or capped, is ever shorter than this.
pub const MIN_RECONNECT_DELAY: Duration = Duration::from_millis(10);

/// Pure mapping from attempt count to delay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    schedule: Vec<Duration>,
    max_delay: Duration,
}

impl ReconnectPolicy {
    /// Build a policy from an explicit schedule and a cap.
    ///
    /// Schedule entries above the cap are clamped to it. Both the cap and
    /// the entries are raised to [`MIN_RECONNECT_DELAY`].
    pub fn new(schedule: Vec<Duration>, max_delay: Duration) -> Self {
        let max_delay = max_delay.max(MIN_RECONNECT_DELAY);
        let schedule = schedule
            .into_iter()
            .map(|d| d.clamp(MIN_RECONNECT_DELAY, max_delay))
            .collect();
        Self {
            schedule,
            max_delay,
        }
    }

    /// Build a policy from millisecond values.
    pub fn from_millis(schedule_ms: &[u64], max_delay_ms: u64) -> Self {
        Self::new(
            schedule_ms.iter().copied().map(Duration::from_millis).collect(),
            Duration::from_millis(max_delay_ms),
        )
    }

    /// Delay before reconnect attempt number `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let idx = attempt as usize;
        if let Some(delay) = self.schedule.get(idx) {
            return *delay;
        }

        let (base, doublings) = match self.schedule.last() {
            Some(last) => (*last, idx - self.schedule.len() + 1),
            None => (FALLBACK_BASE_DELAY.min(self.max_delay), idx),
        };
        #[allow(clippy::cast_possible_truncation)]
        let factor = 1u32 << doublings.min(31) as u32;
        base.saturating_mul(factor).min(self.max_delay)
    }

    /// Upper bound for every delay.
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }
}

/// Consecutive-failure counter.
///
/// Incremented on every failed attempt, reset on every authenticated
/// connection.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Backoff {
    attempt: u32,
}

impl Backoff {
    /// Start with no recorded failures.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure and return the delay to wait before retrying.
    pub fn next_delay(&mut self, policy: &ReconnectPolicy) -> Duration {
        let delay = policy.delay_for(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Forget previous failures.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Failures recorded since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
