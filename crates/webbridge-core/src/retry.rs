//! Backoff schedule shared by the handshake's ack window and the outbox.
//!
//! Attempt `n` waits `base * 2^n` milliseconds, capped at `max`. A zero base
//! means no wait at all between sends.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    base_delay_ms: u64,
    max_delay_ms: u64,
}

impl RetryPolicy {
    /// `max_delay_ms` is raised to `base_delay_ms` if it is smaller.
    pub fn new(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms: max_delay_ms.max(base_delay_ms),
        }
    }

    pub fn base_delay_ms(&self) -> u64 {
        self.base_delay_ms
    }

    pub fn max_delay_ms(&self) -> u64 {
        self.max_delay_ms
    }

    /// Wait after send number `attempt` (zero-based) before the next one.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let doublings = attempt.min(20);
        let millis = self
            .base_delay_ms
            .saturating_mul(1_u64 << doublings)
            .min(self.max_delay_ms);
        Duration::from_millis(millis)
    }

    /// Sum of the waits after the first `attempts` sends.
    pub fn total_for(&self, attempts: u32) -> Duration {
        (0..attempts).map(|attempt| self.delay_for_attempt(attempt)).sum()
    }
}

impl Default for RetryPolicy {
    /// 1 s, 2 s, 4 s, then 8 s per attempt.
    fn default() -> Self {
        Self::new(1_000, 8_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn millis(policy: &RetryPolicy, attempts: u32) -> Vec<u64> {
        (0..attempts)
            .map(|attempt| policy.delay_for_attempt(attempt).as_millis() as u64)
            .collect()
    }

    #[test]
    fn default_ack_window_doubles_up_to_eight_seconds() {
        let policy = RetryPolicy::default();
        assert_eq!(millis(&policy, 6), vec![1_000, 2_000, 4_000, 8_000, 8_000, 8_000]);
    }

    #[test]
    fn zero_base_resends_without_waiting() {
        let policy = RetryPolicy::new(0, 0);
        assert_eq!(millis(&policy, 4), vec![0, 0, 0, 0]);
        assert_eq!(policy.total_for(10), Duration::ZERO);

        // A cap alone does not create a wait.
        let capped = RetryPolicy::new(0, 5_000);
        assert_eq!(capped.delay_for_attempt(30), Duration::ZERO);
    }

    #[test]
    fn cap_is_raised_to_base() {
        let policy = RetryPolicy::new(500, 100);
        assert_eq!(policy.max_delay_ms(), 500);
        assert_eq!(millis(&policy, 3), vec![500, 500, 500]);
    }

    #[test]
    fn total_covers_every_wait() {
        let policy = RetryPolicy::new(200, 800);
        assert_eq!(policy.total_for(0), Duration::ZERO);
        assert_eq!(policy.total_for(3), Duration::from_millis(1_400));
    }

    #[test]
    fn late_attempts_stay_at_the_cap() {
        let policy = RetryPolicy::new(u64::MAX / 2, u64::MAX);
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_millis(u64::MAX));
    }
}
