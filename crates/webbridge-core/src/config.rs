//! Timing configuration for the handshake and the command outbox.

use std::time::Duration;

use crate::retry::RetryPolicy;

/// Default wait between reading the session and pushing it, covering the gap
/// between script injection and the surface's listener attaching.
pub const DEFAULT_PUSH_DELAY: Duration = Duration::from_millis(100);

/// Default wait between an ack and reporting `Synced`, so a loading indicator
/// keyed on sync state does not flicker.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// One push per ready or login. Re-pushing until acked is opt-in.
pub const DEFAULT_MAX_PUSH_ATTEMPTS: u32 = 1;

pub const DEFAULT_MAX_COMMAND_ATTEMPTS: u32 = 5;

/// Host-side handshake timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeConfig {
    pub push_delay: Duration,
    pub settle_delay: Duration,
    /// Wait for an ack after each push before pushing again.
    pub ack_retry: RetryPolicy,
    /// Total pushes per handshake, the first included. `1` disables re-pushing.
    pub max_push_attempts: u32,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            push_delay: DEFAULT_PUSH_DELAY,
            settle_delay: DEFAULT_SETTLE_DELAY,
            ack_retry: RetryPolicy::default(),
            max_push_attempts: DEFAULT_MAX_PUSH_ATTEMPTS,
        }
    }
}

impl HandshakeConfig {
    pub fn with_push_delay(mut self, delay: Duration) -> Self {
        self.push_delay = delay;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn with_ack_retry(mut self, policy: RetryPolicy) -> Self {
        self.ack_retry = policy;
        self
    }

    pub fn with_max_push_attempts(mut self, attempts: u32) -> Self {
        self.max_push_attempts = attempts.max(1);
        self
    }
}

/// Surface-side command redelivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxConfig {
    pub retry: RetryPolicy,
    /// Total sends per command, the first included.
    pub max_attempts: u32,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            max_attempts: DEFAULT_MAX_COMMAND_ATTEMPTS,
        }
    }
}

impl OutboxConfig {
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_defaults() {
        let config = HandshakeConfig::default();
        assert_eq!(config.push_delay, Duration::from_millis(100));
        assert_eq!(config.settle_delay, Duration::from_millis(500));
        assert_eq!(config.max_push_attempts, 1);
        assert_eq!(config.ack_retry, RetryPolicy::new(1_000, 8_000));
    }

    #[test]
    fn repushing_is_opt_in() {
        let config = HandshakeConfig::default().with_max_push_attempts(3);
        assert_eq!(config.max_push_attempts, 3);
        assert_ne!(config, HandshakeConfig::default());
    }

    #[test]
    fn max_push_attempts_is_at_least_one() {
        let config = HandshakeConfig::default().with_max_push_attempts(0);
        assert_eq!(config.max_push_attempts, 1);
    }

    #[test]
    fn outbox_builder_overrides() {
        let config = OutboxConfig::default()
            .with_retry(RetryPolicy::new(10, 20))
            .with_max_attempts(2);
        assert_eq!(config.retry.base_delay_ms(), 10);
        assert_eq!(config.max_attempts, 2);
    }
}
