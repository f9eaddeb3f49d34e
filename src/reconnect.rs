//! Reconnect delay policies.
//!
//! A dialing connection consults its [`ReconnectPolicy`] after every failed
//! dial and after every lost stream to decide how long to wait before
//! dialing again.
//!
//! # Policies
//!
//! - [`FixedDelay`]: the same delay every time, retry forever (default)
//! - [`ExponentialBackoff`]: growing delay with ±25% jitter, capped at
//!   `max_delay`, still retrying forever
//!
//! Whether a failed dial is retried at all is decided by
//! [`RpcConfig::reconnect`](crate::RpcConfig::reconnect), not by the policy.

use std::collections::hash_map::RandomState;
use std::fmt::Debug;
use std::hash::BuildHasher;
use std::time::Duration;

/// Decides the pause before the next dial attempt.
pub trait ReconnectPolicy: Debug + Send + Sync + 'static {
    /// Delay before dial attempt number `attempt + 1`.
    ///
    /// `attempt` counts consecutive failures and restarts at zero after a
    /// successful dial.
    fn delay(&self, attempt: u32) -> Duration;
}

/// Constant pause between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDelay(pub Duration);

impl Default for FixedDelay {
    /// Three seconds.
    fn default() -> Self {
        Self(Duration::from_secs(3))
    }
}

impl ReconnectPolicy for FixedDelay {
    fn delay(&self, _attempt: u32) -> Duration {
        self.0
    }
}

/// Exponential backoff with jitter.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Delay after the first failure.
    pub initial_delay: Duration,

    /// Factor applied per consecutive failure.
    ///
    /// Example: 2.0 doubles the delay each time.
    pub multiplier: f32,

    /// Upper bound for the un-jittered delay.
    pub max_delay: Duration,
}

impl Default for ExponentialBackoff {
    /// - `initial_delay`: 100ms
    /// - `multiplier`: 2.0
    /// - `max_delay`: 30s
    fn default() -> Self {
        // ---
        Self {
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        // ---
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let factor = f64::from(self.multiplier).powi(exponent);
        let base = self.initial_delay.as_secs_f64() * factor;
        let capped = if base.is_finite() {
            base.min(self.max_delay.as_secs_f64())
        } else {
            self.max_delay.as_secs_f64()
        };
        apply_jitter(Duration::from_secs_f64(capped))
    }
}

/// Apply ±25% jitter to a duration to prevent thundering herd.
///
/// Uses a simple multiplicative jitter: `delay * (0.75 + random(0.0..0.5))`
fn apply_jitter(delay: Duration) -> Duration {
    // ---
    let random_state = RandomState::new();
    let hash = random_state.hash_one(std::time::SystemTime::now());

    // 0.0..1.0
    let random_factor = (hash % 1000) as f64 / 1000.0;
    let jitter_multiplier = 0.75 + (random_factor * 0.5);

    Duration::from_secs_f64(delay.as_secs_f64() * jitter_multiplier)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_fixed_delay_ignores_attempt() {
        // ---
        let policy = FixedDelay(Duration::from_millis(250));
        assert_eq!(policy.delay(0), Duration::from_millis(250));
        assert_eq!(policy.delay(1000), Duration::from_millis(250));
        assert_eq!(FixedDelay::default().delay(0), Duration::from_secs(3));
    }

    #[test]
    fn test_backoff_grows_within_jitter() {
        // ---
        let policy = ExponentialBackoff {
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
        };

        // attempt 2 → 400ms ± 25%
        let d = policy.delay(2);
        assert!(d >= Duration::from_millis(300), "too short: {d:?}");
        assert!(d <= Duration::from_millis(500), "too long: {d:?}");
    }

    #[test]
    fn test_backoff_is_capped() {
        // ---
        let policy = ExponentialBackoff {
            initial_delay: Duration::from_millis(10),
            multiplier: 10.0,
            max_delay: Duration::from_millis(50),
        };

        for attempt in [5, 64, u32::MAX] {
            let d = policy.delay(attempt);
            assert!(d <= Duration::from_micros(62_500), "cap not applied: {d:?}");
        }
    }

    #[test]
    fn test_jitter_range() {
        // ---
        let delay = Duration::from_millis(100);

        for _ in 0..100 {
            let jittered = apply_jitter(delay);
            assert!(jittered >= Duration::from_millis(75), "jitter too low: {jittered:?}");
            assert!(jittered <= Duration::from_millis(125), "jitter too high: {jittered:?}");
        }
    }
}
