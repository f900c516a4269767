//! Reconnect backoff policy.

use std::time::Duration;

use rand::Rng;

use tether_core::config::SocketConfig;

/// Exponential backoff: `min(base * multiplier^attempts, max)`, optionally
/// spread by a random jitter.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Delay cap.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Consecutive failed attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
    /// Jitter factor (0.0 to 1.0); each delay moves by up to this fraction.
    pub jitter_factor: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&SocketConfig::default())
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &SocketConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_backoff_ms),
            max_delay: Duration::from_millis(config.max_backoff_ms),
            multiplier: config.backoff_multiplier,
            max_attempts: config.max_reconnect_attempts,
            jitter_factor: config.jitter_factor.clamp(0.0, 1.0),
        }
    }

    /// Delay before the retry that follows `attempts` failed attempts.
    ///
    /// Without jitter the sequence is non-decreasing and never exceeds
    /// `max_delay`.
    pub fn delay(&self, attempts: u32) -> Duration {
        let base = self.base_delay.as_secs_f64();
        let max = self.max_delay.as_secs_f64();
        let exponent = attempts.min(i32::MAX as u32) as i32;
        let exponential = (base * self.multiplier.max(1.0).powi(exponent)).min(max);

        if self.jitter_factor <= 0.0 {
            return Duration::from_secs_f64(exponential);
        }

        let spread = exponential * self.jitter_factor;
        let jitter = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_secs_f64((exponential + jitter).clamp(0.0, max))
    }

    /// Whether `attempts` consecutive failures exhaust the policy.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        self.max_attempts > 0 && attempts >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            multiplier: 2.0,
            max_attempts: 5,
            jitter_factor: 0.0,
        }
    }

    #[test]
    fn test_delay_sequence() {
        let policy = policy();
        let delays: Vec<u128> = (0..7).map(|a| policy.delay(a).as_millis()).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16_000, 30_000, 30_000]);
    }

    #[test]
    fn test_delay_non_decreasing_and_capped() {
        let policy = policy();
        let mut previous = Duration::ZERO;
        for attempt in 0..64 {
            let delay = policy.delay(attempt);
            assert!(delay >= previous);
            assert!(delay <= policy.max_delay);
            previous = delay;
        }
        assert_eq!(policy.delay(u32::MAX), policy.max_delay);
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = ReconnectPolicy {
            jitter_factor: 0.3,
            ..policy()
        };
        for _ in 0..100 {
            let d = policy.delay(1).as_millis();
            assert!((1399..=2600).contains(&d), "delay {d} out of range");
        }
    }

    #[test]
    fn test_exhaustion() {
        let policy = policy();
        assert!(!policy.is_exhausted(4));
        assert!(policy.is_exhausted(5));

        let unlimited = ReconnectPolicy {
            max_attempts: 0,
            ..policy
        };
        assert!(!unlimited.is_exhausted(10_000));
    }

    #[test]
    fn test_from_default_config() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
        assert_eq!(policy.max_attempts, 10);
        assert_eq!(policy.jitter_factor, 0.0);
    }
}
