//! Bounded exponential backoff for stream reconnection.

use std::time::Duration;

use rand::Rng;

/// How a dropped stream is retried.
///
/// Delays grow as `initial_delay * factor^attempt`, capped at `max_delay`,
/// with `jitter` (0.0–1.0) of the delay randomized. After `max_attempts`
/// consecutive failures the connection gives up; `None` retries forever.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    pub jitter: f64,
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            factor: 2.0,
            jitter: 0.1,
            max_attempts: Some(5),
        }
    }
}

impl ReconnectPolicy {
    /// A policy that never reconnects.
    pub fn never() -> Self {
        Self {
            max_attempts: Some(0),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.initial_delay.is_zero() {
            return Err("Initial reconnect delay must be > 0".to_string());
        }
        if self.max_delay < self.initial_delay {
            return Err("Max reconnect delay must be >= initial reconnect delay".to_string());
        }
        if self.factor < 1.0 || !self.factor.is_finite() {
            return Err("Backoff factor must be >= 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.jitter) || !self.jitter.is_finite() {
            return Err("Jitter must be between 0.0 and 1.0".to_string());
        }
        Ok(())
    }

    /// Whether another attempt is allowed after `attempt` consecutive failures.
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt < max)
    }

    /// Delay before the reconnect following `attempt` consecutive failures,
    /// or `None` once the policy is exhausted.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if !self.allows(attempt) {
            return None;
        }

        let exponent = self.factor.powf(f64::from(attempt));
        let base = (self.initial_delay.as_secs_f64() * exponent).min(self.max_delay.as_secs_f64());

        if self.jitter == 0.0 || base == 0.0 {
            return Some(Duration::from_secs_f64(base));
        }

        let randomized = rand::rng().random_range(0.0..=base);
        Some(Duration::from_secs_f64(
            base * (1.0 - self.jitter) + randomized * self.jitter,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            factor: 2.0,
            jitter: 0.0,
            max_attempts: Some(5),
        }
    }

    #[test]
    fn test_exponential_growth_and_cap() {
        let policy = no_jitter();
        assert_eq!(policy.next_delay(0), Some(Duration::from_millis(100)));
        assert_eq!(policy.next_delay(1), Some(Duration::from_millis(200)));
        assert_eq!(policy.next_delay(3), Some(Duration::from_millis(800)));
        assert_eq!(policy.next_delay(4), Some(Duration::from_millis(1000)));
    }

    #[test]
    fn test_exhaustion() {
        let policy = no_jitter();
        assert!(policy.allows(4));
        assert!(!policy.allows(5));
        assert_eq!(policy.next_delay(5), None);

        assert_eq!(ReconnectPolicy::never().next_delay(0), None);

        let unbounded = ReconnectPolicy {
            max_attempts: None,
            ..no_jitter()
        };
        assert_eq!(unbounded.next_delay(1_000), Some(Duration::from_millis(1000)));
    }

    #[test]
    fn test_jitter_stays_within_base() {
        let policy = ReconnectPolicy {
            jitter: 1.0,
            ..no_jitter()
        };
        for _ in 0..100 {
            let delay = policy.next_delay(2).expect("allowed");
            assert!(delay <= Duration::from_millis(400));
        }
    }

    #[test]
    fn test_validate() {
        assert!(ReconnectPolicy::default().validate().is_ok());
        assert!(
            ReconnectPolicy {
                initial_delay: Duration::ZERO,
                ..no_jitter()
            }
            .validate()
            .is_err()
        );
        assert!(
            ReconnectPolicy {
                factor: 0.5,
                ..no_jitter()
            }
            .validate()
            .is_err()
        );
        assert!(
            ReconnectPolicy {
                jitter: 1.5,
                ..no_jitter()
            }
            .validate()
            .is_err()
        );
        assert!(
            ReconnectPolicy {
                max_delay: Duration::from_millis(10),
                ..no_jitter()
            }
            .validate()
            .is_err()
        );
    }
}
