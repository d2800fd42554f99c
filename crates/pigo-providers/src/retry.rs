//! Exponential backoff for transient provider failures.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts after the first (so 3 means up to 4 requests total).
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Ceiling applied to server-supplied Retry-After hints.
    pub max_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_retry_after: Duration::from_secs(60),
        }
    }
}

/// Tracks retry state for one logical request.
#[derive(Debug)]
pub struct Backoff {
    policy: RetryPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// The delay before the next retry, or None when retries are exhausted.
    /// A server hint wins over the computed backoff but is clamped to the
    /// configured ceiling.
    pub fn next_delay(&mut self, hint: Option<Duration>) -> Option<Duration> {
        if self.attempt >= self.policy.max_retries {
            return None;
        }
        let computed = self.policy.base_delay * 2u32.pow(self.attempt);
        self.attempt += 1;
        Some(match hint {
            Some(hint) => hint.min(self.policy.max_retry_after),
            None => computed,
        })
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_then_exhausts() {
        let mut backoff = Backoff::new(RetryPolicy::default());
        assert_eq!(backoff.next_delay(None), Some(Duration::from_millis(500)));
        assert_eq!(backoff.next_delay(None), Some(Duration::from_millis(1000)));
        assert_eq!(backoff.next_delay(None), Some(Duration::from_millis(2000)));
        assert_eq!(backoff.next_delay(None), None);
    }

    #[test]
    fn test_hint_wins_but_is_capped() {
        let mut backoff = Backoff::new(RetryPolicy::default());
        assert_eq!(
            backoff.next_delay(Some(Duration::from_secs(5))),
            Some(Duration::from_secs(5))
        );
        assert_eq!(
            backoff.next_delay(Some(Duration::from_secs(600))),
            Some(Duration::from_secs(60))
        );
    }

    #[test]
    fn test_zero_retries() {
        let mut backoff = Backoff::new(RetryPolicy {
            max_retries: 0,
            ..Default::default()
        });
        assert_eq!(backoff.next_delay(None), None);
    }
}
