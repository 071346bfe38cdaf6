//! Parameterized exponential backoff.
//!
//! Both the transport reconnect loop and the trigger dispatcher retry through
//! this policy instead of ad hoc sleeps: base delay doubled per attempt,
//! capped at a max delay, with a jitter fraction applied on top.

use rand::Rng;
use std::time::Duration;

/// Backoff parameters.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Maximum number of retry attempts. `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Jitter fraction in [0, 1]; each delay is scaled by a random factor
    /// in `[1 - jitter, 1 + jitter]`
    pub jitter: f64,
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: Option<u32>) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts,
            jitter: 0.1,
        }
    }

    /// Raw (jitter-free) delay for a zero-based attempt index.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        // Shift saturates well before Duration overflows in practice.
        let factor = 1u64 << attempt.min(20);
        let raw = self.base_delay.saturating_mul(factor as u32);
        raw.min(self.max_delay)
    }
}

/// Stateful backoff derived from a policy. Create one per retry loop.
#[derive(Debug)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Next delay to wait before retrying, or `None` once attempts are
    /// exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max) = self.policy.max_attempts {
            if self.attempt >= max {
                return None;
            }
        }
        let base = self.policy.delay_for(self.attempt);
        self.attempt += 1;
        Some(apply_jitter(base, self.policy.jitter))
    }

    /// Attempts consumed so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Reset after a successful operation.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 || delay.is_zero() {
        return delay;
    }
    let jitter = jitter.min(1.0);
    let factor = rand::thread_rng().gen_range(1.0 - jitter..=1.0 + jitter);
    delay.mul_f64(factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(ms: u64, max_ms: u64, attempts: Option<u32>) -> BackoffPolicy {
        let mut p = BackoffPolicy::new(
            Duration::from_millis(ms),
            Duration::from_millis(max_ms),
            attempts,
        );
        p.jitter = 0.0;
        p
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let p = policy(100, 1000, None);
        assert_eq!(p.delay_for(0), Duration::from_millis(100));
        assert_eq!(p.delay_for(1), Duration::from_millis(200));
        assert_eq!(p.delay_for(2), Duration::from_millis(400));
        assert_eq!(p.delay_for(3), Duration::from_millis(800));
        assert_eq!(p.delay_for(4), Duration::from_millis(1000));
        assert_eq!(p.delay_for(30), Duration::from_millis(1000));
    }

    #[test]
    fn test_bounded_attempts_exhaust() {
        let mut backoff = Backoff::new(policy(10, 100, Some(3)));
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
        assert_eq!(backoff.attempts(), 3);
    }

    #[test]
    fn test_reset_restarts_sequence() {
        let mut backoff = Backoff::new(policy(10, 100, Some(1)));
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
        backoff.reset();
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(10)));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let mut p = policy(100, 1000, None);
        p.jitter = 0.5;
        for attempt in 0..4 {
            let raw = p.delay_for(attempt);
            let jittered = apply_jitter(raw, p.jitter);
            assert!(jittered >= raw.mul_f64(0.5));
            assert!(jittered <= raw.mul_f64(1.5));
        }
    }
}
