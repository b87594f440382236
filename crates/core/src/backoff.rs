//! Exponential backoff with a cap and bounded jitter.
//!
//! Used for the poll interval when the Grid queue is empty, for transient
//! Grid transport failures and for submit retries.

use std::time::Duration;

use rand::Rng;

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay used for the first wait and after every reset.
    pub initial_delay: Duration,
    /// Upper bound on any delay, jitter included.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    /// Extra random fraction of the base delay, in `0.0..=multiplier - 1.0`.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

impl BackoffPolicy {
    /// Jitter is capped at `multiplier - 1` so that a jittered delay never
    /// exceeds the next un-jittered one: the sequence stays non-decreasing.
    fn effective_jitter(&self) -> f64 {
        self.jitter.clamp(0.0, (self.multiplier - 1.0).max(0.0))
    }
}

/// Calculate the next base delay from the current delay and policy.
///
/// The result is clamped to [`BackoffPolicy::max_delay`].
pub fn next_delay(current: Duration, policy: &BackoffPolicy) -> Duration {
    let next_ms = (current.as_millis() as f64 * policy.multiplier.max(1.0)) as u64;
    Duration::from_millis(next_ms).min(policy.max_delay)
}

/// Apply jitter to a base delay, never exceeding the cap.
///
/// `roll` is a uniform sample in `0.0..=1.0`.
pub fn jittered(base: Duration, roll: f64, policy: &BackoffPolicy) -> Duration {
    let extra = base.as_secs_f64() * policy.effective_jitter() * roll.clamp(0.0, 1.0);
    (base + Duration::from_secs_f64(extra)).min(policy.max_delay)
}

/// Stateful backoff tracker.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    /// Base delay for the next wait; `None` right after a reset.
    current: Option<Duration>,
    failures: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            current: None,
            failures: 0,
        }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Consecutive failures recorded since the last reset.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Record a failure and return how long to wait before retrying.
    pub fn next_delay(&mut self) -> Duration {
        let roll = rand::rng().random_range(0.0..=1.0);
        self.next_delay_with(roll)
    }

    /// Same as [`Backoff::next_delay`] with an explicit jitter roll.
    pub fn next_delay_with(&mut self, roll: f64) -> Duration {
        let base = match self.current {
            None => self.policy.initial_delay.min(self.policy.max_delay),
            Some(prev) => next_delay(prev, &self.policy),
        };
        self.current = Some(base);
        self.failures = self.failures.saturating_add(1);
        jittered(base, roll, &self.policy)
    }

    /// Forget accumulated failures; the next delay is the initial one.
    pub fn reset(&mut self) {
        self.current = None;
        self.failures = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> BackoffPolicy {
        BackoffPolicy {
            jitter: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn next_delay_doubles() {
        let d = next_delay(Duration::from_secs(1), &BackoffPolicy::default());
        assert_eq!(d, Duration::from_secs(2));
    }

    #[test]
    fn next_delay_clamps_at_max() {
        let policy = BackoffPolicy {
            max_delay: Duration::from_secs(10),
            ..Default::default()
        };
        assert_eq!(next_delay(Duration::from_secs(8), &policy), Duration::from_secs(10));
        assert_eq!(next_delay(Duration::from_secs(10), &policy), Duration::from_secs(10));
    }

    #[test]
    fn full_backoff_sequence() {
        let mut backoff = Backoff::new(no_jitter());
        let expected = [1, 2, 4, 8, 16, 30, 30, 30];
        for &secs in &expected {
            assert_eq!(backoff.next_delay().as_secs(), secs);
        }
        assert_eq!(backoff.failures(), expected.len() as u32);
    }

    #[test]
    fn reset_returns_to_initial() {
        let mut backoff = Backoff::new(no_jitter());
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.failures(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn jitter_is_bounded_by_cap() {
        let policy = BackoffPolicy::default();
        let d = jittered(Duration::from_secs(30), 1.0, &policy);
        assert_eq!(d, policy.max_delay);
    }

    #[test]
    fn jitter_cannot_exceed_growth_factor() {
        let policy = BackoffPolicy {
            multiplier: 1.5,
            jitter: 3.0,
            ..Default::default()
        };
        let d = jittered(Duration::from_secs(2), 1.0, &policy);
        assert_eq!(d, Duration::from_secs(3));
    }

    #[test]
    fn jittered_sequence_is_non_decreasing_and_capped() {
        let policy = BackoffPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: 0.5,
        };
        for _ in 0..200 {
            let mut backoff = Backoff::new(policy.clone());
            let mut prev = Duration::ZERO;
            for _ in 0..20 {
                let d = backoff.next_delay();
                assert!(d >= prev, "{d:?} < {prev:?}");
                assert!(d <= policy.max_delay);
                prev = d;
            }
        }
    }
}
