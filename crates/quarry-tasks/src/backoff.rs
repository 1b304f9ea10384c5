//! Backoff delay computation with jitter.

use std::time::Duration;

use rand::Rng;

use crate::model::{BackoffStrategy, JitterMode, RetryPolicy};

/// Compute the delay before attempt number `attempt` (1-indexed: the first
/// retry is `attempt == 1`), before jitter is applied.
fn base_delay(policy: &RetryPolicy, attempt: u32) -> u64 {
    let raw = match policy.strategy {
        BackoffStrategy::Fixed => policy.base_delay_ms,
        BackoffStrategy::Linear => policy.base_delay_ms.saturating_mul(attempt as u64),
        BackoffStrategy::Exponential => policy
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1))),
    };
    raw.min(policy.max_delay_ms)
}

/// Apply the configured jitter strategy to a base delay:
/// - `None`: the base delay, unchanged.
/// - `Full`: uniformly random in `[0, base]`.
/// - `Equal`: `base/2 + uniform(0, base/2)`, so the delay never drops below
///   half the computed backoff.
pub fn compute_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let base = base_delay(policy, attempt);
    let millis = match policy.jitter {
        JitterMode::None => base,
        JitterMode::Full => rand::rng().random_range(0..=base),
        JitterMode::Equal => {
            let half = base / 2;
            half + rand::rng().random_range(0..=half.max(1))
        }
    };
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(strategy: BackoffStrategy, jitter: JitterMode) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            strategy,
            base_delay_ms: 100,
            max_delay_ms: 10_000,
            jitter,
        }
    }

    #[test]
    fn exponential_backoff_doubles_each_attempt() {
        let policy = policy(BackoffStrategy::Exponential, JitterMode::None);
        assert_eq!(compute_delay(&policy, 1).as_millis(), 100);
        assert_eq!(compute_delay(&policy, 2).as_millis(), 200);
        assert_eq!(compute_delay(&policy, 3).as_millis(), 400);
    }

    #[test]
    fn linear_backoff_scales_with_attempt() {
        let policy = policy(BackoffStrategy::Linear, JitterMode::None);
        assert_eq!(compute_delay(&policy, 3).as_millis(), 300);
    }

    #[test]
    fn delay_is_capped_at_max_delay() {
        let policy = policy(BackoffStrategy::Exponential, JitterMode::None);
        assert_eq!(compute_delay(&policy, 20).as_millis(), policy.max_delay_ms as u128);
    }

    #[test]
    fn full_jitter_never_exceeds_base() {
        let policy = policy(BackoffStrategy::Fixed, JitterMode::Full);
        for _ in 0..50 {
            assert!(compute_delay(&policy, 1).as_millis() <= 100);
        }
    }

    #[test]
    fn equal_jitter_never_drops_below_half() {
        let policy = policy(BackoffStrategy::Fixed, JitterMode::Equal);
        for _ in 0..50 {
            let ms = compute_delay(&policy, 1).as_millis();
            assert!(ms >= 50 && ms <= 100);
        }
    }
}
