//! Token bucket holding up to `capacity` tokens, refilled continuously at
//! `tokens` per window.

use super::{Limiter, RateLimitDecision};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::time::Duration;

#[derive(Debug)]
struct BucketState {
    available: f64,
    last_refill_ms: Option<i64>,
}

#[derive(Debug)]
pub struct TokenBucketLimiter {
    capacity: u64,
    /// Tokens added per millisecond
    refill_per_ms: f64,
    state: Mutex<BucketState>,
}

impl TokenBucketLimiter {
    /// Bucket of `capacity` (the burst size) refilled at `tokens` per `window`
    pub fn new(tokens: u64, window: Duration, capacity: u64) -> Self {
        let window_ms = (window.as_millis() as f64).max(1.0);
        Self {
            capacity,
            refill_per_ms: tokens as f64 / window_ms,
            state: Mutex::new(BucketState {
                available: capacity as f64,
                last_refill_ms: None,
            }),
        }
    }

    fn refill(&self, state: &mut BucketState, now_ms: i64) {
        if let Some(last) = state.last_refill_ms {
            let elapsed = (now_ms - last).max(0) as f64;
            state.available = (state.available + elapsed * self.refill_per_ms).min(self.capacity as f64);
        }
        state.last_refill_ms = Some(now_ms);
    }

    fn millis_until(&self, tokens_needed: f64) -> i64 {
        if tokens_needed <= 0.0 {
            return 0;
        }
        if self.refill_per_ms <= 0.0 {
            return i64::MAX / 2;
        }
        (tokens_needed / self.refill_per_ms).ceil() as i64
    }
}

impl Limiter for TokenBucketLimiter {
    fn try_acquire(&self, now: DateTime<Utc>) -> RateLimitDecision {
        let now_ms = now.timestamp_millis();
        let mut state = self.state.lock();
        self.refill(&mut state, now_ms);

        if state.available >= 1.0 {
            state.available -= 1.0;
            let until_full = self.millis_until(self.capacity as f64 - state.available);
            return RateLimitDecision::allowed(
                self.capacity,
                state.available.floor() as u64,
                now + chrono::Duration::milliseconds(until_full),
            );
        }

        let retry_after_ms = self.millis_until(1.0 - state.available);
        RateLimitDecision::denied(
            self.capacity,
            now + chrono::Duration::milliseconds(retry_after_ms),
            Duration::from_millis(retry_after_ms as u64),
        )
    }

    fn limit(&self) -> u64 {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    #[test]
    fn test_burst_then_deny() {
        let bucket = TokenBucketLimiter::new(10, Duration::from_secs(1), 3);

        for expected_remaining in [2, 1, 0] {
            let decision = bucket.try_acquire(at(0));
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
            assert_eq!(decision.limit, 3);
        }

        let denied = bucket.try_acquire(at(0));
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, Duration::from_millis(100));
    }

    #[test]
    fn test_refills_over_time_up_to_capacity() {
        let bucket = TokenBucketLimiter::new(10, Duration::from_secs(1), 2);
        assert!(bucket.try_acquire(at(0)).allowed);
        assert!(bucket.try_acquire(at(0)).allowed);
        assert!(!bucket.try_acquire(at(50)).allowed);

        assert!(bucket.try_acquire(at(150)).allowed);

        // Long idle period refills only to capacity
        let decision = bucket.try_acquire(at(60_000));
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 1);
    }
}
