//! Sliding-window limiter using the weighted two-window approximation.
//!
//! The estimated usage is `previous * (1 - elapsed / window) + current`, where
//! `elapsed` is the time spent in the current aligned window.

use super::{Limiter, RateLimitDecision};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::time::Duration;

#[derive(Debug)]
struct SlidingState {
    current_start_ms: i64,
    current: u64,
    previous: u64,
}

#[derive(Debug)]
pub struct SlidingWindowLimiter {
    limit: u64,
    window_ms: i64,
    state: Mutex<SlidingState>,
}

impl SlidingWindowLimiter {
    pub fn new(limit: u64, window: Duration) -> Self {
        Self {
            limit,
            window_ms: (window.as_millis() as i64).max(1),
            state: Mutex::new(SlidingState {
                current_start_ms: i64::MIN,
                current: 0,
                previous: 0,
            }),
        }
    }

    fn roll(&self, state: &mut SlidingState, window_start_ms: i64) {
        if state.current_start_ms == window_start_ms {
            return;
        }
        state.previous = if state.current_start_ms.checked_add(self.window_ms) == Some(window_start_ms) {
            state.current
        } else {
            0
        };
        state.current = 0;
        state.current_start_ms = window_start_ms;
    }
}

impl Limiter for SlidingWindowLimiter {
    fn try_acquire(&self, now: DateTime<Utc>) -> RateLimitDecision {
        let now_ms = now.timestamp_millis();
        let window_start_ms = now_ms - now_ms.rem_euclid(self.window_ms);
        let elapsed_ms = now_ms - window_start_ms;
        let reset_time = now + chrono::Duration::milliseconds(self.window_ms - elapsed_ms);

        let mut state = self.state.lock();
        self.roll(&mut state, window_start_ms);

        let weight = 1.0 - elapsed_ms as f64 / self.window_ms as f64;
        let estimated = state.previous as f64 * weight + state.current as f64;
        let limit = self.limit as f64;

        if estimated + 1.0 <= limit {
            state.current += 1;
            let remaining = (limit - estimated - 1.0).floor().max(0.0) as u64;
            return RateLimitDecision::allowed(self.limit, remaining, reset_time);
        }

        // Earliest point at which the previous window's weight has decayed enough
        let retry_after_ms = if state.current + 1 > self.limit || state.previous == 0 {
            self.window_ms - elapsed_ms
        } else {
            let headroom = (self.limit - state.current - 1) as f64;
            let needed_elapsed = self.window_ms as f64 * (1.0 - headroom / state.previous as f64);
            (needed_elapsed.ceil() as i64 - elapsed_ms).clamp(1, self.window_ms - elapsed_ms)
        };

        RateLimitDecision::denied(
            self.limit,
            reset_time,
            Duration::from_millis(retry_after_ms.max(0) as u64),
        )
    }

    fn limit(&self) -> u64 {
        self.limit
    }
}
