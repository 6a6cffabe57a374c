//! Fixed-window counter aligned to multiples of the window length since the epoch.

use super::{Limiter, RateLimitDecision};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::time::Duration;

#[derive(Debug)]
struct WindowState {
    window_start_ms: i64,
    count: u64,
}

/// Admits at most `limit` calls per aligned window
#[derive(Debug)]
pub struct FixedWindowLimiter {
    limit: u64,
    window_ms: i64,
    state: Mutex<WindowState>,
}

impl FixedWindowLimiter {
    pub fn new(limit: u64, window: Duration) -> Self {
        Self {
            limit,
            window_ms: (window.as_millis() as i64).max(1),
            state: Mutex::new(WindowState {
                window_start_ms: i64::MIN,
                count: 0,
            }),
        }
    }
}

impl Limiter for FixedWindowLimiter {
    fn try_acquire(&self, now: DateTime<Utc>) -> RateLimitDecision {
        let now_ms = now.timestamp_millis();
        let window_start_ms = now_ms - now_ms.rem_euclid(self.window_ms);
        let until_reset_ms = window_start_ms + self.window_ms - now_ms;
        let reset_time = now + chrono::Duration::milliseconds(until_reset_ms);

        let mut state = self.state.lock();
        if state.window_start_ms != window_start_ms {
            state.window_start_ms = window_start_ms;
            state.count = 0;
        }

        if state.count < self.limit {
            state.count += 1;
            RateLimitDecision::allowed(self.limit, self.limit - state.count, reset_time)
        } else {
            RateLimitDecision::denied(
                self.limit,
                reset_time,
                Duration::from_millis(until_reset_ms as u64),
            )
        }
    }

    fn limit(&self) -> u64 {
        self.limit
    }
}
