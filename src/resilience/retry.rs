//! # Retry Policies
//!
//! A policy is a pure function of `(attempt, error)` returning whether to try
//! again and how long to wait. [`retry_with_policy`] drives an async operation
//! with one, sleeping through an injected [`Clock`].
//!
//! `attempt` is always the 1-based number of the attempt that just failed.

use crate::error::{OrchestrationError, OrchestrationResult};
use crate::models::{BackoffStrategy, RetryOverride};
use crate::utils::Clock;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Outcome of consulting a policy after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryDecision {
    pub retry: bool,
    pub delay: Duration,
}

impl RetryDecision {
    pub fn stop() -> Self {
        Self {
            retry: false,
            delay: Duration::ZERO,
        }
    }

    pub fn after(delay: Duration) -> Self {
        Self { retry: true, delay }
    }
}

/// Decides whether a failed attempt should be retried
pub trait RetryPolicy: Send + Sync + std::fmt::Debug {
    fn decide(&self, attempt: u32, error: &OrchestrationError) -> RetryDecision;
}

impl<P: RetryPolicy + ?Sized> RetryPolicy for Arc<P> {
    fn decide(&self, attempt: u32, error: &OrchestrationError) -> RetryDecision {
        (**self).decide(attempt, error)
    }
}

/// Never retries
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetryPolicy;

impl RetryPolicy for NoRetryPolicy {
    fn decide(&self, _attempt: u32, _error: &OrchestrationError) -> RetryDecision {
        RetryDecision::stop()
    }
}

/// Same delay between every attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedDelayPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl FixedDelayPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

impl RetryPolicy for FixedDelayPolicy {
    fn decide(&self, attempt: u32, _error: &OrchestrationError) -> RetryDecision {
        if attempt < self.max_attempts {
            RetryDecision::after(self.delay)
        } else {
            RetryDecision::stop()
        }
    }
}

/// `base_delay * multiplier^(attempt - 1)` plus up to `jitter_factor` of random
/// extra delay, capped at `max_delay`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExponentialBackoffPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub jitter_factor: f64,
}

impl ExponentialBackoffPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Self::default()
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Clamped to `0.0..=1.0`; NaN disables jitter
    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = clamp_jitter(jitter_factor);
        self
    }

    /// Delay before the attempt following `attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let max_secs = self.max_delay.as_secs_f64();
        let delay_secs = (self.base_delay.as_secs_f64() * factor).min(max_secs);

        let jitter_factor = clamp_jitter(self.jitter_factor);
        let jittered = if jitter_factor > 0.0 {
            let jitter = fastrand::f64() * jitter_factor;
            delay_secs * (1.0 + jitter)
        } else {
            delay_secs
        };

        Duration::from_secs_f64(jittered.min(max_secs))
    }
}

fn clamp_jitter(jitter_factor: f64) -> f64 {
    if jitter_factor.is_nan() {
        0.0
    } else {
        jitter_factor.clamp(0.0, 1.0)
    }
}

impl Default for ExponentialBackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy for ExponentialBackoffPolicy {
    fn decide(&self, attempt: u32, _error: &OrchestrationError) -> RetryDecision {
        if attempt < self.max_attempts {
            RetryDecision::after(self.delay_for(attempt))
        } else {
            RetryDecision::stop()
        }
    }
}

/// Delegates to `inner` only for transient error categories
#[derive(Debug, Clone)]
pub struct TransientErrorPolicy<P> {
    inner: P,
}

impl<P: RetryPolicy> TransientErrorPolicy<P> {
    pub fn new(inner: P) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

impl<P: RetryPolicy> RetryPolicy for TransientErrorPolicy<P> {
    fn decide(&self, attempt: u32, error: &OrchestrationError) -> RetryDecision {
        if error.is_transient() {
            self.inner.decide(attempt, error)
        } else {
            RetryDecision::stop()
        }
    }
}

/// Build the policy a step's retry override describes
pub fn policy_from_override(retry: &RetryOverride) -> Arc<dyn RetryPolicy> {
    let delay = Duration::from_millis(retry.delay_ms);
    match retry.strategy {
        BackoffStrategy::Fixed => Arc::new(FixedDelayPolicy::new(retry.max_attempts, delay)),
        BackoffStrategy::Exponential => {
            let mut policy = ExponentialBackoffPolicy::new(retry.max_attempts, delay);
            if let Some(max_delay_ms) = retry.max_delay_ms {
                policy = policy.with_max_delay(Duration::from_millis(max_delay_ms));
            }
            Arc::new(policy)
        }
    }
}

/// Result of a retried operation together with the attempts it took
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: OrchestrationResult<T>,
    pub attempts: u32,
}

/// Run `operation` until it succeeds or `policy` gives up.
///
/// The closure receives the 1-based attempt number. Validation, circuit-open and
/// configuration errors end the loop whatever the policy says.
pub async fn retry_with_policy<P, F, Fut, T>(
    policy: &P,
    clock: &dyn Clock,
    operation: F,
) -> OrchestrationResult<T>
where
    P: RetryPolicy + ?Sized,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = OrchestrationResult<T>>,
{
    retry_counting(policy, clock, operation).await.result
}

/// Like [`retry_with_policy`], also reporting how many attempts ran
pub async fn retry_counting<P, F, Fut, T>(
    policy: &P,
    clock: &dyn Clock,
    mut operation: F,
) -> RetryOutcome<T>
where
    P: RetryPolicy + ?Sized,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = OrchestrationResult<T>>,
{
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt,
                }
            }
            Err(error) => {
                let decision = if error.category().fails_fast() {
                    RetryDecision::stop()
                } else {
                    policy.decide(attempt, &error)
                };
                if !decision.retry {
                    if attempt > 1 {
                        warn!(
                            attempts = attempt,
                            error = %error,
                            "Retries exhausted"
                        );
                    }
                    return RetryOutcome {
                        result: Err(error),
                        attempts: attempt,
                    };
                }

                debug!(
                    attempt = attempt,
                    delay_ms = decision.delay.as_millis() as u64,
                    category = %error.category(),
                    error = %error,
                    "Retrying after failure"
                );
                clock.sleep(decision.delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use crate::utils::ManualClock;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn network() -> OrchestrationError {
        OrchestrationError::Network("connection reset".to_string())
    }

    #[test]
    fn test_fixed_delay_stops_at_max_attempts() {
        let policy = FixedDelayPolicy::new(3, Duration::from_millis(50));

        assert_eq!(
            policy.decide(1, &network()),
            RetryDecision::after(Duration::from_millis(50))
        );
        assert!(policy.decide(2, &network()).retry);
        assert!(!policy.decide(3, &network()).retry);
    }

    #[test]
    fn test_exponential_backoff_grows_and_caps() {
        let policy = ExponentialBackoffPolicy::new(10, Duration::from_millis(100))
            .with_jitter(0.0)
            .with_max_delay(Duration::from_millis(500));

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
    }

    #[test]
    fn test_transient_policy_never_retries_validation() {
        let policy = TransientErrorPolicy::new(FixedDelayPolicy::new(5, Duration::ZERO));

        let validation: OrchestrationError = ValidationError::new("id", "empty").into();
        assert!(!policy.decide(1, &validation).retry);
        assert!(policy.decide(1, &network()).retry);
    }

    #[test]
    fn test_override_builds_matching_policy() {
        let retry = RetryOverride {
            max_attempts: 2,
            strategy: BackoffStrategy::Fixed,
            delay_ms: 10,
            max_delay_ms: None,
        };
        let policy = policy_from_override(&retry);
        assert_eq!(
            policy.decide(1, &network()),
            RetryDecision::after(Duration::from_millis(10))
        );
        assert!(!policy.decide(2, &network()).retry);
    }

    #[tokio::test]
    async fn test_retry_with_policy_succeeds_after_transient_failures() {
        let clock = ManualClock::starting_now();
        let start = clock.now_millis();
        let calls = AtomicU32::new(0);
        let policy = FixedDelayPolicy::new(5, Duration::from_millis(100));

        let outcome = retry_counting(&policy, &clock, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(network())
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(outcome.result.unwrap(), 3);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(clock.now_millis() - start, 200);
    }

    #[tokio::test]
    async fn test_retry_with_policy_returns_last_error() {
        let clock = ManualClock::starting_now();
        let policy = FixedDelayPolicy::new(2, Duration::ZERO);

        let result: OrchestrationResult<()> =
            retry_with_policy(&policy, &clock, |_| async { Err(network()) }).await;

        assert_eq!(result.unwrap_err(), network());
    }

    #[tokio::test]
    async fn test_fail_fast_categories_are_never_retried() {
        let clock = ManualClock::starting_now();
        let policy = FixedDelayPolicy::new(5, Duration::from_millis(10));
        let failures = [
            OrchestrationError::from(ValidationError::new("amount", "negative")),
            OrchestrationError::CircuitOpen(crate::error::CircuitOpenError {
                key: "charge".to_string(),
                cool_down_remaining: Duration::from_secs(1),
            }),
            OrchestrationError::NoDefaultProvider,
        ];

        for failure in failures {
            let calls = AtomicU32::new(0);
            let outcome: RetryOutcome<()> = retry_counting(&policy, &clock, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                let failure = failure.clone();
                async move { Err(failure) }
            })
            .await;

            assert_eq!(outcome.attempts, 1);
            assert_eq!(calls.load(Ordering::SeqCst), 1);
            assert_eq!(outcome.result.unwrap_err(), failure);
        }
    }

    #[test]
    fn test_out_of_range_jitter_is_clamped() {
        let base = ExponentialBackoffPolicy::new(5, Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(10));

        let negative = base.clone().with_jitter(-3.0);
        assert_eq!(negative.jitter_factor, 0.0);
        assert_eq!(negative.delay_for(1), Duration::from_millis(100));

        let nan = base.clone().with_jitter(f64::NAN);
        assert_eq!(nan.delay_for(2), Duration::from_millis(200));

        let large = base.clone().with_jitter(7.0);
        assert_eq!(large.jitter_factor, 1.0);
        assert!(large.delay_for(1) <= Duration::from_millis(200));

        let mut raw = base;
        raw.jitter_factor = -5.0;
        assert_eq!(raw.delay_for(1), Duration::from_millis(100));
    }

    proptest! {
        #[test]
        fn prop_exponential_delay_never_exceeds_cap(
            attempt in 1u32..64,
            base_ms in 1u64..5_000,
            cap_ms in 1u64..60_000,
            jitter in 0.0f64..1.0,
        ) {
            let policy = ExponentialBackoffPolicy::new(u32::MAX, Duration::from_millis(base_ms))
                .with_max_delay(Duration::from_millis(cap_ms))
                .with_jitter(jitter);
            prop_assert!(policy.delay_for(attempt) <= Duration::from_millis(cap_ms));
        }

        #[test]
        fn prop_policies_stop_at_max_attempts(max_attempts in 1u32..20, attempt in 1u32..40) {
            let fixed = FixedDelayPolicy::new(max_attempts, Duration::ZERO);
            let exponential = ExponentialBackoffPolicy::new(max_attempts, Duration::from_millis(1));
            let expected = attempt < max_attempts;
            prop_assert_eq!(fixed.decide(attempt, &network()).retry, expected);
            prop_assert_eq!(exponential.decide(attempt, &network()).retry, expected);
        }
    }
}
