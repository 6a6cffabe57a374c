//! # Rate Limiting
//!
//! Per-identifier admission control. A [`RateLimitPattern`] names the identifier
//! (directly or through a key generator over a caller context), the algorithm and
//! its parameters. [`RateLimiter`] keeps one limiter per
//! `(identifier, algorithm, window)` and reuses it for every later check.

mod fixed_window;
mod sliding_window;
mod token_bucket;

pub use fixed_window::FixedWindowLimiter;
pub use sliding_window::SlidingWindowLimiter;
pub use token_bucket::TokenBucketLimiter;

use crate::error::{OrchestrationError, OrchestrationResult, RateLimitError, ValidationError};
use crate::utils::{Clock, SystemClock};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Identifier used when a pattern names neither an identifier nor a key generator
pub const GLOBAL_IDENTIFIER: &str = "global";

/// Result of one admission check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// When the limiter next regains capacity
    pub reset_time: DateTime<Utc>,
    /// Zero when allowed
    pub retry_after: Duration,
}

impl RateLimitDecision {
    pub fn allowed(limit: u64, remaining: u64, reset_time: DateTime<Utc>) -> Self {
        Self {
            allowed: true,
            limit,
            remaining,
            reset_time,
            retry_after: Duration::ZERO,
        }
    }

    pub fn denied(limit: u64, reset_time: DateTime<Utc>, retry_after: Duration) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            reset_time,
            retry_after,
        }
    }
}

/// One algorithm instance for one identifier
pub trait Limiter: Send + Sync + fmt::Debug {
    /// Consume one unit if available
    fn try_acquire(&self, now: DateTime<Utc>) -> RateLimitDecision;

    fn limit(&self) -> u64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RateLimitAlgorithm {
    FixedWindow,
    SlidingWindow,
    TokenBucket,
}

impl RateLimitAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FixedWindow => "fixed-window",
            Self::SlidingWindow => "sliding-window",
            Self::TokenBucket => "token-bucket",
        }
    }
}

impl fmt::Display for RateLimitAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RateLimitAlgorithm {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fixed-window" => Ok(Self::FixedWindow),
            "sliding-window" => Ok(Self::SlidingWindow),
            "token-bucket" => Ok(Self::TokenBucket),
            other => Err(ValidationError::new(
                "algorithm",
                format!(
                    "unsupported rate limit algorithm '{other}' (expected fixed-window, sliding-window or token-bucket)"
                ),
            )),
        }
    }
}

/// Derives an identifier from the caller's context
pub type KeyGenerator = Arc<dyn Fn(&Value) -> String + Send + Sync>;

/// What to limit and how
#[derive(Clone)]
pub struct RateLimitPattern {
    pub identifier: Option<String>,
    pub key_generator: Option<KeyGenerator>,
    /// Algorithm name, parsed at check time
    pub algorithm: String,
    /// Calls admitted per window (refill rate for the token bucket)
    pub tokens: u64,
    pub window: Duration,
    /// Token bucket capacity; defaults to `tokens`
    pub burst: Option<u64>,
    /// Raise [`RateLimitError`] instead of returning a denial
    pub throw_on_limit: bool,
}

impl fmt::Debug for RateLimitPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitPattern")
            .field("identifier", &self.identifier)
            .field("key_generator", &self.key_generator.as_ref().map(|_| "<fn>"))
            .field("algorithm", &self.algorithm)
            .field("tokens", &self.tokens)
            .field("window", &self.window)
            .field("burst", &self.burst)
            .field("throw_on_limit", &self.throw_on_limit)
            .finish()
    }
}

impl RateLimitPattern {
    /// Fixed-window pattern admitting `tokens` calls per `window`
    pub fn new(tokens: u64, window: Duration) -> Self {
        Self {
            identifier: None,
            key_generator: None,
            algorithm: RateLimitAlgorithm::FixedWindow.as_str().to_string(),
            tokens,
            window,
            burst: None,
            throw_on_limit: false,
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn with_key_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn(&Value) -> String + Send + Sync + 'static,
    {
        self.key_generator = Some(Arc::new(generator));
        self
    }

    pub fn with_algorithm(mut self, algorithm: impl Into<String>) -> Self {
        self.algorithm = algorithm.into();
        self
    }

    pub fn with_burst(mut self, burst: u64) -> Self {
        self.burst = Some(burst);
        self
    }

    pub fn throw_on_limit(mut self) -> Self {
        self.throw_on_limit = true;
        self
    }

    /// Explicit identifier, then the key generator, then [`GLOBAL_IDENTIFIER`]
    pub fn resolve_identifier(&self, context: Option<&Value>) -> String {
        if let Some(identifier) = &self.identifier {
            return identifier.clone();
        }
        match &self.key_generator {
            Some(generator) => generator(context.unwrap_or(&Value::Null)),
            None => GLOBAL_IDENTIFIER.to_string(),
        }
    }

    pub fn validate(&self) -> Result<RateLimitAlgorithm, ValidationError> {
        let algorithm = self.algorithm.parse::<RateLimitAlgorithm>()?;
        if self.tokens == 0 {
            return Err(ValidationError::new("tokens", "tokens must be greater than 0"));
        }
        if self.window.as_millis() == 0 {
            return Err(ValidationError::new("window", "window must be at least 1ms"));
        }
        if self.burst == Some(0) {
            return Err(ValidationError::new("burst", "burst must be greater than 0"));
        }
        Ok(algorithm)
    }
}

/// Outcome of [`RateLimiter::with_rate_limit`] when denials are not raised
#[derive(Debug, Clone, PartialEq)]
pub enum RateLimitOutcome<T> {
    Executed(T),
    Denied(RateLimitDecision),
}

impl<T> RateLimitOutcome<T> {
    pub fn executed(self) -> Option<T> {
        match self {
            Self::Executed(value) => Some(value),
            Self::Denied(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LimiterKey {
    identifier: String,
    algorithm: RateLimitAlgorithm,
    window_ms: u128,
}

/// Registry of limiter instances with the check and guard entry points
#[derive(Debug, Clone)]
pub struct RateLimiter {
    limiters: Arc<DashMap<LimiterKey, Arc<dyn Limiter>>>,
    clock: Arc<dyn Clock>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            limiters: Arc::new(DashMap::new()),
            clock,
        }
    }

    /// Number of cached limiter instances
    pub fn limiter_count(&self) -> usize {
        self.limiters.len()
    }

    /// Drop every cached limiter, resetting all counters
    pub fn clear(&self) {
        self.limiters.clear();
    }

    fn limiter_for(
        &self,
        identifier: &str,
        algorithm: RateLimitAlgorithm,
        pattern: &RateLimitPattern,
    ) -> Arc<dyn Limiter> {
        let key = LimiterKey {
            identifier: identifier.to_string(),
            algorithm,
            window_ms: pattern.window.as_millis(),
        };

        if let Some(existing) = self.limiters.get(&key) {
            return Arc::clone(existing.value());
        }

        self.limiters
            .entry(key)
            .or_insert_with(|| {
                info!(
                    identifier = identifier,
                    algorithm = %algorithm,
                    tokens = pattern.tokens,
                    window_ms = pattern.window.as_millis() as u64,
                    "Created rate limiter"
                );
                let limiter: Arc<dyn Limiter> = match algorithm {
                    RateLimitAlgorithm::FixedWindow => {
                        Arc::new(FixedWindowLimiter::new(pattern.tokens, pattern.window))
                    }
                    RateLimitAlgorithm::SlidingWindow => {
                        Arc::new(SlidingWindowLimiter::new(pattern.tokens, pattern.window))
                    }
                    RateLimitAlgorithm::TokenBucket => Arc::new(TokenBucketLimiter::new(
                        pattern.tokens,
                        pattern.window,
                        pattern.burst.unwrap_or(pattern.tokens),
                    )),
                };
                limiter
            })
            .clone()
    }

    /// Consume one unit for the pattern's identifier.
    ///
    /// Fails with a validation error for an unknown algorithm or zero limits, and
    /// with [`RateLimitError`] on denial when `throw_on_limit` is set.
    pub fn check_rate_limit(
        &self,
        pattern: &RateLimitPattern,
        context: Option<&Value>,
    ) -> OrchestrationResult<RateLimitDecision> {
        let algorithm = pattern.validate()?;
        let identifier = pattern.resolve_identifier(context);
        let limiter = self.limiter_for(&identifier, algorithm, pattern);

        let decision = limiter.try_acquire(self.clock.now());

        if decision.allowed {
            debug!(
                identifier = %identifier,
                algorithm = %algorithm,
                remaining = decision.remaining,
                "Rate limit check passed"
            );
            return Ok(decision);
        }

        debug!(
            identifier = %identifier,
            algorithm = %algorithm,
            limit = decision.limit,
            retry_after_ms = decision.retry_after.as_millis() as u64,
            "Rate limit exceeded"
        );

        if pattern.throw_on_limit {
            return Err(OrchestrationError::RateLimited(RateLimitError {
                limit: decision.limit,
                window: pattern.window,
                retry_after: decision.retry_after,
            }));
        }

        Ok(decision)
    }

    /// Run `operation` only when the check admits it
    pub async fn with_rate_limit<F, Fut, T>(
        &self,
        pattern: &RateLimitPattern,
        context: Option<&Value>,
        operation: F,
    ) -> OrchestrationResult<RateLimitOutcome<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = OrchestrationResult<T>>,
    {
        let decision = self.check_rate_limit(pattern, context)?;
        if !decision.allowed {
            return Ok(RateLimitOutcome::Denied(decision));
        }
        operation().await.map(RateLimitOutcome::Executed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ManualClock;
    use proptest::prelude::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn limiter() -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        (RateLimiter::with_clock(clock.clone()), clock)
    }

    #[test]
    fn test_algorithm_names_parse() {
        assert_eq!(
            "sliding-window".parse::<RateLimitAlgorithm>().unwrap(),
            RateLimitAlgorithm::SlidingWindow
        );
        assert_eq!(RateLimitAlgorithm::TokenBucket.to_string(), "token-bucket");
        assert!("leaky-bucket".parse::<RateLimitAlgorithm>().is_err());
    }

    #[test]
    fn test_unknown_algorithm_fails_at_check_time() {
        let (limiter, _) = limiter();
        let pattern = RateLimitPattern::new(5, Duration::from_secs(1))
            .with_identifier("api")
            .with_algorithm("leaky-bucket");

        let err = limiter.check_rate_limit(&pattern, None).unwrap_err();
        assert!(matches!(err, OrchestrationError::Validation(ref v) if v.field == "algorithm"));
        assert_eq!(limiter.limiter_count(), 0);
    }

    #[test]
    fn test_fixed_window_resets_after_window() {
        let (limiter, clock) = limiter();
        let pattern = RateLimitPattern::new(2, Duration::from_secs(10)).with_identifier("user-1");

        assert!(limiter.check_rate_limit(&pattern, None).unwrap().allowed);
        assert!(limiter.check_rate_limit(&pattern, None).unwrap().allowed);
        assert!(!limiter.check_rate_limit(&pattern, None).unwrap().allowed);

        clock.advance(Duration::from_secs(10));
        let decision = limiter.check_rate_limit(&pattern, None).unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 1);
    }

    #[test]
    fn test_limiters_are_cached_per_identifier_algorithm_and_window() {
        let (limiter, _) = limiter();
        let base = RateLimitPattern::new(5, Duration::from_secs(1)).with_identifier("a");

        limiter.check_rate_limit(&base, None).unwrap();
        limiter.check_rate_limit(&base, None).unwrap();
        assert_eq!(limiter.limiter_count(), 1);

        limiter
            .check_rate_limit(&base.clone().with_identifier("b"), None)
            .unwrap();
        limiter
            .check_rate_limit(&base.clone().with_algorithm("token-bucket"), None)
            .unwrap();
        let mut wider = base.clone();
        wider.window = Duration::from_secs(2);
        limiter.check_rate_limit(&wider, None).unwrap();

        assert_eq!(limiter.limiter_count(), 4);
    }

    #[test]
    fn test_key_generator_partitions_by_context() {
        let (limiter, _) = limiter();
        let pattern = RateLimitPattern::new(1, Duration::from_secs(60)).with_key_generator(|ctx| {
            ctx.get("tenant")
                .and_then(Value::as_str)
                .unwrap_or("anonymous")
                .to_string()
        });

        let acme = json!({ "tenant": "acme" });
        let globex = json!({ "tenant": "globex" });
        assert!(limiter.check_rate_limit(&pattern, Some(&acme)).unwrap().allowed);
        assert!(!limiter.check_rate_limit(&pattern, Some(&acme)).unwrap().allowed);
        assert!(limiter.check_rate_limit(&pattern, Some(&globex)).unwrap().allowed);
        assert_eq!(pattern.resolve_identifier(None), "anonymous");
    }

    #[test]
    fn test_throw_on_limit_raises_structured_error() {
        let (limiter, _) = limiter();
        let pattern = RateLimitPattern::new(1, Duration::from_secs(30))
            .with_identifier("strict")
            .throw_on_limit();

        limiter.check_rate_limit(&pattern, None).unwrap();
        match limiter.check_rate_limit(&pattern, None) {
            Err(OrchestrationError::RateLimited(err)) => {
                assert_eq!(err.limit, 1);
                assert_eq!(err.window, Duration::from_secs(30));
                assert!(err.retry_after <= Duration::from_secs(30));
            }
            other => panic!("expected rate limit error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_with_rate_limit_skips_operation_when_denied() {
        let (limiter, _) = limiter();
        let pattern = RateLimitPattern::new(1, Duration::from_secs(60)).with_identifier("job");
        let runs = AtomicU32::new(0);

        let first = limiter
            .with_rate_limit(&pattern, None, || async {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok("done")
            })
            .await
            .unwrap();
        assert_eq!(first, RateLimitOutcome::Executed("done"));

        let second = limiter
            .with_rate_limit(&pattern, None, || async {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok("done")
            })
            .await
            .unwrap();
        assert!(matches!(second, RateLimitOutcome::Denied(ref d) if !d.allowed));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    proptest! {
        #[test]
        fn prop_fixed_window_never_admits_more_than_limit(
            limit in 1u64..20,
            calls in 1usize..60,
            algorithm in prop_oneof![
                Just("fixed-window"),
                Just("sliding-window"),
                Just("token-bucket"),
            ],
        ) {
            let (limiter, _) = limiter();
            let pattern = RateLimitPattern::new(limit, Duration::from_secs(3600))
                .with_identifier("prop")
                .with_algorithm(algorithm);

            let admitted = (0..calls)
                .filter(|_| limiter.check_rate_limit(&pattern, None).unwrap().allowed)
                .count() as u64;

            prop_assert_eq!(admitted, limit.min(calls as u64));
        }
    }
}
