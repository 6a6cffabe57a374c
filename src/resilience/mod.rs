//! # Resilience Module
//!
//! Fault tolerance primitives the step executor and callers wrap around
//! downstream calls:
//!
//! - **Retry policies**: pure `(attempt, error) -> decision` strategies plus an
//!   async driver
//! - **Circuit breakers**: per-key state machines that fail fast while a
//!   dependency is down
//! - **Rate limiting**: per-identifier admission control with fixed-window,
//!   sliding-window and token-bucket algorithms
//!
//! ## Usage
//!
//! ```rust,no_run
//! use stepflow_core::resilience::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CircuitBreakerConfig {
//!     failure_threshold: 5,
//!     cool_down: Duration::from_secs(30),
//! };
//!
//! let breaker = CircuitBreaker::new("payments".to_string(), config);
//!
//! let receipt = breaker
//!     .call(|| async { Ok::<_, std::io::Error>("charged") })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod manager;
pub mod metrics;
pub mod rate_limiter;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitState};
pub use config::CircuitBreakerConfig;
pub use manager::CircuitBreakerManager;
pub use metrics::{CircuitBreakerMetrics, SystemCircuitBreakerMetrics};
pub use rate_limiter::{
    RateLimitAlgorithm, RateLimitDecision, RateLimitOutcome, RateLimitPattern, RateLimiter,
};
pub use retry::{
    policy_from_override, retry_counting, retry_with_policy, ExponentialBackoffPolicy,
    FixedDelayPolicy, NoRetryPolicy, RetryDecision, RetryOutcome, RetryPolicy,
    TransientErrorPolicy,
};
