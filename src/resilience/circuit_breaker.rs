//! # Circuit Breaker Implementation
//!
//! Classic three-state breaker guarding one downstream dependency:
//! Closed (normal operation), Open (failing fast) and Half-Open (one probe call
//! testing recovery).
//!
//! All state sits behind one `parking_lot` mutex. The lock is only held to admit a
//! call and to record its outcome, never across the guarded future.

use crate::error::{CircuitOpenError, OrchestrationError};
use crate::resilience::{CircuitBreakerConfig, CircuitBreakerMetrics};
use crate::utils::{Clock, SystemClock};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    #[default]
    Closed,
    /// Failure mode - all calls fail fast without executing
    Open,
    /// Testing recovery - exactly one probe call is allowed
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Errors returned from a call routed through the breaker
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open; the operation was not attempted
    #[error(transparent)]
    Open(CircuitOpenError),

    /// Operation ran and failed; the failure was recorded
    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

impl<E> CircuitBreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open(_))
    }
}

impl From<CircuitBreakerError<OrchestrationError>> for OrchestrationError {
    fn from(error: CircuitBreakerError<OrchestrationError>) -> Self {
        match error {
            CircuitBreakerError::Open(open) => OrchestrationError::CircuitOpen(open),
            CircuitBreakerError::OperationFailed(inner) => inner,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
    probe_in_flight: bool,
    /// Bumped on every open and close; outcomes from an older generation only
    /// update metrics
    generation: u64,
    metrics: CircuitBreakerMetrics,
}

/// Per-key circuit breaker
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Key (dependency name) for logging and metrics
    name: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerState>,
}

/// Admission ticket for one call; releases a half-open probe slot if the call
/// is dropped before its outcome is recorded.
struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    generation: u64,
    settled: bool,
}

impl<'a> Admission<'a> {
    fn new(breaker: &'a CircuitBreaker, probe: bool, generation: u64) -> Self {
        Self {
            breaker,
            probe,
            generation,
            settled: false,
        }
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if self.probe && !self.settled {
            let mut inner = self.breaker.inner.lock();
            if inner.generation == self.generation && inner.state == CircuitState::HalfOpen {
                inner.probe_in_flight = false;
                debug!(key = %self.breaker.name, "Half-open probe abandoned, slot released");
            }
        }
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker using the wall clock
    pub fn new(name: String, config: CircuitBreakerConfig) -> Self {
        Self::with_clock(name, config, Arc::new(SystemClock))
    }

    /// Create a new circuit breaker with an explicit time source
    pub fn with_clock(name: String, config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        info!(
            key = %name,
            failure_threshold = config.failure_threshold,
            cool_down_ms = config.cool_down.as_millis() as u64,
            "🛡️ Circuit breaker initialized"
        );

        Self {
            name,
            config,
            clock,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure_at: None,
                opened_at: None,
                probe_in_flight: false,
                generation: 0,
                metrics: CircuitBreakerMetrics::new(),
            }),
        }
    }

    /// Key this breaker guards
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current circuit state.
    ///
    /// An open circuit whose cool-down has elapsed still reports `Open` until the
    /// next call moves it to half-open.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    pub fn last_failure_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().last_failure_at
    }

    /// Execute an operation with circuit breaker protection
    pub async fn call<F, T, E, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut admission = self.admit().map_err(CircuitBreakerError::Open)?;

        let started = Instant::now();
        let result = operation().await;
        let duration = started.elapsed();

        admission.settled = true;
        match &result {
            Ok(_) => self.record_success(&admission, duration),
            Err(_) => self.record_failure(&admission, duration),
        }

        result.map_err(CircuitBreakerError::OperationFailed)
    }

    /// Decide whether a call may proceed
    fn admit(&self) -> Result<Admission<'_>, CircuitOpenError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => Ok(Admission::new(self, false, inner.generation)),
            CircuitState::Open => {
                let remaining = self.cool_down_remaining(inner.opened_at, now);
                if remaining.is_zero() {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    inner.metrics.half_open_calls += 1;
                    info!(key = %self.name, "🟡 Circuit breaker half-open (admitting probe)");
                    Ok(Admission::new(self, true, inner.generation))
                } else {
                    inner.metrics.rejected_count += 1;
                    Err(CircuitOpenError {
                        key: self.name.clone(),
                        cool_down_remaining: remaining,
                    })
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    inner.metrics.rejected_count += 1;
                    Err(CircuitOpenError {
                        key: self.name.clone(),
                        cool_down_remaining: Duration::ZERO,
                    })
                } else {
                    inner.probe_in_flight = true;
                    inner.metrics.half_open_calls += 1;
                    Ok(Admission::new(self, true, inner.generation))
                }
            }
        }
    }

    fn cool_down_remaining(&self, opened_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Duration {
        let Some(opened_at) = opened_at else {
            warn!(key = %self.name, "Circuit open but no timestamp recorded");
            return Duration::ZERO;
        };
        let elapsed = (now - opened_at).to_std().unwrap_or(Duration::ZERO);
        self.config.cool_down.saturating_sub(elapsed)
    }

    /// Record a successful operation.
    ///
    /// Only the half-open probe can close the circuit; a straggler admitted
    /// before the circuit opened only counts toward metrics.
    fn record_success(&self, admission: &Admission<'_>, duration: Duration) {
        let mut inner = self.inner.lock();
        inner.metrics.total_calls += 1;
        inner.metrics.success_count += 1;
        inner.metrics.total_duration += duration;

        if inner.generation != admission.generation {
            debug!(key = %self.name, "Late success from an earlier circuit generation");
            return;
        }

        match (inner.state, admission.probe) {
            (CircuitState::HalfOpen, true) => {
                Self::close(&mut inner);
                info!(key = %self.name, "🟢 Circuit breaker closed (probe succeeded)");
            }
            (CircuitState::Closed, false) => {
                inner.consecutive_failures = 0;
            }
            _ => {}
        }
    }

    /// Record a failed operation
    fn record_failure(&self, admission: &Admission<'_>, duration: Duration) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.metrics.total_calls += 1;
        inner.metrics.failure_count += 1;
        inner.metrics.total_duration += duration;
        inner.last_failure_at = Some(now);

        if inner.generation != admission.generation {
            debug!(key = %self.name, "Late failure from an earlier circuit generation");
            return;
        }

        match (inner.state, admission.probe) {
            (CircuitState::Closed, false) => {
                inner.consecutive_failures += 1;
                debug!(
                    key = %self.name,
                    consecutive_failures = inner.consecutive_failures,
                    "🔴 Operation failed"
                );
                if inner.consecutive_failures >= self.config.failure_threshold {
                    Self::open(&mut inner, now);
                    warn!(
                        key = %self.name,
                        consecutive_failures = inner.consecutive_failures,
                        failure_threshold = self.config.failure_threshold,
                        cool_down_ms = self.config.cool_down.as_millis() as u64,
                        "🔴 Circuit breaker opened (failing fast)"
                    );
                }
            }
            (CircuitState::HalfOpen, true) => {
                inner.consecutive_failures += 1;
                Self::open(&mut inner, now);
                warn!(key = %self.name, "🔴 Half-open probe failed, circuit reopened");
            }
            _ => {}
        }
    }

    fn open(inner: &mut BreakerState, now: DateTime<Utc>) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(now);
        inner.probe_in_flight = false;
        inner.generation += 1;
    }

    fn close(inner: &mut BreakerState) {
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
        inner.generation += 1;
    }

    /// Force circuit to open state (for emergency situations)
    pub fn force_open(&self) {
        warn!(key = %self.name, "🚨 Circuit breaker forced open");
        let now = self.clock.now();
        Self::open(&mut self.inner.lock(), now);
    }

    /// Force circuit to closed state (for emergency recovery)
    pub fn force_closed(&self) {
        warn!(key = %self.name, "🚨 Circuit breaker forced closed");
        Self::close(&mut self.inner.lock());
    }

    /// Get current metrics snapshot
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.inner.lock();
        let mut snapshot = inner.metrics.clone();
        snapshot.current_state = inner.state;
        snapshot.consecutive_failures = u64::from(inner.consecutive_failures);

        if snapshot.total_calls > 0 {
            snapshot.failure_rate = snapshot.failure_count as f64 / snapshot.total_calls as f64;
            snapshot.average_duration = Duration::from_secs_f64(
                snapshot.total_duration.as_secs_f64() / snapshot.total_calls as f64,
            );
        }

        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ManualClock;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker(threshold: u32, cool_down_ms: u64) -> (CircuitBreaker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let config = CircuitBreakerConfig {
            failure_threshold: threshold,
            cool_down: Duration::from_millis(cool_down_ms),
        };
        (
            CircuitBreaker::with_clock("test".to_string(), config, clock.clone()),
            clock,
        )
    }

    #[tokio::test]
    async fn test_circuit_breaker_normal_operation() {
        let (circuit, _) = breaker(3, 100);

        assert_eq!(circuit.state(), CircuitState::Closed);

        let result = circuit.call(|| async { Ok::<_, String>("success") }).await;
        assert!(result.is_ok());

        let metrics = circuit.metrics();
        assert_eq!(metrics.total_calls, 1);
        assert_eq!(metrics.success_count, 1);
        assert_eq!(metrics.failure_count, 0);
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let (circuit, _) = breaker(3, 100);

        let _ = circuit.call(|| async { Err::<(), _>("error") }).await;
        let _ = circuit.call(|| async { Err::<(), _>("error") }).await;
        assert_eq!(circuit.consecutive_failures(), 2);

        let _ = circuit.call(|| async { Ok::<_, &str>(()) }).await;
        assert_eq!(circuit.consecutive_failures(), 0);
        assert_eq!(circuit.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_open_circuit_does_not_invoke_operation() {
        let (circuit, _) = breaker(2, 1_000);
        let invocations = AtomicU32::new(0);

        for _ in 0..2 {
            let _ = circuit
                .call(|| async {
                    invocations.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("error")
                })
                .await;
        }
        assert_eq!(circuit.state(), CircuitState::Open);

        let result = circuit
            .call(|| async {
                invocations.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &str>(())
            })
            .await;

        match result {
            Err(CircuitBreakerError::Open(open)) => {
                assert_eq!(open.key, "test");
                assert_eq!(open.cool_down_remaining, Duration::from_millis(1_000));
            }
            other => panic!("expected open circuit, got {other:?}"),
        }
        assert_eq!(invocations.load(Ordering::SeqCst), 2);
        assert_eq!(circuit.metrics().rejected_count, 1);
    }

    #[tokio::test]
    async fn test_probe_success_closes_circuit() {
        let (circuit, clock) = breaker(1, 50);

        let _ = circuit.call(|| async { Err::<(), _>("error") }).await;
        assert_eq!(circuit.state(), CircuitState::Open);

        clock.advance(Duration::from_millis(60));

        let result = circuit.call(|| async { Ok::<_, String>("success") }).await;
        assert!(result.is_ok());
        assert_eq!(circuit.state(), CircuitState::Closed);
        assert_eq!(circuit.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn test_probe_failure_reopens_and_restarts_cool_down() {
        let (circuit, clock) = breaker(1, 50);

        let _ = circuit.call(|| async { Err::<(), _>("error") }).await;
        clock.advance(Duration::from_millis(50));

        let _ = circuit.call(|| async { Err::<(), _>("still down") }).await;
        assert_eq!(circuit.state(), CircuitState::Open);

        clock.advance(Duration::from_millis(20));
        match circuit.call(|| async { Ok::<_, &str>(()) }).await {
            Err(CircuitBreakerError::Open(open)) => {
                assert_eq!(open.cool_down_remaining, Duration::from_millis(30));
            }
            other => panic!("expected open circuit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_half_open_admits_single_probe() {
        let (circuit, clock) = breaker(1, 10);
        let _ = circuit.call(|| async { Err::<(), _>("error") }).await;
        clock.advance(Duration::from_millis(10));

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let probe = circuit.call(|| async move {
            let _ = release_rx.await;
            Ok::<_, &str>("probe")
        });
        let second = async {
            tokio::task::yield_now().await;
            let result = circuit.call(|| async { Ok::<_, &str>("second") }).await;
            let _ = release_tx.send(());
            result
        };

        let (probe_result, second_result) = tokio::join!(probe, second);
        assert!(probe_result.is_ok());
        assert!(matches!(second_result, Err(CircuitBreakerError::Open(_))));
        assert_eq!(circuit.state(), CircuitState::Closed);
    }

    async fn settle() {
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_straggler_from_closed_period_cannot_close_half_open_circuit() {
        let (circuit, clock) = breaker(1, 10);

        let (slow_tx, slow_rx) = tokio::sync::oneshot::channel::<()>();
        let (go_tx, go_rx) = tokio::sync::oneshot::channel::<()>();
        let (probe_tx, probe_rx) = tokio::sync::oneshot::channel::<()>();

        let slow = circuit.call(|| async move {
            let _ = slow_rx.await;
            Ok::<_, &str>("slow")
        });
        let probe = async {
            let _ = go_rx.await;
            circuit
                .call(|| async move {
                    let _ = probe_rx.await;
                    Ok::<_, &str>("probe")
                })
                .await
        };
        let driver = async {
            settle().await;
            let _ = circuit.call(|| async { Err::<(), _>("down") }).await;
            assert_eq!(circuit.state(), CircuitState::Open);

            clock.advance(Duration::from_millis(10));
            let _ = go_tx.send(());
            settle().await;
            assert_eq!(circuit.state(), CircuitState::HalfOpen);

            // The slow call was admitted while closed; its success is stale
            let _ = slow_tx.send(());
            settle().await;
            assert_eq!(circuit.state(), CircuitState::HalfOpen);

            let extra = circuit.call(|| async { Ok::<_, &str>("extra") }).await;
            assert!(matches!(extra, Err(CircuitBreakerError::Open(_))));

            let _ = probe_tx.send(());
        };

        let (slow_result, probe_result, ()) = tokio::join!(slow, probe, driver);
        assert!(slow_result.is_ok());
        assert!(probe_result.is_ok());
        assert_eq!(circuit.state(), CircuitState::Closed);
        assert_eq!(circuit.metrics().success_count, 2);
    }

    #[tokio::test]
    async fn test_straggler_failure_does_not_reopen_fresh_circuit() {
        let (circuit, _) = breaker(1, 10);
        let (slow_tx, slow_rx) = tokio::sync::oneshot::channel::<()>();

        let slow = circuit.call(|| async move {
            let _ = slow_rx.await;
            Err::<(), _>("late")
        });
        let driver = async {
            settle().await;
            circuit.force_open();
            circuit.force_closed();
            let _ = slow_tx.send(());
        };

        let (slow_result, ()) = tokio::join!(slow, driver);
        assert!(matches!(slow_result, Err(CircuitBreakerError::OperationFailed("late"))));
        assert_eq!(circuit.state(), CircuitState::Closed);
        assert_eq!(circuit.consecutive_failures(), 0);
        assert_eq!(circuit.metrics().failure_count, 1);
    }

    #[test]
    fn test_average_duration_with_huge_call_count() {
        let (circuit, _) = breaker(1, 10);
        {
            let mut inner = circuit.inner.lock();
            inner.metrics.total_calls = 1 << 32;
            inner.metrics.total_duration = Duration::from_secs(1 << 32);
        }

        assert_eq!(circuit.metrics().average_duration, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_force_operations() {
        let (circuit, _) = breaker(1, 1_000);

        circuit.force_open();
        assert_eq!(circuit.state(), CircuitState::Open);

        circuit.force_closed();
        assert_eq!(circuit.state(), CircuitState::Closed);
    }
}
