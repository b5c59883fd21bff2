//! Circuit breakers for external dependencies.
//!
//! Each dependency (LLM provider, Redis, vector store) gets a named
//! [`CircuitBreaker`]. The breaker counts consecutive failures while
//! `Closed`; once the threshold is reached it opens and rejects calls until
//! the recovery timeout elapses. It then lets a limited number of trial
//! calls through in `HalfOpen`: enough successes close it again, a single
//! failure re-opens it.
//!
//! # Example
//!
//! ```rust,ignore
//! let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig::default());
//! let breaker = registry.get_or_create("llm").await;
//! let reply = breaker.call(|| client.complete(request)).await?;
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Breaker guarding LLM provider calls.
pub const LLM_BREAKER: &str = "llm";
/// Breaker guarding Redis queue operations.
pub const REDIS_BREAKER: &str = "redis";
/// Breaker guarding the vector store in hybrid memory.
pub const VECTOR_STORE_BREAKER: &str = "vector_store";

/// Breaker state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Breaker tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in `Closed` before opening
    pub failure_threshold: u32,
    /// Time spent `Open` before trial calls are allowed
    pub recovery_timeout: Duration,
    /// Concurrent trial calls admitted in `HalfOpen`
    pub half_open_max_calls: u32,
    /// Trial successes needed to close again
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            half_open_max_calls: 1,
            success_threshold: 1,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    pub fn with_half_open_max_calls(mut self, calls: u32) -> Self {
        self.half_open_max_calls = calls.max(1);
        self
    }

    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold.max(1);
        self
    }
}

/// Error returned by [`CircuitBreaker::call`].
#[derive(Error, Debug)]
pub enum CircuitBreakerError<E> {
    #[error("Circuit '{name}' is open; retry after {retry_after:?}")]
    Open { name: String, retry_after: Duration },

    #[error(transparent)]
    Inner(E),
}

impl<E> CircuitBreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    /// Map the inner error, keeping rejections as-is.
    pub fn map_inner<F, O>(self, f: F) -> CircuitBreakerError<O>
    where
        F: FnOnce(E) -> O,
    {
        match self {
            Self::Open { name, retry_after } => CircuitBreakerError::Open { name, retry_after },
            Self::Inner(e) => CircuitBreakerError::Inner(f(e)),
        }
    }
}

/// Point-in-time breaker statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
    total_successes: u64,
    total_failures: u64,
    total_rejections: u64,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            opened_at: None,
            total_successes: 0,
            total_failures: 0,
            total_rejections: 0,
        }
    }
}

/// A named circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    // Trial slots live outside the lock so a dropped call can release its
    // slot synchronously. The epoch changes on every state change, which
    // voids slots taken before it.
    half_open_in_flight: AtomicU32,
    trial_epoch: AtomicU64,
}

/// Releases a half-open trial slot when the call finishes or is dropped.
struct TrialSlot<'a> {
    breaker: &'a CircuitBreaker,
    epoch: Option<u64>,
}

impl Drop for TrialSlot<'_> {
    fn drop(&mut self) {
        let Some(epoch) = self.epoch else {
            return;
        };
        if self.breaker.trial_epoch.load(Ordering::SeqCst) != epoch {
            return;
        }
        let _ = self.breaker.half_open_in_flight.fetch_update(
            Ordering::SeqCst,
            Ordering::SeqCst,
            |n| n.checked_sub(1),
        );
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner::new()),
            half_open_in_flight: AtomicU32::new(0),
            trial_epoch: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `operation` under the breaker.
    ///
    /// The lock is not held while the operation runs. Dropping the returned
    /// future mid-call frees its half-open trial slot without counting a
    /// result.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let _slot = TrialSlot {
            breaker: self,
            epoch: self.acquire::<E>().await?,
        };

        match operation().await {
            Ok(value) => {
                self.on_success().await;
                Ok(value)
            }
            Err(e) => {
                self.on_failure().await;
                Err(CircuitBreakerError::Inner(e))
            }
        }
    }

    /// Current state, applying the open → half-open timeout.
    pub async fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock().await;
        self.check_recovery(&mut inner);
        inner.state
    }

    pub async fn stats(&self) -> CircuitBreakerStats {
        let mut inner = self.inner.lock().await;
        self.check_recovery(&mut inner);
        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            total_rejections: inner.total_rejections,
        }
    }

    /// Close the breaker and clear its counters.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state != CircuitState::Closed {
            info!("Circuit '{}' reset to closed", self.name);
        }
        *inner = BreakerInner::new();
        self.clear_trials();
    }

    /// Open the breaker immediately.
    pub async fn force_open(&self) {
        let mut inner = self.inner.lock().await;
        self.trip(&mut inner);
    }

    /// Admit a call. Returns the trial epoch when the call takes a half-open
    /// slot.
    async fn acquire<E>(&self) -> Result<Option<u64>, CircuitBreakerError<E>> {
        let mut inner = self.inner.lock().await;
        self.check_recovery(&mut inner);

        match inner.state {
            CircuitState::Closed => Ok(None),
            CircuitState::Open => {
                inner.total_rejections += 1;
                Err(CircuitBreakerError::Open {
                    name: self.name.clone(),
                    retry_after: self.remaining_open_time(&inner),
                })
            }
            CircuitState::HalfOpen => {
                let in_flight = self.half_open_in_flight.load(Ordering::SeqCst);
                if in_flight >= self.config.half_open_max_calls {
                    inner.total_rejections += 1;
                    debug!("Circuit '{}' half-open trial slots exhausted", self.name);
                    return Err(CircuitBreakerError::Open {
                        name: self.name.clone(),
                        retry_after: Duration::ZERO,
                    });
                }
                self.half_open_in_flight.fetch_add(1, Ordering::SeqCst);
                Ok(Some(self.trial_epoch.load(Ordering::SeqCst)))
            }
        }
    }

    async fn on_success(&self) {
        let mut inner = self.inner.lock().await;
        inner.total_successes += 1;

        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    info!("Circuit '{}' closed after successful trial", self.name);
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.opened_at = None;
                    self.clear_trials();
                }
            }
            // A call admitted before a forced open finished; nothing to count.
            CircuitState::Open => {}
        }
    }

    async fn on_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.total_failures += 1;

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    self.trip(&mut inner);
                }
            }
            CircuitState::HalfOpen => {
                warn!("Circuit '{}' trial call failed", self.name);
                self.trip(&mut inner);
            }
            CircuitState::Open => {}
        }
    }

    fn trip(&self, inner: &mut BreakerInner) {
        warn!(
            "Circuit '{}' opened after {} failures",
            self.name, inner.failure_count
        );
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.success_count = 0;
        self.clear_trials();
    }

    fn clear_trials(&self) {
        self.trial_epoch.fetch_add(1, Ordering::SeqCst);
        self.half_open_in_flight.store(0, Ordering::SeqCst);
    }

    fn check_recovery(&self, inner: &mut BreakerInner) {
        if inner.state != CircuitState::Open {
            return;
        }
        let elapsed = inner
            .opened_at
            .map(|at| at.elapsed())
            .unwrap_or(self.config.recovery_timeout);
        if elapsed >= self.config.recovery_timeout {
            info!("Circuit '{}' half-open, admitting trial calls", self.name);
            inner.state = CircuitState::HalfOpen;
            inner.success_count = 0;
            self.clear_trials();
        }
    }

    fn remaining_open_time(&self, inner: &BreakerInner) -> Duration {
        inner
            .opened_at
            .map(|at| self.config.recovery_timeout.saturating_sub(at.elapsed()))
            .unwrap_or(Duration::ZERO)
    }
}

/// Registry of breakers keyed by dependency name.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    default_config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            default_config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Get a breaker, creating it with the default config if missing.
    pub async fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        self.get_or_create_with(name, self.default_config.clone()).await
    }

    /// Get a breaker, creating it with `config` if missing.
    ///
    /// An existing breaker keeps its original config.
    pub async fn get_or_create_with(
        &self,
        name: &str,
        config: CircuitBreakerConfig,
    ) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().await.get(name) {
            return breaker.clone();
        }

        let mut breakers = self.breakers.write().await;
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!("Registering circuit breaker: {}", name);
                Arc::new(CircuitBreaker::new(name, config))
            })
            .clone()
    }

    pub async fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().await.get(name).cloned()
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn all_stats(&self) -> Vec<CircuitBreakerStats> {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.read().await.values().cloned().collect();
        let mut stats = Vec::with_capacity(breakers.len());
        for breaker in breakers {
            stats.push(breaker.stats().await);
        }
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    pub async fn reset_all(&self) {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.read().await.values().cloned().collect();
        for breaker in breakers {
            breaker.reset().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig::default()
            .with_failure_threshold(2)
            .with_recovery_timeout(Duration::from_millis(100))
    }

    fn slow_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig::default()
            .with_failure_threshold(2)
            .with_recovery_timeout(Duration::from_secs(60))
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<(), CircuitBreakerError<&'static str>> {
        breaker.call(|| async { Err::<(), _>("boom") }).await
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<u32, CircuitBreakerError<&'static str>> {
        breaker.call(|| async { Ok::<_, &'static str>(7) }).await
    }

    #[tokio::test]
    async fn test_opens_after_threshold() {
        let breaker = CircuitBreaker::new("llm", slow_config());

        assert!(matches!(fail(&breaker).await, Err(CircuitBreakerError::Inner("boom"))));
        assert_eq!(breaker.state().await, CircuitState::Closed);

        let _ = fail(&breaker).await;
        assert_eq!(breaker.state().await, CircuitState::Open);

        let rejected = succeed(&breaker).await.unwrap_err();
        assert!(rejected.is_open());
        assert_eq!(breaker.stats().await.total_rejections, 1);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let breaker = CircuitBreaker::new("redis", slow_config());

        let _ = fail(&breaker).await;
        assert_eq!(succeed(&breaker).await.unwrap(), 7);
        let _ = fail(&breaker).await;

        assert_eq!(breaker.state().await, CircuitState::Closed);
        assert_eq!(breaker.stats().await.failure_count, 1);
    }

    #[tokio::test]
    async fn test_half_open_success_closes() {
        let breaker = CircuitBreaker::new("vector_store", fast_config());
        breaker.force_open().await;

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);

        assert_eq!(succeed(&breaker).await.unwrap(), 7);
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("vector_store", fast_config());
        breaker.force_open().await;

        tokio::time::sleep(Duration::from_millis(150)).await;
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_half_open_limits_trial_calls() {
        let breaker = Arc::new(CircuitBreaker::new("llm", fast_config()));
        breaker.force_open().await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let trial = {
            let breaker = breaker.clone();
            tokio::spawn(async move {
                breaker
                    .call(|| async move {
                        let _ = release_rx.await;
                        Ok::<_, &'static str>(())
                    })
                    .await
            })
        };

        // Let the trial call take its slot.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(succeed(&breaker).await.unwrap_err().is_open());

        release_tx.send(()).unwrap();
        trial.await.unwrap().unwrap();
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_cancelled_trial_frees_slot() {
        let breaker = CircuitBreaker::new("redis", fast_config());
        breaker.force_open().await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            breaker.call(|| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, &'static str>(())
            }),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);

        assert_eq!(succeed(&breaker).await.unwrap(), 7);
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_success_threshold() {
        let config = fast_config().with_success_threshold(2).with_half_open_max_calls(2);
        let breaker = CircuitBreaker::new("llm", config);
        breaker.force_open().await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_registry_shares_breakers() {
        let registry = CircuitBreakerRegistry::new(slow_config());
        let a = registry.get_or_create("llm").await;
        let b = registry.get_or_create("llm").await;
        assert!(Arc::ptr_eq(&a, &b));

        registry.get_or_create("redis").await;
        assert_eq!(registry.names().await, vec!["llm", "redis"]);

        a.force_open().await;
        let stats = registry.all_stats().await;
        assert_eq!(stats[0].name, "llm");
        assert_eq!(stats[0].state, CircuitState::Open);

        registry.reset_all().await;
        assert_eq!(a.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_concurrent_get_or_create() {
        let registry = Arc::new(CircuitBreakerRegistry::default());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move { registry.get_or_create("postgres").await }));
        }
        let first = registry.get_or_create("postgres").await;
        for handle in handles {
            assert!(Arc::ptr_eq(&first, &handle.await.unwrap()));
        }
    }
}
