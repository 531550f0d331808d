//! Circuit breaker — stops calling a failing provider for a cooldown period.
//!
//! ```text
//! closed ──(threshold consecutive failures)──> open
//! open ──(cooldown elapsed, computed on read)──> half_open
//! half_open ──(success)──> closed
//! half_open ──(failure)──> open
//! ```
//!
//! All bookkeeping sits behind one mutex per breaker, so two callers can
//! never both claim the single half-open probe.

use mnemo_core::error::ProviderError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default)]
struct Inner {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// - `failure_threshold`: consecutive failures before tripping (min 1)
    /// - `cooldown`: how long the circuit stays open before allowing a probe
    pub fn new(name: impl Into<String>, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            cooldown,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn from_config(name: impl Into<String>, config: &mnemo_config::ResilienceConfig) -> Self {
        Self::new(name, config.failure_threshold, config.cooldown())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state_of(&self, inner: &Inner) -> BreakerState {
        match inner.opened_at {
            None => BreakerState::Closed,
            Some(at) if at.elapsed() >= self.cooldown => BreakerState::HalfOpen,
            Some(_) => BreakerState::Open,
        }
    }

    /// Current state, derived from the clock at the time of the call.
    pub fn state(&self) -> BreakerState {
        let inner = self.lock();
        self.state_of(&inner)
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Claim permission to call. While half-open only one probe is admitted
    /// until its outcome is recorded.
    pub fn try_acquire(&self) -> Result<(), ProviderError> {
        let mut inner = self.lock();
        match self.state_of(&inner) {
            BreakerState::Closed => Ok(()),
            BreakerState::HalfOpen if !inner.probe_in_flight => {
                inner.probe_in_flight = true;
                info!(provider = %self.name, "Circuit half-open, admitting probe");
                Ok(())
            }
            BreakerState::HalfOpen | BreakerState::Open => Err(ProviderError::CircuitOpen {
                provider: self.name.clone(),
            }),
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.opened_at.is_some() {
            info!(provider = %self.name, "Circuit closed");
        }
        *inner = Inner::default();
    }

    /// Give back a claimed call without an outcome. A half-open breaker
    /// stays half-open and admits the next probe.
    pub fn release(&self) {
        self.lock().probe_in_flight = false;
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        let state = self.state_of(&inner);
        inner.probe_in_flight = false;
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);

        match state {
            BreakerState::HalfOpen => {
                inner.opened_at = Some(Instant::now());
                warn!(provider = %self.name, "Probe failed, circuit re-opened");
            }
            BreakerState::Open => {
                inner.opened_at = Some(Instant::now());
            }
            BreakerState::Closed if inner.consecutive_failures >= self.failure_threshold => {
                inner.opened_at = Some(Instant::now());
                warn!(
                    provider = %self.name,
                    failures = inner.consecutive_failures,
                    cooldown_ms = self.cooldown.as_millis() as u64,
                    "Circuit opened"
                );
            }
            BreakerState::Closed => {}
        }
    }

    /// Run `f` through the breaker.
    ///
    /// Rejects with [`ProviderError::CircuitOpen`] without calling `f` while
    /// open. Otherwise the outcome is recorded and returned unchanged.
    pub async fn execute<T, F, Fut>(&self, f: F) -> Result<T, ProviderError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        self.try_acquire()?;
        match f().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(e)
            }
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("failures", &self.failure_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new("p1", 3, Duration::from_millis(1000))
    }

    async fn fail(b: &CircuitBreaker) -> Result<(), ProviderError> {
        b.execute(|| async { Err::<(), _>(ProviderError::Network("down".into())) })
            .await
    }

    async fn succeed(b: &CircuitBreaker) -> Result<u32, ProviderError> {
        b.execute(|| async { Ok(7) }).await
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_consecutive_failures() {
        let b = breaker();
        fail(&b).await.unwrap_err();
        fail(&b).await.unwrap_err();
        assert_eq!(b.state(), BreakerState::Closed);
        fail(&b).await.unwrap_err();
        assert_eq!(b.state(), BreakerState::Open);

        let err = succeed(&b).await.unwrap_err();
        assert!(matches!(err, ProviderError::CircuitOpen { ref provider } if provider == "p1"));
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_consecutive_count() {
        let b = breaker();
        fail(&b).await.unwrap_err();
        fail(&b).await.unwrap_err();
        assert_eq!(succeed(&b).await.unwrap(), 7);
        assert_eq!(b.failure_count(), 0);
        fail(&b).await.unwrap_err();
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_after_cooldown_then_closes_on_success() {
        let b = breaker();
        for _ in 0..3 {
            fail(&b).await.unwrap_err();
        }
        tokio::time::advance(Duration::from_millis(999)).await;
        assert_eq!(b.state(), BreakerState::Open);
        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(b.state(), BreakerState::HalfOpen);

        succeed(&b).await.unwrap();
        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(b.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_failure_reopens_immediately() {
        let b = breaker();
        for _ in 0..3 {
            fail(&b).await.unwrap_err();
        }
        tokio::time::advance(Duration::from_millis(1000)).await;
        assert_eq!(b.state(), BreakerState::HalfOpen);

        fail(&b).await.unwrap_err();
        assert_eq!(b.state(), BreakerState::Open);

        // The cooldown restarts from the failed probe.
        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(b.state(), BreakerState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn only_one_probe_while_half_open() {
        let b = breaker();
        for _ in 0..3 {
            fail(&b).await.unwrap_err();
        }
        tokio::time::advance(Duration::from_millis(1000)).await;

        assert!(b.try_acquire().is_ok());
        assert!(matches!(
            b.try_acquire(),
            Err(ProviderError::CircuitOpen { .. })
        ));
        b.record_success();
        assert!(b.try_acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn released_probe_leaves_breaker_half_open() {
        let b = breaker();
        for _ in 0..3 {
            fail(&b).await.unwrap_err();
        }
        tokio::time::advance(Duration::from_millis(1000)).await;

        b.try_acquire().unwrap();
        b.release();
        assert_eq!(b.state(), BreakerState::HalfOpen);
        assert_eq!(b.failure_count(), 3);
        assert!(b.try_acquire().is_ok());
    }

    #[tokio::test]
    async fn original_error_is_returned() {
        let b = breaker();
        let err = b
            .execute(|| async { Err::<(), _>(ProviderError::AuthenticationFailed("bad".into())) })
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::AuthenticationFailed(_)));
        assert_eq!(b.failure_count(), 1);
    }

    #[test]
    fn state_names() {
        assert_eq!(BreakerState::HalfOpen.to_string(), "half_open");
        assert_eq!(
            serde_json::to_string(&BreakerState::Open).unwrap(),
            "\"open\""
        );
    }
}
