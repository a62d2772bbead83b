//! Retry policy and circuit breaker for driver-backed operations.
//!
//! Transient driver faults are retried with growing backoff, the caller
//! recreating its driver session on every attempt. A run that exhausts its
//! attempts counts as one breaker failure; after enough consecutive failures
//! the breaker opens and requests fail fast until the cooldown passes, when a
//! single trial call is let through. Auth redirects are not retried here; the
//! failing step renews the session and runs once more instead.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{AppError, DriverFaultKind, NavigationErrorKind, Result};
use crate::models::{AuthSession, RetryConfig, StorageState};
use crate::services::SessionManager;

/// How the retry loop treats an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    /// Retry the whole operation on a fresh driver session
    Transient,
    /// Handled by session renewal at the failing step
    AuthRedirect,
    Fatal,
}

pub fn classify(error: &AppError) -> FaultClass {
    match error {
        AppError::Driver { kind, .. } => match kind {
            DriverFaultKind::SessionClosedUnexpectedly
            | DriverFaultKind::NavigationTimeout
            | DriverFaultKind::Unavailable => FaultClass::Transient,
            DriverFaultKind::ScriptFailed => FaultClass::Fatal,
        },
        AppError::Http(e) if e.is_timeout() || e.is_connect() => FaultClass::Transient,
        AppError::AuthRedirect { .. } => FaultClass::AuthRedirect,
        _ => FaultClass::Fatal,
    }
}

/// Bounded retry with multiplicative backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    pub multiplier: f64,
    pub max_backoff: Duration,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_millis(config.backoff_ms),
            multiplier: config.backoff_multiplier.max(1.0),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

impl RetryPolicy {
    /// Pause before attempt `attempt + 1`, with `attempt` starting at 1.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        self.backoff.mul_f64(factor).min(self.max_backoff)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    failures: u32,
    opened_at: Option<Instant>,
    probing: bool,
}

/// Consecutive-failure circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            threshold: config.failure_threshold.max(1),
            cooldown: Duration::from_secs(config.cooldown_secs),
            inner: Mutex::new(BreakerInner {
                failures: 0,
                opened_at: None,
                probing: false,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> BreakerState {
        let inner = self.lock();
        match inner.opened_at {
            None => BreakerState::Closed,
            Some(at) if at.elapsed() >= self.cooldown => BreakerState::HalfOpen,
            Some(_) => BreakerState::Open,
        }
    }

    /// Admit a request, or fail fast while the breaker is open.
    pub fn check(&self) -> Result<()> {
        let mut inner = self.lock();
        let Some(opened_at) = inner.opened_at else {
            return Ok(());
        };
        let elapsed = opened_at.elapsed();
        if elapsed >= self.cooldown && !inner.probing {
            log::info!("Circuit breaker: HALF OPEN, allowing one trial call");
            inner.probing = true;
            return Ok(());
        }
        Err(AppError::CircuitOpen {
            failures: inner.failures,
            retry_in_secs: self.cooldown.saturating_sub(elapsed).as_secs(),
        })
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.opened_at.is_some() {
            log::info!("Circuit breaker: CLOSED after successful trial call");
        }
        inner.failures = 0;
        inner.opened_at = None;
        inner.probing = false;
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.failures += 1;
        inner.probing = false;
        if inner.failures >= self.threshold {
            if inner.opened_at.is_none() {
                log::error!(
                    "Circuit breaker: OPEN after {} consecutive failures",
                    inner.failures
                );
            }
            inner.opened_at = Some(Instant::now());
        }
    }
}

/// Run `operation` under `policy`, retrying transient faults.
///
/// `operation` receives the attempt number (from 1) so it can rebuild its
/// driver session on retries. Non-transient errors are returned as they are.
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    breaker: &CircuitBreaker,
    label: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    breaker.check()?;

    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => {
                breaker.record_success();
                return Ok(value);
            }
            Err(error) if classify(&error) == FaultClass::Transient => {
                if attempt >= policy.max_attempts {
                    log::error!("{} failed after {} attempts: {}", label, attempt, error);
                    breaker.record_failure();
                    return Err(AppError::RetriesExhausted {
                        attempts: attempt,
                        source: Box::new(error),
                    });
                }
                let delay = policy.delay(attempt);
                log::warn!(
                    "{} attempt {}/{} failed ({}), retrying in {}ms",
                    label,
                    attempt,
                    policy.max_attempts,
                    error,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

/// Run `step` once. When it lands on the login flow, renew `session` and run
/// it again with the renewed state; a second redirect is an auth loop.
pub async fn with_session_renewal<T, F, Fut>(
    sessions: &SessionManager,
    session: &mut AuthSession,
    label: &str,
    mut step: F,
) -> Result<T>
where
    F: FnMut(Option<StorageState>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match step(None).await {
        Err(AppError::AuthRedirect { url }) => {
            log::warn!("{} was redirected to {}, renewing session", label, url);
            *session = sessions.renew_after_redirect(session.generation).await?;
            match step(Some(session.state.clone())).await {
                Err(AppError::AuthRedirect { url }) => {
                    log::error!("{} still redirected to {} after renewal", label, url);
                    Err(AppError::navigation(NavigationErrorKind::AuthRedirectLoop, 0))
                }
                other => other,
            }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Cookie, SessionConfig};
    use crate::services::{SessionPolicy, SessionRenewer};
    use crate::storage::{MemorySessionStore, StoredSession};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config() -> RetryConfig {
        RetryConfig {
            failure_threshold: 2,
            cooldown_secs: 60,
            ..RetryConfig::default()
        }
    }

    fn closed() -> AppError {
        AppError::driver(DriverFaultKind::SessionClosedUnexpectedly, "target closed")
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(&closed()), FaultClass::Transient);
        assert_eq!(
            classify(&AppError::driver(DriverFaultKind::ScriptFailed, "x")),
            FaultClass::Fatal
        );
        assert_eq!(
            classify(&AppError::AuthRedirect { url: "https://x.com/login".into() }),
            FaultClass::AuthRedirect
        );
        assert_eq!(classify(&AppError::config("bad")), FaultClass::Fatal);
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            backoff: Duration::from_millis(1000),
            multiplier: 2.0,
            max_backoff: Duration::from_millis(3000),
        };
        assert_eq!(policy.delay(1), Duration::from_millis(1000));
        assert_eq!(policy.delay(2), Duration::from_millis(2000));
        assert_eq!(policy.delay(3), Duration::from_millis(3000));
        assert_eq!(policy.delay(9), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_then_succeeds() {
        let breaker = CircuitBreaker::new(&config());
        let calls = AtomicU32::new(0);
        let value = run_with_retry(&RetryPolicy::from(&config()), &breaker, "test", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { if attempt < 3 { Err(closed()) } else { Ok(attempt) } }
        })
        .await
        .unwrap();
        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_surface_typed_error() {
        let breaker = CircuitBreaker::new(&config());
        let err = run_with_retry(&RetryPolicy::from(&config()), &breaker, "test", |_| async {
            Err::<(), _>(closed())
        })
        .await
        .unwrap_err();
        match err {
            AppError::RetriesExhausted { attempts, source } => {
                assert_eq!(attempts, 3);
                assert_eq!(
                    source.driver_fault(),
                    Some(DriverFaultKind::SessionClosedUnexpectedly)
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let breaker = CircuitBreaker::new(&config());
        let calls = AtomicU32::new(0);
        let err = run_with_retry(&RetryPolicy::from(&config()), &breaker, "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(AppError::validation("bad subject")) }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_opens_and_half_opens_after_cooldown() {
        let breaker = CircuitBreaker::new(&config());
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(matches!(breaker.check(), Err(AppError::CircuitOpen { failures: 2, .. })));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        assert!(breaker.check().is_ok());
        assert!(breaker.check().is_err());

        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.check().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_skips_operation() {
        let breaker = CircuitBreaker::new(&config());
        breaker.record_failure();
        breaker.record_failure();
        let calls = AtomicU32::new(0);
        let err = run_with_retry(&RetryPolicy::from(&config()), &breaker, "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::CircuitOpen { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    struct TokenRenewer;

    #[async_trait]
    impl SessionRenewer for TokenRenewer {
        async fn renew(&self) -> Result<StorageState> {
            Ok(StorageState {
                cookies: vec![
                    Cookie::new("auth_token", "renewed", ".x.com"),
                    Cookie::new("ct0", "csrf", ".x.com"),
                ],
                origins: vec![],
            })
        }
    }

    async fn signed_in() -> (SessionManager, AuthSession) {
        let store = MemorySessionStore::with_session(StoredSession {
            state: StorageState {
                cookies: vec![
                    Cookie::new("auth_token", "stored", ".x.com"),
                    Cookie::new("ct0", "csrf", ".x.com"),
                ],
                origins: vec![],
            },
            modified_at: Utc::now(),
        });
        let manager = SessionManager::new(
            Arc::new(store),
            Arc::new(TokenRenewer),
            SessionPolicy::from(&SessionConfig::default()),
        );
        let session = manager.ensure_valid().await.unwrap();
        (manager, session)
    }

    fn redirected() -> AppError {
        AppError::AuthRedirect {
            url: "https://x.com/i/flow/login".into(),
        }
    }

    #[tokio::test]
    async fn test_redirect_renews_and_reruns_step_once() {
        let (manager, mut session) = signed_in().await;
        let calls = AtomicU32::new(0);
        let token = with_session_renewal(&manager, &mut session, "paginate", |renewed| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                match renewed {
                    None => Err(redirected()),
                    Some(state) => Ok(state.cookie("auth_token").map(|c| c.value.clone())),
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(token.as_deref(), Some("renewed"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(manager.renewal_count(), 1);
        assert!(session.generation > 0);
    }

    #[tokio::test]
    async fn test_second_redirect_is_a_loop() {
        let (manager, mut session) = signed_in().await;
        let err = with_session_renewal(&manager, &mut session, "paginate", |_| async {
            Err::<(), _>(redirected())
        })
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            AppError::Navigation {
                kind: NavigationErrorKind::AuthRedirectLoop,
                ..
            }
        ));
        assert_eq!(manager.renewal_count(), 1);
    }

    #[tokio::test]
    async fn test_other_errors_skip_renewal() {
        let (manager, mut session) = signed_in().await;
        let err = with_session_renewal(&manager, &mut session, "paginate", |_| async {
            Err::<(), _>(closed())
        })
        .await
        .unwrap_err();
        assert_eq!(err.driver_fault(), Some(DriverFaultKind::SessionClosedUnexpectedly));
        assert_eq!(manager.renewal_count(), 0);
    }
}
