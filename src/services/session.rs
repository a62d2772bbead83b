//! Session manager: keeps one valid authenticated session and renews it.
//!
//! Renewal is single-flight. Callers that arrive while a renewal is running
//! wait for it and receive its outcome instead of starting another one.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, RwLock};

use crate::driver::{Driver, DriverFactory};
use crate::error::{AppError, Result};
use crate::models::{
    AuthSession, DriverConfig, SessionConfig, SessionValidity, StorageState, WaitPolicy,
};
use crate::storage::SessionStore;
use crate::utils::url_matches_any;

/// Produces a fresh storage state by signing in again.
#[async_trait]
pub trait SessionRenewer: Send + Sync {
    async fn renew(&self) -> Result<StorageState>;
}

/// Validity rules applied to sessions.
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    pub max_age: chrono::Duration,
    pub required_markers: Vec<String>,
    pub renewal_timeout: Duration,
}

impl From<&SessionConfig> for SessionPolicy {
    fn from(config: &SessionConfig) -> Self {
        Self {
            max_age: config.max_age(),
            required_markers: config.required_cookies.clone(),
            renewal_timeout: Duration::from_secs(config.renewal_timeout_secs),
        }
    }
}

/// Outcome of the most recent renewal.
#[derive(Default)]
struct Flight {
    generation: u64,
    outcome: Option<std::result::Result<AuthSession, String>>,
}

impl Flight {
    fn replay(&self) -> Option<Result<AuthSession>> {
        self.outcome
            .as_ref()
            .map(|outcome| outcome.clone().map_err(AppError::renewal_failed))
    }
}

fn failure_reason(err: &AppError) -> String {
    match err {
        AppError::Auth { reason, .. } => reason.clone(),
        other => other.to_string(),
    }
}

pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    renewer: Arc<dyn SessionRenewer>,
    policy: SessionPolicy,
    current: RwLock<Option<AuthSession>>,
    generation: AtomicU64,
    flight: Mutex<Flight>,
    renewals: AtomicU64,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        renewer: Arc<dyn SessionRenewer>,
        policy: SessionPolicy,
    ) -> Self {
        Self {
            store,
            renewer,
            policy,
            current: RwLock::new(None),
            generation: AtomicU64::new(0),
            flight: Mutex::new(Flight::default()),
            renewals: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    /// Number of renewals started so far.
    pub fn renewal_count(&self) -> u64 {
        self.renewals.load(Ordering::SeqCst)
    }

    /// Return a valid session, loading or renewing as needed.
    pub async fn ensure_valid(&self) -> Result<AuthSession> {
        if let Some(session) = self.cached_valid().await {
            return Ok(session);
        }

        let observed = self.generation.load(Ordering::SeqCst);
        let mut flight = self.flight.lock().await;
        if flight.generation != observed {
            if let Some(outcome) = flight.replay() {
                log::debug!("Reusing renewal outcome from generation {}", flight.generation);
                return outcome;
            }
        }

        if let Some(session) = self.cached_valid().await {
            return Ok(session);
        }
        if let Some(session) = self.load_persisted().await {
            *self.current.write().await = Some(session.clone());
            return Ok(session);
        }

        self.renew_locked(&mut flight).await
    }

    /// Renew after the driver was bounced to the login flow while using the
    /// session of `stale_generation`. A renewal that already replaced that
    /// session is reused.
    pub async fn renew_after_redirect(&self, stale_generation: u64) -> Result<AuthSession> {
        let mut flight = self.flight.lock().await;
        if flight.generation > stale_generation {
            if let Some(outcome) = flight.replay() {
                return outcome;
            }
        }
        log::warn!("Session generation {} was rejected, renewing", stale_generation);
        *self.current.write().await = None;
        self.renew_locked(&mut flight).await
    }

    /// Renew unconditionally.
    pub async fn force_renew(&self) -> Result<AuthSession> {
        let mut flight = self.flight.lock().await;
        self.renew_locked(&mut flight).await
    }

    /// Inspect the persisted session without renewing it.
    pub async fn status(&self) -> Result<(Option<AuthSession>, SessionValidity)> {
        match self.store.load().await? {
            Some(stored) => {
                let session = AuthSession::new(stored.state, stored.modified_at, self.policy.max_age);
                let validity = session.validity(Utc::now(), &self.policy.required_markers);
                Ok((Some(session), validity))
            }
            None => Ok((None, SessionValidity::Empty)),
        }
    }

    async fn cached_valid(&self) -> Option<AuthSession> {
        let current = self.current.read().await;
        current
            .as_ref()
            .filter(|s| s.validity(Utc::now(), &self.policy.required_markers).is_valid())
            .cloned()
    }

    async fn load_persisted(&self) -> Option<AuthSession> {
        let stored = match self.store.load().await {
            Ok(Some(stored)) => stored,
            Ok(None) => return None,
            Err(e) => {
                log::warn!("Session store unavailable: {}", e);
                return None;
            }
        };

        let mut session = AuthSession::new(stored.state, stored.modified_at, self.policy.max_age);
        session.generation = self.generation.load(Ordering::SeqCst);
        match session.validity(Utc::now(), &self.policy.required_markers) {
            SessionValidity::Valid => Some(session),
            other => {
                log::info!("Persisted session unusable: {:?}", other);
                None
            }
        }
    }

    async fn renew_locked(&self, flight: &mut Flight) -> Result<AuthSession> {
        self.renewals.fetch_add(1, Ordering::SeqCst);
        let generation = self.generation.load(Ordering::SeqCst) + 1;
        log::info!("Renewing session (generation {})", generation);

        let renewed = match tokio::time::timeout(self.policy.renewal_timeout, self.renewer.renew()).await
        {
            Ok(Ok(state)) => self.adopt(state, generation).await,
            Ok(Err(e)) => Err(AppError::renewal_failed(failure_reason(&e))),
            Err(_) => Err(AppError::renewal_failed(format!(
                "timed out after {}s",
                self.policy.renewal_timeout.as_secs()
            ))),
        };

        match &renewed {
            Ok(_) => log::info!("Session renewed"),
            Err(e) => log::error!("{}", e),
        }

        flight.generation = generation;
        flight.outcome = Some(match &renewed {
            Ok(session) => Ok(session.clone()),
            Err(e) => Err(failure_reason(e)),
        });
        self.generation.store(generation, Ordering::SeqCst);
        renewed
    }

    async fn adopt(&self, state: StorageState, generation: u64) -> Result<AuthSession> {
        let missing = state.missing_markers(&self.policy.required_markers);
        if !missing.is_empty() {
            return Err(AppError::renewal_failed(format!(
                "renewed session lacks {}",
                missing.join(", ")
            )));
        }

        let verified_at = match self.store.save(&state).await {
            Ok(at) => at,
            Err(e) => {
                log::warn!("Could not persist renewed session: {}", e);
                Utc::now()
            }
        };
        let mut session = AuthSession::new(state, verified_at, self.policy.max_age);
        session.generation = generation;
        *self.current.write().await = Some(session.clone());
        Ok(session)
    }
}

/// Account credentials for the login form.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Read credentials from the environment variables named in config.
    pub fn from_env(config: &SessionConfig) -> Option<Self> {
        let username = std::env::var(&config.username_env).ok()?;
        let password = std::env::var(&config.password_env).ok()?;
        if username.is_empty() || password.is_empty() {
            return None;
        }
        Some(Self { username, password })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Renews by filling in the login form in a fresh driver session.
pub struct BrowserLoginRenewer {
    factory: Arc<dyn DriverFactory>,
    session: SessionConfig,
    navigation_timeout: Duration,
    credentials: Option<Credentials>,
}

impl BrowserLoginRenewer {
    pub fn new(
        factory: Arc<dyn DriverFactory>,
        session: SessionConfig,
        driver: &DriverConfig,
        credentials: Option<Credentials>,
    ) -> Self {
        Self {
            factory,
            session,
            navigation_timeout: driver.navigation_timeout(),
            credentials,
        }
    }

    async fn wait_for_field(&self, driver: &dyn Driver, selector: &str) -> Result<()> {
        let found = driver
            .wait_for_any(&[selector.to_string()], self.navigation_timeout)
            .await?;
        match found {
            Some(_) => Ok(()),
            None => Err(AppError::renewal_failed(format!(
                "login field {selector} never appeared"
            ))),
        }
    }

    async fn submit_field(&self, driver: &dyn Driver, selector: &str, value: &str) -> Result<()> {
        self.wait_for_field(driver, selector).await?;
        driver.fill(selector, value).await?;
        driver.press_key(selector, "Enter").await?;
        tokio::time::sleep(Duration::from_millis(self.session.step_delay_ms)).await;
        Ok(())
    }

    async fn login(&self, driver: &dyn Driver, credentials: &Credentials) -> Result<StorageState> {
        driver
            .navigate(
                &self.session.login_url,
                WaitPolicy::DomContentLoaded,
                self.navigation_timeout,
            )
            .await?;

        self.submit_field(driver, &self.session.username_selector, &credentials.username)
            .await?;
        self.submit_field(driver, &self.session.password_selector, &credentials.password)
            .await?;

        let landed = driver.current_url().await?;
        if url_matches_any(&landed, &self.session.login_markers) {
            return Err(AppError::renewal_failed(format!(
                "still on the login flow at {landed} (challenge or rejected credentials)"
            )));
        }

        driver.storage_state().await
    }
}

#[async_trait]
impl SessionRenewer for BrowserLoginRenewer {
    async fn renew(&self) -> Result<StorageState> {
        let credentials = self.credentials.as_ref().ok_or_else(|| {
            AppError::renewal_failed(format!(
                "no credentials: set {} and {}",
                self.session.username_env, self.session.password_env
            ))
        })?;

        let driver = self.factory.open(None).await?;
        let result = self.login(driver.as_ref(), credentials).await;
        if let Err(e) = driver.close().await {
            log::debug!("Closing login driver: {}", e);
        }
        result.map_err(|e| match e {
            AppError::Auth { .. } => e,
            other => AppError::renewal_failed(other),
        })
    }
}
