// src/driver/snapshot.rs

//! Driver that replays recorded HTML instead of running a browser.
//!
//! A [`SnapshotSite`] maps URLs to pages. Each page holds one HTML frame per
//! scroll step (the last frame repeats), which is enough to exercise the
//! navigation, pagination and extraction logic offline and to replay saved
//! page dumps.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};

use crate::driver::{Driver, DriverFactory};
use crate::error::{AppError, DriverFaultKind, Result};
use crate::models::{Cookie, StorageState, WaitPolicy};

const BLANK_PAGE: &str = "<html><head></head><body></body></html>";

/// Recorded frames for one URL.
#[derive(Debug, Clone)]
pub struct SnapshotPage {
    frames: Vec<String>,
}

impl SnapshotPage {
    pub fn new(html: impl Into<String>) -> Self {
        Self {
            frames: vec![html.into()],
        }
    }

    /// One frame per scroll step, starting with the initial render.
    pub fn with_frames(frames: Vec<String>) -> Self {
        Self { frames }
    }

    fn frame(&self, step: usize) -> &str {
        self.frames
            .get(step.min(self.frames.len().saturating_sub(1)))
            .map(String::as_str)
            .unwrap_or(BLANK_PAGE)
    }
}

/// Pages are only served when this cookie carries the accepted value.
#[derive(Debug, Clone)]
struct AuthGate {
    cookie: String,
    accepted: String,
    login_url: String,
}

/// A scripted website.
#[derive(Debug, Default)]
pub struct SnapshotSite {
    pages: HashMap<String, SnapshotPage>,
    redirects: HashMap<String, String>,
    faults: Mutex<HashMap<String, VecDeque<DriverFaultKind>>>,
    expiries: Mutex<HashMap<String, (usize, String)>>,
    gate: Option<AuthGate>,
    login_cookies: Option<(Vec<Cookie>, String)>,
    visits: Mutex<Vec<String>>,
}

impl SnapshotSite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: impl Into<String>, page: SnapshotPage) -> Self {
        self.pages.insert(url.into(), page);
        self
    }

    pub fn redirect(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.redirects.insert(from.into(), to.into());
        self
    }

    /// Fail the next navigation to `url` with `kind`. Queued faults fire in order.
    pub fn fault_once(self, url: impl Into<String>, kind: DriverFaultKind) -> Self {
        lock(&self.faults).entry(url.into()).or_default().push_back(kind);
        self
    }

    /// Once, after `scrolls` scroll steps on `url`, drop the page onto
    /// `login_url` as if the session had expired mid-read.
    pub fn expire_after(
        self,
        url: impl Into<String>,
        scrolls: usize,
        login_url: impl Into<String>,
    ) -> Self {
        lock(&self.expiries).insert(url.into(), (scrolls, login_url.into()));
        self
    }

    /// Redirect every page to `login_url` unless `cookie` equals `accepted`.
    pub fn require_cookie(
        mut self,
        cookie: impl Into<String>,
        accepted: impl Into<String>,
        login_url: impl Into<String>,
    ) -> Self {
        self.gate = Some(AuthGate {
            cookie: cookie.into(),
            accepted: accepted.into(),
            login_url: login_url.into(),
        });
        self
    }

    /// Submitting a form with Enter installs `cookies` and lands on `home_url`.
    pub fn on_login(mut self, cookies: Vec<Cookie>, home_url: impl Into<String>) -> Self {
        self.login_cookies = Some((cookies, home_url.into()));
        self
    }

    /// URLs navigated to so far, across all drivers.
    pub fn visits(&self) -> Vec<String> {
        lock(&self.visits).clone()
    }

    fn lookup(&self, url: &str) -> Option<&SnapshotPage> {
        self.pages
            .get(url)
            .or_else(|| url.split('?').next().and_then(|path| self.pages.get(path)))
    }

    fn take_fault(&self, url: &str) -> Option<DriverFaultKind> {
        lock(&self.faults).get_mut(url).and_then(VecDeque::pop_front)
    }

    fn take_expiry(&self, url: &str, step: usize) -> Option<String> {
        let mut expiries = lock(&self.expiries);
        let due = matches!(expiries.get(url), Some((scrolls, _)) if step >= *scrolls);
        if !due {
            return None;
        }
        expiries.remove(url).map(|(_, login)| login)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct PageState {
    url: String,
    step: usize,
    cookies: Vec<Cookie>,
    fills: Vec<(String, String)>,
    closed: bool,
}

/// A replay page over a [`SnapshotSite`].
#[derive(Debug)]
pub struct SnapshotDriver {
    site: Arc<SnapshotSite>,
    state: Mutex<PageState>,
}

impl SnapshotDriver {
    pub fn new(site: Arc<SnapshotSite>) -> Self {
        Self {
            site,
            state: Mutex::new(PageState {
                url: "about:blank".into(),
                ..PageState::default()
            }),
        }
    }

    /// Values typed into form fields, in order.
    pub fn fills(&self) -> Vec<(String, String)> {
        lock(&self.state).fills.clone()
    }

    fn live_state(&self) -> Result<MutexGuard<'_, PageState>> {
        let state = lock(&self.state);
        if state.closed {
            return Err(AppError::driver(
                DriverFaultKind::SessionClosedUnexpectedly,
                "Target page, context or browser has been closed",
            ));
        }
        Ok(state)
    }

    fn current_html(&self) -> Result<String> {
        let state = self.live_state()?;
        Ok(self
            .site
            .lookup(&state.url)
            .map(|page| page.frame(state.step).to_string())
            .unwrap_or_else(|| BLANK_PAGE.to_string()))
    }
}

#[async_trait]
impl Driver for SnapshotDriver {
    async fn navigate(&self, url: &str, _wait: WaitPolicy, _timeout: Duration) -> Result<()> {
        let mut state = self.live_state()?;
        lock(&self.site.visits).push(url.to_string());
        if let Some(kind) = self.site.take_fault(url) {
            return Err(AppError::driver(kind, format!("scripted fault at {url}")));
        }

        let mut landing = self
            .site
            .redirects
            .get(url)
            .cloned()
            .unwrap_or_else(|| url.to_string());
        if let Some(gate) = &self.site.gate {
            let authorized = state
                .cookies
                .iter()
                .any(|c| c.name == gate.cookie && c.value == gate.accepted);
            if !authorized && landing != gate.login_url {
                landing = gate.login_url.clone();
            }
        }
        state.url = landing;
        state.step = 0;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.live_state()?.url.clone())
    }

    async fn evaluate(&self, _script: &str) -> Result<serde_json::Value> {
        self.live_state()?;
        Ok(serde_json::Value::Null)
    }

    async fn content(&self) -> Result<String> {
        self.current_html()
    }

    async fn count(&self, selector: &str) -> Result<usize> {
        let parsed = Selector::parse(selector)
            .map_err(|e| AppError::selector(selector, format!("{e:?}")))?;
        let html = self.current_html()?;
        Ok(Html::parse_document(&html).select(&parsed).count())
    }

    async fn scroll_by(&self, _delta: i64) -> Result<()> {
        let mut state = self.live_state()?;
        state.step += 1;
        if let Some(login) = self.site.take_expiry(&state.url, state.step) {
            state.url = login;
            state.step = 0;
        }
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        if self.count(selector).await? == 0 {
            return Err(AppError::driver(
                DriverFaultKind::ScriptFailed,
                format!("no element matches {selector}"),
            ));
        }
        self.live_state()?
            .fills
            .push((selector.to_string(), value.to_string()));
        Ok(())
    }

    async fn press_key(&self, _selector: &str, key: &str) -> Result<()> {
        let mut state = self.live_state()?;
        if key == "Enter" && state.fills.len() >= 2 {
            if let Some((cookies, home)) = &self.site.login_cookies {
                state.cookies = cookies.clone();
                state.url = home.clone();
                state.step = 0;
            }
        }
        Ok(())
    }

    async fn cookies(&self) -> Result<Vec<Cookie>> {
        Ok(self.live_state()?.cookies.clone())
    }

    async fn set_cookies(&self, cookies: &[Cookie]) -> Result<()> {
        let mut state = self.live_state()?;
        for cookie in cookies {
            state.cookies.retain(|c| c.name != cookie.name);
            state.cookies.push(cookie.clone());
        }
        Ok(())
    }

    async fn screenshot(&self, path: &Path) -> Result<()> {
        let html = self.current_html()?;
        tokio::fs::write(path, html).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        lock(&self.state).closed = true;
        Ok(())
    }
}

/// Opens [`SnapshotDriver`]s over a shared site and counts what it did.
#[derive(Debug)]
pub struct SnapshotFactory {
    site: Arc<SnapshotSite>,
    opened: AtomicUsize,
    resets: AtomicUsize,
}

impl SnapshotFactory {
    pub fn new(site: SnapshotSite) -> Self {
        Self {
            site: Arc::new(site),
            opened: AtomicUsize::new(0),
            resets: AtomicUsize::new(0),
        }
    }

    pub fn site(&self) -> &SnapshotSite {
        &self.site
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DriverFactory for SnapshotFactory {
    async fn open(&self, state: Option<&StorageState>) -> Result<Box<dyn Driver>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let driver = SnapshotDriver::new(Arc::clone(&self.site));
        if let Some(state) = state {
            driver.load_storage_state(state).await?;
        }
        Ok(Box::new(driver))
    }

    async fn reset(&self) -> Result<()> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
