// src/driver/mod.rs

//! Driver adapter: the narrow surface the pipeline needs from a browser.
//!
//! Everything above this module talks to [`Driver`] and [`DriverFactory`]
//! only, so the browser engine can be swapped (or replayed from snapshots)
//! without touching navigation, pagination or extraction.

#[cfg(feature = "chromium")]
pub mod chromium;
pub mod snapshot;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::{Cookie, StorageState, WaitPolicy};
use crate::utils::url_matches_any;

/// Interval between readiness checks in [`Driver::wait_for_any`].
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// One exclusively-owned page in a browser session.
#[async_trait]
pub trait Driver: Send + Sync {
    async fn navigate(&self, url: &str, wait: WaitPolicy, timeout: Duration) -> Result<()>;

    async fn current_url(&self) -> Result<String>;

    /// Evaluate a script in the page and return its JSON result.
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value>;

    /// Serialized DOM of the current page.
    async fn content(&self) -> Result<String>;

    /// Number of elements matching `selector`.
    async fn count(&self, selector: &str) -> Result<usize>;

    async fn scroll_by(&self, delta: i64) -> Result<()>;

    /// Type `value` into the first element matching `selector`.
    async fn fill(&self, selector: &str, value: &str) -> Result<()>;

    async fn press_key(&self, selector: &str, key: &str) -> Result<()>;

    async fn cookies(&self) -> Result<Vec<Cookie>>;

    async fn set_cookies(&self, cookies: &[Cookie]) -> Result<()>;

    async fn storage_state(&self) -> Result<StorageState> {
        Ok(StorageState {
            cookies: self.cookies().await?,
            origins: Vec::new(),
        })
    }

    async fn load_storage_state(&self, state: &StorageState) -> Result<()> {
        self.set_cookies(&state.cookies).await
    }

    async fn screenshot(&self, path: &Path) -> Result<()>;

    async fn close(&self) -> Result<()>;

    /// Wait until any selector matches; returns the first one that did.
    async fn wait_for_any(&self, selectors: &[String], timeout: Duration) -> Result<Option<String>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            for selector in selectors {
                if self.count(selector).await? > 0 {
                    return Ok(Some(selector.clone()));
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

/// Opens fresh driver sessions.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    /// Open a new page, preloaded with `state` when given.
    async fn open(&self, state: Option<&StorageState>) -> Result<Box<dyn Driver>>;

    /// Tear down shared browser resources so the next `open` starts clean.
    async fn reset(&self) -> Result<()> {
        Ok(())
    }
}

/// Fail with `AuthRedirect` when the page has dropped onto the login flow.
pub async fn ensure_signed_in(driver: &dyn Driver, login_markers: &[String]) -> Result<()> {
    let url = driver.current_url().await?;
    if url_matches_any(&url, login_markers) {
        return Err(AppError::AuthRedirect { url });
    }
    Ok(())
}

/// Save a screenshot and an HTML dump of the current page. Failures are logged.
pub async fn save_diagnostics(driver: &dyn Driver, dir: &Path, label: &str) {
    if let Err(e) = tokio::fs::create_dir_all(dir).await {
        log::warn!("Cannot create diagnostics dir {}: {}", dir.display(), e);
        return;
    }
    let shot = dir.join(format!("{label}.png"));
    if let Err(e) = driver.screenshot(&shot).await {
        log::warn!("Screenshot {} failed: {}", shot.display(), e);
    }
    match driver.content().await {
        Ok(html) => {
            let dump = dir.join(format!("{label}.html"));
            if let Err(e) = tokio::fs::write(&dump, html).await {
                log::warn!("Page dump {} failed: {}", dump.display(), e);
            }
        }
        Err(e) => log::warn!("Page content unavailable for diagnostics: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::snapshot::{SnapshotFactory, SnapshotPage, SnapshotSite};
    use super::*;

    #[tokio::test]
    async fn test_wait_for_any_returns_first_match() {
        let site = SnapshotSite::new().page(
            "https://x.com/jack",
            SnapshotPage::new("<div role='article'>a</div>"),
        );
        let factory = SnapshotFactory::new(site);
        let driver = factory.open(None).await.unwrap();
        driver
            .navigate("https://x.com/jack", WaitPolicy::Load, Duration::from_secs(1))
            .await
            .unwrap();

        let selectors = vec!["article".to_string(), "div[role='article']".to_string()];
        let found = driver
            .wait_for_any(&selectors, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(found.as_deref(), Some("div[role='article']"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_any_times_out() {
        let site = SnapshotSite::new().page("https://x.com/jack", SnapshotPage::new("<p>x</p>"));
        let factory = SnapshotFactory::new(site);
        let driver = factory.open(None).await.unwrap();
        driver
            .navigate("https://x.com/jack", WaitPolicy::Load, Duration::from_secs(1))
            .await
            .unwrap();

        let found = driver
            .wait_for_any(&["article".to_string()], Duration::from_secs(2))
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_ensure_signed_in_detects_login_flow() {
        let login = "https://x.com/i/flow/login";
        let site = SnapshotSite::new()
            .page("https://x.com/jack", SnapshotPage::new("<p>x</p>"))
            .redirect("https://x.com/home", login);
        let factory = SnapshotFactory::new(site);
        let driver = factory.open(None).await.unwrap();
        let markers = vec!["/i/flow/login".to_string()];

        driver
            .navigate("https://x.com/jack", WaitPolicy::Load, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(ensure_signed_in(driver.as_ref(), &markers).await.is_ok());

        driver
            .navigate("https://x.com/home", WaitPolicy::Load, Duration::from_secs(1))
            .await
            .unwrap();
        let err = ensure_signed_in(driver.as_ref(), &markers).await.unwrap_err();
        assert!(matches!(err, AppError::AuthRedirect { url } if url == login));
    }

    #[tokio::test]
    async fn test_save_diagnostics_writes_dump() {
        let dir = tempfile::tempdir().unwrap();
        let site = SnapshotSite::new().page("https://x.com/jack", SnapshotPage::new("<p>x</p>"));
        let factory = SnapshotFactory::new(site);
        let driver = factory.open(None).await.unwrap();
        driver
            .navigate("https://x.com/jack", WaitPolicy::Load, Duration::from_secs(1))
            .await
            .unwrap();

        save_diagnostics(driver.as_ref(), dir.path(), "profile_0").await;
        assert!(dir.path().join("profile_0.html").exists());
        assert!(dir.path().join("profile_0.png").exists());
    }
}
