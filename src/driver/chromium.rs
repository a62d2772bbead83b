// src/driver/chromium.rs

//! Chrome DevTools Protocol driver built on `chromiumoxide`.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::error::CdpError;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::driver::{Driver, DriverFactory};
use crate::error::{AppError, DriverFaultKind, Result};
use crate::models::{Cookie, DriverConfig, StorageState, WaitPolicy};

/// Extra wait after load when the caller asked for network idle.
const NETWORK_IDLE_GRACE: Duration = Duration::from_millis(500);

fn fault(err: CdpError) -> AppError {
    let message = err.to_string();
    let kind = if matches!(err, CdpError::Timeout) {
        DriverFaultKind::NavigationTimeout
    } else if message.contains("closed") || message.contains("channel") {
        DriverFaultKind::SessionClosedUnexpectedly
    } else {
        DriverFaultKind::ScriptFailed
    };
    AppError::driver(kind, message)
}

/// A launched browser plus its event-loop task.
struct BrowserHandle {
    browser: Mutex<Browser>,
    handler: JoinHandle<()>,
    closed: Arc<AtomicBool>,
}

impl BrowserHandle {
    async fn launch(config: &DriverConfig) -> Result<Self> {
        let mut builder = BrowserConfig::builder()
            .window_size(config.viewport_width, config.viewport_height)
            .request_timeout(config.navigation_timeout())
            .arg(format!("--user-agent={}", config.user_agent));
        if !config.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &config.executable {
            builder = builder.chrome_executable(path);
        }
        for arg in &config.launch_args {
            builder = builder.arg(arg.as_str());
        }
        let browser_config = builder
            .build()
            .map_err(|e| AppError::driver(DriverFaultKind::Unavailable, e))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| AppError::driver(DriverFaultKind::Unavailable, e))?;

        let closed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&closed);
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
            flag.store(true, Ordering::SeqCst);
        });

        log::info!("Browser launched (headless: {})", config.headless);
        Ok(Self {
            browser: Mutex::new(browser),
            handler,
            closed,
        })
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) {
        let mut browser = self.browser.lock().await;
        if let Err(e) = browser.close().await {
            log::debug!("Browser close: {}", e);
        }
        if let Err(e) = browser.wait().await {
            log::debug!("Browser wait: {}", e);
        }
        self.handler.abort();
    }
}

impl Drop for BrowserHandle {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

/// One tab in a shared browser.
pub struct ChromiumDriver {
    page: Page,
    browser: Arc<BrowserHandle>,
}

impl ChromiumDriver {
    fn ensure_open(&self) -> Result<()> {
        if self.browser.is_closed() {
            return Err(AppError::driver(
                DriverFaultKind::SessionClosedUnexpectedly,
                "Target page, context or browser has been closed",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Driver for ChromiumDriver {
    async fn navigate(&self, url: &str, wait: WaitPolicy, timeout: Duration) -> Result<()> {
        self.ensure_open()?;
        let load = async {
            self.page.goto(url).await.map_err(fault)?;
            if wait == WaitPolicy::NetworkIdle {
                tokio::time::sleep(NETWORK_IDLE_GRACE).await;
            }
            Ok::<(), AppError>(())
        };
        match tokio::time::timeout(timeout, load).await {
            Ok(result) => result,
            Err(_) => Err(AppError::driver(
                DriverFaultKind::NavigationTimeout,
                format!("{url} did not load within {}ms", timeout.as_millis()),
            )),
        }
    }

    async fn current_url(&self) -> Result<String> {
        self.ensure_open()?;
        Ok(self.page.url().await.map_err(fault)?.unwrap_or_default())
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        self.ensure_open()?;
        let result = self.page.evaluate(script).await.map_err(fault)?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn content(&self) -> Result<String> {
        self.ensure_open()?;
        self.page.content().await.map_err(fault)
    }

    async fn count(&self, selector: &str) -> Result<usize> {
        let script = format!(
            "document.querySelectorAll({}).length",
            serde_json::to_string(selector)?
        );
        let value = self.evaluate(&script).await?;
        Ok(value.as_u64().unwrap_or(0) as usize)
    }

    async fn scroll_by(&self, delta: i64) -> Result<()> {
        self.evaluate(&format!("window.scrollBy(0, {delta})")).await?;
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        self.ensure_open()?;
        let element = self.page.find_element(selector).await.map_err(fault)?;
        element.click().await.map_err(fault)?;
        element.type_str(value).await.map_err(fault)?;
        Ok(())
    }

    async fn press_key(&self, selector: &str, key: &str) -> Result<()> {
        self.ensure_open()?;
        let element = self.page.find_element(selector).await.map_err(fault)?;
        element.press_key(key).await.map_err(fault)?;
        Ok(())
    }

    async fn cookies(&self) -> Result<Vec<Cookie>> {
        self.ensure_open()?;
        let cookies = self.page.get_cookies().await.map_err(fault)?;
        Ok(cookies
            .into_iter()
            .map(|c| Cookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                expires: c.expires,
                http_only: c.http_only,
                secure: c.secure,
                same_site: c.same_site.map(|s| format!("{s:?}")),
            })
            .collect())
    }

    async fn set_cookies(&self, cookies: &[Cookie]) -> Result<()> {
        self.ensure_open()?;
        let mut params = Vec::with_capacity(cookies.len());
        for cookie in cookies {
            let param = CookieParam::builder()
                .name(cookie.name.clone())
                .value(cookie.value.clone())
                .domain(cookie.domain.clone())
                .path(cookie.path.clone())
                .secure(cookie.secure)
                .http_only(cookie.http_only)
                .build()
                .map_err(|e| AppError::driver(DriverFaultKind::ScriptFailed, e))?;
            params.push(param);
        }
        self.page.set_cookies(params).await.map_err(fault)?;
        Ok(())
    }

    async fn screenshot(&self, path: &Path) -> Result<()> {
        self.ensure_open()?;
        let params = ScreenshotParams::builder().full_page(true).build();
        self.page
            .save_screenshot(params, path)
            .await
            .map_err(fault)?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.browser.is_closed() {
            return Ok(());
        }
        self.page.clone().close().await.map_err(fault)
    }
}

/// Launches one browser lazily and hands out a fresh tab per `open`.
pub struct ChromiumFactory {
    config: DriverConfig,
    browser: Mutex<Option<Arc<BrowserHandle>>>,
}

impl ChromiumFactory {
    pub fn new(config: DriverConfig) -> Self {
        Self {
            config,
            browser: Mutex::new(None),
        }
    }

    async fn browser(&self) -> Result<Arc<BrowserHandle>> {
        let mut slot = self.browser.lock().await;
        if let Some(handle) = slot.as_ref() {
            if !handle.is_closed() {
                return Ok(Arc::clone(handle));
            }
            log::warn!("Browser exited unexpectedly, relaunching");
        }
        let handle = Arc::new(BrowserHandle::launch(&self.config).await?);
        *slot = Some(Arc::clone(&handle));
        Ok(handle)
    }
}

#[async_trait]
impl DriverFactory for ChromiumFactory {
    async fn open(&self, state: Option<&StorageState>) -> Result<Box<dyn Driver>> {
        let browser = self.browser().await?;
        let page = {
            let guard = browser.browser.lock().await;
            guard.new_page("about:blank").await.map_err(fault)?
        };
        let driver = ChromiumDriver { page, browser };
        if let Some(state) = state {
            driver.load_storage_state(state).await?;
        }
        Ok(Box::new(driver))
    }

    async fn reset(&self) -> Result<()> {
        let previous = self.browser.lock().await.take();
        if let Some(handle) = previous {
            log::info!("Restarting browser session");
            handle.shutdown().await;
        }
        Ok(())
    }
}
