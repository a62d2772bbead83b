// src/services/navigation.rs

//! Navigation sequencer.
//!
//! Expands a request into an ordered list of candidate targets and walks a
//! driver through them until one renders item containers.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::driver::{Driver, save_diagnostics};
use crate::error::{AppError, DriverFaultKind, NavigationErrorKind, Result};
use crate::models::{
    AuthSession, Config, ExtractionRequest, NavigationConfig, NavigationTarget, SearchMode,
    SelectorTable, Subject, TargetKind, TargetTemplate, WaitPolicy,
};
use crate::services::session::SessionManager;
use crate::utils::{encode_query, url_matches_any};

/// Build the ordered candidate targets for a request.
///
/// The search variant matching the effective mode is moved to the front;
/// the rest keep their configured order. Duplicate URLs are dropped.
pub fn plan_targets(
    request: &ExtractionRequest,
    config: &NavigationConfig,
    selectors: &SelectorTable,
    now: DateTime<Utc>,
) -> Vec<NavigationTarget> {
    let mode = request.effective_mode();
    let templates = match request.subject {
        Subject::User(_) => &config.user_targets,
        Subject::Hashtag(_) => &config.hashtag_targets,
    };
    let preferred = match mode {
        SearchMode::Top => TargetKind::SearchTop,
        SearchMode::Live => TargetKind::SearchLive,
    };

    let mut targets: Vec<NavigationTarget> = templates
        .iter()
        .map(|template| NavigationTarget {
            url: render_url(template, request, &config.base_url, mode, now),
            expected_selectors: selectors.containers.clone(),
            kind: template.kind,
        })
        .collect();
    targets.sort_by_key(|t| t.kind != preferred);

    let mut seen = std::collections::HashSet::new();
    targets.retain(|t| seen.insert(t.url.clone()));
    targets
}

fn render_url(
    template: &TargetTemplate,
    request: &ExtractionRequest,
    base_url: &str,
    mode: SearchMode,
    now: DateTime<Utc>,
) -> String {
    let mut query = request.subject.search_query();
    if let Some(days) = template.since_days {
        let since = now - chrono::Duration::days(days);
        query.push_str(&format!(" since:{}", since.format("%Y-%m-%d")));
    }
    if let Some(lang) = &request.language {
        query.push_str(&format!(" lang:{lang}"));
    }

    let mode = match template.kind {
        TargetKind::SearchLive => SearchMode::Live,
        TargetKind::SearchTop => SearchMode::Top,
        _ => mode,
    };

    template
        .url
        .replace("{base}", base_url.trim_end_matches('/'))
        .replace("{subject}", request.subject.handle())
        .replace("{query}", &encode_query(&query))
        .replace("{mode}", mode.as_param())
}

/// How one attempt at a target ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetOutcome {
    /// A container selector matched
    Success(String),
    /// The page bounced to the login flow
    AuthRedirect(String),
    /// Loaded, but no container appeared in time
    Empty,
    Error(String),
}

/// A target that rendered item containers.
#[derive(Debug, Clone)]
pub struct LoadedPage {
    pub target: NavigationTarget,
    /// Position in the planned target list
    pub index: usize,
    pub matched_selector: String,
    /// Whether a session renewal happened while loading
    pub renewed: bool,
}

pub struct NavigationSequencer {
    config: NavigationConfig,
    wait: WaitPolicy,
    timeout: Duration,
    login_markers: Vec<String>,
    diagnostics_dir: Option<PathBuf>,
    sessions: Arc<SessionManager>,
}

impl NavigationSequencer {
    pub fn new(config: &Config, sessions: Arc<SessionManager>) -> Self {
        Self {
            config: config.navigation.clone(),
            wait: config.driver.wait_policy,
            timeout: config.driver.navigation_timeout(),
            login_markers: config.session.login_markers.clone(),
            diagnostics_dir: config.driver.diagnostics_dir.as_ref().map(PathBuf::from),
            sessions,
        }
    }

    /// Load the first target at or after `start` that renders containers.
    ///
    /// An auth redirect renews the session once and retries the same target;
    /// a second redirect skips to the next target. `AuthRedirectLoop` is only
    /// returned when every remaining target looped. Faults that mean the
    /// driver itself is gone are returned as-is for the retry layer.
    pub async fn load_from(
        &self,
        driver: &dyn Driver,
        session: &mut AuthSession,
        targets: &[NavigationTarget],
        start: usize,
    ) -> Result<LoadedPage> {
        let mut renewed_any = false;
        let mut looped = 0;
        for (index, target) in targets.iter().enumerate().skip(start) {
            let mut renewed = false;
            loop {
                let outcome = self.attempt(driver, target).await?;
                log::debug!("Target {} ({}): {:?}", index, target.kind.as_str(), outcome);
                match outcome {
                    TargetOutcome::Success(matched_selector) => {
                        log::info!("Loaded {} via {}", target.url, matched_selector);
                        return Ok(LoadedPage {
                            target: target.clone(),
                            index,
                            matched_selector,
                            renewed: renewed_any || renewed,
                        });
                    }
                    TargetOutcome::AuthRedirect(url) => {
                        if renewed {
                            log::error!(
                                "Still redirected to {} after renewal, skipping {}",
                                url,
                                target.kind.as_str()
                            );
                            self.diagnose(driver, target, index, "login").await;
                            looped += 1;
                            break;
                        }
                        log::warn!("Redirected to login at {}, renewing session", url);
                        *session = self.sessions.renew_after_redirect(session.generation).await?;
                        driver.load_storage_state(&session.state).await?;
                        renewed = true;
                    }
                    TargetOutcome::Empty => {
                        log::warn!("No content on {} ({})", target.url, target.kind.as_str());
                        self.diagnose(driver, target, index, "empty").await;
                        break;
                    }
                    TargetOutcome::Error(message) => {
                        log::warn!("Target {} failed: {}", target.url, message);
                        self.diagnose(driver, target, index, "error").await;
                        break;
                    }
                }
            }
            renewed_any |= renewed;
        }

        let tried = targets.len().saturating_sub(start);
        let kind = if tried > 0 && looped == tried {
            NavigationErrorKind::AuthRedirectLoop
        } else {
            NavigationErrorKind::AllTargetsFailed
        };
        Err(AppError::navigation(kind, 0))
    }

    /// Navigate back to an already loaded target, typically after a session
    /// renewal. Landing on the login flow again is an `AuthRedirect`.
    pub async fn reload(&self, driver: &dyn Driver, target: &NavigationTarget) -> Result<()> {
        match self.attempt(driver, target).await? {
            TargetOutcome::Success(_) => Ok(()),
            TargetOutcome::AuthRedirect(url) => Err(AppError::AuthRedirect { url }),
            other => {
                log::warn!("Reloading {} gave {:?}", target.url, other);
                Ok(())
            }
        }
    }

    async fn attempt(&self, driver: &dyn Driver, target: &NavigationTarget) -> Result<TargetOutcome> {
        match driver.navigate(&target.url, self.wait, self.timeout).await {
            Ok(()) => {}
            Err(e) => match e.driver_fault() {
                Some(DriverFaultKind::NavigationTimeout) | Some(DriverFaultKind::ScriptFailed) => {
                    return Ok(TargetOutcome::Error(e.to_string()));
                }
                _ => return Err(e),
            },
        }

        if self.config.settle_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.settle_ms)).await;
        }

        let landed = driver.current_url().await?;
        if url_matches_any(&landed, &self.login_markers) {
            return Ok(TargetOutcome::AuthRedirect(landed));
        }

        let wait = Duration::from_millis(self.config.selector_timeout_ms);
        match driver.wait_for_any(&target.expected_selectors, wait).await? {
            Some(selector) => Ok(TargetOutcome::Success(selector)),
            None => {
                let landed = driver.current_url().await?;
                if url_matches_any(&landed, &self.login_markers) {
                    Ok(TargetOutcome::AuthRedirect(landed))
                } else {
                    Ok(TargetOutcome::Empty)
                }
            }
        }
    }

    async fn diagnose(&self, driver: &dyn Driver, target: &NavigationTarget, index: usize, what: &str) {
        if let Some(dir) = &self.diagnostics_dir {
            let label = format!(
                "{}_{}_{}_{}",
                Utc::now().format("%Y%m%d_%H%M%S"),
                index,
                target.kind.as_str(),
                what
            );
            save_diagnostics(driver, dir, &label).await;
        }
    }
}
