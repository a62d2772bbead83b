// src/pipeline/harvest.rs

//! Request coordinator: session, navigation, pagination, extraction,
//! filtering and optional enrichment for one extraction request.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::driver::{Driver, DriverFactory, ensure_signed_in};
use crate::error::{AppError, NavigationErrorKind, Result};
use crate::models::{
    AuthSession, Config, EnrichmentOptions, ExtractionRequest, Item, NavigationTarget,
    StorageState, Subject, sort_newest_first,
};
use crate::pipeline::circuit_breaker::{
    CircuitBreaker, RetryPolicy, run_with_retry, with_session_renewal,
};
use crate::services::{
    ContainerMatch, DomMetricsReader, EnrichmentLimits, EnrichmentPipeline, Extractor, FastPath,
    GraphqlClient, NavigationSequencer, PaginationController, PaginationOutcome, QualityFilter,
    SessionManager, SlowPath, SlowPathReading, plan_targets,
};

/// Non-fatal conditions attached to a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HarvestWarning {
    /// Fewer items than the requested minimum were found
    BelowMinimum { found: usize, min: usize },
    /// Every remaining target failed after some items were gathered
    TargetsExhausted { items_gathered: usize },
    /// Enrichment stopped at its time budget
    EnrichmentBudgetExceeded { unenriched: usize },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HarvestStats {
    pub attempts: u32,
    pub passes: usize,
    pub scroll_steps: usize,
    pub candidates: usize,
    pub dropped: usize,
    pub renewals: usize,
    /// Extraction issues by kind
    pub issues: BTreeMap<String, usize>,
    pub enriched: usize,
    pub estimated: usize,
    pub backfilled: usize,
}

/// A populated (possibly short) result.
#[derive(Debug, Clone)]
pub struct HarvestOutcome {
    pub subject: Subject,
    /// Newest first, at most `max_items`
    pub items: Vec<Item>,
    pub warnings: Vec<HarvestWarning>,
    pub stats: HarvestStats,
    pub enrichment_requested: bool,
}

/// A fatal failure together with how much had been gathered.
#[derive(Debug, Error)]
#[error("{error} ({items_gathered} items gathered)")]
pub struct HarvestFailure {
    #[source]
    pub error: AppError,
    pub items_gathered: usize,
}

impl HarvestFailure {
    fn new(error: AppError, items_gathered: usize) -> Self {
        Self {
            error,
            items_gathered,
        }
    }
}

struct Collected {
    items: Vec<Item>,
    session: AuthSession,
    stats: HarvestStats,
    exhausted: bool,
}

/// Holds the live driver so it can be closed even when the request is
/// abandoned at its deadline.
#[derive(Default)]
struct DriverSlot(Mutex<Option<Arc<dyn Driver>>>);

impl DriverSlot {
    fn replace(&self, driver: Option<Arc<dyn Driver>>) -> Option<Arc<dyn Driver>> {
        let mut slot = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::replace(&mut *slot, driver)
    }

    async fn close(&self) {
        if let Some(driver) = self.replace(None) {
            if let Err(e) = driver.close().await {
                log::warn!("Closing driver failed: {}", e);
            }
        }
    }
}

/// Permalink reads with the harvest's retry policy, shared breaker and
/// session renewal around each item.
struct GuardedSlowPath {
    reader: DomMetricsReader,
    sessions: Arc<SessionManager>,
    session: tokio::sync::Mutex<AuthSession>,
    retry: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
}

#[async_trait]
impl SlowPath for GuardedSlowPath {
    async fn read(&self, item: &Item, options: &EnrichmentOptions) -> Result<SlowPathReading> {
        let label = format!("Permalink {}", item.dedup_key());
        let label = label.as_str();
        let mut session = self.session.lock().await.clone();
        let generation = session.generation;

        let reading = with_session_renewal(&self.sessions, &mut session, label, |renewed| async move {
            if let Some(state) = renewed {
                self.reader.set_state(state);
            }
            run_with_retry(&self.retry, &self.breaker, label, |_| self.reader.read(item, options))
                .await
        })
        .await;

        if session.generation != generation {
            let mut shared = self.session.lock().await;
            if session.generation > shared.generation {
                *shared = session;
            }
        }
        reading
    }
}

pub struct Harvester {
    config: Config,
    factory: Arc<dyn DriverFactory>,
    sessions: Arc<SessionManager>,
    navigation: NavigationSequencer,
    pagination: PaginationController,
    extractor: Extractor,
    quality: QualityFilter,
    login_markers: Vec<String>,
    retry: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
    permits: Semaphore,
    fast_path: Option<Arc<dyn FastPath>>,
}

impl Harvester {
    pub fn new(
        config: Config,
        factory: Arc<dyn DriverFactory>,
        sessions: Arc<SessionManager>,
    ) -> Result<Self> {
        Ok(Self {
            navigation: NavigationSequencer::new(&config, sessions.clone()),
            pagination: PaginationController::new(&config.pagination)
                .with_login_markers(config.session.login_markers.clone()),
            extractor: Extractor::new(&config.selectors, &config.extraction)?,
            quality: QualityFilter::new(&config.quality),
            login_markers: config.session.login_markers.clone(),
            retry: RetryPolicy::from(&config.retry),
            breaker: Arc::new(CircuitBreaker::new(&config.retry)),
            permits: Semaphore::new(config.request.max_concurrent.max(1)),
            fast_path: None,
            config,
            factory,
            sessions,
        })
    }

    /// Use this fast path instead of the GraphQL client built from the
    /// environment.
    pub fn with_fast_path(mut self, fast_path: Arc<dyn FastPath>) -> Self {
        self.fast_path = Some(fast_path);
        self
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Run one request end to end.
    pub async fn harvest(
        &self,
        request: &ExtractionRequest,
    ) -> std::result::Result<HarvestOutcome, HarvestFailure> {
        request.validate().map_err(|e| HarvestFailure::new(e, 0))?;
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| HarvestFailure::new(AppError::validation("harvester is shut down"), 0))?;

        let targets = plan_targets(
            request,
            &self.config.navigation,
            &self.config.selectors,
            Utc::now(),
        );
        log::info!(
            "Harvesting {} across {} targets (max {}, min {})",
            request.subject,
            targets.len(),
            request.max_items,
            request.min_items
        );

        let progress = AtomicUsize::new(0);
        let slot = DriverSlot::default();
        let limit = Duration::from_secs(self.config.request.timeout_secs);
        let collected = tokio::time::timeout(
            limit,
            self.collect_with_retry(request, &targets, &slot, &progress),
        )
        .await;
        slot.close().await;

        let gathered = progress.load(Ordering::SeqCst);
        let collected = match collected {
            Ok(Ok(collected)) => collected,
            Ok(Err(error)) => return Err(HarvestFailure::new(error, gathered)),
            Err(_) => {
                log::error!("Request for {} timed out after {}s", request.subject, limit.as_secs());
                return Err(HarvestFailure::new(
                    AppError::Timeout {
                        elapsed_secs: limit.as_secs(),
                    },
                    gathered,
                ));
            }
        };

        Ok(self.finish(request, collected).await)
    }

    async fn collect_with_retry(
        &self,
        request: &ExtractionRequest,
        targets: &[NavigationTarget],
        slot: &DriverSlot,
        progress: &AtomicUsize,
    ) -> Result<Collected> {
        let label = format!("Harvest {}", request.subject);
        run_with_retry(&self.retry, &self.breaker, &label, |attempt| async move {
            if attempt > 1 {
                slot.close().await;
                self.factory.reset().await?;
            }
            let mut session = self.sessions.ensure_valid().await?;
            let driver: Arc<dyn Driver> = Arc::from(self.factory.open(Some(&session.state)).await?);
            slot.replace(Some(driver.clone()));

            let mut collected = self
                .collect(driver.as_ref(), &mut session, request, targets, progress)
                .await?;
            collected.stats.attempts = attempt;
            Ok(collected)
        })
        .await
    }

    /// Pagination passes over successive targets until enough items are
    /// accepted or the targets run out. A target that keeps sending the
    /// session back to the login flow is skipped like any failed target.
    async fn collect(
        &self,
        driver: &dyn Driver,
        session: &mut AuthSession,
        request: &ExtractionRequest,
        targets: &[NavigationTarget],
        progress: &AtomicUsize,
    ) -> Result<Collected> {
        let mut stats = HarvestStats::default();
        let mut seen = HashSet::new();
        let mut accepted: Vec<Item> = Vec::new();
        let mut offset = 0;
        let mut next = 0;
        let mut exhausted = false;
        progress.store(0, Ordering::SeqCst);

        loop {
            let page = match self.navigation.load_from(driver, session, targets, next).await {
                Ok(page) => page,
                Err(AppError::Navigation { .. }) if stats.passes > 0 => {
                    exhausted = true;
                    break;
                }
                Err(AppError::Navigation { kind, .. }) => {
                    return Err(AppError::navigation(kind, accepted.len()));
                }
                Err(e) => return Err(e),
            };
            stats.renewals += usize::from(page.renewed);
            next = page.index + 1;

            let remaining = request.max_items.saturating_sub(accepted.len());
            let steps = request.max_scroll_steps;
            let target = &page.target;
            let generation = session.generation;
            let label = format!("Reading {}", target.kind.as_str());
            let read = with_session_renewal(&self.sessions, session, &label, move |renewed| {
                self.read_target(driver, target, remaining, steps, renewed)
            })
            .await;
            if session.generation != generation {
                stats.renewals += 1;
            }

            let (scrolled, html) = match read {
                Ok(read) => read,
                Err(AppError::Navigation {
                    kind: NavigationErrorKind::AuthRedirectLoop,
                    ..
                }) => {
                    log::warn!("{} keeps redirecting to login, moving on", target.url);
                    if next < targets.len() {
                        continue;
                    }
                    if stats.passes > 0 {
                        exhausted = true;
                        break;
                    }
                    return Err(AppError::navigation(
                        NavigationErrorKind::AuthRedirectLoop,
                        accepted.len(),
                    ));
                }
                Err(e) => return Err(e),
            };
            stats.passes += 1;
            stats.scroll_steps += scrolled.steps;

            let mut report = self.extractor.extract_html(&html);
            if report.containers == ContainerMatch::None {
                log::warn!("{}", AppError::no_container(&target.url));
            }
            stats.candidates += report.candidates();
            for (kind, count) in report.issue_counts() {
                *stats.issues.entry(kind.to_string()).or_default() += count;
            }
            for item in &mut report.items {
                item.discovery_index += offset;
            }
            offset += report.items.len();

            let filtered = self.quality.filter(report.items, &mut seen);
            stats.dropped += filtered.dropped.len();
            accepted.extend(filtered.accepted);
            progress.store(accepted.len(), Ordering::SeqCst);
            log::info!(
                "Pass {} on {}: {} accepted so far",
                stats.passes,
                target.kind.as_str(),
                accepted.len()
            );

            let enough = accepted.len() >= request.max_items
                || (stats.passes == 1 && accepted.len() >= request.min_items);
            if enough {
                break;
            }
            if next >= targets.len() {
                exhausted = true;
                break;
            }
        }

        sort_newest_first(&mut accepted);
        accepted.truncate(request.max_items);
        Ok(Collected {
            items: accepted,
            session: session.clone(),
            stats,
            exhausted,
        })
    }

    /// Scroll a loaded target and return its final DOM. With a renewed
    /// state the target is reloaded first.
    async fn read_target(
        &self,
        driver: &dyn Driver,
        target: &NavigationTarget,
        remaining: usize,
        steps: usize,
        renewed: Option<StorageState>,
    ) -> Result<(PaginationOutcome, String)> {
        if let Some(state) = renewed {
            driver.load_storage_state(&state).await?;
            self.navigation.reload(driver, target).await?;
        }
        let scrolled = self
            .pagination
            .run(driver, &self.extractor, remaining, steps)
            .await?;
        ensure_signed_in(driver, &self.login_markers).await?;
        let html = driver.content().await?;
        Ok((scrolled, html))
    }

    async fn finish(&self, request: &ExtractionRequest, collected: Collected) -> HarvestOutcome {
        let Collected {
            mut items,
            session,
            mut stats,
            exhausted,
        } = collected;
        let mut warnings = Vec::new();
        if exhausted {
            warnings.push(HarvestWarning::TargetsExhausted {
                items_gathered: items.len(),
            });
        }

        if let Some(options) = request.enrichment {
            match self.enrichment(&session) {
                Ok(pipeline) => {
                    let limits = EnrichmentLimits {
                        options,
                        min_items: request.min_items,
                    };
                    let report = pipeline.enrich(items, &limits).await;
                    if report.budget_exceeded {
                        warnings.push(HarvestWarning::EnrichmentBudgetExceeded {
                            unenriched: report.unenriched,
                        });
                    }
                    stats.enriched = report.enriched;
                    stats.estimated = report.estimated;
                    stats.backfilled = report.backfilled;
                    items = report.items;
                }
                Err(e) => log::warn!("Enrichment unavailable: {}", e),
            }
        }

        if items.len() < request.min_items {
            log::warn!(
                "Only {} items for {} (minimum {})",
                items.len(),
                request.subject,
                request.min_items
            );
            warnings.push(HarvestWarning::BelowMinimum {
                found: items.len(),
                min: request.min_items,
            });
        }

        HarvestOutcome {
            subject: request.subject.clone(),
            items,
            warnings,
            stats,
            enrichment_requested: request.enrichment.is_some(),
        }
    }

    fn enrichment(&self, session: &AuthSession) -> Result<EnrichmentPipeline> {
        let slow = self.slow_path(session)?;
        let fast: Option<Arc<dyn FastPath>> = match &self.fast_path {
            Some(fast) => Some(fast.clone()),
            None => GraphqlClient::from_env(&self.config.enrichment.fast_path, Some(&session.state))
                .unwrap_or_else(|e| {
                    log::warn!("Fast path unavailable: {}", e);
                    None
                })
                .map(|client| Arc::new(client) as Arc<dyn FastPath>),
        };
        Ok(EnrichmentPipeline::new(
            &self.config.enrichment,
            fast,
            Arc::new(slow),
        ))
    }

    fn slow_path(&self, session: &AuthSession) -> Result<GuardedSlowPath> {
        let reader = DomMetricsReader::new(
            self.factory.clone(),
            &self.config.selectors,
            &self.config.navigation,
            &self.config.driver,
            &self.config.enrichment,
            Some(session.state.clone()),
        )?
        .with_login_markers(self.login_markers.clone());
        Ok(GuardedSlowPath {
            reader,
            sessions: self.sessions.clone(),
            session: tokio::sync::Mutex::new(session.clone()),
            retry: self.retry.clone(),
            breaker: self.breaker.clone(),
        })
    }
}
