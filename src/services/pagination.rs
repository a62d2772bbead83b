// src/services/pagination.rs

//! Scroll-driven pagination with convergence detection.

use std::time::Duration;

use crate::driver::{Driver, ensure_signed_in};
use crate::error::Result;
use crate::models::PaginationConfig;
use crate::services::extractor::Extractor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationState {
    Init,
    Scrolling,
    Counting,
    Continue,
    Converged,
    TargetReached,
    MaxIterations,
    Done,
}

impl PaginationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaginationState::Converged | PaginationState::TargetReached | PaginationState::MaxIterations
        )
    }
}

/// One counting step as the tracker saw it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepRecord {
    pub step: usize,
    pub count: usize,
    pub stagnant: usize,
    pub state: PaginationState,
}

/// Pure state machine behind the pagination loop.
#[derive(Debug, Clone)]
pub struct ScrollTracker {
    target: usize,
    max_steps: usize,
    stagnation_limit: usize,
    step: usize,
    previous: usize,
    stagnant: usize,
    state: PaginationState,
    termination: Option<PaginationState>,
    history: Vec<StepRecord>,
}

impl ScrollTracker {
    pub fn new(max_items: usize, max_steps: usize, config: &PaginationConfig) -> Self {
        let target = (config.target_multiplier * max_items as f64).ceil() as usize;
        Self {
            target: target.max(1),
            max_steps,
            stagnation_limit: config.stagnation_limit.max(1),
            step: 0,
            previous: 0,
            stagnant: 0,
            state: PaginationState::Init,
            termination: None,
            history: Vec::new(),
        }
    }

    /// Visible candidates at which scrolling stops early.
    pub fn target(&self) -> usize {
        self.target
    }

    pub fn state(&self) -> PaginationState {
        self.state
    }

    pub fn steps(&self) -> usize {
        self.step
    }

    pub fn history(&self) -> &[StepRecord] {
        &self.history
    }

    /// The terminal state that ended the loop, once it has ended.
    pub fn termination(&self) -> Option<PaginationState> {
        self.termination
    }

    /// Start the next scroll, or stop when no scroll budget remains.
    pub fn begin_step(&mut self) -> PaginationState {
        if self.step >= self.max_steps {
            self.state = PaginationState::MaxIterations;
            self.termination = Some(self.state);
            return self.state;
        }
        self.step += 1;
        self.state = PaginationState::Scrolling;
        self.state
    }

    /// The scroll was issued and the page settled.
    pub fn begin_count(&mut self) {
        self.state = PaginationState::Counting;
    }

    /// Feed the count observed after the current scroll.
    pub fn record(&mut self, count: usize) -> PaginationState {
        let next = if count == self.previous {
            self.stagnant += 1;
            if self.stagnant >= self.stagnation_limit {
                PaginationState::Converged
            } else {
                self.after_growth_checks(count)
            }
        } else {
            self.stagnant = 0;
            self.previous = count;
            self.after_growth_checks(count)
        };

        self.state = next;
        if next.is_terminal() {
            self.termination = Some(next);
        }
        self.history.push(StepRecord {
            step: self.step,
            count,
            stagnant: self.stagnant,
            state: next,
        });
        next
    }

    fn after_growth_checks(&self, count: usize) -> PaginationState {
        if count >= self.target {
            PaginationState::TargetReached
        } else if self.step >= self.max_steps {
            PaginationState::MaxIterations
        } else {
            PaginationState::Continue
        }
    }

    pub fn finish(&mut self) {
        self.state = PaginationState::Done;
    }
}

#[derive(Debug, Clone)]
pub struct PaginationOutcome {
    pub termination: PaginationState,
    pub steps: usize,
    pub final_count: usize,
    pub history: Vec<StepRecord>,
}

pub struct PaginationController {
    config: PaginationConfig,
    login_markers: Vec<String>,
}

impl PaginationController {
    pub fn new(config: &PaginationConfig) -> Self {
        Self {
            config: config.clone(),
            login_markers: Vec::new(),
        }
    }

    /// Treat landing on any of these URL fragments after a scroll as an
    /// auth redirect.
    pub fn with_login_markers(mut self, markers: Vec<String>) -> Self {
        self.login_markers = markers;
        self
    }

    /// Scroll until the visible count converges, reaches its target or the
    /// step budget runs out. Only counts are taken here; the caller runs the
    /// full extraction once afterwards. A scroll that lands on the login
    /// flow fails with `AuthRedirect`.
    pub async fn run(
        &self,
        driver: &dyn Driver,
        extractor: &Extractor,
        max_items: usize,
        max_steps: usize,
    ) -> Result<PaginationOutcome> {
        let mut tracker = ScrollTracker::new(max_items, max_steps, &self.config);
        let settle = Duration::from_millis(self.config.settle_ms);
        let mut final_count = 0;

        loop {
            if tracker.begin_step() == PaginationState::MaxIterations {
                final_count = extractor.count_visible(driver).await?;
                break;
            }
            driver.scroll_by(self.config.scroll_delta).await?;
            if !settle.is_zero() {
                tokio::time::sleep(settle).await;
            }
            ensure_signed_in(driver, &self.login_markers).await?;

            tracker.begin_count();
            final_count = extractor.count_visible(driver).await?;
            let state = tracker.record(final_count);
            log::debug!(
                "Scroll {}/{}: {} visible ({:?})",
                tracker.steps(),
                max_steps,
                final_count,
                state
            );
            if state.is_terminal() {
                break;
            }
        }

        let termination = tracker.termination().unwrap_or(PaginationState::MaxIterations);
        tracker.finish();
        log::info!(
            "Pagination ended {:?} after {} scrolls with {} visible (target {})",
            termination,
            tracker.steps(),
            final_count,
            tracker.target()
        );

        Ok(PaginationOutcome {
            termination,
            steps: tracker.steps(),
            final_count,
            history: tracker.history().to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::snapshot::{SnapshotDriver, SnapshotPage, SnapshotSite};
    use crate::error::AppError;
    use crate::models::{ExtractionConfig, SelectorTable, WaitPolicy};
    use std::sync::Arc;

    const URL: &str = "https://x.com/jack";

    fn config() -> PaginationConfig {
        PaginationConfig {
            settle_ms: 0,
            ..PaginationConfig::default()
        }
    }

    fn frame(count: usize) -> String {
        let posts: String = (0..count)
            .map(|i| format!("<article data-testid='tweet'>post {i}</article>"))
            .collect();
        format!("<html><body>{posts}</body></html>")
    }

    async fn driver(counts: &[usize]) -> SnapshotDriver {
        let frames = counts.iter().map(|&c| frame(c)).collect();
        let site = SnapshotSite::new().page(URL, SnapshotPage::with_frames(frames));
        let driver = SnapshotDriver::new(Arc::new(site));
        driver
            .navigate(URL, WaitPolicy::Load, Duration::from_secs(1))
            .await
            .unwrap();
        driver
    }

    fn extractor() -> Extractor {
        Extractor::new(&SelectorTable::default(), &ExtractionConfig::default()).unwrap()
    }

    #[test]
    fn test_tracker_converges_after_three_unchanged_counts() {
        let mut tracker = ScrollTracker::new(10, 10, &config());
        let mut states = Vec::new();
        for count in [4, 8, 8, 8, 8] {
            tracker.begin_step();
            tracker.begin_count();
            states.push(tracker.record(count));
        }
        assert_eq!(
            states,
            vec![
                PaginationState::Continue,
                PaginationState::Continue,
                PaginationState::Continue,
                PaginationState::Continue,
                PaginationState::Converged,
            ]
        );
        let stagnant: Vec<usize> = tracker.history().iter().map(|r| r.stagnant).collect();
        assert_eq!(stagnant, vec![0, 0, 1, 2, 3]);
    }

    #[test]
    fn test_tracker_growth_resets_stagnation() {
        let mut tracker = ScrollTracker::new(10, 10, &config());
        for count in [5, 5, 5, 6] {
            tracker.begin_step();
            tracker.record(count);
        }
        assert_eq!(tracker.state(), PaginationState::Continue);
        assert_eq!(tracker.history().last().unwrap().stagnant, 0);
    }

    #[test]
    fn test_tracker_target_uses_multiplier() {
        let mut tracker = ScrollTracker::new(10, 10, &config());
        assert_eq!(tracker.target(), 30);
        tracker.begin_step();
        assert_eq!(tracker.record(31), PaginationState::TargetReached);
    }

    #[test]
    fn test_tracker_step_budget() {
        let mut tracker = ScrollTracker::new(10, 2, &config());
        tracker.begin_step();
        assert_eq!(tracker.record(1), PaginationState::Continue);
        tracker.begin_step();
        assert_eq!(tracker.record(2), PaginationState::MaxIterations);
        assert_eq!(tracker.termination(), Some(PaginationState::MaxIterations));
    }

    #[test]
    fn test_tracker_zero_steps_never_scrolls() {
        let mut tracker = ScrollTracker::new(10, 0, &config());
        assert_eq!(tracker.begin_step(), PaginationState::MaxIterations);
        assert_eq!(tracker.steps(), 0);
    }

    #[tokio::test]
    async fn test_run_converges_on_static_page() {
        let driver = driver(&[3, 6, 9]).await;
        let outcome = PaginationController::new(&config())
            .run(&driver, &extractor(), 10, 10)
            .await
            .unwrap();
        assert_eq!(outcome.termination, PaginationState::Converged);
        assert_eq!(outcome.steps, 5);
        assert_eq!(outcome.final_count, 9);
        let counts: Vec<usize> = outcome.history.iter().map(|r| r.count).collect();
        assert_eq!(counts, vec![6, 9, 9, 9, 9]);
    }

    #[tokio::test]
    async fn test_run_stops_at_target() {
        let driver = driver(&[2, 7, 20]).await;
        let outcome = PaginationController::new(&config())
            .run(&driver, &extractor(), 2, 10)
            .await
            .unwrap();
        assert_eq!(outcome.termination, PaginationState::TargetReached);
        assert_eq!(outcome.steps, 1);
    }

    #[tokio::test]
    async fn test_run_halts_within_step_budget() {
        let counts: Vec<usize> = (1..=50).collect();
        let driver = driver(&counts).await;
        let outcome = PaginationController::new(&config())
            .run(&driver, &extractor(), 100, 4)
            .await
            .unwrap();
        assert_eq!(outcome.termination, PaginationState::MaxIterations);
        assert_eq!(outcome.steps, 4);
        assert_eq!(outcome.final_count, 5);
    }

    #[tokio::test]
    async fn test_run_is_idempotent_over_same_fixture() {
        let first = PaginationController::new(&config())
            .run(&driver(&[4, 8]).await, &extractor(), 10, 10)
            .await
            .unwrap();
        let second = PaginationController::new(&config())
            .run(&driver(&[4, 8]).await, &extractor(), 10, 10)
            .await
            .unwrap();
        assert_eq!(first.history, second.history);
        assert_eq!(first.termination, second.termination);
        assert_eq!(first.termination, PaginationState::Converged);
    }

    #[tokio::test]
    async fn test_run_reports_login_redirect_mid_scroll() {
        let login = "https://x.com/i/flow/login";
        let frames = [2, 4, 6, 8].iter().map(|&c| frame(c)).collect();
        let site = SnapshotSite::new()
            .page(URL, SnapshotPage::with_frames(frames))
            .expire_after(URL, 2, login);
        let driver = SnapshotDriver::new(Arc::new(site));
        driver
            .navigate(URL, WaitPolicy::Load, Duration::from_secs(1))
            .await
            .unwrap();

        let err = PaginationController::new(&config())
            .with_login_markers(vec!["/i/flow/login".into()])
            .run(&driver, &extractor(), 10, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AuthRedirect { url } if url == login));
    }
}
