// src/services/enrichment.rs

//! Tiered metrics enrichment with adaptive batching.
//!
//! Each item goes to the fast path first (one structured API request); when
//! that reports failure the slow path reads the permalink page instead. Items
//! are processed in batches whose size follows the success rate of the
//! previous batch, and the whole run is bounded by a wall-clock budget.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use crate::error::{AppError, Result};
use crate::models::{
    Comment, EnrichmentConfig, EnrichmentOptions, Item, Metrics, MetricsSource, sort_newest_first,
};

/// Result of one fast-path lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FastPathResult {
    pub success: bool,
    pub metrics: Metrics,
    pub comments: Vec<Comment>,
}

impl FastPathResult {
    pub fn failed() -> Self {
        Self::default()
    }
}

/// Counters and replies read from a rendered permalink page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlowPathReading {
    pub metrics: Metrics,
    pub comments: Vec<Comment>,
}

#[async_trait]
pub trait FastPath: Send + Sync {
    /// Never fails; problems are reported as `success == false`.
    async fn fetch(&self, item: &Item, options: &EnrichmentOptions) -> FastPathResult;
}

#[async_trait]
pub trait SlowPath: Send + Sync {
    async fn read(&self, item: &Item, options: &EnrichmentOptions) -> Result<SlowPathReading>;
}

/// Batch size controller driven by the last batch's success rate.
#[derive(Debug, Clone)]
pub struct AdaptiveBatcher {
    size: usize,
    min: usize,
    max: usize,
    raise_above: f64,
    lower_below: f64,
}

impl AdaptiveBatcher {
    pub fn new(config: &EnrichmentConfig) -> Self {
        let min = config.min_batch_size.max(1);
        let max = config.max_batch_size.max(min);
        Self {
            size: config.initial_batch_size.clamp(min, max),
            min,
            max,
            raise_above: config.raise_above,
            lower_below: config.lower_below,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Feed a finished batch and return the size for the next one.
    pub fn record(&mut self, successes: usize, total: usize) -> usize {
        if total == 0 {
            return self.size;
        }
        let rate = successes as f64 / total as f64;
        if rate > self.raise_above {
            self.size = (self.size + 1).min(self.max);
        } else if rate < self.lower_below {
            self.size = self.size.saturating_sub(1).max(self.min);
        }
        self.size
    }
}

/// Per-call knobs for [`EnrichmentPipeline::enrich`].
#[derive(Debug, Clone, Copy)]
pub struct EnrichmentLimits {
    pub options: EnrichmentOptions,
    /// Backfill target when too few items meet the engagement threshold
    pub min_items: usize,
}

#[derive(Debug, Default)]
pub struct EnrichmentReport {
    pub items: Vec<Item>,
    pub enriched: usize,
    pub estimated: usize,
    pub backfilled: usize,
    pub batch_sizes: Vec<usize>,
    /// Items left unenriched because the time budget ran out
    pub unenriched: usize,
    pub budget_exceeded: bool,
}

struct Enrichment {
    metrics: Metrics,
    comments: Vec<Comment>,
    source: MetricsSource,
}

pub struct EnrichmentPipeline {
    config: EnrichmentConfig,
    fast: Option<Arc<dyn FastPath>>,
    slow: Arc<dyn SlowPath>,
}

impl EnrichmentPipeline {
    pub fn new(
        config: &EnrichmentConfig,
        fast: Option<Arc<dyn FastPath>>,
        slow: Arc<dyn SlowPath>,
    ) -> Self {
        Self {
            config: config.clone(),
            fast,
            slow,
        }
    }

    async fn enrich_one(&self, item: &Item, options: &EnrichmentOptions) -> Option<Enrichment> {
        if item.id.is_empty() {
            log::debug!("No status id for {}, leaving it unenriched", item.dedup_key());
            return None;
        }
        if let Some(fast) = &self.fast {
            let result = fast.fetch(item, options).await;
            if result.success {
                return Some(Enrichment {
                    metrics: result.metrics,
                    comments: result.comments,
                    source: MetricsSource::FastPath,
                });
            }
        }

        match self.slow.read(item, options).await {
            Ok(reading) => Some(Enrichment {
                metrics: reading.metrics,
                comments: reading.comments,
                source: MetricsSource::SlowPath,
            }),
            Err(e) => {
                log::warn!("Enrichment failed for {}: {}", item.dedup_key(), e);
                None
            }
        }
    }

    /// Lower-bound guess for an item whose measured engagement is zero.
    fn estimate(&self, item: &Item) -> Option<Metrics> {
        let measured = item.metrics;
        let estimate = Metrics {
            likes: (measured.views as f64 * self.config.estimated_like_rate).floor() as u64,
            replies: measured.replies.max(item.comments.len() as u64),
            reposts: 0,
            views: measured.views,
        };
        (estimate.engagement() > 0).then_some(estimate)
    }

    fn apply(&self, item: &mut Item, enrichment: Enrichment, options: &EnrichmentOptions) -> bool {
        item.metrics = enrichment.metrics;
        item.metrics_source = enrichment.source;
        if options.comments {
            item.comments = enrichment.comments;
            item.comments.truncate(options.comment_limit);
        }
        if item.metrics.engagement() == 0 {
            item.estimated_metrics = self.estimate(item);
        }
        item.estimated_metrics.is_some()
    }

    /// Enrich `items` in adaptive batches within the configured time budget.
    ///
    /// Enriched items whose measured engagement stays below the threshold are
    /// excluded, then backfilled newest first up to `limits.min_items`.
    pub async fn enrich(&self, mut items: Vec<Item>, limits: &EnrichmentLimits) -> EnrichmentReport {
        let mut report = EnrichmentReport::default();
        let mut batcher = AdaptiveBatcher::new(&self.config);
        let deadline = tokio::time::Instant::now() + self.config.time_budget();
        let options = limits.options;

        let mut next = 0;
        while next < items.len() {
            let size = batcher.size();
            let end = (next + size).min(items.len());

            let batch = stream::iter(items[next..end].iter())
                .map(|item| self.enrich_one(item, &options))
                .buffered(size)
                .collect::<Vec<_>>();
            let Ok(results) = tokio::time::timeout_at(deadline, batch).await else {
                report.budget_exceeded = true;
                break;
            };
            report.batch_sizes.push(end - next);

            let mut successes = 0;
            for (item, result) in items[next..end].iter_mut().zip(results) {
                let Some(enrichment) = result else { continue };
                if !enrichment.metrics.is_zero() {
                    successes += 1;
                }
                report.enriched += 1;
                if self.apply(item, enrichment, &options) {
                    report.estimated += 1;
                }
            }
            batcher.record(successes, end - next);
            next = end;
        }

        if report.budget_exceeded {
            report.unenriched = items.len() - next;
            log::warn!(
                "{} (budget {}s)",
                AppError::budget_exceeded(report.unenriched),
                self.config.time_budget_secs
            );
        }

        for item in items.iter_mut().filter(|i| i.is_enriched()) {
            item.should_exclude = item.metrics.engagement() < self.config.min_engagement;
        }
        report.backfilled = backfill(&mut items, limits.min_items);

        items.retain(|i| !i.should_exclude);
        for item in &mut items {
            item.strip_internal();
        }
        sort_newest_first(&mut items);

        log::info!(
            "Enriched {} items ({} estimated, {} backfilled) in batches {:?}",
            report.enriched,
            report.estimated,
            report.backfilled,
            report.batch_sizes
        );
        report.items = items;
        report
    }
}

/// Re-admit excluded items, newest first, until `min_items` are kept.
fn backfill(items: &mut [Item], min_items: usize) -> usize {
    let kept = items.iter().filter(|i| !i.should_exclude).count();
    let deficit = min_items.saturating_sub(kept);
    if deficit == 0 {
        return 0;
    }

    let mut candidates: Vec<usize> = (0..items.len()).filter(|&i| items[i].should_exclude).collect();
    candidates.sort_by(|&a, &b| {
        items[b]
            .timestamp
            .cmp(&items[a].timestamp)
            .then(items[a].discovery_index.cmp(&items[b].discovery_index))
    });
    let mut restored = 0;
    for index in candidates.into_iter().take(deficit) {
        items[index].should_exclude = false;
        restored += 1;
    }
    restored
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct ScriptedFast {
        results: HashMap<String, FastPathResult>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FastPath for ScriptedFast {
        async fn fetch(&self, item: &Item, _: &EnrichmentOptions) -> FastPathResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.results.get(&item.id).cloned().unwrap_or_default()
        }
    }

    #[derive(Default)]
    struct ScriptedSlow {
        readings: HashMap<String, Metrics>,
        calls: Mutex<Vec<String>>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl SlowPath for ScriptedSlow {
        async fn read(&self, item: &Item, _: &EnrichmentOptions) -> Result<SlowPathReading> {
            self.calls.lock().unwrap().push(item.id.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            match self.readings.get(&item.id) {
                Some(metrics) => Ok(SlowPathReading {
                    metrics: *metrics,
                    comments: vec![],
                }),
                None => Err(AppError::validation("no counters")),
            }
        }
    }

    fn item(id: &str, hour: u32) -> Item {
        let mut item = Item::new(
            id,
            "jack",
            "post text",
            Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap(),
        );
        item.discovery_index = hour as usize;
        item
    }

    fn metrics(likes: u64, views: u64) -> Metrics {
        Metrics {
            likes,
            replies: 0,
            reposts: 0,
            views,
        }
    }

    fn limits(min_items: usize) -> EnrichmentLimits {
        EnrichmentLimits {
            options: EnrichmentOptions::default(),
            min_items,
        }
    }

    #[test]
    fn test_batcher_adapts_within_bounds() {
        let mut batcher = AdaptiveBatcher::new(&EnrichmentConfig::default());
        assert_eq!(batcher.size(), 2);
        assert_eq!(batcher.record(2, 2), 3);
        assert_eq!(batcher.record(3, 3), 4);
        assert_eq!(batcher.record(4, 4), 5);
        assert_eq!(batcher.record(5, 5), 5);
        assert_eq!(batcher.record(1, 2), 5);
        assert_eq!(batcher.record(0, 5), 4);
        for _ in 0..10 {
            batcher.record(0, 1);
        }
        assert_eq!(batcher.size(), 1);
    }

    #[tokio::test]
    async fn test_fast_failure_falls_back_to_slow_once() {
        let fast = Arc::new(ScriptedFast::default());
        let slow = Arc::new(ScriptedSlow {
            readings: HashMap::from([("1".to_string(), metrics(4, 100))]),
            ..ScriptedSlow::default()
        });
        let pipeline =
            EnrichmentPipeline::new(&EnrichmentConfig::default(), Some(fast.clone()), slow.clone());

        let report = pipeline.enrich(vec![item("1", 10)], &limits(0)).await;
        assert_eq!(fast.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*slow.calls.lock().unwrap(), vec!["1"]);
        assert_eq!(report.items[0].metrics_source, MetricsSource::SlowPath);
        assert_eq!(report.items[0].metrics.likes, 4);
    }

    #[tokio::test]
    async fn test_fast_success_skips_slow() {
        let fast = Arc::new(ScriptedFast {
            results: HashMap::from([(
                "1".to_string(),
                FastPathResult {
                    success: true,
                    metrics: metrics(7, 0),
                    comments: vec![],
                },
            )]),
            ..ScriptedFast::default()
        });
        let slow = Arc::new(ScriptedSlow::default());
        let pipeline = EnrichmentPipeline::new(&EnrichmentConfig::default(), Some(fast), slow.clone());

        let report = pipeline.enrich(vec![item("1", 10)], &limits(0)).await;
        assert!(slow.calls.lock().unwrap().is_empty());
        assert_eq!(report.items[0].metrics_source, MetricsSource::FastPath);
    }

    #[tokio::test]
    async fn test_estimates_are_kept_apart_from_measured() {
        let slow = Arc::new(ScriptedSlow {
            readings: HashMap::from([("1".to_string(), metrics(0, 500))]),
            ..ScriptedSlow::default()
        });
        let pipeline = EnrichmentPipeline::new(&EnrichmentConfig::default(), None, slow);

        let report = pipeline.enrich(vec![item("1", 10)], &limits(1)).await;
        let enriched = &report.items[0];
        assert_eq!(enriched.metrics, metrics(0, 500));
        assert_eq!(enriched.estimated_metrics.map(|m| m.likes), Some(5));
        assert_eq!(report.estimated, 1);
        assert_eq!(report.backfilled, 1);
    }

    #[tokio::test]
    async fn test_low_engagement_excluded_then_backfilled_newest_first() {
        let slow = Arc::new(ScriptedSlow {
            readings: HashMap::from([
                ("1".to_string(), metrics(0, 0)),
                ("2".to_string(), metrics(0, 0)),
                ("3".to_string(), metrics(9, 0)),
            ]),
            ..ScriptedSlow::default()
        });
        let pipeline = EnrichmentPipeline::new(&EnrichmentConfig::default(), None, slow);

        let items = vec![item("1", 8), item("2", 9), item("3", 10)];
        let report = pipeline.enrich(items, &limits(2)).await;
        let ids: Vec<&str> = report.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["3", "2"]);
        assert_eq!(report.backfilled, 1);
    }

    #[tokio::test]
    async fn test_failed_item_does_not_abort_batch() {
        let slow = Arc::new(ScriptedSlow {
            readings: HashMap::from([("2".to_string(), metrics(3, 0))]),
            ..ScriptedSlow::default()
        });
        let pipeline = EnrichmentPipeline::new(&EnrichmentConfig::default(), None, slow);

        let report = pipeline.enrich(vec![item("1", 8), item("2", 9)], &limits(0)).await;
        assert_eq!(report.enriched, 1);
        assert_eq!(report.items.len(), 2);
        assert!(!report.items.iter().find(|i| i.id == "1").unwrap().is_enriched());
    }

    #[tokio::test]
    async fn test_item_without_id_is_never_enriched() {
        let fast = Arc::new(ScriptedFast {
            results: HashMap::from([(
                String::new(),
                FastPathResult {
                    success: true,
                    metrics: metrics(7, 0),
                    comments: vec![],
                },
            )]),
            ..ScriptedFast::default()
        });
        let slow = Arc::new(ScriptedSlow {
            readings: HashMap::from([
                (String::new(), metrics(5, 0)),
                ("2".to_string(), metrics(3, 0)),
            ]),
            ..ScriptedSlow::default()
        });
        let pipeline = EnrichmentPipeline::new(
            &EnrichmentConfig::default(),
            Some(fast.clone()),
            slow.clone(),
        );

        let report = pipeline.enrich(vec![item("", 8), item("2", 9)], &limits(0)).await;
        assert_eq!(fast.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*slow.calls.lock().unwrap(), vec!["2"]);
        assert_eq!(report.items.len(), 2);
        let unnamed = report.items.iter().find(|i| i.id.is_empty()).unwrap();
        assert!(!unnamed.is_enriched());
        assert!(unnamed.metrics.is_zero());
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_budget_returns_remaining_unenriched() {
        let readings = (1..=6).map(|i| (i.to_string(), metrics(1, 0))).collect();
        let slow = Arc::new(ScriptedSlow {
            readings,
            delay: Some(Duration::from_secs(50)),
            ..ScriptedSlow::default()
        });
        let pipeline = EnrichmentPipeline::new(&EnrichmentConfig::default(), None, slow);

        let items = (1..=6).map(|i| item(&i.to_string(), i)).collect();
        let report = pipeline.enrich(items, &limits(0)).await;
        assert!(report.budget_exceeded);
        assert_eq!(report.items.len(), 6);
        assert_eq!(report.enriched, 5);
        assert_eq!(report.unenriched, 1);
        assert_eq!(report.batch_sizes, vec![2, 3]);
    }
}
