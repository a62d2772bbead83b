// src/services/metrics.rs

//! Slow path: read engagement counters from a post's permalink page.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::driver::{DriverFactory, ensure_signed_in};
use crate::error::{AppError, Result};
use crate::models::{
    Comment, DriverConfig, EnrichmentConfig, EnrichmentOptions, Item, Metrics, NavigationConfig,
    SelectorTable, StorageState,
};
use crate::services::enrichment::{SlowPath, SlowPathReading};
use crate::services::extractor::compile_selector;
use crate::utils::text::{collapse_whitespace, parse_count};
use crate::utils::{extract_status_author, extract_status_id, permalink_url};

const ARIA_COUNT: &str =
    r"(?i)(\d[\d,.]*\s*[KMB]?)\s+(repl(?:y|ies)|reposts?|retweets?|likes?|views?)\b";

/// Compiled metric selectors for one permalink page layout.
pub struct MetricsReader {
    focal: Selector,
    likes: Selector,
    replies: Selector,
    reposts: Selector,
    views: Selector,
    group: Selector,
    reply: Selector,
    permalink: Selector,
    text: Vec<Selector>,
    aria: Selector,
    aria_count: Regex,
}

fn first_count(scope: ElementRef<'_>, selector: &Selector) -> u64 {
    scope
        .select(selector)
        .filter_map(|el| {
            let text = collapse_whitespace(&el.text().collect::<String>());
            parse_count(&text).or_else(|| {
                el.value()
                    .attr("aria-label")
                    .and_then(|label| label.split_whitespace().next())
                    .and_then(parse_count)
            })
        })
        .next()
        .unwrap_or(0)
}

/// Fill the counters that are still zero from `other`.
fn fill_zeros(metrics: &mut Metrics, other: Metrics) {
    for (slot, value) in [
        (&mut metrics.likes, other.likes),
        (&mut metrics.replies, other.replies),
        (&mut metrics.reposts, other.reposts),
        (&mut metrics.views, other.views),
    ] {
        if *slot == 0 {
            *slot = value;
        }
    }
}

impl MetricsReader {
    pub fn new(table: &SelectorTable) -> Result<Self> {
        let m = &table.metrics;
        Ok(Self {
            focal: compile_selector(&m.focal)?,
            likes: compile_selector(&m.likes)?,
            replies: compile_selector(&m.replies)?,
            reposts: compile_selector(&m.reposts)?,
            views: compile_selector(&m.views)?,
            group: compile_selector(&m.group)?,
            reply: compile_selector(&m.reply)?,
            permalink: compile_selector(&table.permalink)?,
            text: table
                .text
                .iter()
                .map(|f| compile_selector(&f.selector))
                .collect::<Result<_>>()?,
            aria: compile_selector("[aria-label]")?,
            aria_count: Regex::new(ARIA_COUNT)
                .map_err(|e| AppError::config(format!("invalid counter pattern: {e}")))?,
        })
    }

    fn status_id(&self, element: ElementRef<'_>) -> Option<String> {
        element
            .select(&self.permalink)
            .filter_map(|a| a.value().attr("href"))
            .find_map(extract_status_id)
    }

    fn focal_element<'a>(&self, document: &'a Html, id: &str) -> ElementRef<'a> {
        let mut candidates = document.select(&self.focal);
        let first = candidates.next();
        first
            .into_iter()
            .chain(candidates)
            .find(|el| self.status_id(*el).as_deref() == Some(id))
            .or(first)
            .unwrap_or_else(|| document.root_element())
    }

    fn by_test_markers(&self, scope: ElementRef<'_>) -> Metrics {
        Metrics {
            likes: first_count(scope, &self.likes),
            replies: first_count(scope, &self.replies),
            reposts: first_count(scope, &self.reposts),
            views: first_count(scope, &self.views),
        }
    }

    /// Counter group read by position: reply, repost, like, then views.
    fn by_group_position(&self, scope: ElementRef<'_>) -> Metrics {
        let Some(group) = scope.select(&self.group).next() else {
            return Metrics::default();
        };
        let counts: Vec<u64> = group
            .text()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .filter_map(parse_count)
            .collect();
        let at = |i: usize| counts.get(i).copied().unwrap_or(0);
        Metrics {
            replies: at(0),
            reposts: at(1),
            likes: at(2),
            views: at(3),
        }
    }

    fn by_aria_labels(&self, scope: ElementRef<'_>) -> Metrics {
        let mut metrics = Metrics::default();
        for label in scope.select(&self.aria).filter_map(|el| el.value().attr("aria-label")) {
            for caps in self.aria_count.captures_iter(label) {
                let Some(value) = parse_count(&caps[1]) else {
                    continue;
                };
                let noun = caps[2].to_lowercase();
                let slot = if noun.starts_with("repl") {
                    &mut metrics.replies
                } else if noun.starts_with("repost") || noun.starts_with("retweet") {
                    &mut metrics.reposts
                } else if noun.starts_with("like") {
                    &mut metrics.likes
                } else {
                    &mut metrics.views
                };
                if *slot == 0 {
                    *slot = value;
                }
            }
        }
        metrics
    }

    fn reply_comment(&self, element: ElementRef<'_>) -> Option<Comment> {
        let href = element
            .select(&self.permalink)
            .filter_map(|a| a.value().attr("href"))
            .find(|h| extract_status_id(h).is_some())?;
        let user = extract_status_author(href)?;
        let text = self.text.iter().find_map(|selector| {
            let joined: Vec<String> = element
                .select(selector)
                .map(|el| el.text().collect::<String>())
                .collect();
            let text = collapse_whitespace(&joined.join(" "));
            (!text.is_empty()).then_some(text)
        })?;
        Some(Comment {
            user,
            text,
            likes: first_count(element, &self.likes),
        })
    }

    /// Read the focal post's counters and up to `reply_limit` replies.
    ///
    /// Strategies cascade: explicit test markers, the counter group by
    /// position, then aria-label text. Later strategies only fill counters
    /// the earlier ones left at zero.
    pub fn read_html(&self, html: &str, id: &str, reply_limit: usize) -> SlowPathReading {
        let document = Html::parse_document(html);
        let focal = self.focal_element(&document, id);

        let mut metrics = self.by_test_markers(focal);
        if metrics.is_zero() {
            metrics = self.by_group_position(focal);
        }
        fill_zeros(&mut metrics, self.by_aria_labels(focal));

        let comments = document
            .select(&self.reply)
            .filter(|el| self.status_id(*el).as_deref() != Some(id))
            .filter_map(|el| self.reply_comment(el))
            .take(reply_limit)
            .collect();

        SlowPathReading { metrics, comments }
    }
}

/// Slow path over a fresh driver page per item.
pub struct DomMetricsReader {
    factory: Arc<dyn DriverFactory>,
    reader: MetricsReader,
    focal: String,
    state: Mutex<Option<StorageState>>,
    login_markers: Vec<String>,
    base_url: String,
    driver: DriverConfig,
    selector_timeout: Duration,
    settle: Duration,
}

impl DomMetricsReader {
    pub fn new(
        factory: Arc<dyn DriverFactory>,
        table: &SelectorTable,
        navigation: &NavigationConfig,
        driver: &DriverConfig,
        enrichment: &EnrichmentConfig,
        state: Option<StorageState>,
    ) -> Result<Self> {
        Ok(Self {
            factory,
            reader: MetricsReader::new(table)?,
            focal: table.metrics.focal.clone(),
            state: Mutex::new(state),
            login_markers: Vec::new(),
            base_url: navigation.base_url.clone(),
            driver: driver.clone(),
            selector_timeout: Duration::from_millis(navigation.selector_timeout_ms),
            settle: Duration::from_millis(enrichment.page_settle_ms),
        })
    }

    /// Permalink pages landing on any of these URL fragments fail with
    /// `AuthRedirect`.
    pub fn with_login_markers(mut self, markers: Vec<String>) -> Self {
        self.login_markers = markers;
        self
    }

    /// Open later pages with `state`, e.g. after a renewal.
    pub fn set_state(&self, state: StorageState) {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(state);
    }

    fn current_state(&self) -> Option<StorageState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl SlowPath for DomMetricsReader {
    async fn read(&self, item: &Item, options: &EnrichmentOptions) -> Result<SlowPathReading> {
        let url = permalink_url(&self.base_url, &item.author, &item.id);
        let limit = if options.comments { options.comment_limit } else { 0 };
        let state = self.current_state();
        let page = self.factory.open(state.as_ref()).await?;

        let result = async {
            page.navigate(&url, self.driver.wait_policy, self.driver.navigation_timeout())
                .await?;
            ensure_signed_in(page.as_ref(), &self.login_markers).await?;
            let focal = page
                .wait_for_any(std::slice::from_ref(&self.focal), self.selector_timeout)
                .await?;
            if focal.is_none() {
                return Err(AppError::no_container(&url));
            }
            if !self.settle.is_zero() {
                tokio::time::sleep(self.settle).await;
            }
            let html = page.content().await?;
            Ok(self.reader.read_html(&html, &item.id, limit))
        }
        .await;

        if let Err(e) = page.close().await {
            log::debug!("Closing permalink page failed: {}", e);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::snapshot::{SnapshotFactory, SnapshotPage, SnapshotSite};

    fn reader() -> MetricsReader {
        MetricsReader::new(&SelectorTable::default()).unwrap()
    }

    fn focal(inner: &str) -> String {
        format!(
            "<html><body><article data-testid='tweet'>\
             <a href='/jack/status/100'>now</a>{inner}</article></body></html>"
        )
    }

    #[test]
    fn test_reads_test_markers() {
        let html = focal(
            "<div role='group'>\
             <button data-testid='reply'><span>12</span></button>\
             <button data-testid='retweet'><span>3</span></button>\
             <button data-testid='like'><span>1.2K</span></button>\
             <a href='/jack/status/100/analytics'><span>45K</span></a></div>",
        );
        let reading = reader().read_html(&html, "100", 0);
        assert_eq!(
            reading.metrics,
            Metrics {
                likes: 1200,
                replies: 12,
                reposts: 3,
                views: 45_000
            }
        );
    }

    #[test]
    fn test_falls_back_to_group_position() {
        let html = focal("<div role='group'><span>4</span><span>5</span><span>6</span><span>700</span></div>");
        let reading = reader().read_html(&html, "100", 0);
        assert_eq!(
            reading.metrics,
            Metrics {
                likes: 6,
                replies: 4,
                reposts: 5,
                views: 700
            }
        );
    }

    #[test]
    fn test_aria_labels_fill_missing_counters() {
        let html = focal(
            "<div role='group' aria-label='8 replies, 2 reposts, 31 likes, 2.5K views'>\
             <button data-testid='reply'><span></span></button></div>",
        );
        let reading = reader().read_html(&html, "100", 0);
        assert_eq!(
            reading.metrics,
            Metrics {
                likes: 31,
                replies: 8,
                reposts: 2,
                views: 2500
            }
        );
    }

    #[test]
    fn test_empty_page_reads_zero() {
        let reading = reader().read_html("<html><body></body></html>", "100", 5);
        assert!(reading.metrics.is_zero());
        assert!(reading.comments.is_empty());
    }

    #[test]
    fn test_reply_snippets_skip_focal_post() {
        let html = "<html><body>\
            <article data-testid='tweet'><a href='/jack/status/100'>x</a>\
              <div data-testid='tweetText'>focal text</div></article>\
            <article data-testid='tweet'><a href='/jill/status/101'>x</a>\
              <div data-testid='tweetText'>first reply</div>\
              <button data-testid='like'><span>3</span></button></article>\
            <article data-testid='tweet'><a href='/bob/status/102'>x</a>\
              <div data-testid='tweetText'>second reply</div></article>\
            </body></html>";
        let reading = reader().read_html(html, "100", 1);
        assert_eq!(
            reading.comments,
            vec![Comment {
                user: "jill".into(),
                text: "first reply".into(),
                likes: 3
            }]
        );
    }

    #[tokio::test]
    async fn test_dom_reader_opens_permalink_and_closes() {
        let html = focal("<button data-testid='like'><span>9</span></button>");
        let site = SnapshotSite::new().page("https://x.com/jack/status/100", SnapshotPage::new(html));
        let factory = Arc::new(SnapshotFactory::new(site));
        let enrichment = EnrichmentConfig {
            page_settle_ms: 0,
            ..EnrichmentConfig::default()
        };
        let slow = DomMetricsReader::new(
            factory.clone(),
            &SelectorTable::default(),
            &NavigationConfig::default(),
            &DriverConfig::default(),
            &enrichment,
            None,
        )
        .unwrap();

        let item = Item::new("100", "jack", "text", chrono::Utc::now());
        let reading = slow.read(&item, &EnrichmentOptions::default()).await.unwrap();
        assert_eq!(reading.metrics.likes, 9);
        assert_eq!(factory.opened(), 1);
        assert_eq!(factory.site().visits(), vec!["https://x.com/jack/status/100"]);
    }

    fn dom_reader(factory: Arc<SnapshotFactory>) -> DomMetricsReader {
        let navigation = NavigationConfig {
            selector_timeout_ms: 0,
            ..NavigationConfig::default()
        };
        let enrichment = EnrichmentConfig {
            page_settle_ms: 0,
            ..EnrichmentConfig::default()
        };
        DomMetricsReader::new(
            factory,
            &SelectorTable::default(),
            &navigation,
            &DriverConfig::default(),
            &enrichment,
            None,
        )
        .unwrap()
        .with_login_markers(vec!["/i/flow/login".into()])
    }

    #[tokio::test]
    async fn test_dom_reader_without_focal_post_is_an_error() {
        let site = SnapshotSite::new().page(
            "https://x.com/jack/status/100",
            SnapshotPage::new("<html><body><p>This post is unavailable.</p></body></html>"),
        );
        let factory = Arc::new(SnapshotFactory::new(site));
        let slow = dom_reader(factory.clone());

        let item = Item::new("100", "jack", "text", chrono::Utc::now());
        let err = slow.read(&item, &EnrichmentOptions::default()).await.unwrap_err();
        assert!(matches!(err, AppError::Extraction { .. }));
        assert_eq!(factory.opened(), 1);
    }

    #[tokio::test]
    async fn test_dom_reader_reports_login_redirect_and_uses_new_state() {
        let html = focal("<button data-testid='like'><span>9</span></button>");
        let site = SnapshotSite::new()
            .page("https://x.com/jack/status/100", SnapshotPage::new(html))
            .require_cookie("auth_token", "renewed", "https://x.com/i/flow/login");
        let factory = Arc::new(SnapshotFactory::new(site));
        let slow = dom_reader(factory.clone());
        let item = Item::new("100", "jack", "text", chrono::Utc::now());

        let err = slow.read(&item, &EnrichmentOptions::default()).await.unwrap_err();
        assert!(matches!(err, AppError::AuthRedirect { .. }));

        slow.set_state(StorageState {
            cookies: vec![crate::models::Cookie::new("auth_token", "renewed", ".x.com")],
            origins: vec![],
        });
        let reading = slow.read(&item, &EnrichmentOptions::default()).await.unwrap();
        assert_eq!(reading.metrics.likes, 9);
    }
}
