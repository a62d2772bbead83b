// src/services/extractor.rs

//! Extractor and normalizer.
//!
//! Turns rendered timeline HTML into [`Item`]s using the declarative
//! [`SelectorTable`]. Every candidate container yields either an item or an
//! [`ExtractionIssue`]; nothing is dropped without a recorded reason.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Selector};

use crate::driver::Driver;
use crate::error::{AppError, Result};
use crate::models::{ExtractionConfig, FieldSelector, Item, SelectorTable, SpecialKind, SpecialMarker};
use crate::utils::text::{ScriptFamily, collapse_whitespace, script_ratio, visible_length};
use crate::utils::{extract_status_author, extract_status_id};

/// Parse a CSS selector into the crate error type.
pub fn compile_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
}

/// Why a candidate container did not become an item.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionIssue {
    Special(SpecialKind),
    /// Every permalink in the container points at media or analytics
    SubResource(String),
    MissingTimestamp,
    InvalidTimestamp(String),
    EmptyText,
    TooShort(usize),
    Placeholder(String),
    ForeignScript { script: ScriptFamily, ratio: f64 },
}

impl ExtractionIssue {
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractionIssue::Special(SpecialKind::Pinned) => "pinned",
            ExtractionIssue::Special(SpecialKind::Promoted) => "promoted",
            ExtractionIssue::SubResource(_) => "sub_resource",
            ExtractionIssue::MissingTimestamp => "missing_timestamp",
            ExtractionIssue::InvalidTimestamp(_) => "invalid_timestamp",
            ExtractionIssue::EmptyText => "empty_text",
            ExtractionIssue::TooShort(_) => "too_short",
            ExtractionIssue::Placeholder(_) => "placeholder",
            ExtractionIssue::ForeignScript { .. } => "foreign_script",
        }
    }
}

impl fmt::Display for ExtractionIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionIssue::Special(kind) => write!(f, "{kind:?} marker"),
            ExtractionIssue::SubResource(href) => write!(f, "sub-resource link {href}"),
            ExtractionIssue::MissingTimestamp => f.write_str("no timestamp"),
            ExtractionIssue::InvalidTimestamp(raw) => write!(f, "unparsable timestamp '{raw}'"),
            ExtractionIssue::EmptyText => f.write_str("empty text"),
            ExtractionIssue::TooShort(len) => write!(f, "text too short ({len})"),
            ExtractionIssue::Placeholder(text) => write!(f, "placeholder text '{text}'"),
            ExtractionIssue::ForeignScript { script, ratio } => {
                write!(f, "{:.0}% {:?} script", ratio * 100.0, script)
            }
        }
    }
}

/// How the candidate containers were found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerMatch {
    Selector(String),
    /// Containers were inferred from permalink anchors
    AnchorFallback,
    None,
}

#[derive(Debug)]
pub struct ExtractionReport {
    pub items: Vec<Item>,
    pub issues: Vec<ExtractionIssue>,
    pub containers: ContainerMatch,
}

impl ExtractionReport {
    pub fn candidates(&self) -> usize {
        self.items.len() + self.issues.len()
    }

    /// Issue counts by kind, for logging.
    pub fn issue_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for issue in &self.issues {
            *counts.entry(issue.kind()).or_insert(0) += 1;
        }
        counts
    }
}

struct CompiledField {
    selector: Selector,
    attr: Option<String>,
    join: bool,
}

impl CompiledField {
    fn new(field: &FieldSelector) -> Result<Self> {
        Ok(Self {
            selector: compile_selector(&field.selector)?,
            attr: field.attr.clone(),
            join: field.join,
        })
    }

    fn value_of(&self, el: ElementRef) -> String {
        match &self.attr {
            Some(attr) => el.value().attr(attr).unwrap_or_default().to_string(),
            None => el.text().collect(),
        }
    }

    fn read(&self, scope: ElementRef) -> Option<String> {
        let matches = scope.select(&self.selector);
        let raw = if self.join {
            matches
                .map(|m| self.value_of(m))
                .filter(|v| !v.trim().is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        } else {
            matches
                .map(|m| self.value_of(m))
                .find(|v| !v.trim().is_empty())?
        };
        let value = collapse_whitespace(&raw);
        (!value.is_empty()).then_some(value)
    }
}

fn first_value(scope: ElementRef, fields: &[CompiledField]) -> Option<String> {
    fields.iter().find_map(|field| field.read(scope))
}

/// Normalize an author field value such as `/jack`, `@jack` or `/jack?ref=x`.
fn clean_handle(raw: &str) -> String {
    raw.trim()
        .trim_start_matches('/')
        .split(['/', '?'])
        .next()
        .unwrap_or_default()
        .trim_start_matches('@')
        .to_string()
}

pub struct Extractor {
    containers: Vec<(String, Selector)>,
    permalink: Selector,
    permalink_raw: String,
    anchor_containers: Vec<Selector>,
    time: Selector,
    text: Vec<CompiledField>,
    author: Vec<CompiledField>,
    timestamp: Vec<CompiledField>,
    marker_scopes: Vec<Selector>,
    markers: Vec<SpecialMarker>,
    rules: ExtractionConfig,
}

impl Extractor {
    /// Compile the selector table. Any invalid selector is an error.
    pub fn new(table: &SelectorTable, rules: &ExtractionConfig) -> Result<Self> {
        let compile_all = |fields: &[FieldSelector]| -> Result<Vec<CompiledField>> {
            fields.iter().map(CompiledField::new).collect()
        };

        Ok(Self {
            containers: table
                .containers
                .iter()
                .map(|raw| compile_selector(raw).map(|selector| (raw.clone(), selector)))
                .collect::<Result<_>>()?,
            permalink: compile_selector(&table.permalink)?,
            permalink_raw: table.permalink.clone(),
            anchor_containers: table
                .anchor_containers
                .iter()
                .map(|s| compile_selector(s))
                .collect::<Result<_>>()?,
            time: compile_selector("time")?,
            text: compile_all(&table.text)?,
            author: compile_all(&table.author)?,
            timestamp: compile_all(&table.timestamp)?,
            marker_scopes: table
                .marker_scopes
                .iter()
                .map(|s| compile_selector(s))
                .collect::<Result<_>>()?,
            markers: table.markers.clone(),
            rules: rules.clone(),
        })
    }

    /// Cheap count of visible candidates on the live page.
    ///
    /// Uses the first container selector with any match, else the number of
    /// permalink anchors.
    pub async fn count_visible(&self, driver: &dyn Driver) -> Result<usize> {
        for (raw, _) in &self.containers {
            let count = driver.count(raw).await?;
            if count > 0 {
                return Ok(count);
            }
        }
        driver.count(&self.permalink_raw).await
    }

    /// Full extraction pass over a page's HTML.
    pub fn extract_html(&self, html: &str) -> ExtractionReport {
        let document = Html::parse_document(html);
        let (containers, matched) = self.find_containers(&document);

        let mut items = Vec::new();
        let mut issues = Vec::new();
        for element in matched {
            match self.extract_one(element) {
                Ok(mut item) => {
                    item.discovery_index = items.len();
                    items.push(item);
                }
                Err(issue) => {
                    log::debug!("Skipped candidate: {}", issue);
                    issues.push(issue);
                }
            }
        }

        ExtractionReport {
            items,
            issues,
            containers,
        }
    }

    fn find_containers<'a>(&self, document: &'a Html) -> (ContainerMatch, Vec<ElementRef<'a>>) {
        for (raw, selector) in &self.containers {
            let found: Vec<ElementRef> = document.select(selector).collect();
            if !found.is_empty() {
                return (ContainerMatch::Selector(raw.clone()), found);
            }
        }

        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for anchor in document.select(&self.permalink) {
            if let Some(container) = self.container_of(anchor) {
                if seen.insert(container.id()) {
                    found.push(container);
                }
            }
        }
        if found.is_empty() {
            (ContainerMatch::None, found)
        } else {
            (ContainerMatch::AnchorFallback, found)
        }
    }

    /// Nearest ancestor that looks like a post: a configured anchor container,
    /// else the closest one that holds a `time` element.
    fn container_of<'a>(&self, anchor: ElementRef<'a>) -> Option<ElementRef<'a>> {
        let ancestors: Vec<ElementRef<'a>> = anchor.ancestors().filter_map(ElementRef::wrap).collect();
        ancestors
            .iter()
            .find(|el| self.anchor_containers.iter().any(|s| s.matches(el)))
            .or_else(|| {
                ancestors
                    .iter()
                    .find(|el| el.value().name() != "html" && el.select(&self.time).next().is_some())
            })
            .copied()
    }

    fn special_marker(&self, element: ElementRef) -> Option<SpecialKind> {
        for scope in &self.marker_scopes {
            for node in element.select(scope) {
                let text = collapse_whitespace(&node.text().collect::<String>());
                if text.is_empty() {
                    continue;
                }
                if let Some(marker) = self.markers.iter().find(|m| m.text == text) {
                    return Some(marker.kind);
                }
            }
        }
        None
    }

    fn is_sub_resource(&self, href: &str) -> bool {
        self.rules
            .sub_resource_markers
            .iter()
            .any(|m| !m.is_empty() && href.contains(m.as_str()))
    }

    fn extract_one(&self, element: ElementRef) -> std::result::Result<Item, ExtractionIssue> {
        if let Some(kind) = self.special_marker(element) {
            return Err(ExtractionIssue::Special(kind));
        }

        let hrefs: Vec<&str> = element
            .select(&self.permalink)
            .filter_map(|a| a.value().attr("href"))
            .collect();
        let permalink = hrefs.iter().copied().find(|href| !self.is_sub_resource(href));
        if permalink.is_none() {
            if let Some(first) = hrefs.first() {
                return Err(ExtractionIssue::SubResource(first.to_string()));
            }
        }
        let id = permalink.and_then(extract_status_id).unwrap_or_default();

        let raw_time = first_value(element, &self.timestamp).ok_or(ExtractionIssue::MissingTimestamp)?;
        let timestamp = DateTime::parse_from_rfc3339(&raw_time)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|_| ExtractionIssue::InvalidTimestamp(raw_time.clone()))?;

        let text = first_value(element, &self.text)
            .unwrap_or_else(|| collapse_whitespace(&element.text().collect::<String>()));
        self.check_text(&text)?;

        let author = first_value(element, &self.author)
            .map(|raw| clean_handle(&raw))
            .filter(|handle| !handle.is_empty())
            .or_else(|| permalink.and_then(extract_status_author))
            .unwrap_or_default();

        Ok(Item::new(id, author, text, timestamp))
    }

    fn check_text(&self, text: &str) -> std::result::Result<(), ExtractionIssue> {
        if text.is_empty() {
            return Err(ExtractionIssue::EmptyText);
        }
        let length = visible_length(text);
        if length < self.rules.min_text_length {
            return Err(ExtractionIssue::TooShort(length));
        }
        let lowered = text.to_lowercase();
        if self
            .rules
            .placeholder_texts
            .iter()
            .any(|p| p.to_lowercase() == lowered)
        {
            return Err(ExtractionIssue::Placeholder(text.to_string()));
        }
        for &script in &self.rules.excluded_scripts {
            let ratio = script_ratio(text, script);
            if ratio > 0.0 && ratio >= self.rules.max_script_ratio {
                return Err(ExtractionIssue::ForeignScript { script, ratio });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn post(id: &str, author: &str, text: &str, ts: &str) -> String {
        format!(
            r#"<article data-testid="tweet">
                 <div data-testid="User-Name"><a href="/{author}"><span>{author} name</span></a>
                   <div dir="ltr"><span>@{author}</span></div></div>
                 <a href="/{author}/status/{id}"><time datetime="{ts}">May 1</time></a>
                 <div data-testid="tweetText" lang="en"><span>{text}</span></div>
               </article>"#
        )
    }

    fn page(body: &str) -> String {
        format!("<html><body><main>{body}</main></body></html>")
    }

    fn extractor() -> Extractor {
        Extractor::new(&SelectorTable::default(), &ExtractionConfig::default()).unwrap()
    }

    #[test]
    fn test_extracts_fields() {
        let html = page(&post("101", "jack", "just  setting up\n my account", "2024-05-01T10:00:00.000Z"));
        let report = extractor().extract_html(&html);
        assert_eq!(
            report.containers,
            ContainerMatch::Selector("article[data-testid='tweet']".into())
        );
        assert_eq!(report.items.len(), 1);

        let item = &report.items[0];
        assert_eq!(item.id, "101");
        assert_eq!(item.author, "jack");
        assert_eq!(item.text, "just setting up my account");
        assert_eq!(item.timestamp, Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap());
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_pinned_and_promoted_are_rejected() {
        let pinned = post("1", "jack", "pinned announcement here", "2024-05-01T10:00:00Z")
            .replace(
                r#"<article data-testid="tweet">"#,
                r#"<article data-testid="tweet"><div data-testid="socialContext">Pinned</div>"#,
            );
        let promoted = post("2", "brand", "buy our product today", "2024-05-01T09:00:00Z")
            .replace("May 1", "May 1</time><span>Ad</span><time>");
        let organic = post("3", "jack", "an ordinary update", "2024-05-01T08:00:00Z");

        let report = extractor().extract_html(&page(&format!("{pinned}{promoted}{organic}")));
        assert_eq!(report.items.len(), 1);
        assert_eq!(report.items[0].id, "3");
        assert_eq!(
            report.issues,
            vec![
                ExtractionIssue::Special(SpecialKind::Pinned),
                ExtractionIssue::Special(SpecialKind::Promoted)
            ]
        );
    }

    #[test]
    fn test_localized_marker() {
        let fijado = post("1", "jack", "publicación fijada", "2024-05-01T10:00:00Z").replace(
            r#"<article data-testid="tweet">"#,
            r#"<article data-testid="tweet"><div data-testid="socialContext"> Fijado </div>"#,
        );
        let report = extractor().extract_html(&page(&fijado));
        assert!(report.items.is_empty());
        assert_eq!(report.issue_counts().get("pinned"), Some(&1));
    }

    #[test]
    fn test_invalid_timestamp_is_rejected() {
        let html = page(&post("1", "jack", "text without a usable time", "yesterday"));
        let report = extractor().extract_html(&html);
        assert!(report.items.is_empty());
        assert_eq!(
            report.issues,
            vec![ExtractionIssue::InvalidTimestamp("yesterday".into())]
        );
    }

    #[test]
    fn test_normalization_rejections() {
        let body = [
            post("1", "jack", "hi", "2024-05-01T10:00:00Z"),
            post("2", "jack", "Hello", "2024-05-01T10:00:00Z"),
            post("3", "jack", "مرحبا بكم في هذا المكان", "2024-05-01T10:00:00Z"),
        ]
        .concat();
        let report = extractor().extract_html(&page(&body));
        assert!(report.items.is_empty());
        let kinds: Vec<&str> = report.issues.iter().map(|i| i.kind()).collect();
        assert_eq!(kinds, vec!["too_short", "placeholder", "foreign_script"]);
    }

    #[test]
    fn test_blank_text_falls_back_to_container_text() {
        let html = page(&post("4", "jack", "   ", "2024-05-01T10:00:00Z"));
        let report = extractor().extract_html(&html);
        assert_eq!(report.items[0].text, "jack name @jack May 1");
    }

    #[test]
    fn test_empty_container_is_rejected() {
        let html = page(
            r#"<article data-testid="tweet"><time datetime="2024-05-01T10:00:00Z"></time></article>"#,
        );
        let report = extractor().extract_html(&html);
        assert_eq!(report.issues, vec![ExtractionIssue::EmptyText]);
    }

    #[test]
    fn test_mixed_script_below_ratio_is_kept() {
        let html = page(&post(
            "1",
            "jack",
            "a long english sentence with one word مرحبا",
            "2024-05-01T10:00:00Z",
        ));
        assert_eq!(extractor().extract_html(&html).items.len(), 1);
    }

    #[test]
    fn test_sub_resource_only_is_rejected() {
        let html = page(
            r#"<article data-testid="tweet">
                 <a href="/jack/status/5/photo/1"><img></a>
                 <time datetime="2024-05-01T10:00:00Z"></time>
                 <div data-testid="tweetText">a photo of the sea</div>
               </article>"#,
        );
        let report = extractor().extract_html(&html);
        assert!(report.items.is_empty());
        assert_eq!(report.issues[0].kind(), "sub_resource");
    }

    #[test]
    fn test_photo_link_after_permalink_is_ignored() {
        let html = page(
            r#"<article data-testid="tweet">
                 <a href="/jack/status/5"><time datetime="2024-05-01T10:00:00Z"></time></a>
                 <a href="/jack/status/5/photo/1"><img></a>
                 <div data-testid="tweetText">a photo of the sea</div>
               </article>"#,
        );
        let report = extractor().extract_html(&html);
        assert_eq!(report.items[0].id, "5");
        assert_eq!(report.items[0].author, "jack");
    }

    #[test]
    fn test_missing_permalink_keeps_item_without_id() {
        let html = page(
            r#"<article data-testid="tweet">
                 <div data-testid="User-Name"><a href="/jill">Jill</a></div>
                 <time datetime="2024-05-01T10:00:00Z"></time>
                 <div data-testid="tweetText">no link on this one</div>
               </article>"#,
        );
        let item = &extractor().extract_html(&html).items[0];
        assert_eq!(item.id, "");
        assert_eq!(item.author, "jill");
        assert!(item.dedup_key().starts_with("sha256:"));
    }

    #[test]
    fn test_anchor_fallback_without_containers() {
        let html = page(
            r#"<section><div class="cell">
                 <a href="/jack/status/7"><time datetime="2024-05-01T10:00:00Z"></time></a>
                 <div lang="en">found through the anchor</div>
               </div>
               <div class="cell">
                 <a href="/jill/status/8"><time datetime="2024-05-01T09:00:00Z"></time></a>
                 <div lang="en">second anchored post</div>
               </div></section>"#,
        );
        let report = extractor().extract_html(&html);
        assert_eq!(report.containers, ContainerMatch::AnchorFallback);
        let ids: Vec<&str> = report.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["7", "8"]);
        assert_eq!(report.items[1].author, "jill");
        assert_eq!(report.items[1].text, "second anchored post");
    }

    #[test]
    fn test_no_containers_at_all() {
        let report = extractor().extract_html("<html><body><p>login wall</p></body></html>");
        assert_eq!(report.containers, ContainerMatch::None);
        assert_eq!(report.candidates(), 0);
    }

    #[test]
    fn test_discovery_index_follows_document_order() {
        let body = [
            post("1", "jack", "first in the document", "2024-05-01T08:00:00Z"),
            post("2", "jack", "hi", "2024-05-01T09:00:00Z"),
            post("3", "jack", "third in the document", "2024-05-01T10:00:00Z"),
        ]
        .concat();
        let report = extractor().extract_html(&page(&body));
        let indexes: Vec<usize> = report.items.iter().map(|i| i.discovery_index).collect();
        assert_eq!(indexes, vec![0, 1]);
    }

    #[test]
    fn test_invalid_selector_fails_compile() {
        let mut table = SelectorTable::default();
        table.containers.push("[[broken".into());
        assert!(matches!(
            Extractor::new(&table, &ExtractionConfig::default()),
            Err(AppError::Selector { .. })
        ));
    }

    #[test]
    fn test_clean_handle() {
        assert_eq!(clean_handle("/jack"), "jack");
        assert_eq!(clean_handle("@jack"), "jack");
        assert_eq!(clean_handle("/jack?ref=x"), "jack");
        assert_eq!(clean_handle("/jack/with_replies"), "jack");
    }
}
