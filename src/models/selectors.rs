// src/models/selectors.rs

//! Declarative selector table for the timeline markup.
//!
//! Each field is an ordered list of `(selector, mapper)` pairs tried first to
//! last; the first one producing a value wins. Keeping the table in config
//! lets markup changes be handled without rebuilding.

use serde::{Deserialize, Serialize};

use crate::models::SpecialKind;

/// One selector and how to turn its matches into a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSelector {
    pub selector: String,

    /// Read this attribute instead of the text content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attr: Option<String>,

    /// Concatenate all matches instead of taking the first
    #[serde(default)]
    pub join: bool,
}

impl FieldSelector {
    pub fn text(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            attr: None,
            join: false,
        }
    }

    pub fn joined(selector: impl Into<String>) -> Self {
        Self {
            join: true,
            ..Self::text(selector)
        }
    }

    pub fn attr(selector: impl Into<String>, attr: impl Into<String>) -> Self {
        Self {
            attr: Some(attr.into()),
            ..Self::text(selector)
        }
    }
}

/// Localized label marking a pinned or promoted item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialMarker {
    pub text: String,
    pub kind: SpecialKind,
}

impl SpecialMarker {
    fn new(text: &str, kind: SpecialKind) -> Self {
        Self {
            text: text.to_string(),
            kind,
        }
    }
}

/// Selectors used to read engagement counters on a permalink page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricSelectors {
    /// Scope for the focal post on its permalink page
    #[serde(default = "defaults::focal")]
    pub focal: String,

    #[serde(default = "defaults::likes")]
    pub likes: String,

    #[serde(default = "defaults::replies")]
    pub replies: String,

    #[serde(default = "defaults::reposts")]
    pub reposts: String,

    #[serde(default = "defaults::views")]
    pub views: String,

    /// Counter group read positionally (reply, repost, like, ..., views)
    #[serde(default = "defaults::group")]
    pub group: String,

    /// Reply snippets below the focal post
    #[serde(default = "defaults::reply")]
    pub reply: String,
}

impl Default for MetricSelectors {
    fn default() -> Self {
        Self {
            focal: defaults::focal(),
            likes: defaults::likes(),
            replies: defaults::replies(),
            reposts: defaults::reposts(),
            views: defaults::views(),
            group: defaults::group(),
            reply: defaults::reply(),
        }
    }
}

/// The full selector table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorTable {
    /// Item container selectors in priority order
    #[serde(default = "defaults::containers")]
    pub containers: Vec<String>,

    /// Links to individual posts
    #[serde(default = "defaults::permalink")]
    pub permalink: String,

    /// Ancestors tried when locating a container from a permalink anchor
    #[serde(default = "defaults::anchor_containers")]
    pub anchor_containers: Vec<String>,

    #[serde(default = "defaults::text")]
    pub text: Vec<FieldSelector>,

    #[serde(default = "defaults::author")]
    pub author: Vec<FieldSelector>,

    #[serde(default = "defaults::timestamp")]
    pub timestamp: Vec<FieldSelector>,

    /// Elements whose text is compared against the marker labels
    #[serde(default = "defaults::marker_scopes")]
    pub marker_scopes: Vec<String>,

    #[serde(default = "defaults::markers")]
    pub markers: Vec<SpecialMarker>,

    #[serde(default)]
    pub metrics: MetricSelectors,
}

impl Default for SelectorTable {
    fn default() -> Self {
        Self {
            containers: defaults::containers(),
            permalink: defaults::permalink(),
            anchor_containers: defaults::anchor_containers(),
            text: defaults::text(),
            author: defaults::author(),
            timestamp: defaults::timestamp(),
            marker_scopes: defaults::marker_scopes(),
            markers: defaults::markers(),
            metrics: MetricSelectors::default(),
        }
    }
}

mod defaults {
    use super::{FieldSelector, SpecialKind, SpecialMarker};

    pub fn containers() -> Vec<String> {
        [
            "article[data-testid='tweet']",
            "div[data-testid='tweet']",
            "article[role='article']",
            "div[role='article']",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    pub fn permalink() -> String {
        "a[href*='/status/']".into()
    }

    pub fn anchor_containers() -> Vec<String> {
        vec![
            "article".into(),
            "div[data-testid='cellInnerDiv']".into(),
        ]
    }

    pub fn text() -> Vec<FieldSelector> {
        vec![
            FieldSelector::joined("[data-testid='tweetText']"),
            FieldSelector::joined("div[lang]"),
        ]
    }

    pub fn author() -> Vec<FieldSelector> {
        vec![
            FieldSelector::attr("[data-testid='User-Name'] a[href^='/']", "href"),
            FieldSelector::text("[data-testid='User-Name'] div[dir='ltr']"),
        ]
    }

    pub fn timestamp() -> Vec<FieldSelector> {
        vec![FieldSelector::attr("time[datetime]", "datetime")]
    }

    pub fn marker_scopes() -> Vec<String> {
        vec!["[data-testid='socialContext']".into(), "span".into()]
    }

    pub fn markers() -> Vec<SpecialMarker> {
        let pinned = ["Pinned", "Fijado", "Épinglé", "Angeheftet", "Fissato"];
        let promoted = ["Promoted", "Promocionado", "Ad", "Anuncio", "Sponsorisé", "Gesponsert"];
        pinned
            .iter()
            .map(|t| SpecialMarker::new(t, SpecialKind::Pinned))
            .chain(promoted.iter().map(|t| SpecialMarker::new(t, SpecialKind::Promoted)))
            .collect()
    }

    pub fn focal() -> String {
        "article[data-testid='tweet']".into()
    }

    pub fn likes() -> String {
        "[data-testid='like'], [data-testid='unlike']".into()
    }

    pub fn replies() -> String {
        "[data-testid='reply']".into()
    }

    pub fn reposts() -> String {
        "[data-testid='retweet'], [data-testid='unretweet']".into()
    }

    pub fn views() -> String {
        "a[href*='/analytics']".into()
    }

    pub fn group() -> String {
        "div[role='group']".into()
    }

    pub fn reply() -> String {
        "article[data-testid='tweet']".into()
    }
}
