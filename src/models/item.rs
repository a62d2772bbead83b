//! Extracted timeline items.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Engagement counters for an item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    pub likes: u64,
    pub replies: u64,
    pub reposts: u64,
    pub views: u64,
}

impl Metrics {
    pub fn is_zero(&self) -> bool {
        *self == Metrics::default()
    }

    /// Interactions excluding passive views.
    pub fn engagement(&self) -> u64 {
        self.likes + self.replies + self.reposts
    }
}

/// Where the metrics on an item came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricsSource {
    #[default]
    Unenriched,
    FastPath,
    SlowPath,
}

/// A reply snippet attached to an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub user: String,
    pub text: String,
    #[serde(default)]
    pub likes: u64,
}

/// Pinned or promoted marker kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecialKind {
    Pinned,
    Promoted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialFlags {
    pub pinned: bool,
    pub promoted: bool,
}

impl SpecialFlags {
    pub fn any(&self) -> bool {
        self.pinned || self.promoted
    }

    pub fn set(&mut self, kind: SpecialKind) {
        match kind {
            SpecialKind::Pinned => self.pinned = true,
            SpecialKind::Promoted => self.promoted = true,
        }
    }
}

/// One extracted post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Stable post ID, empty when no permalink was found
    pub id: String,
    pub author: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub special_flags: SpecialFlags,

    /// Measured metrics only
    #[serde(default)]
    pub metrics: Metrics,

    /// Heuristic lower bounds, kept apart from measured values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_metrics: Option<Metrics>,

    #[serde(default)]
    pub metrics_source: MetricsSource,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<Comment>,

    /// Position in discovery order, used to break timestamp ties
    #[serde(skip)]
    pub discovery_index: usize,

    #[serde(skip)]
    pub should_exclude: bool,
}

impl Item {
    pub fn new(
        id: impl Into<String>,
        author: impl Into<String>,
        text: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            author: author.into(),
            text: text.into(),
            timestamp,
            special_flags: SpecialFlags::default(),
            metrics: Metrics::default(),
            estimated_metrics: None,
            metrics_source: MetricsSource::Unenriched,
            comments: Vec::new(),
            discovery_index: 0,
            should_exclude: false,
        }
    }

    /// SHA-256 of author and text, used when the item has no ID.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.author.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.text.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Key used for de-duplication: the ID, or a content hash.
    pub fn dedup_key(&self) -> String {
        if self.id.is_empty() {
            format!("sha256:{}", self.content_hash())
        } else {
            self.id.clone()
        }
    }

    pub fn is_enriched(&self) -> bool {
        self.metrics_source != MetricsSource::Unenriched
    }

    /// Clear pipeline-internal bookkeeping before the item is returned.
    pub fn strip_internal(&mut self) {
        self.should_exclude = false;
    }
}

/// Sort newest first; equal timestamps keep discovery order.
pub fn sort_newest_first(items: &mut [Item]) {
    items.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then(a.discovery_index.cmp(&b.discovery_index))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_dedup_key_prefers_id() {
        let item = Item::new("123", "jack", "hello world", at(1));
        assert_eq!(item.dedup_key(), "123");
    }

    #[test]
    fn test_dedup_key_falls_back_to_hash() {
        let a = Item::new("", "jack", "hello world", at(1));
        let b = Item::new("", "jack", "hello world", at(2));
        let c = Item::new("", "jill", "hello world", at(1));
        assert!(a.dedup_key().starts_with("sha256:"));
        assert_eq!(a.dedup_key(), b.dedup_key());
        assert_ne!(a.dedup_key(), c.dedup_key());
    }

    #[test]
    fn test_sort_newest_first_is_stable_on_ties() {
        let mut items: Vec<Item> = [(1, 0), (3, 1), (3, 2), (2, 3)]
            .iter()
            .map(|(h, idx)| {
                let mut item = Item::new(format!("{idx}"), "a", "text here", at(*h));
                item.discovery_index = *idx;
                item
            })
            .collect();
        sort_newest_first(&mut items);
        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3", "0"]);
    }

    #[test]
    fn test_metrics_engagement() {
        let m = Metrics {
            likes: 3,
            replies: 2,
            reposts: 1,
            views: 100,
        };
        assert_eq!(m.engagement(), 6);
        assert!(!m.is_zero());
        assert!(Metrics::default().is_zero());
    }

    #[test]
    fn test_item_serializes_iso_timestamp() {
        let item = Item::new("1", "jack", "hello world", at(12));
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["timestamp"], "2024-05-01T12:00:00Z");
        assert!(value.get("estimated_metrics").is_none());
        assert!(value.get("discovery_index").is_none());
    }
}
