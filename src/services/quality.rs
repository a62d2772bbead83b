// src/services/quality.rs

//! Quality and de-duplication filter over extracted items.

use std::collections::HashSet;

use crate::models::{Item, QualityConfig, sort_newest_first};
use crate::utils::text::{substantive_word_count, visible_length};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    Duplicate,
    Special,
    Unavailable,
    TooShort(usize),
    FewWords(usize),
}

#[derive(Debug, Default)]
pub struct FilterReport {
    /// Survivors, newest first
    pub accepted: Vec<Item>,
    /// Dedup key and reason for every dropped item
    pub dropped: Vec<(String, DropReason)>,
}

pub struct QualityFilter {
    config: QualityConfig,
}

impl QualityFilter {
    pub fn new(config: &QualityConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Drop duplicates (against `seen` and within `items`), pinned or
    /// promoted items and low-content items. Accepted keys are added to
    /// `seen` so later passes skip them.
    pub fn filter(&self, items: Vec<Item>, seen: &mut HashSet<String>) -> FilterReport {
        let mut report = FilterReport::default();
        for item in items {
            let key = item.dedup_key();
            match self.check(&item, &key, seen) {
                Some(reason) => report.dropped.push((key, reason)),
                None => {
                    seen.insert(key);
                    report.accepted.push(item);
                }
            }
        }
        sort_newest_first(&mut report.accepted);

        if !report.dropped.is_empty() {
            log::debug!(
                "Quality filter kept {} and dropped {}",
                report.accepted.len(),
                report.dropped.len()
            );
        }
        report
    }

    fn check(&self, item: &Item, key: &str, seen: &HashSet<String>) -> Option<DropReason> {
        if item.special_flags.any() {
            return Some(DropReason::Special);
        }
        if seen.contains(key) {
            return Some(DropReason::Duplicate);
        }
        if self
            .config
            .unavailable_markers
            .iter()
            .any(|m| !m.is_empty() && item.text.starts_with(m.as_str()))
        {
            return Some(DropReason::Unavailable);
        }
        let length = visible_length(&item.text);
        if length < self.config.min_content_length {
            return Some(DropReason::TooShort(length));
        }
        let words = substantive_word_count(&item.text);
        if words < self.config.min_substantive_words {
            return Some(DropReason::FewWords(words));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SpecialKind;
    use chrono::{TimeZone, Utc};

    fn item(id: &str, text: &str, hour: u32, index: usize) -> Item {
        let mut item = Item::new(
            id,
            "jack",
            text,
            Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap(),
        );
        item.discovery_index = index;
        item
    }

    fn filter() -> QualityFilter {
        QualityFilter::new(&QualityConfig::default())
    }

    #[test]
    fn test_sorts_newest_first_with_stable_ties() {
        let items = vec![
            item("1", "older post with words", 8, 0),
            item("2", "tied post number one", 10, 1),
            item("3", "tied post number two", 10, 2),
            item("4", "newest post of all", 12, 3),
        ];
        let report = filter().filter(items, &mut HashSet::new());
        let ids: Vec<&str> = report.accepted.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["4", "2", "3", "1"]);
    }

    #[test]
    fn test_drops_duplicates_within_and_across_passes() {
        let mut seen = HashSet::new();
        let first = filter().filter(
            vec![
                item("1", "a perfectly fine post", 8, 0),
                item("1", "a perfectly fine post", 8, 1),
            ],
            &mut seen,
        );
        assert_eq!(first.accepted.len(), 1);
        assert_eq!(first.dropped, vec![("1".to_string(), DropReason::Duplicate)]);

        let second = filter().filter(vec![item("1", "a perfectly fine post", 8, 2)], &mut seen);
        assert!(second.accepted.is_empty());
    }

    #[test]
    fn test_dedups_by_content_hash_without_id() {
        let mut seen = HashSet::new();
        let report = filter().filter(
            vec![
                item("", "same words without an id", 8, 0),
                item("", "same words without an id", 9, 1),
                item("", "different words without an id", 9, 2),
            ],
            &mut seen,
        );
        assert_eq!(report.accepted.len(), 2);
        assert!(seen.iter().all(|k| k.starts_with("sha256:")));
    }

    #[test]
    fn test_drops_low_content() {
        let items = vec![
            item("1", "@a @b @c https://t.co/x", 8, 0),
            item("2", "short one", 8, 1),
            item("3", "This post is unavailable right now", 8, 2),
            item("4", "#rust is great", 8, 3),
        ];
        let report = filter().filter(items, &mut HashSet::new());
        let reasons: Vec<&DropReason> = report.dropped.iter().map(|(_, r)| r).collect();
        assert_eq!(
            reasons,
            vec![
                &DropReason::FewWords(0),
                &DropReason::TooShort(9),
                &DropReason::Unavailable
            ]
        );
        assert_eq!(report.accepted[0].id, "4");
    }

    #[test]
    fn test_single_word_with_media_link_is_dropped() {
        let items = vec![item("1", "Breathtaking https://pic.x.com/a1b2c3", 8, 0)];
        let report = filter().filter(items, &mut HashSet::new());
        assert!(report.accepted.is_empty());
        assert_eq!(report.dropped[0].1, DropReason::FewWords(1));
    }

    #[test]
    fn test_drops_flagged_items() {
        let mut pinned = item("1", "pinned but otherwise fine", 8, 0);
        pinned.special_flags.set(SpecialKind::Pinned);
        let report = filter().filter(vec![pinned], &mut HashSet::new());
        assert!(report.accepted.is_empty());
        assert_eq!(report.dropped[0].1, DropReason::Special);
    }
}
