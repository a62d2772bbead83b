// src/utils/text.rs

//! Text normalization helpers shared by extraction and filtering.

use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

/// Collapse runs of whitespace (including newlines) into single spaces.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Length in user-perceived characters.
pub fn visible_length(s: &str) -> usize {
    s.graphemes(true).count()
}

/// Shorten text for log lines without splitting a grapheme.
pub fn preview(s: &str, max: usize) -> String {
    let mut graphemes = s.graphemes(true);
    let head: String = graphemes.by_ref().take(max).collect();
    if graphemes.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}

/// Words that carry content: not links, mentions or hashtags.
///
/// The quality filter applies its minimum (two words by default) to every item.
pub fn substantive_word_count(s: &str) -> usize {
    s.split_whitespace()
        .filter(|w| {
            !(w.starts_with("http") || w.starts_with("www.") || w.starts_with('@') || w.starts_with('#'))
        })
        .filter(|w| w.chars().any(char::is_alphanumeric))
        .count()
}

/// A Unicode script family that can be excluded from results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptFamily {
    Arabic,
    Cyrillic,
    Devanagari,
    Han,
    Hangul,
    Hebrew,
    Thai,
}

impl ScriptFamily {
    /// Whether the character belongs to this script's main blocks.
    pub fn contains(&self, c: char) -> bool {
        let cp = c as u32;
        match self {
            ScriptFamily::Arabic => matches!(
                cp,
                0x0600..=0x06FF | 0x0750..=0x077F | 0x08A0..=0x08FF | 0xFB50..=0xFDFF | 0xFE70..=0xFEFF
            ),
            ScriptFamily::Cyrillic => matches!(cp, 0x0400..=0x052F | 0x2DE0..=0x2DFF | 0xA640..=0xA69F),
            ScriptFamily::Devanagari => matches!(cp, 0x0900..=0x097F | 0xA8E0..=0xA8FF),
            ScriptFamily::Han => matches!(cp, 0x3400..=0x4DBF | 0x4E00..=0x9FFF | 0xF900..=0xFAFF),
            ScriptFamily::Hangul => matches!(cp, 0x1100..=0x11FF | 0x3130..=0x318F | 0xAC00..=0xD7AF),
            ScriptFamily::Hebrew => matches!(cp, 0x0590..=0x05FF | 0xFB1D..=0xFB4F),
            ScriptFamily::Thai => matches!(cp, 0x0E00..=0x0E7F),
        }
    }
}

/// Share of alphabetic characters in `s` that belong to `family` (0.0 when no letters).
pub fn script_ratio(s: &str, family: ScriptFamily) -> f64 {
    let mut letters = 0usize;
    let mut matching = 0usize;
    for c in s.chars().filter(|c| c.is_alphabetic()) {
        letters += 1;
        if family.contains(c) {
            matching += 1;
        }
    }
    if letters == 0 {
        0.0
    } else {
        matching as f64 / letters as f64
    }
}

/// Parse a displayed counter such as `1,234`, `1.2K` or `3M`.
pub fn parse_count(raw: &str) -> Option<u64> {
    let cleaned: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let last = cleaned.chars().last()?;
    let multiplier = match last {
        'K' | 'k' => 1_000.0,
        'M' | 'm' => 1_000_000.0,
        'B' | 'b' => 1_000_000_000.0,
        _ => 1.0,
    };

    if multiplier > 1.0 {
        let number = &cleaned[..cleaned.len() - 1];
        let value: f64 = number.replace(',', ".").parse().ok()?;
        if !value.is_finite() || value < 0.0 {
            return None;
        }
        return Some((value * multiplier).round() as u64);
    }

    cleaned.replace([',', '.'], "").parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("  a\n\n b\t c  "), "a b c");
        assert_eq!(collapse_whitespace("   "), "");
    }

    #[test]
    fn test_visible_length_counts_graphemes() {
        assert_eq!(visible_length("héllo"), 5);
        assert_eq!(visible_length("👍🏽ok"), 3);
    }

    #[test]
    fn test_preview() {
        assert_eq!(preview("abcdef", 3), "abc…");
        assert_eq!(preview("abc", 3), "abc");
    }

    #[test]
    fn test_substantive_word_count() {
        assert_eq!(substantive_word_count("@a @b https://t.co/x #tag"), 0);
        assert_eq!(substantive_word_count("great news @a https://t.co/x"), 2);
        assert_eq!(substantive_word_count("— !! ok"), 1);
    }

    #[test]
    fn test_script_ratio() {
        assert_eq!(script_ratio("hello", ScriptFamily::Arabic), 0.0);
        assert_eq!(script_ratio("123 !!", ScriptFamily::Arabic), 0.0);
        let ratio = script_ratio("مرحبا hi", ScriptFamily::Arabic);
        assert!(ratio > 0.7, "ratio was {ratio}");
        assert!(script_ratio("Привет мир", ScriptFamily::Cyrillic) > 0.99);
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("42"), Some(42));
        assert_eq!(parse_count("1,234"), Some(1234));
        assert_eq!(parse_count("1.2K"), Some(1200));
        assert_eq!(parse_count("1,5K"), Some(1500));
        assert_eq!(parse_count("3M"), Some(3_000_000));
        assert_eq!(parse_count(""), None);
        assert_eq!(parse_count("likes"), None);
    }
}
