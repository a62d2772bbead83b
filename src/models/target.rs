//! Navigation targets.

use serde::{Deserialize, Serialize};

/// Kind of page a target URL points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetKind {
    Profile,
    SearchLive,
    SearchTop,
    SearchDated,
    /// Hashtag landing page
    Topic,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Profile => "profile",
            TargetKind::SearchLive => "search-live",
            TargetKind::SearchTop => "search-top",
            TargetKind::SearchDated => "search-dated",
            TargetKind::Topic => "topic",
        }
    }
}

/// A candidate URL plus the selectors that signal it is ready.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationTarget {
    pub url: String,
    pub expected_selectors: Vec<String>,
    pub kind: TargetKind,
}

/// When a navigation counts as finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitPolicy {
    #[default]
    DomContentLoaded,
    Load,
    NetworkIdle,
}
