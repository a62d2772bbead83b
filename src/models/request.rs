//! Extraction requests.

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Whose or which timeline to extract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Subject {
    User(String),
    Hashtag(String),
}

impl Subject {
    /// Parse `@user`, `user` or `#tag`.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let subject = match raw.strip_prefix('#') {
            Some(tag) => Subject::Hashtag(tag.trim().to_string()),
            None => Subject::User(raw.trim_start_matches('@').trim().to_string()),
        };
        if subject.handle().is_empty() {
            return Err(AppError::validation("subject is empty"));
        }
        if subject.handle().chars().any(char::is_whitespace) {
            return Err(AppError::validation(format!(
                "subject '{}' contains whitespace",
                subject.handle()
            )));
        }
        Ok(subject)
    }

    /// The bare handle or tag without prefix.
    pub fn handle(&self) -> &str {
        match self {
            Subject::User(name) | Subject::Hashtag(name) => name,
        }
    }

    /// Search query selecting this subject's posts.
    pub fn search_query(&self) -> String {
        match self {
            Subject::User(name) => format!("from:{name}"),
            Subject::Hashtag(tag) => format!("#{tag}"),
        }
    }

    /// File-name friendly label, e.g. `user_jack` or `hashtag_rust`.
    pub fn label(&self) -> String {
        let clean: String = self
            .handle()
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
            .collect();
        match self {
            Subject::User(_) => format!("user_{clean}"),
            Subject::Hashtag(_) => format!("hashtag_{clean}"),
        }
    }
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Subject::User(name) => write!(f, "@{name}"),
            Subject::Hashtag(tag) => write!(f, "#{tag}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Top,
    #[default]
    Live,
}

impl SearchMode {
    pub fn as_param(&self) -> &'static str {
        match self {
            SearchMode::Top => "top",
            SearchMode::Live => "live",
        }
    }
}

/// What the enrichment stage should collect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentOptions {
    pub metrics: bool,
    pub comments: bool,
    pub comment_limit: usize,
}

impl Default for EnrichmentOptions {
    fn default() -> Self {
        Self {
            metrics: true,
            comments: false,
            comment_limit: 20,
        }
    }
}

/// A request to extract recent items for one subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionRequest {
    pub subject: Subject,
    pub max_items: usize,
    pub min_items: usize,
    pub max_scroll_steps: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_mode: Option<SearchMode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrichment: Option<EnrichmentOptions>,
}

impl ExtractionRequest {
    pub fn new(subject: Subject) -> Self {
        Self {
            subject,
            max_items: 20,
            min_items: 10,
            max_scroll_steps: 10,
            language: None,
            search_mode: None,
            enrichment: None,
        }
    }

    pub fn with_limits(mut self, max_items: usize, min_items: usize) -> Self {
        self.max_items = max_items;
        self.min_items = min_items;
        self
    }

    pub fn with_scroll_steps(mut self, steps: usize) -> Self {
        self.max_scroll_steps = steps;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_search_mode(mut self, mode: SearchMode) -> Self {
        self.search_mode = Some(mode);
        self
    }

    pub fn with_enrichment(mut self, options: EnrichmentOptions) -> Self {
        self.enrichment = Some(options);
        self
    }

    /// Effective search mode: hashtags default to top, users to live.
    pub fn effective_mode(&self) -> SearchMode {
        self.search_mode.unwrap_or(match self.subject {
            Subject::User(_) => SearchMode::Live,
            Subject::Hashtag(_) => SearchMode::Top,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.subject.handle().is_empty() {
            return Err(AppError::validation("subject is empty"));
        }
        if self.max_items == 0 {
            return Err(AppError::validation("max_items must be > 0"));
        }
        if self.min_items > self.max_items {
            return Err(AppError::validation(format!(
                "min_items ({}) exceeds max_items ({})",
                self.min_items, self.max_items
            )));
        }
        if let Some(lang) = &self.language {
            if lang.is_empty() || !lang.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(AppError::validation(format!("invalid language code '{lang}'")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_parse() {
        assert_eq!(Subject::parse("@jack").unwrap(), Subject::User("jack".into()));
        assert_eq!(Subject::parse("jack").unwrap(), Subject::User("jack".into()));
        assert_eq!(
            Subject::parse("#RustLang").unwrap(),
            Subject::Hashtag("RustLang".into())
        );
        assert!(Subject::parse("  ").is_err());
        assert!(Subject::parse("#").is_err());
        assert!(Subject::parse("two words").is_err());
    }

    #[test]
    fn test_subject_query_and_label() {
        let user = Subject::User("jack".into());
        assert_eq!(user.search_query(), "from:jack");
        assert_eq!(user.label(), "user_jack");
        let tag = Subject::Hashtag("año".into());
        assert_eq!(tag.search_query(), "#año");
        assert_eq!(tag.label(), "hashtag_año");
        assert_eq!(tag.to_string(), "#año");
    }

    #[test]
    fn test_effective_mode() {
        let user = ExtractionRequest::new(Subject::User("jack".into()));
        assert_eq!(user.effective_mode(), SearchMode::Live);
        let tag = ExtractionRequest::new(Subject::Hashtag("rust".into()));
        assert_eq!(tag.effective_mode(), SearchMode::Top);
        let forced = tag.with_search_mode(SearchMode::Live);
        assert_eq!(forced.effective_mode(), SearchMode::Live);
    }

    #[test]
    fn test_validate() {
        let ok = ExtractionRequest::new(Subject::User("jack".into()));
        assert!(ok.validate().is_ok());
        assert!(ok.clone().with_limits(0, 0).validate().is_err());
        assert!(ok.clone().with_limits(5, 10).validate().is_err());
        assert!(ok.clone().with_language("es").validate().is_ok());
        assert!(ok.with_language("e s").validate().is_err());
    }
}
