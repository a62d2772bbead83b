// src/error.rs

//! Unified error handling for the harvester.

use std::fmt;

use thiserror::Error;

/// Result type alias for harvester operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Why a session renewal failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    RenewalFailed,
}

/// Why the navigation sequencer gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationErrorKind {
    /// Every candidate target was exhausted without a ready page
    AllTargetsFailed,
    /// Still redirected to the login flow after a fresh renewal
    AuthRedirectLoop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionErrorKind {
    NoContainerMatched,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichmentErrorKind {
    TimeBudgetExceeded,
}

/// Faults raised by a driver adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverFaultKind {
    /// Browser, context or page went away underneath an operation
    SessionClosedUnexpectedly,
    NavigationTimeout,
    ScriptFailed,
    /// The adapter could not be started at all
    Unavailable,
}

impl DriverFaultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverFaultKind::SessionClosedUnexpectedly => "session closed unexpectedly",
            DriverFaultKind::NavigationTimeout => "navigation timeout",
            DriverFaultKind::ScriptFailed => "script failed",
            DriverFaultKind::Unavailable => "driver unavailable",
        }
    }
}

impl fmt::Display for DriverFaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for NavigationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NavigationErrorKind::AllTargetsFailed => f.write_str("all targets failed"),
            NavigationErrorKind::AuthRedirectLoop => f.write_str("auth redirect loop"),
        }
    }
}

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// CSV export failed
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Credential renewal could not produce a usable session
    #[error("Session renewal failed: {reason}")]
    Auth { kind: AuthErrorKind, reason: String },

    /// The driver landed on the login flow in the middle of an operation
    #[error("Redirected to login flow at {url}")]
    AuthRedirect { url: String },

    #[error("Navigation failed ({kind}) with {items_gathered} items gathered")]
    Navigation {
        kind: NavigationErrorKind,
        items_gathered: usize,
    },

    #[error("No item container matched on {url}")]
    Extraction {
        kind: ExtractionErrorKind,
        url: String,
    },

    #[error("Enrichment time budget exceeded with {remaining} items left")]
    Enrichment {
        kind: EnrichmentErrorKind,
        remaining: usize,
    },

    #[error("Driver fault ({kind}): {message}")]
    Driver {
        kind: DriverFaultKind,
        message: String,
    },

    #[error("Gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<AppError>,
    },

    #[error("Circuit open after {failures} consecutive failures, retry in {retry_in_secs}s")]
    CircuitOpen { failures: u32, retry_in_secs: u64 },

    #[error("Request timed out after {elapsed_secs}s")]
    Timeout { elapsed_secs: u64 },
}

impl AppError {
    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a renewal failure.
    pub fn renewal_failed(reason: impl fmt::Display) -> Self {
        Self::Auth {
            kind: AuthErrorKind::RenewalFailed,
            reason: reason.to_string(),
        }
    }

    /// Create a driver fault.
    pub fn driver(kind: DriverFaultKind, message: impl fmt::Display) -> Self {
        Self::Driver {
            kind,
            message: message.to_string(),
        }
    }

    pub fn navigation(kind: NavigationErrorKind, items_gathered: usize) -> Self {
        Self::Navigation {
            kind,
            items_gathered,
        }
    }

    pub fn no_container(url: impl Into<String>) -> Self {
        Self::Extraction {
            kind: ExtractionErrorKind::NoContainerMatched,
            url: url.into(),
        }
    }

    /// The driver fault kind, if this is a driver fault.
    pub fn driver_fault(&self) -> Option<DriverFaultKind> {
        match self {
            AppError::Driver { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Create an enrichment budget error for `remaining` unenriched items.
    pub fn budget_exceeded(remaining: usize) -> Self {
        Self::Enrichment {
            kind: EnrichmentErrorKind::TimeBudgetExceeded,
            remaining,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_fault_accessor() {
        let err = AppError::driver(DriverFaultKind::SessionClosedUnexpectedly, "target closed");
        assert_eq!(
            err.driver_fault(),
            Some(DriverFaultKind::SessionClosedUnexpectedly)
        );
        assert!(AppError::config("x").driver_fault().is_none());
    }

    #[test]
    fn test_navigation_error_reports_items() {
        let err = AppError::navigation(NavigationErrorKind::AllTargetsFailed, 4);
        assert_eq!(
            err.to_string(),
            "Navigation failed (all targets failed) with 4 items gathered"
        );
    }

    #[test]
    fn test_retries_exhausted_keeps_source() {
        let inner = AppError::driver(DriverFaultKind::SessionClosedUnexpectedly, "gone");
        let err = AppError::RetriesExhausted {
            attempts: 3,
            source: Box::new(inner),
        };
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(
            source.as_deref(),
            Some("Driver fault (session closed unexpectedly): gone")
        );
    }
}
