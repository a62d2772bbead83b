// src/models/mod.rs

//! Domain models for the harvester.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod item;
mod request;
mod selectors;
mod session;
mod target;

// Re-export all public types
pub use config::{
    Config, DriverConfig, EnrichmentConfig, ExtractionConfig, FastPathConfig, LoggingConfig,
    NavigationConfig, OutputConfig, OutputFormat, PaginationConfig, QualityConfig, RequestConfig,
    RetryConfig, SessionConfig, TargetTemplate,
};
pub use item::{
    Comment, Item, Metrics, MetricsSource, SpecialFlags, SpecialKind, sort_newest_first,
};
pub use request::{EnrichmentOptions, ExtractionRequest, SearchMode, Subject};
pub use selectors::{FieldSelector, MetricSelectors, SelectorTable, SpecialMarker};
pub use session::{AuthSession, Cookie, OriginStorage, SessionValidity, StorageEntry, StorageState};
pub use target::{NavigationTarget, TargetKind, WaitPolicy};
