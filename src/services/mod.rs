//! Service layer for the harvester.
//!
//! This module contains the extraction core:
//! - Session validity and renewal (`SessionManager`)
//! - Candidate route planning and loading (`NavigationSequencer`)
//! - Scroll-driven pagination (`PaginationController`)
//! - Container extraction and normalization (`Extractor`)
//! - Quality and de-duplication (`QualityFilter`)
//! - Metrics enrichment (`EnrichmentPipeline`, `GraphqlClient`, `DomMetricsReader`)

pub mod enrichment;
pub mod extractor;
pub mod graphql;
pub mod metrics;
pub mod navigation;
pub mod pagination;
pub mod quality;
pub mod session;

pub use enrichment::{
    AdaptiveBatcher, EnrichmentLimits, EnrichmentPipeline, EnrichmentReport, FastPath,
    FastPathResult, SlowPath, SlowPathReading,
};
pub use extractor::{ContainerMatch, ExtractionIssue, ExtractionReport, Extractor};
pub use graphql::GraphqlClient;
pub use metrics::{DomMetricsReader, MetricsReader};
pub use navigation::{LoadedPage, NavigationSequencer, TargetOutcome, plan_targets};
pub use pagination::{PaginationController, PaginationOutcome, PaginationState, ScrollTracker};
pub use quality::{DropReason, FilterReport, QualityFilter};
pub use session::{
    BrowserLoginRenewer, Credentials, SessionManager, SessionPolicy, SessionRenewer,
};
