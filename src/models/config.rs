//! Application configuration structures.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::{SelectorTable, TargetKind, WaitPolicy};
use crate::utils::text::ScriptFamily;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Browser driver settings
    #[serde(default)]
    pub driver: DriverConfig,

    /// Session persistence and renewal
    #[serde(default)]
    pub session: SessionConfig,

    /// Candidate target URLs and readiness waits
    #[serde(default)]
    pub navigation: NavigationConfig,

    /// Scroll loop behavior
    #[serde(default)]
    pub pagination: PaginationConfig,

    /// Markup contract
    #[serde(default)]
    pub selectors: SelectorTable,

    /// Per-item normalization rules
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Result-set filtering rules
    #[serde(default)]
    pub quality: QualityConfig,

    /// Metrics and comment enrichment
    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    /// Retry and circuit breaker policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Request defaults and limits
    #[serde(default)]
    pub request: RequestConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.driver.navigation_timeout_ms == 0 {
            return Err(AppError::validation(
                "driver.navigation_timeout_ms must be > 0",
            ));
        }
        if self.session.max_age_hours == 0 {
            return Err(AppError::validation("session.max_age_hours must be > 0"));
        }
        if self.session.storage_file.trim().is_empty() {
            return Err(AppError::validation("session.storage_file is empty"));
        }
        if self.navigation.user_targets.is_empty() || self.navigation.hashtag_targets.is_empty() {
            return Err(AppError::validation("navigation target lists must not be empty"));
        }
        if self.pagination.stagnation_limit == 0 {
            return Err(AppError::validation(
                "pagination.stagnation_limit must be > 0",
            ));
        }
        if self.pagination.target_multiplier < 1.0 {
            return Err(AppError::validation(
                "pagination.target_multiplier must be >= 1.0",
            ));
        }
        if self.selectors.containers.is_empty() {
            return Err(AppError::validation("selectors.containers is empty"));
        }
        if !(0.0..=1.0).contains(&self.extraction.max_script_ratio) {
            return Err(AppError::validation(
                "extraction.max_script_ratio must be within 0.0..=1.0",
            ));
        }
        self.enrichment.validate()?;
        if self.retry.max_attempts == 0 {
            return Err(AppError::validation("retry.max_attempts must be > 0"));
        }
        if self.request.timeout_secs == 0 {
            return Err(AppError::validation("request.timeout_secs must be > 0"));
        }
        if self.request.max_concurrent == 0 {
            return Err(AppError::validation("request.max_concurrent must be > 0"));
        }
        Ok(())
    }
}

/// Browser driver settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    #[serde(default = "defaults::headless")]
    pub headless: bool,

    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    #[serde(default = "defaults::viewport_width")]
    pub viewport_width: u32,

    #[serde(default = "defaults::viewport_height")]
    pub viewport_height: u32,

    #[serde(default = "defaults::navigation_timeout")]
    pub navigation_timeout_ms: u64,

    #[serde(default)]
    pub wait_policy: WaitPolicy,

    /// Extra browser launch arguments
    #[serde(default = "defaults::launch_args")]
    pub launch_args: Vec<String>,

    /// Path to the browser executable; auto-detected when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable: Option<String>,

    /// Where to write screenshots and page dumps for failed targets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics_dir: Option<String>,
}

impl DriverConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            headless: defaults::headless(),
            user_agent: defaults::user_agent(),
            viewport_width: defaults::viewport_width(),
            viewport_height: defaults::viewport_height(),
            navigation_timeout_ms: defaults::navigation_timeout(),
            wait_policy: WaitPolicy::default(),
            launch_args: defaults::launch_args(),
            executable: None,
            diagnostics_dir: None,
        }
    }
}

/// Session persistence and credential renewal settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Persisted storage-state file
    #[serde(default = "defaults::storage_file")]
    pub storage_file: String,

    #[serde(default = "defaults::max_age_hours")]
    pub max_age_hours: u64,

    /// Cookies that must be present for the session to count as signed in
    #[serde(default = "defaults::required_cookies")]
    pub required_cookies: Vec<String>,

    /// URL fragments that identify the login flow
    #[serde(default = "defaults::login_markers")]
    pub login_markers: Vec<String>,

    #[serde(default = "defaults::login_url")]
    pub login_url: String,

    #[serde(default = "defaults::username_selector")]
    pub username_selector: String,

    #[serde(default = "defaults::password_selector")]
    pub password_selector: String,

    /// Environment variable holding the account name
    #[serde(default = "defaults::username_env")]
    pub username_env: String,

    /// Environment variable holding the password
    #[serde(default = "defaults::password_env")]
    pub password_env: String,

    /// Pause between login form steps
    #[serde(default = "defaults::step_delay")]
    pub step_delay_ms: u64,

    #[serde(default = "defaults::renewal_timeout")]
    pub renewal_timeout_secs: u64,
}

impl SessionConfig {
    pub fn max_age(&self) -> chrono::Duration {
        chrono::Duration::hours(self.max_age_hours as i64)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            storage_file: defaults::storage_file(),
            max_age_hours: defaults::max_age_hours(),
            required_cookies: defaults::required_cookies(),
            login_markers: defaults::login_markers(),
            login_url: defaults::login_url(),
            username_selector: defaults::username_selector(),
            password_selector: defaults::password_selector(),
            username_env: defaults::username_env(),
            password_env: defaults::password_env(),
            step_delay_ms: defaults::step_delay(),
            renewal_timeout_secs: defaults::renewal_timeout(),
        }
    }
}

/// A candidate URL template.
///
/// Placeholders: `{base}`, `{subject}`, `{query}` (encoded search query),
/// `{mode}` (`live` or `top`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetTemplate {
    pub kind: TargetKind,
    pub url: String,

    /// Adds a `since:` clause this many days back to the query
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since_days: Option<i64>,
}

impl TargetTemplate {
    fn new(kind: TargetKind, url: &str, since_days: Option<i64>) -> Self {
        Self {
            kind,
            url: url.to_string(),
            since_days,
        }
    }
}

/// Navigation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationConfig {
    #[serde(default = "defaults::base_url")]
    pub base_url: String,

    /// Pause after navigation before inspecting the page
    #[serde(default = "defaults::navigation_settle")]
    pub settle_ms: u64,

    /// How long to wait for any expected selector
    #[serde(default = "defaults::selector_timeout")]
    pub selector_timeout_ms: u64,

    #[serde(default = "defaults::user_targets")]
    pub user_targets: Vec<TargetTemplate>,

    #[serde(default = "defaults::hashtag_targets")]
    pub hashtag_targets: Vec<TargetTemplate>,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::base_url(),
            settle_ms: defaults::navigation_settle(),
            selector_timeout_ms: defaults::selector_timeout(),
            user_targets: defaults::user_targets(),
            hashtag_targets: defaults::hashtag_targets(),
        }
    }
}

/// Scroll loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationConfig {
    /// Pixels per scroll step
    #[serde(default = "defaults::scroll_delta")]
    pub scroll_delta: i64,

    /// Pause after each scroll for lazy content to load
    #[serde(default = "defaults::scroll_settle")]
    pub settle_ms: u64,

    /// Consecutive unchanged counts before the loop converges
    #[serde(default = "defaults::stagnation_limit")]
    pub stagnation_limit: usize,

    /// Stop once this many times `max_items` candidates are visible
    #[serde(default = "defaults::target_multiplier")]
    pub target_multiplier: f64,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            scroll_delta: defaults::scroll_delta(),
            settle_ms: defaults::scroll_settle(),
            stagnation_limit: defaults::stagnation_limit(),
            target_multiplier: defaults::target_multiplier(),
        }
    }
}

/// Per-item normalization rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Minimum text length in characters
    #[serde(default = "defaults::min_text_length")]
    pub min_text_length: usize,

    /// Generic texts rejected outright (compared case-insensitively)
    #[serde(default = "defaults::placeholder_texts")]
    pub placeholder_texts: Vec<String>,

    #[serde(default = "defaults::excluded_scripts")]
    pub excluded_scripts: Vec<ScriptFamily>,

    /// Share of letters in an excluded script at which text is rejected
    #[serde(default = "defaults::max_script_ratio")]
    pub max_script_ratio: f64,

    /// Permalink suffixes that point at media or analytics, not the post
    #[serde(default = "defaults::sub_resource_markers")]
    pub sub_resource_markers: Vec<String>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_text_length: defaults::min_text_length(),
            placeholder_texts: defaults::placeholder_texts(),
            excluded_scripts: defaults::excluded_scripts(),
            max_script_ratio: defaults::max_script_ratio(),
            sub_resource_markers: defaults::sub_resource_markers(),
        }
    }
}

/// Result-set filtering rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    #[serde(default = "defaults::min_content_length")]
    pub min_content_length: usize,

    /// Words that are not links, mentions or hashtags
    #[serde(default = "defaults::min_substantive_words")]
    pub min_substantive_words: usize,

    /// Prefixes of "content unavailable" placeholders
    #[serde(default = "defaults::unavailable_markers")]
    pub unavailable_markers: Vec<String>,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_content_length: defaults::min_content_length(),
            min_substantive_words: defaults::min_substantive_words(),
            unavailable_markers: defaults::unavailable_markers(),
        }
    }
}

/// Fast path metrics API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FastPathConfig {
    #[serde(default = "defaults::fast_path_enabled")]
    pub enabled: bool,

    #[serde(default = "defaults::api_base")]
    pub api_base: String,

    /// Persisted query ID of the post-detail operation
    #[serde(default = "defaults::operation_id")]
    pub operation_id: String,

    #[serde(default = "defaults::guest_activate_url")]
    pub guest_activate_url: String,

    /// Environment variable holding the web client bearer token
    #[serde(default = "defaults::bearer_token_env")]
    pub bearer_token_env: String,

    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    #[serde(default = "defaults::api_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "defaults::guest_token_ttl")]
    pub guest_token_ttl_secs: u64,

    /// Refresh the guest token when the remaining rate limit drops below this
    #[serde(default = "defaults::rate_limit_floor")]
    pub rate_limit_floor: u64,

    /// Pause after an HTTP 429 before refreshing the token
    #[serde(default = "defaults::rate_limit_pause")]
    pub rate_limit_pause_ms: u64,

    /// Extra reply pages followed through the bottom cursor
    #[serde(default = "defaults::max_comment_pages")]
    pub max_comment_pages: usize,
}

impl Default for FastPathConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::fast_path_enabled(),
            api_base: defaults::api_base(),
            operation_id: defaults::operation_id(),
            guest_activate_url: defaults::guest_activate_url(),
            bearer_token_env: defaults::bearer_token_env(),
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::api_timeout(),
            guest_token_ttl_secs: defaults::guest_token_ttl(),
            rate_limit_floor: defaults::rate_limit_floor(),
            rate_limit_pause_ms: defaults::rate_limit_pause(),
            max_comment_pages: defaults::max_comment_pages(),
        }
    }
}

/// Enrichment settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    #[serde(default = "defaults::initial_batch_size")]
    pub initial_batch_size: usize,

    #[serde(default = "defaults::min_batch_size")]
    pub min_batch_size: usize,

    #[serde(default = "defaults::max_batch_size")]
    pub max_batch_size: usize,

    /// Grow the batch when the success rate is above this
    #[serde(default = "defaults::raise_above")]
    pub raise_above: f64,

    /// Shrink the batch when the success rate is below this
    #[serde(default = "defaults::lower_below")]
    pub lower_below: f64,

    #[serde(default = "defaults::time_budget")]
    pub time_budget_secs: u64,

    /// Measured likes + replies + reposts needed to keep an enriched item
    #[serde(default = "defaults::min_engagement")]
    pub min_engagement: u64,

    /// Likes per view used for lower-bound estimates
    #[serde(default = "defaults::estimated_like_rate")]
    pub estimated_like_rate: f64,

    /// Pause on a permalink page before reading counters
    #[serde(default = "defaults::page_settle")]
    pub page_settle_ms: u64,

    #[serde(default)]
    pub fast_path: FastPathConfig,
}

impl EnrichmentConfig {
    pub fn time_budget(&self) -> Duration {
        Duration::from_secs(self.time_budget_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.min_batch_size == 0 || self.min_batch_size > self.max_batch_size {
            return Err(AppError::validation(
                "enrichment batch bounds must satisfy 0 < min <= max",
            ));
        }
        if !(self.min_batch_size..=self.max_batch_size).contains(&self.initial_batch_size) {
            return Err(AppError::validation(
                "enrichment.initial_batch_size must be within the batch bounds",
            ));
        }
        if self.lower_below > self.raise_above {
            return Err(AppError::validation(
                "enrichment.lower_below must not exceed raise_above",
            ));
        }
        Ok(())
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            initial_batch_size: defaults::initial_batch_size(),
            min_batch_size: defaults::min_batch_size(),
            max_batch_size: defaults::max_batch_size(),
            raise_above: defaults::raise_above(),
            lower_below: defaults::lower_below(),
            time_budget_secs: defaults::time_budget(),
            min_engagement: defaults::min_engagement(),
            estimated_like_rate: defaults::estimated_like_rate(),
            page_settle_ms: defaults::page_settle(),
            fast_path: FastPathConfig::default(),
        }
    }
}

/// Retry and circuit breaker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "defaults::backoff")]
    pub backoff_ms: u64,

    #[serde(default = "defaults::backoff_multiplier")]
    pub backoff_multiplier: f64,

    #[serde(default = "defaults::max_backoff")]
    pub max_backoff_ms: u64,

    /// Consecutive failed requests before the breaker opens
    #[serde(default = "defaults::failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "defaults::cooldown")]
    pub cooldown_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            backoff_ms: defaults::backoff(),
            backoff_multiplier: defaults::backoff_multiplier(),
            max_backoff_ms: defaults::max_backoff(),
            failure_threshold: defaults::failure_threshold(),
            cooldown_secs: defaults::cooldown(),
        }
    }
}

/// Request defaults and limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestConfig {
    #[serde(default = "defaults::max_items")]
    pub max_items: usize,

    #[serde(default = "defaults::min_items")]
    pub min_items: usize,

    #[serde(default = "defaults::max_scroll_steps")]
    pub max_scroll_steps: usize,

    /// Hard ceiling for one request, enrichment excluded
    #[serde(default = "defaults::request_timeout")]
    pub timeout_secs: u64,

    /// Requests allowed to drive a browser at the same time
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            max_items: defaults::max_items(),
            min_items: defaults::min_items(),
            max_scroll_steps: defaults::max_scroll_steps(),
            timeout_secs: defaults::request_timeout(),
            max_concurrent: defaults::max_concurrent(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Csv,
    Json,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Json => "json",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "defaults::output_dir")]
    pub dir: String,

    #[serde(default = "defaults::formats")]
    pub formats: Vec<OutputFormat>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: defaults::output_dir(),
            formats: defaults::formats(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

mod defaults {
    use super::{OutputFormat, TargetKind, TargetTemplate};
    use crate::utils::text::ScriptFamily;

    const SEARCH_URL: &str = "{base}/search?q={query}&src=typed_query&f={mode}";

    // Driver defaults
    pub fn headless() -> bool {
        true
    }
    pub fn user_agent() -> String {
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36".into()
    }
    pub fn viewport_width() -> u32 {
        1280
    }
    pub fn viewport_height() -> u32 {
        2000
    }
    pub fn navigation_timeout() -> u64 {
        30_000
    }
    pub fn launch_args() -> Vec<String> {
        vec![
            "--no-sandbox".into(),
            "--disable-dev-shm-usage".into(),
            "--disable-blink-features=AutomationControlled".into(),
        ]
    }

    // Session defaults
    pub fn storage_file() -> String {
        "data/session.json".into()
    }
    pub fn max_age_hours() -> u64 {
        24
    }
    pub fn required_cookies() -> Vec<String> {
        vec!["auth_token".into(), "ct0".into()]
    }
    pub fn login_markers() -> Vec<String> {
        vec!["/login".into(), "/i/flow/login".into()]
    }
    pub fn login_url() -> String {
        "https://x.com/i/flow/login".into()
    }
    pub fn username_selector() -> String {
        "input[autocomplete='username']".into()
    }
    pub fn password_selector() -> String {
        "input[type='password']".into()
    }
    pub fn username_env() -> String {
        "HARVESTER_USERNAME".into()
    }
    pub fn password_env() -> String {
        "HARVESTER_PASSWORD".into()
    }
    pub fn step_delay() -> u64 {
        2_000
    }
    pub fn renewal_timeout() -> u64 {
        90
    }

    // Navigation defaults
    pub fn base_url() -> String {
        "https://x.com".into()
    }
    pub fn navigation_settle() -> u64 {
        2_000
    }
    pub fn selector_timeout() -> u64 {
        10_000
    }
    pub fn user_targets() -> Vec<TargetTemplate> {
        vec![
            TargetTemplate::new(TargetKind::SearchLive, SEARCH_URL, None),
            TargetTemplate::new(TargetKind::Profile, "{base}/{subject}", None),
            TargetTemplate::new(TargetKind::SearchDated, SEARCH_URL, Some(7)),
            TargetTemplate::new(TargetKind::SearchDated, SEARCH_URL, Some(30)),
        ]
    }
    pub fn hashtag_targets() -> Vec<TargetTemplate> {
        vec![
            TargetTemplate::new(TargetKind::SearchTop, SEARCH_URL, None),
            TargetTemplate::new(TargetKind::SearchLive, SEARCH_URL, None),
            TargetTemplate::new(
                TargetKind::Topic,
                "{base}/hashtag/{subject}?src=hashtag_click",
                None,
            ),
        ]
    }

    // Pagination defaults
    pub fn scroll_delta() -> i64 {
        2_500
    }
    pub fn scroll_settle() -> u64 {
        1_000
    }
    pub fn stagnation_limit() -> usize {
        3
    }
    pub fn target_multiplier() -> f64 {
        3.0
    }

    // Extraction defaults
    pub fn min_text_length() -> usize {
        5
    }
    pub fn placeholder_texts() -> Vec<String> {
        ["hola", "hello", "hi", "test", "prueba"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }
    pub fn excluded_scripts() -> Vec<ScriptFamily> {
        vec![ScriptFamily::Arabic]
    }
    pub fn max_script_ratio() -> f64 {
        0.3
    }
    pub fn sub_resource_markers() -> Vec<String> {
        vec!["/photo/".into(), "/video/".into(), "/analytics".into()]
    }

    // Quality defaults
    pub fn min_content_length() -> usize {
        10
    }
    pub fn min_substantive_words() -> usize {
        2
    }
    pub fn unavailable_markers() -> Vec<String> {
        vec![
            "[Contenido no disponible".into(),
            "This post is unavailable".into(),
        ]
    }

    // Fast path defaults
    pub fn fast_path_enabled() -> bool {
        true
    }
    pub fn api_base() -> String {
        "https://x.com/i/api/graphql".into()
    }
    pub fn operation_id() -> String {
        "v2sSj8yuQSX-K_YrDHWqBw".into()
    }
    pub fn guest_activate_url() -> String {
        "https://api.twitter.com/1.1/guest/activate.json".into()
    }
    pub fn bearer_token_env() -> String {
        "HARVESTER_BEARER_TOKEN".into()
    }
    pub fn api_timeout() -> u64 {
        30
    }
    pub fn guest_token_ttl() -> u64 {
        600
    }
    pub fn rate_limit_floor() -> u64 {
        10
    }
    pub fn rate_limit_pause() -> u64 {
        10_000
    }
    pub fn max_comment_pages() -> usize {
        2
    }

    // Enrichment defaults
    pub fn initial_batch_size() -> usize {
        2
    }
    pub fn min_batch_size() -> usize {
        1
    }
    pub fn max_batch_size() -> usize {
        5
    }
    pub fn raise_above() -> f64 {
        0.7
    }
    pub fn lower_below() -> f64 {
        0.3
    }
    pub fn time_budget() -> u64 {
        120
    }
    pub fn min_engagement() -> u64 {
        1
    }
    pub fn estimated_like_rate() -> f64 {
        0.01
    }
    pub fn page_settle() -> u64 {
        2_000
    }

    // Retry defaults
    pub fn max_attempts() -> u32 {
        3
    }
    pub fn backoff() -> u64 {
        2_000
    }
    pub fn backoff_multiplier() -> f64 {
        1.5
    }
    pub fn max_backoff() -> u64 {
        30_000
    }
    pub fn failure_threshold() -> u32 {
        5
    }
    pub fn cooldown() -> u64 {
        60
    }

    // Request defaults
    pub fn max_items() -> usize {
        20
    }
    pub fn min_items() -> usize {
        10
    }
    pub fn max_scroll_steps() -> usize {
        10
    }
    pub fn request_timeout() -> u64 {
        300
    }
    pub fn max_concurrent() -> usize {
        1
    }

    // Output defaults
    pub fn output_dir() -> String {
        "output".into()
    }
    pub fn formats() -> Vec<OutputFormat> {
        vec![OutputFormat::Csv, OutputFormat::Json]
    }
    pub fn log_level() -> String {
        "info".into()
    }
}
