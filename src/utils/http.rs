// src/utils/http.rs

//! HTTP client utilities.

use std::time::Duration;

use crate::error::Result;
use crate::models::FastPathConfig;

/// Create a configured asynchronous HTTP client for the metrics API.
pub fn create_async_client(config: &FastPathConfig) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .timeout(Duration::from_secs(config.timeout_secs))
        .gzip(true)
        .build()?;
    Ok(client)
}
