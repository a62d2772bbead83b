// src/pipeline/validate.rs

use std::path::Path;

use crate::error::Result;
use crate::models::Config;
use crate::services::{Extractor, MetricsReader};
use crate::utils::log;

/// Load the config file strictly, check its values and compile every
/// selector in the table.
pub fn run_validate(path: &Path) -> Result<Config> {
    log::header("Validating configuration");

    let checked = Config::load(path).and_then(|config| {
        config.validate()?;
        Extractor::new(&config.selectors, &config.extraction)?;
        MetricsReader::new(&config.selectors)?;
        Ok(config)
    });

    match checked {
        Ok(config) => {
            log::success(&format!("Config OK: {}", path.display()));
            log::sub_item(&format!(
                "Driver: headless={}, timeout={}ms",
                config.driver.headless, config.driver.navigation_timeout_ms
            ));
            log::sub_item(&format!(
                "Session: {} (max age {}h)",
                config.session.storage_file, config.session.max_age_hours
            ));
            log::sub_item(&format!(
                "Targets: {} user, {} hashtag",
                config.navigation.user_targets.len(),
                config.navigation.hashtag_targets.len()
            ));
            log::sub_item(&format!(
                "Selectors: {} containers, {} markers",
                config.selectors.containers.len(),
                config.selectors.markers.len()
            ));
            Ok(config)
        }
        Err(e) => {
            log::error(&format!("Validation failed: {e}"));
            Err(e)
        }
    }
}
