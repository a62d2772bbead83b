// src/config.rs

//! Configuration loading utilities.
//!
//! Resolves the config file location, loads it with a fallback to defaults
//! and applies environment overrides on top.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::models::Config;
use crate::utils::log;

/// Environment variable that may point at the config file.
pub const CONFIG_ENV: &str = "HARVESTER_CONFIG";

/// Default config file location relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "data/config.toml";

/// Pick the config path: explicit argument, then `HARVESTER_CONFIG`, then
/// the default location.
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Load configuration from a TOML file.
///
/// A missing file falls back to defaults; a malformed one is an error.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        log::warn(&format!(
            "Config file {} not found, using default configuration.",
            path.display()
        ));
        return Ok(Config::default());
    }
    Config::load(path)
}

/// Apply `HARVESTER_*` overrides using `lookup` to read variables.
pub fn apply_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(level) = lookup("HARVESTER_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(dir) = lookup("HARVESTER_OUTPUT_DIR") {
        config.output.dir = dir;
    }
    if let Some(file) = lookup("HARVESTER_SESSION_FILE") {
        config.session.storage_file = file;
    }
    if let Some(dir) = lookup("HARVESTER_DIAGNOSTICS_DIR") {
        config.driver.diagnostics_dir = (!dir.is_empty()).then_some(dir);
    }
    if let Some(headless) = lookup("HARVESTER_HEADLESS") {
        match headless.to_lowercase().as_str() {
            "1" | "true" | "yes" => config.driver.headless = true,
            "0" | "false" | "no" => config.driver.headless = false,
            other => log::warn(&format!("Ignoring HARVESTER_HEADLESS={other}")),
        }
    }
}

/// Load, override from the process environment and validate.
pub fn load_all(path: &Path) -> Result<Config> {
    let mut config = load_config(path)?;
    apply_overrides(&mut config, |key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_path_prefers_explicit() {
        let path = config_path(Some(Path::new("custom.toml")));
        assert_eq!(path, PathBuf::from("custom.toml"));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.session.max_age_hours, 24);
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[session\nmax_age_hours = ").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[request]\nmax_items = 50\n").unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.request.max_items, 50);
        assert_eq!(config.request.min_items, 10);
        assert_eq!(config.pagination.stagnation_limit, 3);
    }

    #[test]
    fn test_apply_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("HARVESTER_LOG_LEVEL", "debug"),
            ("HARVESTER_OUTPUT_DIR", "/tmp/out"),
            ("HARVESTER_HEADLESS", "false"),
            ("HARVESTER_DIAGNOSTICS_DIR", "diag"),
        ]);
        let mut config = Config::default();
        apply_overrides(&mut config, |k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.output.dir, "/tmp/out");
        assert!(!config.driver.headless);
        assert_eq!(config.driver.diagnostics_dir.as_deref(), Some("diag"));
    }
}
