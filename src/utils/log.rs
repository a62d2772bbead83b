// src/utils/log.rs

//! Console output for the command-line interface.
//!
//! Library code logs through the `log` facade; this module formats the
//! human-facing progress lines printed by the `harvester` binary. Lines are
//! filtered by the same level names `env_logger` accepts.

use std::sync::OnceLock;

use chrono::Local;
use log::{Level, LevelFilter};

const RULE_WIDTH: usize = 60;

static THRESHOLD: OnceLock<LevelFilter> = OnceLock::new();

/// Set the minimum level for console output. Later calls are ignored.
pub fn init(level: &str) {
    let _ = THRESHOLD.set(level.parse().unwrap_or(LevelFilter::Info));
}

fn enabled(level: Level) -> bool {
    level <= THRESHOLD.get().copied().unwrap_or(LevelFilter::Info)
}

fn line(level: Level, message: &str) -> String {
    format!(
        "[{}] [{:<5}] {}",
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        level,
        message
    )
}

/// Progress goes to stdout, problems to stderr.
fn emit(level: Level, message: &str) {
    if !enabled(level) {
        return;
    }
    match level {
        Level::Warn | Level::Error => eprintln!("{}", line(level, message)),
        _ => println!("{}", line(level, message)),
    }
}

pub fn warn(message: &str) {
    emit(Level::Warn, message);
}

pub fn error(message: &str) {
    emit(Level::Error, message);
}

/// Completion notice, printed whatever the threshold.
pub fn success(message: &str) {
    println!("{}", line(Level::Info, message));
}

/// A titled block between two rules.
pub fn header(title: &str) {
    let rule = "═".repeat(RULE_WIDTH);
    emit(Level::Info, &rule);
    emit(Level::Info, &format!("  {title}"));
    emit(Level::Info, &rule);
}

/// An indented detail line under the last header.
pub fn sub_item(message: &str) {
    emit(Level::Info, &format!("    {message}"));
}

/// Key/value lines closing a run.
pub fn summary(title: &str, rows: &[(&str, String)]) {
    if !enabled(Level::Info) {
        return;
    }
    println!();
    emit(Level::Info, &format!("[SUMMARY] {title}"));
    for (key, value) in rows {
        sub_item(&format!("{key}: {value}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_carries_padded_level() {
        let text = line(Level::Warn, "session expired");
        assert!(text.ends_with("[WARN ] session expired"));
    }

    #[test]
    fn test_default_threshold_hides_debug() {
        assert!(enabled(Level::Error));
        assert!(enabled(Level::Info));
        assert!(!enabled(Level::Debug));
    }
}
