//! Authenticated browsing session and its persisted storage state.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A browser cookie in storage-state form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,

    #[serde(default)]
    pub domain: String,

    #[serde(default = "default_path")]
    pub path: String,

    /// Unix timestamp in seconds, `-1` for session cookies
    #[serde(default = "default_expires")]
    pub expires: f64,

    #[serde(default)]
    pub http_only: bool,

    #[serde(default)]
    pub secure: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

fn default_path() -> String {
    "/".to_string()
}

fn default_expires() -> f64 {
    -1.0
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: domain.into(),
            path: default_path(),
            expires: default_expires(),
            http_only: false,
            secure: true,
            same_site: None,
        }
    }
}

/// One `localStorage` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageEntry {
    pub name: String,
    pub value: String,
}

/// `localStorage` contents for one origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginStorage {
    pub origin: String,

    #[serde(rename = "localStorage", default)]
    pub local_storage: Vec<StorageEntry>,
}

/// Opaque browser storage blob: cookies plus per-origin local storage.
///
/// The JSON layout matches the storage-state files written by common
/// browser automation tools, so existing session files can be reused.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageState {
    #[serde(default)]
    pub cookies: Vec<Cookie>,

    #[serde(default)]
    pub origins: Vec<OriginStorage>,
}

impl StorageState {
    pub fn cookie(&self, name: &str) -> Option<&Cookie> {
        self.cookies.iter().find(|c| c.name == name)
    }

    /// Required cookie names that are absent or empty.
    pub fn missing_markers(&self, required: &[String]) -> Vec<String> {
        required
            .iter()
            .filter(|name| self.cookie(name).is_none_or(|c| c.value.is_empty()))
            .cloned()
            .collect()
    }
}

/// Result of checking a session against the validity policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionValidity {
    Valid,
    Empty,
    Expired { age_hours: i64 },
    MissingMarkers(Vec<String>),
}

impl SessionValidity {
    pub fn is_valid(&self) -> bool {
        matches!(self, SessionValidity::Valid)
    }
}

/// A credentialed browsing context.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthSession {
    pub state: StorageState,
    pub created_at: DateTime<Utc>,
    pub last_verified_at: DateTime<Utc>,
    pub max_age: Duration,

    /// Bumped by the session manager on every renewal
    pub generation: u64,
}

impl AuthSession {
    pub fn new(state: StorageState, verified_at: DateTime<Utc>, max_age: Duration) -> Self {
        Self {
            state,
            created_at: verified_at,
            last_verified_at: verified_at,
            max_age,
            generation: 0,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.last_verified_at
    }

    /// Check structural validity, age and required auth markers.
    pub fn validity(&self, now: DateTime<Utc>, required: &[String]) -> SessionValidity {
        if self.state.cookies.is_empty() {
            return SessionValidity::Empty;
        }
        let age = self.age(now);
        if age >= self.max_age {
            return SessionValidity::Expired {
                age_hours: age.num_hours(),
            };
        }
        let missing = self.state.missing_markers(required);
        if !missing.is_empty() {
            return SessionValidity::MissingMarkers(missing);
        }
        SessionValidity::Valid
    }
}
