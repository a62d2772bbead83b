//! Storage for the persisted session and for harvest results.
//!
//! ## Layout
//!
//! ```text
//! data/
//! └── session.json              # Storage state of the signed-in session
//! output/
//! ├── user_jack_20240501_120000.csv
//! └── user_jack_20240501_120000.json
//! ```

pub mod export;
pub mod local;

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::StorageState;

// Re-export for convenience
pub use local::{FileSessionStore, OutputWriter};

/// A storage state together with when it was last written.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSession {
    pub state: StorageState,
    pub modified_at: DateTime<Utc>,
}

/// Persistence for the session's storage state.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load the stored state. Missing or unreadable state yields `None`.
    async fn load(&self) -> Result<Option<StoredSession>>;

    /// Persist `state` and return its modification time.
    async fn save(&self, state: &StorageState) -> Result<DateTime<Utc>>;
}

/// In-memory session store for embedding and tests.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    stored: Mutex<Option<StoredSession>>,
    saves: AtomicUsize,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(stored: StoredSession) -> Self {
        Self {
            stored: Mutex::new(Some(stored)),
            saves: AtomicUsize::new(0),
        }
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn current(&self) -> Option<StoredSession> {
        self.stored
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self) -> Result<Option<StoredSession>> {
        Ok(self.current())
    }

    async fn save(&self, state: &StorageState) -> Result<DateTime<Utc>> {
        let now = Utc::now();
        *self
            .stored
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(StoredSession {
            state: state.clone(),
            modified_at: now,
        });
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(now)
    }
}
