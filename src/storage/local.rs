//! Local filesystem storage.
//!
//! Every write goes to a temporary sibling file first and is then renamed
//! into place, so readers never observe a half-written session or result.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::{OutputFormat, StorageState};
use crate::pipeline::HarvestOutcome;
use crate::storage::export;
use crate::storage::{SessionStore, StoredSession};

/// Write bytes atomically (write to temp, then rename).
async fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp = path.with_extension("tmp");
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    drop(file);

    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Read bytes, returning None if file doesn't exist.
async fn read_bytes(path: &Path) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(AppError::Io(e)),
    }
}

async fn modified_at(path: &Path) -> Result<DateTime<Utc>> {
    let modified = tokio::fs::metadata(path).await?.modified()?;
    Ok(DateTime::<Utc>::from(modified))
}

/// Session store backed by a storage-state JSON file.
///
/// The file's modification time doubles as the last verification time.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self) -> Result<Option<StoredSession>> {
        let bytes = match read_bytes(&self.path).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                log::info!("No session file at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => {
                log::warn!("Session file {} unreadable: {}", self.path.display(), e);
                return Ok(None);
            }
        };

        let state: StorageState = match serde_json::from_slice(&bytes) {
            Ok(state) => state,
            Err(e) => {
                log::warn!("Session file {} is corrupt: {}", self.path.display(), e);
                return Ok(None);
            }
        };

        Ok(Some(StoredSession {
            state,
            modified_at: modified_at(&self.path).await?,
        }))
    }

    async fn save(&self, state: &StorageState) -> Result<DateTime<Utc>> {
        let bytes = serde_json::to_vec_pretty(state)?;
        write_bytes(&self.path, &bytes).await?;
        log::info!("Session saved to {}", self.path.display());
        modified_at(&self.path).await
    }
}

/// Writes harvest results to an output directory.
#[derive(Debug, Clone)]
pub struct OutputWriter {
    dir: PathBuf,
}

impl OutputWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// File stem for an outcome: `<subject>_<YYYYmmdd_HHMMSS>`.
    pub fn file_stem(outcome: &HarvestOutcome, at: DateTime<Utc>) -> String {
        format!(
            "{}_{}",
            outcome.subject.label(),
            at.format("%Y%m%d_%H%M%S")
        )
    }

    /// Write the outcome in each requested format; returns the written paths.
    pub async fn write(
        &self,
        outcome: &HarvestOutcome,
        formats: &[OutputFormat],
        at: DateTime<Utc>,
    ) -> Result<Vec<PathBuf>> {
        let stem = Self::file_stem(outcome, at);
        let mut written = Vec::with_capacity(formats.len());

        for format in formats {
            let bytes = match format {
                OutputFormat::Csv => {
                    let mut buf = Vec::new();
                    export::write_csv(&outcome.items, &mut buf)?;
                    buf
                }
                OutputFormat::Json => export::to_json(outcome)?,
            };
            let path = self.dir.join(format!("{stem}.{}", format.extension()));
            write_bytes(&path, &bytes).await?;
            log::info!("Wrote {} items to {}", outcome.items.len(), path.display());
            written.push(path);
        }

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Cookie;

    fn state() -> StorageState {
        StorageState {
            cookies: vec![
                Cookie::new("auth_token", "a", ".x.com"),
                Cookie::new("ct0", "c", ".x.com"),
            ],
            origins: vec![],
        }
    }

    #[tokio::test]
    async fn test_missing_file_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("session.json"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("nested/session.json"));
        let saved_at = store.save(&state()).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.state, state());
        assert_eq!(loaded.modified_at, saved_at);
        assert!(!dir.path().join("nested/session.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();
        let store = FileSessionStore::new(&path);
        assert!(store.load().await.unwrap().is_none());
    }
}
