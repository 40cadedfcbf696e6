//! File-backed [`StateStore`]
//!
//! Each key maps to `<dir>/<key>.json` holding the persisted payload:
//! `{"status", "failureCount", "successCount", "openedAt"?, "version"}`.
//! Writes go to a temporary file first and are renamed into place.
//!
//! Conditional writes are serialized by a lock inside the store, so they are
//! atomic for one `FileStore` value. Several processes writing the same
//! directory can still race between the version check and the rename.

use crate::errors::StoreError;
use crate::state::{BreakerState, VersionedValue};
use crate::storage::{StateStore, WriteCondition, check_condition};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
    sequence: AtomicU64,
}

impl FileStore {
    /// Store documents under `dir`, creating it if needed
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
            sequence: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }

    fn next_version(&self) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        format!("{nanos:x}-{seq}")
    }

    async fn read(&self, path: &Path) -> Result<Option<VersionedValue<BreakerState>>, StoreError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Write `<path>.tmp` and rename it over `path`; the temp file never outlives
/// a failed write
async fn write_atomically(path: &Path, document: &[u8]) -> Result<(), StoreError> {
    let tmp = path.with_extension("json.tmp");

    let written = match tokio::fs::write(&tmp, document).await {
        Ok(()) => tokio::fs::rename(&tmp, path).await,
        Err(e) => Err(e),
    };

    if let Err(e) = written {
        if let Err(cleanup) = tokio::fs::remove_file(&tmp).await
            && cleanup.kind() != ErrorKind::NotFound
        {
            debug!(path = %tmp.display(), error = %cleanup, "Could not remove temp file");
        }
        return Err(e.into());
    }
    Ok(())
}

#[async_trait]
impl StateStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<VersionedValue<BreakerState>>, StoreError> {
        let path = self.path_for(key)?;
        self.read(&path).await
    }

    async fn put(
        &self,
        key: &str,
        value: &BreakerState,
        condition: WriteCondition<'_>,
    ) -> Result<String, StoreError> {
        let path = self.path_for(key)?;
        let _guard = self.write_lock.lock().await;

        let current = self.read(&path).await?;
        check_condition(
            key,
            condition,
            current.as_ref().map(|entry| entry.version.as_str()),
        )?;

        let version = self.next_version();
        let document = serde_json::to_vec_pretty(&VersionedValue::new(*value, version.clone()))?;

        write_atomically(&path, &document).await?;

        debug!(key, version = %version, path = %path.display(), "Wrote breaker state");
        Ok(version)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let _guard = self.write_lock.lock().await;

        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
