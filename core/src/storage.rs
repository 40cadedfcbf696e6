//! Storage backends for persisted breaker state
//!
//! Every backend implements [`StateStore`]: versioned get, conditional put and
//! delete, keyed by breaker name. Conflict detection belongs to the store;
//! callers only state the [`WriteCondition`] they expect to hold.
//!
//! - `MemoryStore`: in-process map, useful for tests and single-process setups
//! - [`FileStore`](crate::FileStore): one JSON document per key on disk

use crate::errors::{ConcurrencyConflictError, StoreError};
use crate::state::{BreakerState, VersionedValue};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// Abstract storage backend for breaker state
#[async_trait]
pub trait StateStore: Send + Sync + std::fmt::Debug {
    /// Read the entry for `key` with its current version
    async fn get(&self, key: &str) -> Result<Option<VersionedValue<BreakerState>>, StoreError>;

    /// Write `value` under `key` and return the new version token
    ///
    /// A write whose `condition` does not hold fails with
    /// [`StoreError::Conflict`] and leaves the entry untouched.
    async fn put(
        &self,
        key: &str,
        value: &BreakerState,
        condition: WriteCondition<'_>,
    ) -> Result<String, StoreError>;

    /// Remove the entry for `key`; removing a missing entry is not an error
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Precondition of a [`StateStore::put`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteCondition<'a> {
    /// Overwrite whatever is stored
    Any,
    /// Create only; the key must not exist yet
    Absent,
    /// The stored version must equal this token
    Version(&'a str),
}

/// Check a conditional write against the version currently stored
pub(crate) fn check_condition(
    key: &str,
    condition: WriteCondition<'_>,
    actual: Option<&str>,
) -> Result<(), ConcurrencyConflictError> {
    let expected = match condition {
        WriteCondition::Any => return Ok(()),
        WriteCondition::Absent => None,
        WriteCondition::Version(version) => Some(version),
    };
    if expected == actual {
        return Ok(());
    }
    Err(ConcurrencyConflictError {
        key: key.to_string(),
        expected: expected.map(str::to_string),
        actual: actual.map(str::to_string),
    })
}

/// In-memory store with counter-based version tokens
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, VersionedValue<BreakerState>>>,
    next_version: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<VersionedValue<BreakerState>>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(
        &self,
        key: &str,
        value: &BreakerState,
        condition: WriteCondition<'_>,
    ) -> Result<String, StoreError> {
        let mut entries = self.entries.write().await;

        let current = entries.get(key).map(|entry| entry.version.as_str());
        check_condition(key, condition, current)?;

        let version = (self.next_version.fetch_add(1, Ordering::SeqCst) + 1).to_string();
        entries.insert(key.to_string(), VersionedValue::new(*value, version.clone()));
        Ok(version)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}
