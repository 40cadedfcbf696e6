//! Remote persistence for a circuit breaker
//!
//! [`RemoteCircuitBreaker`] holds a local [`CircuitBreaker`] and a shared
//! [`StateStore`]. The breaker's name is the storage key. The wrapper
//! remembers the version it last saw; `save` requires the store to still hold
//! that version, or overwrites when no version has been seen yet.
//! `safe_save` only creates. Deciding whether a write conflicts is up to the
//! store.
//!
//! Nothing here retries. A [`PersistenceError::ConcurrencyConflict`] means
//! another writer got there first; `refresh` and try again if that is what
//! the caller wants.
//!
//! # Example
//!
//! ```rust
//! use durable_breaker::{CircuitBreaker, MemoryStore, RemoteCircuitBreaker};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryStore::new());
//! let breaker = CircuitBreaker::builder("payments").failure_threshold(3).build();
//! let mut remote = RemoteCircuitBreaker::new(breaker, store)?;
//!
//! remote.safe_save().await?;
//! remote.record_failure();
//! remote.save().await?;
//! # Ok(())
//! # }
//! ```

use crate::circuit::CircuitBreaker;
use crate::errors::{CircuitOpenError, Operation, PersistenceError, StoreError};
use crate::state::{BreakerState, BreakerStatus};
use crate::storage::{StateStore, WriteCondition};
use std::sync::Arc;
use tracing::debug;

/// Circuit breaker whose state can be saved to and loaded from a store
#[derive(Debug)]
pub struct RemoteCircuitBreaker {
    breaker: CircuitBreaker,
    store: Arc<dyn StateStore>,
    version: Option<String>,
}

impl RemoteCircuitBreaker {
    /// Wrap `breaker`; its name must be non-empty
    pub fn new(
        breaker: CircuitBreaker,
        store: Arc<dyn StateStore>,
    ) -> Result<Self, PersistenceError> {
        if breaker.name().is_empty() {
            return Err(PersistenceError::EmptyName);
        }
        Ok(Self {
            breaker,
            store,
            version: None,
        })
    }

    pub fn name(&self) -> &str {
        self.breaker.name()
    }

    /// Version token from the last load, refresh or save
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn breaker_mut(&mut self) -> &mut CircuitBreaker {
        &mut self.breaker
    }

    pub fn into_inner(self) -> CircuitBreaker {
        self.breaker
    }

    pub fn can_execute(&mut self) -> Result<(), CircuitOpenError> {
        self.breaker.can_execute()
    }

    pub fn record_success(&mut self) {
        self.breaker.record_success();
    }

    pub fn record_failure(&mut self) {
        self.breaker.record_failure();
    }

    pub fn state(&self) -> BreakerState {
        self.breaker.state()
    }

    pub fn status(&self) -> BreakerStatus {
        self.breaker.status()
    }

    pub fn is_open(&self) -> bool {
        self.breaker.is_open()
    }

    pub fn is_closed(&self) -> bool {
        self.breaker.is_closed()
    }

    pub fn is_half_open(&self) -> bool {
        self.breaker.is_half_open()
    }

    /// Write the current state, returning the store's new version token
    ///
    /// Guarded by the last observed version; unconditional if none was seen.
    pub async fn save(&mut self) -> Result<String, PersistenceError> {
        self.save_as(Operation::Save, false).await
    }

    /// Write the current state only if nothing is stored under the name yet
    ///
    /// The existence check and the write are separate store calls; two
    /// writers can both pass the check. The write itself is create-only, so
    /// the second one still fails with a conflict.
    pub async fn safe_save(&mut self) -> Result<String, PersistenceError> {
        let existing = self
            .store
            .get(self.breaker.name())
            .await
            .map_err(|source| self.storage_error(Operation::SafeSave, source))?;

        if existing.is_some() {
            let err = PersistenceError::ItemAlreadyExists {
                name: self.breaker.name().to_string(),
            };
            return Err(self.report(Operation::SafeSave, err));
        }

        self.save_as(Operation::SafeSave, true).await
    }

    /// Read the stored state without applying it to the local breaker
    pub async fn load(&mut self) -> Result<Option<BreakerState>, PersistenceError> {
        self.load_as(Operation::Load).await
    }

    /// Load the stored state and adopt it locally; `false` if nothing is stored
    pub async fn refresh(&mut self) -> Result<bool, PersistenceError> {
        match self.load_as(Operation::Refresh).await? {
            Some(state) => {
                self.breaker.restore(state);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Remove the stored state
    pub async fn delete(&mut self) -> Result<(), PersistenceError> {
        self.store
            .delete(self.breaker.name())
            .await
            .map_err(|source| self.storage_error(Operation::Delete, source))?;

        debug!(circuit = %self.breaker.name(), "Deleted stored breaker state");
        self.version = None;
        Ok(())
    }

    async fn save_as(
        &mut self,
        operation: Operation,
        create_only: bool,
    ) -> Result<String, PersistenceError> {
        let state = self.breaker.state();
        let condition = match self.version.as_deref() {
            _ if create_only => WriteCondition::Absent,
            Some(version) => WriteCondition::Version(version),
            None => WriteCondition::Any,
        };
        let result = self.store.put(self.breaker.name(), &state, condition).await;

        match result {
            Ok(version) => {
                debug!(
                    circuit = %self.breaker.name(),
                    status = %state.status,
                    version = %version,
                    "Saved breaker state"
                );
                self.version = Some(version.clone());
                Ok(version)
            }
            Err(StoreError::Conflict(conflict)) => Err(self.report(
                operation,
                PersistenceError::ConcurrencyConflict(conflict),
            )),
            Err(source) => Err(self.storage_error(operation, source)),
        }
    }

    async fn load_as(
        &mut self,
        operation: Operation,
    ) -> Result<Option<BreakerState>, PersistenceError> {
        let entry = self
            .store
            .get(self.breaker.name())
            .await
            .map_err(|source| self.storage_error(operation, source))?;

        Ok(entry.map(|entry| {
            debug!(
                circuit = %self.breaker.name(),
                status = %entry.value.status,
                version = %entry.version,
                "Loaded breaker state"
            );
            self.version = Some(entry.version);
            entry.value
        }))
    }

    fn storage_error(&self, operation: Operation, source: StoreError) -> PersistenceError {
        let err = PersistenceError::StorageOperation {
            name: self.breaker.name().to_string(),
            operation,
            source,
        };
        self.report(operation, err)
    }

    fn report(&self, operation: Operation, err: PersistenceError) -> PersistenceError {
        self.breaker
            .callbacks()
            .trigger_error(self.breaker.name(), operation, &err);
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryStore;
    use crate::state::VersionedValue;
    use async_trait::async_trait;
    use std::error::Error;
    use std::sync::Mutex;

    const START: u64 = 5_000;

    /// Store whose every call fails
    #[derive(Debug)]
    struct UnavailableStore;

    #[async_trait]
    impl StateStore for UnavailableStore {
        async fn get(&self, _key: &str) -> Result<Option<VersionedValue<BreakerState>>, StoreError> {
            Err(StoreError::backend("backend unavailable"))
        }

        async fn put(
            &self,
            _key: &str,
            _value: &BreakerState,
            _condition: WriteCondition<'_>,
        ) -> Result<String, StoreError> {
            Err(StoreError::backend("backend unavailable"))
        }

        async fn delete(&self, _key: &str) -> Result<(), StoreError> {
            Err(StoreError::backend("backend unavailable"))
        }
    }

    fn breaker(name: &str, clock: &Arc<ManualClock>) -> CircuitBreaker {
        CircuitBreaker::builder(name)
            .failure_threshold(2)
            .success_threshold(2)
            .reset_timeout_ms(1000)
            .clock(clock.clone())
            .build()
    }

    fn assert_storage_error(err: PersistenceError, expected: Operation) {
        match err {
            PersistenceError::StorageOperation {
                name,
                operation,
                source,
            } => {
                assert_eq!(name, "payments");
                assert_eq!(operation, expected);
                assert!(matches!(source, StoreError::Backend(_)));
            }
            other => panic!("Expected StorageOperation, got: {:?}", other),
        }
    }

    #[test]
    fn test_empty_name_is_rejected() {
        let clock = Arc::new(ManualClock::new(START));
        let result = RemoteCircuitBreaker::new(breaker("", &clock), Arc::new(MemoryStore::new()));

        assert!(matches!(result, Err(PersistenceError::EmptyName)));
    }

    #[tokio::test]
    async fn test_save_then_load_round_trip() {
        let clock = Arc::new(ManualClock::new(START));
        let store = Arc::new(MemoryStore::new());
        let mut remote = RemoteCircuitBreaker::new(breaker("payments", &clock), store.clone()).unwrap();

        remote.record_failure();
        remote.record_failure();
        let saved = remote.state();
        let version = remote.save().await.unwrap();
        assert_eq!(remote.version(), Some(version.as_str()));

        let mut reader =
            RemoteCircuitBreaker::new(breaker("payments", &clock), store).unwrap();
        let loaded = reader.load().await.unwrap().expect("state should be stored");

        assert_eq!(loaded, saved);
        assert_eq!(loaded.opened_at, Some(START));
        assert_eq!(reader.version(), Some(version.as_str()));
        // load leaves the local breaker alone
        assert!(reader.is_closed());
    }

    #[tokio::test]
    async fn test_load_missing_entry() {
        let clock = Arc::new(ManualClock::new(START));
        let mut remote =
            RemoteCircuitBreaker::new(breaker("payments", &clock), Arc::new(MemoryStore::new()))
                .unwrap();

        assert_eq!(remote.load().await.unwrap(), None);
        assert!(!remote.refresh().await.unwrap());
        assert_eq!(remote.version(), None);
    }

    #[tokio::test]
    async fn test_safe_save_refuses_existing_entry() {
        let clock = Arc::new(ManualClock::new(START));
        let store = Arc::new(MemoryStore::new());

        let mut first = RemoteCircuitBreaker::new(breaker("payments", &clock), store.clone()).unwrap();
        first.record_failure();
        first.record_failure();
        let version = first.safe_save().await.unwrap();

        let mut second = RemoteCircuitBreaker::new(breaker("payments", &clock), store.clone()).unwrap();
        let err = second.safe_save().await.unwrap_err();
        match err {
            PersistenceError::ItemAlreadyExists { name } => assert_eq!(name, "payments"),
            other => panic!("Expected ItemAlreadyExists, got: {:?}", other),
        }

        let stored = store.get("payments").await.unwrap().unwrap();
        assert_eq!(stored.version, version);
        assert_eq!(stored.value.status, BreakerStatus::Open);
    }

    #[tokio::test]
    async fn test_stale_writer_gets_unwrapped_conflict() {
        let clock = Arc::new(ManualClock::new(START));
        let store = Arc::new(MemoryStore::new());

        let mut a = RemoteCircuitBreaker::new(breaker("payments", &clock), store.clone()).unwrap();
        a.safe_save().await.unwrap();

        let mut b = RemoteCircuitBreaker::new(breaker("payments", &clock), store.clone()).unwrap();
        assert!(b.refresh().await.unwrap());

        a.record_failure();
        a.save().await.unwrap();

        b.record_failure();
        b.record_failure();
        let err = b.save().await.unwrap_err();
        assert!(err.is_conflict());
        match err {
            PersistenceError::ConcurrencyConflict(conflict) => assert_eq!(conflict.key, "payments"),
            other => panic!("Expected ConcurrencyConflict, got: {:?}", other),
        }

        // Reload, reapply, retry
        assert!(b.refresh().await.unwrap());
        assert_eq!(b.state().failure_count, 1);
        b.record_failure();
        assert!(b.is_open());
        b.save().await.unwrap();

        let stored = store.get("payments").await.unwrap().unwrap();
        assert_eq!(stored.value, BreakerState::open(START));
    }

    #[tokio::test]
    async fn test_refresh_adopts_stored_state() {
        let clock = Arc::new(ManualClock::new(START));
        let store = Arc::new(MemoryStore::new());
        store
            .put("payments", &BreakerState::open(START), WriteCondition::Absent)
            .await
            .unwrap();

        let mut remote = RemoteCircuitBreaker::new(breaker("payments", &clock), store).unwrap();
        assert!(remote.refresh().await.unwrap());
        assert!(remote.is_open());
        assert!(remote.can_execute().is_err());

        clock.advance(1000);
        remote.can_execute().unwrap();
        assert!(remote.is_half_open());
        remote.save().await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_forgets_version() {
        let clock = Arc::new(ManualClock::new(START));
        let store = Arc::new(MemoryStore::new());
        let mut remote = RemoteCircuitBreaker::new(breaker("payments", &clock), store.clone()).unwrap();

        remote.save().await.unwrap();
        remote.delete().await.unwrap();

        assert_eq!(remote.version(), None);
        assert!(store.is_empty().await);
        remote.safe_save().await.unwrap();
    }

    #[tokio::test]
    async fn test_failing_store_wraps_errors() {
        let clock = Arc::new(ManualClock::new(START));
        let mut remote =
            RemoteCircuitBreaker::new(breaker("payments", &clock), Arc::new(UnavailableStore))
                .unwrap();

        assert_storage_error(remote.save().await.unwrap_err(), Operation::Save);
        assert_storage_error(remote.safe_save().await.unwrap_err(), Operation::SafeSave);
        assert_storage_error(remote.load().await.unwrap_err(), Operation::Load);
        assert_storage_error(remote.refresh().await.unwrap_err(), Operation::Refresh);
        assert_storage_error(remote.delete().await.unwrap_err(), Operation::Delete);
    }

    #[tokio::test]
    async fn test_storage_error_keeps_cause() {
        let clock = Arc::new(ManualClock::new(START));
        let mut remote =
            RemoteCircuitBreaker::new(breaker("payments", &clock), Arc::new(UnavailableStore))
                .unwrap();

        let err = remote.save().await.unwrap_err();
        let cause = err.source().expect("cause should be attached");
        assert_eq!(cause.to_string(), "storage backend failed: backend unavailable");
    }

    #[tokio::test]
    async fn test_errors_reach_error_hook() {
        let clock = Arc::new(ManualClock::new(START));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        let circuit = CircuitBreaker::builder("payments")
            .clock(clock.clone())
            .on_error(move |err, meta| {
                assert_eq!(meta.name, "payments");
                let conflict = err
                    .downcast_ref::<PersistenceError>()
                    .is_some_and(PersistenceError::is_conflict);
                seen_clone.lock().unwrap().push((meta.operation, conflict));
            })
            .build();

        let store = Arc::new(MemoryStore::new());
        let mut other =
            RemoteCircuitBreaker::new(breaker("payments", &clock), store.clone()).unwrap();
        other.safe_save().await.unwrap();

        let mut remote = RemoteCircuitBreaker::new(circuit, store).unwrap();
        assert!(remote.safe_save().await.is_err());
        assert!(remote.refresh().await.unwrap());

        other.record_failure();
        other.save().await.unwrap();
        assert!(remote.save().await.is_err());

        assert_eq!(
            *seen.lock().unwrap(),
            vec![(Operation::SafeSave, false), (Operation::Save, true)]
        );
    }

    #[tokio::test]
    async fn test_save_without_observed_version_overwrites() {
        let clock = Arc::new(ManualClock::new(START));
        let store = Arc::new(MemoryStore::new());
        store
            .put("payments", &BreakerState::closed(), WriteCondition::Absent)
            .await
            .unwrap();

        let mut remote = RemoteCircuitBreaker::new(breaker("payments", &clock), store.clone()).unwrap();
        assert_eq!(remote.version(), None);
        remote.record_failure();
        let version = remote.save().await.unwrap();

        let stored = store.get("payments").await.unwrap().unwrap();
        assert_eq!(stored.version, version);
        assert_eq!(stored.value, BreakerState::closed().with_failure_count(1));
    }
}
