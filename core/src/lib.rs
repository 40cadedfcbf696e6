//! durable-breaker - Circuit breaker with optional versioned persistence
//!
//! This crate provides:
//! - A three-state engine (Closed → Open → HalfOpen) driven by an injectable clock
//! - Synchronous hooks for state changes and errors
//! - A remote extension that saves and loads breaker state through a pluggable
//!   store, using version tokens for optimistic concurrency
//! - In-memory and file-backed stores
//!
//! # Example
//!
//! ```rust
//! use durable_breaker::CircuitBreaker;
//!
//! let mut circuit = CircuitBreaker::builder("my_service")
//!     .failure_threshold(5)
//!     .reset_timeout_ms(30_000)
//!     .success_threshold(2)
//!     .on_open(|name| println!("Circuit {} opened!", name))
//!     .build();
//!
//! // Execute with circuit protection
//! let result = circuit.call(|| {
//!     // Your service call here
//!     Ok::<_, String>("success")
//! });
//! assert!(result.is_ok());
//!
//! // Or drive the gate by hand
//! if circuit.can_execute().is_ok() {
//!     circuit.record_failure();
//! }
//! assert!(circuit.is_closed());
//! ```

pub mod builder;
pub mod callbacks;
pub mod circuit;
pub mod classifier;
pub mod clock;
pub mod errors;
pub mod file_store;
pub mod guard;
pub mod remote;
pub mod state;
pub mod storage;

pub use builder::CircuitBuilder;
pub use callbacks::{Callbacks, ErrorMeta, TransitionMeta};
pub use circuit::{CallOptions, CircuitBreaker, Config, FallbackContext};
pub use classifier::{DefaultClassifier, FailureClassifier, FailureContext, PredicateClassifier};
pub use clock::{Clock, ManualClock, SystemClock};
pub use errors::{
    CircuitError, CircuitOpenError, ConcurrencyConflictError, ConfigError, Operation,
    PersistenceError, StoreError,
};
pub use file_store::FileStore;
pub use guard::{Protected, protect};
pub use remote::RemoteCircuitBreaker;
pub use state::{BreakerState, BreakerStatus, VersionedValue};
pub use storage::{MemoryStore, StateStore, WriteCondition};
