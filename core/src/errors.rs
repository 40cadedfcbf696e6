//! Error types for circuit breaker operations

use std::error::Error;
use std::fmt;
use thiserror::Error;

/// Returned by the execute gate while the circuit is open
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Circuit '{circuit}' is open (opened at {opened_at}, retry allowed in {retry_after_ms}ms)")]
pub struct CircuitOpenError {
    pub circuit: String,
    /// Epoch milliseconds of the transition to open
    pub opened_at: u64,
    /// Milliseconds until the gate will admit a trial call
    pub retry_after_ms: u64,
}

/// A conditional write lost the optimistic-concurrency race
///
/// Raised by stores and passed through the remote extension unwrapped, so
/// callers can tell a lost race apart from a broken backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("version conflict on '{key}' (expected {expected:?}, found {actual:?})")]
pub struct ConcurrencyConflictError {
    pub key: String,
    pub expected: Option<String>,
    pub actual: Option<String>,
}

/// Failures reported by a [`StateStore`](crate::StateStore)
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Conflict(#[from] ConcurrencyConflictError),

    #[error("invalid storage key '{0}'")]
    InvalidKey(String),

    #[error("failed to encode or decode stored state")]
    Serialization(#[from] serde_json::Error),

    #[error("storage I/O failed")]
    Io(#[from] std::io::Error),

    #[error("storage backend failed: {0}")]
    Backend(#[source] Box<dyn Error + Send + Sync>),
}

impl StoreError {
    /// Wrap an arbitrary backend failure
    pub fn backend(err: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        StoreError::Backend(err.into())
    }
}

/// Operation that raised an error, reported to hooks and carried by
/// [`PersistenceError::StorageOperation`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CanExecute,
    Save,
    SafeSave,
    Load,
    Refresh,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::CanExecute => "can_execute",
            Operation::Save => "save",
            Operation::SafeSave => "safe_save",
            Operation::Load => "load",
            Operation::Refresh => "refresh",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from the remote persistence extension
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("remote circuit breaker requires a non-empty name")]
    EmptyName,

    #[error(transparent)]
    ConcurrencyConflict(#[from] ConcurrencyConflictError),

    #[error("Circuit '{name}' already has a stored state")]
    ItemAlreadyExists { name: String },

    #[error("storage {operation} failed for circuit '{name}'")]
    StorageOperation {
        name: String,
        operation: Operation,
        #[source]
        source: StoreError,
    },
}

impl PersistenceError {
    /// True when the caller lost an optimistic-concurrency race and may
    /// reload and retry
    pub fn is_conflict(&self) -> bool {
        matches!(self, PersistenceError::ConcurrencyConflict(_))
    }
}

/// Rejected [`Config`](crate::Config) values
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("failure_threshold must be at least 1")]
    ZeroFailureThreshold,

    #[error("success_threshold must be at least 1")]
    ZeroSuccessThreshold,

    #[error("jitter_factor must be within 0.0..=1.0, got {0}")]
    JitterOutOfRange(f64),
}

/// Errors returned by the call-wrapping helpers
#[derive(Debug)]
pub enum CircuitError<E = Box<dyn Error + Send + Sync>> {
    /// Circuit is open, the operation was not attempted
    Open(CircuitOpenError),
    /// The wrapped operation failed
    Execution(E),
}

impl<E> CircuitError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitError::Open(_))
    }

    /// The operation's own error, if it ran and failed
    pub fn into_execution(self) -> Option<E> {
        match self {
            CircuitError::Execution(e) => Some(e),
            CircuitError::Open(_) => None,
        }
    }
}

impl<E> From<CircuitOpenError> for CircuitError<E> {
    fn from(err: CircuitOpenError) -> Self {
        CircuitError::Open(err)
    }
}

impl<E: fmt::Display> fmt::Display for CircuitError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitError::Open(e) => write!(f, "{}", e),
            CircuitError::Execution(e) => write!(f, "Circuit execution failed: {}", e),
        }
    }
}

impl<E: Error + 'static> Error for CircuitError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CircuitError::Open(e) => Some(e),
            CircuitError::Execution(e) => Some(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_operation_keeps_cause() {
        let err = PersistenceError::StorageOperation {
            name: "payments".to_string(),
            operation: Operation::Save,
            source: StoreError::backend("connection reset"),
        };

        assert_eq!(err.to_string(), "storage save failed for circuit 'payments'");
        let cause = err.source().expect("cause should be kept");
        assert_eq!(cause.to_string(), "storage backend failed: connection reset");
        assert!(!err.is_conflict());
    }

    #[test]
    fn test_conflict_is_transparent() {
        let conflict = ConcurrencyConflictError {
            key: "payments".to_string(),
            expected: Some("1".to_string()),
            actual: Some("2".to_string()),
        };
        let err = PersistenceError::from(conflict.clone());

        assert!(err.is_conflict());
        assert_eq!(err.to_string(), conflict.to_string());
    }

    #[test]
    fn test_circuit_error_display() {
        let open: CircuitError<&str> = CircuitOpenError {
            circuit: "api".to_string(),
            opened_at: 10,
            retry_after_ms: 990,
        }
        .into();
        assert!(open.is_open());
        assert_eq!(
            open.to_string(),
            "Circuit 'api' is open (opened at 10, retry allowed in 990ms)"
        );

        let exec: CircuitError<&str> = CircuitError::Execution("boom");
        assert_eq!(exec.to_string(), "Circuit execution failed: boom");
        assert_eq!(exec.into_execution(), Some("boom"));
    }
}
