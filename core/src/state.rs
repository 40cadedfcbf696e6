//! Breaker state value and its persistence envelope

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerStatus {
    /// Calls flow through, failures are counted
    Closed,
    /// Calls are rejected until the reset timeout elapses
    Open,
    /// Trial calls are admitted, successes are counted
    HalfOpen,
}

impl BreakerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerStatus::Closed => "CLOSED",
            BreakerStatus::Open => "OPEN",
            BreakerStatus::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for BreakerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a breaker: status plus counters
///
/// This is a plain value. The engine replaces its copy on every change and
/// hands out copies, so a snapshot held by a caller never aliases engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerState {
    pub status: BreakerStatus,
    /// Failures observed since the last status change
    pub failure_count: u32,
    /// Successes observed while half-open
    pub success_count: u32,
    /// Epoch milliseconds of the last transition to open
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opened_at: Option<u64>,
}

impl BreakerState {
    /// Initial state: closed, zero counters
    pub const fn closed() -> Self {
        Self {
            status: BreakerStatus::Closed,
            failure_count: 0,
            success_count: 0,
            opened_at: None,
        }
    }

    pub const fn open(opened_at: u64) -> Self {
        Self {
            status: BreakerStatus::Open,
            failure_count: 0,
            success_count: 0,
            opened_at: Some(opened_at),
        }
    }

    pub const fn half_open() -> Self {
        Self {
            status: BreakerStatus::HalfOpen,
            failure_count: 0,
            success_count: 0,
            opened_at: None,
        }
    }

    /// Same status, failure counter replaced
    pub const fn with_failure_count(self, failure_count: u32) -> Self {
        Self {
            failure_count,
            ..self
        }
    }

    /// Same status, success counter replaced
    pub const fn with_success_count(self, success_count: u32) -> Self {
        Self {
            success_count,
            ..self
        }
    }
}

impl Default for BreakerState {
    fn default() -> Self {
        Self::closed()
    }
}

/// A stored value paired with the version token the store assigned to it
///
/// Tokens are opaque and only ever compared for equality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedValue<T> {
    #[serde(flatten)]
    pub value: T,
    pub version: String,
}

impl<T> VersionedValue<T> {
    pub fn new(value: T, version: impl Into<String>) -> Self {
        Self {
            value,
            version: version.into(),
        }
    }

    pub fn into_value(self) -> T {
        self.value
    }
}
