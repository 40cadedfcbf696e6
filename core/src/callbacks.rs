//! Callback system for circuit breaker state transitions and errors
//!
//! Hooks run synchronously on the caller's thread. They observe; they never
//! influence a transition. A panicking hook unwinds through the operation that
//! triggered it.

use crate::errors::Operation;
use crate::state::{BreakerState, BreakerStatus};
use std::error::Error;
use std::sync::Arc;

/// Metadata passed to the state-change hook
#[derive(Debug, Clone, Copy)]
pub struct TransitionMeta<'a> {
    pub name: &'a str,
}

/// Metadata passed to the error hook
#[derive(Debug, Clone, Copy)]
pub struct ErrorMeta<'a> {
    pub name: &'a str,
    pub operation: Operation,
}

pub type StateChangeFn = dyn Fn(&BreakerState, &BreakerState, &TransitionMeta<'_>) + Send + Sync;
pub type ErrorFn = dyn Fn(&(dyn Error + 'static), &ErrorMeta<'_>) + Send + Sync;
pub type StatusFn = dyn Fn(&str) + Send + Sync;

/// Callbacks for circuit breaker events
#[derive(Clone, Default)]
pub struct Callbacks {
    pub on_state_change: Option<Arc<StateChangeFn>>,
    pub on_error: Option<Arc<ErrorFn>>,
    pub on_open: Option<Arc<StatusFn>>,
    pub on_close: Option<Arc<StatusFn>>,
    pub on_half_open: Option<Arc<StatusFn>>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the generic hook, then the per-status hook for `next`
    pub fn trigger_transition(&self, circuit: &str, previous: &BreakerState, next: &BreakerState) {
        if let Some(ref callback) = self.on_state_change {
            callback(previous, next, &TransitionMeta { name: circuit });
        }

        let status_hook = match next.status {
            BreakerStatus::Open => &self.on_open,
            BreakerStatus::Closed => &self.on_close,
            BreakerStatus::HalfOpen => &self.on_half_open,
        };
        if let Some(callback) = status_hook {
            callback(circuit);
        }
    }

    pub fn trigger_error(&self, circuit: &str, operation: Operation, error: &(dyn Error + 'static)) {
        if let Some(ref callback) = self.on_error {
            callback(
                error,
                &ErrorMeta {
                    name: circuit,
                    operation,
                },
            );
        }
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_state_change", &self.on_state_change.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_open", &self.on_open.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_half_open", &self.on_half_open.is_some())
            .finish()
    }
}
