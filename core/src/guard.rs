//! Higher-order call wrapping for a shared breaker
//!
//! [`protect`] pairs a breaker behind an `Arc<tokio::sync::Mutex<_>>` with an
//! async operation. Each call runs gate, operation, then outcome recording.
//! The lock is taken for the gate, released while the operation runs, and
//! taken again to record the result, so slow operations never block other
//! callers of the same breaker.
//!
//! # Example
//!
//! ```rust
//! use durable_breaker::{protect, CircuitBreaker};
//! use std::sync::Arc;
//! use tokio::sync::Mutex;
//!
//! # async fn example() {
//! let breaker = Arc::new(Mutex::new(CircuitBreaker::builder("inventory").build()));
//! let fetch = protect(breaker.clone(), || async { Ok::<_, std::io::Error>(42) });
//!
//! assert_eq!(fetch.call().await.unwrap(), 42);
//! # }
//! ```

use crate::circuit::CircuitBreaker;
use crate::errors::CircuitError;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

/// Wrap `operation` so every call goes through `breaker`
pub fn protect<F>(breaker: Arc<Mutex<CircuitBreaker>>, operation: F) -> Protected<F> {
    Protected { breaker, operation }
}

/// An operation guarded by a shared circuit breaker
pub struct Protected<F> {
    breaker: Arc<Mutex<CircuitBreaker>>,
    operation: F,
}

impl<F> Protected<F> {
    pub fn breaker(&self) -> &Arc<Mutex<CircuitBreaker>> {
        &self.breaker
    }

    /// Run a nullary operation
    pub async fn call<Fut, T, E>(&self) -> Result<T, CircuitError<E>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: 'static,
    {
        self.run(|| (self.operation)()).await
    }

    /// Run an operation that takes one argument
    pub async fn call_with<A, Fut, T, E>(&self, arg: A) -> Result<T, CircuitError<E>>
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: 'static,
    {
        self.run(move || (self.operation)(arg)).await
    }

    async fn run<G, Fut, T, E>(&self, start: G) -> Result<T, CircuitError<E>>
    where
        G: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: 'static,
    {
        let admitted = {
            let mut breaker = self.breaker.lock().await;
            breaker.can_execute()?;
            breaker.status()
        };

        let started = Instant::now();
        let result = start().await;

        self.breaker
            .lock()
            .await
            .record_outcome(&result, admitted, started.elapsed());
        result.map_err(CircuitError::Execution)
    }
}

impl<F> std::fmt::Debug for Protected<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Protected")
            .field("breaker", &self.breaker)
            .finish_non_exhaustive()
    }
}
