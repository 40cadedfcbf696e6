//! Failure classification for the call-wrapping helpers
//!
//! A classifier decides whether an error returned by a protected operation is
//! recorded as a failure. Errors it rejects leave the breaker untouched, which
//! lets callers ignore "expected" errors such as validation failures.

use crate::state::BreakerStatus;
use std::any::Any;
use std::time::Duration;

/// What the classifier gets to look at
#[derive(Debug)]
pub struct FailureContext<'a> {
    pub circuit_name: &'a str,
    /// The operation's error, downcastable to its concrete type
    pub error: &'a dyn Any,
    /// Wall time spent in the operation
    pub elapsed: Duration,
    /// Breaker status when the operation was admitted
    pub status: BreakerStatus,
}

/// Decides whether an error counts toward opening the circuit
///
/// # Examples
///
/// ```rust
/// use durable_breaker::{FailureClassifier, FailureContext};
///
/// #[derive(Debug)]
/// struct OnlyIo;
///
/// impl FailureClassifier for OnlyIo {
///     fn should_trip(&self, ctx: &FailureContext<'_>) -> bool {
///         ctx.error.downcast_ref::<std::io::Error>().is_some()
///     }
/// }
/// ```
pub trait FailureClassifier: Send + Sync + std::fmt::Debug {
    /// `true` records the error as a failure, `false` ignores it
    fn should_trip(&self, ctx: &FailureContext<'_>) -> bool;
}

/// Counts every error as a failure
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl FailureClassifier for DefaultClassifier {
    fn should_trip(&self, _ctx: &FailureContext<'_>) -> bool {
        true
    }
}

/// Classifier built from a closure
pub struct PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    predicate: F,
}

impl<F> PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<F> FailureClassifier for PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    fn should_trip(&self, ctx: &FailureContext<'_>) -> bool {
        (self.predicate)(ctx)
    }
}

impl<F> std::fmt::Debug for PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredicateClassifier")
            .field("predicate", &"<closure>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context<'a>(error: &'a dyn Any, elapsed_ms: u64) -> FailureContext<'a> {
        FailureContext {
            circuit_name: "inventory",
            error,
            elapsed: Duration::from_millis(elapsed_ms),
            status: BreakerStatus::Closed,
        }
    }

    #[test]
    fn test_default_classifier_trips_all() {
        let err = "any error";
        assert!(DefaultClassifier.should_trip(&context(&err, 1)));
    }

    #[test]
    fn test_predicate_on_elapsed_time() {
        let classifier = PredicateClassifier::new(|ctx| ctx.elapsed >= Duration::from_secs(1));
        let err = "timeout";

        assert!(!classifier.should_trip(&context(&err, 200)));
        assert!(classifier.should_trip(&context(&err, 1_500)));
    }

    #[test]
    fn test_predicate_downcasts_error() {
        #[derive(Debug)]
        enum HttpError {
            Status(u16),
        }

        let classifier = PredicateClassifier::new(|ctx| {
            ctx.error
                .downcast_ref::<HttpError>()
                .map(|HttpError::Status(code)| *code >= 500)
                .unwrap_or(true)
        });

        let server = HttpError::Status(503);
        let client = HttpError::Status(404);
        let unknown = "unknown";

        assert!(classifier.should_trip(&context(&server, 1)));
        assert!(!classifier.should_trip(&context(&client, 1)));
        assert!(classifier.should_trip(&context(&unknown, 1)));
    }
}
