//! Builder API for ergonomic circuit breaker configuration

use crate::{
    callbacks::{Callbacks, ErrorMeta, TransitionMeta},
    circuit::{CircuitBreaker, CircuitContext, Config},
    classifier::FailureClassifier,
    clock::{Clock, SystemClock},
    state::BreakerState,
};
use std::error::Error;
use std::sync::Arc;

/// Builder for creating circuit breakers with fluent API
pub struct CircuitBuilder {
    name: String,
    config: Config,
    clock: Option<Arc<dyn Clock>>,
    failure_classifier: Option<Arc<dyn FailureClassifier>>,
    callbacks: Callbacks,
}

impl CircuitBuilder {
    /// Create a new builder for a circuit with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: Config::default(),
            clock: None,
            failure_classifier: None,
            callbacks: Callbacks::new(),
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Failures in Closed before the circuit opens
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// Failures in HalfOpen before the circuit reopens
    pub fn half_open_failure_threshold(mut self, threshold: u32) -> Self {
        self.config.half_open_failure_threshold = threshold;
        self
    }

    /// Successes in HalfOpen before the circuit closes
    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    /// Minimum dwell in Open, in milliseconds
    pub fn reset_timeout_ms(mut self, millis: u64) -> Self {
        self.config.reset_timeout_ms = millis;
        self
    }

    /// Set the jitter factor (0.0 = no jitter, 1.0 = up to double the reset timeout)
    pub fn jitter_factor(mut self, factor: f64) -> Self {
        self.config.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }

    /// Use a custom time source
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set a failure classifier to filter which errors count as failures
    ///
    /// Only consulted by the call-wrapping helpers; `record_failure` always counts.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use durable_breaker::{CircuitBreaker, PredicateClassifier};
    /// use std::sync::Arc;
    ///
    /// let circuit = CircuitBreaker::builder("api")
    ///     .failure_classifier(Arc::new(PredicateClassifier::new(|ctx| {
    ///         ctx.elapsed.as_secs() >= 1
    ///     })))
    ///     .build();
    /// ```
    pub fn failure_classifier(mut self, classifier: Arc<dyn FailureClassifier>) -> Self {
        self.failure_classifier = Some(classifier);
        self
    }

    /// Set callback for every status transition
    pub fn on_state_change<F>(mut self, f: F) -> Self
    where
        F: Fn(&BreakerState, &BreakerState, &TransitionMeta<'_>) + Send + Sync + 'static,
    {
        self.callbacks.on_state_change = Some(Arc::new(f));
        self
    }

    /// Set callback for errors raised by the breaker or its persistence layer
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&(dyn Error + 'static), &ErrorMeta<'_>) + Send + Sync + 'static,
    {
        self.callbacks.on_error = Some(Arc::new(f));
        self
    }

    /// Set callback for when circuit opens
    pub fn on_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_open = Some(Arc::new(f));
        self
    }

    /// Set callback for when circuit closes
    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_close = Some(Arc::new(f));
        self
    }

    /// Set callback for when circuit enters half-open
    pub fn on_half_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_half_open = Some(Arc::new(f));
        self
    }

    /// Build the circuit breaker
    pub fn build(self) -> CircuitBreaker {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let context = CircuitContext {
            name: self.name,
            config: self.config,
            clock,
            failure_classifier: self.failure_classifier,
        };

        CircuitBreaker::with_context_and_callbacks(context, self.callbacks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_builder_defaults() {
        let circuit = CircuitBuilder::new("test").build();

        assert!(circuit.is_closed());
        assert_eq!(circuit.config(), &Config::default());
    }

    #[test]
    fn test_builder_custom_config() {
        let circuit = CircuitBuilder::new("test")
            .failure_threshold(10)
            .success_threshold(3)
            .reset_timeout_ms(60_000)
            .jitter_factor(4.0)
            .build();

        let config = circuit.config();
        assert_eq!(config.failure_threshold, 10);
        assert_eq!(config.success_threshold, 3);
        assert_eq!(config.reset_timeout_ms, 60_000);
        assert_eq!(config.jitter_factor, 1.0);
    }

    #[test]
    fn test_builder_with_callbacks() {
        let half_opened = Arc::new(AtomicBool::new(false));
        let closed = Arc::new(AtomicBool::new(false));
        let half_opened_clone = half_opened.clone();
        let closed_clone = closed.clone();
        let clock = Arc::new(ManualClock::new(0));

        let mut circuit = CircuitBuilder::new("test")
            .failure_threshold(1)
            .success_threshold(1)
            .reset_timeout_ms(5)
            .clock(clock.clone())
            .on_half_open(move |_name| half_opened_clone.store(true, Ordering::SeqCst))
            .on_close(move |_name| closed_clone.store(true, Ordering::SeqCst))
            .build();

        circuit.record_failure();
        clock.advance(5);
        circuit.can_execute().unwrap();
        assert!(half_opened.load(Ordering::SeqCst));
        assert!(!closed.load(Ordering::SeqCst));

        circuit.record_success();
        assert!(closed.load(Ordering::SeqCst));
    }
}
