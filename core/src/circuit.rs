//! Circuit breaker engine
//!
//! Status transitions run through a `state_machines` dynamic machine; the
//! breaker keeps the counters and open timestamp beside it and hands out
//! [`BreakerState`] snapshots. [`CircuitBreaker::can_execute`] is the gate;
//! the `record_*` methods are bookkeeping and never fail.

use crate::{
    callbacks::Callbacks,
    classifier::{FailureClassifier, FailureContext},
    clock::{Clock, SystemClock},
    errors::{CircuitError, CircuitOpenError, ConfigError, Operation},
    state::{BreakerState, BreakerStatus},
};
use serde::{Deserialize, Serialize};
use state_machines::state_machine;
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Circuit breaker configuration
///
/// The engine does not validate these values; call [`Config::validate`] when
/// they come from an untrusted source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Failures recorded while closed before the circuit opens
    pub failure_threshold: u32,

    /// Failures recorded while half-open before the circuit reopens
    pub half_open_failure_threshold: u32,

    /// Successes recorded while half-open before the circuit closes
    pub success_threshold: u32,

    /// Minimum time in milliseconds the circuit stays open before a trial call
    pub reset_timeout_ms: u64,

    /// Extra random dwell in Open, as a fraction of `reset_timeout_ms`
    /// (0.0 = none, 1.0 = up to double). Never shortens the dwell.
    pub jitter_factor: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            half_open_failure_threshold: 1,
            success_threshold: 2,
            reset_timeout_ms: 30_000,
            jitter_factor: 0.0,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 || self.half_open_failure_threshold == 0 {
            return Err(ConfigError::ZeroFailureThreshold);
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::ZeroSuccessThreshold);
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::JitterOutOfRange(self.jitter_factor));
        }
        Ok(())
    }
}

/// Context provided to fallback closures when circuit is open
#[derive(Debug, Clone)]
pub struct FallbackContext {
    pub circuit_name: String,
    /// Epoch milliseconds of the transition to open
    pub opened_at: u64,
    /// Milliseconds until the gate will admit a trial call
    pub retry_after_ms: u64,
}

impl From<&CircuitOpenError> for FallbackContext {
    fn from(err: &CircuitOpenError) -> Self {
        Self {
            circuit_name: err.circuit.clone(),
            opened_at: err.opened_at,
            retry_after_ms: err.retry_after_ms,
        }
    }
}

/// Type alias for fallback function
pub type FallbackFn<T, E> = Box<dyn FnOnce(&FallbackContext) -> Result<T, E> + Send>;

/// Options for circuit breaker calls
pub struct CallOptions<T, E> {
    pub fallback: Option<FallbackFn<T, E>>,
}

impl<T, E> Default for CallOptions<T, E> {
    fn default() -> Self {
        Self { fallback: None }
    }
}

impl<T, E> CallOptions<T, E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` instead of failing when the circuit is open
    pub fn with_fallback<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&FallbackContext) -> Result<T, E> + Send + 'static,
    {
        self.fallback = Some(Box::new(f));
        self
    }
}

/// Type alias for callable function
pub type CallableFn<T, E> = Box<dyn FnOnce() -> Result<T, E>>;

/// Conversion into a callable plus options, so `call()` takes either form
pub trait IntoCallOptions<T, E> {
    fn into_call_options(self) -> (CallableFn<T, E>, CallOptions<T, E>);
}

impl<T, E, F> IntoCallOptions<T, E> for F
where
    F: FnOnce() -> Result<T, E> + 'static,
{
    fn into_call_options(self) -> (CallableFn<T, E>, CallOptions<T, E>) {
        (Box::new(self), CallOptions::default())
    }
}

impl<T, E, F> IntoCallOptions<T, E> for (F, CallOptions<T, E>)
where
    F: FnOnce() -> Result<T, E> + 'static,
{
    fn into_call_options(self) -> (CallableFn<T, E>, CallOptions<T, E>) {
        (Box::new(self.0), self.1)
    }
}

/// Everything the engine needs besides its state and hooks
#[derive(Clone)]
pub struct CircuitContext {
    pub name: String,
    pub config: Config,
    pub clock: Arc<dyn Clock>,
    pub failure_classifier: Option<Arc<dyn FailureClassifier>>,
}

impl Default for CircuitContext {
    fn default() -> Self {
        Self {
            name: String::new(),
            config: Config::default(),
            clock: Arc::new(SystemClock),
            failure_classifier: None,
        }
    }
}

impl std::fmt::Debug for CircuitContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitContext")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("clock", &self.clock)
            .field(
                "failure_classifier",
                &self
                    .failure_classifier
                    .as_ref()
                    .map(|_| "<dyn FailureClassifier>"),
            )
            .finish()
    }
}

// Status transitions only. Counters and the open timestamp live on the
// breaker, since thresholds are decided before an event is fired.
state_machine! {
    name: Circuit,
    context: CircuitContext,
    dynamic: true,

    initial: Closed,
    states: [Closed, Open, HalfOpen],
    events {
        trip {
            transition: { from: [Closed, HalfOpen], to: Open }
        }
        attempt_reset {
            transition: { from: Open, to: HalfOpen }
        }
        close {
            transition: { from: HalfOpen, to: Closed }
        }
    }
}

/// Circuit breaker public API
///
/// Single-owner: every operation takes `&mut self` and runs to completion.
/// Share it behind a lock (see [`protect`](crate::protect)) when needed.
pub struct CircuitBreaker {
    machine: DynamicCircuit,
    context: CircuitContext,
    callbacks: Callbacks,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<u64>,
    /// Dwell in Open, sampled once each time the circuit opens
    dwell_ms: u64,
}

impl CircuitBreaker {
    /// Create a new circuit breaker (use builder() for more options)
    pub fn new(name: impl Into<String>, config: Config) -> Self {
        let context = CircuitContext {
            name: name.into(),
            config,
            ..CircuitContext::default()
        };
        Self::with_context_and_callbacks(context, Callbacks::new())
    }

    pub(crate) fn with_context_and_callbacks(context: CircuitContext, callbacks: Callbacks) -> Self {
        let machine = DynamicCircuit::new(context.clone());

        Self {
            machine,
            context,
            callbacks,
            failure_count: 0,
            success_count: 0,
            opened_at: None,
            dwell_ms: 0,
        }
    }

    pub fn builder(name: impl Into<String>) -> crate::builder::CircuitBuilder {
        crate::builder::CircuitBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.context.name
    }

    pub fn config(&self) -> &Config {
        &self.context.config
    }

    pub(crate) fn callbacks(&self) -> &Callbacks {
        &self.callbacks
    }

    /// Gate: may the protected operation run now?
    ///
    /// An open circuit whose reset timeout has elapsed moves to half-open and
    /// admits the caller as a trial call.
    pub fn can_execute(&mut self) -> Result<(), CircuitOpenError> {
        if self.status() != BreakerStatus::Open {
            return Ok(());
        }

        // A corrupt open state without a timestamp is retried immediately
        let opened_at = self.opened_at.unwrap_or(0);
        let elapsed = self.context.clock.now_millis().saturating_sub(opened_at);

        if elapsed >= self.dwell_ms {
            self.fire(CircuitEvent::AttemptReset, BreakerState::half_open());
            return Ok(());
        }

        let err = CircuitOpenError {
            circuit: self.context.name.clone(),
            opened_at,
            retry_after_ms: self.dwell_ms - elapsed,
        };
        debug!(
            circuit = %self.context.name,
            retry_after_ms = err.retry_after_ms,
            "Rejected call, circuit open"
        );
        self.callbacks
            .trigger_error(&self.context.name, Operation::CanExecute, &err);
        Err(err)
    }

    /// Record a successful operation
    pub fn record_success(&mut self) {
        match self.status() {
            BreakerStatus::Closed => {}
            BreakerStatus::Open => {
                debug!(circuit = %self.context.name, "Discarding success reported while open");
            }
            BreakerStatus::HalfOpen => {
                let successes = self.success_count.saturating_add(1);
                if successes >= self.context.config.success_threshold {
                    self.fire(CircuitEvent::Close, BreakerState::closed());
                } else {
                    self.success_count = successes;
                }
            }
        }
    }

    /// Record a failed operation
    pub fn record_failure(&mut self) {
        let threshold = match self.status() {
            BreakerStatus::Open => return,
            BreakerStatus::Closed => self.context.config.failure_threshold,
            BreakerStatus::HalfOpen => self.context.config.half_open_failure_threshold,
        };

        let failures = self.failure_count.saturating_add(1);
        if failures >= threshold {
            let now = self.context.clock.now_millis();
            self.fire(CircuitEvent::Trip, BreakerState::open(now));
        } else {
            self.failure_count = failures;
        }
    }

    /// Snapshot of the current state
    pub fn state(&self) -> BreakerState {
        BreakerState {
            status: self.status(),
            failure_count: self.failure_count,
            success_count: self.success_count,
            opened_at: self.opened_at,
        }
    }

    pub fn status(&self) -> BreakerStatus {
        match self.machine.current_state() {
            "Open" => BreakerStatus::Open,
            "HalfOpen" => BreakerStatus::HalfOpen,
            _ => BreakerStatus::Closed,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status() == BreakerStatus::Open
    }

    pub fn is_closed(&self) -> bool {
        self.status() == BreakerStatus::Closed
    }

    pub fn is_half_open(&self) -> bool {
        self.status() == BreakerStatus::HalfOpen
    }

    /// Reset circuit to the initial Closed state
    pub fn reset(&mut self) {
        self.restore(BreakerState::closed());
    }

    /// Adopt a state obtained elsewhere, e.g. loaded from storage
    ///
    /// A different status rebuilds the machine by replaying its events from
    /// the initial state.
    pub fn restore(&mut self, state: BreakerState) {
        let previous = self.state();
        if state.status == previous.status {
            self.apply(&previous, state);
            return;
        }

        self.machine = self.replay(state.status);
        self.apply(&previous, state);
        self.announce(&previous, &state);
    }

    /// Execute a fallible operation with circuit breaker protection
    ///
    /// Accepts either:
    /// - A plain closure: `circuit.call(|| api_request())`
    /// - A closure with options: `circuit.call((|| api_request(), CallOptions::new().with_fallback(...)))`
    pub fn call<I, T, E: 'static>(&mut self, input: I) -> Result<T, CircuitError<E>>
    where
        I: IntoCallOptions<T, E>,
    {
        let (f, options) = input.into_call_options();

        if let Err(open) = self.can_execute() {
            if let Some(fallback) = options.fallback {
                return fallback(&FallbackContext::from(&open)).map_err(CircuitError::Execution);
            }
            return Err(CircuitError::Open(open));
        }

        let admitted = self.status();
        let started = Instant::now();
        let result = f();
        self.record_outcome(&result, admitted, started.elapsed());
        result.map_err(CircuitError::Execution)
    }

    /// Async counterpart of [`call`](Self::call)
    pub async fn call_async<F, Fut, T, E>(&mut self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: 'static,
    {
        self.can_execute()?;

        let admitted = self.status();
        let started = Instant::now();
        let result = f().await;
        self.record_outcome(&result, admitted, started.elapsed());
        result.map_err(CircuitError::Execution)
    }

    /// Record the result of an admitted call, consulting the classifier on errors
    pub(crate) fn record_outcome<T, E: 'static>(
        &mut self,
        result: &Result<T, E>,
        admitted: BreakerStatus,
        elapsed: Duration,
    ) {
        let error = match result {
            Ok(_) => {
                self.record_success();
                return;
            }
            Err(e) => e,
        };

        let should_trip = match &self.context.failure_classifier {
            Some(classifier) => classifier.should_trip(&FailureContext {
                circuit_name: &self.context.name,
                error: error as &dyn Any,
                elapsed,
                status: admitted,
            }),
            None => true,
        };

        if should_trip {
            self.record_failure();
        } else {
            debug!(circuit = %self.context.name, "Error ignored by failure classifier");
        }
    }

    /// Extra dwell is drawn from chrono-machines' jitter and never shortens the
    /// reset timeout
    fn sample_dwell_ms(&self) -> u64 {
        let base = self.context.config.reset_timeout_ms;
        let jitter = self.context.config.jitter_factor;
        if jitter <= 0.0 {
            return base;
        }

        let policy = chrono_machines::Policy {
            max_attempts: 1,
            base_delay_ms: base,
            multiplier: 1.0,
            max_delay_ms: base,
        };
        // chrono-machines jitters downward; mirror it so the dwell only grows
        let jitter = jitter.min(1.0);
        let max_extra = (base as f64 * jitter) as u64;
        let jittered = policy.calculate_delay(1, jitter);
        base.saturating_add(base.saturating_sub(jittered).min(max_extra))
    }

    /// Drive the machine with `event` and commit `next` if it is accepted
    fn fire(&mut self, event: CircuitEvent, next: BreakerState) {
        let previous = self.state();
        if let Err(err) = self.machine.handle(event) {
            debug!(circuit = %self.context.name, error = ?err, "Transition rejected");
            return;
        }

        self.apply(&previous, next);
        self.announce(&previous, &next);
    }

    /// Fresh machine driven to `status` through its own events
    fn replay(&self, status: BreakerStatus) -> DynamicCircuit {
        let mut machine = DynamicCircuit::new(self.context.clone());
        let replayed = match status {
            BreakerStatus::Closed => Ok(()),
            BreakerStatus::Open => machine.handle(CircuitEvent::Trip),
            BreakerStatus::HalfOpen => machine
                .handle(CircuitEvent::Trip)
                .and_then(|()| machine.handle(CircuitEvent::AttemptReset)),
        };
        if let Err(err) = replayed {
            warn!(circuit = %self.context.name, error = ?err, "Could not replay restored status");
        }
        machine
    }

    fn apply(&mut self, previous: &BreakerState, next: BreakerState) {
        let reopened = next.status == BreakerStatus::Open
            && (previous.status != BreakerStatus::Open || previous.opened_at != next.opened_at);
        if reopened {
            self.dwell_ms = self.sample_dwell_ms();
        }

        self.failure_count = next.failure_count;
        self.success_count = next.success_count;
        self.opened_at = next.opened_at;
    }

    fn announce(&self, previous: &BreakerState, next: &BreakerState) {
        match next.status {
            BreakerStatus::Open => warn!(
                circuit = %self.context.name,
                from = %previous.status,
                dwell_ms = self.dwell_ms,
                "Circuit opened"
            ),
            BreakerStatus::HalfOpen => {
                info!(circuit = %self.context.name, "Circuit half-open, admitting trial calls")
            }
            BreakerStatus::Closed => info!(
                circuit = %self.context.name,
                from = %previous.status,
                "Circuit closed"
            ),
        }

        self.callbacks
            .trigger_transition(&self.context.name, previous, next);
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("context", &self.context)
            .field("state", &self.state())
            .field("dwell_ms", &self.dwell_ms)
            .field("callbacks", &self.callbacks)
            .finish()
    }
}
