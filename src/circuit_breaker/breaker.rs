use super::clock::{Clock, SystemClock};
use super::observer::SharedObserver;
use super::types::{
    BreakerError, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitBreakerSnapshot,
    CircuitOpenError, CircuitState,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Circuit breaker guarding one named operation
///
/// State lives behind a single read/write lock. Admission checks in the closed
/// state only take the shared lock; the exclusive lock is taken to apply a
/// transition or to reserve a half-open probe, and the state is re-evaluated
/// after it is acquired.
pub struct CircuitBreaker {
    /// Operation identifier
    name: String,
    /// Configuration fixed at creation
    config: CircuitBreakerConfig,
    /// Mutable state machine
    state: RwLock<State>,
    /// Notified in registration order on every transition
    observers: RwLock<Vec<SharedObserver>>,
    clock: Arc<dyn Clock>,
    stats: Stats,
}

#[derive(Debug)]
struct State {
    /// Current circuit state
    circuit_state: CircuitState,
    /// Consecutive failures while closed
    failures: u32,
    /// Consecutive successes while half-open
    successes: u32,
    /// Probe calls admitted or recorded in the current half-open window
    half_open_calls: u32,
    /// Monotonic time of the last transition, drives the open timer
    last_state_change: Instant,
    /// Wall time of the last transition, for reporting
    last_change: DateTime<Utc>,
    /// Bumped on every transition
    epoch: u64,
}

#[derive(Debug, Default)]
struct Stats {
    admitted: AtomicU64,
    rejected: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    opened: AtomicU64,
    half_opened: AtomicU64,
    closed: AtomicU64,
}

enum Admission {
    Admit,
    Reject,
    /// Open timer elapsed, a transition to half-open is due
    Probe,
}

impl CircuitBreaker {
    /// Create a circuit breaker on the system clock with no observers
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::builder(name).config(config).build()
    }

    pub fn builder(name: impl Into<String>) -> CircuitBreakerBuilder {
        CircuitBreakerBuilder {
            name: name.into(),
            config: CircuitBreakerConfig::default(),
            clock: None,
            observers: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get current state
    pub fn state(&self) -> CircuitState {
        self.state.read().circuit_state
    }

    /// Append an observer; existing observers keep their position
    pub fn add_observer(&self, observer: SharedObserver) {
        self.observers.write().push(observer);
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    /// Check whether a call may proceed
    ///
    /// An open circuit whose reset timeout has elapsed moves to half-open as a
    /// side effect and admits. Half-open admission is not reserved here: two
    /// callers can both pass before either records. Use [`try_acquire`] when the
    /// probe cap has to hold under concurrency.
    ///
    /// [`try_acquire`]: CircuitBreaker::try_acquire
    pub fn admit(&self) -> bool {
        let now = self.clock.now();
        let decision = self.evaluate(&self.state.read(), now);

        let admitted = match decision {
            Admission::Admit => true,
            Admission::Reject => false,
            Admission::Probe => {
                let mut state = self.state.write();
                match self.evaluate(&state, now) {
                    Admission::Probe => {
                        self.transition(&mut state, CircuitState::HalfOpen, now);
                        true
                    }
                    Admission::Admit => true,
                    Admission::Reject => false,
                }
            }
        };

        self.count_admission(admitted);
        admitted
    }

    /// Admit a call and reserve its half-open probe slot in one step
    ///
    /// The returned permit must be resolved with [`CircuitPermit::record`];
    /// dropping it unresolved records a failure. The outcome is discarded if the
    /// circuit has changed state since the permit was issued.
    pub fn try_acquire(&self) -> Result<CircuitPermit<'_>, CircuitOpenError> {
        let now = self.clock.now();

        {
            let state = self.state.read();
            let closed = state.circuit_state == CircuitState::Closed;
            match self.evaluate(&state, now) {
                Admission::Admit if closed => {
                    let epoch = state.epoch;
                    drop(state);
                    self.count_admission(true);
                    return Ok(CircuitPermit::new(self, epoch, false));
                }
                Admission::Reject => {
                    drop(state);
                    self.count_admission(false);
                    return Err(self.open_error());
                }
                _ => {}
            }
        }

        let mut state = self.state.write();
        let reservation = match self.evaluate(&state, now) {
            Admission::Reject => None,
            Admission::Admit if state.circuit_state == CircuitState::Closed => {
                Some((state.epoch, false))
            }
            Admission::Admit => {
                state.half_open_calls += 1;
                Some((state.epoch, true))
            }
            Admission::Probe => {
                self.transition(&mut state, CircuitState::HalfOpen, now);
                state.half_open_calls += 1;
                Some((state.epoch, true))
            }
        };
        drop(state);

        match reservation {
            Some((epoch, probe)) => {
                self.count_admission(true);
                Ok(CircuitPermit::new(self, epoch, probe))
            }
            None => {
                self.count_admission(false);
                Err(self.open_error())
            }
        }
    }

    /// Record the outcome of a call admitted through [`admit`](CircuitBreaker::admit)
    pub fn record(&self, success: bool) {
        self.apply_outcome(success, None);
    }

    pub fn record_success(&self) {
        self.record(true);
    }

    pub fn record_failure(&self) {
        self.record(false);
    }

    /// Run `work` if admitted and record its outcome
    ///
    /// The work's own error is returned unchanged inside [`BreakerError::Inner`].
    /// If the future is dropped mid-flight the call is recorded as a failure.
    pub async fn execute<F, Fut, T, E>(&self, work: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.try_acquire().map_err(BreakerError::Open)?;
        let result = work().await;
        permit.record(result.is_ok());
        result.map_err(BreakerError::Inner)
    }

    /// Blocking counterpart of [`execute`](CircuitBreaker::execute)
    pub fn call<F, T, E>(&self, work: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let permit = self.try_acquire().map_err(BreakerError::Open)?;
        let result = work();
        permit.record(result.is_ok());
        result.map_err(BreakerError::Inner)
    }

    /// Force the circuit closed with zeroed counters, keeping configuration and observers
    pub fn reset(&self) {
        let now = self.clock.now();
        let mut state = self.state.write();
        if state.circuit_state == CircuitState::Closed {
            state.failures = 0;
            state.successes = 0;
            state.half_open_calls = 0;
        } else {
            self.transition(&mut state, CircuitState::Closed, now);
        }
    }

    /// Get metrics
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        CircuitBreakerMetrics {
            admitted_calls: load(&self.stats.admitted),
            rejected_calls: load(&self.stats.rejected),
            successful_calls: load(&self.stats.successes),
            failed_calls: load(&self.stats.failures),
            circuit_opened_count: load(&self.stats.opened),
            circuit_half_opened_count: load(&self.stats.half_opened),
            circuit_closed_count: load(&self.stats.closed),
        }
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let state = self.state.read();
        CircuitBreakerSnapshot {
            name: self.name.clone(),
            state: state.circuit_state,
            failures: state.failures,
            successes: state.successes,
            half_open_calls: state.half_open_calls,
            last_change: state.last_change,
            config: self.config.clone(),
            metrics: self.metrics(),
        }
    }

    fn evaluate(&self, state: &State, now: Instant) -> Admission {
        match state.circuit_state {
            CircuitState::Closed => Admission::Admit,
            CircuitState::Open => {
                let elapsed = now.saturating_duration_since(state.last_state_change);
                if elapsed > self.config.reset_timeout() {
                    Admission::Probe
                } else {
                    Admission::Reject
                }
            }
            CircuitState::HalfOpen => {
                if state.half_open_calls < self.config.half_open_max_calls {
                    Admission::Admit
                } else {
                    Admission::Reject
                }
            }
        }
    }

    /// `permit_epoch` is the epoch a permit was admitted in; `None` for bare `record`
    ///
    /// A permit outcome from an earlier epoch is dropped: the call was admitted
    /// under a state that no longer exists.
    fn apply_outcome(&self, success: bool, permit_epoch: Option<u64>) {
        let counter = if success {
            &self.stats.successes
        } else {
            &self.stats.failures
        };
        counter.fetch_add(1, Ordering::Relaxed);

        // Common case: success on a healthy closed circuit changes nothing.
        if success {
            let state = self.state.read();
            if state.circuit_state == CircuitState::Closed && state.failures == 0 {
                return;
            }
        }

        let now = self.clock.now();
        let mut state = self.state.write();

        if let Some(epoch) = permit_epoch {
            if epoch != state.epoch {
                debug!(
                    breaker = %self.name,
                    success,
                    permit_epoch = epoch,
                    current_epoch = state.epoch,
                    "Ignoring outcome of a permit from an earlier state"
                );
                return;
            }
        }

        match state.circuit_state {
            CircuitState::Closed => {
                if success {
                    state.failures = 0;
                } else {
                    state.failures += 1;
                    debug!(
                        breaker = %self.name,
                        failures = state.failures,
                        threshold = self.config.failure_threshold,
                        "Call failed in closed state"
                    );
                    if state.failures >= self.config.failure_threshold {
                        self.transition(&mut state, CircuitState::Open, now);
                    }
                }
            }
            CircuitState::HalfOpen => {
                // Permits reserved their slot at admission
                if permit_epoch.is_none() {
                    state.half_open_calls += 1;
                }

                if success {
                    state.successes += 1;
                    debug!(
                        breaker = %self.name,
                        successes = state.successes,
                        required = self.config.half_open_max_calls,
                        "Half-open probe succeeded"
                    );
                    if state.successes >= self.config.half_open_max_calls {
                        self.transition(&mut state, CircuitState::Closed, now);
                    }
                } else {
                    // Any failure in half-open state reopens the circuit
                    self.transition(&mut state, CircuitState::Open, now);
                }
            }
            CircuitState::Open => {
                debug!(breaker = %self.name, success, "Ignoring outcome recorded while open");
            }
        }
    }

    /// Apply a transition and notify observers while still holding the lock
    fn transition(&self, state: &mut State, to: CircuitState, now: Instant) {
        let from = state.circuit_state;

        state.circuit_state = to;
        state.failures = 0;
        state.successes = 0;
        state.half_open_calls = 0;
        state.last_state_change = now;
        state.last_change = self.clock.wall_time();
        state.epoch += 1;

        let counter = match to {
            CircuitState::Open => &self.stats.opened,
            CircuitState::HalfOpen => &self.stats.half_opened,
            CircuitState::Closed => &self.stats.closed,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        debug!(breaker = %self.name, from = %from, to = %to, "Circuit breaker transition");

        for observer in self.observers.read().iter() {
            observer.on_state_change(&self.name, from, to);
        }
    }

    fn count_admission(&self, admitted: bool) {
        let counter = if admitted {
            &self.stats.admitted
        } else {
            &self.stats.rejected
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn open_error(&self) -> CircuitOpenError {
        CircuitOpenError {
            name: self.name.clone(),
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &*self.state.read())
            .field("observers", &self.observer_count())
            .field("clock", &self.clock)
            .finish()
    }
}

/// Builder for [`CircuitBreaker`]
pub struct CircuitBreakerBuilder {
    name: String,
    config: CircuitBreakerConfig,
    clock: Option<Arc<dyn Clock>>,
    observers: Vec<SharedObserver>,
}

impl CircuitBreakerBuilder {
    pub fn config(mut self, config: CircuitBreakerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn observer(mut self, observer: SharedObserver) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn observers(mut self, observers: impl IntoIterator<Item = SharedObserver>) -> Self {
        self.observers.extend(observers);
        self
    }

    pub fn build(self) -> CircuitBreaker {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let config = sanitize(&self.name, self.config);

        debug!(
            breaker = %self.name,
            failure_threshold = config.failure_threshold,
            reset_timeout_ms = config.reset_timeout_ms,
            half_open_max_calls = config.half_open_max_calls,
            "Creating circuit breaker"
        );

        CircuitBreaker {
            state: RwLock::new(State {
                circuit_state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                half_open_calls: 0,
                last_state_change: clock.now(),
                last_change: clock.wall_time(),
                epoch: 0,
            }),
            name: self.name,
            config,
            observers: RwLock::new(self.observers),
            clock,
            stats: Stats::default(),
        }
    }
}

/// Zero values would wedge the state machine; replace them with defaults
fn sanitize(name: &str, mut config: CircuitBreakerConfig) -> CircuitBreakerConfig {
    if let Some(problem) = config.invalid_field() {
        warn!(breaker = %name, problem, "Invalid circuit breaker config, using defaults for zero fields");
        let defaults = CircuitBreakerConfig::default();
        if config.failure_threshold == 0 {
            config.failure_threshold = defaults.failure_threshold;
        }
        if config.reset_timeout_ms == 0 {
            config.reset_timeout_ms = defaults.reset_timeout_ms;
        }
        if config.half_open_max_calls == 0 {
            config.half_open_max_calls = defaults.half_open_max_calls;
        }
    }
    config
}

/// Admission ticket returned by [`CircuitBreaker::try_acquire`]
#[must_use = "an unrecorded permit counts as a failure when dropped"]
pub struct CircuitPermit<'a> {
    breaker: &'a CircuitBreaker,
    /// Epoch the permit was admitted in; outcomes from a later epoch are ignored
    epoch: u64,
    /// Holds a half-open probe slot
    probe: bool,
    recorded: bool,
}

impl<'a> CircuitPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, epoch: u64, probe: bool) -> Self {
        Self {
            breaker,
            epoch,
            probe,
            recorded: false,
        }
    }

    /// Whether this permit holds a half-open probe slot
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn record(mut self, success: bool) {
        self.recorded = true;
        self.breaker.apply_outcome(success, Some(self.epoch));
    }

    pub fn record_success(self) {
        self.record(true);
    }

    pub fn record_failure(self) {
        self.record(false);
    }
}

impl Drop for CircuitPermit<'_> {
    fn drop(&mut self) {
        if !self.recorded {
            debug!(breaker = %self.breaker.name, "Permit dropped without an outcome, recording failure");
            self.breaker.apply_outcome(false, Some(self.epoch));
        }
    }
}
