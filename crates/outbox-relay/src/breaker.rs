//! Circuit breaker guarding the broker.
//!
//! States:
//! - CLOSED: calls go through; counts reset every `interval`
//! - OPEN: calls fail immediately until `open_timeout` elapses
//! - HALF_OPEN: up to `half_open_max_requests` trial calls are admitted
//!
//! Every transition starts a new generation. Outcomes reported against an
//! older generation are ignored, so a slow call that started before the
//! breaker tripped cannot close it again.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    HalfOpen,
    Open,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CircuitState::Closed => "closed",
            CircuitState::HalfOpen => "half-open",
            CircuitState::Open => "open",
        };
        f.write_str(s)
    }
}

/// Request and outcome counts for the current generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl Counts {
    fn on_request(&mut self) {
        self.requests = self.requests.saturating_add(1);
    }

    fn on_success(&mut self) {
        self.total_successes = self.total_successes.saturating_add(1);
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.total_failures = self.total_failures.saturating_add(1);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
    }

    fn clear(&mut self) {
        *self = Counts::default();
    }
}

/// Callback invoked on every state transition with `(name, from, to)`.
pub type StateObserver = Arc<dyn Fn(&str, CircuitState, CircuitState) + Send + Sync>;

/// Breaker configuration.
#[derive(Debug, Clone)]
pub struct BreakerSettings {
    /// Name used in logs and passed to the observer.
    pub name: String,
    /// The breaker trips once consecutive failures exceed this value.
    pub max_consecutive_failures: u32,
    /// Time spent open before a half-open trial is admitted.
    pub open_timeout: Duration,
    /// Trial calls admitted while half-open. Zero is treated as one.
    pub half_open_max_requests: u32,
    /// Counts are cleared this often while closed. Zero disables clearing.
    pub interval: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            name: "broker".to_string(),
            max_consecutive_failures: 3,
            open_timeout: Duration::from_secs(10),
            half_open_max_requests: 1,
            interval: Duration::from_secs(10),
        }
    }
}

/// Rejection from the breaker. The guarded call was not made.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerError {
    #[error("circuit breaker is open")]
    Open,
    #[error("too many requests while circuit breaker is half-open")]
    TooManyRequests,
}

/// Permission to make one call, tied to the generation that granted it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "report the call outcome with CircuitBreaker::record or release it"]
pub struct Admission {
    generation: u64,
}

struct BreakerInner {
    state: CircuitState,
    generation: u64,
    counts: Counts,
    expiry: Option<Instant>,
}

type Transition = (CircuitState, CircuitState);

/// Thread-safe circuit breaker.
pub struct CircuitBreaker {
    settings: BreakerSettings,
    observer: Option<StateObserver>,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(mut settings: BreakerSettings) -> Self {
        if settings.half_open_max_requests == 0 {
            settings.half_open_max_requests = 1;
        }

        let now = Instant::now();
        let breaker = Self {
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                generation: 0,
                counts: Counts::default(),
                expiry: None,
            }),
            settings,
            observer: None,
        };
        {
            let mut inner = breaker.inner.lock();
            breaker.new_generation(&mut inner, now);
        }
        breaker
    }

    /// Invoke `observer` on every state transition.
    pub fn with_state_observer(mut self, observer: StateObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn settings(&self) -> &BreakerSettings {
        &self.settings
    }

    /// Current state, applying any expiry that has passed.
    pub fn state(&self) -> CircuitState {
        let (state, transitions) = {
            let mut inner = self.inner.lock();
            let mut transitions = Vec::new();
            let (state, _) = self.current_state(&mut inner, Instant::now(), &mut transitions);
            (state, transitions)
        };
        self.notify(&transitions);
        state
    }

    /// Counts for the current generation.
    pub fn counts(&self) -> Counts {
        self.inner.lock().counts
    }

    /// Ask to make a call.
    pub fn allow(&self) -> Result<Admission, BreakerError> {
        let mut transitions = Vec::new();
        let result = {
            let mut inner = self.inner.lock();
            let (state, generation) =
                self.current_state(&mut inner, Instant::now(), &mut transitions);

            match state {
                CircuitState::Open => Err(BreakerError::Open),
                CircuitState::HalfOpen
                    if inner.counts.requests >= self.settings.half_open_max_requests =>
                {
                    Err(BreakerError::TooManyRequests)
                }
                _ => {
                    inner.counts.on_request();
                    Ok(Admission { generation })
                }
            }
        };
        self.notify(&transitions);
        result
    }

    /// Report the outcome of an admitted call.
    pub fn record(&self, admission: Admission, success: bool) {
        let mut transitions = Vec::new();
        {
            let mut inner = self.inner.lock();
            let now = Instant::now();
            let (state, generation) = self.current_state(&mut inner, now, &mut transitions);
            if generation == admission.generation {
                if success {
                    self.on_success(&mut inner, state, now, &mut transitions);
                } else {
                    self.on_failure(&mut inner, state, now, &mut transitions);
                }
            }
        }
        self.notify(&transitions);
    }

    /// Return an admission without reporting an outcome.
    ///
    /// The call no longer counts as a request, so a half-open trial slot is
    /// freed for the next caller.
    pub fn release(&self, admission: Admission) {
        let mut transitions = Vec::new();
        {
            let mut inner = self.inner.lock();
            let (_, generation) = self.current_state(&mut inner, Instant::now(), &mut transitions);
            if generation == admission.generation {
                inner.counts.requests = inner.counts.requests.saturating_sub(1);
            }
        }
        self.notify(&transitions);
    }

    fn current_state(
        &self,
        inner: &mut BreakerInner,
        now: Instant,
        transitions: &mut Vec<Transition>,
    ) -> (CircuitState, u64) {
        let expired = inner.expiry.is_some_and(|expiry| expiry <= now);
        match inner.state {
            CircuitState::Closed if expired => self.new_generation(inner, now),
            CircuitState::Open if expired => {
                self.set_state(inner, CircuitState::HalfOpen, now, transitions)
            }
            _ => {}
        }
        (inner.state, inner.generation)
    }

    fn on_success(
        &self,
        inner: &mut BreakerInner,
        state: CircuitState,
        now: Instant,
        transitions: &mut Vec<Transition>,
    ) {
        match state {
            CircuitState::Closed => inner.counts.on_success(),
            CircuitState::HalfOpen => {
                inner.counts.on_success();
                if inner.counts.consecutive_successes >= self.settings.half_open_max_requests {
                    self.set_state(inner, CircuitState::Closed, now, transitions);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(
        &self,
        inner: &mut BreakerInner,
        state: CircuitState,
        now: Instant,
        transitions: &mut Vec<Transition>,
    ) {
        match state {
            CircuitState::Closed => {
                inner.counts.on_failure();
                if inner.counts.consecutive_failures > self.settings.max_consecutive_failures {
                    self.set_state(inner, CircuitState::Open, now, transitions);
                }
            }
            CircuitState::HalfOpen => {
                self.set_state(inner, CircuitState::Open, now, transitions);
            }
            CircuitState::Open => {}
        }
    }

    fn set_state(
        &self,
        inner: &mut BreakerInner,
        state: CircuitState,
        now: Instant,
        transitions: &mut Vec<Transition>,
    ) {
        if inner.state == state {
            return;
        }
        let previous = inner.state;
        inner.state = state;
        self.new_generation(inner, now);
        transitions.push((previous, state));
    }

    fn new_generation(&self, inner: &mut BreakerInner, now: Instant) {
        inner.generation = inner.generation.wrapping_add(1);
        inner.counts.clear();
        inner.expiry = match inner.state {
            CircuitState::Closed if self.settings.interval.is_zero() => None,
            CircuitState::Closed => Some(now + self.settings.interval),
            CircuitState::Open => Some(now + self.settings.open_timeout),
            CircuitState::HalfOpen => None,
        };
    }

    // Runs outside the lock so observers may query the breaker.
    fn notify(&self, transitions: &[Transition]) {
        for &(from, to) in transitions {
            if to == CircuitState::Open {
                warn!(breaker = %self.settings.name, from = %from, to = %to, "Circuit breaker state changed");
            } else {
                info!(breaker = %self.settings.name, from = %from, to = %to, "Circuit breaker state changed");
            }
            if let Some(observer) = &self.observer {
                observer(&self.settings.name, from, to);
            }
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.settings.name)
            .field("state", &inner.state)
            .field("generation", &inner.generation)
            .field("counts", &inner.counts)
            .finish()
    }
}
