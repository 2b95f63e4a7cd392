//! Three-state circuit breaker: Closed → Open → Half-Open.
//!
//! State transitions:
//! - `Closed` → `Open`:      consecutive handleable failures reach `failure_threshold`
//! - `Open` → `Half-Open`:   `break_duration` has elapsed (checked lazily on the next call)
//! - `Half-Open` → `Closed`: the single trial call succeeds
//! - `Half-Open` → `Open`:   the trial call fails
//!
//! All state lives behind one mutex shared by every clone of a
//! [`CircuitBreaker`]. Admission hands out a [`Permit`] stamped with the
//! breaker's generation; the generation moves on every transition, so an
//! outcome reported against an older generation is discarded.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::AsyncOp;
use crate::error::{BrokenCircuit, ConfigError, Fault};
use crate::outcome::{Classifier, Outcome};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// All calls rejected until `break_duration` has elapsed.
    Open,
    /// One trial call allowed to test the dependency.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Configuration for the circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive handleable failures before opening.
    pub failure_threshold: u32,
    /// How long to stay open before admitting a trial call.
    pub break_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            break_duration: Duration::from_secs(30),
        }
    }
}

/// Point-in-time view of a breaker, for monitoring and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    /// Number of state transitions so far.
    pub generation: u64,
}

/// Passed to the `on_break` hook each time the circuit opens.
#[derive(Debug, Clone, Copy)]
pub struct BreakEvent {
    /// State the breaker left (`Closed` or `HalfOpen`).
    pub from: CircuitState,
    pub consecutive_failures: u32,
    pub break_duration: Duration,
}

/// How an admitted call ended, from the breaker's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Not handleable and not an error.
    Success,
    /// Handleable by the breaker's classifier.
    Failure,
    /// A failure the breaker does not handle. Counters stay untouched.
    Ignored,
}

impl Verdict {
    /// Derive the verdict for `outcome` under `classifier`.
    pub fn of<T, E>(classifier: &Classifier<T, E>, outcome: &Outcome<T, E>) -> Self {
        if classifier.classify(outcome).is_handleable() {
            Self::Failure
        } else if outcome.is_ok() {
            Self::Success
        } else {
            Self::Ignored
        }
    }
}

struct CircuitInner {
    state: CircuitState,
    consecutive_failures: u32,
    open_until: Option<Instant>,
    generation: u64,
    trial_in_flight: bool,
}

enum Transition {
    Opened(BreakEvent),
    HalfOpened,
    Closed,
}

type BreakHook = Arc<dyn Fn(&BreakEvent) + Send + Sync>;
type StateHook = Arc<dyn Fn() + Send + Sync>;

/// Thread-safe circuit breaker. Clones share state.
#[derive(Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<CircuitInner>>,
    on_break: Option<BreakHook>,
    on_half_open: Option<StateHook>,
    on_reset: Option<StateHook>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker in `Closed` state.
    pub fn new(config: CircuitBreakerConfig) -> Result<Self, ConfigError> {
        if config.failure_threshold == 0 {
            return Err(ConfigError::ZeroThreshold);
        }
        Ok(Self {
            config,
            inner: Arc::new(Mutex::new(CircuitInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                open_until: None,
                generation: 0,
                trial_in_flight: false,
            })),
            on_break: None,
            on_half_open: None,
            on_reset: None,
        })
    }

    /// Called every time the circuit opens.
    pub fn on_break<F>(mut self, f: F) -> Self
    where
        F: Fn(&BreakEvent) + Send + Sync + 'static,
    {
        self.on_break = Some(Arc::new(f));
        self
    }

    /// Called when the cooldown has elapsed and a trial is about to run.
    pub fn on_half_open<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_half_open = Some(Arc::new(f));
        self
    }

    /// Called when the circuit closes again.
    pub fn on_reset<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_reset = Some(Arc::new(f));
        self
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, CircuitInner> {
        // Hooks run outside the lock, so a poisoned guard still holds
        // consistent state.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the current state, transitioning Open→HalfOpen if the wait has elapsed.
    pub fn state(&self) -> CircuitState {
        self.snapshot().state
    }

    /// Current state plus counters.
    pub fn snapshot(&self) -> CircuitSnapshot {
        let mut inner = self.lock();
        let transition = self.refresh(&mut inner, Instant::now());
        let snapshot = CircuitSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            generation: inner.generation,
        };
        drop(inner);
        self.notify(transition);
        snapshot
    }

    /// Returns `true` if the next call would be admitted.
    pub fn is_allowed(&self) -> bool {
        let mut inner = self.lock();
        let transition = self.refresh(&mut inner, Instant::now());
        let allowed = match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => !inner.trial_in_flight,
            CircuitState::Open => false,
        };
        drop(inner);
        self.notify(transition);
        allowed
    }

    /// Ask to run one call. Rejected calls never reach the operation.
    pub fn acquire(&self) -> Result<Permit<'_>, BrokenCircuit> {
        let now = Instant::now();
        let mut inner = self.lock();
        let transition = self.refresh(&mut inner, now);

        let admitted = match inner.state {
            CircuitState::Closed => Ok(false),
            CircuitState::HalfOpen if !inner.trial_in_flight => {
                inner.trial_in_flight = true;
                Ok(true)
            }
            CircuitState::HalfOpen => Err(BrokenCircuit {
                remaining: Duration::ZERO,
            }),
            CircuitState::Open => Err(BrokenCircuit {
                remaining: inner
                    .open_until
                    .map(|until| until.saturating_duration_since(now))
                    .unwrap_or(self.config.break_duration),
            }),
        };
        let generation = inner.generation;
        drop(inner);
        self.notify(transition);

        match admitted {
            Ok(trial) => Ok(Permit {
                breaker: self,
                generation,
                trial,
                settled: false,
            }),
            Err(rejection) => {
                let remaining_ms = rejection.remaining.as_millis() as u64;
                debug!(remaining_ms, "Circuit breaker rejected call");
                Err(rejection)
            }
        }
    }

    /// Force the circuit closed and clear the failure count.
    pub fn reset(&self) {
        let mut inner = self.lock();
        let transition = if inner.state == CircuitState::Closed {
            inner.consecutive_failures = 0;
            None
        } else {
            Some(self.close(&mut inner))
        };
        drop(inner);
        self.notify(transition);
    }

    fn refresh(&self, inner: &mut CircuitInner, now: Instant) -> Option<Transition> {
        if inner.state != CircuitState::Open {
            return None;
        }
        match inner.open_until {
            Some(until) if now >= until => {
                inner.state = CircuitState::HalfOpen;
                inner.trial_in_flight = false;
                inner.generation += 1;
                info!("Circuit breaker → half-open");
                Some(Transition::HalfOpened)
            }
            _ => None,
        }
    }

    fn open(&self, inner: &mut CircuitInner, now: Instant) -> Transition {
        let from = inner.state;
        inner.state = CircuitState::Open;
        inner.open_until = Some(now + self.config.break_duration);
        inner.trial_in_flight = false;
        inner.generation += 1;
        warn!(
            failures = inner.consecutive_failures,
            from = %from,
            "Circuit breaker → open"
        );
        Transition::Opened(BreakEvent {
            from,
            consecutive_failures: inner.consecutive_failures,
            break_duration: self.config.break_duration,
        })
    }

    fn close(&self, inner: &mut CircuitInner) -> Transition {
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.open_until = None;
        inner.trial_in_flight = false;
        inner.generation += 1;
        info!("Circuit breaker → closed");
        Transition::Closed
    }

    fn settle(&self, generation: u64, trial: bool, verdict: Verdict) {
        let mut inner = self.lock();
        if inner.generation != generation {
            // Admitted before the last transition; that decision is already made.
            return;
        }
        let transition = match (inner.state, verdict) {
            (CircuitState::Closed, Verdict::Success) => {
                inner.consecutive_failures = 0;
                None
            }
            (CircuitState::Closed, Verdict::Failure) => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    Some(self.open(&mut inner, Instant::now()))
                } else {
                    None
                }
            }
            (CircuitState::HalfOpen, Verdict::Success) if trial => Some(self.close(&mut inner)),
            (CircuitState::HalfOpen, Verdict::Failure) if trial => {
                warn!("Circuit breaker trial failed");
                Some(self.open(&mut inner, Instant::now()))
            }
            (CircuitState::HalfOpen, Verdict::Ignored) if trial => {
                inner.trial_in_flight = false;
                None
            }
            _ => None,
        };
        drop(inner);
        self.notify(transition);
    }

    fn release(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.generation == generation && inner.state == CircuitState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }

    fn notify(&self, transition: Option<Transition>) {
        match transition {
            Some(Transition::Opened(event)) => {
                if let Some(hook) = &self.on_break {
                    hook(&event);
                }
            }
            Some(Transition::HalfOpened) => {
                if let Some(hook) = &self.on_half_open {
                    hook();
                }
            }
            Some(Transition::Closed) => {
                if let Some(hook) = &self.on_reset {
                    hook();
                }
            }
            None => {}
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("CircuitBreaker")
            .field("state", &inner.state)
            .field("consecutive_failures", &inner.consecutive_failures)
            .field("config", &self.config)
            .finish()
    }
}

/// Admission ticket for one call. Report how the call ended with
/// [`Permit::record`]; dropping it unreported frees a half-open trial slot.
#[must_use = "an unrecorded permit does not count towards the breaker"]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    trial: bool,
    settled: bool,
}

impl Permit<'_> {
    /// Returns `true` if this call is the half-open trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn record(mut self, verdict: Verdict) {
        self.settled = true;
        self.breaker.settle(self.generation, self.trial, verdict);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.release(self.generation);
        }
    }
}

/// A [`CircuitBreaker`] plus the classifier that feeds it.
pub struct CircuitBreakerPolicy<T, E> {
    breaker: CircuitBreaker,
    classifier: Classifier<T, E>,
}

impl<T, E> CircuitBreakerPolicy<T, E> {
    pub fn new(
        classifier: Classifier<T, E>,
        config: CircuitBreakerConfig,
    ) -> Result<Self, ConfigError> {
        Ok(Self::with_breaker(classifier, CircuitBreaker::new(config)?))
    }

    /// Build around an existing breaker, sharing its state.
    pub fn with_breaker(classifier: Classifier<T, E>, breaker: CircuitBreaker) -> Self {
        Self { breaker, classifier }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn classifier(&self) -> &Classifier<T, E> {
        &self.classifier
    }

    pub(crate) fn run(&self, op: &mut dyn FnMut() -> Outcome<T, E>) -> Outcome<T, E> {
        let permit = match self.breaker.acquire() {
            Ok(permit) => permit,
            Err(rejection) => return Err(Fault::CircuitOpen(rejection)),
        };
        let outcome = op();
        permit.record(Verdict::of(&self.classifier, &outcome));
        outcome
    }

    pub(crate) async fn run_async(&self, op: &AsyncOp<'_, T, E>) -> Outcome<T, E> {
        let permit = match self.breaker.acquire() {
            Ok(permit) => permit,
            Err(rejection) => return Err(Fault::CircuitOpen(rejection)),
        };
        let outcome = op().await;
        permit.record(Verdict::of(&self.classifier, &outcome));
        outcome
    }
}

impl<T, E> Clone for CircuitBreakerPolicy<T, E> {
    fn clone(&self) -> Self {
        Self {
            breaker: self.breaker.clone(),
            classifier: self.classifier.clone(),
        }
    }
}

impl<T, E> fmt::Debug for CircuitBreakerPolicy<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerPolicy")
            .field("breaker", &self.breaker)
            .field("classifier", &self.classifier)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn cb(threshold: u32, break_duration: Duration) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            break_duration,
        })
        .unwrap()
    }

    fn fail(c: &CircuitBreaker) {
        c.acquire().unwrap().record(Verdict::Failure);
    }

    fn succeed(c: &CircuitBreaker) {
        c.acquire().unwrap().record(Verdict::Success);
    }

    #[test]
    fn starts_closed() {
        let c = cb(5, Duration::from_secs(60));
        assert_eq!(c.state(), CircuitState::Closed);
        assert!(c.is_allowed());
    }

    #[test]
    fn zero_threshold_rejected() {
        let err = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 0,
            break_duration: Duration::from_secs(1),
        })
        .unwrap_err();
        assert_eq!(err, ConfigError::ZeroThreshold);
    }

    #[test]
    fn opens_after_threshold_failures() {
        let c = cb(3, Duration::from_secs(60));
        fail(&c);
        fail(&c);
        assert_eq!(c.state(), CircuitState::Closed);
        fail(&c);
        assert_eq!(c.state(), CircuitState::Open);
        assert!(!c.is_allowed());

        let rejection = c.acquire().err().unwrap();
        assert!(rejection.remaining > Duration::ZERO);
        assert!(rejection.remaining <= Duration::from_secs(60));
    }

    #[test]
    fn success_resets_failure_count() {
        let c = cb(3, Duration::from_secs(60));
        fail(&c);
        fail(&c);
        succeed(&c);
        fail(&c);
        fail(&c);
        // Only 2 failures since the last success
        assert_eq!(c.state(), CircuitState::Closed);
        assert_eq!(c.snapshot().consecutive_failures, 2);
    }

    #[test]
    fn ignored_outcomes_leave_counters_alone() {
        let c = cb(2, Duration::from_secs(60));
        fail(&c);
        c.acquire().unwrap().record(Verdict::Ignored);
        assert_eq!(c.snapshot().consecutive_failures, 1);
    }

    #[test]
    fn ignored_trial_frees_the_slot_and_stays_half_open() {
        let c = cb(1, Duration::ZERO);
        fail(&c);

        let trial = c.acquire().unwrap();
        assert!(trial.is_trial());
        trial.record(Verdict::Ignored);
        assert_eq!(c.state(), CircuitState::HalfOpen);
        assert_eq!(c.snapshot().consecutive_failures, 1);
        assert!(c.is_allowed());

        let next = c.acquire().unwrap();
        assert!(next.is_trial());
        next.record(Verdict::Success);
        assert_eq!(c.state(), CircuitState::Closed);
        assert_eq!(c.snapshot().consecutive_failures, 0);
    }

    #[test]
    fn half_open_admits_a_single_trial() {
        let c = cb(1, Duration::ZERO);
        fail(&c);

        let trial = c.acquire().unwrap();
        assert!(trial.is_trial());
        assert!(c.acquire().is_err(), "second caller must wait for the trial");

        trial.record(Verdict::Success);
        assert_eq!(c.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let c = cb(1, Duration::from_millis(20));
        fail(&c);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(c.state(), CircuitState::HalfOpen);

        fail(&c);
        assert_eq!(c.state(), CircuitState::Open);
    }

    #[test]
    fn dropped_trial_permit_frees_the_slot() {
        let c = cb(1, Duration::ZERO);
        fail(&c);
        drop(c.acquire().unwrap());
        assert!(c.acquire().unwrap().is_trial());
    }

    #[test]
    fn stale_permits_are_discarded() {
        let c = cb(1, Duration::from_secs(60));
        let early = c.acquire().unwrap();
        let late = c.acquire().unwrap();
        early.record(Verdict::Failure);
        assert_eq!(c.state(), CircuitState::Open);

        // Admitted while closed; the breaker has moved on.
        late.record(Verdict::Success);
        assert_eq!(c.state(), CircuitState::Open);
        assert_eq!(c.snapshot().consecutive_failures, 1);
    }

    #[test]
    fn hooks_fire_on_transitions() {
        let breaks = Arc::new(AtomicU32::new(0));
        let resets = Arc::new(AtomicU32::new(0));
        let half_opens = Arc::new(AtomicU32::new(0));
        let (b, r, h) = (breaks.clone(), resets.clone(), half_opens.clone());

        let c = cb(1, Duration::ZERO)
            .on_break(move |ev| {
                assert_eq!(ev.consecutive_failures, 1);
                b.fetch_add(1, Ordering::SeqCst);
            })
            .on_reset(move || {
                r.fetch_add(1, Ordering::SeqCst);
            })
            .on_half_open(move || {
                h.fetch_add(1, Ordering::SeqCst);
            });

        fail(&c);
        succeed(&c);

        assert_eq!(breaks.load(Ordering::SeqCst), 1);
        assert_eq!(half_opens.load(Ordering::SeqCst), 1);
        assert_eq!(resets.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn manual_reset_closes() {
        let c = cb(1, Duration::from_secs(60));
        fail(&c);
        c.reset();
        assert_eq!(c.state(), CircuitState::Closed);
        assert!(c.is_allowed());
    }
}
