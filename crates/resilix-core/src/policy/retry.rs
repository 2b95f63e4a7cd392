//! Retry policy: bounded or forever, with pluggable backoff.
//!
//! Attempts are numbered from 1. Before retry `n` (1-based, so `n == 1` is
//! the second attempt) the policy calls `on_retry` and then waits
//! `backoff.delay(n)`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::AsyncOp;
use crate::error::ConfigError;
use crate::outcome::{Classification, Classifier, Outcome};

/// Delay schedule between attempts.
#[derive(Clone, Default)]
pub enum Backoff {
    /// Retry straight away.
    #[default]
    Immediate,
    /// Same delay before every retry.
    Fixed(Duration),
    /// `base * n` before retry `n`.
    Linear { base: Duration },
    /// `initial * multiplier^(n-1)`, capped at `max`.
    Exponential {
        initial: Duration,
        multiplier: f64,
        max: Duration,
    },
    /// Caller-supplied schedule. Should be non-decreasing in `n`.
    Custom(Arc<dyn Fn(u32) -> Duration + Send + Sync>),
}

impl Backoff {
    /// Custom schedule from a closure over the 1-based retry number.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Delay before retry `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let n = retry.max(1);
        match self {
            Self::Immediate => Duration::ZERO,
            Self::Fixed(d) => *d,
            Self::Linear { base } => base.saturating_mul(n),
            Self::Exponential {
                initial,
                multiplier,
                max,
            } => {
                if initial.is_zero() {
                    return Duration::ZERO;
                }
                let exponent = (n - 1).min(i32::MAX as u32) as i32;
                let secs = initial.as_secs_f64() * multiplier.powi(exponent);
                // Overflowing schedules saturate at the cap.
                Duration::try_from_secs_f64(secs).map_or(*max, |d| d.min(*max))
            }
            Self::Custom(f) => f(n),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::Exponential { multiplier, .. }
                if !(multiplier.is_finite() && *multiplier >= 1.0) =>
            {
                Err(ConfigError::InvalidMultiplier(*multiplier))
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for Backoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate => write!(f, "Immediate"),
            Self::Fixed(d) => f.debug_tuple("Fixed").field(d).finish(),
            Self::Linear { base } => f.debug_struct("Linear").field("base", base).finish(),
            Self::Exponential {
                initial,
                multiplier,
                max,
            } => f
                .debug_struct("Exponential")
                .field("initial", initial)
                .field("multiplier", multiplier)
                .field("max", max)
                .finish(),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Configuration for the retry policy.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts including the first one. `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Delay schedule between attempts.
    pub backoff: Backoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: Some(3),
            backoff: Backoff::Exponential {
                initial: Duration::from_millis(100),
                multiplier: 2.0,
                max: Duration::from_secs(10),
            },
        }
    }
}

impl RetryConfig {
    /// Retry forever with the given backoff.
    pub fn forever(backoff: Backoff) -> Self {
        Self {
            max_attempts: None,
            backoff,
        }
    }

    /// At most `max_attempts` attempts in total.
    pub fn attempts(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            backoff,
        }
    }
}

/// Passed to the `on_retry` hook before each wait.
#[derive(Debug)]
pub struct RetryEvent<'a, T, E> {
    /// The handleable outcome of the attempt that just failed.
    pub outcome: &'a Outcome<T, E>,
    /// Number of the attempt that just failed (1-based).
    pub attempt: u32,
    /// How long the policy will wait before the next attempt.
    pub delay: Duration,
}

type OnRetry<T, E> = Arc<dyn Fn(&RetryEvent<'_, T, E>) + Send + Sync>;

/// Retries handleable outcomes according to a [`RetryConfig`].
pub struct RetryPolicy<T, E> {
    config: RetryConfig,
    classifier: Classifier<T, E>,
    on_retry: Option<OnRetry<T, E>>,
}

impl<T, E> RetryPolicy<T, E> {
    pub fn new(classifier: Classifier<T, E>, config: RetryConfig) -> Result<Self, ConfigError> {
        if config.max_attempts == Some(0) {
            return Err(ConfigError::ZeroAttempts);
        }
        config.backoff.validate()?;
        Ok(Self {
            config,
            classifier,
            on_retry: None,
        })
    }

    /// Retry immediately, forever, while the outcome is handleable.
    ///
    /// Nothing bounds this loop: a dependency that never recovers keeps the
    /// caller retrying until something outside (a watchdog, a breaker that
    /// this classifier does not handle, a cancellation) stops it.
    pub fn forever(classifier: Classifier<T, E>) -> Self {
        Self {
            config: RetryConfig::forever(Backoff::Immediate),
            classifier,
            on_retry: None,
        }
    }

    /// Install the per-retry hook.
    pub fn on_retry<F>(mut self, f: F) -> Self
    where
        F: Fn(&RetryEvent<'_, T, E>) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(f));
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn classifier(&self) -> &Classifier<T, E> {
        &self.classifier
    }

    /// Returns `true` if a handleable failure of attempt `attempt` earns
    /// another attempt.
    pub fn should_retry(&self, attempt: u32, classification: Classification) -> bool {
        classification.is_handleable()
            && self.config.max_attempts.map_or(true, |max| attempt < max)
    }

    /// Delay before retry `retry` (1-based).
    pub fn delay_before_retry(&self, retry: u32) -> Duration {
        self.config.backoff.delay(retry)
    }

    /// Decide what follows attempt `attempt`. `Some(delay)` means wait and
    /// retry; the hook has already fired.
    fn next_step(&self, attempt: u32, outcome: &Outcome<T, E>) -> Option<Duration> {
        let classification = self.classifier.classify(outcome);
        if !self.should_retry(attempt, classification) {
            return None;
        }
        let delay = self.delay_before_retry(attempt);
        debug!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            circuit_open = matches!(outcome, Err(f) if f.is_circuit_open()),
            "Retrying after handleable outcome"
        );
        if let Some(hook) = &self.on_retry {
            hook(&RetryEvent {
                outcome,
                attempt,
                delay,
            });
        }
        Some(delay)
    }

    pub(crate) fn run(&self, op: &mut dyn FnMut() -> Outcome<T, E>) -> Outcome<T, E> {
        let mut attempt: u32 = 1;
        loop {
            let outcome = op();
            match self.next_step(attempt, &outcome) {
                None => return outcome,
                Some(delay) => {
                    drop(outcome);
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                }
            }
            attempt = attempt.saturating_add(1);
        }
    }

    pub(crate) async fn run_async(&self, op: &AsyncOp<'_, T, E>) -> Outcome<T, E> {
        let mut attempt: u32 = 1;
        loop {
            let outcome = op().await;
            match self.next_step(attempt, &outcome) {
                None => return outcome,
                Some(delay) => {
                    drop(outcome);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
            attempt = attempt.saturating_add(1);
        }
    }
}

impl<T, E> Clone for RetryPolicy<T, E> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            classifier: self.classifier.clone(),
            on_retry: self.on_retry.clone(),
        }
    }
}

impl<T, E> fmt::Debug for RetryPolicy<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .field("classifier", &self.classifier)
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Fault;

    #[test]
    fn exponential_delays() {
        let backoff = Backoff::Exponential {
            initial: Duration::from_millis(100),
            multiplier: 2.0,
            max: Duration::from_secs(30),
        };
        assert_eq!(backoff.delay(1).as_millis(), 100);
        assert_eq!(backoff.delay(2).as_millis(), 200);
        assert_eq!(backoff.delay(3).as_millis(), 400);
    }

    #[test]
    fn delay_capped_at_max() {
        let backoff = Backoff::Exponential {
            initial: Duration::from_millis(100),
            multiplier: 10.0,
            max: Duration::from_millis(500),
        };
        let d5 = backoff.delay(5);
        assert!(d5 <= Duration::from_millis(500), "d5={d5:?} exceeds max");
        // Huge exponents saturate at the cap instead of overflowing.
        assert_eq!(backoff.delay(u32::MAX), Duration::from_millis(500));
    }

    #[test]
    fn exponential_keeps_sub_millisecond_precision() {
        let backoff = Backoff::Exponential {
            initial: Duration::from_micros(250),
            multiplier: 2.0,
            max: Duration::from_micros(1_500),
        };
        assert_eq!(backoff.delay(1), Duration::from_micros(250));
        assert_eq!(backoff.delay(2), Duration::from_micros(500));
        assert_eq!(backoff.delay(3), Duration::from_micros(1_000));
        assert_eq!(backoff.delay(4), Duration::from_micros(1_500));

        let zero = Backoff::Exponential {
            initial: Duration::ZERO,
            multiplier: 2.0,
            max: Duration::from_secs(1),
        };
        assert_eq!(zero.delay(u32::MAX), Duration::ZERO);
    }

    #[test]
    fn linear_escalates_with_retry_number() {
        let backoff = Backoff::Linear {
            base: Duration::from_millis(100),
        };
        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(3), Duration::from_millis(300));
    }

    #[test]
    fn fixed_and_immediate() {
        assert_eq!(Backoff::Immediate.delay(7), Duration::ZERO);
        assert_eq!(
            Backoff::Fixed(Duration::from_millis(40)).delay(9),
            Duration::from_millis(40)
        );
        assert_eq!(
            Backoff::custom(|n| Duration::from_millis(u64::from(n) * 5)).delay(4),
            Duration::from_millis(20)
        );
    }

    #[test]
    fn should_retry_boundary() {
        let policy = RetryPolicy::<(), ()>::new(
            Classifier::handle_all(),
            RetryConfig::attempts(3, Backoff::Immediate),
        )
        .unwrap();
        assert!(policy.should_retry(1, Classification::Handleable));
        assert!(policy.should_retry(2, Classification::Handleable));
        assert!(!policy.should_retry(3, Classification::Handleable));
        assert!(!policy.should_retry(1, Classification::NotHandleable));
    }

    #[test]
    fn forever_never_runs_out() {
        let policy = RetryPolicy::<(), ()>::forever(Classifier::handle_all());
        assert!(policy.should_retry(u32::MAX, Classification::Handleable));
    }

    #[test]
    fn rejects_invalid_config() {
        let zero = RetryPolicy::<(), ()>::new(
            Classifier::handle_all(),
            RetryConfig::attempts(0, Backoff::Immediate),
        );
        assert_eq!(zero.unwrap_err(), ConfigError::ZeroAttempts);

        let shrinking = RetryPolicy::<(), ()>::new(
            Classifier::handle_all(),
            RetryConfig::attempts(
                2,
                Backoff::Exponential {
                    initial: Duration::from_millis(10),
                    multiplier: 0.5,
                    max: Duration::from_secs(1),
                },
            ),
        );
        assert_eq!(shrinking.unwrap_err(), ConfigError::InvalidMultiplier(0.5));
    }

    #[test]
    fn hook_sees_attempt_and_delay() {
        use std::sync::Mutex;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let policy = RetryPolicy::<i32, &'static str>::new(
            Classifier::handle_all(),
            RetryConfig::attempts(3, Backoff::Linear { base: Duration::from_millis(1) }),
        )
        .unwrap()
        .on_retry(move |ev| sink.lock().unwrap().push((ev.attempt, ev.delay)));

        let mut calls = 0;
        let result = policy.run(&mut || {
            calls += 1;
            Err(Fault::Operation("down"))
        });

        assert!(matches!(result, Err(Fault::Operation("down"))));
        assert_eq!(calls, 3);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(1, Duration::from_millis(1)), (2, Duration::from_millis(2))]
        );
    }
}
