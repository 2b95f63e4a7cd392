//! The `Policy` enum: one execute entry point, per-variant dispatch.
//!
//! A typical client stack, outermost first:
//! ```text
//! call-site → [Fallback] → [Retry] → [CircuitBreaker] → operation
//! ```
//! Build it with [`Policy::wrap_all`] (or nested [`Policy::wrap`] calls):
//! the first policy sees the final outcome of everything inside it.

pub mod circuit_breaker;
pub mod fallback;
pub mod retry;

use std::fmt;
use std::future::Future;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::{ConfigError, Fault};
use crate::outcome::Outcome;

pub use circuit_breaker::{
    BreakEvent, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerPolicy, CircuitSnapshot,
    CircuitState, Permit, Verdict,
};
pub use fallback::FallbackPolicy;
pub use retry::{Backoff, RetryConfig, RetryEvent, RetryPolicy};

/// A type-erased asynchronous attempt. Futures it produces live for `'f`.
pub(crate) type AsyncOp<'f, T, E> = dyn Fn() -> BoxFuture<'f, Outcome<T, E>> + Send + Sync + 'f;

/// A configured resilience policy.
///
/// Created once and reused; cloning shares any stateful parts (circuit
/// breaker counters), so every clone sees the same breaker.
pub enum Policy<T, E> {
    /// Runs the operation directly.
    NoOp,
    Retry(RetryPolicy<T, E>),
    CircuitBreaker(CircuitBreakerPolicy<T, E>),
    Fallback(FallbackPolicy<T, E>),
    /// `outer` executes `inner`, which executes the operation.
    Wrap(Box<Policy<T, E>>, Box<Policy<T, E>>),
}

fn lift<T, E, R: Into<Fault<E>>>(result: Result<T, R>) -> Outcome<T, E> {
    result.map_err(Into::into)
}

impl<T, E> Policy<T, E> {
    /// The pass-through policy.
    pub fn no_op() -> Self {
        Self::NoOp
    }

    /// Compose two policies: `outer` sees the final outcome of `inner`.
    ///
    /// Order matters. `wrap(fallback, retry)` substitutes only after the
    /// retries are spent; `wrap(retry, breaker)` re-queries the breaker on
    /// every attempt, and with a [`handle_all`](crate::Classifier::handle_all) retry each
    /// circuit-open rejection is retried like any other failure.
    pub fn wrap(outer: impl Into<Policy<T, E>>, inner: impl Into<Policy<T, E>>) -> Self {
        Self::Wrap(Box::new(outer.into()), Box::new(inner.into()))
    }

    /// Nest any number of policies, outermost first.
    pub fn wrap_all<I>(policies: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = Policy<T, E>>,
    {
        let mut stack: Vec<Policy<T, E>> = policies.into_iter().collect();
        let mut wrapped = stack.pop().ok_or(ConfigError::EmptyWrap)?;
        while let Some(outer) = stack.pop() {
            wrapped = Self::wrap(outer, wrapped);
        }
        Ok(wrapped)
    }

    /// Short name of the outermost variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoOp => "no_op",
            Self::Retry(_) => "retry",
            Self::CircuitBreaker(_) => "circuit_breaker",
            Self::Fallback(_) => "fallback",
            Self::Wrap(..) => "wrap",
        }
    }

    /// Every circuit breaker inside this policy, outermost first.
    pub fn breakers(&self) -> Vec<&CircuitBreaker> {
        match self {
            Self::CircuitBreaker(p) => vec![p.breaker()],
            Self::Wrap(outer, inner) => {
                let mut found = outer.breakers();
                found.extend(inner.breakers());
                found
            }
            _ => Vec::new(),
        }
    }

    /// Execute a blocking operation through the policy. Delays block the
    /// calling thread.
    pub fn execute<F, R>(&self, mut op: F) -> Outcome<T, E>
    where
        F: FnMut() -> Result<T, R>,
        R: Into<Fault<E>>,
    {
        self.run(&mut || lift(op()))
    }

    fn run(&self, op: &mut dyn FnMut() -> Outcome<T, E>) -> Outcome<T, E> {
        match self {
            Self::NoOp => op(),
            Self::Retry(p) => p.run(op),
            Self::CircuitBreaker(p) => p.run(op),
            Self::Fallback(p) => p.run(op),
            Self::Wrap(outer, inner) => outer.run(&mut || inner.run(op)),
        }
    }
}

impl<T, E> Policy<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Execute an asynchronous operation through the policy. Delays yield
    /// to the runtime instead of blocking.
    pub async fn execute_async<F, Fut, R>(&self, op: F) -> Outcome<T, E>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, R>> + Send,
        R: Into<Fault<E>>,
    {
        let lifted = || op().map(lift::<T, E, R>).boxed();
        self.run_async(&lifted).await
    }

    fn run_async<'a, 'f: 'a>(&'a self, op: &'a AsyncOp<'f, T, E>) -> BoxFuture<'a, Outcome<T, E>> {
        match self {
            Self::NoOp => op(),
            Self::Retry(p) => p.run_async(op).boxed(),
            Self::CircuitBreaker(p) => p.run_async(op).boxed(),
            Self::Fallback(p) => p.run_async(op).boxed(),
            Self::Wrap(outer, inner) => async move {
                let through_inner = move || inner.run_async(op);
                outer.run_async(&through_inner).await
            }
            .boxed(),
        }
    }
}

impl<T, E> Default for Policy<T, E> {
    fn default() -> Self {
        Self::NoOp
    }
}

impl<T, E> Clone for Policy<T, E> {
    fn clone(&self) -> Self {
        match self {
            Self::NoOp => Self::NoOp,
            Self::Retry(p) => Self::Retry(p.clone()),
            Self::CircuitBreaker(p) => Self::CircuitBreaker(p.clone()),
            Self::Fallback(p) => Self::Fallback(p.clone()),
            Self::Wrap(outer, inner) => Self::Wrap(outer.clone(), inner.clone()),
        }
    }
}

impl<T, E> fmt::Debug for Policy<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoOp => write!(f, "NoOp"),
            Self::Retry(p) => fmt::Debug::fmt(p, f),
            Self::CircuitBreaker(p) => fmt::Debug::fmt(p, f),
            Self::Fallback(p) => fmt::Debug::fmt(p, f),
            Self::Wrap(outer, inner) => f.debug_tuple("Wrap").field(outer).field(inner).finish(),
        }
    }
}

impl<T, E> From<RetryPolicy<T, E>> for Policy<T, E> {
    fn from(p: RetryPolicy<T, E>) -> Self {
        Self::Retry(p)
    }
}

impl<T, E> From<CircuitBreakerPolicy<T, E>> for Policy<T, E> {
    fn from(p: CircuitBreakerPolicy<T, E>) -> Self {
        Self::CircuitBreaker(p)
    }
}

impl<T, E> From<FallbackPolicy<T, E>> for Policy<T, E> {
    fn from(p: FallbackPolicy<T, E>) -> Self {
        Self::Fallback(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::Classifier;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    struct Boom;

    fn retry(max: u32) -> Policy<i32, Boom> {
        RetryPolicy::new(Classifier::handle_all(), RetryConfig::attempts(max, Backoff::Immediate))
            .unwrap()
            .into()
    }

    #[test]
    fn no_op_runs_once() {
        let mut calls = 0;
        let out = Policy::<i32, Boom>::no_op().execute(|| {
            calls += 1;
            Err(Boom)
        });
        assert!(matches!(out, Err(Fault::Operation(Boom))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn wrap_all_nests_outermost_first() {
        let fallback = FallbackPolicy::value(Classifier::handle_all(), 7);
        let policy = Policy::wrap_all([fallback.into(), retry(2)]).unwrap();
        assert_eq!(policy.kind(), "wrap");

        let mut calls = 0;
        let out = policy.execute(|| {
            calls += 1;
            Err::<i32, _>(Boom)
        });
        assert_eq!(out.unwrap(), 7);
        assert_eq!(calls, 2);
    }

    #[test]
    fn wrap_all_rejects_empty() {
        let err = Policy::<i32, Boom>::wrap_all(Vec::new()).unwrap_err();
        assert_eq!(err, ConfigError::EmptyWrap);
    }

    #[test]
    fn nesting_is_associative() {
        let count = |policy: Policy<i32, Boom>| {
            let mut calls = 0;
            let _ = policy.execute(|| {
                calls += 1;
                Err::<i32, _>(Boom)
            });
            calls
        };
        let left = Policy::wrap(Policy::wrap(retry(2), retry(3)), retry(2));
        let right = Policy::wrap(retry(2), Policy::wrap(retry(3), retry(2)));
        assert_eq!(count(left), 12);
        assert_eq!(count(right), 12);
    }

    #[test]
    fn clones_share_breaker_state() {
        let breaker: Policy<i32, Boom> = CircuitBreakerPolicy::new(
            Classifier::handle_all(),
            CircuitBreakerConfig {
                failure_threshold: 2,
                break_duration: Duration::from_secs(60),
            },
        )
        .unwrap()
        .into();
        let twin = breaker.clone();

        let _ = breaker.execute(|| Err::<i32, _>(Boom));
        let _ = twin.execute(|| Err::<i32, _>(Boom));

        assert_eq!(breaker.breakers()[0].state(), CircuitState::Open);
        assert!(matches!(twin.execute(|| Ok::<_, Boom>(1)), Err(Fault::CircuitOpen(_))));
    }

    #[test]
    fn catch_all_retry_keeps_retrying_through_open_breaker() {
        let retries = Arc::new(AtomicU32::new(0));
        let counter = retries.clone();
        let config = RetryConfig::attempts(5, Backoff::Immediate);
        let retry = RetryPolicy::new(Classifier::handle_all(), config)
            .unwrap()
            .on_retry(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        let breaker = CircuitBreakerPolicy::new(
            Classifier::handle_all(),
            CircuitBreakerConfig {
                failure_threshold: 1,
                break_duration: Duration::from_secs(60),
            },
        )
        .unwrap();
        let policy = Policy::wrap(retry, breaker);

        let mut calls = 0;
        let out = policy.execute(|| {
            calls += 1;
            Err::<i32, _>(Boom)
        });

        assert!(matches!(out, Err(Fault::CircuitOpen(_))));
        assert_eq!(calls, 1);
        assert_eq!(retries.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn predicate_retry_stops_at_open_breaker() {
        let retry = RetryPolicy::new(
            Classifier::handle(|_: &Boom| true),
            RetryConfig::attempts(5, Backoff::Immediate),
        )
        .unwrap();
        let breaker = CircuitBreakerPolicy::new(
            Classifier::handle_all(),
            CircuitBreakerConfig {
                failure_threshold: 1,
                break_duration: Duration::from_secs(60),
            },
        )
        .unwrap();
        let policy: Policy<i32, Boom> = Policy::wrap(retry, breaker);

        let mut calls = 0;
        let out = policy.execute(|| {
            calls += 1;
            Err(Boom)
        });

        assert!(matches!(out, Err(Fault::CircuitOpen(_))));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn async_wrap_runs_through_both_layers() {
        let calls = Arc::new(AtomicU32::new(0));
        let fallback = FallbackPolicy::value(Classifier::handle_all(), -1);
        let policy = Policy::wrap(fallback, retry(3));

        let counter = calls.clone();
        let out = policy
            .execute_async(|| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>(Boom)
                }
            })
            .await;

        assert_eq!(out.unwrap(), -1);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn async_cancellation_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = retry(5);

        let counter = calls.clone();
        let out = policy
            .execute_async(|| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, Fault<Boom>>(Fault::Cancelled)
                }
            })
            .await;

        assert!(matches!(out, Err(Fault::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
