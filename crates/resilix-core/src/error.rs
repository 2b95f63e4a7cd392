//! Failure taxonomy for policy executions, configuration and the registry.

use std::time::Duration;

use thiserror::Error;

/// A failed attempt, as seen by every policy.
///
/// The wrapped operation only ever produces [`Fault::Operation`] (or
/// [`Fault::Cancelled`] when it observes its own cancellation signal).
/// [`Fault::CircuitOpen`] is synthesised by a circuit breaker and means the
/// operation was never invoked.
#[derive(Debug, Error)]
pub enum Fault<E> {
    /// Raised by the wrapped operation.
    #[error("{0}")]
    Operation(E),

    /// A circuit breaker rejected the call without running it.
    #[error(transparent)]
    CircuitOpen(BrokenCircuit),

    /// The operation was cancelled by its caller.
    #[error("operation cancelled")]
    Cancelled,
}

impl<E> Fault<E> {
    /// Returns `true` if a breaker short-circuited this call.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen(_))
    }

    /// Returns `true` for a deliberate cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Borrow the operation's own failure, if this is one.
    pub fn operation(&self) -> Option<&E> {
        match self {
            Self::Operation(e) => Some(e),
            _ => None,
        }
    }

    /// Unwrap into the operation's own failure, if this is one.
    pub fn into_operation(self) -> Option<E> {
        match self {
            Self::Operation(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> From<E> for Fault<E> {
    fn from(e: E) -> Self {
        Self::Operation(e)
    }
}

/// Rejection produced by an open circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("circuit is open, retry after {remaining:?}")]
pub struct BrokenCircuit {
    /// Time left until the breaker admits a trial call. Zero while a
    /// half-open trial is already in flight.
    pub remaining: Duration,
}

/// Invalid policy parameters. Returned at construction, never at execution.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("circuit breaker failure threshold must be at least 1")]
    ZeroThreshold,

    #[error("retry max_attempts must be at least 1 (use no bound for retry-forever)")]
    ZeroAttempts,

    #[error("backoff multiplier must be finite and >= 1.0, got {0}")]
    InvalidMultiplier(f64),

    #[error("{field} must not be negative, got {value}ms")]
    NegativeDelay { field: &'static str, value: i64 },

    #[error("wrap needs at least one policy")]
    EmptyWrap,
}

/// Errors returned by [`crate::PolicyRegistry`] lookups and loading.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no policy registered under key '{key}'")]
    NotFound { key: String },

    #[error("policy '{key}' is registered for a different result/failure type")]
    TypeMismatch { key: String },

    #[error("invalid policy '{key}': {source}")]
    InvalidPolicy {
        key: String,
        #[source]
        source: ConfigError,
    },

    #[error("policy config is not valid JSON: {0}")]
    Deserialization(#[from] serde_json::Error),
}

impl RegistryError {
    /// Returns `true` if the key simply was not registered.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
