//! Declarative policy definitions, loadable from JSON.
//!
//! ```json
//! {
//!   "policies": {
//!     "DefaultRetry": { "kind": "retry" },
//!     "Backend": {
//!       "kind": "wrap",
//!       "policies": [
//!         { "kind": "retry", "max_attempts": 4, "handle_circuit_open": true,
//!           "backoff": { "type": "exponential", "initial_ms": 200, "multiplier": 2.0, "max_ms": 5000 } },
//!         { "kind": "circuit_breaker", "failure_threshold": 3, "break_duration_ms": 10000 }
//!       ]
//!     }
//!   }
//! }
//! ```
//!
//! Fallback has no declarative form: its substitute is a typed value.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::outcome::Classifier;
use crate::policy::{
    Backoff, CircuitBreakerConfig, CircuitBreakerPolicy, Policy, RetryConfig, RetryPolicy,
};

/// One policy, as written in a config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicySpec {
    NoOp,
    Retry {
        /// Total attempts. Absent means retry forever.
        #[serde(default)]
        max_attempts: Option<u32>,
        #[serde(default)]
        backoff: BackoffSpec,
        /// Treat rejections from an inner breaker as retryable. Implied when
        /// the shared classifier is `handle_all`.
        #[serde(default)]
        handle_circuit_open: bool,
    },
    CircuitBreaker {
        #[serde(default = "default_failure_threshold")]
        failure_threshold: u32,
        #[serde(default = "default_break_duration_ms")]
        break_duration_ms: i64,
    },
    /// Outermost first.
    Wrap { policies: Vec<PolicySpec> },
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_break_duration_ms() -> i64 {
    30_000
}

/// Backoff schedule in milliseconds.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffSpec {
    #[default]
    Immediate,
    Fixed { delay_ms: i64 },
    Linear { base_ms: i64 },
    Exponential {
        initial_ms: i64,
        #[serde(default = "default_multiplier")]
        multiplier: f64,
        max_ms: i64,
    },
}

fn default_multiplier() -> f64 {
    2.0
}

fn millis(field: &'static str, value: i64) -> Result<Duration, ConfigError> {
    u64::try_from(value)
        .map(Duration::from_millis)
        .map_err(|_| ConfigError::NegativeDelay { field, value })
}

impl BackoffSpec {
    pub fn build(&self) -> Result<Backoff, ConfigError> {
        Ok(match *self {
            Self::Immediate => Backoff::Immediate,
            Self::Fixed { delay_ms } => Backoff::Fixed(millis("delay_ms", delay_ms)?),
            Self::Linear { base_ms } => Backoff::Linear {
                base: millis("base_ms", base_ms)?,
            },
            Self::Exponential {
                initial_ms,
                multiplier,
                max_ms,
            } => Backoff::Exponential {
                initial: millis("initial_ms", initial_ms)?,
                multiplier,
                max: millis("max_ms", max_ms)?,
            },
        })
    }
}

impl PolicySpec {
    /// Validate and build the policy. Every layer shares `classifier`.
    pub fn build<T, E>(&self, classifier: &Classifier<T, E>) -> Result<Policy<T, E>, ConfigError> {
        match self {
            Self::NoOp => Ok(Policy::NoOp),
            Self::Retry {
                max_attempts,
                backoff,
                handle_circuit_open,
            } => {
                let classifier = if *handle_circuit_open {
                    classifier.clone().or_circuit_open()
                } else {
                    classifier.clone()
                };
                let config = RetryConfig {
                    max_attempts: *max_attempts,
                    backoff: backoff.build()?,
                };
                Ok(RetryPolicy::new(classifier, config)?.into())
            }
            Self::CircuitBreaker {
                failure_threshold,
                break_duration_ms,
            } => {
                let config = CircuitBreakerConfig {
                    failure_threshold: *failure_threshold,
                    break_duration: millis("break_duration_ms", *break_duration_ms)?,
                };
                Ok(CircuitBreakerPolicy::new(classifier.clone(), config)?.into())
            }
            Self::Wrap { policies } => {
                let built = policies
                    .iter()
                    .map(|spec| spec.build(classifier))
                    .collect::<Result<Vec<_>, _>>()?;
                Policy::wrap_all(built)
            }
        }
    }
}

/// Named policies for a [`crate::PolicyRegistry`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub policies: BTreeMap<String, PolicySpec>,
}
