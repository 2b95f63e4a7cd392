//! resilix-core: composable resilience policies.
//!
//! # Overview
//!
//! Wrap a fallible operation (blocking or async) in a [`Policy`] and execute
//! it through the policy instead of calling it directly. The core crate
//! defines:
//!
//! - [`Outcome`] / [`Fault`]: what one attempt produced
//! - [`Classifier`]: which outcomes a policy should act on
//! - [`policy`] module: retry, circuit breaker, fallback and wrap
//! - [`PolicyRegistry`]: named policies shared across call-sites
//! - [`config`] module: serde definitions for loading policies from JSON
//!
//! ```
//! use resilix_core::{Backoff, Classifier, FallbackPolicy, Policy, RetryConfig, RetryPolicy};
//!
//! #[derive(Debug)]
//! struct Unavailable;
//!
//! let retry = RetryPolicy::new(
//!     Classifier::<&str, Unavailable>::handle_all(),
//!     RetryConfig::attempts(3, Backoff::Immediate),
//! )
//! .unwrap();
//! let policy = Policy::wrap(FallbackPolicy::value(Classifier::handle_all(), "cached"), retry);
//!
//! let mut calls = 0;
//! let answer = policy.execute(|| {
//!     calls += 1;
//!     Err::<&str, _>(Unavailable)
//! });
//! assert_eq!(answer.unwrap(), "cached");
//! assert_eq!(calls, 3);
//! ```

pub mod config;
pub mod error;
pub mod outcome;
pub mod policy;
pub mod registry;

pub use config::{BackoffSpec, PolicySpec, RegistryConfig};
pub use error::{BrokenCircuit, ConfigError, Fault, RegistryError};
pub use outcome::{Classification, Classifier, Outcome};
pub use policy::{
    Backoff, BreakEvent, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerPolicy,
    CircuitSnapshot, CircuitState, FallbackPolicy, Permit, Policy, RetryConfig, RetryEvent,
    RetryPolicy, Verdict,
};
pub use registry::PolicyRegistry;
