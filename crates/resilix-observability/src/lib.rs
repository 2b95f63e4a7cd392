//! # resilix-observability
//!
//! Logging and counters for code that runs operations through Resilix
//! policies.
//!
//! ## Structured logging
//! Human-readable or JSON logs via `tracing-subscriber`, with per-component
//! level overrides (e.g. `resilix_core=debug` to see every retry).
//!
//! ## Outcome tally
//! [`Tally`] counts succeeded, failed and skipped (circuit-open) calls and is
//! fed from policy hooks or from final outcomes.

pub mod tally;
pub mod tracing_setup;

pub use tally::{retry_observer, Tally, TallySnapshot};
pub use tracing_setup::{init_tracing, LogConfig};
