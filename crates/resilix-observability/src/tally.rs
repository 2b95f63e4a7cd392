//! Attempt counters.
//!
//! Every attempt ends up in exactly one bucket: `success`, `fail` (the
//! operation ran and failed) or `skipped` (an open circuit rejected the call
//! before it ran). The total is their sum.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use resilix_core::{Outcome, RetryEvent};

/// Lock-free attempt counters. Share behind an `Arc`.
#[derive(Debug, Default)]
pub struct Tally {
    success: AtomicU64,
    fail: AtomicU64,
    skipped: AtomicU64,
}

impl Tally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self) {
        self.success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fail(&self) {
        self.fail.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one attempt by its outcome: `Ok` is a success, a circuit-open
    /// rejection is skipped, anything else is a failure.
    pub fn record_outcome<T, E>(&self, outcome: &Outcome<T, E>) {
        match outcome {
            Ok(_) => self.record_success(),
            Err(fault) if fault.is_circuit_open() => self.record_skipped(),
            Err(_) => self.record_fail(),
        }
    }

    pub fn snapshot(&self) -> TallySnapshot {
        TallySnapshot {
            success: self.success.load(Ordering::Relaxed),
            fail: self.fail.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a [`Tally`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TallySnapshot {
    pub success: u64,
    pub fail: u64,
    pub skipped: u64,
}

impl TallySnapshot {
    pub fn total(&self) -> u64 {
        self.success + self.fail + self.skipped
    }
}

impl fmt::Display for TallySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total   Attempts:    {}", self.total())?;
        writeln!(f, "Success Attempts:    {}", self.success)?;
        writeln!(f, "Failed  Attempts:    {}", self.fail)?;
        write!(f, "Skipped Attempts:    {}", self.skipped)
    }
}

/// An `on_retry` hook that counts each retried attempt in `tally`: skipped
/// for circuit-open rejections, failed otherwise. A retried attempt was
/// handleable, so even an `Ok` result (say, an error status) counts as failed.
///
/// Only attempts that are followed by a retry pass through the hook; count
/// the final outcome separately.
pub fn retry_observer<T, E>(
    tally: Arc<Tally>,
) -> impl Fn(&RetryEvent<'_, T, E>) + Send + Sync + 'static {
    move |event| match event.outcome {
        Err(fault) if fault.is_circuit_open() => tally.record_skipped(),
        _ => tally.record_fail(),
    }
}
