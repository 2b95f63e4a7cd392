//! Simulated unreliable dependency used by the blocking scenarios.

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("intermittently bad")]
    Bad,
    #[error("down for a moment")]
    Down,
}

/// Alternating down/up windows of equal length, starting down.
#[derive(Debug, Clone, Copy)]
pub struct Flapping {
    started: Instant,
    window: Duration,
}

impl Flapping {
    pub fn new(window: Duration) -> Self {
        Self {
            started: Instant::now(),
            window,
        }
    }

    pub fn is_down(&self) -> bool {
        let window_ms = self.window.as_millis().max(1);
        (self.started.elapsed().as_millis() / window_ms) % 2 == 0
    }
}

/// A service that sleeps `latency` per request and then fails according to
/// its mode.
#[derive(Debug)]
pub struct UnreliableService {
    requests: AtomicU64,
    latency: Duration,
    good_every: u64,
    flapping: Flapping,
}

impl UnreliableService {
    pub fn new(latency: Duration, flap_window: Duration) -> Self {
        Self {
            requests: AtomicU64::new(0),
            latency,
            good_every: 3,
            flapping: Flapping::new(flap_window),
        }
    }

    /// Fails unless the running request count is a multiple of three.
    pub fn mostly_bad(&self, value: i64) -> Result<i64, ServiceError> {
        let n = self.begin();
        if n % self.good_every != 0 {
            return Err(ServiceError::Bad);
        }
        Ok(value)
    }

    /// Fails for the whole of every other flap window.
    pub fn up_and_down(&self, value: i64) -> Result<i64, ServiceError> {
        self.begin();
        if self.flapping.is_down() {
            return Err(ServiceError::Down);
        }
        Ok(value)
    }

    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    fn begin(&self) -> u64 {
        let n = self.requests.fetch_add(1, Ordering::Relaxed) + 1;
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
        n
    }
}
