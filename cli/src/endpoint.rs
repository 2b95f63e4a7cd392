//! The `Endpoint` trait and an in-process simulated HTTP endpoint.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::service::Flapping;

/// Response status of a simulated request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    BadRequest,
    RequestTimeout,
    InternalServerError,
    ServiceUnavailable,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::BadRequest => 400,
            Self::RequestTimeout => 408,
            Self::InternalServerError => 500,
            Self::ServiceUnavailable => 503,
        }
    }

    /// 5xx and 408: worth trying again.
    pub fn is_transient(self) -> bool {
        self == Self::RequestTimeout || self.code() >= 500
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Failure below the HTTP layer: no status was received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

/// Simulated routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// 500 unless the request count is a multiple of three.
    Intermittent,
    /// 503 during down windows.
    UpDown,
    /// 400 unless the request count is a multiple of three.
    BadRequest,
}

/// Something that answers requests asynchronously.
///
/// Implementations must be `Send + Sync` to be shared across tasks.
#[async_trait]
pub trait Endpoint: Send + Sync {
    async fn get(&self, route: Route) -> Result<Status, TransportError>;

    /// Requests received so far.
    fn request_count(&self) -> u64;
}

/// An in-process endpoint with configurable latency and client timeout.
#[derive(Debug)]
pub struct SimulatedEndpoint {
    requests: AtomicU64,
    latency: Duration,
    timeout: Duration,
    flapping: Flapping,
}

impl SimulatedEndpoint {
    pub fn new(latency: Duration, flap_window: Duration) -> Self {
        Self {
            requests: AtomicU64::new(0),
            latency,
            timeout: Duration::from_secs(5),
            flapping: Flapping::new(flap_window),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn respond(&self, n: u64, route: Route) -> Status {
        match route {
            Route::Intermittent if n % 3 != 0 => Status::InternalServerError,
            Route::BadRequest if n % 3 != 0 => Status::BadRequest,
            Route::UpDown if self.flapping.is_down() => Status::ServiceUnavailable,
            _ => Status::Ok,
        }
    }
}

#[async_trait]
impl Endpoint for SimulatedEndpoint {
    async fn get(&self, route: Route) -> Result<Status, TransportError> {
        let n = self.requests.fetch_add(1, Ordering::Relaxed) + 1;
        tokio::time::timeout(self.timeout, tokio::time::sleep(self.latency))
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))?;
        Ok(self.respond(n, route))
    }

    fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}
