//! Async scenarios against a simulated HTTP endpoint.
//!
//! Error statuses arrive as `Ok(status)`, so these policies classify by
//! result predicate as well as by transport error.

use std::time::Duration;

use anyhow::{bail, Result};
use resilix_core::{
    Backoff, CircuitBreakerConfig, CircuitBreakerPolicy, Classifier, Outcome, Policy, RetryConfig,
    RetryPolicy,
};
use resilix_observability::{retry_observer, Tally};
use tracing::debug;

use crate::endpoint::{Route, Status, TransportError};
use crate::scenarios::{Demo, Scenario};

type HttpPolicy = Policy<Status, TransportError>;

/// Transport errors, breaker rejections and 5xx/408 responses.
pub fn transient() -> Classifier<Status, TransportError> {
    Classifier::handle_all().or_result(|status: &Status| status.is_transient())
}

pub async fn run(scenario: Scenario, demo: &Demo) -> Result<()> {
    match scenario {
        Scenario::AsyncNoPolicy => no_policy(demo).await,
        Scenario::AsyncRetryForever => {
            let policy = retry_forever(demo, transient(), Duration::ZERO)?;
            drive(demo, &policy, Route::Intermittent).await;
        }
        Scenario::AsyncCircuitBreaker => {
            let policy = Policy::wrap(
                retry_forever(demo, transient(), demo.settings.wait)?,
                CircuitBreakerPolicy::new(
                    transient(),
                    CircuitBreakerConfig {
                        failure_threshold: demo.settings.failure_threshold,
                        break_duration: demo.settings.break_duration,
                    },
                )?,
            );
            drive(demo, &policy, Route::UpDown).await;
        }
        Scenario::AsyncBadRequest => {
            let classifier = transient().or_result(|status| *status == Status::BadRequest);
            let policy = retry_forever(demo, classifier, Duration::ZERO)?;
            drive(demo, &policy, Route::BadRequest).await;
        }
        blocking => bail!("{} is a blocking scenario", blocking.name()),
    }
    Ok(())
}

async fn no_policy(demo: &Demo) {
    for i in 1..=demo.settings.requests {
        let response = demo.endpoint.get(Route::Intermittent).await;
        debug!(request = i, response = ?response, "Request finished");
        record_response(&demo.tally, &response.map_err(Into::into));
    }
}

fn retry_forever(
    demo: &Demo,
    classifier: Classifier<Status, TransportError>,
    wait: Duration,
) -> Result<HttpPolicy> {
    let backoff = if wait.is_zero() {
        Backoff::Immediate
    } else {
        Backoff::Fixed(wait)
    };
    Ok(RetryPolicy::new(classifier, RetryConfig::forever(backoff))?
        .on_retry(retry_observer(demo.tally.clone()))
        .into())
}

async fn drive(demo: &Demo, policy: &HttpPolicy, route: Route) {
    for i in 1..=demo.settings.requests {
        let response = policy.execute_async(|| demo.endpoint.get(route)).await;
        debug!(request = i, response = ?response, "Request finished");
        record_response(&demo.tally, &response);
    }
}

/// Only a 200 is a success.
fn record_response(tally: &Tally, response: &Outcome<Status, TransportError>) {
    match response {
        Ok(Status::Ok) => tally.record_success(),
        Ok(_) => tally.record_fail(),
        Err(_) => tally.record_outcome(response),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::SimulatedEndpoint;
    use crate::scenarios::{build_registry, Settings};
    use crate::service::UnreliableService;
    use std::sync::Arc;

    fn demo(requests: u32) -> Demo {
        let tally = Arc::new(Tally::new());
        let registry = build_registry(&tally, None).unwrap();
        Demo {
            settings: Settings {
                requests,
                wait: Duration::from_millis(1),
                failure_threshold: 2,
                break_duration: Duration::from_millis(10),
            },
            tally,
            registry,
            service: Arc::new(UnreliableService::new(Duration::ZERO, Duration::from_millis(20))),
            endpoint: Arc::new(SimulatedEndpoint::new(Duration::ZERO, Duration::from_millis(20))),
        }
    }

    #[tokio::test]
    async fn no_policy_counts_error_statuses_as_failures() {
        let d = demo(6);
        run(Scenario::AsyncNoPolicy, &d).await.unwrap();
        let snap = d.tally.snapshot();
        assert_eq!((snap.success, snap.fail), (2, 4));
    }

    #[tokio::test]
    async fn retry_forever_retries_server_errors() {
        let d = demo(3);
        run(Scenario::AsyncRetryForever, &d).await.unwrap();
        let snap = d.tally.snapshot();
        assert_eq!((snap.success, snap.fail), (3, 6));
        assert_eq!(d.endpoint.request_count(), 9);
    }

    #[tokio::test]
    async fn bad_request_is_retried_only_when_classified() {
        let d = demo(2);
        run(Scenario::AsyncBadRequest, &d).await.unwrap();
        assert_eq!(d.tally.snapshot().success, 2);

        // Without the result predicate a 400 is returned as-is.
        let d = demo(1);
        let policy = retry_forever(&d, transient(), Duration::ZERO).unwrap();
        drive(&d, &policy, Route::BadRequest).await;
        let snap = d.tally.snapshot();
        assert_eq!((snap.success, snap.fail), (0, 1));
        assert_eq!(d.endpoint.request_count(), 1);
    }

    #[tokio::test]
    async fn circuit_breaker_eventually_lets_requests_through() {
        let d = demo(2);
        run(Scenario::AsyncCircuitBreaker, &d).await.unwrap();
        let snap = d.tally.snapshot();
        assert_eq!(snap.success, 2);
        assert_eq!(snap.fail + snap.success, d.endpoint.request_count());
    }

    #[tokio::test]
    async fn blocking_scenarios_are_refused() {
        let d = demo(1);
        assert!(run(Scenario::NoPolicy, &d).await.is_err());
    }
}
