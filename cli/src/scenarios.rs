//! Demo scenarios: each drives `requests` calls through one policy setup
//! and tallies every attempt.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::ValueEnum;
use resilix_core::{
    Backoff, CircuitBreakerConfig, CircuitBreakerPolicy, Classifier, FallbackPolicy, Outcome,
    Policy, PolicyRegistry, RegistryConfig, RetryConfig, RetryPolicy,
};
use resilix_observability::{retry_observer, Tally};
use tracing::{debug, info, warn};

use crate::endpoint::Endpoint;
use crate::http_scenarios;
use crate::service::{ServiceError, UnreliableService};

/// Registry key of the retry policy every `registry` run looks up.
pub const DEFAULT_RETRY: &str = "DefaultRetry";
/// Registry key that is never registered.
pub const MISSING: &str = "missing";
/// Returned by the fallback instead of a real response.
pub const FALLBACK_VALUE: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    NoPolicy,
    RetryForever,
    RetryForeverLogged,
    WaitAndRetry,
    WaitAndRetryEscalating,
    RetryWithFallback,
    CircuitBreaker,
    Registry,
    RegistryMissing,
    AsyncNoPolicy,
    AsyncRetryForever,
    AsyncCircuitBreaker,
    AsyncBadRequest,
}

impl Scenario {
    pub fn about(self) -> &'static str {
        match self {
            Self::NoPolicy => "call the mostly-bad service directly",
            Self::RetryForever => "retry forever; failures go uncounted",
            Self::RetryForeverLogged => "retry forever, counting each retried failure",
            Self::WaitAndRetry => "retry forever with a fixed wait",
            Self::WaitAndRetryEscalating => "retry forever with a linearly growing wait",
            Self::RetryWithFallback => "two attempts, then fall back to -1",
            Self::CircuitBreaker => "retry over a circuit breaker against a flapping service",
            Self::Registry => "run the DefaultRetry policy looked up from the registry",
            Self::RegistryMissing => "look up an unregistered key and run without a policy",
            Self::AsyncNoPolicy => "call the intermittent endpoint directly",
            Self::AsyncRetryForever => "retry transient HTTP statuses forever",
            Self::AsyncCircuitBreaker => "retry over a circuit breaker against a flapping endpoint",
            Self::AsyncBadRequest => "also retry 400 Bad Request responses",
        }
    }

    pub fn is_async(self) -> bool {
        matches!(
            self,
            Self::AsyncNoPolicy
                | Self::AsyncRetryForever
                | Self::AsyncCircuitBreaker
                | Self::AsyncBadRequest
        )
    }

    pub fn name(self) -> String {
        self.to_possible_value()
            .map(|v| v.get_name().to_string())
            .unwrap_or_else(|| format!("{self:?}"))
    }
}

/// Knobs shared by every scenario.
#[derive(Debug, Clone)]
pub struct Settings {
    pub requests: u32,
    /// Wait between retries (base of the escalating schedule).
    pub wait: Duration,
    pub failure_threshold: u32,
    pub break_duration: Duration,
}

/// Everything a scenario runs against.
pub struct Demo {
    pub settings: Settings,
    pub tally: Arc<Tally>,
    pub registry: PolicyRegistry,
    pub service: Arc<UnreliableService>,
    pub endpoint: Arc<dyn Endpoint>,
}

impl Demo {
    /// Requests sent to the simulated dependency by the scenario.
    pub fn dependency_requests(&self, scenario: Scenario) -> u64 {
        if scenario.is_async() {
            self.endpoint.request_count()
        } else {
            self.service.request_count()
        }
    }
}

/// Policies shared through the registry. `config` entries are loaded after
/// the built-in ones and replace them on key collisions.
pub fn build_registry(
    tally: &Arc<Tally>,
    config: Option<&RegistryConfig>,
) -> Result<PolicyRegistry> {
    let registry = PolicyRegistry::new();
    registry.register(
        DEFAULT_RETRY,
        RetryPolicy::<i64, ServiceError>::forever(Classifier::handle_all())
            .on_retry(retry_observer(tally.clone())),
    );
    if let Some(config) = config {
        let loaded = registry
            .load_config(config, &Classifier::<i64, ServiceError>::handle_all())
            .context("loading policies from config")?;
        info!(loaded, keys = ?registry.keys(), "Loaded policies from config");
    }
    Ok(registry)
}

pub async fn run(scenario: Scenario, demo: Arc<Demo>) -> Result<()> {
    info!(scenario = %scenario.name(), requests = demo.settings.requests, "Running scenario");
    if scenario.is_async() {
        return http_scenarios::run(scenario, &demo).await;
    }
    tokio::task::spawn_blocking(move || run_blocking(scenario, &demo))
        .await
        .context("scenario thread panicked")?
}

fn run_blocking(scenario: Scenario, demo: &Demo) -> Result<()> {
    match scenario {
        Scenario::NoPolicy => no_policy(demo),
        Scenario::RetryForever => {
            let policy = RetryPolicy::forever(Classifier::handle_all());
            drive(demo, &policy.into(), |i| demo.service.mostly_bad(i));
        }
        Scenario::RetryForeverLogged => {
            let policy = RetryPolicy::forever(Classifier::handle_all())
                .on_retry(retry_observer(demo.tally.clone()));
            drive(demo, &policy.into(), |i| demo.service.mostly_bad(i));
        }
        Scenario::WaitAndRetry => {
            let backoff = Backoff::Fixed(demo.settings.wait);
            let policy = logged_retry(demo, RetryConfig::forever(backoff))?;
            drive(demo, &policy, |i| demo.service.mostly_bad(i));
        }
        Scenario::WaitAndRetryEscalating => {
            let backoff = Backoff::Linear {
                base: demo.settings.wait,
            };
            let policy = logged_retry(demo, RetryConfig::forever(backoff))?;
            drive(demo, &policy, |i| demo.service.mostly_bad(i));
        }
        Scenario::RetryWithFallback => {
            let backoff = Backoff::Fixed(demo.settings.wait);
            let retry = logged_retry(demo, RetryConfig::attempts(2, backoff))?;
            let fallback = FallbackPolicy::value(Classifier::handle_all(), FALLBACK_VALUE);
            let policy = Policy::wrap_all([fallback.into(), retry])?;
            drive(demo, &policy, |i| demo.service.mostly_bad(i));
        }
        Scenario::CircuitBreaker => {
            let policy = retry_over_breaker(demo)?;
            drive(demo, &policy, |i| demo.service.up_and_down(i));
        }
        Scenario::Registry => {
            let policy = demo
                .registry
                .lookup::<i64, ServiceError>(DEFAULT_RETRY)
                .context("registry scenario needs a DefaultRetry policy")?;
            drive(demo, &policy, |i| demo.service.mostly_bad(i));
        }
        Scenario::RegistryMissing => {
            if !demo.registry.contains_key(MISSING) {
                warn!(key = MISSING, "No policy registered, running without one");
            }
            let policy = demo
                .registry
                .get_or_noop::<i64, ServiceError>(MISSING)
                .context("registry-missing scenario")?;
            drive(demo, &policy, |i| demo.service.mostly_bad(i));
        }
        async_scenario => anyhow::bail!("{} must run on the async runtime", async_scenario.name()),
    }
    Ok(())
}

fn no_policy(demo: &Demo) {
    for i in 1..=i64::from(demo.settings.requests) {
        match demo.service.mostly_bad(i) {
            Ok(_) => demo.tally.record_success(),
            Err(e) => {
                debug!(request = i, error = %e, "Request failed");
                demo.tally.record_fail();
            }
        }
    }
}

fn logged_retry(demo: &Demo, config: RetryConfig) -> Result<Policy<i64, ServiceError>> {
    Ok(RetryPolicy::new(Classifier::handle_all(), config)?
        .on_retry(retry_observer(demo.tally.clone()))
        .into())
}

fn retry_over_breaker(demo: &Demo) -> Result<Policy<i64, ServiceError>> {
    let config = RetryConfig::forever(Backoff::Fixed(demo.settings.wait));
    let retry = RetryPolicy::new(Classifier::handle_all(), config)?
        .on_retry(retry_observer(demo.tally.clone()));
    let breaker = CircuitBreakerPolicy::new(
        Classifier::handle_all(),
        CircuitBreakerConfig {
            failure_threshold: demo.settings.failure_threshold,
            break_duration: demo.settings.break_duration,
        },
    )?;
    Ok(Policy::wrap(retry, breaker))
}

/// Send every request through `policy` and count the final response.
fn drive<F>(demo: &Demo, policy: &Policy<i64, ServiceError>, call: F)
where
    F: Fn(i64) -> Result<i64, ServiceError>,
{
    for i in 1..=i64::from(demo.settings.requests) {
        let response = policy.execute(|| call(i));
        record_response(&demo.tally, i, &response);
        debug!(request = i, response = ?response, "Request finished");
    }
}

/// A response equal to the request value is a success; anything else (the
/// fallback value, a surfaced failure) counts against the attempt.
pub fn record_response(tally: &Tally, request: i64, response: &Outcome<i64, ServiceError>) {
    match response {
        Ok(value) if *value == request => tally.record_success(),
        Ok(_) => tally.record_fail(),
        Err(_) => tally.record_outcome(response),
    }
}
