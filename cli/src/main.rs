//! Resilix CLI: run resilience policy scenarios against simulated services.
//!
//! # Commands
//! ```text
//! resilix run <scenario> [--requests N] [--wait-ms MS] [--config FILE] [--json-logs]
//! resilix scenarios
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use resilix_core::RegistryConfig;
use resilix_observability::{init_tracing, LogConfig, Tally};
use serde::Deserialize;

mod endpoint;
mod http_scenarios;
mod scenarios;
mod service;

use endpoint::SimulatedEndpoint;
use scenarios::{Demo, Scenario, Settings};
use service::UnreliableService;

#[derive(Parser)]
#[command(
    name = "resilix",
    about = "Resilience policy playground (Resilix CLI)",
    long_about = "
Resilix CLI: drive simulated unreliable services through retry, circuit
breaker, fallback and registry-backed policies, then print how many attempts
succeeded, failed or were skipped by an open circuit.

ENVIRONMENT VARIABLES:
  RUST_LOG    Log filter, overrides the config file (e.g. resilix_core=debug)
",
    version
)]
struct Cli {
    /// JSON config file with `log` and `policies` sections
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit JSON structured logs
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one scenario and print the attempt summary
    Run {
        #[arg(value_enum)]
        scenario: Scenario,
        /// Number of requests to send
        #[arg(long, default_value_t = 20)]
        requests: u32,
        /// Wait between retries in milliseconds
        #[arg(long, default_value_t = 100)]
        wait_ms: u64,
        /// Simulated service latency per request in milliseconds
        #[arg(long, default_value_t = 100)]
        latency_ms: u64,
        /// Length of each down/up window of the flapping service
        #[arg(long, default_value_t = 2_000)]
        flap_ms: u64,
        /// Consecutive failures that open the circuit
        #[arg(long, default_value_t = 3)]
        threshold: u32,
        /// How long the circuit stays open in milliseconds
        #[arg(long, default_value_t = 1_000)]
        break_ms: u64,
    },

    /// List available scenarios
    Scenarios,
}

/// Config file layout.
#[derive(Debug, Default, Deserialize)]
struct CliConfig {
    #[serde(default)]
    log: LogConfig,
    #[serde(flatten)]
    registry: RegistryConfig,
}

fn load_config(path: Option<&Path>) -> Result<CliConfig> {
    let Some(path) = path else {
        return Ok(CliConfig::default());
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing config {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;
    if cli.json_logs {
        config.log.json = true;
    }
    init_tracing(&config.log).context("installing log subscriber")?;

    match cli.command {
        Commands::Run {
            scenario,
            requests,
            wait_ms,
            latency_ms,
            flap_ms,
            threshold,
            break_ms,
        } => {
            let settings = Settings {
                requests,
                wait: Duration::from_millis(wait_ms),
                failure_threshold: threshold,
                break_duration: Duration::from_millis(break_ms),
            };
            let latency = Duration::from_millis(latency_ms);
            let flap = Duration::from_millis(flap_ms);
            let tally = Arc::new(Tally::new());
            let policies = (!config.registry.policies.is_empty()).then_some(&config.registry);
            let demo = Arc::new(Demo {
                settings,
                registry: scenarios::build_registry(&tally, policies)?,
                tally,
                service: Arc::new(UnreliableService::new(latency, flap)),
                endpoint: Arc::new(SimulatedEndpoint::new(latency, flap)),
            });
            cmd_run(scenario, demo).await
        }
        Commands::Scenarios => {
            cmd_scenarios();
            Ok(())
        }
    }
}

async fn cmd_run(scenario: Scenario, demo: Arc<Demo>) -> Result<()> {
    let rule = "------------------------------------------------";
    println!("{rule}");
    println!("Resilix scenario: {}", scenario.name());
    println!("{rule}");

    let started = Instant::now();
    scenarios::run(scenario, demo.clone()).await?;
    let runtime = started.elapsed();

    println!("{rule}");
    println!("Runtime:             {runtime:.2?}");
    println!("{}", demo.tally.snapshot());
    println!("Service Requests:    {}", demo.dependency_requests(scenario));
    println!("{rule}");
    Ok(())
}

fn cmd_scenarios() {
    println!("{:<28} {:<6} DESCRIPTION", "SCENARIO", "MODE");
    for scenario in Scenario::value_variants() {
        let mode = if scenario.is_async() { "async" } else { "sync" };
        println!("{:<28} {:<6} {}", scenario.name(), mode, scenario.about());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_run_with_defaults() {
        let cli = Cli::parse_from(["resilix", "run", "circuit-breaker", "--requests", "5"]);
        match cli.command {
            Commands::Run {
                scenario,
                requests,
                wait_ms,
                ..
            } => {
                assert_eq!(scenario, Scenario::CircuitBreaker);
                assert_eq!(requests, 5);
                assert_eq!(wait_ms, 100);
            }
            Commands::Scenarios => panic!("expected run"),
        }
    }

    #[test]
    fn config_file_sections() {
        let config: CliConfig = serde_json::from_str(
            r#"{
                "log": { "level": "debug" },
                "policies": { "DefaultRetry": { "kind": "retry", "max_attempts": 5 } }
            }"#,
        )
        .unwrap();
        assert_eq!(config.log.level, "debug");
        assert!(config.registry.policies.contains_key("DefaultRetry"));
    }

    #[test]
    fn missing_config_path_is_an_error() {
        let err = load_config(Some(Path::new("/nonexistent/resilix.json"))).unwrap_err();
        assert!(err.to_string().contains("reading config"));
    }
}
