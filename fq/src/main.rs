//! fq - FetchQueue command-line entry point
//!
//! Exercises the scheduler with synthetic load and inspects configuration.

use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result, eyre};
use tracing::{debug, info};

use fetchqueue::cli::{Cli, Command, OutputFormat};
use fetchqueue::config::Config;
use fetchqueue::limiter::{ProviderClassifier, RatePolicy};
use fetchqueue::priority::Priority;
use fetchqueue::simulate::{self, SimulationPlan, SimulationReport};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) {
    // Determine log level with priority: CLI --log-level > config file > default (WARN)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to WARN", s);
                tracing::Level::WARN
            }
        },
        None => tracing::Level::WARN,
    };

    // stdout carries command output, so logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref());

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Simulate {
            key_prefix,
            requests,
            latency_ms,
            fail_rate,
            priority,
            format,
        } => {
            debug!("main: matched Simulate command");
            let plan = SimulationPlan {
                key_prefix,
                requests,
                latency: Duration::from_millis(latency_ms),
                fail_rate,
                priority: priority.parse::<Priority>().map_err(|e| eyre!("Invalid priority: {}", e))?,
            };
            cmd_simulate(&config, &plan, format).await
        }
        Command::Classify { key } => {
            debug!(%key, "main: matched Classify command");
            cmd_classify(&config, &key)
        }
        Command::Config => {
            debug!("main: matched Config command");
            cmd_config(&config)
        }
    }
}

async fn cmd_simulate(config: &Config, plan: &SimulationPlan, format: OutputFormat) -> Result<()> {
    debug!(?plan, %format, "cmd_simulate: called");
    if !(0.0..=1.0).contains(&plan.fail_rate) {
        return Err(eyre!("--fail-rate must be between 0.0 and 1.0, got {}", plan.fail_rate));
    }

    let scheduler = config.build_scheduler()?;
    let report = simulate::run(&scheduler, plan).await;
    scheduler.shutdown();

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report).context("Failed to serialize report")?);
        }
        OutputFormat::Text => print_report(&report),
    }
    Ok(())
}

fn print_report(report: &SimulationReport) {
    println!("{}", "Simulation".bold());
    println!();
    for record in &report.requests {
        let started = if record.attempts_ms.is_empty() {
            "-".to_string()
        } else {
            record
                .attempts_ms
                .iter()
                .map(|ms| format!("+{}ms", ms))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let outcome = if record.outcome == "ok" {
            record.outcome.green()
        } else {
            record.outcome.red()
        };
        println!("  {:<24} {:<20} {}", record.key, started, outcome);
    }

    println!();
    println!(
        "{} succeeded, {} failed, {} rejected in {}ms",
        report.succeeded.to_string().green(),
        report.failed.to_string().red(),
        report.rejected.to_string().yellow(),
        report.elapsed_ms
    );
    let stats = &report.final_state.stats;
    println!(
        "peak concurrent: {}, peak queue depth: {}, total queue wait: {}ms",
        stats.peak_concurrent, stats.peak_queue_depth, stats.total_wait_time_ms
    );
}

fn cmd_classify(config: &Config, key: &str) -> Result<()> {
    debug!(%key, "cmd_classify: called");
    let classifier = config.classifier()?;
    match classifier.classify(key) {
        RatePolicy::Unthrottled => {
            println!("{}: {}", key, "unthrottled".green());
        }
        RatePolicy::Throttled {
            provider,
            rate_per_second,
            capacity,
        } => {
            println!(
                "{}: {} ({} req/s, burst {})",
                key,
                provider.yellow(),
                rate_per_second,
                capacity
            );
        }
    }
    Ok(())
}

fn cmd_config(config: &Config) -> Result<()> {
    debug!("cmd_config: called");
    let yaml = serde_yaml::to_string(config).context("Failed to serialize config")?;
    print!("{}", yaml);
    Ok(())
}
