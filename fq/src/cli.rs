//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

/// FetchQueue - rate-limited request scheduler for market-data providers
#[derive(Parser)]
#[command(
    name = "fq",
    about = "Rate-limited, deduplicating request scheduler for market-data providers",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Flood the scheduler with synthetic requests and report when each fired
    Simulate {
        /// Key prefix, i.e. the provider the requests go to
        #[arg(short, long, default_value = "BITUNIX")]
        key_prefix: String,

        /// Number of requests to submit
        #[arg(short = 'n', long, default_value = "20")]
        requests: usize,

        /// Time each synthetic call takes, in milliseconds
        #[arg(long, default_value = "50")]
        latency_ms: u64,

        /// Probability (0.0 - 1.0) that an attempt fails with a retryable error
        #[arg(long, default_value = "0.0")]
        fail_rate: f64,

        /// Lane to submit on
        #[arg(short, long, default_value = "normal")]
        priority: String,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show the rate policy that applies to a request key
    Classify {
        /// Request key, e.g. BITUNIX:KLINES:BTCUSDT
        key: String,
    },

    /// Print the effective configuration as YAML
    Config,
}

/// Output format for simulation reports
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => {
                debug!(%s, "OutputFormat::from_str: unknown format");
                Err(format!("Unknown format: {}. Use: text or json", s))
            }
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_simulate_defaults() {
        let cli = Cli::try_parse_from(["fq", "simulate"]).unwrap();
        match cli.command {
            Command::Simulate {
                key_prefix,
                requests,
                latency_ms,
                fail_rate,
                priority,
                format,
            } => {
                assert_eq!(key_prefix, "BITUNIX");
                assert_eq!(requests, 20);
                assert_eq!(latency_ms, 50);
                assert_eq!(fail_rate, 0.0);
                assert_eq!(priority, "normal");
                assert_eq!(format, OutputFormat::Text);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_global_flags() {
        let cli = Cli::try_parse_from(["fq", "classify", "BITGET:X", "--log-level", "debug", "-c", "fq.yml"]).unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert_eq!(cli.config, Some(PathBuf::from("fq.yml")));
        assert!(matches!(cli.command, Command::Classify { key } if key == "BITGET:X"));
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("JSON".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert_eq!("plain".parse::<OutputFormat>(), Ok(OutputFormat::Text));
        assert!("table".parse::<OutputFormat>().is_err());
    }
}
