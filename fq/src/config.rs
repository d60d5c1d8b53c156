//! FetchQueue configuration types and loading

use eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::limiter::{PrefixClassifier, ProviderConfig};
use crate::scheduler::{Scheduler, SchedulerConfig};

/// Main FetchQueue configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Scheduler limits, lanes, retry and cache settings
    pub scheduler: SchedulerConfig,

    /// Rate-limited providers; keys of any other provider are unthrottled
    pub providers: Vec<ProviderConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: None,
            scheduler: SchedulerConfig::default(),
            providers: vec![ProviderConfig::new("BITUNIX", 10.0)],
        }
    }
}

impl Config {
    /// Validate configuration before use
    ///
    /// Call this early in startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<()> {
        self.scheduler
            .validate()
            .map_err(|e| eyre!("Invalid scheduler config: {}", e))?;
        PrefixClassifier::new(&self.providers).context("Invalid provider config")?;
        Ok(())
    }

    /// Build the classifier described by `providers`
    pub fn classifier(&self) -> Result<PrefixClassifier> {
        PrefixClassifier::new(&self.providers).context("Invalid provider config")
    }

    /// Build a scheduler from this configuration
    pub fn build_scheduler(&self) -> Result<Scheduler> {
        self.validate()?;
        Scheduler::new(self.scheduler.clone(), Arc::new(self.classifier()?)).context("Failed to build scheduler")
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .fetchqueue.yml
        let local_config = PathBuf::from(".fetchqueue.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/fetchqueue/fetchqueue.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("fetchqueue").join("fetchqueue.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is initialized
    ///
    /// Errors are swallowed; the full load reports them once logging is up.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let path = match config_path {
            Some(path) => path.clone(),
            None => {
                let local = PathBuf::from(".fetchqueue.yml");
                if local.exists() {
                    local
                } else {
                    dirs::config_dir()?.join("fetchqueue").join("fetchqueue.yml")
                }
            }
        };
        let content = fs::read_to_string(path).ok()?;
        let config: Self = serde_yaml::from_str(&content).ok()?;
        config.log_level
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::executor::BackoffStrategy;
    use crate::priority::Priority;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.scheduler.max_concurrent, 8);
        assert_eq!(config.scheduler.max_queue_size, 100);
        assert_eq!(config.providers, vec![ProviderConfig::new("BITUNIX", 10.0)]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
log-level: debug

scheduler:
  max-concurrent: 4
  max-queue-size: 50
  lanes: [high, normal, background]
  timeout-ms: 5000
  retry:
    max-retries: 3
    backoff-ms: 500
    strategy: exponential
  cache-ttl-ms: 2000

providers:
  - prefix: BITUNIX
    rate-per-second: 5
    burst: 1
  - prefix: BITGET
    rate-per-second: 20
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.scheduler.max_concurrent, 4);
        assert_eq!(config.scheduler.max_queue_size, 50);
        assert_eq!(config.scheduler.lanes[2], Priority::named("background"));
        assert_eq!(config.scheduler.retry.max_retries, 3);
        assert_eq!(config.scheduler.retry.strategy, BackoffStrategy::Exponential);
        assert_eq!(config.scheduler.cache_ttl_ms, Some(2000));
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.providers[0].burst, Some(1.0));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
scheduler:
  max-concurrent: 2
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        // Specified value
        assert_eq!(config.scheduler.max_concurrent, 2);

        // Defaults for unspecified
        assert_eq!(config.scheduler.max_queue_size, 100);
        assert_eq!(config.scheduler.timeout_ms, 10_000);
        assert_eq!(config.providers, vec![ProviderConfig::new("BITUNIX", 10.0)]);
    }

    #[test]
    fn test_validate_rejects_bad_provider() {
        let config = Config {
            providers: vec![ProviderConfig::new("BITUNIX", -1.0)],
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(config.build_scheduler().is_err());
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fq.yml");
        fs::write(&path, "log-level: trace\nscheduler:\n  max-concurrent: 3\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.scheduler.max_concurrent, 3);
        assert_eq!(Config::load_log_level(Some(&path)).as_deref(), Some("trace"));
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.yml");
        assert!(Config::load(Some(&path)).is_err());
        assert_eq!(Config::load_log_level(Some(&path)), None);
    }

    #[test]
    fn test_roundtrip_yaml() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, config);
    }
}
