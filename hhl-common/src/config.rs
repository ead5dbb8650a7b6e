//! Configuration loading and config file resolution
//!
//! Bootstrap configuration comes from a TOML file. Every key is optional and
//! falls back to a compiled default, so a missing file still yields a usable
//! configuration. Command-line flags override file values at the call site.
//!
//! **Config file priority:**
//! 1. Command-line argument (highest priority)
//! 2. `HHL_CONFIG` environment variable
//! 3. Platform config directory (`~/.config/hhl/config.toml` on Linux)
//! 4. Compiled defaults (no file)

use crate::completion::TimestampBounds;
use crate::time::default_platform_epoch;
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "HHL_CONFIG";

/// Token variables checked in priority order
pub const HUBSPOT_TOKEN_ENV_VARS: [&str; 3] = [
    "HUBSPOT_PROJECT_ACCESS_TOKEN",
    "HUBSPOT_API_TOKEN",
    "HUBSPOT_PRIVATE_APP_TOKEN",
];

/// Top-level configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HhlConfig {
    /// Directory holding `courses/` and `pathways/` definitions
    #[serde(default = "default_content_dir")]
    pub content_dir: PathBuf,

    /// Where backfill artifacts are written
    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub backfill: BatchConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub timestamps: TimestampConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for HhlConfig {
    fn default() -> Self {
        Self {
            content_dir: default_content_dir(),
            report_dir: default_report_dir(),
            store: StoreConfig::default(),
            backfill: BatchConfig::default(),
            retry: RetryConfig::default(),
            timestamps: TimestampConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Which progress store backs the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Hubspot,
    Sqlite,
}

/// Progress store configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    #[serde(default = "default_store_kind")]
    pub kind: StoreKind,

    /// SQLite database file (`kind = "sqlite"`)
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// CRM API base URL (`kind = "hubspot"`)
    #[serde(default = "default_hubspot_base_url")]
    pub hubspot_base_url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: default_store_kind(),
            database_path: default_database_path(),
            hubspot_base_url: default_hubspot_base_url(),
        }
    }
}

/// Batch sizing for the backfill
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Learners processed concurrently within a batch
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
        }
    }
}

/// Retry budget for external store calls
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Per-attempt timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Largest accepted future clock skew (one day)
pub const MAX_SKEW_TOLERANCE_SECS: i64 = 86_400;

/// Completion timestamp plausibility window
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimestampConfig {
    #[serde(default = "default_skew_tolerance_secs")]
    pub skew_tolerance_secs: i64,
    #[serde(default = "default_platform_epoch")]
    pub platform_epoch: DateTime<Utc>,
}

impl Default for TimestampConfig {
    fn default() -> Self {
        Self {
            skew_tolerance_secs: default_skew_tolerance_secs(),
            platform_epoch: default_platform_epoch(),
        }
    }
}

impl TimestampConfig {
    pub fn bounds(&self) -> TimestampBounds {
        TimestampBounds {
            skew_tolerance: Duration::seconds(
                self.skew_tolerance_secs.clamp(0, MAX_SKEW_TOLERANCE_SECS),
            ),
            platform_epoch: self.platform_epoch,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_content_dir() -> PathBuf {
    PathBuf::from("content")
}

fn default_report_dir() -> PathBuf {
    PathBuf::from("verification-output/completion-backfill")
}

fn default_store_kind() -> StoreKind {
    StoreKind::Hubspot
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("hhl").join("progress.db"))
        .unwrap_or_else(|| PathBuf::from("./hhl_data/progress.db"))
}

fn default_hubspot_base_url() -> String {
    "https://api.hubapi.com".to_string()
}

fn default_batch_size() -> usize {
    50
}

fn default_concurrency() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    5000
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_skew_tolerance_secs() -> i64 {
    crate::completion::validator::DEFAULT_SKEW_TOLERANCE_SECS
}

fn default_log_level() -> String {
    "info".to_string()
}

impl HhlConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)
            .map_err(|e| Error::Configuration(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read config {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Resolve and load configuration
    ///
    /// An explicitly named file (argument or environment) must exist and
    /// parse. The platform default location is optional; when it is absent
    /// compiled defaults are used.
    pub fn resolve(cli_arg: Option<&Path>) -> Result<Self> {
        if let Some(path) = cli_arg {
            info!(config = %path.display(), "Loading config from command line");
            return Self::load(path);
        }

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            if !path.trim().is_empty() {
                info!(config = %path, "Loading config from {}", CONFIG_ENV_VAR);
                return Self::load(Path::new(&path));
            }
        }

        match default_config_path() {
            Some(path) if path.exists() => {
                info!(config = %path.display(), "Loading config from platform directory");
                Self::load(&path)
            }
            _ => {
                warn!("No config file found, using compiled defaults");
                Ok(Self::default())
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.backfill.batch_size == 0 {
            return Err(Error::Configuration("backfill.batch_size must be at least 1".to_string()));
        }
        if self.backfill.concurrency == 0 {
            return Err(Error::Configuration("backfill.concurrency must be at least 1".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Configuration("retry.max_attempts must be at least 1".to_string()));
        }
        if !(0..=MAX_SKEW_TOLERANCE_SECS).contains(&self.timestamps.skew_tolerance_secs) {
            return Err(Error::Configuration(format!(
                "timestamps.skew_tolerance_secs must be between 0 and {}",
                MAX_SKEW_TOLERANCE_SECS
            )));
        }
        Ok(())
    }
}

/// Platform config file location
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("hhl").join("config.toml"))
}

/// CRM access token from the environment, first non-empty variable wins
pub fn hubspot_token_from_env() -> Result<String> {
    HUBSPOT_TOKEN_ENV_VARS
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|value| !value.trim().is_empty())
        .ok_or_else(|| {
            Error::Configuration(format!(
                "No HubSpot access token available. Set one of {}",
                HUBSPOT_TOKEN_ENV_VARS.join(", ")
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_yields_defaults() {
        let config = HhlConfig::from_toml_str("").unwrap();
        assert_eq!(config.backfill.batch_size, 50);
        assert_eq!(config.backfill.concurrency, 4);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.store.kind, StoreKind::Hubspot);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.timestamps.platform_epoch, default_platform_epoch());
    }

    #[test]
    fn test_partial_sections_merge_with_defaults() {
        let config = HhlConfig::from_toml_str(
            r#"
            content_dir = "/srv/content"

            [store]
            kind = "sqlite"
            database_path = "/tmp/progress.db"

            [retry]
            max_attempts = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.content_dir, PathBuf::from("/srv/content"));
        assert_eq!(config.store.kind, StoreKind::Sqlite);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.timeout_ms, 30_000);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let err = HhlConfig::from_toml_str("[backfill]\nbatch_size = 0\n").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(HhlConfig::from_toml_str("batchsize = 10\n").is_err());
    }

    #[test]
    fn test_timestamp_bounds_from_config() {
        let config = HhlConfig::from_toml_str(
            "[timestamps]\nskew_tolerance_secs = 60\nplatform_epoch = \"2024-06-01T00:00:00Z\"\n",
        )
        .unwrap();
        let bounds = config.timestamps.bounds();
        assert_eq!(bounds.skew_tolerance, Duration::seconds(60));
        assert_eq!(bounds.platform_epoch.to_rfc3339(), "2024-06-01T00:00:00+00:00");
    }

    #[test]
    fn test_oversized_skew_tolerance_rejected() {
        let err = HhlConfig::from_toml_str("[timestamps]\nskew_tolerance_secs = 9223372036854775807\n")
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));

        let err = HhlConfig::from_toml_str("[timestamps]\nskew_tolerance_secs = -1\n").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_bounds_clamp_unvalidated_skew() {
        let config = TimestampConfig {
            skew_tolerance_secs: i64::MAX,
            platform_epoch: default_platform_epoch(),
        };
        assert_eq!(
            config.bounds().skew_tolerance,
            Duration::seconds(MAX_SKEW_TOLERANCE_SECS)
        );
    }
}
