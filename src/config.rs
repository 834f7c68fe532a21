//! Runtime configuration.
//!
//! Loaded from a JSON file with serde defaults for every field, so an
//! empty or missing file yields a fully usable configuration. The provider
//! API key can always be overridden from the environment, which is how
//! deployments keep it out of the config file.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::MonitorError;
use crate::scoring::ScoringConfig;
use crate::types::Location;

/// Environment variable overriding `provider.apiKey`.
pub const API_KEY_ENV: &str = "ATMOSGUARD_API_KEY";

/// Service configuration, stored as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorConfig {
    /// Where the SQLite store lives.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Rolling history window in days.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    #[serde(default)]
    pub intervals: LoopIntervals,

    /// Pause between per-user units of work within one sweep, to avoid
    /// bursting rate-limited upstream APIs.
    #[serde(default = "default_per_user_delay_ms")]
    pub per_user_delay_ms: u64,

    /// Bound on every external fetch.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// A user whose last check-in is older than this is swept as inactive.
    #[serde(default = "default_inactive_after_secs")]
    pub inactive_after_secs: u64,

    #[serde(default)]
    pub provider: ProviderConfig,

    /// Location used for history requests about users we know nothing about.
    #[serde(default = "default_location")]
    pub default_location: Location,

    #[serde(default)]
    pub scoring: ScoringConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            retention_days: default_retention_days(),
            intervals: LoopIntervals::default(),
            per_user_delay_ms: default_per_user_delay_ms(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            inactive_after_secs: default_inactive_after_secs(),
            provider: ProviderConfig::default(),
            default_location: default_location(),
            scoring: ScoringConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from `path`. A missing file yields defaults; a
    /// present-but-invalid file is a configuration error, not a silent
    /// fallback.
    pub fn load(path: &Path) -> Result<Self, MonitorError> {
        if !path.exists() {
            log::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default().with_env_overrides());
        }
        let content = fs::read_to_string(path)?;
        let config: MonitorConfig = serde_json::from_str(&content)
            .map_err(|e| MonitorError::Configuration(format!("{}: {}", path.display(), e)))?;
        Ok(config.with_env_overrides())
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.is_empty() {
                self.provider.api_key = key;
            }
        }
        self
    }

    /// Path of the SQLite database under the data dir.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("atmosguard.db")
    }

    pub fn fetch_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn per_user_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.per_user_delay_ms)
    }
}

/// Tick intervals for the four scheduler loops, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopIntervals {
    #[serde(default = "default_hourly_secs")]
    pub hourly_secs: u64,
    #[serde(default = "default_daily_secs")]
    pub daily_secs: u64,
    #[serde(default = "default_sweep_secs")]
    pub sweep_secs: u64,
    #[serde(default = "default_cleanup_secs")]
    pub cleanup_secs: u64,
    /// Stagger before the first tick of each loop after startup.
    #[serde(default = "default_startup_delay_secs")]
    pub startup_delay_secs: u64,
}

impl Default for LoopIntervals {
    fn default() -> Self {
        Self {
            hourly_secs: default_hourly_secs(),
            daily_secs: default_daily_secs(),
            sweep_secs: default_sweep_secs(),
            cleanup_secs: default_cleanup_secs(),
            startup_delay_secs: default_startup_delay_secs(),
        }
    }
}

/// Upstream environmental data API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Empty means not configured; fetches fail fast and the estimator
    /// takes over.
    #[serde(default)]
    pub api_key: String,
    /// How long a fetched sample may serve nearby requests.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".atmosguard")
}

fn default_retention_days() -> u32 {
    3
}

fn default_per_user_delay_ms() -> u64 {
    250
}

fn default_fetch_timeout_secs() -> u64 {
    10
}

fn default_inactive_after_secs() -> u64 {
    6 * 60 * 60
}

fn default_hourly_secs() -> u64 {
    60 * 60
}

fn default_daily_secs() -> u64 {
    24 * 60 * 60
}

fn default_sweep_secs() -> u64 {
    6 * 60 * 60
}

fn default_cleanup_secs() -> u64 {
    6 * 60 * 60
}

fn default_startup_delay_secs() -> u64 {
    10
}

fn default_base_url() -> String {
    "https://api.openweathermap.org/data/2.5".to_string()
}

fn default_cache_ttl_secs() -> u64 {
    600
}

fn default_location() -> Location {
    // Manhattan, an arbitrary but dense default for anonymous history
    Location { lat: 40.7128, lon: -74.0060 }
}
