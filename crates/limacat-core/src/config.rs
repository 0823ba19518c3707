use limacat_api::RetryConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Tunables for a catalog run
///
/// Loaded from an optional TOML file. Anything not in the file gets the
/// default, and a missing file means all defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub pacing: PacingConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

impl Config {
    /// Load config from `path`, or defaults if the file doesn't exist
    pub fn load(path: &Path) -> crate::Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&contents)
                .map_err(|e| crate::Error::ConfigError(format!("Failed to parse config: {}", e)))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Reject values that don't make sense as day/hour counts or percentages
    pub fn validate(&self) -> crate::Result<()> {
        let refresh = &self.refresh;
        if !(0..=MAX_STALE_AFTER_DAYS).contains(&refresh.stale_after_days) {
            return Err(crate::Error::ConfigError(format!(
                "refresh.stale_after_days must be between 0 and {}, got {}",
                MAX_STALE_AFTER_DAYS, refresh.stale_after_days
            )));
        }
        if refresh.refresh_percent > 100 {
            return Err(crate::Error::ConfigError(format!(
                "refresh.refresh_percent must be at most 100, got {}",
                refresh.refresh_percent
            )));
        }
        if !(0..=MAX_LOOKBACK_HOURS).contains(&self.discovery.lookback_hours) {
            return Err(crate::Error::ConfigError(format!(
                "discovery.lookback_hours must be between 0 and {}, got {}",
                MAX_LOOKBACK_HOURS, self.discovery.lookback_hours
            )));
        }
        Ok(())
    }
}

const MAX_STALE_AFTER_DAYS: i64 = 3650;
const MAX_LOOKBACK_HOURS: i64 = 24 * 365;

/// Delays between API calls
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PacingConfig {
    /// Between search result pages. Search allows 30 requests/minute
    #[serde(default = "default_page_delay")]
    pub page_delay_ms: u64,

    /// Between search query variants
    #[serde(default = "default_query_delay")]
    pub query_delay_ms: u64,

    /// Between repository/organization fetches
    #[serde(default = "default_fetch_delay")]
    pub metadata_delay_ms: u64,

    /// Between template downloads during analysis
    #[serde(default = "default_fetch_delay")]
    pub analysis_delay_ms: u64,

    /// Added on top of the rate limit reset time before retrying
    #[serde(default = "default_rate_limit_buffer")]
    pub rate_limit_buffer_secs: u64,

    /// How many rate-limit windows a single request may sit out
    #[serde(default = "default_max_rate_limit_waits")]
    pub max_rate_limit_waits: u32,
}

fn default_page_delay() -> u64 {
    3000 // 20 requests/minute, comfortably under the ceiling
}

fn default_query_delay() -> u64 {
    5000
}

fn default_fetch_delay() -> u64 {
    500
}

fn default_rate_limit_buffer() -> u64 {
    5
}

fn default_max_rate_limit_waits() -> u32 {
    3
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            page_delay_ms: default_page_delay(),
            query_delay_ms: default_query_delay(),
            metadata_delay_ms: default_fetch_delay(),
            analysis_delay_ms: default_fetch_delay(),
            rate_limit_buffer_secs: default_rate_limit_buffer(),
            max_rate_limit_waits: default_max_rate_limit_waits(),
        }
    }
}

impl PacingConfig {
    /// No sleeping at all - for tests and mock servers
    pub fn none() -> Self {
        Self {
            page_delay_ms: 0,
            query_delay_ms: 0,
            metadata_delay_ms: 0,
            analysis_delay_ms: 0,
            rate_limit_buffer_secs: 0,
            max_rate_limit_waits: default_max_rate_limit_waits(),
        }
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    pub fn query_delay(&self) -> Duration {
        Duration::from_millis(self.query_delay_ms)
    }

    pub fn metadata_delay(&self) -> Duration {
        Duration::from_millis(self.metadata_delay_ms)
    }

    pub fn analysis_delay(&self) -> Duration {
        Duration::from_millis(self.analysis_delay_ms)
    }

    pub fn rate_limit_buffer(&self) -> Duration {
        Duration::from_secs(self.rate_limit_buffer_secs)
    }

    /// Rate-limit handling for the API client
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_waits: self.max_rate_limit_waits,
            buffer: self.rate_limit_buffer(),
        }
    }
}

/// How stale repository/organization metadata gets refreshed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefreshConfig {
    /// Entries older than this are candidates for a refresh
    #[serde(default = "default_stale_after_days")]
    pub stale_after_days: i64,

    /// Per-run refresh budget as a percentage of the snapshot size
    #[serde(default = "default_refresh_percent")]
    pub refresh_percent: u32,
}

fn default_stale_after_days() -> i64 {
    30
}

fn default_refresh_percent() -> u32 {
    5 // everything gets refreshed within ~20 runs
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            stale_after_days: default_stale_after_days(),
            refresh_percent: default_refresh_percent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveryConfig {
    /// Incremental searches start this far before the newest known template
    #[serde(default = "default_lookback_hours")]
    pub lookback_hours: i64,

    /// Refuse to start below this many core API calls
    #[serde(default = "default_min_core_remaining")]
    pub min_core_remaining: u32,

    /// Refuse to start below this many search API calls
    #[serde(default = "default_min_search_remaining")]
    pub min_search_remaining: u32,
}

fn default_lookback_hours() -> i64 {
    24
}

fn default_min_core_remaining() -> u32 {
    100
}

fn default_min_search_remaining() -> u32 {
    5
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            lookback_hours: default_lookback_hours(),
            min_core_remaining: default_min_core_remaining(),
            min_search_remaining: default_min_search_remaining(),
        }
    }
}

/// Per-invocation switches, from flags or the environment
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    pub data_dir: PathBuf,
    /// Merge into the existing snapshot instead of resuming by phase
    pub incremental: bool,
    /// Run the template analysis phase
    pub analyze: bool,
    /// Key for description enhancement, not used for anything yet
    pub llm_api_key: Option<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            incremental: false,
            analyze: false,
            llm_api_key: None,
        }
    }
}
