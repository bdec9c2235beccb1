//! Configuration for telemetry-sync
//!
//! - [`SyncConfig`]: engine tunables (freshness windows, TTLs, deep-scan
//!   pacing, enrichment gates), with defaults and `from_env()` overrides
//! - [`Args`]: CLI arguments and environment variables for the host binary

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

// =============================================================================
// Engine tunables
// =============================================================================

const MINUTE_MS: i64 = 60 * 1000;
const DAY_MS: i64 = 24 * 60 * MINUTE_MS;

/// Hanoi city centre, shown until a vehicle reports a position
pub const DEFAULT_LOCATION: (f64, f64) = (21.0285, 105.8542);

/// Tunables for [`crate::SyncEngine`]
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Vehicle cache entries older than this are refetched on switch
    pub cache_ttl_ms: i64,
    /// Cache stamps further than this in the future are treated as stale
    pub cache_future_skew_ms: i64,
    /// Lifetime of a VIN's discovered-address catalog
    pub catalog_ttl_ms: i64,
    /// Storage key for the persisted catalog
    pub catalog_storage_key: String,
    /// Addresses per registration request
    pub deep_scan_batch_size: usize,
    /// Pause between registration batches and between delivery checks
    pub deep_scan_delay: Duration,
    /// Delivery checks after registering
    pub deep_scan_retry_rounds: u32,
    /// Minimum item count for the cached request list and full-telemetry snapshot
    pub deep_scan_min_items: usize,
    /// Fraction of requested addresses that must deliver before escalating
    pub deep_scan_escalation_ratio: f64,
    /// Age after which a full-telemetry snapshot is rescanned
    pub full_telemetry_ttl_ms: i64,
    /// Minimum time between enrichment lookups at the same place
    pub enrich_ttl_ms: i64,
    /// Movement that triggers a new enrichment lookup regardless of age
    pub enrich_distance_m: f64,
    /// Per-lookup timeout for geocode and weather
    pub enrich_timeout: Duration,
    /// Interval of the background refresh of the active vehicle
    pub poll_interval: Duration,
    /// Coordinates shown before a vehicle reports its own
    pub default_location: (f64, f64),
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 5 * MINUTE_MS,
            cache_future_skew_ms: 5 * MINUTE_MS,
            catalog_ttl_ms: 14 * DAY_MS,
            catalog_storage_key: crate::telemetry::CATALOG_STORAGE_KEY.to_string(),
            deep_scan_batch_size: 24,
            deep_scan_delay: Duration::from_millis(700),
            deep_scan_retry_rounds: 3,
            deep_scan_min_items: 200,
            deep_scan_escalation_ratio: 0.6,
            full_telemetry_ttl_ms: 5 * MINUTE_MS,
            enrich_ttl_ms: 3 * MINUTE_MS,
            enrich_distance_m: 500.0,
            enrich_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(60 * 60),
            default_location: DEFAULT_LOCATION,
        }
    }
}

impl SyncConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(secs) = env_parse::<i64>("TELEMETRY_CACHE_TTL_SECS") {
            config.cache_ttl_ms = secs * 1000;
        }
        if let Some(days) = env_parse::<i64>("TELEMETRY_CATALOG_TTL_DAYS") {
            config.catalog_ttl_ms = days * DAY_MS;
        }
        if let Some(size) = env_parse::<usize>("DEEP_SCAN_BATCH_SIZE") {
            config.deep_scan_batch_size = size;
        }
        if let Some(ms) = env_parse::<u64>("DEEP_SCAN_DELAY_MS") {
            config.deep_scan_delay = Duration::from_millis(ms);
        }
        if let Some(rounds) = env_parse::<u32>("DEEP_SCAN_RETRY_ROUNDS") {
            config.deep_scan_retry_rounds = rounds;
        }
        if let Some(items) = env_parse::<usize>("DEEP_SCAN_MIN_ITEMS") {
            config.deep_scan_min_items = items;
        }
        if let Some(ratio) = env_parse::<f64>("DEEP_SCAN_ESCALATION_RATIO") {
            config.deep_scan_escalation_ratio = ratio;
        }
        if let Some(secs) = env_parse::<i64>("ENRICH_TTL_SECS") {
            config.enrich_ttl_ms = secs * 1000;
        }
        if let Some(meters) = env_parse::<f64>("ENRICH_DISTANCE_M") {
            config.enrich_distance_m = meters;
        }
        if let Some(ms) = env_parse::<u64>("ENRICH_TIMEOUT_MS") {
            config.enrich_timeout = Duration::from_millis(ms);
        }

        config
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<(), String> {
        if self.deep_scan_batch_size == 0 {
            return Err("DEEP_SCAN_BATCH_SIZE must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.deep_scan_escalation_ratio) {
            return Err("DEEP_SCAN_ESCALATION_RATIO must be between 0 and 1".to_string());
        }
        if self.poll_interval.is_zero() {
            return Err("Poll interval must be greater than zero".to_string());
        }
        let (lat, lon) = self.default_location;
        if !crate::types::is_valid_coord_pair(lat, lon) {
            return Err(format!("Invalid default location: {}, {}", lat, lon));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

// =============================================================================
// CLI
// =============================================================================

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// telemetry-sync - live multi-vehicle telemetry state for the dashboard
#[derive(Parser, Debug, Clone)]
#[command(name = "telemetry-sync")]
#[command(about = "Keeps a live, cached view of connected-vehicle telemetry")]
pub struct Args {
    /// Dashboard backend base URL
    #[arg(long, env = "API_BASE_URL", default_value = "http://localhost:3000")]
    pub api_base_url: String,

    /// Bearer token attached to backend requests
    #[arg(long, env = "ACCESS_TOKEN")]
    pub access_token: Option<String>,

    /// Directory for the persisted telemetry catalog
    #[arg(long, env = "DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Background refresh interval for the active vehicle, in seconds
    #[arg(long, env = "POLL_INTERVAL_SECS", default_value = "3600")]
    pub poll_interval_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "text")]
    pub log_format: LogFormat,

    /// Reverse geocoding endpoint (Nominatim-compatible)
    #[arg(
        long,
        env = "GEOCODE_URL",
        default_value = "https://nominatim.openstreetmap.org/reverse"
    )]
    pub geocode_url: String,

    /// Current-weather endpoint (Open-Meteo-compatible)
    #[arg(
        long,
        env = "WEATHER_URL",
        default_value = "https://api.open-meteo.com/v1/forecast"
    )]
    pub weather_url: String,

    /// Request timeout in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "30000")]
    pub request_timeout_ms: u64,

    /// Run a deep scan for the selected vehicle after startup
    #[arg(long, env = "DEEP_SCAN", default_value = "false")]
    pub deep_scan: bool,

    /// Read push deliveries as NDJSON from stdin and write subscriptions to stdout
    #[arg(long, env = "PUSH_STDIN", default_value = "false")]
    pub push_stdin: bool,

    /// Latitude shown before a vehicle reports a position
    #[arg(long, env = "DEFAULT_LATITUDE", default_value_t = DEFAULT_LOCATION.0)]
    pub default_latitude: f64,

    /// Longitude shown before a vehicle reports a position
    #[arg(long, env = "DEFAULT_LONGITUDE", default_value_t = DEFAULT_LOCATION.1)]
    pub default_longitude: f64,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.api_base_url.starts_with("http://") && !self.api_base_url.starts_with("https://")
        {
            return Err("API_BASE_URL must be an http(s) URL".to_string());
        }
        if self.poll_interval_secs == 0 {
            return Err("POLL_INTERVAL_SECS must be greater than zero".to_string());
        }
        if self.request_timeout_ms == 0 {
            return Err("REQUEST_TIMEOUT_MS must be greater than zero".to_string());
        }
        self.sync_config().validate()
    }

    /// Engine tunables: environment overrides plus the CLI-level settings
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            default_location: (self.default_latitude, self.default_longitude),
            ..SyncConfig::from_env()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
