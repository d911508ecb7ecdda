use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::alerts::notify::NotificationPreferences;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Live-times API access
    #[serde(default)]
    pub tracker: TrackerConfig,
    /// Alert polling and delivery
    #[serde(default)]
    pub alerts: AlertsConfig,
    /// Local SQLite storage
    #[serde(default)]
    pub storage: StorageConfig,
    /// Stop-database update checking
    #[serde(default)]
    pub updates: UpdatesConfig,
    /// Service-updates news feed
    #[serde(default)]
    pub news: NewsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tracker: TrackerConfig::default(),
            alerts: AlertsConfig::default(),
            storage: StorageConfig::default(),
            updates: UpdatesConfig::default(),
            news: NewsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    /// Root of the live-times API (default: the public tracker endpoint)
    #[serde(default = "TrackerConfig::default_base_url")]
    pub base_url: String,
    /// API key issued for this installation. Empty means unauthenticated;
    /// the server answers INVALID_APP_KEY.
    #[serde(default)]
    pub api_key: String,
    /// Overall request timeout in seconds (default: 30)
    #[serde(default = "TrackerConfig::default_timeout_secs")]
    pub timeout_secs: u64,
    /// Connect timeout in seconds (default: 10)
    #[serde(default = "TrackerConfig::default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Stop codes per request the remote API accepts (default: 6)
    #[serde(default = "TrackerConfig::default_max_stops_per_request")]
    pub max_stops_per_request: usize,
    /// Departures fetched per stop by manual queries (default: 4)
    #[serde(default = "TrackerConfig::default_departures_per_stop")]
    pub departures_per_stop: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            base_url: Self::default_base_url(),
            api_key: String::new(),
            timeout_secs: Self::default_timeout_secs(),
            connect_timeout_secs: Self::default_connect_timeout_secs(),
            max_stops_per_request: Self::default_max_stops_per_request(),
            departures_per_stop: Self::default_departures_per_stop(),
        }
    }
}

impl TrackerConfig {
    fn default_base_url() -> String {
        "http://ws.mybustracker.co.uk".to_string()
    }
    fn default_timeout_secs() -> u64 {
        30
    }
    fn default_connect_timeout_secs() -> u64 {
        10
    }
    fn default_max_stops_per_request() -> usize {
        6
    }
    fn default_departures_per_stop() -> u32 {
        4
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertsConfig {
    /// Seconds between live-times polls for an armed time alert (default: 60)
    #[serde(default = "AlertsConfig::default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Seconds an armed time alert stays alive before expiring (default: 3600)
    #[serde(default = "AlertsConfig::default_max_age_secs")]
    pub max_age_secs: u64,
    /// How delivered notifications present themselves
    #[serde(default)]
    pub notifications: NotificationPreferences,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: Self::default_poll_interval_secs(),
            max_age_secs: Self::default_max_age_secs(),
            notifications: NotificationPreferences::default(),
        }
    }
}

impl AlertsConfig {
    fn default_poll_interval_secs() -> u64 {
        60
    }
    fn default_max_age_secs() -> u64 {
        3600
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// SQLite file holding alert and topology state
    #[serde(default = "StorageConfig::default_database_path")]
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: Self::default_database_path(),
        }
    }
}

impl StorageConfig {
    fn default_database_path() -> String {
        "database/bustracker.db".to_string()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdatesConfig {
    /// Endpoint describing the current downloadable stop database
    #[serde(default = "UpdatesConfig::default_info_url")]
    pub info_url: String,
    /// Schema prefix this build can read
    #[serde(default = "UpdatesConfig::default_schema_name")]
    pub schema_name: String,
    /// Where the verified stop database lands
    #[serde(default = "UpdatesConfig::default_target_path")]
    pub target_path: PathBuf,
}

impl Default for UpdatesConfig {
    fn default() -> Self {
        Self {
            info_url: Self::default_info_url(),
            schema_name: Self::default_schema_name(),
            target_path: Self::default_target_path(),
        }
    }
}

impl UpdatesConfig {
    fn default_info_url() -> String {
        "http://edinb.us/api/DatabaseVersion".to_string()
    }
    fn default_schema_name() -> String {
        "MBE_10".to_string()
    }
    fn default_target_path() -> PathBuf {
        PathBuf::from("database/stops.db")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewsConfig {
    /// JSON feed of service-disruption notices
    #[serde(default = "NewsConfig::default_feed_url")]
    pub feed_url: String,
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            feed_url: Self::default_feed_url(),
        }
    }
}

impl NewsConfig {
    fn default_feed_url() -> String {
        "http://edinb.us/api/TwitterStatuses".to_string()
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),
    #[error("Failed to parse config: {0}")]
    ParseError(String),
}
