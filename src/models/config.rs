//! Application configuration structures.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::Source;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Portal HTTP behavior
    #[serde(default)]
    pub http: HttpConfig,

    /// Backend ingestion API
    #[serde(default)]
    pub backend: BackendConfig,

    /// Optional queue publishing through the tunnel
    #[serde(default)]
    pub queue: QueueConfig,

    /// Durable state locations
    #[serde(default)]
    pub paths: PathsConfig,

    /// Retry and exit policy
    #[serde(default)]
    pub run: RunConfig,

    /// Defaults for options not given on the command line
    #[serde(default)]
    pub defaults: DefaultsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Apply environment variable overrides on top of the file values.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| env::var(key).ok().filter(|v| !v.trim().is_empty()));
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("USER_AGENT") {
            self.http.user_agent = v;
        }
        if let Some(v) = lookup("RATE_LIMIT_RPS").and_then(|v| v.parse().ok()) {
            self.http.rate_limit_rps = v;
        }
        if let Some(v) = lookup("HTTP_TIMEOUT_S").and_then(|v| v.parse().ok()) {
            self.http.timeout_secs = v;
        }
        if let Some(v) = lookup("API_URL") {
            self.backend.api_url = v;
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("DEFAULT_CITY") {
            self.defaults.city = v;
        }
        if let Some(v) = lookup("DEFAULT_DEAL") {
            self.defaults.deal = v;
        }
        if let Some(v) = lookup("DEFAULT_KIND") {
            self.defaults.kind = v;
        }
        if let Some(v) = lookup("CHECKPOINT_DIR") {
            self.paths.checkpoint_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("QUEUE_API_URL") {
            self.queue.api_url = v;
        }
        if let Some(v) = lookup("QUEUE_USER") {
            self.queue.username = v;
        }
        if let Some(v) = lookup("QUEUE_PASSWORD") {
            self.queue.password = v;
        }
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.http.user_agent.trim().is_empty() {
            return Err(AppError::validation("http.user_agent is empty"));
        }
        if self.http.timeout_secs == 0 {
            return Err(AppError::validation("http.timeout_secs must be > 0"));
        }
        if !(0.05..=5.0).contains(&self.http.rate_limit_rps) {
            return Err(AppError::validation(
                "http.rate_limit_rps must be between 0.05 and 5.0",
            ));
        }
        if self.http.max_concurrent == 0 {
            return Err(AppError::validation("http.max_concurrent must be > 0"));
        }
        if self.backend.enabled && self.backend.api_url.trim().is_empty() {
            return Err(AppError::validation("backend.api_url is empty"));
        }
        if self.queue.enabled && self.queue.exchange.trim().is_empty() {
            return Err(AppError::validation(
                "queue.exchange is required when queue publishing is enabled",
            ));
        }
        if !self.backend.enabled && !self.queue.enabled {
            return Err(AppError::validation(
                "at least one of backend or queue delivery must be enabled",
            ));
        }
        if self.run.checkpoint_flush_every == 0 {
            return Err(AppError::validation("run.checkpoint_flush_every must be > 0"));
        }
        if self.run.attempt_ceiling == 0 {
            return Err(AppError::validation("run.attempt_ceiling must be > 0"));
        }
        Ok(())
    }
}

/// HTTP client and crawling behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Requests per second across the whole run
    #[serde(default = "defaults::rate_limit_rps")]
    pub rate_limit_rps: f64,

    /// Maximum items processed concurrently within a scope
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            rate_limit_rps: defaults::rate_limit_rps(),
            max_concurrent: defaults::max_concurrent(),
        }
    }
}

/// Backend ingestion API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,

    /// Base URL of the ingestion API
    #[serde(default = "defaults::api_url")]
    pub api_url: String,

    #[serde(default = "defaults::backend_timeout")]
    pub timeout_secs: u64,

    /// Ask the backend for a near-identical listing before creating one
    #[serde(default = "defaults::enabled")]
    pub check_duplicates: bool,

    /// Send photo links after the listing is created
    #[serde(default = "defaults::enabled")]
    pub upload_photos: bool,

    /// Cap on photo links sent per listing
    #[serde(default)]
    pub max_photos: Option<usize>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_url: defaults::api_url(),
            timeout_secs: defaults::backend_timeout(),
            check_duplicates: true,
            upload_photos: true,
            max_photos: None,
        }
    }
}

/// Queue publishing through the RabbitMQ HTTP API, reached via the tunnel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Base URL of the management API on the local end of the tunnel
    #[serde(default = "defaults::queue_api_url")]
    pub api_url: String,

    #[serde(default = "defaults::queue_vhost")]
    pub vhost: String,

    #[serde(default = "defaults::queue_exchange")]
    pub exchange: String,

    #[serde(default = "defaults::queue_routing_key")]
    pub routing_key: String,

    #[serde(default = "defaults::queue_user")]
    pub username: String,

    #[serde(default = "defaults::queue_user")]
    pub password: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_url: defaults::queue_api_url(),
            vhost: defaults::queue_vhost(),
            exchange: defaults::queue_exchange(),
            routing_key: defaults::queue_routing_key(),
            username: defaults::queue_user(),
            password: defaults::queue_user(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory holding one checkpoint file per generation
    #[serde(default = "defaults::checkpoint_dir")]
    pub checkpoint_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: defaults::checkpoint_dir(),
        }
    }
}

/// Retry rounds and exit policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default = "defaults::retry_rounds")]
    pub retry_rounds: u32,

    #[serde(default = "defaults::retry_sleep")]
    pub retry_sleep_secs: u64,

    /// Attempts after which a still-transient item is given up as permanent
    #[serde(default = "defaults::attempt_ceiling")]
    pub attempt_ceiling: u32,

    /// Permanent failures tolerated before the process exits non-zero
    #[serde(default = "defaults::max_permanent_failures")]
    pub max_permanent_failures: usize,

    /// Persist the checkpoint after this many newly done items
    #[serde(default = "defaults::flush_every")]
    pub checkpoint_flush_every: usize,
}

impl RunConfig {
    pub fn retry_sleep(&self) -> Duration {
        Duration::from_secs(self.retry_sleep_secs)
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            retry_rounds: defaults::retry_rounds(),
            retry_sleep_secs: defaults::retry_sleep(),
            attempt_ceiling: defaults::attempt_ceiling(),
            max_permanent_failures: defaults::max_permanent_failures(),
            checkpoint_flush_every: defaults::flush_every(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default = "defaults::source")]
    pub source: Source,
    #[serde(default = "defaults::city")]
    pub city: String,
    /// `sprzedaz` or `wynajem`
    #[serde(default = "defaults::deal")]
    pub deal: String,
    /// `mieszkanie`, `dom`, `dzialka` or `lokal`
    #[serde(default = "defaults::kind")]
    pub kind: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            source: defaults::source(),
            city: defaults::city(),
            deal: defaults::deal(),
            kind: defaults::kind(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    use crate::models::Source;

    pub fn enabled() -> bool {
        true
    }

    // HTTP defaults
    pub fn user_agent() -> String {
        "real-estate-scrapper/0.1".into()
    }
    pub fn timeout() -> u64 {
        20
    }
    pub fn rate_limit_rps() -> f64 {
        0.3
    }
    pub fn max_concurrent() -> usize {
        2
    }

    // Backend defaults
    pub fn api_url() -> String {
        "http://localhost:8000".into()
    }
    pub fn backend_timeout() -> u64 {
        5
    }

    // Queue defaults
    pub fn queue_api_url() -> String {
        "http://127.0.0.1:15672".into()
    }
    pub fn queue_vhost() -> String {
        "/".into()
    }
    pub fn queue_exchange() -> String {
        "amq.default".into()
    }
    pub fn queue_routing_key() -> String {
        "listings".into()
    }
    pub fn queue_user() -> String {
        "guest".into()
    }

    pub fn checkpoint_dir() -> PathBuf {
        PathBuf::from("data/checkpoints")
    }

    // Run defaults
    pub fn retry_rounds() -> u32 {
        3
    }
    pub fn retry_sleep() -> u64 {
        60
    }
    pub fn attempt_ceiling() -> u32 {
        10
    }
    pub fn max_permanent_failures() -> usize {
        25
    }
    pub fn flush_every() -> usize {
        1
    }

    pub fn source() -> Source {
        Source::Otodom
    }
    pub fn city() -> String {
        "Gdańsk".into()
    }
    pub fn deal() -> String {
        "sprzedaz".into()
    }
    pub fn kind() -> String {
        "mieszkanie".into()
    }

    pub fn log_level() -> String {
        "info".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_default_config_ok() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_user_agent() {
        let mut config = Config::default();
        config.http.user_agent = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_rps() {
        let mut config = Config::default();
        config.http.rate_limit_rps = 10.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_no_delivery_target() {
        let mut config = Config::default();
        config.backend.enabled = false;
        config.queue.enabled = false;
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [http]
            rate_limit_rps = 1.5

            [run]
            retry_rounds = 5

            [defaults]
            source = "morizon"
            "#,
        )
        .unwrap();

        assert_eq!(config.http.rate_limit_rps, 1.5);
        assert_eq!(config.http.timeout_secs, 20);
        assert_eq!(config.run.retry_rounds, 5);
        assert_eq!(config.run.retry_sleep_secs, 60);
        assert_eq!(config.defaults.source, Source::Morizon);
        assert_eq!(config.defaults.city, "Gdańsk");
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = Config::default();
        config.apply_overrides(|key| match key {
            "API_URL" => Some("http://backend:9000".to_string()),
            "RATE_LIMIT_RPS" => Some("0.5".to_string()),
            "HTTP_TIMEOUT_S" => Some("not-a-number".to_string()),
            _ => None,
        });

        assert_eq!(config.backend.api_url, "http://backend:9000");
        assert_eq!(config.http.rate_limit_rps, 0.5);
        assert_eq!(config.http.timeout_secs, 20);
    }
}
