//! Server configuration types
//!
//! Contains all configuration structures for the Feedmill server.
//! Everything carries a serde default so a bare process comes up with
//! sane values; files and `FEEDMILL_*` environment variables override.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use feedmill_core::{
    CircuitBreakerConfig, IngestConfig, RotatorConfig, SchedulerConfig, SummarizeConfig,
};
use feedmill_inoreader::{OAuthConfig, RateLimitConfig};

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub inoreader: InoreaderConfig,
    #[serde(default)]
    pub scheduler: SchedulerAppConfig,
    #[serde(default)]
    pub summarizer: SummarizerConfig,
    #[serde(default)]
    pub circuit: CircuitAppConfig,
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9600
}

/// SQLite database location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    data_dir().join("feedmill.db")
}

/// Directory for runtime state (database, token record).
pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .map(|p| p.join(".feedmill"))
        .unwrap_or_else(|| PathBuf::from(".feedmill"))
}

/// One accepted bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthTokenEntry {
    pub token: String,
    pub user_id: String,
}

/// Authentication settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub tokens: Vec<AuthTokenEntry>,
}

/// Remote API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InoreaderConfig {
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_validate_url")]
    pub validate_url: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_daily_limit")]
    pub zone1_daily_limit: u64,
    #[serde(default = "default_daily_limit")]
    pub zone2_daily_limit: u64,
    #[serde(default = "default_safety_buffer_percent")]
    pub safety_buffer_percent: u64,
    #[serde(default = "default_alert_thresholds")]
    pub alert_thresholds: Vec<u8>,
    #[serde(default = "default_true")]
    pub enable_random_start: bool,
}

impl Default for InoreaderConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            token_url: default_token_url(),
            validate_url: default_validate_url(),
            client_id: String::new(),
            client_secret: String::new(),
            zone1_daily_limit: default_daily_limit(),
            zone2_daily_limit: default_daily_limit(),
            safety_buffer_percent: default_safety_buffer_percent(),
            alert_thresholds: default_alert_thresholds(),
            enable_random_start: default_true(),
        }
    }
}

fn default_api_base_url() -> String {
    "https://www.inoreader.com/reader/api/0".to_string()
}

fn default_token_url() -> String {
    "https://www.inoreader.com/oauth2/token".to_string()
}

fn default_validate_url() -> String {
    "https://www.inoreader.com/reader/api/0/user-info".to_string()
}

fn default_daily_limit() -> u64 {
    100
}

fn default_safety_buffer_percent() -> u64 {
    10
}

fn default_alert_thresholds() -> Vec<u8> {
    vec![50, 75, 90]
}

fn default_true() -> bool {
    true
}

/// Scheduling loop settings (all intervals in seconds)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerAppConfig {
    #[serde(default = "default_sync_interval_secs")]
    pub subscription_sync_interval_secs: u64,
    #[serde(default = "default_fetch_interval_secs")]
    pub article_fetch_interval_secs: u64,
    #[serde(default = "default_fetch_max_interval_secs")]
    pub article_fetch_max_interval_secs: u64,
    #[serde(default = "default_sync_startup_delay_secs")]
    pub sync_startup_delay_secs: u64,
    #[serde(default = "default_fetch_startup_delay_secs")]
    pub fetch_startup_delay_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_max_pages_per_tick")]
    pub max_pages_per_tick: u32,
    #[serde(default = "default_job_timeout_secs")]
    pub sync_timeout_secs: u64,
    #[serde(default = "default_job_timeout_secs")]
    pub per_subscription_timeout_secs: u64,
}

impl Default for SchedulerAppConfig {
    fn default() -> Self {
        Self {
            subscription_sync_interval_secs: default_sync_interval_secs(),
            article_fetch_interval_secs: default_fetch_interval_secs(),
            article_fetch_max_interval_secs: default_fetch_max_interval_secs(),
            sync_startup_delay_secs: default_sync_startup_delay_secs(),
            fetch_startup_delay_secs: default_fetch_startup_delay_secs(),
            page_size: default_page_size(),
            max_pages_per_tick: default_max_pages_per_tick(),
            sync_timeout_secs: default_job_timeout_secs(),
            per_subscription_timeout_secs: default_job_timeout_secs(),
        }
    }
}

fn default_sync_interval_secs() -> u64 {
    8 * 60 * 60
}

fn default_fetch_interval_secs() -> u64 {
    30 * 60
}

fn default_fetch_max_interval_secs() -> u64 {
    6 * 60 * 60
}

fn default_sync_startup_delay_secs() -> u64 {
    30
}

fn default_fetch_startup_delay_secs() -> u64 {
    90
}

fn default_page_size() -> u32 {
    50
}

fn default_max_pages_per_tick() -> u32 {
    2
}

fn default_job_timeout_secs() -> u64 {
    10 * 60
}

/// Pre-processor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizerConfig {
    #[serde(default = "default_pre_processor_url")]
    pub pre_processor_url: String,
    #[serde(default = "default_job_timeout_secs")]
    pub upstream_timeout_secs: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_fetch_max_bytes")]
    pub fetch_max_bytes: usize,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            pre_processor_url: default_pre_processor_url(),
            upstream_timeout_secs: default_job_timeout_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            fetch_max_bytes: default_fetch_max_bytes(),
        }
    }
}

fn default_pre_processor_url() -> String {
    "http://localhost:9200".to_string()
}

fn default_fetch_timeout_secs() -> u64 {
    10
}

fn default_fetch_max_bytes() -> usize {
    2 * 1024 * 1024
}

/// Circuit breaker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitAppConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_reset_timeout_secs")]
    pub reset_timeout_secs: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for CircuitAppConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_secs: default_reset_timeout_secs(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout_secs() -> u64 {
    30
}

fn default_max_concurrent() -> usize {
    4
}

impl AppConfig {
    /// Load configuration from optional files and the environment.
    pub fn load(explicit_path: Option<&std::path::Path>) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(File::with_name("config/feedmill").required(false))
            .add_source(File::with_name("feedmill").required(false));

        if let Some(path) = explicit_path {
            builder = builder.add_source(File::from(path));
        }

        let config = builder
            .add_source(
                Environment::with_prefix("FEEDMILL")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Rate-limit manager settings.
    #[must_use]
    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            zone1_daily_limit: self.inoreader.zone1_daily_limit,
            zone2_daily_limit: self.inoreader.zone2_daily_limit,
            safety_buffer_percent: self.inoreader.safety_buffer_percent,
            alert_thresholds: self.inoreader.alert_thresholds.clone(),
        }
    }

    /// OAuth broker settings.
    #[must_use]
    pub fn oauth_config(&self) -> OAuthConfig {
        OAuthConfig {
            token_url: self.inoreader.token_url.clone(),
            client_id: self.inoreader.client_id.clone(),
            client_secret: self.inoreader.client_secret.clone(),
            validate_url: self.inoreader.validate_url.clone(),
        }
    }

    /// Rotator settings.
    #[must_use]
    pub fn rotator_config(&self) -> RotatorConfig {
        RotatorConfig {
            enable_random_start: self.inoreader.enable_random_start,
            article_fetch_interval: Duration::from_secs(
                self.scheduler.article_fetch_interval_secs,
            ),
        }
    }

    /// Schedule handler settings.
    #[must_use]
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            sync_interval: Duration::from_secs(self.scheduler.subscription_sync_interval_secs),
            fetch_base_interval: Duration::from_secs(self.scheduler.article_fetch_interval_secs),
            fetch_max_interval: Duration::from_secs(
                self.scheduler.article_fetch_max_interval_secs,
            ),
            sync_startup_delay: Duration::from_secs(self.scheduler.sync_startup_delay_secs),
            fetch_startup_delay: Duration::from_secs(self.scheduler.fetch_startup_delay_secs),
        }
    }

    /// Ingestion settings.
    #[must_use]
    pub fn ingest_config(&self) -> IngestConfig {
        IngestConfig {
            page_size: self.scheduler.page_size,
            max_pages_per_tick: self.scheduler.max_pages_per_tick,
            per_subscription_timeout: Duration::from_secs(
                self.scheduler.per_subscription_timeout_secs,
            ),
            sync_timeout: Duration::from_secs(self.scheduler.sync_timeout_secs),
        }
    }

    /// Summarization settings.
    #[must_use]
    pub fn summarize_config(&self) -> SummarizeConfig {
        SummarizeConfig {
            upstream_timeout: Duration::from_secs(self.summarizer.upstream_timeout_secs),
            fetch_timeout: Duration::from_secs(self.summarizer.fetch_timeout_secs),
            fetch_max_bytes: self.summarizer.fetch_max_bytes,
        }
    }

    /// Circuit breaker settings.
    #[must_use]
    pub fn circuit_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit.failure_threshold,
            reset_timeout: Duration::from_secs(self.circuit.reset_timeout_secs),
            max_concurrent: self.circuit.max_concurrent,
        }
    }
}
