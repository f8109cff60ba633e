//! Bridge configuration loading from file and environment variables.

use serde::Deserialize;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

/// Top-level bridge configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Health API network settings.
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub telegram: TelegramConfig,

    #[serde(default)]
    pub relays: RelayConfig,

    #[serde(default)]
    pub upload: UploadConfig,

    #[serde(default)]
    pub aggregator: AggregatorConfig,
}

/// Network configuration for the health API.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "crossnostr_relay=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Telegram Bot API settings.
#[derive(Clone, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,

    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Long-poll timeout passed to `getUpdates`.
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,

    /// Pause after a failed poll.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Capacity of the queue between the poller and the ingestion loop.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// Relay endpoints and their timeouts.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_relay_urls")]
    pub urls: Vec<String>,

    #[serde(default = "default_relay_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_relay_timeout_secs")]
    pub publish_timeout_secs: u64,

    #[serde(default = "default_relay_timeout_secs")]
    pub reconnect_delay_secs: u64,
}

/// Object storage used to host attachments.
#[derive(Clone, Deserialize)]
pub struct UploadConfig {
    /// Base URL objects are `PUT` to.
    #[serde(default)]
    pub endpoint: String,

    /// Base URL objects are publicly served from.
    #[serde(default)]
    pub public_base_url: String,

    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Optional bearer token for uploads.
    #[serde(default)]
    pub token: Option<String>,
}

/// Aggregation policy.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AggregatorConfig {
    /// Close a media group after this many idle seconds. Unset keeps a group
    /// open until the channel's next differently-keyed post.
    #[serde(default)]
    pub idle_flush_secs: Option<u64>,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_db_path() -> String {
    "crossnostr.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    4
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_api_base_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_poll_timeout_secs() -> u64 {
    60
}

fn default_retry_delay_secs() -> u64 {
    5
}

fn default_queue_capacity() -> usize {
    256
}

fn default_relay_urls() -> Vec<String> {
    vec!["wss://relay.nostr.band/".to_string()]
}

fn default_relay_timeout_secs() -> u64 {
    10
}

const REQUEST_TIMEOUT_MARGIN_SECS: u64 = 30;

fn default_bucket() -> String {
    "dev-cross-nostter".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_base_url: default_api_base_url(),
            poll_timeout_secs: default_poll_timeout_secs(),
            retry_delay_secs: default_retry_delay_secs(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            urls: default_relay_urls(),
            connect_timeout_secs: default_relay_timeout_secs(),
            publish_timeout_secs: default_relay_timeout_secs(),
            reconnect_delay_secs: default_relay_timeout_secs(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            public_base_url: String::new(),
            bucket: default_bucket(),
            token: None,
        }
    }
}

impl fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &redact(&self.bot_token))
            .field("api_base_url", &self.api_base_url)
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .field("retry_delay_secs", &self.retry_delay_secs)
            .field("queue_capacity", &self.queue_capacity)
            .finish()
    }
}

impl fmt::Debug for UploadConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadConfig")
            .field("endpoint", &self.endpoint)
            .field("public_base_url", &self.public_base_url)
            .field("bucket", &self.bucket)
            .field("token", &self.token.as_deref().map(redact))
            .finish()
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        "<unset>"
    } else {
        "[REDACTED]"
    }
}

impl TelegramConfig {
    /// Bound on a whole Bot API request, download or upload. Leaves room for
    /// a full long poll.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs + REQUEST_TIMEOUT_MARGIN_SECS)
    }
}

impl RelayConfig {
    pub fn pool_config(&self) -> crossnostr_relay::PoolConfig {
        crossnostr_relay::PoolConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            publish_timeout: Duration::from_secs(self.publish_timeout_secs),
            reconnect_delay: Duration::from_secs(self.reconnect_delay_secs),
        }
    }
}

impl AggregatorConfig {
    pub fn idle_flush(&self) -> Option<Duration> {
        self.idle_flush_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// A required setting is missing or unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `CROSSNOSTR_TELEGRAM_BOT_TOKEN` overrides `telegram.bot_token`
/// - `CROSSNOSTR_RELAYS` overrides `relays.urls` (comma-separated)
/// - `CROSSNOSTR_UPLOAD_ENDPOINT` overrides `upload.endpoint`
/// - `CROSSNOSTR_UPLOAD_PUBLIC_BASE_URL` overrides `upload.public_base_url`
/// - `CROSSNOSTR_UPLOAD_BUCKET` overrides `upload.bucket`
/// - `CROSSNOSTR_UPLOAD_TOKEN` overrides `upload.token`
/// - `CROSSNOSTR_DB_PATH` overrides `database.path`
/// - `CROSSNOSTR_HOST` overrides `server.host`
/// - `CROSSNOSTR_PORT` overrides `server.port`
/// - `CROSSNOSTR_LOG_LEVEL` overrides `logging.level`
/// - `CROSSNOSTR_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Applies `CROSSNOSTR_*` overrides read through `lookup`.
pub fn apply_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(token) = lookup("CROSSNOSTR_TELEGRAM_BOT_TOKEN") {
        config.telegram.bot_token = token;
    }
    if let Some(relays) = lookup("CROSSNOSTR_RELAYS") {
        let urls: Vec<String> = relays
            .split(',')
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .collect();
        if !urls.is_empty() {
            config.relays.urls = urls;
        }
    }
    if let Some(endpoint) = lookup("CROSSNOSTR_UPLOAD_ENDPOINT") {
        config.upload.endpoint = endpoint;
    }
    if let Some(base) = lookup("CROSSNOSTR_UPLOAD_PUBLIC_BASE_URL") {
        config.upload.public_base_url = base;
    }
    if let Some(bucket) = lookup("CROSSNOSTR_UPLOAD_BUCKET") {
        config.upload.bucket = bucket;
    }
    if let Some(token) = lookup("CROSSNOSTR_UPLOAD_TOKEN") {
        config.upload.token = Some(token).filter(|t| !t.is_empty());
    }
    if let Some(db_path) = lookup("CROSSNOSTR_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(host) = lookup("CROSSNOSTR_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = lookup("CROSSNOSTR_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(level) = lookup("CROSSNOSTR_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = lookup("CROSSNOSTR_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
}

impl Config {
    /// Checks the settings the bridge cannot run without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.telegram.bot_token.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "telegram.bot_token is required".to_string(),
            ));
        }
        if self.relays.urls.is_empty() {
            return Err(ConfigError::Invalid("relays.urls is empty".to_string()));
        }
        if self.upload.endpoint.trim().is_empty() || self.upload.public_base_url.trim().is_empty()
        {
            return Err(ConfigError::Invalid(
                "upload.endpoint and upload.public_base_url are required".to_string(),
            ));
        }
        if self.telegram.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "telegram.queue_capacity must be positive".to_string(),
            ));
        }
        for (name, secs) in [
            ("relays.connect_timeout_secs", self.relays.connect_timeout_secs),
            ("relays.publish_timeout_secs", self.relays.publish_timeout_secs),
            ("relays.reconnect_delay_secs", self.relays.reconnect_delay_secs),
        ] {
            if secs == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_match_reference_deployment() {
        let config = Config::default();
        assert_eq!(config.relays.urls, vec!["wss://relay.nostr.band/"]);
        assert_eq!(config.upload.bucket, "dev-cross-nostter");
        assert_eq!(config.relays.pool_config(), crossnostr_relay::PoolConfig::default());
        assert_eq!(config.aggregator.idle_flush(), None);
        assert_eq!(config.telegram.poll_timeout_secs, 60);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = load_config(Some("/definitely/not/here/crossnostr.toml")).unwrap();
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn parses_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [telegram]
            bot_token = "123:abc"

            [relays]
            urls = ["wss://a.example", "wss://b.example"]
            publish_timeout_secs = 3

            [aggregator]
            idle_flush_secs = 30
            "#,
        )
        .unwrap();

        assert_eq!(config.telegram.bot_token, "123:abc");
        assert_eq!(config.telegram.api_base_url, "https://api.telegram.org");
        assert_eq!(config.relays.urls.len(), 2);
        assert_eq!(config.relays.pool_config().publish_timeout, Duration::from_secs(3));
        assert_eq!(config.relays.pool_config().connect_timeout, Duration::from_secs(10));
        assert_eq!(config.aggregator.idle_flush(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn env_overrides_win() {
        let mut config = Config::default();
        apply_overrides(
            &mut config,
            lookup(&[
                ("CROSSNOSTR_TELEGRAM_BOT_TOKEN", "42:xyz"),
                ("CROSSNOSTR_RELAYS", "wss://a.example, ,wss://b.example"),
                ("CROSSNOSTR_UPLOAD_BUCKET", "prod"),
                ("CROSSNOSTR_UPLOAD_TOKEN", ""),
                ("CROSSNOSTR_PORT", "8081"),
                ("CROSSNOSTR_HOST", "not an ip"),
                ("CROSSNOSTR_LOG_JSON", "1"),
            ]),
        );

        assert_eq!(config.telegram.bot_token, "42:xyz");
        assert_eq!(config.relays.urls, vec!["wss://a.example", "wss://b.example"]);
        assert_eq!(config.upload.bucket, "prod");
        assert_eq!(config.upload.token, None);
        assert_eq!(config.server.port, 8081);
        assert_eq!(config.server.host, default_host());
        assert!(config.logging.json);
    }

    #[test]
    fn validation_requires_token_and_upload_target() {
        let mut config = Config::default();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.telegram.bot_token = "1:a".into();
        assert!(config.validate().is_err());

        config.upload.endpoint = "https://storage.example".into();
        config.upload.public_base_url = "https://cdn.example".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validation_rejects_zero_relay_timings() {
        let mut valid = Config::default();
        valid.telegram.bot_token = "1:a".into();
        valid.upload.endpoint = "https://storage.example".into();
        valid.upload.public_base_url = "https://cdn.example".into();

        let mut config = valid.clone();
        config.relays.publish_timeout_secs = 0;
        let Err(ConfigError::Invalid(message)) = config.validate() else {
            panic!("zero publish timeout accepted");
        };
        assert!(message.contains("relays.publish_timeout_secs"));

        let mut config = valid.clone();
        config.relays.reconnect_delay_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = valid;
        config.relays.connect_timeout_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn request_timeout_outlasts_long_poll() {
        let telegram = Config::default().telegram;
        let long_poll = Duration::from_secs(telegram.poll_timeout_secs);
        assert!(telegram.request_timeout() > long_poll);
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let mut config = Config::default();
        config.telegram.bot_token = "123456:SECRET".into();
        config.upload.token = Some("upload-secret".into());

        let debug = format!("{config:?}");
        assert!(!debug.contains("SECRET"));
        assert!(!debug.contains("upload-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
