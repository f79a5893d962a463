//! Server configuration loading from file and environment variables.

use std::net::{IpAddr, Ipv4Addr};

use autotrade_db::DbSettings;
use autotrade_types::{Environment, DEFAULT_TIMEZONE};
use serde::Deserialize;
use thiserror::Error;

/// Top-level server configuration.
///
/// Loaded once at start-up and handed to whatever needs it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Application identity and environment.
    #[serde(default)]
    pub app: AppConfig,

    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Redis broker settings.
    #[serde(default)]
    pub redis: RedisConfig,

    /// Event stream naming.
    #[serde(default)]
    pub messaging: MessagingConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Deployment environment; drives the default log level.
    #[serde(default)]
    pub environment: Environment,

    #[serde(default = "default_app_name")]
    pub name: String,

    /// IANA timezone for the local half of every timestamp pair.
    #[serde(default = "default_timezone")]
    pub timezone: String,

    #[serde(default = "default_service_region")]
    pub service_region: String,

    /// Per-request HTTP tracing spans.
    #[serde(default = "default_true")]
    pub enable_tracing: bool,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
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

/// Redis connection settings.
///
/// An explicit `url` wins over the individual fields.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_redis_host")]
    pub host: String,

    #[serde(default = "default_redis_port")]
    pub port: u16,

    #[serde(default)]
    pub ssl: bool,

    /// Logical database index. Omitted from the URL when unset.
    #[serde(default)]
    pub db: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessagingConfig {
    /// Prefix for every physical stream name. Empty means none.
    #[serde(default)]
    pub namespace: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive (e.g. "info", "autotrade_server=debug,info").
    /// Derived from the environment when unset.
    #[serde(default)]
    pub level: Option<String>,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_app_name() -> String {
    "AutoTrade V3".to_string()
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

fn default_service_region() -> String {
    "ap-northeast-2".to_string()
}

fn default_true() -> bool {
    true
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    8000
}

fn default_db_path() -> String {
    "autotrade.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_redis_host() -> String {
    "localhost".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            name: default_app_name(),
            timezone: default_timezone(),
            service_region: default_service_region(),
            enable_tracing: true,
        }
    }
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

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: default_redis_host(),
            port: default_redis_port(),
            ssl: false,
            db: None,
        }
    }
}

impl DatabaseConfig {
    /// Pool settings for this database.
    pub fn pool_settings(&self) -> DbSettings {
        DbSettings {
            path: self.path.clone(),
            busy_timeout_ms: self.busy_timeout_ms,
            pool_max_size: self.pool_max_size,
        }
    }
}

impl RedisConfig {
    /// Connection URL for the Redis client.
    pub fn connection_url(&self) -> String {
        if let Some(url) = self.url.as_deref().filter(|u| !u.trim().is_empty()) {
            return url.to_string();
        }
        let scheme = if self.ssl { "rediss" } else { "redis" };
        match self.db {
            Some(db) => format!("{scheme}://{}:{}/{db}", self.host, self.port),
            None => format!("{scheme}://{}:{}", self.host, self.port),
        }
    }

    /// [`connection_url`](Self::connection_url) with any credentials masked,
    /// safe to log.
    pub fn redacted_url(&self) -> String {
        let url = self.connection_url();
        let Some((scheme, rest)) = url.split_once("://") else {
            return url;
        };
        match rest.rsplit_once('@') {
            Some((_, host)) => format!("{scheme}://***@{host}"),
            None => url,
        }
    }
}

impl LoggingConfig {
    /// The explicit level if set, otherwise the environment's default.
    pub fn effective_level(&self, environment: Environment) -> String {
        self.level
            .as_deref()
            .map(str::trim)
            .filter(|level| !level.is_empty())
            .unwrap_or(environment.default_log_level())
            .to_string()
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

    /// An environment override holds a value of the wrong shape.
    #[error("invalid value for {key}: {value:?} ({expected})")]
    InvalidEnv {
        key: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Loads configuration from a TOML file, falling back to defaults, then
/// applies environment overrides.
///
/// | Variable | Overrides |
/// |----------|-----------|
/// | `APP_ENV` | `app.environment` |
/// | `APP_NAME` | `app.name` |
/// | `APP_TIMEZONE` | `app.timezone` |
/// | `APP_SERVICE_REGION` | `app.service_region` |
/// | `APP_ENABLE_TRACING` | `app.enable_tracing` |
/// | `APP_HOST` / `APP_PORT` | `server.host` / `server.port` |
/// | `DB_PATH` | `database.path` |
/// | `DB_BUSY_TIMEOUT_MS` | `database.busy_timeout_ms` |
/// | `DB_POOL_MAX_SIZE` | `database.pool_max_size` |
/// | `REDIS_URL` | `redis.url` |
/// | `REDIS_HOST` / `REDIS_PORT` | `redis.host` / `redis.port` |
/// | `REDIS_SSL` / `REDIS_DB` | `redis.ssl` / `redis.db` |
/// | `MESSAGE_NAMESPACE` | `messaging.namespace` |
/// | `LOG_LEVEL` / `LOG_JSON` | `logging.level` / `logging.json` |
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed,
/// or if an override cannot be parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    Ok(config)
}

/// Applies overrides from `lookup` (normally the process environment).
///
/// # Errors
///
/// Returns `ConfigError::InvalidEnv` for the first value that cannot be parsed.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup("APP_ENV") {
        config.app.environment = parse(
            "APP_ENV",
            value,
            "one of local, development, staging, production",
        )?;
    }
    if let Some(value) = lookup("APP_NAME") {
        config.app.name = value;
    }
    if let Some(value) = lookup("APP_TIMEZONE") {
        config.app.timezone = value;
    }
    if let Some(value) = lookup("APP_SERVICE_REGION") {
        config.app.service_region = value;
    }
    if let Some(value) = lookup("APP_ENABLE_TRACING") {
        config.app.enable_tracing = parse_bool("APP_ENABLE_TRACING", value)?;
    }

    if let Some(value) = lookup("APP_HOST") {
        config.server.host = parse("APP_HOST", value, "an IP address")?;
    }
    if let Some(value) = lookup("APP_PORT") {
        config.server.port = parse("APP_PORT", value, "a port number")?;
    }

    if let Some(value) = lookup("DB_PATH") {
        config.database.path = value;
    }
    if let Some(value) = lookup("DB_BUSY_TIMEOUT_MS") {
        config.database.busy_timeout_ms = parse("DB_BUSY_TIMEOUT_MS", value, "milliseconds")?;
    }
    if let Some(value) = lookup("DB_POOL_MAX_SIZE") {
        config.database.pool_max_size = parse("DB_POOL_MAX_SIZE", value, "a positive integer")?;
    }

    if let Some(value) = lookup("REDIS_URL") {
        config.redis.url = Some(value).filter(|v| !v.trim().is_empty());
    }
    if let Some(value) = lookup("REDIS_HOST") {
        config.redis.host = value;
    }
    if let Some(value) = lookup("REDIS_PORT") {
        config.redis.port = parse("REDIS_PORT", value, "a port number")?;
    }
    if let Some(value) = lookup("REDIS_SSL") {
        config.redis.ssl = parse_bool("REDIS_SSL", value)?;
    }
    if let Some(value) = lookup("REDIS_DB") {
        config.redis.db = if value.trim().is_empty() {
            None
        } else {
            Some(parse("REDIS_DB", value, "a database index")?)
        };
    }

    if let Some(value) = lookup("MESSAGE_NAMESPACE") {
        config.messaging.namespace = value;
    }

    if let Some(value) = lookup("LOG_LEVEL") {
        config.logging.level = Some(value);
    }
    if let Some(value) = lookup("LOG_JSON") {
        config.logging.json = parse_bool("LOG_JSON", value)?;
    }

    Ok(())
}

fn parse<T: std::str::FromStr>(
    key: &'static str,
    value: String,
    expected: &'static str,
) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv {
            key,
            value,
            expected,
        })
}

fn parse_bool(key: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            key,
            value,
            expected: "a boolean",
        }),
    }
}
