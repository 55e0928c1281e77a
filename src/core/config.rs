//! Configuration management for the exposed model server
//!
//! Settings come from an optional TOML file, then `EM_*` environment
//! variables, then command line flags (applied by the binary).

use crate::core::error::{Error, Result};
use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

/// Default configuration file looked up by [`Config::load`]
pub const DEFAULT_CONFIG_FILE: &str = "exposed-model.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP transport configuration
    pub server: ServerConfig,

    /// Long-poll behaviour
    pub long_poll: LongPollConfig,

    /// Model behaviour
    pub model: ModelConfig,

    /// Performance tuning
    pub performance: PerformanceConfig,

    /// Metrics and monitoring
    pub metrics: MetricsConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP server bind address
    pub http_addr: SocketAddr,

    /// Largest accepted inbound document
    pub max_document_bytes: usize,
}

/// Long-poll configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LongPollConfig {
    /// Wait used when the client does not ask for one
    #[serde(deserialize_with = "deserialize_duration")]
    pub default_timeout: Duration,

    /// Upper bound on any client-requested wait
    #[serde(deserialize_with = "deserialize_duration")]
    pub max_timeout: Duration,
}

/// What to do with document entries naming keys the store does not hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownKeyPolicy {
    /// Skip the entry and report it as ignored
    #[default]
    Ignore,
    /// Reject the whole document
    Reject,
}

/// Model configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Apply policy for unknown keys in inbound documents
    pub unknown_keys: UnknownKeyPolicy,
}

/// Performance tuning configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Number of runtime worker threads (0 = auto-detect)
    pub worker_threads: usize,
}

/// Metrics configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Serve Prometheus metrics on `/metrics`
    pub enable_prometheus: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (pretty, compact)
    pub format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_document_bytes: 4 * 1024 * 1024, // 4MB
        }
    }
}

impl Default for LongPollConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            max_timeout: Duration::from_secs(120),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enable_prometheus: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default config file and environment variables
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        if std::path::Path::new(DEFAULT_CONFIG_FILE).exists() {
            config = Self::from_file(DEFAULT_CONFIG_FILE)?;
        }

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml(&contents)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| Error::config(format!("Failed to parse config file: {}", e)))
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        use std::env;

        if let Ok(addr) = env::var("EM_HTTP_ADDR") {
            self.server.http_addr = addr
                .parse()
                .map_err(|e| Error::config(format!("Invalid HTTP address: {}", e)))?;
        }

        if let Ok(timeout) = env::var("EM_LONG_POLL_TIMEOUT") {
            self.long_poll.default_timeout = parse_duration(&timeout)
                .map_err(|e| Error::config(format!("Invalid long-poll timeout: {}", e)))?;
        }

        if let Ok(workers) = env::var("EM_WORKER_THREADS") {
            self.performance.worker_threads = workers
                .parse()
                .map_err(|e| Error::config(format!("Invalid worker threads: {}", e)))?;
        }

        if let Ok(policy) = env::var("EM_UNKNOWN_KEYS") {
            self.model.unknown_keys = parse_unknown_key_policy(&policy)?;
        }

        if let Ok(level) = env::var("EM_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(format) = env::var("EM_LOG_FORMAT") {
            self.logging.format = format;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.long_poll.default_timeout.is_zero() {
            return Err(Error::config("Long-poll timeout must be positive"));
        }

        if self.long_poll.default_timeout > self.long_poll.max_timeout {
            return Err(Error::config(
                "Long-poll default timeout exceeds the maximum timeout",
            ));
        }

        if self.server.max_document_bytes < 1024 {
            return Err(Error::config("Max document size too small (minimum 1KB)"));
        }

        if self.performance.worker_threads > 1024 {
            return Err(Error::config("Too many worker threads (maximum 1024)"));
        }

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => return Err(Error::config("Invalid log level")),
        }

        match self.logging.format.as_str() {
            "pretty" | "compact" => {}
            _ => return Err(Error::config("Invalid log format")),
        }

        Ok(())
    }

    /// Get optimal number of worker threads
    pub fn optimal_worker_threads(&self) -> usize {
        if self.performance.worker_threads == 0 {
            num_cpus::get().max(1)
        } else {
            self.performance.worker_threads
        }
    }

    /// Clamp a client-requested long-poll wait to the configured bounds
    pub fn long_poll_timeout(&self, requested: Option<Duration>) -> Duration {
        requested
            .unwrap_or(self.long_poll.default_timeout)
            .min(self.long_poll.max_timeout)
    }
}

/// Parse an unknown-key policy name
pub fn parse_unknown_key_policy(s: &str) -> Result<UnknownKeyPolicy> {
    match s {
        "ignore" => Ok(UnknownKeyPolicy::Ignore),
        "reject" => Ok(UnknownKeyPolicy::Reject),
        other => Err(Error::config(format!(
            "Invalid unknown key policy: {}. Valid options: ignore, reject",
            other
        ))),
    }
}

// Custom deserializer for Duration from string
fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a duration string like '30s' or '250ms', or seconds")
        }

        fn visit_str<E>(self, value: &str) -> std::result::Result<Duration, E>
        where
            E: de::Error,
        {
            parse_duration(value).map_err(E::custom)
        }

        fn visit_u64<E>(self, value: u64) -> std::result::Result<Duration, E>
        where
            E: de::Error,
        {
            Ok(Duration::from_secs(value))
        }

        fn visit_i64<E>(self, value: i64) -> std::result::Result<Duration, E>
        where
            E: de::Error,
        {
            u64::try_from(value)
                .map(Duration::from_secs)
                .map_err(|_| E::custom("duration must not be negative"))
        }
    }

    deserializer.deserialize_any(DurationVisitor)
}

/// Simple duration parser for common formats
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        let ms: u64 = ms.parse().map_err(|_| "Invalid milliseconds")?;
        Ok(Duration::from_millis(ms))
    } else if let Some(secs) = s.strip_suffix('s') {
        let secs: u64 = secs.parse().map_err(|_| "Invalid seconds")?;
        Ok(Duration::from_secs(secs))
    } else if let Some(mins) = s.strip_suffix('m') {
        let mins: u64 = mins.parse().map_err(|_| "Invalid minutes")?;
        Ok(Duration::from_secs(mins * 60))
    } else if let Some(hours) = s.strip_suffix('h') {
        let hours: u64 = hours.parse().map_err(|_| "Invalid hours")?;
        Ok(Duration::from_secs(hours * 3600))
    } else {
        let secs: u64 = s.parse().map_err(|_| "Invalid duration format")?;
        Ok(Duration::from_secs(secs))
    }
}
