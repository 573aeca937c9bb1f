//! Application configuration with layered loading.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//!
//! 1. **Compiled defaults**: hardcoded in struct `Default` implementations
//! 2. **Config file**: TOML file specified by `RELAY_CONFIG` env var
//! 3. **Environment variables**: `RELAY__*` env vars override specific fields
//!
//! # Configuration Sections
//!
//! - [`ServerConfig`]: HTTP server settings (bind address, concurrency)
//! - `endpoints`: relay endpoint definitions seeded into the registry
//! - [`RateLimitConfig`]: fixed-window limits and counter store selection
//! - [`UsageConfig`]: aggregation cadence and retention
//! - [`BillingConfig`]: per-relay cost and tier rates
//! - [`MetricsConfig`]: Prometheus metrics endpoint
//! - [`LoggingConfig`]: log level and format
//!
//! # Validation
//!
//! Configuration is validated at load time. Invalid configurations (empty
//! upstream URLs, zero windows, zero ports) return errors rather than
//! failing silently at the first relay.
//!
//! # Example
//!
//! ```toml
//! [server]
//! bind_address = "0.0.0.0"
//! bind_port = 3030
//!
//! [rate_limit]
//! store = "redis"
//! redis_url = "redis://127.0.0.1:6379"
//! max_requests = 100
//! window_seconds = 60
//!
//! [[endpoints]]
//! id = "ep-mainnet-a1"
//! name = "acme production"
//! chain = "eth-mainnet"
//! upstream_url = "https://eth.llamarpc.com"
//! ```

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::Path, time::Duration};

use crate::registry::RelayEndpoint;

/// HTTP server configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// IP address to bind the server to. Defaults to `127.0.0.1`.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port number to listen on. Must be greater than 0. Defaults to `3030`.
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,

    /// Maximum number of concurrent relay requests. Defaults to `1000`.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// Maximum inbound request body size in bytes. Defaults to 1 MiB.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Upstream relay timeout in seconds. Defaults to `30`.
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_bind_port() -> u16 {
    3030
}

fn default_max_concurrent_requests() -> usize {
    1000
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

fn default_request_timeout_seconds() -> u64 {
    30
}

/// Which counter store backs the rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterStoreKind {
    /// In-process map; single instance only.
    Local,
    /// Shared Redis store; correct across gateway instances.
    Redis,
}

/// Rate limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Whether admission control is enforced. Defaults to `true`.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Counter store selection. Defaults to `local`.
    #[serde(default = "default_store")]
    pub store: CounterStoreKind,

    /// Redis URL, required when `store = "redis"`.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Default admitted requests per window. Endpoints may override.
    /// Defaults to `100`.
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    /// Default window length in seconds. Defaults to `60`.
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,

    /// Whether the caller address is folded into the limiter key.
    /// Disable for deliberate single-origin load testing. Defaults to `true`.
    #[serde(default = "default_true")]
    pub per_client: bool,
}

fn default_true() -> bool {
    true
}

fn default_store() -> CounterStoreKind {
    CounterStoreKind::Local
}

fn default_max_requests() -> u32 {
    100
}

fn default_window_seconds() -> u64 {
    60
}

/// Usage aggregation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageConfig {
    /// Seconds between aggregation folds. Must be greater than 0.
    /// Defaults to `60`.
    #[serde(default = "default_aggregation_interval")]
    pub aggregation_interval_seconds: u64,

    /// Hours of hourly aggregates to retain. Defaults to `48`.
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
}

fn default_aggregation_interval() -> u64 {
    60
}

fn default_retention_hours() -> u64 {
    48
}

/// Billing configuration: relay cost rates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    /// Cost per relay in USD, applied when no tier rate matches.
    #[serde(default = "default_cost_per_relay")]
    pub cost_per_relay: f64,

    /// Per-tier cost overrides, keyed by tier name.
    #[serde(default)]
    pub tier_rates: HashMap<String, f64>,
}

fn default_cost_per_relay() -> f64 {
    0.000_000_85
}

/// Prometheus metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether the metrics endpoint is enabled. Defaults to `true`.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Application logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g. "trace", "debug", "info", "warn", "error").
    /// Defaults to `"info"`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: `"json"` or `"pretty"`. Defaults to `"pretty"`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

/// Root application configuration containing all subsystem settings.
///
/// Loaded from TOML with `RELAY__`-prefixed environment overrides using `__`
/// as the separator (e.g. `RELAY__SERVER__BIND_PORT=8080`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Deployment environment (e.g. "development", "production").
    #[serde(default = "default_environment")]
    pub environment: String,

    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Relay endpoints seeded into the registry at startup.
    #[serde(default)]
    pub endpoints: Vec<RelayEndpoint>,

    /// Rate limiter configuration.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Usage aggregation configuration.
    #[serde(default)]
    pub usage: UsageConfig,

    /// Billing configuration.
    #[serde(default)]
    pub billing: BillingConfig,

    /// Prometheus metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_environment() -> String {
    "development".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            bind_port: default_bind_port(),
            max_concurrent_requests: default_max_concurrent_requests(),
            max_body_bytes: default_max_body_bytes(),
            request_timeout_seconds: default_request_timeout_seconds(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            store: CounterStoreKind::Local,
            redis_url: None,
            max_requests: default_max_requests(),
            window_seconds: default_window_seconds(),
            per_client: true,
        }
    }
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            aggregation_interval_seconds: default_aggregation_interval(),
            retention_hours: default_retention_hours(),
        }
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self { cost_per_relay: default_cost_per_relay(), tier_rates: HashMap::new() }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: default_log_format() }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            server: ServerConfig::default(),
            endpoints: Vec::new(),
            rate_limit: RateLimitConfig::default(),
            usage: UsageConfig::default(),
            billing: BillingConfig::default(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file with environment variable
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, parsed, or
    /// deserialized.
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let config_builder = Config::builder()
            .set_default("environment", "development")?
            .set_default("server.bind_address", "127.0.0.1")?
            .set_default("server.bind_port", 3030)?
            .set_default("server.max_concurrent_requests", 1000)?
            .set_default("rate_limit.enabled", true)?
            .set_default("rate_limit.max_requests", 100)?
            .set_default("rate_limit.window_seconds", 60)?
            .set_default("usage.aggregation_interval_seconds", 60)?
            .set_default("usage.retention_hours", 48)?
            .set_default("metrics.enabled", true)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name(&config_path.as_ref().to_string_lossy()).required(false))
            .add_source(Environment::with_prefix("RELAY").separator("__"))
            .build()?;

        config_builder.try_deserialize()
    }

    /// Loads configuration from `config/config.toml` with fallback to
    /// defaults. The path can be overridden with the `RELAY_CONFIG` env var.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration cannot be loaded.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("RELAY_CONFIG").unwrap_or_else(|_| "config/config.toml".to_string());
        Self::from_file(&config_path)
    }

    /// Returns the parsed socket address for the HTTP server.
    ///
    /// # Errors
    ///
    /// Returns an error string if the address cannot be parsed.
    pub fn socket_addr(&self) -> Result<std::net::SocketAddr, String> {
        format!("{}:{}", self.server.bind_address, self.server.bind_port).parse().map_err(|_| {
            format!("Invalid socket address: {}:{}", self.server.bind_address, self.server.bind_port)
        })
    }

    /// Default rate limit window as a [`Duration`].
    #[must_use]
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit.window_seconds)
    }

    /// Upstream relay timeout as a [`Duration`].
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_seconds)
    }

    /// Aggregation fold interval as a [`Duration`].
    #[must_use]
    pub fn aggregation_interval(&self) -> Duration {
        Duration::from_secs(self.usage.aggregation_interval_seconds)
    }

    /// Aggregate retention horizon as a [`Duration`].
    #[must_use]
    pub fn aggregate_retention(&self) -> Duration {
        Duration::from_secs(self.usage.retention_hours * 60 * 60)
    }

    /// Validates the configuration for correctness and consistency.
    ///
    /// # Errors
    ///
    /// Returns a descriptive error string if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        for endpoint in &self.endpoints {
            if endpoint.id.is_empty() {
                return Err("Endpoint with empty id".to_string());
            }
            if endpoint.upstream_url.is_empty() {
                return Err(format!("Empty upstream URL for endpoint: {}", endpoint.id));
            }
            if !endpoint.upstream_url.starts_with("http") {
                return Err(format!(
                    "Invalid upstream URL for endpoint {}: {}",
                    endpoint.id, endpoint.upstream_url
                ));
            }
            if let Some(limit) = endpoint.rate_limit {
                if limit.window_seconds == 0 {
                    return Err(format!("Zero rate limit window for endpoint: {}", endpoint.id));
                }
            }
        }

        if self.rate_limit.window_seconds == 0 {
            return Err("Rate limit window must be greater than 0".to_string());
        }

        if self.rate_limit.store == CounterStoreKind::Redis && self.rate_limit.redis_url.is_none() {
            return Err("rate_limit.redis_url is required when store = \"redis\"".to_string());
        }

        if self.usage.aggregation_interval_seconds == 0 {
            return Err("Aggregation interval must be greater than 0".to_string());
        }

        if self.server.max_concurrent_requests == 0 {
            return Err("Max concurrent requests must be greater than 0".to_string());
        }

        if self.server.bind_port == 0 {
            return Err("Bind port must be greater than 0".to_string());
        }

        if self.server.request_timeout_seconds == 0 {
            return Err("Request timeout must be greater than 0".to_string());
        }

        if self.billing.cost_per_relay < 0.0 {
            return Err("Cost per relay cannot be negative".to_string());
        }

        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err("Logging format must be 'json' or 'pretty'".to_string());
        }

        Ok(())
    }
}
