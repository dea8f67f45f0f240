//! Application configuration with layered loading.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//!
//! 1. **Compiled defaults**: set on the builder and mirrored by `Default` impls
//! 2. **Config file**: TOML file given by `--config` or the `GATE_CONFIG` env var
//! 3. **Environment variables**: `GATE__SECTION__FIELD` overrides single fields
//!
//! # Configuration Sections
//!
//! - [`ServerConfig`]: listen address, proxy trust, body limit, liveness and health settings
//! - [`LimitsConfig`]: per-origin request budget and connection concurrency
//! - [`BlocksConfig`]: block-number refresh and the `eth_getLogs` range ceiling
//! - [`LoggingConfig`]: log level and format
//! - [`MethodsConfig`]: extra methods admitted on top of the built-in whitelist
//! - [`BackendConfig`]: one upstream node, grouped by chain
//!
//! # Example
//!
//! ```toml
//! workers = 4
//!
//! [limits]
//! ratelimit = 100
//! concurrency = 50
//!
//! [blocks]
//! refresh_seconds = 10
//! max_block_range = 10000
//!
//! [[backends]]
//! chain = "mainnet"
//! url = "http://127.0.0.1:8545"
//! ws_url = "ws://127.0.0.1:8546"
//! trace = true
//! ```

use ahash::AHashMap;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::Path, sync::Arc, time::Duration};

/// HTTP and WebSocket listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind. Defaults to `127.0.0.1`.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on. Defaults to `8544`.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Trust `X-Forwarded-For` for the client address. Defaults to `true`.
    #[serde(default = "default_true")]
    pub reverse_proxy: bool,

    /// Location that bare `GET` requests are redirected to instead of the banner.
    #[serde(default)]
    pub redirect: Option<String>,

    /// Maximum request body and WebSocket message size in bytes. Defaults to 10 MiB.
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,

    /// Seconds between WebSocket liveness pings. Defaults to `60`.
    #[serde(default = "default_ping_interval_seconds")]
    pub ping_interval_seconds: u64,

    /// Maximum age in seconds of the latest block for `/health` to report healthy.
    #[serde(default = "default_healthy_age_seconds")]
    pub healthy_age_seconds: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8544
}

fn default_true() -> bool {
    true
}

fn default_max_body_size() -> usize {
    10_485_760
}

fn default_ping_interval_seconds() -> u64 {
    60
}

fn default_healthy_age_seconds() -> u64 {
    1800
}

/// Per-origin limits enforced by the authority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Length of one counting window in seconds. Defaults to `60`.
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,

    /// Calls an origin may make per window. Defaults to `100`.
    #[serde(default = "default_ratelimit")]
    pub ratelimit: u64,

    /// Live WebSocket sessions an origin may hold. Defaults to `50`.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_interval_seconds() -> u64 {
    60
}

fn default_ratelimit() -> u64 {
    100
}

fn default_concurrency() -> usize {
    50
}

/// Block-number tracking.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlocksConfig {
    /// Seconds between block-number refreshes. Unset disables the cache.
    #[serde(default)]
    pub refresh_seconds: Option<u64>,

    /// Largest `toBlock - fromBlock` admitted for range-sensitive methods.
    #[serde(default)]
    pub max_block_range: Option<u64>,
}

/// Application logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "trace", "debug", "info"). Defaults to `"info"`.
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

/// Extensions to the built-in method policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MethodsConfig {
    /// Methods admitted on every backend in addition to the default whitelist.
    #[serde(default)]
    pub allow: Vec<String>,
}

/// One upstream node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Chain name; doubles as the URL path segment clients use.
    pub chain: String,

    /// HTTP JSON-RPC endpoint.
    pub url: String,

    /// WebSocket endpoint. Without it the chain does not accept WebSocket clients.
    #[serde(default)]
    pub ws_url: Option<String>,

    /// Admit `trace_*` and `debug_*` methods.
    #[serde(default)]
    pub trace: bool,

    /// Admit the installable-filter methods.
    #[serde(default)]
    pub filter: bool,

    /// Per-call timeout in seconds. Defaults to `120`.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_timeout_seconds() -> u64 {
    120
}

impl BackendConfig {
    #[must_use]
    pub fn new(chain: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            chain: chain.into(),
            url: url.into(),
            ws_url: None,
            trace: false,
            filter: false,
            timeout_seconds: default_timeout_seconds(),
        }
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Worker processes to run. `0` serves from the supervising process itself.
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub blocks: BlocksConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub methods: MethodsConfig,

    #[serde(default)]
    pub backends: Vec<BackendConfig>,
}

fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            reverse_proxy: true,
            redirect: None,
            max_body_size: default_max_body_size(),
            ping_interval_seconds: default_ping_interval_seconds(),
            healthy_age_seconds: default_healthy_age_seconds(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval_seconds(),
            ratelimit: default_ratelimit(),
            concurrency: default_concurrency(),
        }
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
            workers: default_workers(),
            server: ServerConfig::default(),
            limits: LimitsConfig::default(),
            blocks: BlocksConfig::default(),
            logging: LoggingConfig::default(),
            methods: MethodsConfig::default(),
            backends: vec![BackendConfig::new("mainnet", "http://127.0.0.1:8545")],
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file with environment variable overrides.
    ///
    /// Use `__` as a separator for nested fields (e.g., `GATE__SERVER__PORT=9000`).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, parsed, or deserialized.
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let workers = i64::try_from(default_workers()).unwrap_or(1);
        let config_builder = Config::builder()
            .set_default("workers", workers)?
            .set_default("server.host", default_host())?
            .set_default("server.port", i64::from(default_port()))?
            .set_default("server.reverse_proxy", true)?
            .set_default("server.max_body_size", 10_485_760_i64)?
            .set_default("server.ping_interval_seconds", 60)?
            .set_default("server.healthy_age_seconds", 1800)?
            .set_default("limits.interval_seconds", 60)?
            .set_default("limits.ratelimit", 100)?
            .set_default("limits.concurrency", 50)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name(&config_path.as_ref().to_string_lossy()).required(false))
            .add_source(Environment::with_prefix("GATE").separator("__"))
            .build()?;

        config_builder.try_deserialize()
    }

    /// Loads configuration from `config/config.toml`, or the path in `GATE_CONFIG`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration cannot be loaded or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("GATE_CONFIG").unwrap_or_else(|_| "config/config.toml".to_string());
        Self::from_file(&config_path)
    }

    /// Returns the listen address.
    ///
    /// # Errors
    ///
    /// Returns an error string if host and port do not form a socket address.
    pub fn socket_addr(&self) -> Result<SocketAddr, String> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| format!("Invalid listen address {}:{}: {e}", self.server.host, self.server.port))
    }

    #[must_use]
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.limits.interval_seconds)
    }

    #[must_use]
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.server.ping_interval_seconds)
    }

    #[must_use]
    pub fn block_refresh(&self) -> Option<Duration> {
        self.blocks.refresh_seconds.map(Duration::from_secs)
    }

    /// Groups backends by chain, keeping configuration order inside each group.
    #[must_use]
    pub fn backend_groups(&self) -> BackendGroups {
        BackendGroups::from_backends(&self.backends)
    }

    /// Validates the configuration.
    ///
    /// Checks that:
    /// - At least one backend is configured
    /// - Backend URLs carry `http`/`ws` schemes
    /// - Windows, budgets and timeouts are greater than zero
    /// - Logging format is either `"json"` or `"pretty"`
    ///
    /// # Errors
    ///
    /// Returns a descriptive error string if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        if self.backends.is_empty() {
            return Err("No backends configured".to_string());
        }

        for backend in &self.backends {
            if backend.chain.is_empty() || backend.chain.contains('/') {
                return Err(format!("Invalid chain name: {:?}", backend.chain));
            }
            if !backend.url.starts_with("http") {
                return Err(format!("Invalid URL for chain {}: {}", backend.chain, backend.url));
            }
            if let Some(ref ws_url) = backend.ws_url {
                if !ws_url.starts_with("ws") {
                    return Err(format!(
                        "Invalid WebSocket URL for chain {}: {}",
                        backend.chain, ws_url
                    ));
                }
            }
            if backend.timeout_seconds == 0 {
                return Err(format!("Timeout for chain {} must be greater than 0", backend.chain));
            }
        }

        if self.limits.interval_seconds == 0 {
            return Err("Limit interval must be greater than 0".to_string());
        }

        if self.limits.ratelimit == 0 {
            return Err("Rate limit must be greater than 0".to_string());
        }

        if self.server.ping_interval_seconds == 0 {
            return Err("Ping interval must be greater than 0".to_string());
        }

        if self.blocks.refresh_seconds == Some(0) {
            return Err("Block refresh interval must be greater than 0".to_string());
        }

        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err("Logging format must be 'json' or 'pretty'".to_string());
        }

        self.socket_addr().map(|_| ())
    }
}

/// Backends grouped by chain. Only the first backend of a group receives traffic.
#[derive(Debug, Clone, Default)]
pub struct BackendGroups {
    groups: AHashMap<String, Vec<Arc<BackendConfig>>>,
    order: Vec<String>,
}

impl BackendGroups {
    #[must_use]
    pub fn from_backends(backends: &[BackendConfig]) -> Self {
        let mut groups: AHashMap<String, Vec<Arc<BackendConfig>>> = AHashMap::new();
        let mut order = Vec::new();
        for backend in backends {
            if !groups.contains_key(&backend.chain) {
                order.push(backend.chain.clone());
            }
            groups.entry(backend.chain.clone()).or_default().push(Arc::new(backend.clone()));
        }
        Self { groups, order }
    }

    /// The backend dispatched to for `chain`.
    #[must_use]
    pub fn primary(&self, chain: &str) -> Option<&Arc<BackendConfig>> {
        self.groups.get(chain).and_then(|group| group.first())
    }

    #[must_use]
    pub fn group(&self, chain: &str) -> Option<&[Arc<BackendConfig>]> {
        self.groups.get(chain).map(Vec::as_slice)
    }

    /// Chain names in configuration order.
    pub fn chains(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Primary backend of every chain, in configuration order.
    pub fn primaries(&self) -> impl Iterator<Item = &Arc<BackendConfig>> {
        self.order.iter().filter_map(|chain| self.primary(chain))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
