//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables**: `PORT`, `BASE_URL`, `USE_SUBDOMAINS`,
//!    `REQUEST_TIMEOUT_MS`, `NO_TARGET`
//! 2. **Config file**: path via `--config <path>`, or `tunnelgate.toml` in CWD
//! 3. **Compiled defaults**: see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:3000"
//!
//! [routing]
//! mode = "path"                      # "path" or "subdomain"
//! base_url = "http://localhost:3000" # public origin of the gateway
//! no_target = "fallback"             # "fallback" or "reject"
//!
//! [tunnel]
//! request_timeout_ms = 5000
//! heartbeat_interval_secs = 30
//! channel_capacity = 256
//!
//! [assets]
//! dir = "demo"
//!
//! [logging]
//! level = "info"
//! ```

use std::fmt;
use std::path::Path;
use std::time::Duration;

use axum::http::Uri;
use serde::Deserialize;

/// Default config file looked up in the working directory.
const DEFAULT_CONFIG_FILE: &str = "tunnelgate.toml";

/// Errors that prevent the gateway from starting.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid base URL {0:?}, expected scheme://host[:port]")]
    InvalidBaseUrl(String),
    #[error("invalid value for {name}: {value:?}")]
    InvalidEnv { name: &'static str, value: String },
    #[error("tunnel.{0} must be greater than zero")]
    Zero(&'static str),
}

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub tunnel: TunnelConfig,
    #[serde(default)]
    pub assets: AssetsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind (default `0.0.0.0:3000`). `PORT` overrides the port.
    #[serde(default = "default_listen")]
    pub listen: String,
}

/// How inbound requests are mapped to tunnel endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMode {
    /// Endpoint ID is the first path segment.
    #[default]
    Path,
    /// Endpoint ID is the leading label of the `Host` header.
    Subdomain,
}

/// What to do with a request that names no endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoTargetPolicy {
    /// Send it to the longest-connected endpoint.
    #[default]
    Fallback,
    /// Answer `400 No client ID provided`.
    Reject,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoutingConfig {
    #[serde(default)]
    pub mode: RoutingMode,
    /// Public origin of the gateway (default `http://localhost:3000`).
    #[serde(default = "default_base_url")]
    pub base_url: BaseUrl,
    #[serde(default)]
    pub no_target: NoTargetPolicy,
}

impl RoutingConfig {
    /// URL at which callers reach the endpoint with the given ID.
    pub fn public_url(&self, endpoint_id: &str) -> String {
        let BaseUrl { scheme, host, port } = &self.base_url;
        let port = port.map(|p| format!(":{p}")).unwrap_or_default();
        match self.mode {
            RoutingMode::Path => format!("{scheme}://{host}{port}/{endpoint_id}"),
            RoutingMode::Subdomain => format!("{scheme}://{endpoint_id}.{host}{port}"),
        }
    }
}

/// Request forwarding and socket settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TunnelConfig {
    /// Milliseconds to wait for an endpoint's reply (default 5000).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Seconds between WebSocket pings to each endpoint (default 30).
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    /// Frames buffered per endpoint before senders wait (default 256).
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl TunnelConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

/// Static demo assets served under `/_tunnel/demo/`.
#[derive(Debug, Clone, Deserialize)]
pub struct AssetsConfig {
    #[serde(default = "default_assets_dir")]
    pub dir: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Scheme, host and optional port of the gateway's public origin.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct BaseUrl {
    scheme: String,
    host: String,
    port: Option<u16>,
}

impl BaseUrl {
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidBaseUrl(s.to_string());
        let uri: Uri = s.parse().map_err(|_| invalid())?;
        let scheme = uri.scheme_str().ok_or_else(invalid)?;
        let host = uri.host().filter(|h| !h.is_empty()).ok_or_else(invalid)?;
        if !matches!(uri.path(), "" | "/") || uri.query().is_some() {
            return Err(invalid());
        }
        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            host: host.to_ascii_lowercase(),
            port: uri.port_u16(),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

impl TryFrom<String> for BaseUrl {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl fmt::Display for BaseUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        Ok(())
    }
}

fn default_listen() -> String {
    "0.0.0.0:3000".to_string()
}
fn default_base_url() -> BaseUrl {
    BaseUrl {
        scheme: "http".to_string(),
        host: "localhost".to_string(),
        port: Some(3000),
    }
}
fn default_request_timeout_ms() -> u64 {
    5000
}
fn default_heartbeat_interval() -> u64 {
    30
}
fn default_channel_capacity() -> usize {
    256
}
fn default_assets_dir() -> String {
    "demo".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            mode: RoutingMode::default(),
            base_url: default_base_url(),
            no_target: NoTargetPolicy::default(),
        }
    }
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            dir: default_assets_dir(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, reads that file. Otherwise looks for
    /// `tunnelgate.toml` in the current directory, falling back to defaults.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => Self::from_file(DEFAULT_CONFIG_FILE)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    /// Apply environment overrides, reading variables through `var`.
    pub fn apply_env(
        &mut self,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let port = match var("PORT") {
            Some(value) => Some(
                value
                    .parse::<u16>()
                    .map_err(|_| ConfigError::InvalidEnv { name: "PORT", value })?,
            ),
            None => None,
        };
        if let Some(port) = port {
            self.server.listen = format!("0.0.0.0:{port}");
        }

        if let Some(url) = var("BASE_URL") {
            self.routing.base_url = BaseUrl::parse(&url)?;
        } else if let Some(port) = port {
            // Follow the listen port unless a public origin was configured.
            if self.routing.base_url == default_base_url() {
                self.routing.base_url.port = Some(port);
            }
        }

        if let Some(value) = var("USE_SUBDOMAINS") {
            self.routing.mode = match value.as_str() {
                "true" | "1" => RoutingMode::Subdomain,
                "false" | "0" => RoutingMode::Path,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        name: "USE_SUBDOMAINS",
                        value,
                    })
                }
            };
        }

        if let Some(value) = var("REQUEST_TIMEOUT_MS") {
            self.tunnel.request_timeout_ms = value.parse().map_err(|_| ConfigError::InvalidEnv {
                name: "REQUEST_TIMEOUT_MS",
                value,
            })?;
        }

        if let Some(value) = var("NO_TARGET") {
            self.routing.no_target = match value.as_str() {
                "fallback" => NoTargetPolicy::Fallback,
                "reject" => NoTargetPolicy::Reject,
                _ => return Err(ConfigError::InvalidEnv { name: "NO_TARGET", value }),
            };
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tunnel.request_timeout_ms == 0 {
            return Err(ConfigError::Zero("request_timeout_ms"));
        }
        if self.tunnel.heartbeat_interval_secs == 0 {
            return Err(ConfigError::Zero("heartbeat_interval_secs"));
        }
        if self.tunnel.channel_capacity == 0 {
            return Err(ConfigError::Zero("channel_capacity"));
        }
        Ok(())
    }
}
