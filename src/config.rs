//! Gateway configuration
//!
//! Configuration is read from a YAML file once at startup. The route list is
//! order-sensitive: routes are matched in the order they appear.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "WAYPOINT_CONFIG";

/// Environment variable overriding `server.listen_addr`
pub const LISTEN_ENV: &str = "LISTEN";

const DEFAULT_CONFIG_PATH: &str = "waypoint.yaml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default = "default_routes")]
    pub routes: Vec<RouteConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Largest inbound request (head plus body) the gateway will buffer
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// A single `prefix -> upstream` rule as written in the config file
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RouteConfig {
    pub prefix: String,
    pub upstream: String,
    #[serde(default)]
    pub name: Option<String>,
}

fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_request_bytes() -> usize {
    1024 * 1024
}

fn default_connect_timeout_ms() -> u64 {
    2_000
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_routes() -> Vec<RouteConfig> {
    vec![
        RouteConfig {
            prefix: "/user".to_string(),
            upstream: "http://user-service".to_string(),
            name: Some("user-service".to_string()),
        },
        RouteConfig {
            prefix: "/post".to_string(),
            upstream: "http://post-service".to_string(),
            name: Some("post-service".to_string()),
        },
    ]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            max_request_bytes: default_max_request_bytes(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            upstream: UpstreamConfig::default(),
            routes: default_routes(),
        }
    }
}

impl UpstreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Config {
    /// Load configuration using the process environment.
    ///
    /// The file named by `WAYPOINT_CONFIG` is required to exist. Without the
    /// variable, `waypoint.yaml` is used if present and the built-in defaults
    /// otherwise. `LISTEN` overrides the listen address in every case.
    pub fn load() -> Result<Self> {
        let mut cfg = match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::from_file(&path)?,
            Err(_) if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(DEFAULT_CONFIG_PATH)?
            }
            Err(_) => {
                tracing::info!("No config file found, using built-in defaults");
                Self::default()
            }
        };

        if let Ok(listen_addr) = std::env::var(LISTEN_ENV) {
            cfg.server.listen_addr = listen_addr;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Read and validate a YAML config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        Self::from_yaml(&raw)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let cfg: Config = serde_yaml::from_str(raw).context("Failed to parse YAML")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check the invariants the router relies on
    pub fn validate(&self) -> Result<()> {
        if self.routes.is_empty() {
            bail!("At least one route must be configured");
        }

        if self.upstream.connect_timeout_ms == 0 || self.upstream.request_timeout_ms == 0 {
            bail!("Upstream timeouts must be greater than zero");
        }

        if self.server.max_request_bytes == 0 {
            bail!("server.max_request_bytes must be greater than zero");
        }

        let mut seen = HashSet::new();
        for route in &self.routes {
            if !route.prefix.starts_with('/') {
                bail!("Route prefix {:?} must start with '/'", route.prefix);
            }

            if !seen.insert(route.prefix.as_str()) {
                bail!("Duplicate route prefix {:?}", route.prefix);
            }

            let url = url::Url::parse(&route.upstream)
                .with_context(|| format!("Invalid upstream URL for prefix {}", route.prefix))?;

            if url.scheme() != "http" {
                bail!(
                    "Upstream {} for prefix {} must use http://",
                    route.upstream,
                    route.prefix
                );
            }

            if url.host_str().is_none() {
                bail!("Upstream {} for prefix {} has no host", route.upstream, route.prefix);
            }
        }

        Ok(())
    }
}
