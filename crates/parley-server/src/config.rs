//! Server configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration file
//! - Environment variables (`PARLEY_HOST`, `PARLEY_PORT`, and nested keys such
//!   as `PARLEY__CHAT__PRESENCE_THRESHOLD`)

use anyhow::{Context, Result};
use parley_core::ChatConfig;
use parley_protocol::{Profile, UserId};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Namespace used when a request does not name one.
    #[serde(default = "default_namespace")]
    pub default_namespace: String,

    /// Chat engine tuning.
    #[serde(default)]
    pub chat: ChatSection,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Users known to the built-in directory.
    #[serde(default)]
    pub directory: DirectoryConfig,
}

/// Chat engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSection {
    /// Backlog above which a user is reported offline.
    #[serde(default = "default_presence_threshold")]
    pub presence_threshold: usize,

    /// Keep-alive interval of idle streams in milliseconds.
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,

    /// Stream token lifetime in seconds.
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,

    /// Optional mailbox bound. Unbounded when absent.
    #[serde(default)]
    pub max_backlog: Option<usize>,

    /// Restrict sessions to friends.
    #[serde(default)]
    pub friends_only: bool,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// Built-in user directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryConfig {
    #[serde(default)]
    pub users: Vec<UserEntry>,
}

/// One directory user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEntry {
    pub id: UserId,
    pub display_name: String,
    #[serde(default)]
    pub url: Option<String>,
    /// Explicit friend list; everyone else is a friend when absent.
    #[serde(default)]
    pub friends: Option<Vec<UserId>>,
}

impl UserEntry {
    /// The public profile of this user.
    #[must_use]
    pub fn profile(&self) -> Profile {
        let profile = Profile::new(self.id.clone(), self.display_name.clone());
        match &self.url {
            Some(url) => profile.with_url(url.clone()),
            None => profile,
        }
    }
}

// Default value functions
fn default_host() -> String {
    std::env::var("PARLEY_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("PARLEY_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_true() -> bool {
    true
}

fn default_presence_threshold() -> usize {
    5
}

fn default_heartbeat_ms() -> u64 {
    5_000 // 5 seconds
}

fn default_token_ttl() -> u64 {
    3_600 // 1 hour
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            default_namespace: default_namespace(),
            chat: ChatSection::default(),
            metrics: MetricsConfig::default(),
            directory: DirectoryConfig::default(),
        }
    }
}

impl Default for ChatSection {
    fn default() -> Self {
        Self {
            presence_threshold: default_presence_threshold(),
            heartbeat_ms: default_heartbeat_ms(),
            token_ttl_secs: default_token_ttl(),
            max_backlog: None,
            friends_only: false,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl ChatSection {
    /// Engine configuration for [`parley_core::ChatService`].
    #[must_use]
    pub fn engine_config(&self) -> ChatConfig {
        ChatConfig {
            presence_threshold: self.presence_threshold,
            heartbeat: Duration::from_millis(self.heartbeat_ms),
            max_backlog: self.max_backlog,
        }
    }

    /// Stream token lifetime.
    #[must_use]
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }
}

impl Config {
    /// Load configuration from the first config file found, layered with
    /// `PARLEY__` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "parley.toml",
            "/etc/parley/parley.toml",
            "~/.config/parley/parley.toml",
        ];

        let found = config_paths
            .iter()
            .map(|path| shellexpand::tilde(path).into_owned())
            .find(|path| Path::new(path).exists());

        let base = match &found {
            Some(path) => {
                tracing::info!("Loading configuration from {}", path);
                Self::from_file(path)?
            }
            None => Self::default(),
        };

        let layered = config::Config::builder()
            .add_source(
                config::Config::try_from(&base).context("Failed to layer configuration")?,
            )
            .add_source(
                config::Environment::with_prefix("PARLEY")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to assemble configuration")?;

        layered
            .try_deserialize()
            .context("Failed to parse configuration")
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }
}
