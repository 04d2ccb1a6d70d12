//! Configuration for the `GroupLink` session client.
//!
//! Layered with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attributes)
//! 3. TOML config file (`~/.config/grouplink/config.toml`)
//! 4. Compiled defaults
//!
//! A missing default config file is not an error; an explicit `--config`
//! path that doesn't exist is.

use std::path::PathBuf;
use std::time::Duration;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    network: NetworkFileConfig,
    reconnect: ReconnectFileConfig,
}

/// `[network]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct NetworkFileConfig {
    endpoint: Option<String>,
    connect_timeout_secs: Option<u64>,
    channel_capacity: Option<usize>,
}

/// `[reconnect]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ReconnectFileConfig {
    initial_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    max_attempts: Option<u32>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Automatic reconnection policy: exponential backoff with a retry budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Base delay; attempt `n` waits `initial_delay * 2^n`, capped.
    pub initial_delay: Duration,
    /// Upper bound on the backoff delay.
    pub max_delay: Duration,
    /// Consecutive failed attempts tolerated before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Backoff delay before reconnect attempt `attempt` (1-based):
    /// `min(initial_delay * 2^attempt, max_delay)`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = u64::try_from(self.initial_delay.as_millis()).unwrap_or(u64::MAX);
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(base.saturating_mul(factor)).min(self.max_delay)
    }
}

/// Fully resolved session client configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base WebSocket endpoint; the connection URL is
    /// `<endpoint>/<user_id>/<group_id>/ws?token=...`.
    pub endpoint: String,
    /// Timeout for the WebSocket handshake.
    pub connect_timeout: Duration,
    /// Capacity of the connection event channel.
    pub channel_capacity: usize,
    /// Reconnection policy.
    pub reconnect: ReconnectPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://localhost:8000/api".to_string(),
            connect_timeout: Duration::from_secs(10),
            channel_capacity: 256,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl SessionConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if an explicit config file cannot be read or
    /// if any config file fails to parse.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `SessionConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default. Separated from `load()` so it can be
    /// unit tested without touching the filesystem.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();
        let reconnect_defaults = ReconnectPolicy::default();

        Self {
            endpoint: cli
                .endpoint
                .clone()
                .or_else(|| file.network.endpoint.clone())
                .unwrap_or(defaults.endpoint),
            connect_timeout: file
                .network
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            channel_capacity: file
                .network
                .channel_capacity
                .unwrap_or(defaults.channel_capacity),
            reconnect: ReconnectPolicy {
                initial_delay: file
                    .reconnect
                    .initial_delay_ms
                    .map_or(reconnect_defaults.initial_delay, Duration::from_millis),
                max_delay: file
                    .reconnect
                    .max_delay_ms
                    .map_or(reconnect_defaults.max_delay, Duration::from_millis),
                max_attempts: file
                    .reconnect
                    .max_attempts
                    .unwrap_or(reconnect_defaults.max_attempts),
            },
        }
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "GroupLink group-chat session client")]
pub struct CliArgs {
    /// Base WebSocket endpoint of the chat backend.
    #[arg(long, env = "GROUPLINK_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Identity-provider user id to connect as.
    #[arg(long, env = "GROUPLINK_USER")]
    pub user_id: Option<String>,

    /// Group to join.
    #[arg(long, env = "GROUPLINK_GROUP")]
    pub group_id: Option<i64>,

    /// Pre-issued bearer token.
    #[arg(long, env = "GROUPLINK_TOKEN")]
    pub token: Option<String>,

    /// Path to config file (default: `~/.config/grouplink/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "GROUPLINK_LOG")]
    pub log_level: String,
}

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `None`, the default path is tried and a missing file is treated as
/// empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("grouplink").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
