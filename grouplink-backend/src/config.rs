//! Configuration system for the `GroupLink` backend.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/grouplink-backend/config.toml`)
//! 4. Compiled defaults

use std::path::PathBuf;

use crate::groups::DEFAULT_HISTORY_PAGE_SIZE;

/// Errors that can occur when loading backend configuration.
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

/// Top-level TOML config file structure for the backend.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct BackendConfigFile {
    server: ServerFileConfig,
}

/// `[server]` section of the backend config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    history_page_size: Option<usize>,
}

/// CLI arguments for the backend server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "GroupLink backend server")]
pub struct BackendCliArgs {
    /// Address to bind the backend server to.
    #[arg(short, long, env = "GROUPLINK_BACKEND_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/grouplink-backend/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Number of messages returned per history page.
    #[arg(long)]
    pub history_page_size: Option<usize>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "GROUPLINK_BACKEND_LOG")]
    pub log_level: String,
}

/// Fully resolved backend server configuration.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Address to bind the server to (e.g., `0.0.0.0:8000`).
    pub bind_addr: String,
    /// Number of messages returned per history page.
    pub history_page_size: usize,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
            history_page_size: DEFAULT_HISTORY_PAGE_SIZE,
            log_level: "info".to_string(),
        }
    }
}

impl BackendConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path is tried and a missing
    /// file is treated as empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed.
    pub fn load(cli: &BackendCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `BackendConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &BackendCliArgs, file: &BackendConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            bind_addr: cli
                .bind
                .clone()
                .or_else(|| file.server.bind_addr.clone())
                .unwrap_or(defaults.bind_addr),
            history_page_size: cli
                .history_page_size
                .or(file.server.history_page_size)
                .unwrap_or(defaults.history_page_size),
            log_level: cli.log_level.clone(),
        }
    }
}

/// Load and parse a TOML config file for the backend.
fn load_config_file(
    explicit_path: Option<&std::path::Path>,
) -> Result<BackendConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(BackendConfigFile::default());
        };
        config_dir.join("grouplink-backend").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BackendConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
