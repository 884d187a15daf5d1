//! Configuration management for Botcast
//!
//! A bot is described by a small TOML file:
//!
//! ```toml
//! bot_name = "examplebot"
//! secrets_dir = "~/bots/examplebot/secrets"
//! # history_file = "~/bots/examplebot/history.json"
//! delay_secs = 3600
//!
//! [rate_limits]
//! mastodon = 300
//! birdsite = 60
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Name used when a bot doesn't set one
pub const DEFAULT_BOT_NAME: &str = "A bot";

/// Seconds `nap` sleeps for unless configured otherwise
pub const DEFAULT_DELAY_SECS: u64 = 3600;

/// Posts per hour allowed for a destination without a `[rate_limits]` entry
pub const DEFAULT_MAX_PER_HOUR: u32 = 300;

fn default_bot_name() -> String {
    DEFAULT_BOT_NAME.to_string()
}

fn default_delay_secs() -> u64 {
    DEFAULT_DELAY_SECS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_bot_name")]
    pub bot_name: String,

    /// Directory holding credential directories and, by default, the history
    #[serde(default)]
    pub secrets_dir: Option<String>,

    #[serde(default)]
    pub history_file: Option<String>,

    #[serde(default = "default_delay_secs")]
    pub delay_secs: u64,

    /// Destination name to posts per hour; `0` disables limiting
    #[serde(default)]
    pub rate_limits: HashMap<String, u32>,
}

impl Config {
    /// Configuration for `bot_name` keeping its secrets in `secrets_dir`
    pub fn new(bot_name: impl Into<String>, secrets_dir: impl Into<String>) -> Self {
        Self {
            bot_name: bot_name.into(),
            secrets_dir: Some(secrets_dir.into()),
            history_file: None,
            delay_secs: DEFAULT_DELAY_SECS,
            rate_limits: HashMap::new(),
        }
    }

    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Expanded secrets directory
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingField` if no secrets directory is set.
    pub fn secrets_path(&self) -> Result<PathBuf> {
        let dir = self
            .secrets_dir
            .as_deref()
            .ok_or_else(|| ConfigError::MissingField("secrets_dir".to_string()))?;
        Ok(expand_path(dir))
    }

    /// History file, `<secrets_dir>/<bot_name>-history.json` unless set
    pub fn history_path(&self) -> Result<PathBuf> {
        match &self.history_file {
            Some(file) => Ok(expand_path(file)),
            None => Ok(self
                .secrets_path()?
                .join(format!("{}-history.json", self.bot_name))),
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }

    /// Posts per hour allowed for `destination`
    pub fn rate_limit(&self, destination: &str) -> u32 {
        self.rate_limits
            .get(destination)
            .copied()
            .unwrap_or(DEFAULT_MAX_PER_HOUR)
    }
}

fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).to_string())
}

/// Resolve the configuration file path under the XDG config directory
///
/// `BOTCAST_CONFIG` overrides the default of `<config dir>/botcast/config.toml`.
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("BOTCAST_CONFIG") {
        return Ok(expand_path(&path));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("botcast").join("config.toml"))
}
