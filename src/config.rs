//! Configuration loading and validation.
//!
//! `config.toml` holds everything except secrets. The bot token and the
//! optional moderator secret are read from environment variables whose names
//! are configured here (a `.env` file next to the config is loaded first).

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Telegram channel settings.
    pub telegram: TelegramConfig,

    /// Matcher tuning.
    #[serde(default)]
    pub pairing: PairingConfig,

    /// Report and ban thresholds.
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Database location.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Telegram-specific configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    /// Environment variable name holding the bot token.
    #[serde(default = "default_bot_token_env")]
    pub bot_token_env: String,

    /// Telegram user id of the single moderator.
    pub moderator_id: i64,

    /// Environment variable name holding the moderator's shared secret.
    /// Unset means the id check alone authorises moderator commands.
    #[serde(default)]
    pub moderator_secret_env: Option<String>,
}

/// Background matcher settings.
#[derive(Debug, Clone, Deserialize)]
pub struct PairingConfig {
    /// Fallback wake-up interval of the matcher in milliseconds.
    #[serde(default = "default_idle_ms")]
    pub idle_ms: u64,

    /// Return searching users to the menu after this many seconds.
    /// Unset waits indefinitely.
    #[serde(default)]
    pub search_timeout_secs: Option<u64>,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            idle_ms: default_idle_ms(),
            search_timeout_secs: None,
        }
    }
}

/// Report and ban policy constants.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PolicyConfig {
    /// Longest accepted report reason, in characters.
    #[serde(default = "default_max_reason_chars")]
    pub max_reason_chars: usize,

    /// Reports that trigger a temporary ban.
    #[serde(default = "default_temp_ban_threshold")]
    pub temp_ban_threshold: u64,

    /// Length of an automatic temporary ban.
    #[serde(default = "default_ban_hours")]
    pub temp_ban_hours: u32,

    /// Reports that trigger a permanent ban (0 disables the tier).
    #[serde(default = "default_permanent_ban_threshold")]
    pub permanent_ban_threshold: u64,

    /// Length of a moderator `/ban` without an explicit duration.
    #[serde(default = "default_ban_hours")]
    pub manual_ban_hours: u32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_reason_chars: default_max_reason_chars(),
            temp_ban_threshold: default_temp_ban_threshold(),
            temp_ban_hours: default_ban_hours(),
            permanent_ban_threshold: default_permanent_ban_threshold(),
            manual_ban_hours: default_ban_hours(),
        }
    }
}

/// Storage settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    /// SQLite file. Defaults to `~/.tetatet/tetatet.db`.
    #[serde(default)]
    pub database: Option<PathBuf>,
}

// Default value functions for serde

fn default_bot_token_env() -> String {
    "TETATET_BOT_TOKEN".to_owned()
}
fn default_idle_ms() -> u64 {
    500
}
fn default_max_reason_chars() -> usize {
    100
}
fn default_temp_ban_threshold() -> u64 {
    3
}
fn default_ban_hours() -> u32 {
    24
}
fn default_permanent_ban_threshold() -> u64 {
    5
}

impl Config {
    /// Check cross-field constraints serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first violated constraint.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.telegram.moderator_id <= 0 {
            anyhow::bail!("telegram.moderator_id must be a positive Telegram user id");
        }
        if self.pairing.idle_ms == 0 {
            anyhow::bail!("pairing.idle_ms must be at least 1");
        }
        if self.policy.max_reason_chars == 0 {
            anyhow::bail!("policy.max_reason_chars must be at least 1");
        }
        if self.policy.temp_ban_threshold == 0 {
            anyhow::bail!("policy.temp_ban_threshold must be at least 1");
        }
        let permanent = self.policy.permanent_ban_threshold;
        if permanent != 0 && permanent < self.policy.temp_ban_threshold {
            anyhow::bail!(
                "policy.permanent_ban_threshold ({permanent}) must not be below temp_ban_threshold ({})",
                self.policy.temp_ban_threshold
            );
        }
        Ok(())
    }

    /// Read the bot token from the configured environment variable.
    ///
    /// # Errors
    ///
    /// Returns an error if the variable is unset or empty.
    pub fn bot_token(&self) -> anyhow::Result<String> {
        self.bot_token_with(|key| std::env::var(key).ok())
    }

    /// Resolve the bot token using a custom env resolver (for testing).
    pub fn bot_token_with(&self, env: impl Fn(&str) -> Option<String>) -> anyhow::Result<String> {
        let name = &self.telegram.bot_token_env;
        env(name)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("bot token env var {name} is not set"))
    }

    /// Read the moderator secret, if one is configured.
    pub fn moderator_secret(&self) -> Option<String> {
        self.moderator_secret_with(|key| std::env::var(key).ok())
    }

    /// Resolve the moderator secret using a custom env resolver (for testing).
    pub fn moderator_secret_with(&self, env: impl Fn(&str) -> Option<String>) -> Option<String> {
        let name = self.telegram.moderator_secret_env.as_deref()?;
        env(name).filter(|v| !v.is_empty())
    }

    /// Database path, falling back to the runtime directory.
    pub fn database_path(&self, paths: &RuntimePaths) -> PathBuf {
        self.storage
            .database
            .clone()
            .unwrap_or_else(|| paths.database.clone())
    }
}

/// Load and validate the config from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed or validated.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config at {}: {e}", path.display()))?;
    let config: Config = toml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config at {}: {e}", path.display()))?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid config at {}: {e}", path.display()))?;
    Ok(config)
}

/// Resolve the default config directory (`~/.tetatet/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".tetatet"))
}

/// Well-known files under the runtime directory.
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    /// Runtime root (`~/.tetatet`).
    pub root: PathBuf,
    /// Default config file.
    pub config_toml: PathBuf,
    /// Default `.env` file with secrets.
    pub env_file: PathBuf,
    /// Default database file.
    pub database: PathBuf,
    /// Rolling log directory.
    pub logs_dir: PathBuf,
}

impl RuntimePaths {
    /// Lay out the well-known files under `root`.
    pub fn under(root: PathBuf) -> Self {
        Self {
            config_toml: root.join("config.toml"),
            env_file: root.join(".env"),
            database: root.join("tetatet.db"),
            logs_dir: root.join("logs"),
            root,
        }
    }
}

/// Runtime paths rooted at [`config_dir`].
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn runtime_paths() -> anyhow::Result<RuntimePaths> {
    Ok(RuntimePaths::under(config_dir()?))
}
