//! Configuration management for limestone.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

use chrono::TimeDelta;
use chrono_tz::Tz;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "limestone";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "limestone.db";

/// Environment variable prefix.
const ENV_PREFIX: &str = "LIMESTONE_";

/// Placeholder shown instead of secrets.
const REDACTED: &str = "********";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `LIMESTONE_`, sections split on
///    `__`, e.g. `LIMESTONE_AUTH__API_KEY`)
/// 2. TOML config file at `~/.config/limestone/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration.
    pub server: ServerConfig,
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Credentials and API keys.
    pub auth: AuthConfig,
    /// Aggregation windows and timezone.
    pub dashboard: DashboardConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on.
    pub bind: String,
    /// Lifetime of an operator session in hours.
    pub session_ttl_hours: u32,
    /// Name of the session cookie.
    pub cookie_name: String,
}

/// Storage-related configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/limestone/limestone.db`
    pub database_path: Option<PathBuf>,
}

/// Operator credential and static API keys.
///
/// A missing value disables whatever it guards: with no `api_key` every
/// ingest is rejected, with no `username` nobody can log in.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Operator login name.
    pub username: Option<String>,
    /// Operator password.
    pub password: Option<String>,
    /// Bearer token nodes use for `/update`.
    pub api_key: Option<String>,
    /// Bearer token required (in addition to a session) for `/reset`.
    pub reset_key: Option<String>,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| REDACTED);
        f.debug_struct("AuthConfig")
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("api_key", &redact(&self.api_key))
            .field("reset_key", &redact(&self.reset_key))
            .finish()
    }
}

/// Aggregation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    /// IANA timezone used for daily history buckets.
    pub timezone: String,
    /// Number of days in the history view.
    pub history_days: u32,
    /// Lookback of the trend view in hours.
    pub trend_hours: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            session_ttl_hours: 12,
            cookie_name: "limestone_session".to_string(),
        }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
            history_days: 7,
            trend_hours: 24,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        self.timezone()?;
        self.bind_addr()?;

        if self.dashboard.history_days == 0 {
            return Err(Error::ConfigValidation {
                message: "history_days must be greater than 0".to_string(),
            });
        }

        if self.dashboard.trend_hours == 0 {
            return Err(Error::ConfigValidation {
                message: "trend_hours must be greater than 0".to_string(),
            });
        }

        if self.server.session_ttl_hours == 0 {
            return Err(Error::ConfigValidation {
                message: "session_ttl_hours must be greater than 0".to_string(),
            });
        }

        if self.server.cookie_name.is_empty()
            || !self
                .server
                .cookie_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(Error::ConfigValidation {
                message: format!("invalid cookie_name: {:?}", self.server.cookie_name),
            });
        }

        Ok(())
    }

    /// The configured history timezone.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is not a known IANA timezone.
    pub fn timezone(&self) -> Result<Tz> {
        self.dashboard
            .timezone
            .parse::<Tz>()
            .map_err(|_| Error::UnknownTimezone {
                name: self.dashboard.timezone.clone(),
            })
    }

    /// The configured listen address.
    ///
    /// # Errors
    ///
    /// Returns an error if `server.bind` is not a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.server
            .bind
            .parse()
            .map_err(|_| Error::ConfigValidation {
                message: format!("invalid bind address: {}", self.server.bind),
            })
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Session lifetime.
    #[must_use]
    pub fn session_ttl(&self) -> TimeDelta {
        TimeDelta::hours(i64::from(self.server.session_ttl_hours))
    }

    /// Trend lookback.
    #[must_use]
    pub fn trend_lookback(&self) -> TimeDelta {
        TimeDelta::hours(i64::from(self.dashboard.trend_hours))
    }

    /// A copy with every secret replaced by a placeholder, for display.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let redact = |v: &Option<String>| v.as_ref().map(|_| REDACTED.to_string());
        let mut copy = self.clone();
        copy.auth.password = redact(&self.auth.password);
        copy.auth.api_key = redact(&self.auth.api_key);
        copy.auth.reset_key = redact(&self.auth.reset_key);
        copy
    }
}
