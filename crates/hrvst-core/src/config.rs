//! Application configuration management.
//!
//! The configuration holds the OAuth application credentials, the last
//! used email, the client name tokens are filed under and the preferred
//! keyring backend. It is stored at `~/.config/hrvst/config.json`;
//! `HRVST_*` environment variables override the file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::credentials::DEFAULT_CLIENT;

/// Application name used for config directory paths
const APP_NAME: &str = "hrvst";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Plaintext credential file used by the file backend
const CREDENTIALS_FILE: &str = "credentials.json";

pub const CLIENT_ID_ENV: &str = "HRVST_CLIENT_ID";
pub const CLIENT_SECRET_ENV: &str = "HRVST_CLIENT_SECRET";
pub const KEYRING_BACKEND_ENV: &str = "HRVST_KEYRING_BACKEND";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not find config directory")]
    NoConfigDir,

    #[error("Failed to access config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    /// Email of the last successful login
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyring_backend: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join(APP_NAME))
    }

    pub fn config_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::config_dir()?.join(CONFIG_FILE))
    }

    /// Where the file backend keeps secrets.
    pub fn credentials_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::config_dir()?.join(CREDENTIALS_FILE))
    }

    /// Apply `HRVST_*` overrides from the process environment.
    pub fn with_env(self) -> Self {
        self.with_env_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from `lookup`; empty values are ignored.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if let Some(v) = get(CLIENT_ID_ENV) {
            self.client_id = Some(v);
        }
        if let Some(v) = get(CLIENT_SECRET_ENV) {
            self.client_secret = Some(v);
        }
        if let Some(v) = get(KEYRING_BACKEND_ENV) {
            self.keyring_backend = Some(v);
        }
        self
    }

    /// Client name tokens are filed under.
    pub fn client_name(&self) -> &str {
        self.client
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_CLIENT)
    }

    /// Requested keyring backend, `auto` when unset.
    pub fn keyring_backend(&self) -> &str {
        self.keyring_backend
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .unwrap_or("auto")
    }
}
