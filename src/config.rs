//! Server and client configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::SyncError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP API port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Change log database
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

/// Password gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Shared password; unset rejects every verification
    #[serde(default)]
    pub password: Option<String>,

    /// Failed attempts allowed per IP inside one window
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Lockout window in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the sync gateway
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Local state database (cursor, items, pending queue)
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,

    /// Quiet period after the last local edit before pushing
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Background pull interval while idle and visible
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

// Defaults
fn default_http_port() -> u16 { 8787 }
fn default_database_path() -> PathBuf { PathBuf::from("listsync.db") }
fn default_max_attempts() -> u32 { 5 }
fn default_window_secs() -> u64 { 60 * 60 }
fn default_server_url() -> String { "http://localhost:8787".to_string() }
fn default_state_path() -> PathBuf { PathBuf::from("listsync-client.db") }
fn default_debounce_ms() -> u64 { 1500 }
fn default_poll_interval_ms() -> u64 { 10_000 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            database_path: default_database_path(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            password: None,
            max_attempts: default_max_attempts(),
            window_secs: default_window_secs(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            state_path: default_state_path(),
            debounce_ms: default_debounce_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl ClientConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SyncError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, SyncError> {
        let config: Self = toml::from_str(content).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the server or scheduler cannot run with.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.client.poll_interval_ms == 0 {
            return Err(SyncError::Config("client.poll_interval_ms must be greater than 0".to_string()));
        }
        if self.auth.max_attempts == 0 {
            return Err(SyncError::Config("auth.max_attempts must be greater than 0".to_string()));
        }
        Ok(())
    }

    /// Load `path` if it exists, defaults otherwise
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, SyncError> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), SyncError> {
        let content = toml::to_string_pretty(self).map_err(|e| SyncError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
