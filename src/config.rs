//! Application configuration
//!
//! Loaded from a TOML file, by default `config.toml` in the platform
//! configuration directory. Every field has a default so a partial file is
//! enough.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::Error;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub ui: UiConfig,
}

/// Relay server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the relay socket binds to
    pub bind_address: String,
    /// Relay UDP port
    pub port: u16,
    /// Shared registration password
    pub password: String,
    /// Eviction sweep period, also the eviction threshold
    pub sweep_interval_secs: u64,
    /// Network interface of the tapped application, handed to the capture source
    pub capture_interface: Option<String>,
    /// Voice port of the tapped application, handed to the capture source
    pub voice_port: Option<u16>,
    /// Built-in test tone, used when no capture source is attached
    pub tone: Option<ToneConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_SERVER_PORT,
            password: String::new(),
            sweep_interval_secs: KEEPALIVE_INTERVAL_SECS,
            capture_interface: None,
            voice_port: None,
            tone: None,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr, Error> {
        parse_addr(&self.bind_address, self.port)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Test tone source settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToneConfig {
    pub session_id: u64,
    pub frequency_hz: f32,
}

impl Default for ToneConfig {
    fn default() -> Self {
        Self {
            session_id: 1,
            frequency_hz: 440.0,
        }
    }
}

/// Listener client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_address: String,
    pub server_port: u16,
    pub password: String,
    pub keepalive_interval_secs: u64,
    /// Directory receiving `<session id>.pcm` recordings
    pub save_dir: PathBuf,
    /// Enable listening on every new session
    pub listen_all: bool,
    /// Enable recording on every new session
    pub save_all: bool,
    /// Output device id as listed by `/api/devices`, default device if unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_device: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1".to_string(),
            server_port: DEFAULT_SERVER_PORT,
            password: String::new(),
            keepalive_interval_secs: KEEPALIVE_INTERVAL_SECS,
            save_dir: PathBuf::from("."),
            listen_all: false,
            save_all: false,
            output_device: None,
        }
    }
}

impl ClientConfig {
    pub fn server_addr(&self) -> Result<SocketAddr, Error> {
        parse_addr(&self.server_address, self.server_port)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }
}

/// Control surface settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub http_port: u16,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: "127.0.0.1".to_string(),
            http_port: DEFAULT_HTTP_PORT,
        }
    }
}

impl UiConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr, Error> {
        parse_addr(&self.bind_address, self.http_port)
    }
}

fn parse_addr(host: &str, port: u16) -> Result<SocketAddr, Error> {
    format!("{}:{}", host, port)
        .parse()
        .map_err(|e| Error::Config(format!("invalid address {}:{}: {}", host, port, e)))
}

/// Reject passwords the server could not tell apart from a keepalive
pub fn validate_password(password: &str) -> Result<(), Error> {
    if password.is_empty() {
        return Err(Error::Config("password must not be empty".to_string()));
    }
    if password.as_bytes() == KEEPALIVE {
        return Err(Error::Config(
            "password must differ from the keepalive sentinel".to_string(),
        ));
    }
    Ok(())
}

impl AppConfig {
    /// Default configuration file location
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "voice-tunnel")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load from `path`, else the default location, else defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, Error> {
        if let Some(path) = path {
            return Self::load(path);
        }

        match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::info!("Loading config from {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Write as TOML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Checks needed before running the server
    pub fn validate_server(&self) -> Result<(), Error> {
        validate_password(&self.server.password)?;
        if self.server.sweep_interval_secs == 0 {
            return Err(Error::Config("sweep_interval_secs must be positive".to_string()));
        }
        self.server.bind_addr()?;
        Ok(())
    }

    /// Checks needed before running the client
    pub fn validate_client(&self) -> Result<(), Error> {
        validate_password(&self.client.password)?;
        if self.client.keepalive_interval_secs == 0 {
            return Err(Error::Config(
                "keepalive_interval_secs must be positive".to_string(),
            ));
        }
        self.client.server_addr()?;
        if self.client.output_device.as_deref().is_some_and(|id| id.trim().is_empty()) {
            return Err(Error::Config("output_device must not be blank".to_string()));
        }
        if self.ui.enabled {
            self.ui.bind_addr()?;
        }
        Ok(())
    }
}
