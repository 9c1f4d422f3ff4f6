//! Configuration system for the messenger peer.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $MESSENGER_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/messenger/config.toml
//!   3. ~/.config/messenger/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default dial timeout for TCP connects and UDP socket setup.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default total attempts per image packet.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default spacing between outbound image packets.
pub const DEFAULT_SEND_INTERVAL: Duration = Duration::from_millis(100);

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MessengerConfig {
    pub identity: IdentityConfig,
    pub directory: DirectoryConfig,
    pub network: NetworkConfig,
    pub transport: TransportConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Username registered with the directory. Required for `start`.
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Base URL of the directory service.
    pub server: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Host the listeners bind to.
    pub bind_host: String,
    /// Host other peers should dial; registered with the directory.
    pub advertise_host: String,
    pub tcp_port: u16,
    pub udp_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub connect_timeout_ms: u64,
    /// Write/read deadline for one text frame.
    pub io_timeout_ms: u64,
    /// Ack wait window = connect timeout × this factor.
    pub ack_timeout_factor: f64,
    /// One image packet may leave per interval.
    pub send_interval_ms: u64,
    /// Total send attempts per image packet.
    pub max_retries: u32,
    /// Concurrent packet sends per transfer. 0 = available parallelism.
    pub max_in_flight: usize,
    /// Inbound transfers idle for this long are dropped.
    pub assembly_timeout_secs: u64,
    /// Capacity of the text and image output queues.
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Received images are written under `<images_path>/<sender>/`.
    pub images_path: PathBuf,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            server: "http://localhost:8080".to_string(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            advertise_host: "localhost".to_string(),
            tcp_port: 8081,
            udp_port: 8082,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            images_path: data_dir().join("images"),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
            io_timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
            ack_timeout_factor: 1.0,
            send_interval_ms: DEFAULT_SEND_INTERVAL.as_millis() as u64,
            max_retries: DEFAULT_MAX_RETRIES,
            max_in_flight: 0,
            assembly_timeout_secs: 300,
            queue_capacity: 64,
        }
    }
}

// ── Runtime settings ──────────────────────────────────────────────────────────

/// Resolved knobs consumed by the transport layer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportSettings {
    pub connect_timeout: Duration,
    pub io_timeout: Duration,
    pub ack_timeout: Duration,
    pub send_interval: Duration,
    /// Always at least 1.
    pub max_retries: u32,
    /// Always at least 1.
    pub max_in_flight: usize,
    pub assembly_timeout: Duration,
    pub queue_capacity: usize,
}

impl Default for TransportSettings {
    fn default() -> Self {
        TransportConfig::default().settings()
    }
}

impl TransportConfig {
    pub fn settings(&self) -> TransportSettings {
        let connect_timeout = Duration::from_millis(self.connect_timeout_ms);
        let factor = if self.ack_timeout_factor.is_finite() && self.ack_timeout_factor > 0.0 {
            self.ack_timeout_factor
        } else {
            1.0
        };
        let max_in_flight = if self.max_in_flight == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.max_in_flight
        };

        TransportSettings {
            connect_timeout,
            io_timeout: Duration::from_millis(self.io_timeout_ms),
            ack_timeout: connect_timeout.mul_f64(factor),
            send_interval: Duration::from_millis(self.send_interval_ms),
            max_retries: self.max_retries.max(1),
            max_in_flight,
            assembly_timeout: Duration::from_secs(self.assembly_timeout_secs),
            queue_capacity: self.queue_capacity.max(1),
        }
    }
}

impl NetworkConfig {
    pub fn tcp_bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.tcp_port)
    }

    pub fn udp_bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.udp_port)
    }

    /// Address other peers should dial for a listener bound on `port`.
    pub fn advertise_addr(&self, port: u16) -> String {
        format!("{}:{}", self.advertise_host, port)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("messenger")
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("messenger")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl MessengerConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    /// Load from an explicit path (missing file = defaults), then apply env.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            MessengerConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("MESSENGER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&MessengerConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply MESSENGER_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("MESSENGER_IDENTITY__USERNAME") {
            self.identity.username = v;
        }
        if let Ok(v) = std::env::var("MESSENGER_DIRECTORY__SERVER") {
            self.directory.server = v;
        }
        if let Ok(v) = std::env::var("MESSENGER_NETWORK__BIND_HOST") {
            self.network.bind_host = v;
        }
        if let Ok(v) = std::env::var("MESSENGER_NETWORK__ADVERTISE_HOST") {
            self.network.advertise_host = v;
        }
        if let Ok(v) = std::env::var("MESSENGER_NETWORK__TCP_PORT") {
            if let Ok(p) = v.parse() {
                self.network.tcp_port = p;
            }
        }
        if let Ok(v) = std::env::var("MESSENGER_NETWORK__UDP_PORT") {
            if let Ok(p) = v.parse() {
                self.network.udp_port = p;
            }
        }
        if let Ok(v) = std::env::var("MESSENGER_STORAGE__IMAGES_PATH") {
            self.storage.images_path = PathBuf::from(v);
        }
    }
}
