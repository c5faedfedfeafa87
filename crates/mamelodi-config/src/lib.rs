//! Shared configuration for mamelodi
//!
//! Reads from ~/.mamelodi/config.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Namespace prepended to every peer id registered with the signaling provider
pub const DEFAULT_PEER_ID_PREFIX: &str = "mamelodi-webrtc-";

/// Default STUN servers handed to the transport
pub const DEFAULT_STUN_SERVERS: &[&str] = &[
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
    "stun:stun.cloudflare.com:3478",
];

/// Public PeerJS signaling server
pub const DEFAULT_SIGNALING_HOST: &str = "0.peerjs.com";

/// Environment variable that turns on development mode
pub const DEV_MODE_ENV: &str = "MAMELODI_DEV";

/// Top-level config structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub webrtc: WebRtcConfig,
    #[serde(default)]
    pub signaling: SignalingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Peer identity and ICE configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebRtcConfig {
    /// Prefix that namespaces our peer ids on the provider
    #[serde(default = "default_peer_id_prefix")]
    pub peer_id_prefix: String,
    #[serde(default = "default_stun_servers")]
    pub stun_servers: Vec<String>,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            peer_id_prefix: default_peer_id_prefix(),
            stun_servers: default_stun_servers(),
        }
    }
}

fn default_peer_id_prefix() -> String {
    DEFAULT_PEER_ID_PREFIX.to_string()
}

fn default_stun_servers() -> Vec<String> {
    DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect()
}

/// PeerJS signaling server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalingConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default = "default_key")]
    pub key: String,
    #[serde(default = "default_true")]
    pub secure: bool,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            path: default_path(),
            key: default_key(),
            secure: true,
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
        }
    }
}

impl SignalingConfig {
    /// Base WebSocket URL of the signaling endpoint, without query string
    pub fn socket_base_url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        let mut path = self.path.clone();
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        if !path.ends_with('/') {
            path.push('/');
        }
        format!("{}://{}:{}{}peerjs", scheme, self.host, self.port, path)
    }
}

fn default_host() -> String {
    DEFAULT_SIGNALING_HOST.to_string()
}

fn default_port() -> u16 {
    443
}

fn default_path() -> String {
    "/".to_string()
}

fn default_key() -> String {
    "peerjs".to_string()
}

fn default_true() -> bool {
    true
}

fn default_heartbeat_interval_ms() -> u64 {
    5000
}

/// Logging configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Development mode enables debug-level output
    #[serde(default)]
    pub dev_mode: bool,
}

impl LoggingConfig {
    /// Development mode from config, or forced on with MAMELODI_DEV=1
    pub fn is_dev_mode(&self) -> bool {
        self.dev_mode || env_flag(std::env::var(DEV_MODE_ENV).ok().as_deref())
    }
}

fn env_flag(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("1" | "true" | "yes" | "on")
    )
}

impl Config {
    /// Load config from the default location, or defaults if it doesn't exist
    pub fn load() -> Result<Self> {
        Self::load_from(&get_config_path())
    }

    /// Load config from a specific file, or defaults if it doesn't exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = fs::read_to_string(path).context("Failed to read config file")?;
        toml::from_str(&content).context("Failed to parse config file")
    }

    /// Load config, returning default on any error (no panic)
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_default()
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&get_config_path())
    }

    /// Save config to a specific file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;

        Ok(())
    }
}

/// Get the mamelodi directory (~/.mamelodi)
pub fn get_mamelodi_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("MAMELODI_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mamelodi")
}

/// Get the config file path (~/.mamelodi/config.toml)
pub fn get_config_path() -> PathBuf {
    get_mamelodi_dir().join("config.toml")
}
