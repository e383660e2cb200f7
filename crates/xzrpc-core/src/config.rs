//! Configuration system for xzrpc.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $XZRPC_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/xzrpc/config.toml
//!   3. ~/.config/xzrpc/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::wire::DEFAULT_REGISTRY_PATH;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct XzrpcConfig {
    pub network: NetworkConfig,
    pub server: ServerConfig,
    pub registry: RegistryConfig,
    pub heartbeat: HeartbeatConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the RPC listener binds to.
    pub rpc_addr: String,
    /// How RPC connections start.
    pub transport: Transport,
    /// Address the discovery HTTP surface binds to.
    pub registry_addr: String,
}

/// How an accepted RPC connection starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Frames from the first byte.
    #[default]
    Raw,
    /// An HTTP CONNECT request first, then frames.
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Max requests executing at once on one connection. 0 = unbounded.
    pub max_inflight_per_conn: usize,
    /// What to do with a request that arrives when the connection is full.
    pub backpressure: Backpressure,
    /// Per-request deadline in milliseconds. 0 = none.
    pub request_timeout_ms: u64,
}

/// Policy for requests beyond `max_inflight_per_conn`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backpressure {
    /// Stop reading until a slot frees up.
    #[default]
    Queue,
    /// Answer at once with a busy error.
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Serve the discovery registry from this process.
    pub enabled: bool,
    /// URL path of the registry endpoint.
    pub path: String,
    /// Seconds a registration stays alive without a refresh. 0 = forever.
    pub ttl_secs: u64,
    /// Seconds between sweeps of stale registrations. 0 = never sweep.
    pub sweep_interval_secs: u64,
    /// Application id every HTTP registration is filed under.
    pub app_id: String,
    /// Environment every HTTP registration is filed under.
    pub env: String,
    /// Hostname recorded on every HTTP registration.
    pub hostname: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Full registry URL to announce this server to. Empty = don't announce.
    pub registry_url: String,
    /// Address to announce. Empty = `network.rpc_addr`.
    pub advertise_addr: String,
    /// Seconds between announcements. 0 = default (60).
    pub interval_secs: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            rpc_addr: "127.0.0.1:9999".to_string(),
            transport: Transport::Raw,
            registry_addr: "127.0.0.1:9998".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_inflight_per_conn: 64,
            backpressure: Backpressure::Queue,
            request_timeout_ms: 0,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: DEFAULT_REGISTRY_PATH.to_string(),
            ttl_secs: 300,
            sweep_interval_secs: 60,
            app_id: "xzrpc".to_string(),
            env: "dev".to_string(),
            hostname: "localhost".to_string(),
        }
    }
}

impl HeartbeatConfig {
    pub const DEFAULT_INTERVAL_SECS: u64 = 60;

    pub fn interval_secs(&self) -> u64 {
        if self.interval_secs == 0 {
            Self::DEFAULT_INTERVAL_SECS
        } else {
            self.interval_secs
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("xzrpc")
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

impl XzrpcConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_file(&Self::file_path())?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse `path`, or return defaults when it does not exist.
    pub fn load_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(XzrpcConfig::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("XZRPC_CONFIG")
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
            let text = toml::to_string_pretty(&XzrpcConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply XZRPC_* overrides, reading variables through `var`.
    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("XZRPC_NETWORK__RPC_ADDR") {
            self.network.rpc_addr = v;
        }
        if let Some(v) = var("XZRPC_NETWORK__REGISTRY_ADDR") {
            self.network.registry_addr = v;
        }
        if let Some(v) = var("XZRPC_NETWORK__TRANSPORT") {
            match v.as_str() {
                "raw" => self.network.transport = Transport::Raw,
                "http" => self.network.transport = Transport::Http,
                other => tracing::warn!(value = other, "ignoring unknown XZRPC_NETWORK__TRANSPORT"),
            }
        }
        if let Some(v) = var("XZRPC_SERVER__MAX_INFLIGHT_PER_CONN") {
            if let Ok(n) = v.parse() {
                self.server.max_inflight_per_conn = n;
            }
        }
        if let Some(v) = var("XZRPC_SERVER__REQUEST_TIMEOUT_MS") {
            if let Ok(n) = v.parse() {
                self.server.request_timeout_ms = n;
            }
        }
        if let Some(v) = var("XZRPC_REGISTRY__ENABLED") {
            self.registry.enabled = v == "true" || v == "1";
        }
        if let Some(v) = var("XZRPC_REGISTRY__TTL_SECS") {
            if let Ok(n) = v.parse() {
                self.registry.ttl_secs = n;
            }
        }
        if let Some(v) = var("XZRPC_HEARTBEAT__REGISTRY_URL") {
            self.heartbeat.registry_url = v;
        }
        if let Some(v) = var("XZRPC_HEARTBEAT__ADVERTISE_ADDR") {
            self.heartbeat.advertise_addr = v;
        }
    }
}
