//! Raceday configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{RacedayError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RacedayConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub webhook: OutboundWebhookConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

impl Default for RacedayConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            scheduler: SchedulerConfig::default(),
            notify: NotifyConfig::default(),
            chat: ChatConfig::default(),
            webhook: OutboundWebhookConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

impl RacedayConfig {
    /// Load config from the default path (~/.raceday/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RacedayError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| RacedayError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| RacedayError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Raceday home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".raceday")
    }
}

/// Where the engine keeps its SQLite databases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_data_dir() -> String {
    RacedayConfig::home_dir().to_string_lossy().into_owned()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Scheduler tick loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between scans for due task definitions.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Upper bound on concurrently running task handlers.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// A handler still running after this many seconds is abandoned and
    /// recorded as timed out.
    #[serde(default = "default_handler_timeout_secs")]
    pub handler_timeout_secs: u64,
    /// Claims older than this are assumed to belong to a dead process and
    /// are released at the start of a tick.
    #[serde(default = "default_claim_stale_secs")]
    pub claim_stale_secs: i64,
}

fn default_tick_secs() -> u64 {
    5
}
fn default_max_concurrent() -> usize {
    4
}
fn default_handler_timeout_secs() -> u64 {
    60
}
fn default_claim_stale_secs() -> i64 {
    300
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            max_concurrent: default_max_concurrent(),
            handler_timeout_secs: default_handler_timeout_secs(),
            claim_stale_secs: default_claim_stale_secs(),
        }
    }
}

/// Notification dispatcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Seconds between dispatch polls.
    #[serde(default = "default_poll_secs")]
    pub poll_secs: u64,
    /// Default retry budget for newly enqueued records.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Records stuck in the in-flight state longer than this are requeued
    /// (crash recovery; does not consume a retry).
    #[serde(default = "default_sending_stale_secs")]
    pub sending_stale_secs: i64,
}

fn default_poll_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_sending_stale_secs() -> i64 {
    600
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            poll_secs: default_poll_secs(),
            max_retries: default_max_retries(),
            sending_stale_secs: default_sending_stale_secs(),
        }
    }
}

/// Chat-service client configuration (direct-message delivery).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Base URL of the platform chat service, e.g. "https://chat.raceday.gg/api".
    #[serde(default)]
    pub api_base: String,
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "default_chat_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_chat_timeout_secs() -> u64 {
    10
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_base: String::new(),
            bot_token: String::new(),
            timeout_secs: default_chat_timeout_secs(),
        }
    }
}

/// Outbound webhook delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundWebhookConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: String,
    /// Optional auth header sent with every post.
    #[serde(default)]
    pub auth_header: String,
    #[serde(default)]
    pub auth_value: String,
    #[serde(default = "default_chat_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for OutboundWebhookConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            auth_header: String::new(),
            auth_value: String::new(),
            timeout_secs: default_chat_timeout_secs(),
        }
    }
}

/// Management gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
}

fn bool_true() -> bool {
    true
}
fn default_gateway_port() -> u16 {
    7070
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_gateway_port(),
        }
    }
}
