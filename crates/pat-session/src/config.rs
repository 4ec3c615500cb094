//! Session configuration
//!
//! This module contains configuration types for the session engine,
//! including the bus channel, the command table and retry timing.
//! Everything has a default, so an empty TOML document is valid.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::frame::{CanId, Frame};

/// Top-level configuration for the trigger tool
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Bus channel configuration
    #[serde(default)]
    pub channel: ChannelConfig,
    /// Command table
    #[serde(default)]
    pub codec: CodecConfig,
    /// Retry and polling configuration
    #[serde(default)]
    pub session: SessionConfig,
}

impl TriggerConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.session.validate()?;
        if let ChannelConfig::SocketCan(ref cfg) = self.channel {
            if cfg.interface.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "channel.interface must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Channel Configuration
// =============================================================================

/// Channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChannelConfig {
    /// Raw SocketCAN socket (Linux only)
    SocketCan(SocketCanConfig),
    /// In-memory channel for testing and demos
    Mock(MockConfig),
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::SocketCan(SocketCanConfig::default())
    }
}

/// SocketCAN configuration
///
/// The interface must already be up; bitrate and link setup are left to
/// the operating system (`ip link set can0 up type can bitrate 500000`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketCanConfig {
    /// CAN interface name (e.g., "can0", "vcan0")
    #[serde(default = "default_interface")]
    pub interface: String,
    /// Drop frames queued on the socket before the session starts
    #[serde(default = "default_true")]
    pub drain_on_open: bool,
}

impl Default for SocketCanConfig {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            drain_on_open: true,
        }
    }
}

fn default_interface() -> String {
    "vcan0".to_string()
}

fn default_true() -> bool {
    true
}

/// Mock channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockConfig {
    /// Endpoint name reported by the channel
    #[serde(default = "default_mock_endpoint")]
    pub endpoint: String,
    /// Simulated send latency in milliseconds
    #[serde(default)]
    pub latency_ms: u64,
    /// Canned replies, sent back whenever the request frame is written
    #[serde(default)]
    pub responses: Vec<MockResponse>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            endpoint: default_mock_endpoint(),
            latency_ms: 0,
            responses: Vec::new(),
        }
    }
}

fn default_mock_endpoint() -> String {
    "mock0".to_string()
}

/// Request/response pair for the mock channel, in `cansend` notation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockResponse {
    /// Frame that triggers the reply (e.g., "700#AA")
    pub request: Frame,
    /// Reply frame (e.g., "701#01")
    pub response: Frame,
}

// =============================================================================
// Codec Configuration
// =============================================================================

/// Arbitration IDs of the host command channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodecConfig {
    /// CAN ID the host sends commands on
    #[serde(default = "default_command_id")]
    pub command_id: CanId,
    /// CAN ID the ECU answers on
    #[serde(default = "default_response_id")]
    pub response_id: CanId,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            command_id: default_command_id(),
            response_id: default_response_id(),
        }
    }
}

fn default_command_id() -> CanId {
    CanId::Standard(0x700)
}

fn default_response_id() -> CanId {
    CanId::Standard(0x701)
}

// =============================================================================
// Session Configuration
// =============================================================================

/// Retry and polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Response window per attempt in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Total send attempts per request (initial send included)
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,
    /// Listener receive timeout in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            retry_budget: default_retry_budget(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_retry_budget() -> u32 {
    3
}

fn default_poll_interval_ms() -> u64 {
    10
}

impl SessionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "session.timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.retry_budget == 0 {
            return Err(ConfigError::Invalid(
                "session.retry_budget must be at least 1".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            // A zero poll timeout would turn the listener into a busy loop
            return Err(ConfigError::Invalid(
                "session.poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
