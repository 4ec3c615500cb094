//! Configuration resolution for pat-trigger

use std::path::Path;

use anyhow::{Context, Result};
use pat_session::config::{ChannelConfig, TriggerConfig};
use pat_session::CanId;

/// Load the config file, or defaults when none is given
pub fn load(path: Option<&Path>) -> Result<TriggerConfig> {
    match path {
        Some(path) => TriggerConfig::load(path)
            .with_context(|| format!("Failed to load config file: {}", path.display())),
        None => Ok(TriggerConfig::default()),
    }
}

/// Command-line values that take precedence over the config file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub interface: String,
    pub timeout_ms: Option<u64>,
    pub retries: Option<u32>,
    pub response_id: Option<CanId>,
}

impl Overrides {
    /// Merge CLI arguments over config file values
    pub fn apply(&self, mut config: TriggerConfig) -> Result<TriggerConfig> {
        match config.channel {
            ChannelConfig::SocketCan(ref mut cfg) => cfg.interface = self.interface.clone(),
            ChannelConfig::Mock(ref mut cfg) => cfg.endpoint = self.interface.clone(),
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.session.timeout_ms = timeout_ms;
        }
        if let Some(retries) = self.retries {
            config.session.retry_budget = retries;
        }
        if let Some(response_id) = self.response_id {
            config.codec.response_id = response_id;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}
