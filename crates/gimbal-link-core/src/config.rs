//! Link configuration
//!
//! A single read-only value handed to the dispatcher at construction. It can be
//! built in code or loaded from a JSON file such as:
//!
//! ```json
//! {
//!   "port_name": "/dev/ttyTHS0",
//!   "baud_rate": 115200,
//!   "commands": { "SEARCH_TARGET": 1, "TRACK_TARGET": 2 },
//!   "limits": { "yaw": [-180.0, 180.0], "pitch": [-30.0, 60.0] }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::protocol::{
    Command, CommandTable, DEFAULT_ACK_TIMEOUT_MS, DEFAULT_BAUD_RATE, DEFAULT_MAX_RETRIES,
};

/// Errors loading or validating a [`LinkConfig`]
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Physical yaw/pitch limits in degrees, inclusive
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AngleLimits {
    /// Yaw (min, max)
    pub yaw: (f32, f32),
    /// Pitch (min, max)
    pub pitch: (f32, f32),
}

/// Everything the link needs to know about its environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Serial device path
    pub port_name: String,
    /// Baud rate
    pub baud_rate: u32,
    /// How long to wait for each acknowledgement
    pub ack_timeout_ms: u64,
    /// Attempts per command before giving up
    pub max_retries: u32,
    /// Command name → wire code
    pub commands: BTreeMap<Command, u8>,
    /// Optional physical limits checked before sending
    pub limits: Option<AngleLimits>,
    /// Command sent for each relayed pose
    pub relay_command: Command,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            ack_timeout_ms: DEFAULT_ACK_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            commands: Command::ALL
                .iter()
                .map(|&c| (c, c.default_code()))
                .collect(),
            limits: None,
            relay_command: Command::SearchTarget,
        }
    }
}

impl LinkConfig {
    /// Config for `port_name` with defaults for everything else
    pub fn for_port(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Self::default()
        }
    }

    /// Parse and validate a JSON config
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: LinkConfig = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        let config = Self::from_json_str(&content)?;
        tracing::debug!(path = %path.as_ref().display(), port = %config.port_name, "loaded link config");
        Ok(config)
    }

    /// Check values the link cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.baud_rate == 0 {
            return Err(ConfigError::Invalid("baud_rate must be non-zero".into()));
        }
        if self.max_retries == 0 {
            return Err(ConfigError::Invalid("max_retries must be at least 1".into()));
        }
        if self.ack_timeout_ms == 0 {
            return Err(ConfigError::Invalid("ack_timeout_ms must be non-zero".into()));
        }
        if let Some(limits) = &self.limits {
            for (axis, (min, max)) in [("yaw", limits.yaw), ("pitch", limits.pitch)] {
                if !(min.is_finite() && max.is_finite() && min <= max) {
                    return Err(ConfigError::Invalid(format!(
                        "{axis} limits [{min}, {max}] are not a finite range"
                    )));
                }
            }
        }
        let table = self.command_table()?;
        if table.code(self.relay_command).is_err() {
            return Err(ConfigError::Invalid(format!(
                "relay_command {} has no code",
                self.relay_command
            )));
        }
        Ok(())
    }

    /// Build the immutable command table
    pub fn command_table(&self) -> Result<CommandTable, ConfigError> {
        CommandTable::new(self.commands.iter().map(|(&c, &code)| (c, code)))
            .map_err(ConfigError::Invalid)
    }

    /// Retry policy for the dispatcher
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries.max(1),
            ack_timeout: Duration::from_millis(self.ack_timeout_ms),
        }
    }
}

/// Bounds on one dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_retries: u32,
    /// Wait per acknowledgement
    pub ack_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            ack_timeout: Duration::from_millis(DEFAULT_ACK_TIMEOUT_MS),
        }
    }
}
