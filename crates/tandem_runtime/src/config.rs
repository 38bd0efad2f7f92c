//! Session configuration
//!
//! Loaded from JSON, then overridden from the environment.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tandem_core::MAX_TICK_RATE_HZ;
use tandem_sync::StallPolicy;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("{var} has invalid value {value:?}")]
    Env { var: &'static str, value: String },

    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub seed: u32,
    pub fixed_hz: u32,
    /// Ticks between sampling local input and applying it.
    pub input_delay: u32,
    pub snapshot_capacity: usize,
    /// Checksums are exchanged after every tick divisible by this.
    pub checksum_interval: u32,
    /// Snapshot hints go out after every tick divisible by this.
    pub hint_interval: u32,
    pub stall_timeout_ms: u64,
    pub stall_policy: StallPolicy,
    /// Drained ticks retained for replay after a resync.
    pub history_len: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            seed: 0x1234_5678,
            fixed_hz: 60,
            input_delay: 2,
            snapshot_capacity: 64,
            checksum_interval: 30,
            hint_interval: 60,
            stall_timeout_ms: 5_000,
            stall_policy: StallPolicy::Wait,
            history_len: 128,
        }
    }
}

impl SessionConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Applies `TANDEM_*` environment overrides.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|var| std::env::var(var).ok())
    }

    fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        if let Some(seed) = parse_var("TANDEM_SEED", &lookup)? {
            self.seed = seed;
        }
        if let Some(hz) = parse_var("TANDEM_FIXED_HZ", &lookup)? {
            self.fixed_hz = hz;
        }
        if let Some(delay) = parse_var("TANDEM_INPUT_DELAY", &lookup)? {
            self.input_delay = delay;
        }
        if let Some(timeout) = parse_var("TANDEM_STALL_TIMEOUT_MS", &lookup)? {
            self.stall_timeout_ms = timeout;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fixed_hz == 0 || self.fixed_hz > MAX_TICK_RATE_HZ {
            return Err(ConfigError::Invalid("fixed_hz must be in 1..=1000"));
        }
        if self.snapshot_capacity == 0 {
            return Err(ConfigError::Invalid("snapshot_capacity must be positive"));
        }
        if self.checksum_interval == 0 {
            return Err(ConfigError::Invalid("checksum_interval must be positive"));
        }
        Ok(())
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }
}

fn parse_var<T: std::str::FromStr>(
    var: &'static str,
    lookup: &impl Fn(&str) -> Option<String>,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => {
            let trimmed = value.trim();
            // accept hex seeds
            let parsed = match trimmed.strip_prefix("0x") {
                Some(hex) => u64::from_str_radix(hex, 16)
                    .ok()
                    .and_then(|v| v.to_string().parse().ok()),
                None => trimmed.parse().ok(),
            };
            parsed
                .map(Some)
                .ok_or(ConfigError::Env { var, value })
        }
    }
}
