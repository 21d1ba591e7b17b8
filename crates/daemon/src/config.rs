//! Configuration for the agentmux daemon.
//!
//! TOML-based, loaded from `~/.config/agentmux/config.toml` by default.
//! Every field has a default so an absent file yields a working daemon.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::control::ControlSettings;
use crate::paths;
use crate::runtime::{RuntimeBackend, RuntimeSettings};
use crate::stream::StreamSettings;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("default geometry must be at least 1x1, got {0}x{1}")]
    InvalidGeometry(u16, u16),

    #[error("max_screen_rows ({0}) must be at least default_rows ({1})")]
    InvalidRowCap(usize, u16),

    #[error("ring_capacity must be at least 1024 bytes, got {0}")]
    InvalidRingCapacity(usize),

    #[error("coalesce_ms must be between 1 and 1000, got {0}")]
    InvalidCoalesce(u64),

    #[error("grace_period_ms must be at most 60000, got {0}")]
    InvalidGracePeriod(u64),

    #[error("max_request_bytes must be between 1024 and 16777216, got {0}")]
    InvalidRequestCeiling(usize),
}

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Top-level daemon configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub daemon: DaemonConfig,
    pub runtime: RuntimeConfig,
    pub stream: StreamConfig,
    pub control: ControlConfig,
}

/// General daemon settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Logging level filter.
    pub log_level: String,
    /// Also write logs to a rolling file under the data directory.
    pub log_to_file: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_to_file: false,
        }
    }
}

/// Window runtime settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Which runtime implementation backs windows.
    pub backend: RuntimeBackend,
    /// Geometry for windows whose clients have not negotiated one.
    pub default_cols: u16,
    pub default_rows: u16,
    /// Retained rows per window (viewport plus scrollback).
    pub max_screen_rows: usize,
    /// Raw-output ring capacity in bytes, per window.
    pub ring_capacity: usize,
    /// SIGTERM-to-SIGKILL grace period.
    pub grace_period_ms: u64,
    /// How long exited windows stay readable.
    pub closed_retention_secs: u64,
    /// Sweeper cadence.
    pub sweep_interval_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            backend: RuntimeBackend::Native,
            default_cols: 80,
            default_rows: 24,
            max_screen_rows: 500,
            ring_capacity: 256 * 1024,
            grace_period_ms: 3000,
            closed_retention_secs: 300,
            sweep_interval_secs: 2,
        }
    }
}

/// Stream delivery settings. Fixed, documented policy: patches flush at
/// most once per coalescing interval and bounded queues force a frame
/// resync instead of unbounded buffering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub coalesce_ms: u64,
    pub outbound_queue: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            coalesce_ms: 25,
            outbound_queue: 64,
        }
    }
}

/// Control surface settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Requests above this many bytes are rejected outright.
    pub max_request_bytes: usize,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            max_request_bytes: 128 * 1024,
        }
    }
}

impl Config {
    /// Load from an explicit path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Load from the default location, or defaults when absent.
    pub fn load_default() -> Result<Self> {
        let path = paths::config_file_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Environment overrides, applied after file loading.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("AGENTMUX_LOG") {
            self.daemon.log_level = level;
        }
        if let Ok(grace) = std::env::var("AGENTMUX_GRACE_MS") {
            if let Ok(ms) = grace.parse() {
                self.runtime.grace_period_ms = ms;
            }
        }
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if !VALID_LOG_LEVELS.contains(&self.daemon.log_level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }
        if self.runtime.default_cols == 0 || self.runtime.default_rows == 0 {
            return Err(ConfigError::InvalidGeometry(
                self.runtime.default_cols,
                self.runtime.default_rows,
            ));
        }
        if self.runtime.max_screen_rows < self.runtime.default_rows as usize {
            return Err(ConfigError::InvalidRowCap(
                self.runtime.max_screen_rows,
                self.runtime.default_rows,
            ));
        }
        if self.runtime.ring_capacity < 1024 {
            return Err(ConfigError::InvalidRingCapacity(self.runtime.ring_capacity));
        }
        if self.stream.coalesce_ms == 0 || self.stream.coalesce_ms > 1000 {
            return Err(ConfigError::InvalidCoalesce(self.stream.coalesce_ms));
        }
        if self.runtime.grace_period_ms > 60_000 {
            return Err(ConfigError::InvalidGracePeriod(self.runtime.grace_period_ms));
        }
        if self.control.max_request_bytes < 1024
            || self.control.max_request_bytes > 16 * 1024 * 1024
        {
            return Err(ConfigError::InvalidRequestCeiling(
                self.control.max_request_bytes,
            ));
        }
        Ok(())
    }

    pub fn runtime_settings(&self) -> RuntimeSettings {
        RuntimeSettings {
            default_cols: self.runtime.default_cols,
            default_rows: self.runtime.default_rows,
            max_screen_rows: self.runtime.max_screen_rows,
            ring_capacity: self.runtime.ring_capacity,
            grace_period: Duration::from_millis(self.runtime.grace_period_ms),
            closed_retention: Duration::from_secs(self.runtime.closed_retention_secs),
            sweep_interval: Duration::from_secs(self.runtime.sweep_interval_secs),
        }
    }

    pub fn stream_settings(&self) -> StreamSettings {
        StreamSettings {
            coalesce: Duration::from_millis(self.stream.coalesce_ms),
            outbound_queue: self.stream.outbound_queue,
        }
    }

    pub fn control_settings(&self) -> ControlSettings {
        ControlSettings {
            max_request_bytes: self.control.max_request_bytes,
        }
    }
}
