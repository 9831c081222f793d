// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration type definitions
//!
//! This module defines all configuration structs that map to sections in
//! `caumon_configuration.toml`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default TCP port the ingestion listener binds to
pub const DEFAULT_INGEST_PORT: u16 = 9999;

/// Default artifact written by the finalization dispatch
pub const DEFAULT_OUTPUT_FILE: &str = "result_realtime.png";

/// Default signal list used when the control plane never configures one
pub const DEFAULT_SIGNALS: &str = "speed,RPM,gear";

/// Default monitoring formula forwarded to the engine
pub const DEFAULT_FORMULA: &str =
    "alw_[0,30](not(speed[t]>50) or (gear[t]>=3 and RPM[t]<4500))";

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub system: SystemConfig,
    pub ingest: IngestConfig,
    pub throttle: ThrottleConfig,
    pub session: SessionDefaults,
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

/// Process-level settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SystemConfig {
    pub log_level: String,
    /// Directory the analysis engine is pointed at on session start
    pub working_dir: PathBuf,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            working_dir: PathBuf::from("."),
        }
    }
}

/// TCP ingestion listener settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IngestConfig {
    pub host: String,
    pub port: u16,
    /// How often the accept loop checks for cancellation while idle
    pub accept_poll_interval_ms: u64,
    /// Read timeout on a connected client; bounds how long `stop` waits on a silent peer
    pub read_timeout_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_INGEST_PORT,
            accept_poll_interval_ms: 50,
            read_timeout_ms: 200,
        }
    }
}

impl IngestConfig {
    pub fn accept_poll_interval(&self) -> Duration {
        Duration::from_millis(self.accept_poll_interval_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Dispatch throttling intervals (0 = dispatch on every arrival)
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub eval_interval_ms: u64,
    pub visualize_interval_ms: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            eval_interval_ms: 1000,
            visualize_interval_ms: 3000,
        }
    }
}

/// Defaults applied to a session before the control plane configures it
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionDefaults {
    pub signals: String,
    pub formula: String,
    pub output_file: PathBuf,
    /// Bounded wait for the accept thread during `stop`
    pub join_timeout_ms: u64,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            signals: DEFAULT_SIGNALS.to_string(),
            formula: DEFAULT_FORMULA.to_string(),
            output_file: PathBuf::from(DEFAULT_OUTPUT_FILE),
            join_timeout_ms: 2000,
        }
    }
}

impl SessionDefaults {
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

/// External analysis engine process settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Executable speaking the JSON-lines engine protocol (empty = not configured)
    pub command: String,
    pub args: Vec<String>,
    pub response_timeout_ms: u64,
    /// Run a synthetic dispatch on session start
    pub warmup: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            response_timeout_ms: 30_000,
            warmup: true,
        }
    }
}

impl EngineConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Base directory for per-run log folders (None = console only)
    pub log_dir: Option<PathBuf>,
    pub retention_runs: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            log_dir: None,
            retention_runs: 10,
        }
    }
}
