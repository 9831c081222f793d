//! Observability configuration types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingOptions {
    /// Base log level (trace, debug, info, warn, error)
    pub level: String,

    /// Emit JSON lines on the console instead of human-readable text
    pub json: bool,

    /// Base directory for per-run log folders (None = console only)
    pub log_dir: Option<PathBuf>,

    /// Keep N most recent run folders
    pub retention_runs: usize,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        LoggingOptions {
            level: "info".to_string(),
            json: false,
            log_dir: None,
            retention_runs: 10,
        }
    }
}
