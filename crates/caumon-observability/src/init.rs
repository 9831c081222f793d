// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Unified logging initialization for CauMon
//!
//! Console output is always installed. With the `file-logging` feature and a
//! configured log directory, each run also gets its own timestamped folder:
//! ```text
//! ./logs/
//!   └── run_20250101_120000/
//!       └── caumon.log (combined, JSON lines)
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::cli::CrateDebugFlags;
use crate::config::LoggingOptions;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Keeps background log writers alive; logs are flushed when this is dropped
pub struct LoggingGuard {
    #[cfg(feature = "file-logging")]
    _file_guards: Vec<tracing_appender::non_blocking::WorkerGuard>,
    log_dir: Option<PathBuf>,
}

impl LoggingGuard {
    /// Run folder receiving file logs, if file logging is active
    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }
}

/// Initialize the global subscriber
///
/// # Errors
///
/// Fails if the filter directive is invalid, the run folder cannot be created,
/// or a global subscriber is already installed.
pub fn init_logging(debug_flags: &CrateDebugFlags, options: &LoggingOptions) -> Result<LoggingGuard> {
    let filter = debug_flags.to_filter_string(&options.level);
    let make_filter = || {
        EnvFilter::try_new(&filter).with_context(|| format!("Invalid log filter '{}'", filter))
    };

    let mut layers: Vec<BoxedLayer> = Vec::new();

    let console_layer = if options.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_filter(make_filter()?)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_file(false)
            .with_line_number(false)
            .with_filter(make_filter()?)
            .boxed()
    };
    layers.push(console_layer);

    #[cfg(feature = "file-logging")]
    let mut file_guards = Vec::new();
    let mut run_folder = None;

    #[cfg(feature = "file-logging")]
    if let Some(base_log_dir) = &options.log_dir {
        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let folder = base_log_dir.join(format!("run_{}", timestamp));
        std::fs::create_dir_all(&folder)
            .with_context(|| format!("Failed to create log directory: {}", folder.display()))?;

        cleanup_old_runs(base_log_dir, options.retention_runs)?;

        let appender = tracing_appender::rolling::never(&folder, "caumon.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        file_guards.push(guard);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .json()
            .with_filter(make_filter()?)
            .boxed();
        layers.push(file_layer);

        run_folder = Some(folder);
    }

    Registry::default()
        .with(layers)
        .try_init()
        .context("Failed to install global tracing subscriber")?;

    Ok(LoggingGuard {
        #[cfg(feature = "file-logging")]
        _file_guards: file_guards,
        log_dir: run_folder,
    })
}

/// Initialize console-only logging at the given base level
pub fn init_console_logging(debug_flags: &CrateDebugFlags, level: &str) -> Result<LoggingGuard> {
    let options = LoggingOptions {
        level: level.to_string(),
        ..LoggingOptions::default()
    };
    init_logging(debug_flags, &options)
}

/// Remove all but the newest `retention_runs` run folders
///
/// Folder names sort chronologically (`run_YYYYMMDD_HHMMSS`), so a lexical
/// sort is enough.
#[cfg(feature = "file-logging")]
fn cleanup_old_runs(base_log_dir: &Path, retention_runs: usize) -> Result<()> {
    if !base_log_dir.exists() {
        return Ok(());
    }

    let mut runs: Vec<PathBuf> = Vec::new();
    for entry in std::fs::read_dir(base_log_dir)? {
        let path = entry?.path();
        let is_run = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with("run_"))
            .unwrap_or(false);
        if path.is_dir() && is_run {
            runs.push(path);
        }
    }

    runs.sort();

    if runs.len() > retention_runs {
        let to_remove = runs.len() - retention_runs;
        for path in runs.iter().take(to_remove) {
            if let Err(e) = std::fs::remove_dir_all(path) {
                eprintln!("Warning: Failed to remove old log directory {}: {}", path.display(), e);
            }
        }
    }

    Ok(())
}
