// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! CauMon server: receives a telemetry stream over TCP and monitors it with
//! an external analysis engine until interrupted.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};

use caumon_config::{
    apply_cli_overrides, apply_environment_overrides, find_config_file, load_config,
    validate_config, ConfigError, LogFormat, MonitorConfig,
};
use caumon_observability::{debug_flags_help, init_logging, parse_debug_flags, LoggingOptions};
use caumon_realtime::{
    EngineAdapter, EngineResult, SessionManager, StdioEngine, StdioEngineOptions,
};

/// CauMon real-time monitoring server
#[derive(Parser, Debug)]
#[command(name = "caumon-server", version, long_about = None, after_help = debug_flags_help())]
struct Args {
    /// Path to caumon_configuration.toml (searched for when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// TCP port producers connect to
    #[arg(short, long)]
    port: Option<u16>,

    /// Comma-separated signal names (a leading "time" entry is ignored)
    #[arg(long)]
    signals: Option<String>,

    /// Monitoring formula forwarded to the engine
    #[arg(long)]
    formula: Option<String>,

    /// Engine executable speaking the JSON-lines protocol
    #[arg(long)]
    engine_command: Option<String>,

    /// File the final visualization is saved to
    #[arg(long)]
    output_file: Option<PathBuf>,

    /// Minimum gap between evaluations in ms (0 = every sample)
    #[arg(long)]
    eval_interval_ms: Option<u64>,

    /// Minimum gap between visualizations in ms (0 = every sample)
    #[arg(long)]
    visualize_interval_ms: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

impl Args {
    fn cli_overrides(&self) -> HashMap<String, String> {
        let mut overrides = HashMap::new();
        if let Some(port) = self.port {
            overrides.insert("port".to_string(), port.to_string());
        }
        if let Some(signals) = &self.signals {
            overrides.insert("signals".to_string(), signals.clone());
        }
        if let Some(formula) = &self.formula {
            overrides.insert("formula".to_string(), formula.clone());
        }
        if let Some(command) = &self.engine_command {
            overrides.insert("engine_command".to_string(), command.clone());
        }
        if let Some(path) = &self.output_file {
            overrides.insert("output_file".to_string(), path.display().to_string());
        }
        if let Some(ms) = self.eval_interval_ms {
            overrides.insert("eval_interval_ms".to_string(), ms.to_string());
        }
        if let Some(ms) = self.visualize_interval_ms {
            overrides.insert("visualize_interval_ms".to_string(), ms.to_string());
        }
        if self.verbose {
            overrides.insert("log_level".to_string(), "debug".to_string());
        }
        overrides
    }
}

fn main() -> Result<()> {
    // --debug-<crate> flags belong to the logging setup, not to clap
    let debug_flags = parse_debug_flags();
    let args = Args::parse_from(std::env::args().filter(|arg| !arg.starts_with("--debug-")));
    let cli = args.cli_overrides();

    let config = resolve_config(args.config.as_deref(), &cli)?;

    let logging = LoggingOptions {
        level: config.system.log_level.clone(),
        json: config.logging.format == LogFormat::Json,
        log_dir: config.logging.log_dir.clone(),
        retention_runs: config.logging.retention_runs,
    };
    let _logging_guard = init_logging(&debug_flags, &logging)?;

    info!("CauMon server v{}", env!("CARGO_PKG_VERSION"));
    debug!("Effective configuration: {:?}", config);

    let engine_options = StdioEngineOptions::from_config(&config.engine);
    if engine_options.command.trim().is_empty() {
        warn!("No engine command configured (engine.command / --engine-command); sessions cannot start");
    }
    let factory = move || -> EngineResult<Box<dyn EngineAdapter>> {
        Ok(Box::new(StdioEngine::spawn(&engine_options)?))
    };

    // Installed before start so a signal during startup still leads to stop
    let running = install_shutdown_handler()?;

    let manager = SessionManager::new(&config, Arc::new(factory));
    let outcome = manager
        .start(config.ingest.port)
        .context("Failed to start monitoring session")?;
    info!("{}", outcome);

    info!("Monitoring (Press Ctrl+C to stop)...");
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }

    let outcome = manager.stop();
    info!("{}", outcome);
    info!("CauMon server shutdown complete");
    Ok(())
}

/// Clear the returned flag on SIGINT, SIGTERM or SIGHUP
fn install_shutdown_handler() -> Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("Shutdown signal received...");
        r.store(false, Ordering::SeqCst);
    })
    .context("Failed to install shutdown signal handler")?;
    Ok(running)
}

/// Load the configuration file if there is one, otherwise start from defaults
fn resolve_config(
    path: Option<&std::path::Path>,
    cli: &HashMap<String, String>,
) -> Result<MonitorConfig> {
    let config = match path {
        Some(path) => load_config(Some(path), Some(cli))
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => match find_config_file() {
            Ok(found) => load_config(Some(&found), Some(cli))
                .with_context(|| format!("Failed to load {}", found.display()))?,
            Err(ConfigError::FileNotFound(_)) => {
                let mut config = MonitorConfig::default();
                apply_environment_overrides(&mut config);
                apply_cli_overrides(&mut config, cli);
                config
            }
            Err(e) => return Err(e.into()),
        },
    };

    validate_config(&config)?;
    Ok(config)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Command;
    use std::time::Instant;

    #[test]
    fn test_sigterm_clears_running_flag() {
        let running = install_shutdown_handler().unwrap();
        assert!(running.load(Ordering::SeqCst));

        let status = Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        let deadline = Instant::now() + Duration::from_secs(5);
        while running.load(Ordering::SeqCst) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(!running.load(Ordering::SeqCst));
    }
}
