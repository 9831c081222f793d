// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration file loading with override support
//!
//! This module implements the 3-tier configuration loading system:
//! 1. TOML file (base defaults)
//! 2. Environment variables (runtime overrides)
//! 3. CLI arguments (explicit user overrides)

use crate::{ConfigError, ConfigResult, MonitorConfig};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "caumon_configuration.toml";

/// Find the CauMon configuration file
///
/// Search order:
/// 1. `CAUMON_CONFIG_PATH` environment variable
/// 2. Current working directory: `./caumon_configuration.toml`
/// 3. Up to 5 parent directories
///
/// # Errors
///
/// Returns `ConfigError::FileNotFound` if no config file is found in any location
pub fn find_config_file() -> ConfigResult<PathBuf> {
    if let Ok(env_path) = env::var("CAUMON_CONFIG_PATH") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        return Err(ConfigError::FileNotFound(format!(
            "Config file specified by CAUMON_CONFIG_PATH not found: {}",
            path.display()
        )));
    }

    let mut search_paths = Vec::new();

    if let Ok(cwd) = env::current_dir() {
        search_paths.push(cwd.join(CONFIG_FILE_NAME));

        let mut current = cwd.clone();
        for _ in 0..5 {
            if let Some(parent) = current.parent() {
                search_paths.push(parent.join(CONFIG_FILE_NAME));
                current = parent.to_path_buf();
            }
        }
    }

    for path in &search_paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    let search_list = search_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    Err(ConfigError::FileNotFound(format!(
        "'{}' not found in any of these locations:\n{}\n\nSet CAUMON_CONFIG_PATH environment variable to specify custom location.",
        CONFIG_FILE_NAME, search_list
    )))
}

/// Load configuration from TOML file
///
/// # Arguments
///
/// * `config_path` - Optional path to config file. If `None`, will search for config file.
/// * `cli_args` - Optional CLI argument overrides
///
/// # Errors
///
/// Returns error if config file is not found or contains invalid TOML
pub fn load_config(
    config_path: Option<&Path>,
    cli_args: Option<&HashMap<String, String>>,
) -> ConfigResult<MonitorConfig> {
    let config_file = match config_path {
        Some(path) => path.to_path_buf(),
        None => find_config_file()?,
    };

    let content = fs::read_to_string(&config_file)?;
    let mut config: MonitorConfig = toml::from_str(&content)?;

    apply_environment_overrides(&mut config);

    if let Some(cli) = cli_args {
        apply_cli_overrides(&mut config, cli);
    }

    Ok(config)
}

/// Apply environment variable overrides to configuration
///
/// Supported environment variables:
/// - `CAUMON_INGEST_HOST` -> `ingest.host`
/// - `CAUMON_INGEST_PORT` -> `ingest.port`
/// - `CAUMON_EVAL_INTERVAL_MS` -> `throttle.eval_interval_ms`
/// - `CAUMON_VISUALIZE_INTERVAL_MS` -> `throttle.visualize_interval_ms`
/// - `CAUMON_SIGNALS` -> `session.signals`
/// - `CAUMON_FORMULA` -> `session.formula`
/// - `CAUMON_OUTPUT_FILE` -> `session.output_file`
/// - `CAUMON_ENGINE_COMMAND` -> `engine.command`
/// - `CAUMON_WORKING_DIR` -> `system.working_dir`
/// - `CAUMON_LOG_LEVEL` -> `system.log_level`
pub fn apply_environment_overrides(config: &mut MonitorConfig) {
    if let Ok(value) = env::var("CAUMON_INGEST_HOST") {
        config.ingest.host = value;
    }
    if let Ok(value) = env::var("CAUMON_INGEST_PORT") {
        if let Ok(port) = value.parse::<u16>() {
            config.ingest.port = port;
        }
    }

    if let Ok(value) = env::var("CAUMON_EVAL_INTERVAL_MS") {
        if let Ok(ms) = value.parse::<u64>() {
            config.throttle.eval_interval_ms = ms;
        }
    }
    if let Ok(value) = env::var("CAUMON_VISUALIZE_INTERVAL_MS") {
        if let Ok(ms) = value.parse::<u64>() {
            config.throttle.visualize_interval_ms = ms;
        }
    }

    if let Ok(value) = env::var("CAUMON_SIGNALS") {
        config.session.signals = value;
    }
    if let Ok(value) = env::var("CAUMON_FORMULA") {
        config.session.formula = value;
    }
    if let Ok(value) = env::var("CAUMON_OUTPUT_FILE") {
        config.session.output_file = PathBuf::from(value);
    }

    if let Ok(value) = env::var("CAUMON_ENGINE_COMMAND") {
        config.engine.command = value;
    }

    if let Ok(value) = env::var("CAUMON_WORKING_DIR") {
        config.system.working_dir = PathBuf::from(value);
    }
    if let Ok(value) = env::var("CAUMON_LOG_LEVEL") {
        config.system.log_level = value;
    }
}

/// Apply CLI argument overrides to configuration
///
/// # Arguments
///
/// * `config` - Configuration to modify
/// * `cli_args` - HashMap of CLI arguments (e.g., `{"port": "9000", "signals": "speed,RPM"}`)
pub fn apply_cli_overrides(config: &mut MonitorConfig, cli_args: &HashMap<String, String>) {
    if let Some(value) = cli_args.get("host") {
        config.ingest.host = value.clone();
    }
    if let Some(value) = cli_args.get("port") {
        if let Ok(port) = value.parse::<u16>() {
            config.ingest.port = port;
        }
    }

    if let Some(value) = cli_args.get("eval_interval_ms") {
        if let Ok(ms) = value.parse::<u64>() {
            config.throttle.eval_interval_ms = ms;
        }
    }
    if let Some(value) = cli_args.get("visualize_interval_ms") {
        if let Ok(ms) = value.parse::<u64>() {
            config.throttle.visualize_interval_ms = ms;
        }
    }

    if let Some(value) = cli_args.get("signals") {
        config.session.signals = value.clone();
    }
    if let Some(value) = cli_args.get("formula") {
        config.session.formula = value.clone();
    }
    if let Some(value) = cli_args.get("output_file") {
        config.session.output_file = PathBuf::from(value);
    }

    if let Some(value) = cli_args.get("engine_command") {
        config.engine.command = value.clone();
    }
    if let Some(value) = cli_args.get("log_level") {
        config.system.log_level = value.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::tempdir;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_find_config_file_env_var() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("custom_config.toml");
        File::create(&config_path).unwrap();

        env::set_var("CAUMON_CONFIG_PATH", config_path.to_str().unwrap());
        let result = find_config_file();
        env::remove_var("CAUMON_CONFIG_PATH");

        assert_eq!(result.unwrap(), config_path);
    }

    #[test]
    fn test_find_config_file_env_var_missing() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        env::set_var("CAUMON_CONFIG_PATH", "/definitely/not/here/caumon.toml");
        let result = find_config_file();
        env::remove_var("CAUMON_CONFIG_PATH");

        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_minimal_config() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        env::remove_var("CAUMON_INGEST_PORT");
        env::remove_var("CAUMON_EVAL_INTERVAL_MS");
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);

        let mut file = File::create(&config_path).unwrap();
        writeln!(file, "[ingest]").unwrap();
        writeln!(file, "port = 9100").unwrap();
        writeln!(file, "[throttle]").unwrap();
        writeln!(file, "eval_interval_ms = 250").unwrap();

        let config = load_config(Some(&config_path), None).unwrap();

        assert_eq!(config.ingest.port, 9100);
        assert_eq!(config.throttle.eval_interval_ms, 250);
        // Untouched sections keep their defaults
        assert_eq!(config.throttle.visualize_interval_ms, 3000);
        assert_eq!(config.session.output_file, PathBuf::from("result_realtime.png"));
    }

    #[test]
    fn test_environment_overrides() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let mut config = MonitorConfig::default();

        env::set_var("CAUMON_INGEST_PORT", "9555");
        env::set_var("CAUMON_SIGNALS", "time,speed");
        env::set_var("CAUMON_VISUALIZE_INTERVAL_MS", "not-a-number");

        apply_environment_overrides(&mut config);

        env::remove_var("CAUMON_INGEST_PORT");
        env::remove_var("CAUMON_SIGNALS");
        env::remove_var("CAUMON_VISUALIZE_INTERVAL_MS");

        assert_eq!(config.ingest.port, 9555);
        assert_eq!(config.session.signals, "time,speed");
        assert_eq!(config.throttle.visualize_interval_ms, 3000);
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = MonitorConfig::default();
        let mut cli_args = HashMap::new();
        cli_args.insert("port".to_string(), "7777".to_string());
        cli_args.insert("formula".to_string(), "ev_[0,5](speed[t]>10)".to_string());
        cli_args.insert("eval_interval_ms".to_string(), "0".to_string());

        apply_cli_overrides(&mut config, &cli_args);

        assert_eq!(config.ingest.port, 7777);
        assert_eq!(config.session.formula, "ev_[0,5](speed[t]>10)");
        assert_eq!(config.throttle.eval_interval_ms, 0);
    }

    #[test]
    fn test_override_precedence() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);

        let mut file = File::create(&config_path).unwrap();
        writeln!(file, "[ingest]").unwrap();
        writeln!(file, "host = \"file-host\"").unwrap();
        writeln!(file, "port = 8000").unwrap();

        env::set_var("CAUMON_INGEST_HOST", "env-host");
        env::set_var("CAUMON_INGEST_PORT", "9000");

        let mut cli_args = HashMap::new();
        cli_args.insert("host".to_string(), "cli-host".to_string());

        let config = load_config(Some(&config_path), Some(&cli_args)).unwrap();

        env::remove_var("CAUMON_INGEST_HOST");
        env::remove_var("CAUMON_INGEST_PORT");

        // CLI wins for host, env wins for port (no CLI override)
        assert_eq!(config.ingest.host, "cli-host");
        assert_eq!(config.ingest.port, 9000);
    }
}
