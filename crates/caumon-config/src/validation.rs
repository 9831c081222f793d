//! Configuration validation
//!
//! Ensures configuration values are within ranges the ingestion service can
//! actually run with.

use crate::{ConfigError, ConfigResult, MonitorConfig};

/// Validation errors that can occur during config validation
#[derive(Debug, Clone)]
pub enum ConfigValidationError {
    MissingRequired { field: String },
    InvalidValue { field: String, reason: String },
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingRequired { field } => {
                write!(f, "Missing required configuration: {}", field)
            }
            Self::InvalidValue { field, reason } => {
                write!(f, "Invalid configuration value for {}: {}", field, reason)
            }
        }
    }
}

/// Validate the complete configuration
///
/// # Errors
///
/// Returns `ConfigError::ValidationError` listing every problem found
pub fn validate_config(config: &MonitorConfig) -> ConfigResult<()> {
    let mut errors = Vec::new();

    validate_required_fields(config, &mut errors);
    validate_value_ranges(config, &mut errors);

    if !errors.is_empty() {
        let error_messages = errors
            .iter()
            .map(|e| format!("  - {}", e))
            .collect::<Vec<_>>()
            .join("\n");

        return Err(ConfigError::ValidationError(format!(
            "Configuration validation failed:\n{}",
            error_messages
        )));
    }

    Ok(())
}

fn validate_required_fields(config: &MonitorConfig, errors: &mut Vec<ConfigValidationError>) {
    if config.ingest.host.trim().is_empty() {
        errors.push(ConfigValidationError::MissingRequired {
            field: "ingest.host".to_string(),
        });
    }

    if config.session.output_file.as_os_str().is_empty() {
        errors.push(ConfigValidationError::MissingRequired {
            field: "session.output_file".to_string(),
        });
    }
}

fn validate_value_ranges(config: &MonitorConfig, errors: &mut Vec<ConfigValidationError>) {
    let positive = [
        ("ingest.accept_poll_interval_ms", config.ingest.accept_poll_interval_ms),
        ("ingest.read_timeout_ms", config.ingest.read_timeout_ms),
        ("session.join_timeout_ms", config.session.join_timeout_ms),
        ("engine.response_timeout_ms", config.engine.response_timeout_ms),
    ];

    for (field, value) in positive {
        if value == 0 {
            errors.push(ConfigValidationError::InvalidValue {
                field: field.to_string(),
                reason: "must be positive".to_string(),
            });
        }
    }
}
