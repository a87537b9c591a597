use log::{error, info};

use crate::{config::Config, error::ConfigError};

pub const VALID_LOG_LEVELS: &[&str] = &[
    "whisper", "haunt", "spooky", "scream", "poltergeist", "silence",
    "trace", "debug", "info", "warn", "error", "off",
];

fn reject(reason: String) -> Result<(), ConfigError> {
    error!("{}", reason);
    Err(ConfigError::Invalid(reason))
}

pub fn validate(config: &Config) -> Result<(), ConfigError> {
    info!("Starting configuration validation...");

    // --- Validate log level ---
    if !VALID_LOG_LEVELS
        .iter()
        .any(|lvl| lvl.eq_ignore_ascii_case(&config.log.level))
    {
        return reject(format!("Invalid log level: {}", config.log.level));
    }

    // --- Validate retry policy ---
    if config.agent.max_try == 0 {
        return reject("Agent max_try must be at least 1".to_string());
    }

    if config.agent.max_fails == 0 {
        return reject("Agent max_fails must be at least 1".to_string());
    }

    if config.agent.fail_timeout_ms == 0 {
        return reject("Agent fail_timeout_ms is invalid (0)".to_string());
    }

    // --- Validate transport ---
    if config.transport.timeout_ms == 0 {
        return reject("Transport timeout_ms is invalid (0)".to_string());
    }

    if config.transport.max_inflight == 0 {
        return reject("Transport max_inflight is invalid (0)".to_string());
    }

    // --- Validate backends ---
    if config.backends.is_empty() {
        return reject("No backends configured".to_string());
    }

    for (position, backend) in config.backends.iter().enumerate() {
        if backend.host.trim().is_empty() {
            return reject(format!("Backend host is missing for backend #{position}"));
        }

        if backend.port == 0 {
            return reject(format!(
                "Invalid port 0 for backend '{}' (must be between 1 and 65535)",
                backend.host
            ));
        }
    }

    if config.backends.iter().all(|backend| backend.weight == 0) {
        return reject("Every backend has weight 0".to_string());
    }

    info!("Configuration validation passed successfully");

    Ok(())
}
