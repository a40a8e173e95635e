//! Post-merge configuration validation.

use crate::error::{ConfigError, ConfigResult};
use crate::types::ActivatorConfig;

/// Validate a merged configuration.
///
/// # Errors
///
/// Returns the first [`ConfigError::ValidationError`] found.
pub fn validate(config: &ActivatorConfig) -> ConfigResult<()> {
    validate_activator(config)?;
    validate_fetch(config)?;
    validate_runtime(config)?;
    validate_server(config)?;
    validate_logging(config)?;
    Ok(())
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_owned(),
        message: message.into(),
    }
}

fn validate_activator(config: &ActivatorConfig) -> ConfigResult<()> {
    let a = &config.activator;
    if a.cache_root.as_os_str().is_empty() {
        return Err(invalid("activator.cache_root", "must not be empty"));
    }
    if a.engine.trim().is_empty() {
        return Err(invalid("activator.engine", "must not be empty"));
    }
    if a.engine_family.trim().is_empty() {
        return Err(invalid("activator.engine_family", "must not be empty"));
    }
    if a.supported_versions.is_empty() {
        return Err(invalid(
            "activator.supported_versions",
            "at least one schema version must be supported",
        ));
    }
    if a.manifest.as_deref().is_some_and(|m| m.trim().is_empty()) {
        return Err(invalid("activator.manifest", "must not be blank when set"));
    }
    Ok(())
}

fn validate_fetch(config: &ActivatorConfig) -> ConfigResult<()> {
    let f = &config.fetch;
    if f.timeout_secs == 0 {
        return Err(invalid("fetch.timeout_secs", "must be greater than zero"));
    }
    if f.connect_timeout_secs == 0 {
        return Err(invalid(
            "fetch.connect_timeout_secs",
            "must be greater than zero",
        ));
    }
    if f.retries > 10 {
        return Err(invalid("fetch.retries", "at most 10 retries are allowed"));
    }
    if f.max_download_bytes == 0 {
        return Err(invalid(
            "fetch.max_download_bytes",
            "must be greater than zero",
        ));
    }
    Ok(())
}

fn validate_runtime(config: &ActivatorConfig) -> ConfigResult<()> {
    if config.runtime.node_command.trim().is_empty() {
        return Err(invalid("runtime.node_command", "must not be empty"));
    }
    if config.runtime.call_timeout_secs == 0 {
        return Err(invalid(
            "runtime.call_timeout_secs",
            "must be greater than zero",
        ));
    }
    Ok(())
}

fn validate_server(config: &ActivatorConfig) -> ConfigResult<()> {
    if config.server.port == 0 {
        return Err(invalid("server.port", "must be greater than zero"));
    }
    if config.server.host.trim().is_empty() {
        return Err(invalid("server.host", "must not be empty"));
    }
    Ok(())
}

fn validate_logging(config: &ActivatorConfig) -> ConfigResult<()> {
    if !matches!(
        config.logging.format.as_str(),
        "pretty" | "compact" | "json" | "full"
    ) {
        return Err(invalid(
            "logging.format",
            format!(
                "unsupported format '{}'; expected one of: pretty, compact, json, full",
                config.logging.format
            ),
        ));
    }
    match config.logging.target.as_str() {
        "stderr" | "stdout" => {},
        "file" => {
            if config
                .logging
                .directory
                .as_ref()
                .is_none_or(|d| d.as_os_str().is_empty())
            {
                return Err(invalid(
                    "logging.directory",
                    "required when logging.target is 'file'",
                ));
            }
        },
        other => {
            return Err(invalid(
                "logging.target",
                format!("unsupported target '{other}'; expected one of: stderr, stdout, file"),
            ));
        },
    }
    Ok(())
}
