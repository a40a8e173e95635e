//! Layered configuration loading.
//!
//! 1. Serialize [`ActivatorConfig::default`] as the base tree
//! 2. Merge the config file, when one is given
//! 3. Apply `ORG_KGRID_JAVASCRIPT_ACTIVATOR_*` environment overrides
//! 4. Deserialize and validate

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};
use crate::types::ActivatorConfig;
use crate::validate;

/// Maximum accepted config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: usize = 1_048_576;

/// Prefix shared by every environment variable the activator reads.
pub const ENV_PREFIX: &str = "ORG_KGRID_JAVASCRIPT_ACTIVATOR_";
/// Manifest location.
pub const ENV_MANIFEST_PATH: &str = "ORG_KGRID_JAVASCRIPT_ACTIVATOR_MANIFEST_PATH";
/// Cache root directory.
pub const ENV_COLLECTION_PATH: &str = "ORG_KGRID_JAVASCRIPT_ACTIVATOR_COLLECTION_PATH";
/// HTTP listen port.
pub const ENV_PORT: &str = "ORG_KGRID_JAVASCRIPT_ACTIVATOR_PORT";
/// Config file location.
pub const ENV_CONFIG: &str = "ORG_KGRID_JAVASCRIPT_ACTIVATOR_CONFIG";

/// Load configuration from defaults, an optional file, and the process environment.
///
/// When `config_file` is `None`, the file named by [`ENV_CONFIG`] is used if set.
///
/// # Errors
///
/// Returns a [`ConfigError`] if a file is unreadable or malformed, an
/// environment value has the wrong type, or validation fails.
pub fn load(config_file: Option<&Path>) -> ConfigResult<ActivatorConfig> {
    load_with_env(config_file, &collect_env_vars())
}

/// Like [`load`] with an explicit environment map.
///
/// # Errors
///
/// See [`load`].
pub fn load_with_env(
    config_file: Option<&Path>,
    env: &HashMap<String, String>,
) -> ConfigResult<ActivatorConfig> {
    let mut merged = toml::Value::try_from(ActivatorConfig::default())?;

    let file = config_file
        .map(Path::to_path_buf)
        .or_else(|| env.get(ENV_CONFIG).filter(|v| !v.is_empty()).map(PathBuf::from));
    if let Some(path) = file {
        let overlay = load_file(&path)?;
        deep_merge(&mut merged, &overlay);
        info!(path = %path.display(), "loaded config file");
    }

    let applied = apply_env_overrides(&mut merged, env)?;
    if applied > 0 {
        debug!(count = applied, "applied environment overrides");
    }

    let config: ActivatorConfig =
        merged
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError {
                path: "<merged config>".to_owned(),
                source: e,
            })?;

    validate::validate(&config)?;
    Ok(config)
}

/// Snapshot the process environment variables under [`ENV_PREFIX`].
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars()
        .filter(|(k, _)| k.starts_with(ENV_PREFIX))
        .collect()
}

fn load_file(path: &Path) -> ConfigResult<toml::Value> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.display().to_string(),
        source: e,
    })?;

    if content.len() > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::ValidationError {
            field: path.display().to_string(),
            message: format!(
                "config file is {} bytes, exceeding the {MAX_CONFIG_FILE_SIZE} byte limit",
                content.len()
            ),
        });
    }

    toml::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        source: e,
    })
}

/// Recursively merge `overlay` into `base`. Tables merge per key; scalars
/// and arrays from the overlay replace the base value.
pub fn deep_merge(base: &mut toml::Value, overlay: &toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                if let Some(base_val) = base_table.get_mut(key) {
                    deep_merge(base_val, overlay_val);
                } else {
                    base_table.insert(key.clone(), overlay_val.clone());
                }
            }
        },
        (base, overlay) => {
            *base = overlay.clone();
        },
    }
}

fn apply_env_overrides(
    merged: &mut toml::Value,
    env: &HashMap<String, String>,
) -> ConfigResult<usize> {
    let mut applied = 0usize;

    if let Some(manifest) = env.get(ENV_MANIFEST_PATH).filter(|v| !v.is_empty()) {
        set_value(merged, "activator", "manifest", toml::Value::String(manifest.clone()));
        applied = applied.saturating_add(1);
    }
    if let Some(root) = env.get(ENV_COLLECTION_PATH).filter(|v| !v.is_empty()) {
        set_value(merged, "activator", "cache_root", toml::Value::String(root.clone()));
        applied = applied.saturating_add(1);
    }
    if let Some(port) = env.get(ENV_PORT).filter(|v| !v.is_empty()) {
        let port: u16 = port.parse().map_err(|_| ConfigError::ValidationError {
            field: ENV_PORT.to_owned(),
            message: format!("'{port}' is not a valid port number"),
        })?;
        set_value(merged, "server", "port", toml::Value::Integer(i64::from(port)));
        applied = applied.saturating_add(1);
    }

    Ok(applied)
}

fn set_value(merged: &mut toml::Value, section: &str, key: &str, value: toml::Value) {
    if let toml::Value::Table(root) = merged {
        let table = root
            .entry(section.to_owned())
            .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
        if let toml::Value::Table(table) = table {
            table.insert(key.to_owned(), value);
        }
    }
}
