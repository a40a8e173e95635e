//! Configuration error types.

use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// The file that failed.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A config file (or the merged tree) is not valid TOML for [`crate::ActivatorConfig`].
    #[error("failed to parse config {path}: {source}")]
    ParseError {
        /// The file that failed, or `<merged config>`.
        path: String,
        /// Underlying TOML error.
        source: toml::de::Error,
    },

    /// The built-in defaults could not be turned into a TOML tree.
    #[error("failed to serialize built-in defaults: {0}")]
    DefaultsError(#[from] toml::ser::Error),

    /// A value is out of range or inconsistent.
    #[error("invalid config value for {field}: {message}")]
    ValidationError {
        /// Dotted field path (e.g. `server.port`).
        field: String,
        /// What is wrong with it.
        message: String,
    },
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
