#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
//! Layered configuration for the KGrid activator.
//!
//! # Precedence
//!
//! From highest to lowest priority:
//!
//! 1. CLI flags (applied by the binary on top of the loaded config)
//! 2. `ORG_KGRID_JAVASCRIPT_ACTIVATOR_*` environment variables
//! 3. The config file (`--config` or `ORG_KGRID_JAVASCRIPT_ACTIVATOR_CONFIG`)
//! 4. Built-in defaults (the `Default` impls in [`types`])
//!
//! ```rust,no_run
//! let config = kgrid_config::ActivatorConfig::load(None).unwrap();
//! println!("cache root: {}", config.activator.cache_root.display());
//! ```

/// Configuration error types.
pub mod error;
/// Configuration file and environment loading.
pub mod loader;
/// Configuration struct definitions.
pub mod types;
/// Configuration validation rules.
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use types::*;

impl ActivatorConfig {
    /// Load configuration with the full precedence chain.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if a file is malformed or validation fails.
    pub fn load(config_file: Option<&std::path::Path>) -> ConfigResult<Self> {
        loader::load(config_file)
    }

    /// Re-run validation, e.g. after applying CLI overrides.
    ///
    /// # Errors
    ///
    /// Returns the first validation error found.
    pub fn validate(&self) -> ConfigResult<()> {
        validate::validate(self)
    }
}
