//! Logging and request correlation for the KGrid activator.
//!
//! - [`setup_logging`] installs a `tracing` subscriber from a [`LogConfig`]
//! - [`RequestContext`] gives each HTTP request its own span and timing
//!
//! ```rust,no_run
//! use kgrid_telemetry::{LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), kgrid_telemetry::TelemetryError> {
//! let config = LogConfig::new("info")
//!     .with_format(LogFormat::Compact)
//!     .with_directive("kgrid_activator=debug");
//! setup_logging(&config)?;
//! tracing::info!("activator starting");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod context;
mod error;
mod logging;

pub use context::RequestContext;
pub use error::{TelemetryError, TelemetryResult};
pub use logging::{LogConfig, LogFormat, LogTarget, setup_logging};
