#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
//! Knowledge Object activation for KGrid.
//!
//! The pipeline reads a manifest of Knowledge Objects (KOs), acquires each
//! one into a local cache, interprets its metadata across both schema
//! generations, turns its deployment descriptor into routes, and binds each
//! route to a callable. The result is an immutable [`ActivationContext`]
//! that request handlers query and invoke.
//!
//! ```rust,no_run
//! # async fn run() -> kgrid_activator::ActivatorResult<()> {
//! let config = kgrid_config::ActivatorConfig::load(None).expect("config");
//! let activator = kgrid_activator::Activator::with_node_runtime(&config)?;
//! let context = activator.activate().await;
//! for ko in context.list_kos() {
//!     println!("{} {}", ko.id, ko.status);
//! }
//! # Ok(())
//! # }
//! ```

pub mod acquire;
mod blocking;
pub mod deployment;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod linked_data;
pub mod loader;
pub mod manifest;
pub mod metadata;
pub mod record;
pub mod registrar;
pub mod registry;
pub mod resolver;

pub use acquire::{Acquired, Acquirer, SourceLocation};
pub use deployment::{EngineSpec, RouteSpec};
pub use error::{ActivatorError, ActivatorResult, RequestError};
pub use fetch::HttpFetcher;
pub use linked_data::{IriExpander, LinkedDataExpander};
pub use loader::{ArtifactLoader, KoFunction, NodeArtifactLoader, StaticArtifactLoader};
pub use manifest::{Manifest, ManifestSource};
pub use metadata::{DeploymentLocator, MetadataAdapter, ResolvedDeployment};
pub use record::{KoId, KoRecord, KoStatus};
pub use registrar::Registrar;
pub use registry::{ActivationContext, EndpointView, Invocation, RegistryBuilder};
pub use resolver::Activator;
