//! HTTP front end for the KGrid activator.
//!
//! [`api::create_router`] exposes an [`ActivationContext`](kgrid_activator::ActivationContext)
//! over REST:
//!
//! | Method | Path | |
//! |---|---|---|
//! | GET | `/` | welcome text |
//! | GET | `/kos` | all KO records |
//! | GET | `/kos/{id}` | one KO record |
//! | GET | `/endpoints` | all bound routes |
//! | GET | `/endpoints/{id}` | one route |
//! | POST | `/endpoints/{id}` | invoke a route with the JSON body |

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod api;
pub mod cli;
pub mod error;
pub mod server;

pub use api::{AppState, create_router};
pub use cli::Args;
pub use error::{ApiError, ApiResult};
