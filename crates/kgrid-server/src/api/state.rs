//! Shared handler state.

use kgrid_activator::ActivationContext;

/// State handed to every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The activation result.
    pub context: ActivationContext,
}

impl AppState {
    /// Wrap an activation result.
    #[must_use]
    pub fn new(context: ActivationContext) -> Self {
        Self { context }
    }
}
