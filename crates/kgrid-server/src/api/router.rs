//! API router configuration.

use axum::Router;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers;
use super::state::AppState;

/// Build the router. KO and endpoint ids may contain `/`, so they are
/// matched with wildcards.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::welcome))
        .route("/kos", get(handlers::list_kos))
        .route("/kos/*id", get(handlers::get_ko))
        .route("/endpoints", get(handlers::list_endpoints))
        .route(
            "/endpoints/*id",
            get(handlers::get_endpoint).post(handlers::invoke_endpoint),
        )
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
