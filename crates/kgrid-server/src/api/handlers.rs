//! Request handlers.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use kgrid_activator::{EndpointView, Invocation, KoRecord, RequestError, RouteSpec};
use kgrid_telemetry::RequestContext;
use serde_json::Value;

use super::state::AppState;
use crate::error::{ApiError, ApiResult};

/// Text served at `/`.
pub const WELCOME: &str = "Welcome to the KGrid JavaScript activator";

/// `GET /`
pub async fn welcome() -> &'static str {
    WELCOME
}

/// `GET /kos`
pub async fn list_kos(State(state): State<AppState>) -> Json<Vec<KoRecord>> {
    Json(state.context.list_kos().to_vec())
}

/// `GET /kos/{id}`
pub async fn get_ko(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<KoRecord>> {
    let ko = state.context.get_ko(&id)?;
    Ok(Json(ko.clone()))
}

/// `GET /endpoints`
pub async fn list_endpoints(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let endpoints: Vec<EndpointView<'_>> = state.context.list_endpoints();
    let body = serde_json::to_value(endpoints).map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(body))
}

/// `GET /endpoints/{id}`
pub async fn get_endpoint(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<RouteSpec>> {
    let spec = state.context.get_endpoint(&id)?;
    Ok(Json(spec.clone()))
}

/// `POST /endpoints/{id}`
///
/// Runs the bound function inside a request span. An empty body is passed
/// as `{}`.
pub async fn invoke_endpoint(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Invocation>> {
    let input: Value = if body.is_empty() {
        Value::Object(serde_json::Map::new())
    } else {
        serde_json::from_slice(&body).map_err(|e| {
            RequestError::InvalidInputParameter(format!("request body is not valid JSON: {e}"))
        })?
    };

    let request = RequestContext::new("http")
        .with_operation("invoke")
        .with_target(id.clone());
    let invocation = request.run(state.context.invoke(&id, input)).await?;

    Ok(Json(invocation))
}
