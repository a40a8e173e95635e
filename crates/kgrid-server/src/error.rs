//! HTTP error mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use kgrid_activator::RequestError;
use serde::Serialize;

/// Title and detail of the generic 500 response.
const INTERNAL_TITLE: &str = "Internal Server Error";
const INTERNAL_DETAIL: &str = "An unexpected error occurred";

/// Errors returned by handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// A registry lookup or invocation failed.
    #[error(transparent)]
    Request(#[from] RequestError),

    /// Anything else. The message is logged, never returned.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// JSON error body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Short error title.
    pub title: String,
    /// Human-readable detail.
    pub detail: String,
}

impl ApiError {
    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Request(RequestError::KoNotFound(_) | RequestError::EndpointNotFound(_)) => {
                StatusCode::NOT_FOUND
            },
            Self::Request(RequestError::InvalidInputParameter(_)) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            },
        }
    }

    fn body(&self) -> ErrorBody {
        match self {
            Self::Request(e) => ErrorBody {
                title: e.title().to_owned(),
                detail: e.to_string(),
            },
            Self::Internal(_) => ErrorBody {
                title: INTERNAL_TITLE.to_owned(),
                detail: INTERNAL_DETAIL.to_owned(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(message) = &self {
            tracing::error!(error = %message, "request failed");
        }
        (self.status(), Json(self.body())).into_response()
    }
}
