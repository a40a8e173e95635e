//! Per-request correlation context.

use std::future::Future;
use std::time::Instant;

use tracing::Instrument;
use uuid::Uuid;

/// Correlation data carried through the handling of one request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Unique request identifier.
    pub request_id: Uuid,
    /// Component that created the context (e.g. `http`).
    pub source: String,
    /// Operation being performed (e.g. `invoke`).
    pub operation: Option<String>,
    /// Target of the operation, if any (KO or endpoint id).
    pub target: Option<String>,
    started: Instant,
}

impl RequestContext {
    /// Create a context for a request entering `source`.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            source: source.into(),
            operation: None,
            target: None,
            started: Instant::now(),
        }
    }

    /// Set the operation name.
    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// Set the operation target.
    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Milliseconds since the context was created.
    #[must_use]
    pub fn elapsed_ms(&self) -> u128 {
        self.started.elapsed().as_millis()
    }

    /// A span carrying this context's fields.
    #[must_use]
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "request",
            request_id = %self.request_id,
            source = %self.source,
            operation = self.operation.as_deref(),
            target = self.target.as_deref(),
        )
    }

    /// Drive `work` inside this request's span, logging start and
    /// completion with the elapsed time.
    pub async fn run<F>(self, work: F) -> F::Output
    where
        F: Future,
    {
        let span = self.span();
        async move {
            tracing::debug!("Request started");
            let output = work.await;
            tracing::debug!(elapsed_ms = self.elapsed_ms(), "Request completed");
            output
        }
        .instrument(span)
        .await
    }
}
