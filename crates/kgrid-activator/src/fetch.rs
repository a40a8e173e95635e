//! Remote document and archive retrieval.
//!
//! Every network read in the pipeline (manifests, KO archives, linked-data
//! contexts) goes through [`HttpFetcher`]: per-attempt timeouts, a bounded
//! retry budget for transient failures, and a hard cap on body size.
//! `file:` URLs are read from disk so callers can treat both uniformly.

use std::time::Duration;

use futures::StreamExt;
use kgrid_config::FetchConfig;
use reqwest::StatusCode;
use tracing::{debug, warn};
use url::Url;

use crate::error::{ActivatorError, ActivatorResult};

/// Maximum number of HTTP redirects to follow.
const MAX_REDIRECTS: usize = 10;

/// HTTP client with retry and size limits.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    retries: u32,
    backoff: Duration,
    max_bytes: u64,
}

impl HttpFetcher {
    /// Build a fetcher from the `[fetch]` config section.
    ///
    /// # Errors
    ///
    /// Returns [`ActivatorError::Acquisition`] if the HTTP client cannot be
    /// built (e.g. TLS backend unavailable).
    pub fn new(config: &FetchConfig) -> ActivatorResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .user_agent(concat!("kgrid-activator/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ActivatorError::Acquisition {
                location: "<http client>".into(),
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            retries: config.retries,
            backoff: Duration::from_millis(config.backoff_ms),
            max_bytes: config.max_download_bytes,
        })
    }

    /// Override the maximum body size.
    #[must_use]
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Fetch the body at `url` as raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ActivatorError::Acquisition`] on a non-2xx status or a
    /// transport failure that outlives the retry budget, and
    /// [`ActivatorError::PackageTooLarge`] if the body exceeds the limit.
    pub async fn get_bytes(&self, url: &Url) -> ActivatorResult<Vec<u8>> {
        if url.scheme() == "file" {
            return read_file_url(url).await;
        }

        let mut attempt: u32 = 0;
        loop {
            match self.try_once(url).await {
                Ok(bytes) => return Ok(bytes),
                Err(Attempt::Fatal(e)) => return Err(e),
                Err(Attempt::Transient(message)) => {
                    if attempt >= self.retries {
                        return Err(ActivatorError::Acquisition {
                            location: url.to_string(),
                            message,
                        });
                    }
                    let delay = self.backoff.saturating_mul(2u32.saturating_pow(attempt));
                    warn!(
                        url = %url,
                        attempt = attempt.saturating_add(1),
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %message,
                        "transient fetch failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                },
            }
        }
    }

    /// Fetch the body at `url` as UTF-8 text.
    ///
    /// # Errors
    ///
    /// See [`HttpFetcher::get_bytes`]; a non-UTF-8 body is an
    /// [`ActivatorError::Acquisition`].
    pub async fn get_text(&self, url: &Url) -> ActivatorResult<String> {
        let bytes = self.get_bytes(url).await?;
        String::from_utf8(bytes).map_err(|e| ActivatorError::Acquisition {
            location: url.to_string(),
            message: format!("body is not valid UTF-8: {e}"),
        })
    }

    /// Fetch and parse the JSON document at `url`.
    ///
    /// # Errors
    ///
    /// See [`HttpFetcher::get_bytes`]; an unparsable body is an
    /// [`ActivatorError::Acquisition`].
    pub async fn get_json(&self, url: &Url) -> ActivatorResult<serde_json::Value> {
        let bytes = self.get_bytes(url).await?;
        serde_json::from_slice(&bytes).map_err(|e| ActivatorError::Acquisition {
            location: url.to_string(),
            message: format!("invalid JSON: {e}"),
        })
    }

    async fn try_once(&self, url: &Url) -> Result<Vec<u8>, Attempt> {
        debug!(url = %url, "GET");
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Attempt::Transient(format!("request failed: {e}")))?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Attempt::Transient(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(Attempt::Fatal(ActivatorError::Acquisition {
                location: url.to_string(),
                message: format!("HTTP {status}"),
            }));
        }

        if let Some(length) = response.content_length()
            && length > self.max_bytes
        {
            return Err(Attempt::Fatal(ActivatorError::PackageTooLarge {
                size: length,
                limit: self.max_bytes,
            }));
        }

        download_with_limit(response, self.max_bytes).await
    }
}

/// Outcome of a single failed attempt.
enum Attempt {
    Transient(String),
    Fatal(ActivatorError),
}

async fn download_with_limit(
    response: reqwest::Response,
    max_size: u64,
) -> Result<Vec<u8>, Attempt> {
    let capacity =
        usize::try_from(response.content_length().unwrap_or(0).min(max_size)).unwrap_or(0);
    let mut bytes = Vec::with_capacity(capacity);
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| Attempt::Transient(format!("download error: {e}")))?;
        bytes.extend_from_slice(&chunk);
        let current_size = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
        if current_size > max_size {
            return Err(Attempt::Fatal(ActivatorError::PackageTooLarge {
                size: current_size,
                limit: max_size,
            }));
        }
    }

    Ok(bytes)
}

async fn read_file_url(url: &Url) -> ActivatorResult<Vec<u8>> {
    let path = url.to_file_path().map_err(|()| ActivatorError::Acquisition {
        location: url.to_string(),
        message: "not a valid local file URL".into(),
    })?;
    tokio::fs::read(&path)
        .await
        .map_err(|e| ActivatorError::Acquisition {
            location: url.to_string(),
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn fetcher(retries: u32) -> HttpFetcher {
        HttpFetcher::new(&FetchConfig {
            retries,
            backoff_ms: 1,
            ..FetchConfig::default()
        })
        .unwrap()
    }

    fn url(server: &MockServer, p: &str) -> Url {
        Url::parse(&format!("{}{p}", server.uri())).unwrap()
    }

    #[tokio::test]
    async fn fetches_json() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/manifest.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"[{"@id":"a"}]"#))
            .expect(1)
            .mount(&server)
            .await;

        let v = fetcher(0)
            .get_json(&url(&server, "/manifest.json"))
            .await
            .unwrap();
        assert_eq!(v[0]["@id"], "a");
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.zip"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let err = fetcher(3)
            .get_bytes(&url(&server, "/missing.zip"))
            .await
            .unwrap_err();
        assert!(matches!(err, ActivatorError::Acquisition { .. }));
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn server_errors_are_retried_until_budget_is_spent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let err = fetcher(2)
            .get_bytes(&url(&server, "/flaky"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/big"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 2048]))
            .mount(&server)
            .await;

        let err = fetcher(0)
            .with_max_bytes(1024)
            .get_bytes(&url(&server, "/big"))
            .await
            .unwrap_err();
        assert!(matches!(err, ActivatorError::PackageTooLarge { limit: 1024, .. }));
    }

    #[tokio::test]
    async fn file_urls_read_from_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("context.jsonld");
        std::fs::write(&file, "{}").unwrap();

        let file_url = Url::from_file_path(&file).unwrap();
        assert_eq!(fetcher(0).get_text(&file_url).await.unwrap(), "{}");

        let missing = Url::from_file_path(tmp.path().join("nope")).unwrap();
        assert!(fetcher(0).get_bytes(&missing).await.is_err());
    }
}
