//! reqwest-backed tile source.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{IF_MODIFIED_SINCE, LAST_MODIFIED};
use reqwest::StatusCode;
use tracing::{debug, trace, warn};

use super::{format_http_date, parse_http_date, BoxFuture, FetchError, FetchOutcome, TileSource};

const USER_AGENT: &str = concat!("vtlayer/", env!("CARGO_PKG_VERSION"));

/// Async HTTP(S) tile source.
#[derive(Debug, Clone)]
pub struct HttpTileSource {
    client: reqwest::Client,
}

impl HttpTileSource {
    /// Create a source with the given request timeout.
    ///
    /// # Arguments
    ///
    /// * `timeout_secs` - Per-request timeout in seconds
    pub fn with_timeout(timeout_secs: u64) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(USER_AGENT)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self { client })
    }

    async fn get(
        &self,
        url: &str,
        if_modified_since: Option<DateTime<Utc>>,
    ) -> Result<FetchOutcome, FetchError> {
        trace!(url = url, "HTTP GET request starting");

        let mut request = self.client.get(url);
        if let Some(ts) = if_modified_since {
            request = request.header(IF_MODIFIED_SINCE, format_http_date(ts));
        }

        let response = match request.send().await {
            Ok(resp) => {
                debug!(
                    url = url,
                    status = resp.status().as_u16(),
                    "HTTP response received"
                );
                resp
            }
            Err(e) => {
                warn!(
                    url = url,
                    error = %e,
                    is_connect = e.is_connect(),
                    is_timeout = e.is_timeout(),
                    "HTTP request failed"
                );
                return Err(FetchError::Http {
                    url: url.to_string(),
                    message: e.to_string(),
                });
            }
        };

        if response.status() == StatusCode::NOT_MODIFIED {
            return Ok(FetchOutcome::NotModified);
        }

        if !response.status().is_success() {
            warn!(
                url = url,
                status = response.status().as_u16(),
                "HTTP error status"
            );
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let last_modified = response
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_http_date);

        match response.bytes().await {
            Ok(body) => {
                trace!(url = url, bytes = body.len(), "HTTP response body read");
                Ok(FetchOutcome::Modified {
                    body,
                    last_modified,
                })
            }
            Err(e) => {
                warn!(url = url, error = %e, "Failed to read response body");
                Err(FetchError::Body {
                    url: url.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }
}

impl TileSource for HttpTileSource {
    fn fetch<'a>(
        &'a self,
        url: &'a str,
        if_modified_since: Option<DateTime<Utc>>,
    ) -> BoxFuture<'a, Result<FetchOutcome, FetchError>> {
        Box::pin(self.get(url, if_modified_since))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_builds() {
        assert!(HttpTileSource::with_timeout(5).is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transient_error() {
        let source = HttpTileSource::with_timeout(2).unwrap();
        let result = source.fetch("http://127.0.0.1:9/0/0/0.pbf", None).await;
        assert!(matches!(result, Err(FetchError::Http { .. })));
    }
}
