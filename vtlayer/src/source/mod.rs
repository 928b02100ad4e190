//! Tile payload sources.
//!
//! A [`TileSource`] performs the network half of a tile load: one GET per
//! tile URL, optionally conditional on a previously stored timestamp. The
//! decode worker owns the source; the store never calls it directly.

mod http;
mod memory;

pub use http::HttpTileSource;
pub use memory::MemoryTileSource;

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Transient fetch failures. Logged, never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The request could not be sent or timed out.
    #[error("request to {url} failed: {message}")]
    Http { url: String, message: String },

    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    /// The response body could not be read.
    #[error("failed to read body from {url}: {message}")]
    Body { url: String, message: String },

    /// The client could not be constructed.
    #[error("failed to create HTTP client: {0}")]
    Client(String),
}

/// Result of a (possibly conditional) fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Fresh payload.
    Modified {
        body: Bytes,
        /// Server-declared modification time, if any.
        last_modified: Option<DateTime<Utc>>,
    },
    /// The stored copy is still current.
    NotModified,
}

/// Source of raw tile payloads.
///
/// Uses `Pin<Box<dyn Future>>` so the worker can hold an `Arc<dyn TileSource>`.
pub trait TileSource: Send + Sync {
    /// Fetch `url`, asking for a not-modified answer when the payload has
    /// not changed since `if_modified_since`.
    fn fetch<'a>(
        &'a self,
        url: &'a str,
        if_modified_since: Option<DateTime<Utc>>,
    ) -> BoxFuture<'a, Result<FetchOutcome, FetchError>>;
}

/// Format a timestamp as an HTTP date (`Sun, 06 Nov 1994 08:49:37 GMT`).
pub fn format_http_date(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parse an HTTP date, `None` if it is not RFC 2822 compatible.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_http_date() {
        let ts = Utc.with_ymd_and_hms(1994, 11, 6, 8, 49, 37).unwrap();
        assert_eq!(format_http_date(ts), "Sun, 06 Nov 1994 08:49:37 GMT");
    }

    #[test]
    fn test_parse_http_date() {
        let ts = Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap();
        assert_eq!(parse_http_date("Wed, 21 Oct 2015 07:28:00 GMT"), Some(ts));
        assert_eq!(parse_http_date("yesterday"), None);
    }

    #[test]
    fn test_fetch_error_display() {
        let err = FetchError::Status {
            url: "http://tiles/1/2/3.pbf".to_string(),
            status: 503,
        };
        assert_eq!(err.to_string(), "HTTP 503 from http://tiles/1/2/3.pbf");
    }
}
