//! In-memory tile source.
//!
//! Serves payloads registered by URL and records every request it receives,
//! so callers can drive the full load path without a network.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{BoxFuture, FetchError, FetchOutcome, TileSource};

#[derive(Debug, Clone)]
struct Entry {
    body: Bytes,
    modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, Entry>,
    failing: HashSet<String>,
    requests: Vec<(String, Option<DateTime<Utc>>)>,
}

/// Tile source backed by a shared map of URL to payload.
///
/// Clones share state, so a handle kept by the caller can change what the
/// worker's copy serves.
#[derive(Debug, Clone, Default)]
pub struct MemoryTileSource {
    state: Arc<Mutex<State>>,
}

impl MemoryTileSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` for `url`, modified now.
    pub fn insert(&self, url: impl Into<String>, body: impl Into<Bytes>) {
        self.insert_at(url, body, Utc::now());
    }

    /// Serve `body` for `url` with an explicit modification time.
    pub fn insert_at(&self, url: impl Into<String>, body: impl Into<Bytes>, modified: DateTime<Utc>) {
        self.state.lock().entries.insert(
            url.into(),
            Entry {
                body: body.into(),
                modified,
            },
        );
    }

    /// Make every later fetch of `url` fail with a 503.
    pub fn fail(&self, url: impl Into<String>) {
        self.state.lock().failing.insert(url.into());
    }

    /// Stop failing `url`.
    pub fn recover(&self, url: &str) {
        self.state.lock().failing.remove(url);
    }

    /// Every request received so far with its conditional timestamp.
    pub fn requests(&self) -> Vec<(String, Option<DateTime<Utc>>)> {
        self.state.lock().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.state.lock().requests.len()
    }

    fn respond(
        &self,
        url: &str,
        if_modified_since: Option<DateTime<Utc>>,
    ) -> Result<FetchOutcome, FetchError> {
        let mut state = self.state.lock();
        state.requests.push((url.to_string(), if_modified_since));

        if state.failing.contains(url) {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: 503,
            });
        }

        let entry = state.entries.get(url).ok_or_else(|| FetchError::Status {
            url: url.to_string(),
            status: 404,
        })?;

        match if_modified_since {
            Some(since) if entry.modified <= since => Ok(FetchOutcome::NotModified),
            _ => Ok(FetchOutcome::Modified {
                body: entry.body.clone(),
                last_modified: Some(entry.modified),
            }),
        }
    }
}

impl TileSource for MemoryTileSource {
    fn fetch<'a>(
        &'a self,
        url: &'a str,
        if_modified_since: Option<DateTime<Utc>>,
    ) -> BoxFuture<'a, Result<FetchOutcome, FetchError>> {
        let result = self.respond(url, if_modified_since);
        Box::pin(async move { result })
    }
}
