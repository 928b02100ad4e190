//! Decode worker daemon.
//!
//! The [`DecodeWorker`] is a long-running background task that:
//! - Receives [`DecodeRequest`]s from the store via a channel
//! - Limits how many loads are in flight at once
//! - Fetches each payload from the [`TileSource`]
//! - Decodes it on the blocking pool so large tiles never stall the runtime
//! - Sends a [`DecodeResponse`] back for every request it accepted
//!
//! # Example
//!
//! ```ignore
//! let (worker, request_tx, response_rx) = DecodeWorker::new(WorkerConfig::default(), source);
//!
//! let shutdown = CancellationToken::new();
//! tokio::spawn(worker.run(shutdown.clone()));
//! ```

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{decode_tile, DecodeOutcome, DecodeRequest, DecodeResponse};
use crate::source::{FetchOutcome, TileSource};

// =============================================================================
// Configuration
// =============================================================================

/// Default number of loads allowed in flight at once.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 16;

/// Configuration for the decode worker.
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// Maximum concurrent fetch+decode operations. Later requests wait for a
    /// permit in arrival order.
    pub max_in_flight: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

// =============================================================================
// Decode Worker
// =============================================================================

/// The fetch+decode worker.
pub struct DecodeWorker {
    source: Arc<dyn TileSource>,
    permits: Arc<Semaphore>,
    request_rx: mpsc::UnboundedReceiver<DecodeRequest>,
    response_tx: mpsc::UnboundedSender<DecodeResponse>,
}

impl DecodeWorker {
    /// Creates a worker with its request and response channels.
    ///
    /// # Arguments
    ///
    /// * `config` - Worker configuration
    /// * `source` - Where payloads are fetched from
    ///
    /// # Returns
    ///
    /// The worker, the sender the store submits requests on, and the
    /// receiver responses arrive on.
    pub fn new(
        config: WorkerConfig,
        source: Arc<dyn TileSource>,
    ) -> (
        Self,
        mpsc::UnboundedSender<DecodeRequest>,
        mpsc::UnboundedReceiver<DecodeResponse>,
    ) {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (response_tx, response_rx) = mpsc::unbounded_channel();

        let worker = Self {
            source,
            permits: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
            request_rx,
            response_tx,
        };

        (worker, request_tx, response_rx)
    }

    /// Runs the worker until shutdown is signalled or every request sender
    /// has been dropped.
    pub async fn run(self, shutdown: CancellationToken) {
        info!("Decode worker starting");

        let Self {
            source,
            permits,
            mut request_rx,
            response_tx,
        } = self;

        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Decode worker shutting down");
                    break;
                }

                request = request_rx.recv() => {
                    let Some(request) = request else {
                        debug!("Request channel closed");
                        break;
                    };
                    tasks.spawn(Self::handle_request(
                        request,
                        Arc::clone(&source),
                        Arc::clone(&permits),
                        response_tx.clone(),
                    ));
                }

                // Reap finished loads so the set does not grow unbounded.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        tasks.shutdown().await;
        info!("Decode worker stopped");
    }

    async fn handle_request(
        request: DecodeRequest,
        source: Arc<dyn TileSource>,
        permits: Arc<Semaphore>,
        response_tx: mpsc::UnboundedSender<DecodeResponse>,
    ) {
        let start = Instant::now();
        let DecodeRequest {
            load,
            coord,
            url,
            if_modified_since,
            cancellation,
        } = request;

        let Ok(_permit) = permits.acquire_owned().await else {
            return;
        };

        debug!(tile = %coord, %load, url = %url, conditional = if_modified_since.is_some(), "Fetching tile");

        let outcome = match source.fetch(&url, if_modified_since).await {
            Ok(FetchOutcome::NotModified) => DecodeOutcome::NotModified,
            Ok(FetchOutcome::Modified {
                body,
                last_modified,
            }) => {
                let fetched_at = last_modified.unwrap_or_else(Utc::now);
                let token = cancellation.clone();
                let decoded = tokio::task::spawn_blocking(move || {
                    decode_tile(&body, coord, fetched_at, &token)
                })
                .await;

                match decoded {
                    Ok(Some(tile)) => DecodeOutcome::Decoded(tile),
                    Ok(None) => DecodeOutcome::Cancelled,
                    Err(e) => {
                        warn!(tile = %coord, error = %e, "Decode task failed");
                        DecodeOutcome::WorkerFailed(e.to_string())
                    }
                }
            }
            Err(e) => {
                warn!(tile = %coord, error = %e, "Tile fetch failed");
                DecodeOutcome::FetchFailed(e)
            }
        };

        debug!(
            tile = %coord,
            %load,
            duration_ms = start.elapsed().as_millis() as u64,
            "Load finished"
        );

        // The receiver is gone only when the store has shut down.
        let _ = response_tx.send(DecodeResponse {
            load,
            coord,
            outcome,
        });
    }
}

// =============================================================================
// Tests
// =============================================================================
