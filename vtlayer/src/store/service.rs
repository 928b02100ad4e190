//! Tile service: a [`TileStore`] wired to a running decode worker.
//!
//! The service owns the coordination context. The embedding application
//! feeds it view events and calls [`TileService::process_next`] or
//! [`TileService::drain_ready`] to apply completed loads; everything that
//! touches tiles, the cache or the override tables happens through it.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::TileStore;
use crate::config::StoreConfig;
use crate::pipeline::{DecodeResponse, DecodeWorker, WorkerConfig};
use crate::render::RenderAdapter;
use crate::source::{FetchError, HttpTileSource, TileSource};
use crate::view::ViewEvent;

/// Errors starting a service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("failed to build tile source: {0}")]
    Source(#[from] FetchError),
}

/// A running tile store and its decode worker.
pub struct TileService {
    store: TileStore,
    responses: mpsc::UnboundedReceiver<DecodeResponse>,
    shutdown: CancellationToken,
    worker: JoinHandle<()>,
}

impl TileService {
    /// Start a service on the current Tokio runtime.
    ///
    /// # Arguments
    ///
    /// * `config` - Store and worker configuration
    /// * `source` - Where tile payloads come from
    /// * `render` - Adapter that receives every render call
    pub fn start(
        config: &StoreConfig,
        source: Arc<dyn TileSource>,
        render: Box<dyn RenderAdapter>,
    ) -> Self {
        let worker_config = WorkerConfig {
            max_in_flight: config.max_in_flight,
        };
        let (worker, requests, responses) = DecodeWorker::new(worker_config, source);

        let shutdown = CancellationToken::new();
        let worker = tokio::spawn(worker.run(shutdown.clone()));

        info!(
            url_template = %config.url_template,
            cache_capacity = config.cache_capacity,
            max_in_flight = config.max_in_flight,
            "Tile service started"
        );

        Self {
            store: TileStore::new(config, render, requests),
            responses,
            shutdown,
            worker,
        }
    }

    /// Start a service that fetches over HTTP.
    pub fn start_http(
        config: &StoreConfig,
        render: Box<dyn RenderAdapter>,
    ) -> Result<Self, ServiceError> {
        let source = HttpTileSource::with_timeout(config.request_timeout_secs)?;
        Ok(Self::start(config, Arc::new(source), render))
    }

    pub fn store(&self) -> &TileStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut TileStore {
        &mut self.store
    }

    /// Forward a view signal to the store.
    pub fn handle_view_event(&mut self, event: ViewEvent) {
        self.store.handle_view_event(event);
    }

    /// Wait for the next completed load and apply it.
    ///
    /// Returns `false` once the worker has gone away.
    pub async fn process_next(&mut self) -> bool {
        match self.responses.recv().await {
            Some(response) => {
                self.store.handle_response(response);
                true
            }
            None => false,
        }
    }

    /// Apply every completed load without waiting. Returns how many were
    /// applied.
    pub fn drain_ready(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(response) = self.responses.try_recv() {
            self.store.handle_response(response);
            applied += 1;
        }
        applied
    }

    /// Apply responses until no load is outstanding.
    pub async fn wait_idle(&mut self) {
        while self.store.has_pending_loads() {
            if !self.process_next().await {
                warn!("Decode worker stopped with loads outstanding");
                break;
            }
        }
    }

    /// Stop the worker and wait for it to exit.
    pub async fn shutdown(self) {
        info!("Shutting down tile service");

        let Self {
            mut store,
            shutdown,
            worker,
            ..
        } = self;

        store.detach_view();
        shutdown.cancel();

        if let Err(e) = worker.await {
            warn!(error = %e, "Decode worker task failed");
        }
        debug!(stats = ?store.stats(), "Tile service stopped");
    }
}

impl std::fmt::Debug for TileService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileService")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}
