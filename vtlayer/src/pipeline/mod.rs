//! Fetch and decode pipeline.
//!
//! The pipeline is the only code that runs off the coordination context.
//! The store sends it a [`DecodeRequest`] per tile load and later receives a
//! [`DecodeResponse`]; the message channel is the only crossing point, and
//! the worker never touches store, tile or cache state.

mod decode;
pub mod proto;
mod worker;

pub use decode::{
    decode_tile, DecodeError, DecodeReport, DecodedFeature, DecodedLayer, DecodedTile, Diagnostic,
};
pub use worker::{DecodeWorker, WorkerConfig, DEFAULT_MAX_IN_FLIGHT};

use std::fmt;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::coord::TileCoord;
use crate::source::FetchError;

/// Identifies one load attempt of one tile.
///
/// A tile that is cancelled and requested again gets a fresh id, so a late
/// response from the earlier attempt can be told apart and discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoadId(pub u64);

impl fmt::Display for LoadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "load#{}", self.0)
    }
}

/// Request to fetch and decode one tile.
#[derive(Debug, Clone)]
pub struct DecodeRequest {
    pub load: LoadId,
    pub coord: TileCoord,
    pub url: String,
    /// Set for conditional revalidation of a cached tile.
    pub if_modified_since: Option<DateTime<Utc>>,
    /// Fired by the store when the tile is cancelled while loading.
    pub cancellation: CancellationToken,
}

/// Result of one load attempt.
#[derive(Debug, Clone)]
pub enum DecodeOutcome {
    /// Fresh decoded data, possibly partial (see the tile's report).
    Decoded(DecodedTile),
    /// The source says the cached copy is still current.
    NotModified,
    /// Decoding stopped because the request was cancelled.
    Cancelled,
    /// The fetch failed; the attempt produced nothing.
    FetchFailed(FetchError),
    /// The decode task itself failed.
    WorkerFailed(String),
}

/// Response for one [`DecodeRequest`].
#[derive(Debug, Clone)]
pub struct DecodeResponse {
    pub load: LoadId,
    pub coord: TileCoord,
    pub outcome: DecodeOutcome,
}
