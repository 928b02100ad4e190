//! vtlayer - Vector tile store for interactive maps
//!
//! This library fetches Mapbox Vector Tiles as a view moves, decodes them
//! off the coordination context, keeps a per-tile spatial index of visible
//! features and an LRU cache of decoded tiles, and applies style and
//! visibility overrides that persist across tile loads.
//!
//! Drawing is delegated to a [`render::RenderAdapter`]; fetching to a
//! [`source::TileSource`].

pub mod cache;
pub mod config;
pub mod coord;
pub mod feature;
pub mod geometry;
pub mod index;
pub mod logging;
pub mod overrides;
pub mod pipeline;
pub mod render;
pub mod source;
pub mod store;
pub mod style;
pub mod tile;
pub mod view;

pub use config::{StoreConfig, DEFAULT_CACHE_CAPACITY};
pub use coord::{TileCoord, TileKey};
pub use geometry::{FeatureData, Geometry, PropertyValue};
pub use store::{StoreError, TileLifecycle, TileService, TileStore};
pub use style::Style;
pub use view::ViewEvent;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
