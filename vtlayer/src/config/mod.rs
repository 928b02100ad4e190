//! Store configuration.
//!
//! [`StoreConfig`] is what the store and service are built from. It can be
//! assembled in code with the `with_*` builders or loaded from an INI file
//! through [`ConfigFile`].

mod file;

pub use file::{config_directory, config_file_path, ConfigError, ConfigFile};

use std::fmt;
use std::sync::Arc;

use crate::cache::CacheError;
use crate::coord::TileCoord;
use crate::geometry::{FeatureData, PropertyValue};
use crate::pipeline::DEFAULT_MAX_IN_FLIGHT;
use crate::style::StyleTable;

/// Default number of decoded tiles kept in the cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 64;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default tile URL template.
pub const DEFAULT_URL_TEMPLATE: &str = "http://localhost:8080/{z}/{x}/{y}.pbf";

/// Everything a feature-id function may look at.
#[derive(Debug, Clone, Copy)]
pub struct FeatureIdContext<'a> {
    pub layer: &'a str,
    pub coord: TileCoord,
    /// Position within the layer's feature list.
    pub index: usize,
    pub data: &'a FeatureData,
}

/// Maps a decoded feature to the stable id used for cross-tile addressing.
pub type FeatureIdFn = Arc<dyn Fn(&FeatureIdContext<'_>) -> String + Send + Sync>;

/// Default feature id: the `id` property, then the protobuf feature id,
/// then a position-derived `layer:z/x/y:index`.
///
/// Only the first two are stable across tiles; the fallback is unique but
/// will not match the same feature clipped into a neighbouring tile.
pub fn default_feature_id(ctx: &FeatureIdContext<'_>) -> String {
    match ctx.data.property("id") {
        Some(PropertyValue::String(s)) => return s.clone(),
        Some(value) => return value.to_string(),
        None => {}
    }
    match ctx.data.source_id {
        Some(id) => id.to_string(),
        None => format!("{}:{}:{}", ctx.layer, ctx.coord, ctx.index),
    }
}

/// Configuration for a tile store and its service.
#[derive(Clone)]
pub struct StoreConfig {
    /// URL template with `{z}`, `{x}` and `{y}` placeholders.
    pub url_template: String,
    /// Decoded tiles kept for reuse.
    pub cache_capacity: usize,
    /// Diagnostics only; no behavioural effect.
    pub debug: bool,
    /// Concurrent fetch+decode operations.
    pub max_in_flight: usize,
    pub request_timeout_secs: u64,
    pub feature_id: FeatureIdFn,
    /// Styles applied to new features by `(property, value)`.
    pub initial_styles: StyleTable,
}

impl StoreConfig {
    pub fn new(url_template: impl Into<String>) -> Self {
        Self {
            url_template: url_template.into(),
            ..Default::default()
        }
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Set the cache capacity from a signed value, rejecting negatives.
    pub fn with_signed_cache_capacity(mut self, capacity: i64) -> Result<Self, CacheError> {
        self.cache_capacity =
            usize::try_from(capacity).map_err(|_| CacheError::InvalidCapacity(capacity))?;
        Ok(self)
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    pub fn with_request_timeout(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    pub fn with_feature_id<F>(mut self, f: F) -> Self
    where
        F: Fn(&FeatureIdContext<'_>) -> String + Send + Sync + 'static,
    {
        self.feature_id = Arc::new(f);
        self
    }

    pub fn with_initial_styles(mut self, styles: StyleTable) -> Self {
        self.initial_styles = styles;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url_template: DEFAULT_URL_TEMPLATE.to_string(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            debug: false,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            feature_id: Arc::new(default_feature_id),
            initial_styles: StyleTable::new(),
        }
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("url_template", &self.url_template)
            .field("cache_capacity", &self.cache_capacity)
            .field("debug", &self.debug)
            .field("max_in_flight", &self.max_in_flight)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("initial_styles", &self.initial_styles.len())
            .finish_non_exhaustive()
    }
}
