//! Tile lifecycle coordinator.
//!
//! [`TileStore`] owns the active tiles, the decoded-tile cache and the
//! global override tables. It is a single-writer structure: every method is
//! synchronous and runs on the coordination context. Loads leave as
//! [`DecodeRequest`]s on a channel and come back through
//! [`TileStore::handle_response`].
//!
//! Cancellation is cooperative. Cancelling a loading tile never aborts the
//! network call; the eventual response is discarded with no index, cache or
//! render side effects.

mod service;
mod state;

pub use service::{ServiceError, TileService};
pub use state::{StoreStats, TileLifecycle};

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{CacheError, CacheStats, TileCache};
use crate::config::{FeatureIdContext, FeatureIdFn, StoreConfig};
use crate::coord::{TileCoord, TileKey};
use crate::feature::Feature;
use crate::geometry::PropertyValue;
use crate::overrides::{OverridePolicy, OverrideTables};
use crate::pipeline::{DecodeOutcome, DecodeRequest, DecodeResponse, DecodedTile, LoadId};
use crate::render::RenderAdapter;
use crate::style::Style;
use crate::tile::Tile;
use crate::view::ViewEvent;
use state::TileState;

/// Errors surfaced by the store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The operation needs a view context that is not attached.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

#[derive(Debug)]
struct Slot {
    coord: TileCoord,
    state: TileState,
}

/// The tile lifecycle coordinator.
pub struct TileStore {
    url_template: String,
    feature_id: FeatureIdFn,
    render: Box<dyn RenderAdapter>,
    requests: mpsc::UnboundedSender<DecodeRequest>,
    slots: HashMap<TileKey, Slot>,
    cache: TileCache<Arc<DecodedTile>>,
    overrides: OverrideTables,
    view_attached: bool,
    next_load: u64,
}

impl TileStore {
    /// Create a store.
    ///
    /// # Arguments
    ///
    /// * `config` - URL template, cache capacity, feature-id function and
    ///   initial styles
    /// * `render` - Adapter that receives every render call
    /// * `requests` - Channel the decode worker reads from
    pub fn new(
        config: &StoreConfig,
        render: Box<dyn RenderAdapter>,
        requests: mpsc::UnboundedSender<DecodeRequest>,
    ) -> Self {
        Self {
            url_template: config.url_template.clone(),
            feature_id: Arc::clone(&config.feature_id),
            render,
            requests,
            slots: HashMap::new(),
            cache: TileCache::new(config.cache_capacity),
            overrides: OverrideTables::new(config.initial_styles.clone()),
            view_attached: false,
            next_load: 0,
        }
    }

    // =========================================================================
    // View context
    // =========================================================================

    /// Establish the view context. Required before [`TileStore::search`].
    pub fn attach_view(&mut self) {
        if !self.view_attached {
            info!("View attached");
            self.view_attached = true;
        }
    }

    /// Cancel every tile and drop the view context.
    pub fn detach_view(&mut self) {
        let coords: Vec<TileCoord> = self.slots.values().map(|slot| slot.coord).collect();
        for coord in coords {
            self.cancel_tile(coord);
        }
        self.view_attached = false;
        info!("View detached");
    }

    pub fn is_view_attached(&self) -> bool {
        self.view_attached
    }

    /// React to a view signal. Out-of-range coordinates are ignored.
    pub fn handle_view_event(&mut self, event: ViewEvent) {
        let Some(coord) = event.coord() else {
            debug!(?event, "Ignoring out-of-range tile coordinate");
            return;
        };
        match event {
            ViewEvent::TileEntered { .. } => self.request_tile(coord),
            ViewEvent::TileLeft { .. } => self.cancel_tile(coord),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Request a tile.
    ///
    /// A cache hit is adopted immediately and revalidated with a conditional
    /// fetch; a miss starts a fresh load. Requesting a tile that is already
    /// loading or loaded is a no-op. A failed tile gets a fresh attempt.
    pub fn request_tile(&mut self, coord: TileCoord) {
        let key = coord.key();
        if let Some(slot) = self.slots.get(&key) {
            if !matches!(
                slot.state,
                TileState::LoadingCancelled { .. } | TileState::Failed
            ) {
                debug!(tile = %coord, "Tile already active");
                return;
            }
        }

        let load = self.next_load_id();

        if let Some(snapshot) = self.cache.get(&key).cloned() {
            let mut tile = build_tile(
                self.render.as_mut(),
                self.overrides.policy(),
                &self.feature_id,
                &snapshot,
            );
            tile.render(self.render.as_mut());

            let revalidating = self
                .dispatch(load, coord, Some(snapshot.fetched_at), CancellationToken::new())
                .then_some(load);
            debug!(tile = %coord, %load, "Adopted cached tile, revalidating");

            self.slots.insert(
                key,
                Slot {
                    coord,
                    state: TileState::Loaded { tile, revalidating },
                },
            );
            return;
        }

        let cancellation = CancellationToken::new();
        let state = if self.dispatch(load, coord, None, cancellation.clone()) {
            debug!(tile = %coord, %load, "Tile loading");
            TileState::Loading { load, cancellation }
        } else {
            TileState::Failed
        };
        self.slots.insert(key, Slot { coord, state });
    }

    /// Cancel a tile.
    ///
    /// A loading tile is only marked; a loaded or failed tile is torn down
    /// synchronously.
    pub fn cancel_tile(&mut self, coord: TileCoord) {
        let key = coord.key();
        let Some(slot) = self.slots.remove(&key) else {
            return;
        };

        match slot.state {
            TileState::Loading { load, cancellation } => {
                cancellation.cancel();
                debug!(tile = %coord, %load, "Tile marked for destruction while loading");
                self.slots.insert(
                    key,
                    Slot {
                        coord,
                        state: TileState::LoadingCancelled { load },
                    },
                );
            }
            TileState::LoadingCancelled { load } => {
                self.slots.insert(
                    key,
                    Slot {
                        coord,
                        state: TileState::LoadingCancelled { load },
                    },
                );
            }
            TileState::Loaded { mut tile, .. } => {
                tile.mark_for_destruction();
                tile.remove_from_surface(self.render.as_mut());
                debug!(tile = %coord, "Tile destroyed");
            }
            TileState::Failed => {
                debug!(tile = %coord, "Failed tile destroyed");
            }
        }
    }

    /// Apply a response from the decode worker.
    ///
    /// Responses for destroyed tiles and for superseded load attempts are
    /// discarded.
    pub fn handle_response(&mut self, response: DecodeResponse) {
        let DecodeResponse {
            load,
            coord,
            outcome,
        } = response;
        let key = coord.key();

        let Some(slot) = self.slots.remove(&key) else {
            debug!(tile = %coord, %load, "Discarding response for destroyed tile");
            return;
        };

        let state = match slot.state {
            TileState::LoadingCancelled { load: pending } if pending == load => {
                debug!(tile = %coord, %load, "Cancelled load completed, discarded");
                return;
            }
            TileState::Loading { load: pending, .. } if pending == load => {
                self.complete_load(coord, load, outcome)
            }
            TileState::Loaded {
                tile,
                revalidating: Some(pending),
            } if pending == load => self.complete_revalidation(coord, tile, outcome),
            other => {
                debug!(tile = %coord, %load, "Discarding stale response");
                other
            }
        };

        self.slots.insert(key, Slot { coord, state });
    }

    fn complete_load(
        &mut self,
        coord: TileCoord,
        load: LoadId,
        outcome: DecodeOutcome,
    ) -> TileState {
        match outcome {
            DecodeOutcome::Decoded(decoded) => {
                let decoded = Arc::new(decoded);
                let tile = self.finalize(coord, &decoded);
                debug!(
                    tile = %coord,
                    %load,
                    features = tile.feature_count(),
                    "Tile loaded"
                );
                TileState::Loaded {
                    tile,
                    revalidating: None,
                }
            }
            DecodeOutcome::Cancelled => {
                warn!(tile = %coord, %load, "Load reported cancelled without a cancel");
                TileState::Failed
            }
            DecodeOutcome::NotModified => {
                warn!(tile = %coord, %load, "Unconditional load answered not-modified");
                TileState::Failed
            }
            DecodeOutcome::FetchFailed(e) => {
                warn!(tile = %coord, %load, error = %e, "Tile left empty after fetch failure");
                TileState::Failed
            }
            DecodeOutcome::WorkerFailed(e) => {
                warn!(tile = %coord, %load, error = %e, "Tile left empty after decode failure");
                TileState::Failed
            }
        }
    }

    fn complete_revalidation(
        &mut self,
        coord: TileCoord,
        mut tile: Tile,
        outcome: DecodeOutcome,
    ) -> TileState {
        match outcome {
            DecodeOutcome::Decoded(decoded) => {
                debug!(tile = %coord, "Cached tile was stale, replacing");
                tile.mark_for_destruction();
                tile.remove_from_surface(self.render.as_mut());
                let tile = self.finalize(coord, &Arc::new(decoded));
                return TileState::Loaded {
                    tile,
                    revalidating: None,
                };
            }
            DecodeOutcome::NotModified => {
                debug!(tile = %coord, "Cached tile still current");
            }
            DecodeOutcome::FetchFailed(e) => {
                warn!(tile = %coord, error = %e, "Revalidation failed, keeping cached tile");
            }
            DecodeOutcome::WorkerFailed(e) => {
                warn!(tile = %coord, error = %e, "Revalidation failed, keeping cached tile");
            }
            DecodeOutcome::Cancelled => {}
        }
        TileState::Loaded {
            tile,
            revalidating: None,
        }
    }

    /// Populate, index, cache and render a freshly decoded tile, in that
    /// order.
    fn finalize(&mut self, coord: TileCoord, decoded: &Arc<DecodedTile>) -> Tile {
        let tile = build_tile(
            self.render.as_mut(),
            self.overrides.policy(),
            &self.feature_id,
            decoded,
        );

        if let Some((evicted, _)) = self.cache.put(coord.key(), Arc::clone(decoded)) {
            debug!(tile = %coord, evicted = %evicted, "Cache full, evicted tile");
        }

        tile.render(self.render.as_mut());
        tile
    }

    fn dispatch(
        &mut self,
        load: LoadId,
        coord: TileCoord,
        if_modified_since: Option<chrono::DateTime<chrono::Utc>>,
        cancellation: CancellationToken,
    ) -> bool {
        let request = DecodeRequest {
            load,
            coord,
            url: coord.expand_url(&self.url_template),
            if_modified_since,
            cancellation,
        };
        match self.requests.send(request) {
            Ok(()) => true,
            Err(_) => {
                warn!(tile = %coord, "Decode worker is gone, load not started");
                false
            }
        }
    }

    fn next_load_id(&mut self) -> LoadId {
        self.next_load += 1;
        LoadId(self.next_load)
    }

    fn loaded_tiles(&self) -> impl Iterator<Item = &Tile> {
        self.slots.values().filter_map(|slot| slot.state.loaded_tile())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Ids of every visible feature whose box intersects the query box,
    /// across all loaded tiles, without duplicates.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidState`] when no view is attached.
    pub fn search(
        &self,
        min_x: f64,
        min_y: f64,
        max_x: f64,
        max_y: f64,
    ) -> Result<Vec<String>, StoreError> {
        if !self.view_attached {
            return Err(StoreError::InvalidState(
                "search requires an attached view".to_string(),
            ));
        }

        let ids: BTreeSet<String> = self
            .loaded_tiles()
            .flat_map(|tile| tile.search(min_x, min_y, max_x, max_y))
            .collect();
        Ok(ids.into_iter().collect())
    }

    /// First loaded feature with this id.
    pub fn feature(&self, id: &str) -> Option<&Feature> {
        self.loaded_tiles().find_map(|tile| tile.get_feature(id))
    }

    /// Every loaded copy of a feature id, one per tile it was clipped into.
    pub fn feature_copies(&self, id: &str) -> Vec<&Feature> {
        self.loaded_tiles()
            .filter_map(|tile| tile.get_feature(id))
            .collect()
    }

    /// The loaded tile at `coord`.
    pub fn tile(&self, coord: TileCoord) -> Option<&Tile> {
        self.slots
            .get(&coord.key())
            .and_then(|slot| slot.state.loaded_tile())
    }

    /// Lifecycle of `coord`, `None` once destroyed or never requested.
    pub fn lifecycle(&self, coord: TileCoord) -> Option<TileLifecycle> {
        self.slots
            .get(&coord.key())
            .map(|slot| slot.state.lifecycle())
    }

    /// True if `coord` is in the active set.
    pub fn is_active(&self, coord: TileCoord) -> bool {
        self.lifecycle(coord).is_some_and(|l| l.is_active())
    }

    /// Coordinates of the active set.
    pub fn active_tiles(&self) -> Vec<TileCoord> {
        let mut coords: Vec<TileCoord> = self
            .slots
            .values()
            .filter(|slot| slot.state.lifecycle().is_active())
            .map(|slot| slot.coord)
            .collect();
        coords.sort();
        coords
    }

    /// True while any response is still expected.
    pub fn has_pending_loads(&self) -> bool {
        self.slots.values().any(|slot| slot.state.is_pending())
    }

    /// True if decoded data for `coord` is cached. Does not promote.
    pub fn is_cached(&self, coord: TileCoord) -> bool {
        self.cache.contains(&coord.key())
    }

    pub fn stats(&self) -> StoreStats {
        let mut stats = StoreStats::default();
        for slot in self.slots.values() {
            match &slot.state {
                TileState::Loading { .. } => stats.loading += 1,
                TileState::LoadingCancelled { .. } => stats.cancelled += 1,
                TileState::Loaded { revalidating, .. } => {
                    stats.loaded += 1;
                    if revalidating.is_some() {
                        stats.revalidating += 1;
                    }
                }
                TileState::Failed => stats.failed += 1,
            }
        }
        stats
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Change the cache capacity at runtime.
    ///
    /// Eviction only forgets cached copies; active tiles stay on the surface.
    pub fn set_cache_capacity(&mut self, capacity: i64) -> Result<(), StoreError> {
        let evicted = self.cache.set_capacity(capacity)?;
        if !evicted.is_empty() {
            debug!(capacity, evicted = evicted.len(), "Cache shrunk");
        }
        Ok(())
    }

    // =========================================================================
    // Style and visibility
    // =========================================================================

    /// Hide every feature with `properties[property] == value`.
    pub fn hide_by_property(&mut self, property: &str, value: impl Into<PropertyValue>) {
        self.toggle_by_property(property, value.into(), false);
    }

    /// Show every feature with `properties[property] == value`.
    pub fn show_by_property(&mut self, property: &str, value: impl Into<PropertyValue>) {
        self.toggle_by_property(property, value.into(), true);
    }

    fn toggle_by_property(&mut self, property: &str, value: PropertyValue, on: bool) {
        let changed = self
            .overrides
            .record_property_visibility(property, &value, on);

        let render = self.render.as_mut();
        let mut flipped = 0;
        for tile in self
            .slots
            .values_mut()
            .filter_map(|slot| slot.state.loaded_tile_mut())
        {
            flipped += tile.toggle_by_property(property, &value, on, changed, render);
        }

        if changed {
            self.reapply_feature_visibility();
        }
        debug!(property, value = %value, on, changed, flipped, "Toggled by property");
    }

    /// Merge `style` into every feature with `properties[property] == value`,
    /// now and for features loaded later.
    pub fn restyle_by_property(
        &mut self,
        property: &str,
        value: impl Into<PropertyValue>,
        style: &Style,
    ) {
        let value = value.into();
        if !self.overrides.record_property_style(property, &value, style) {
            return;
        }

        let render = self.render.as_mut();
        for tile in self
            .slots
            .values_mut()
            .filter_map(|slot| slot.state.loaded_tile_mut())
        {
            tile.restyle_by_property(property, &value, style, render);
        }
        self.reapply_feature_styles();
    }

    /// Merge `style` into the feature with this id, in every tile, now and
    /// for tiles loaded later.
    pub fn set_feature_style(&mut self, id: &str, style: &Style) {
        if !self.overrides.record_feature_style(id, style) {
            return;
        }

        let render = self.render.as_mut();
        for tile in self
            .slots
            .values_mut()
            .filter_map(|slot| slot.state.loaded_tile_mut())
        {
            tile.set_feature_style(id, style, render);
        }
    }

    /// Show or hide the feature with this id. Wins over property toggles.
    pub fn set_feature_visibility(&mut self, id: &str, visible: bool) {
        if !self.overrides.record_feature_visibility(id, visible) {
            return;
        }

        let render = self.render.as_mut();
        for tile in self
            .slots
            .values_mut()
            .filter_map(|slot| slot.state.loaded_tile_mut())
        {
            tile.set_feature_visible(id, visible, render);
        }
    }

    /// Remove a feature id from every loaded tile.
    ///
    /// Returns the number of tiles it was removed from. Tiles loaded later
    /// still contain it.
    pub fn remove_feature(&mut self, id: &str) -> usize {
        let render = self.render.as_mut();
        let mut removed = 0;
        for tile in self
            .slots
            .values_mut()
            .filter_map(|slot| slot.state.loaded_tile_mut())
        {
            if tile.remove_feature(id, render).is_some() {
                removed += 1;
            }
        }
        debug!(id, removed, "Removed feature");
        removed
    }

    fn reapply_feature_visibility(&mut self) {
        let overrides: Vec<(String, bool)> = self
            .overrides
            .feature_visibility_ids()
            .map(|(id, visible)| (id.to_string(), visible))
            .collect();
        if overrides.is_empty() {
            return;
        }

        let render = self.render.as_mut();
        for tile in self
            .slots
            .values_mut()
            .filter_map(|slot| slot.state.loaded_tile_mut())
        {
            for (id, visible) in &overrides {
                tile.set_feature_visible(id, *visible, render);
            }
        }
    }

    fn reapply_feature_styles(&mut self) {
        let styles: Vec<(String, Style)> = self
            .overrides
            .feature_styles()
            .map(|(id, style)| (id.to_string(), style.clone()))
            .collect();

        let render = self.render.as_mut();
        for tile in self
            .slots
            .values_mut()
            .filter_map(|slot| slot.state.loaded_tile_mut())
        {
            for (id, style) in &styles {
                tile.set_feature_style(id, style, render);
            }
        }
    }
}

/// Build a tile from decoded data, resolving each feature's initial style
/// and visibility through `policy`, then index it and mark it loaded.
fn build_tile(
    render: &mut dyn RenderAdapter,
    policy: OverridePolicy<'_>,
    feature_id: &FeatureIdFn,
    decoded: &DecodedTile,
) -> Tile {
    let coord = decoded.coord;
    let group = render.create_group(coord);
    let mut tile = Tile::new(coord, group);

    for layer in &decoded.layers {
        for candidate in &layer.features {
            let id = feature_id(&FeatureIdContext {
                layer: &layer.name,
                coord,
                index: candidate.index,
                data: &candidate.data,
            });
            let resolved = policy.resolve(&id, &candidate.data);

            let handle = render.create(&layer.name, &candidate.data);
            if !resolved.style.is_empty() {
                render.set_style(handle, &resolved.style);
            }

            let feature = Feature::new(id, &layer.name, Arc::clone(&candidate.data), handle)
                .with_style(&resolved.style)
                .with_visible(resolved.visible);
            tile.add_feature(feature);
        }
    }

    tile.index_features();
    tile.mark_as_loaded_at(decoded.fetched_at);
    tile
}

impl std::fmt::Debug for TileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileStore")
            .field("url_template", &self.url_template)
            .field("tiles", &self.slots.len())
            .field("cache", &self.cache.len())
            .field("view_attached", &self.view_attached)
            .finish_non_exhaustive()
    }
}
