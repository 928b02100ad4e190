//! A single active tile: its features, spatial index and lifecycle flags.
//!
//! Features are stored by layer, then by id. Every feature added with
//! [`Tile::add_feature`] stays in the map whatever its visibility; the
//! spatial index only ever holds features that are visible and not removed.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::coord::TileCoord;
use crate::feature::Feature;
use crate::geometry::PropertyValue;
use crate::index::{IndexEntry, SpatialIndex};
use crate::render::{GroupHandle, RenderAdapter};
use crate::style::Style;

/// One tile's worth of decoded features.
#[derive(Debug)]
pub struct Tile {
    coord: TileCoord,
    /// layer -> id -> feature
    features: HashMap<String, HashMap<String, Feature>>,
    index: SpatialIndex,
    group: GroupHandle,
    loaded: bool,
    /// Monotonic: once set it is never cleared.
    marked_for_destruction: bool,
    /// Last successful fetch time, used for conditional revalidation.
    timestamp: Option<DateTime<Utc>>,
}

impl Tile {
    /// Create an empty tile whose features render into `group`.
    pub fn new(coord: TileCoord, group: GroupHandle) -> Self {
        Self {
            coord,
            features: HashMap::new(),
            index: SpatialIndex::new(),
            group,
            loaded: false,
            marked_for_destruction: false,
            timestamp: None,
        }
    }

    pub fn coord(&self) -> TileCoord {
        self.coord
    }

    pub fn x(&self) -> u32 {
        self.coord.x()
    }

    pub fn y(&self) -> u32 {
        self.coord.y()
    }

    pub fn z(&self) -> u8 {
        self.coord.z()
    }

    pub fn group(&self) -> GroupHandle {
        self.group
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn is_marked_for_destruction(&self) -> bool {
        self.marked_for_destruction
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    /// Insert into `features[layer][id]` without indexing or rendering.
    pub fn add_feature(&mut self, feature: Feature) -> &mut Self {
        self.features
            .entry(feature.layer().to_string())
            .or_default()
            .insert(feature.id().to_string(), feature);
        self
    }

    /// Compute every feature's bounding box and bulk load the index.
    ///
    /// Every feature with a bbox gets its index entry; only visible ones are
    /// loaded into the tree so hidden features can be inserted later.
    pub fn index_features(&mut self) -> &mut Self {
        debug!(tile = %self.coord, "indexing features");

        let mut entries = Vec::new();
        for feature in self.features.values_mut().flat_map(HashMap::values_mut) {
            let entry = feature
                .data()
                .geometry
                .bbox()
                .map(|bbox| IndexEntry::new(feature.id(), bbox));

            if feature.is_visible() {
                if let Some(entry) = &entry {
                    entries.push(entry.clone());
                }
            }
            feature.set_index_entry(entry);
        }

        self.index.bulk_load(entries);
        self
    }

    /// True if any layer holds a feature with this id.
    pub fn contains(&self, id: &str) -> bool {
        self.features.values().any(|layer| layer.contains_key(id))
    }

    /// Layer-oblivious lookup by id.
    pub fn get_feature(&self, id: &str) -> Option<&Feature> {
        self.features.values().find_map(|layer| layer.get(id))
    }

    fn get_feature_mut(&mut self, id: &str) -> Option<&mut Feature> {
        self.features.values_mut().find_map(|layer| layer.get_mut(id))
    }

    /// Remove a feature from the map, the index and the render group.
    ///
    /// Returns the removed feature, or `None` if the tile never had it.
    pub fn remove_feature(&mut self, id: &str, render: &mut dyn RenderAdapter) -> Option<Feature> {
        let layer = self
            .features
            .iter()
            .find(|(_, layer)| layer.contains_key(id))
            .map(|(name, _)| name.clone())?;

        let mut feature = self.features.get_mut(&layer)?.remove(id)?;
        if self.features.get(&layer).is_some_and(HashMap::is_empty) {
            self.features.remove(&layer);
        }

        if feature.is_visible() {
            if let Some(entry) = feature.index_entry() {
                self.index.remove(entry);
            }
        }
        feature.set_index_entry(None);
        render.detach(self.group, feature.render_handle());
        Some(feature)
    }

    /// Show or hide every feature whose `properties[property] == value`.
    ///
    /// When `state_changed` is false this is a no-op, so redundant global
    /// toggles do not re-walk the tile. Returns the number of features whose
    /// visibility actually flipped.
    pub fn toggle_by_property(
        &mut self,
        property: &str,
        value: &PropertyValue,
        on: bool,
        state_changed: bool,
        render: &mut dyn RenderAdapter,
    ) -> usize {
        if !state_changed {
            return 0;
        }

        let ids: Vec<String> = self
            .features()
            .filter(|f| f.data().matches(property, value))
            .map(|f| f.id().to_string())
            .collect();

        let mut flipped = 0;
        for id in &ids {
            if self.set_feature_visible(id, on, render) {
                flipped += 1;
            }
        }
        flipped
    }

    /// Show or hide one feature, keeping index membership in step.
    ///
    /// Returns `true` if the visibility flipped.
    pub fn set_feature_visible(
        &mut self,
        id: &str,
        on: bool,
        render: &mut dyn RenderAdapter,
    ) -> bool {
        let group = self.group;
        let Some(feature) = self.features.values_mut().find_map(|layer| layer.get_mut(id)) else {
            return false;
        };
        if feature.is_visible() == on {
            return false;
        }

        feature.set_visible(on);
        if on {
            if let Some(entry) = feature.index_entry() {
                self.index.insert(entry.clone());
            }
            render.attach(group, feature.render_handle());
        } else {
            if let Some(entry) = feature.index_entry() {
                self.index.remove(entry);
            }
            render.detach(group, feature.render_handle());
        }
        true
    }

    /// Shallow-merge `style` into every feature with `properties[property] == value`.
    ///
    /// Returns the number of features restyled.
    pub fn restyle_by_property(
        &mut self,
        property: &str,
        value: &PropertyValue,
        style: &Style,
        render: &mut dyn RenderAdapter,
    ) -> usize {
        let mut count = 0;
        for feature in self.features.values_mut().flat_map(HashMap::values_mut) {
            if feature.data().matches(property, value) {
                feature.merge_style(style);
                render.set_style(feature.render_handle(), feature.style());
                count += 1;
            }
        }
        count
    }

    /// Shallow-merge `style` into a single feature. Returns `true` if found.
    pub fn set_feature_style(
        &mut self,
        id: &str,
        style: &Style,
        render: &mut dyn RenderAdapter,
    ) -> bool {
        match self.get_feature_mut(id) {
            Some(feature) => {
                feature.merge_style(style);
                render.set_style(feature.render_handle(), feature.style());
                true
            }
            None => false,
        }
    }

    /// Ids of indexed features whose box intersects the query box.
    pub fn search(&self, min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Vec<String> {
        self.index.search(min_x, min_y, max_x, max_y)
    }

    /// Mark the tile loaded and refresh its timestamp.
    pub fn mark_as_loaded(&mut self) -> &mut Self {
        self.mark_as_loaded_at(Utc::now())
    }

    /// Mark the tile loaded with an explicit fetch time.
    pub fn mark_as_loaded_at(&mut self, timestamp: DateTime<Utc>) -> &mut Self {
        self.loaded = true;
        self.timestamp = Some(timestamp);
        self
    }

    /// Flag the tile for destruction. Cannot be undone.
    pub fn mark_for_destruction(&mut self) {
        self.marked_for_destruction = true;
    }

    /// Attach every visible feature and put the tile's group on the surface.
    pub(crate) fn render(&self, render: &mut dyn RenderAdapter) {
        for feature in self.features().filter(|f| f.is_visible()) {
            render.attach(self.group, feature.render_handle());
        }
        render.add_to_surface(self.group);
    }

    /// Take the tile's group off the surface.
    pub(crate) fn remove_from_surface(&self, render: &mut dyn RenderAdapter) {
        render.remove_from_surface(self.group);
    }

    /// Iterate over every feature in every layer.
    pub fn features(&self) -> impl Iterator<Item = &Feature> {
        self.features.values().flat_map(HashMap::values)
    }

    pub fn feature_count(&self) -> usize {
        self.features.values().map(HashMap::len).sum()
    }

    /// Number of entries currently in the spatial index.
    pub fn indexed_count(&self) -> usize {
        self.index.len()
    }

    pub fn layer_names(&self) -> impl Iterator<Item = &str> {
        self.features.keys().map(String::as_str)
    }
}
