//! Per-tile spatial index.
//!
//! An R-tree over feature bounding boxes. The tree is bulk loaded once per
//! tile and then adjusted incrementally as features are hidden, shown or
//! removed. A feature keeps a copy of the exact [`IndexEntry`] it was
//! indexed with, so removal locates it by envelope in O(log n) instead of
//! scanning.

use rstar::{RTree, RTreeObject, AABB};

use crate::geometry::Bbox;

/// One indexed feature: its id and bounding box.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    id: String,
    bbox: Bbox,
}

impl IndexEntry {
    pub fn new(id: impl Into<String>, bbox: Bbox) -> Self {
        Self {
            id: id.into(),
            bbox,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn bbox(&self) -> &Bbox {
        &self.bbox
    }
}

impl RTreeObject for IndexEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [self.bbox.min_x, self.bbox.min_y],
            [self.bbox.max_x, self.bbox.max_y],
        )
    }
}

/// R-tree of [`IndexEntry`] values.
#[derive(Debug)]
pub struct SpatialIndex {
    tree: RTree<IndexEntry>,
}

impl SpatialIndex {
    pub fn new() -> Self {
        Self { tree: RTree::new() }
    }

    /// Replace the whole index with `entries` in a single O(n log n) build.
    pub fn bulk_load(&mut self, entries: Vec<IndexEntry>) {
        self.tree = RTree::bulk_load(entries);
    }

    pub fn insert(&mut self, entry: IndexEntry) {
        self.tree.insert(entry);
    }

    /// Remove `entry`, returning `true` if it was present.
    pub fn remove(&mut self, entry: &IndexEntry) -> bool {
        self.tree.remove(entry).is_some()
    }

    /// Ids of every entry whose box intersects the query box.
    pub fn search(&self, min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Vec<String> {
        let envelope = AABB::from_corners([min_x, min_y], [max_x, max_y]);

        self.tree
            .locate_in_envelope_intersecting(&envelope)
            .map(|entry| entry.id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    pub fn clear(&mut self) {
        self.tree = RTree::new();
    }
}

impl Default for SpatialIndex {
    fn default() -> Self {
        Self::new()
    }
}
