//! A single decoded feature owned by one tile.

use std::sync::Arc;

use crate::geometry::FeatureData;
use crate::index::IndexEntry;
use crate::render::RenderHandle;
use crate::style::Style;

/// A decoded geographic entity belonging to one tile.
///
/// The payload is shared (`Arc`) with the cached snapshot of the tile it came
/// from, so rebuilding a tile from the cache never copies geometry.
#[derive(Debug, Clone)]
pub struct Feature {
    id: String,
    layer: String,
    data: Arc<FeatureData>,
    render_handle: RenderHandle,
    style: Style,
    visible: bool,
    /// Set when the owning tile builds its index, cleared on removal.
    index_entry: Option<IndexEntry>,
}

impl Feature {
    /// Create a visible, unstyled, unindexed feature.
    pub fn new(
        id: impl Into<String>,
        layer: impl Into<String>,
        data: Arc<FeatureData>,
        render_handle: RenderHandle,
    ) -> Self {
        Self {
            id: id.into(),
            layer: layer.into(),
            data,
            render_handle,
            style: Style::new(),
            visible: true,
            index_entry: None,
        }
    }

    /// Builder-style initial visibility.
    pub fn with_visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    /// Builder-style initial style, merged into the empty bag.
    pub fn with_style(mut self, style: &Style) -> Self {
        self.style.merge(style);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn layer(&self) -> &str {
        &self.layer
    }

    pub fn data(&self) -> &FeatureData {
        &self.data
    }

    pub fn shared_data(&self) -> Arc<FeatureData> {
        Arc::clone(&self.data)
    }

    pub fn render_handle(&self) -> RenderHandle {
        self.render_handle
    }

    pub fn style(&self) -> &Style {
        &self.style
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn index_entry(&self) -> Option<&IndexEntry> {
        self.index_entry.as_ref()
    }

    /// Shallow-merge into the style bag. Returns `true` if it changed.
    pub(crate) fn merge_style(&mut self, style: &Style) -> bool {
        self.style.merge(style)
    }

    pub(crate) fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub(crate) fn set_index_entry(&mut self, entry: Option<IndexEntry>) {
        self.index_entry = entry;
    }
}
