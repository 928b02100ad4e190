//! Render adapter boundary.
//!
//! The core never draws anything. It hands opaque handles to a
//! [`RenderAdapter`] and tells it when features join or leave a tile's
//! aggregate group, when styles change, and when a group enters or leaves
//! the surface. Calls are fire-and-forget; nothing is read back.

mod recording;

pub use recording::{RecordingRenderer, RenderCall, RenderLog};

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::trace;

use crate::coord::TileCoord;
use crate::geometry::FeatureData;
use crate::style::Style;

/// Opaque handle to one feature's rendered representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderHandle(pub u64);

/// Opaque handle to a tile's aggregate render group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupHandle(pub u64);

/// Rendering collaborator consumed by the tile store.
///
/// Implementations must be `Send` so the store can live on whichever task
/// acts as the coordination context.
pub trait RenderAdapter: Send {
    /// Create the rendered representation of a decoded feature.
    fn create(&mut self, layer: &str, data: &FeatureData) -> RenderHandle;

    /// Create the aggregate group for a tile.
    fn create_group(&mut self, coord: TileCoord) -> GroupHandle;

    /// Show a feature by adding it to its tile's group.
    fn attach(&mut self, group: GroupHandle, handle: RenderHandle);

    /// Hide or drop a feature by removing it from its tile's group.
    fn detach(&mut self, group: GroupHandle, handle: RenderHandle);

    /// Apply the feature's full effective style.
    fn set_style(&mut self, handle: RenderHandle, style: &Style);

    /// Put a tile's group on the surface.
    fn add_to_surface(&mut self, group: GroupHandle);

    /// Take a tile's group off the surface.
    fn remove_from_surface(&mut self, group: GroupHandle);
}

/// Adapter that only allocates handles and traces every call.
///
/// Used by the CLI and as the default when no surface is attached.
#[derive(Debug, Default)]
pub struct TracingRenderer {
    next: AtomicU64,
}

impl TracingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl RenderAdapter for TracingRenderer {
    fn create(&mut self, layer: &str, data: &FeatureData) -> RenderHandle {
        let handle = RenderHandle(self.allocate());
        trace!(
            handle = handle.0,
            layer = layer,
            geometry = data.geometry.type_name(),
            "render create"
        );
        handle
    }

    fn create_group(&mut self, coord: TileCoord) -> GroupHandle {
        let group = GroupHandle(self.allocate());
        trace!(group = group.0, tile = %coord, "render create_group");
        group
    }

    fn attach(&mut self, group: GroupHandle, handle: RenderHandle) {
        trace!(group = group.0, handle = handle.0, "render attach");
    }

    fn detach(&mut self, group: GroupHandle, handle: RenderHandle) {
        trace!(group = group.0, handle = handle.0, "render detach");
    }

    fn set_style(&mut self, handle: RenderHandle, style: &Style) {
        trace!(handle = handle.0, keys = style.len(), "render set_style");
    }

    fn add_to_surface(&mut self, group: GroupHandle) {
        trace!(group = group.0, "render add_to_surface");
    }

    fn remove_from_surface(&mut self, group: GroupHandle) {
        trace!(group = group.0, "render remove_from_surface");
    }
}
