//! In-memory render adapter that records calls and models the surface.
//!
//! The adapter hands a cloneable [`RenderLog`] back to the caller so the
//! surface state can be inspected after the adapter itself has been moved
//! into a store.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{GroupHandle, RenderAdapter, RenderHandle};
use crate::coord::TileCoord;
use crate::geometry::FeatureData;
use crate::style::Style;

/// A single recorded adapter call.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderCall {
    Create { handle: RenderHandle, layer: String },
    CreateGroup { group: GroupHandle, coord: TileCoord },
    Attach { group: GroupHandle, handle: RenderHandle },
    Detach { group: GroupHandle, handle: RenderHandle },
    SetStyle { handle: RenderHandle, style: Style },
    AddToSurface { group: GroupHandle },
    RemoveFromSurface { group: GroupHandle },
}

#[derive(Debug, Default)]
struct SurfaceState {
    calls: Vec<RenderCall>,
    next: u64,
    on_surface: HashSet<GroupHandle>,
    members: HashMap<GroupHandle, HashSet<RenderHandle>>,
    styles: HashMap<RenderHandle, Style>,
}

/// Shared view of what a [`RecordingRenderer`] has been told.
#[derive(Debug, Clone, Default)]
pub struct RenderLog {
    state: Arc<Mutex<SurfaceState>>,
}

impl RenderLog {
    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<RenderCall> {
        self.state.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// True if the group is currently on the surface.
    pub fn is_on_surface(&self, group: GroupHandle) -> bool {
        self.state.lock().on_surface.contains(&group)
    }

    /// True if the feature is attached to a group that is on the surface.
    pub fn is_visible(&self, handle: RenderHandle) -> bool {
        let state = self.state.lock();
        state
            .members
            .iter()
            .any(|(group, handles)| state.on_surface.contains(group) && handles.contains(&handle))
    }

    /// Number of groups currently on the surface.
    pub fn surface_group_count(&self) -> usize {
        self.state.lock().on_surface.len()
    }

    /// Last style applied to a handle.
    pub fn style_of(&self, handle: RenderHandle) -> Option<Style> {
        self.state.lock().styles.get(&handle).cloned()
    }
}

/// Render adapter backed by a [`RenderLog`].
#[derive(Debug, Default)]
pub struct RecordingRenderer {
    log: RenderLog,
}

impl RecordingRenderer {
    pub fn new() -> (Self, RenderLog) {
        let log = RenderLog::default();
        (Self { log: log.clone() }, log)
    }
}

impl RenderAdapter for RecordingRenderer {
    fn create(&mut self, layer: &str, _data: &FeatureData) -> RenderHandle {
        let mut state = self.log.state.lock();
        let handle = RenderHandle(state.next);
        state.next += 1;
        state.calls.push(RenderCall::Create {
            handle,
            layer: layer.to_string(),
        });
        handle
    }

    fn create_group(&mut self, coord: TileCoord) -> GroupHandle {
        let mut state = self.log.state.lock();
        let group = GroupHandle(state.next);
        state.next += 1;
        state.calls.push(RenderCall::CreateGroup { group, coord });
        group
    }

    fn attach(&mut self, group: GroupHandle, handle: RenderHandle) {
        let mut state = self.log.state.lock();
        state.members.entry(group).or_default().insert(handle);
        state.calls.push(RenderCall::Attach { group, handle });
    }

    fn detach(&mut self, group: GroupHandle, handle: RenderHandle) {
        let mut state = self.log.state.lock();
        if let Some(handles) = state.members.get_mut(&group) {
            handles.remove(&handle);
        }
        state.calls.push(RenderCall::Detach { group, handle });
    }

    fn set_style(&mut self, handle: RenderHandle, style: &Style) {
        let mut state = self.log.state.lock();
        state.styles.insert(handle, style.clone());
        state.calls.push(RenderCall::SetStyle {
            handle,
            style: style.clone(),
        });
    }

    fn add_to_surface(&mut self, group: GroupHandle) {
        let mut state = self.log.state.lock();
        state.on_surface.insert(group);
        state.calls.push(RenderCall::AddToSurface { group });
    }

    fn remove_from_surface(&mut self, group: GroupHandle) {
        let mut state = self.log.state.lock();
        state.on_surface.remove(&group);
        state.calls.push(RenderCall::RemoveFromSurface { group });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Geometry, Properties};

    #[test]
    fn test_surface_visibility_model() {
        let (mut renderer, log) = RecordingRenderer::new();
        let data = FeatureData::new(Geometry::Point([0.0, 0.0]), Properties::new());
        let group = renderer.create_group(TileCoord::new(0, 0, 0).unwrap());
        let handle = renderer.create("points", &data);

        renderer.attach(group, handle);
        assert!(!log.is_visible(handle), "group not on surface yet");

        renderer.add_to_surface(group);
        assert!(log.is_visible(handle));

        renderer.detach(group, handle);
        assert!(!log.is_visible(handle));

        renderer.attach(group, handle);
        renderer.remove_from_surface(group);
        assert!(!log.is_visible(handle));
        assert_eq!(log.surface_group_count(), 0);
    }

    #[test]
    fn test_records_styles() {
        let (mut renderer, log) = RecordingRenderer::new();
        let handle = RenderHandle(7);
        renderer.set_style(handle, &Style::new().with("color", "red"));

        assert_eq!(
            log.style_of(handle).unwrap().get("color"),
            Some(&serde_json::json!("red"))
        );
        assert_eq!(log.call_count(), 1);
    }
}
