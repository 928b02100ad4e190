//! Integration tests for the tile store running behind its decode worker.
//!
//! These tests drive the complete flow:
//! - view event → decode request → fetch → decode → tile on the surface
//! - cancellation while loading
//! - cache adoption and conditional revalidation
//! - overrides persisting across loads
//!
//! Run with: `cargo test --test store_integration`

mod common;

use chrono::{Duration, TimeZone, Utc};
use serde_json::json;

use common::*;
use vtlayer::coord::tile_bounds;
use vtlayer::{StoreConfig, Style, TileLifecycle, ViewEvent};

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_tile_loads_and_is_searchable() {
    let mut f = Fixture::new();
    let c = coord(1, 1, 2);
    f.serve(
        c,
        vec![point_layer(
            "places",
            &[point("a", "park", 1024, 1024), point("b", "road", 3072, 3072)],
        )],
    );

    f.service.handle_view_event(ViewEvent::entered(c));
    f.service.wait_idle().await;

    let store = f.service.store();
    assert_eq!(store.lifecycle(c), Some(TileLifecycle::Loaded));
    assert_eq!(f.everything(), vec!["a", "b"]);

    // Points sit in the top-left and bottom-right quarters of the tile.
    let bounds = tile_bounds(&c);
    let mid_x = (bounds.min_x + bounds.max_x) / 2.0;
    let west = store
        .search(bounds.min_x, bounds.min_y, mid_x, bounds.max_y)
        .unwrap();
    assert_eq!(west, vec!["a"]);

    f.service.shutdown().await;
}

#[tokio::test]
async fn test_cancelled_load_leaves_no_trace() {
    let mut f = Fixture::new();
    let c = coord(0, 0, 1);
    f.serve(c, vec![point_layer("places", &[point("a", "park", 10, 10)])]);

    f.service.handle_view_event(ViewEvent::entered(c));
    f.service.handle_view_event(ViewEvent::left(c));
    f.service.wait_idle().await;

    let store = f.service.store();
    assert_eq!(store.lifecycle(c), None);
    assert!(!store.is_cached(c));
    assert!(f.everything().is_empty());
    assert_eq!(f.log.surface_group_count(), 0);

    f.service.shutdown().await;
}

#[tokio::test]
async fn test_gzipped_payload_loads() {
    let mut f = Fixture::new();
    let c = coord(0, 0, 0);
    let raw = encode(vec![point_layer("places", &[point("g", "park", 100, 100)])]);
    f.source.insert(url(c), gzip(&raw));

    f.service.handle_view_event(ViewEvent::entered(c));
    f.service.wait_idle().await;

    assert_eq!(f.everything(), vec!["g"]);
    f.service.shutdown().await;
}

#[tokio::test]
async fn test_decode_error_keeps_other_layers() {
    let mut f = Fixture::new();
    let c = coord(0, 0, 0);
    f.serve(
        c,
        vec![
            broken_layer("broken"),
            point_layer("places", &[point("ok", "park", 100, 100)]),
        ],
    );

    f.service.handle_view_event(ViewEvent::entered(c));
    f.service.wait_idle().await;

    assert_eq!(
        f.service.store().lifecycle(c),
        Some(TileLifecycle::Loaded)
    );
    assert_eq!(f.everything(), vec!["ok"]);
    f.service.shutdown().await;
}

#[tokio::test]
async fn test_fetch_failure_then_recovery() {
    let mut f = Fixture::new();
    let c = coord(0, 0, 1);
    f.serve(c, vec![point_layer("places", &[point("a", "park", 10, 10)])]);
    f.source.fail(url(c));

    f.service.handle_view_event(ViewEvent::entered(c));
    f.service.wait_idle().await;
    assert_eq!(f.service.store().lifecycle(c), Some(TileLifecycle::Failed));
    assert!(f.everything().is_empty());

    f.source.recover(&url(c));
    f.service.handle_view_event(ViewEvent::left(c));
    f.service.handle_view_event(ViewEvent::entered(c));
    f.service.wait_idle().await;

    assert_eq!(f.service.store().lifecycle(c), Some(TileLifecycle::Loaded));
    assert_eq!(f.everything(), vec!["a"]);
    f.service.shutdown().await;
}

#[tokio::test]
async fn test_failed_tile_retries_on_next_request() {
    let mut f = Fixture::new();
    let c = coord(1, 1, 1);
    f.serve(c, vec![point_layer("places", &[point("a", "park", 10, 10)])]);
    f.source.fail(url(c));

    f.service.handle_view_event(ViewEvent::entered(c));
    f.service.wait_idle().await;
    assert_eq!(f.service.store().lifecycle(c), Some(TileLifecycle::Failed));

    // No leave in between: the failed tile is still active.
    f.source.recover(&url(c));
    f.service.handle_view_event(ViewEvent::entered(c));
    f.service.wait_idle().await;

    assert_eq!(f.service.store().lifecycle(c), Some(TileLifecycle::Loaded));
    assert_eq!(f.everything(), vec!["a"]);
    f.service.shutdown().await;
}

#[tokio::test]
async fn test_single_permit_still_loads_everything() {
    let mut f = Fixture::with_config(StoreConfig::new(URL_TEMPLATE).with_max_in_flight(1));
    for (x, id) in ["t0", "t1", "t2", "t3"].into_iter().enumerate() {
        let c = coord(x as u32, 0, 2);
        f.serve(c, vec![point_layer("places", &[point(id, "park", 10, 10)])]);
        f.service.handle_view_event(ViewEvent::entered(c));
    }
    f.service.wait_idle().await;

    assert_eq!(f.everything(), vec!["t0", "t1", "t2", "t3"]);
    assert_eq!(f.service.store().stats().loaded, 4);
    f.service.shutdown().await;
}

// ============================================================================
// Cache
// ============================================================================

#[tokio::test]
async fn test_cache_hit_revalidates_conditionally() {
    let mut f = Fixture::new();
    let c = coord(0, 0, 1);
    let modified = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    f.source.insert_at(
        url(c),
        encode(vec![point_layer("places", &[point("a", "park", 10, 10)])]),
        modified,
    );

    f.service.handle_view_event(ViewEvent::entered(c));
    f.service.wait_idle().await;
    f.service.handle_view_event(ViewEvent::left(c));

    // Adopted from the cache before any response arrives.
    f.service.handle_view_event(ViewEvent::entered(c));
    assert_eq!(f.service.store().lifecycle(c), Some(TileLifecycle::Loaded));
    assert_eq!(f.everything(), vec!["a"]);

    f.service.wait_idle().await;
    let requests = f.source.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1], (url(c), Some(modified)));
    assert_eq!(f.everything(), vec!["a"]);

    f.service.shutdown().await;
}

#[tokio::test]
async fn test_stale_cache_entry_is_replaced() {
    let mut f = Fixture::new();
    let c = coord(0, 0, 1);
    let first = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    f.source.insert_at(
        url(c),
        encode(vec![point_layer("places", &[point("old", "park", 10, 10)])]),
        first,
    );

    f.service.handle_view_event(ViewEvent::entered(c));
    f.service.wait_idle().await;
    f.service.handle_view_event(ViewEvent::left(c));

    f.source.insert_at(
        url(c),
        encode(vec![point_layer("places", &[point("new", "park", 10, 10)])]),
        first + Duration::hours(1),
    );
    f.service.handle_view_event(ViewEvent::entered(c));
    f.service.wait_idle().await;

    assert_eq!(f.everything(), vec!["new"]);
    assert_eq!(f.log.surface_group_count(), 1);
    f.service.shutdown().await;
}

#[tokio::test]
async fn test_eviction_does_not_retract_active_tiles() {
    let mut f = Fixture::with_config(StoreConfig::new(URL_TEMPLATE).with_cache_capacity(1));
    let (a, b) = (coord(0, 0, 1), coord(1, 0, 1));
    f.serve(a, vec![point_layer("places", &[point("a", "park", 10, 10)])]);
    f.serve(b, vec![point_layer("places", &[point("b", "park", 10, 10)])]);

    f.service.handle_view_event(ViewEvent::entered(a));
    f.service.wait_idle().await;
    f.service.handle_view_event(ViewEvent::entered(b));
    f.service.wait_idle().await;

    let store = f.service.store();
    assert!(!store.is_cached(a));
    assert!(store.is_cached(b));
    assert_eq!(store.lifecycle(a), Some(TileLifecycle::Loaded));
    assert_eq!(f.everything(), vec!["a", "b"]);

    f.service.shutdown().await;
}

// ============================================================================
// Overrides
// ============================================================================

#[tokio::test]
async fn test_toggle_is_idempotent_across_tiles() {
    let mut f = Fixture::new();
    let (a, b) = (coord(0, 0, 1), coord(1, 0, 1));
    f.serve(
        a,
        vec![point_layer("places", &[point("p1", "park", 10, 10), point("r1", "road", 20, 20)])],
    );
    f.serve(b, vec![point_layer("places", &[point("p2", "park", 10, 10)])]);
    f.service.handle_view_event(ViewEvent::entered(a));
    f.service.handle_view_event(ViewEvent::entered(b));
    f.service.wait_idle().await;

    let store = f.service.store_mut();
    store.hide_by_property("type", "park");
    store.hide_by_property("type", "park");
    assert_eq!(f.everything(), vec!["r1"]);

    let store = f.service.store_mut();
    store.show_by_property("type", "park");
    store.show_by_property("type", "park");
    assert_eq!(f.everything(), vec!["p1", "p2", "r1"]);

    f.service.shutdown().await;
}

#[tokio::test]
async fn test_overrides_apply_to_tiles_loaded_later() {
    let mut f = Fixture::new();
    let (a, b) = (coord(0, 0, 1), coord(1, 0, 1));
    f.serve(a, vec![point_layer("places", &[point("p1", "park", 10, 10)])]);
    f.serve(
        b,
        vec![point_layer("places", &[point("p2", "park", 10, 10), point("r2", "road", 20, 20)])],
    );

    f.service.handle_view_event(ViewEvent::entered(a));
    f.service.wait_idle().await;

    let store = f.service.store_mut();
    store.hide_by_property("type", "road");
    store.restyle_by_property("type", "park", &Style::new().with("color", "green"));
    store.set_feature_style("p2", &Style::new().with("weight", 3));

    f.service.handle_view_event(ViewEvent::entered(b));
    f.service.wait_idle().await;

    let store = f.service.store();
    assert_eq!(f.everything(), vec!["p1", "p2"]);
    let p2 = store.feature("p2").unwrap();
    assert_eq!(p2.style().get("color"), Some(&json!("green")));
    assert_eq!(p2.style().get("weight"), Some(&json!(3)));
    assert_eq!(f.log.style_of(p2.render_handle()), Some(p2.style().clone()));

    f.service.shutdown().await;
}

#[tokio::test]
async fn test_removed_feature_is_gone_from_search() {
    let mut f = Fixture::new();
    let c = coord(0, 0, 0);
    f.serve(
        c,
        vec![point_layer("places", &[point("a", "park", 10, 10), point("b", "park", 20, 20)])],
    );
    f.service.handle_view_event(ViewEvent::entered(c));
    f.service.wait_idle().await;

    let handle = f.service.store().feature("a").unwrap().render_handle();
    assert_eq!(f.service.store_mut().remove_feature("a"), 1);

    assert_eq!(f.everything(), vec!["b"]);
    assert!(!f.log.is_visible(handle));
    f.service.shutdown().await;
}
