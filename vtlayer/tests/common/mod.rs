//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::io::Write;
use std::sync::Arc;

use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use prost::Message;

use vtlayer::pipeline::proto::{self, command, zigzag, GeomType, CMD_MOVE_TO};
use vtlayer::render::{RecordingRenderer, RenderLog};
use vtlayer::source::MemoryTileSource;
use vtlayer::{StoreConfig, TileCoord, TileService};

pub const URL_TEMPLATE: &str = "mem://{z}/{x}/{y}";

/// A point feature with string properties, positioned in tile-local units.
pub struct TestPoint {
    pub id: &'static str,
    pub kind: &'static str,
    pub x: i32,
    pub y: i32,
}

pub fn point(id: &'static str, kind: &'static str, x: i32, y: i32) -> TestPoint {
    TestPoint { id, kind, x, y }
}

/// Build a layer of points carrying `id` and `type` properties.
pub fn point_layer(name: &str, points: &[TestPoint]) -> proto::Layer {
    let keys = vec!["id".to_string(), "type".to_string()];
    let mut values = Vec::new();
    let mut features = Vec::new();

    for p in points {
        let id_index = values.len() as u32;
        values.push(string_value(p.id));
        let kind_index = values.len() as u32;
        values.push(string_value(p.kind));

        features.push(proto::Feature {
            id: None,
            tags: vec![0, id_index, 1, kind_index],
            r#type: Some(GeomType::Point as i32),
            geometry: vec![command(CMD_MOVE_TO, 1), zigzag(p.x), zigzag(p.y)],
        });
    }

    proto::Layer {
        version: 2,
        name: name.to_string(),
        features,
        keys,
        values,
        extent: Some(4096),
    }
}

/// A layer whose only feature uses an undefined geometry command.
pub fn broken_layer(name: &str) -> proto::Layer {
    proto::Layer {
        version: 2,
        name: name.to_string(),
        features: vec![proto::Feature {
            id: Some(1),
            tags: vec![],
            r#type: Some(GeomType::Point as i32),
            geometry: vec![command(5, 1), 0, 0],
        }],
        keys: vec![],
        values: vec![],
        extent: Some(4096),
    }
}

fn string_value(s: &str) -> proto::Value {
    proto::Value {
        string_value: Some(s.to_string()),
        ..Default::default()
    }
}

pub fn encode(layers: Vec<proto::Layer>) -> Bytes {
    Bytes::from(proto::Tile { layers }.encode_to_vec())
}

pub fn gzip(payload: &[u8]) -> Bytes {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload).unwrap();
    Bytes::from(encoder.finish().unwrap())
}

pub fn coord(x: u32, y: u32, z: u8) -> TileCoord {
    TileCoord::new(x, y, z).unwrap()
}

pub fn url(coord: TileCoord) -> String {
    coord.expand_url(URL_TEMPLATE)
}

/// A running service over an in-memory source and a recording renderer.
pub struct Fixture {
    pub service: TileService,
    pub source: MemoryTileSource,
    pub log: RenderLog,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(StoreConfig::new(URL_TEMPLATE))
    }

    pub fn with_config(config: StoreConfig) -> Self {
        let source = MemoryTileSource::new();
        let (render, log) = RecordingRenderer::new();
        let mut service = TileService::start(&config, Arc::new(source.clone()), Box::new(render));
        service.store_mut().attach_view();
        Self {
            service,
            source,
            log,
        }
    }

    /// Serve a tile made of point layers.
    pub fn serve(&self, coord: TileCoord, layers: Vec<proto::Layer>) {
        self.source.insert(url(coord), encode(layers));
    }

    /// Ids of every visible feature anywhere.
    pub fn everything(&self) -> Vec<String> {
        self.service
            .store()
            .search(-180.0, -90.0, 180.0, 90.0)
            .unwrap()
    }
}
