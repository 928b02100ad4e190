//! Load the tiles covering a bounding box and query them.

use clap::Args;
use serde_json::json;
use tokio::runtime::Runtime;
use tracing::info;
use vtlayer::coord::{count_tiles_covering, tiles_covering};
use vtlayer::geometry::Bbox;
use vtlayer::render::TracingRenderer;
use vtlayer::{PropertyValue, StoreConfig, TileService, ViewEvent};

use crate::error::CliError;
use crate::runner::CliRunner;

/// Most tiles a single `load` run will request.
const MAX_TILES: u64 = 4096;

/// Arguments for `vtlayer load`.
#[derive(Debug, Args)]
pub struct LoadArgs {
    /// Bounding box as min_lon,min_lat,max_lon,max_lat
    #[arg(long, allow_hyphen_values = true)]
    pub bbox: String,

    /// Zoom level to load
    #[arg(long)]
    pub zoom: u8,

    /// Tile URL template (overrides the config file)
    #[arg(long)]
    pub url: Option<String>,

    /// Search box, defaults to the load box
    #[arg(long, allow_hyphen_values = true)]
    pub query: Option<String>,

    /// Hide features with property=value before searching (repeatable)
    #[arg(long, value_name = "PROPERTY=VALUE")]
    pub hide: Vec<String>,
}

/// Run the load command.
pub fn run(args: LoadArgs, verbose: bool) -> Result<(), CliError> {
    let runner = CliRunner::new(verbose)?;
    runner.log_startup("load");

    let bbox = parse_bbox(&args.bbox)?;
    let query = match &args.query {
        Some(q) => parse_bbox(q)?,
        None => bbox,
    };
    let hidden = args
        .hide
        .iter()
        .map(|h| parse_filter(h))
        .collect::<Result<Vec<_>, _>>()?;

    let mut config = StoreConfig::from(runner.config().clone());
    if let Some(url) = args.url {
        config.url_template = url;
    }

    check_tile_count(&bbox, args.zoom)?;
    let tiles = tiles_covering(&bbox, args.zoom)?;
    info!(tiles = tiles.len(), zoom = args.zoom, "Loading tiles");

    let runtime = Runtime::new().map_err(CliError::Runtime)?;
    runtime.block_on(async {
        let mut service = TileService::start_http(&config, Box::new(TracingRenderer::new()))
            .map_err(CliError::ServiceCreation)?;
        service.store_mut().attach_view();

        for coord in &tiles {
            service.handle_view_event(ViewEvent::entered(*coord));
        }
        service.wait_idle().await;

        for (property, value) in hidden {
            service.store_mut().hide_by_property(&property, value);
        }

        let store = service.store();
        let ids = store.search(query.min_x, query.min_y, query.max_x, query.max_y)?;

        let per_tile: Vec<_> = tiles
            .iter()
            .map(|coord| {
                json!({
                    "tile": coord.to_string(),
                    "state": store.lifecycle(*coord).map(|l| format!("{:?}", l)),
                    "features": store.tile(*coord).map(|t| t.feature_count()),
                })
            })
            .collect();
        let summary = json!({
            "tiles": per_tile,
            "matches": ids,
            "stats": {
                "loaded": store.stats().loaded,
                "failed": store.stats().failed,
            },
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).unwrap_or_default()
        );

        service.shutdown().await;
        Ok::<(), CliError>(())
    })
}

/// Parse `min_lon,min_lat,max_lon,max_lat`.
fn parse_bbox(s: &str) -> Result<Bbox, CliError> {
    let parts = s
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CliError::InvalidArgument(format!("bbox '{}': {}", s, e)))?;

    match parts.as_slice() {
        [min_x, min_y, max_x, max_y] if min_x <= max_x && min_y <= max_y => {
            Ok(Bbox::new(*min_x, *min_y, *max_x, *max_y))
        }
        _ => Err(CliError::InvalidArgument(format!(
            "bbox '{}' must be min_lon,min_lat,max_lon,max_lat",
            s
        ))),
    }
}

/// Reject boxes that cover more than [`MAX_TILES`] tiles at `zoom`.
fn check_tile_count(bbox: &Bbox, zoom: u8) -> Result<u64, CliError> {
    let count = count_tiles_covering(bbox, zoom)?;
    if count > MAX_TILES {
        return Err(CliError::InvalidArgument(format!(
            "bbox covers {} tiles at zoom {}, limit is {}; use a smaller box or zoom",
            count, zoom, MAX_TILES
        )));
    }
    Ok(count)
}

/// Parse `property=value`. Values that read as a bool or number match those
/// property types.
fn parse_filter(s: &str) -> Result<(String, PropertyValue), CliError> {
    let (property, value) = s.split_once('=').ok_or_else(|| {
        CliError::InvalidArgument(format!("filter '{}' must be property=value", s))
    })?;

    let value = if let Ok(b) = value.parse::<bool>() {
        PropertyValue::Bool(b)
    } else if let Ok(n) = value.parse::<f64>() {
        PropertyValue::Number(n)
    } else {
        PropertyValue::String(value.to_string())
    };
    Ok((property.to_string(), value))
}
