//! Decode a single tile file.

use std::path::PathBuf;

use chrono::Utc;
use clap::Args;
use tokio_util::sync::CancellationToken;
use vtlayer::pipeline::decode_tile;
use vtlayer::TileCoord;

use crate::error::CliError;

/// Arguments for `vtlayer inspect`.
#[derive(Debug, Args)]
pub struct InspectArgs {
    /// Tile file (raw or gzip-compressed protobuf)
    pub file: PathBuf,

    /// Zoom level of the tile
    #[arg(long, default_value = "0")]
    pub z: u8,

    /// Tile column
    #[arg(long, default_value = "0")]
    pub x: u32,

    /// Tile row
    #[arg(long, default_value = "0")]
    pub y: u32,

    /// Print every feature's properties as JSON
    #[arg(long)]
    pub features: bool,
}

/// Run the inspect command.
pub fn run(args: InspectArgs) -> Result<(), CliError> {
    let coord = TileCoord::new(args.x, args.y, args.z)?;
    let payload = std::fs::read(&args.file).map_err(|e| CliError::FileRead {
        path: args.file.display().to_string(),
        error: e,
    })?;

    // A fresh token never fires, so decoding always yields a tile.
    let Some(tile) = decode_tile(&payload, coord, Utc::now(), &CancellationToken::new()) else {
        return Ok(());
    };

    println!("Tile {} ({} bytes)", coord, payload.len());
    for layer in &tile.layers {
        println!(
            "  {:<24} {:>6} features  extent {}",
            layer.name,
            layer.features.len(),
            layer.extent
        );
        if args.features {
            for feature in &layer.features {
                let properties =
                    serde_json::to_string(&feature.data.properties).unwrap_or_default();
                println!(
                    "    [{}] {} {}",
                    feature.index,
                    feature.data.geometry.type_name(),
                    properties
                );
            }
        }
    }

    if tile.report.is_clean() {
        println!("No decode problems");
    } else {
        println!(
            "{} features skipped, {} layers abandoned:",
            tile.report.skipped_count(),
            tile.report.fatal_count()
        );
        for diagnostic in &tile.report.diagnostics {
            println!("  {}", diagnostic);
        }
    }

    Ok(())
}
