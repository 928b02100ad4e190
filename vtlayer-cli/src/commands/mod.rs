//! CLI command implementations.
//!
//! - [`config`] - Configuration display (path, show)
//! - [`inspect`] - Decode a single tile file
//! - [`load`] - Load and query the tiles covering a bounding box

pub mod config;
pub mod inspect;
pub mod load;
