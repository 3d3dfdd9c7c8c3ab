//! Core library for generating vector tile archives from geographic sources.
//!
//! The engine turns streaming source features into an indexed, compressed,
//! deduplicated tile archive in three phases:
//!
//! 1. **Render**: each source feature is projected, clipped, and quantized
//!    into per-tile records tagged with a global 64-bit sort key
//!    ([`renderer`], [`sort_key`]).
//! 2. **Sort**: records spill to disk in sorted chunks and stream back in
//!    strict key order through a k-way merge ([`external_sort`]), grouped by
//!    tile ([`feature_group`]).
//! 3. **Write**: tile groups are encoded to the MVT wire format in parallel
//!    ([`encoder`]) while a single ordered sink deduplicates payloads and
//!    drives the archive writer ([`writer`], [`archive`]).

use std::path::PathBuf;

use thiserror::Error;

pub mod archive;
pub mod clip;
pub mod codec;
pub mod compression;
pub mod dedup;
pub mod encoder;
pub mod expression;
pub mod external_sort;
pub mod feature;
pub mod feature_group;
pub mod files_archive;
pub mod memory;
pub mod min_heap;
pub mod mvt;
pub mod pipeline;
pub mod pmtiles;
pub mod profile;
pub mod renderer;
pub mod simplify;
pub mod sort_key;
pub mod source;
pub mod stats;
pub mod stream_archive;
pub mod tile;
pub mod writer;

// Include the protobuf-generated code
pub mod vector_tile {
    include!(concat!(env!("OUT_DIR"), "/vector_tile.rs"));
}

use compression::Compression;
use tile::TileBounds;

/// Highest zoom level the 32-bit tile id packing supports.
pub const MAX_ZOOM: u8 = 15;

/// Tile extent in integer units (per the MVT spec).
pub const EXTENT: u32 = 4096;

/// Errors that can occur while generating a tile archive.
///
/// The variants map onto the process exit codes the CLI reports:
/// configuration errors are usage errors (1), input errors are recoverable
/// per-feature but fatal when a whole source is unreadable (2), archive
/// errors are output errors (3), and internal errors indicate a violated
/// invariant (4).
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to read source data: {0}")]
    Input(String),

    #[error("Geometry operation failed: {0}")]
    Geometry(String),

    #[error("Failed to write archive: {0}")]
    Archive(String),

    #[error("Spill file corrupted at offset {offset}: {reason}")]
    CorruptSpill { offset: u64, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Pipeline cancelled")]
    Cancelled,

    #[error("Internal invariant violated: {0}")]
    Internal(String),
}

impl Error {
    /// Process exit code for this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config(_) => 1,
            Error::Input(_) | Error::Geometry(_) => 2,
            Error::Archive(_) | Error::Io(_) | Error::CorruptSpill { .. } => 3,
            Error::Cancelled | Error::Internal(_) => 4,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Configuration for a tile generation run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Minimum zoom level to generate
    pub min_zoom: u8,
    /// Maximum zoom level to generate
    pub max_zoom: u8,
    /// Geographic bounds to generate tiles for (default: whole world)
    pub bounds: TileBounds,
    /// Total worker threads across render and encode stages
    pub threads: usize,
    /// Compression applied to tile payloads
    pub tile_compression: Compression,
    /// Drop repeated full-tile fills instead of storing them
    pub skip_filled_tiles: bool,
    /// Warn when an uncompressed tile exceeds this many bytes
    pub tile_warning_size_bytes: usize,
    /// Memory budget steering sort chunk sizes and queue depths
    pub max_memory_bytes: u64,
    /// Directory for sort spill files
    pub tmp_dir: PathBuf,
    /// Compute a content hash for every tile instead of only
    /// likely-duplicated ones (higher CPU, same output)
    pub hash_all_tiles: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            min_zoom: 0,
            max_zoom: 14,
            bounds: TileBounds::world(),
            threads: std::thread::available_parallelism().map_or(4, |n| n.get()),
            tile_compression: Compression::Gzip,
            skip_filled_tiles: false,
            tile_warning_size_bytes: 500 * 1024,
            max_memory_bytes: 1 << 30,
            tmp_dir: std::env::temp_dir(),
            hash_all_tiles: false,
        }
    }
}

impl Config {
    /// Set the zoom range.
    pub fn with_zoom_range(mut self, min_zoom: u8, max_zoom: u8) -> Self {
        self.min_zoom = min_zoom;
        self.max_zoom = max_zoom;
        self
    }

    /// Set the geographic bounds.
    pub fn with_bounds(mut self, bounds: TileBounds) -> Self {
        self.bounds = bounds;
        self
    }

    /// Set the worker thread count.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// Validate zoom and bounds settings.
    pub fn validate(&self) -> Result<()> {
        if self.max_zoom > MAX_ZOOM {
            return Err(Error::Config(format!(
                "max_zoom {} exceeds supported maximum {}",
                self.max_zoom, MAX_ZOOM
            )));
        }
        if self.min_zoom > self.max_zoom {
            return Err(Error::Config(format!(
                "min_zoom {} is greater than max_zoom {}",
                self.min_zoom, self.max_zoom
            )));
        }
        if !self.bounds.is_valid() {
            return Err(Error::Config("bounds are empty or inverted".to_string()));
        }
        Ok(())
    }

    /// Capacity for the tile batch queues between the batcher, encoders, and
    /// writer. Larger queues keep encoder cores busy but hold more encoded
    /// tiles in memory, so scale with the memory budget.
    pub fn queue_size(&self) -> usize {
        (5_000.0 * self.max_memory_bytes as f64 / 100e9).max(100.0) as usize
    }

    /// Byte budget for one in-memory sort chunk. One chunk fills while the
    /// previous spills, so each gets a fraction of the overall budget.
    pub fn chunk_max_bytes(&self) -> u64 {
        (self.max_memory_bytes / self.threads.max(1) as u64 / 2).max(16 << 20)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.min_zoom, 0);
        assert_eq!(config.max_zoom, 14);
        assert!(config.threads >= 1);
        assert_eq!(config.tile_warning_size_bytes, 500 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_inverted_zoom_range() {
        let config = Config::default().with_zoom_range(10, 4);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_config_rejects_oversized_max_zoom() {
        let config = Config::default().with_zoom_range(0, MAX_ZOOM + 1);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_queue_size_floor() {
        let mut config = Config::default();
        config.max_memory_bytes = 1 << 20; // tiny budget still gets 100 slots
        assert_eq!(config.queue_size(), 100);
    }

    #[test]
    fn test_exit_codes_by_kind() {
        assert_eq!(Error::Config("x".into()).exit_code(), 1);
        assert_eq!(Error::Input("x".into()).exit_code(), 2);
        assert_eq!(Error::Archive("x".into()).exit_code(), 3);
        assert_eq!(Error::Internal("x".into()).exit_code(), 4);
    }
}
