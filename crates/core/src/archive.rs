//! The archive writer contract and output URI parsing.
//!
//! Concrete formats implement [`TileArchive`]: the single-file indexed
//! archive ([`crate::pmtiles`]), the per-file directory tree
//! ([`crate::files_archive`]), and newline-delimited streams
//! ([`crate::stream_archive`]). Writers are driven from exactly one thread
//! and receive tiles strictly in their declared [`TileOrder`].
//!
//! Outputs are addressed by a URI-like string:
//! `[scheme:]path[?key=value(&key=value)*]`, e.g.
//! `out.pmtiles`, `file:tiles/?format=files`, or `dump.csv?format=csv`.
//! The format comes from the `format` query option or the path extension.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::compression::Compression;
use crate::profile::Profile;
use crate::tile::{TileBounds, TileCoord, TileOrder};
use crate::{Config, Error, Result};

/// One encoded tile on its way to the archive.
///
/// `data` is `None` for a pointer record: the payload was already stored
/// under an earlier tile with the same `content_hash`.
#[derive(Debug, Clone)]
pub struct TileEncodingResult {
    pub coord: TileCoord,
    pub data: Option<Vec<u8>>,
    pub content_hash: Option<u64>,
    /// Uncompressed payload size, for stats
    pub uncompressed_len: u32,
}

/// Metadata recorded in the archive, combined from the profile and run
/// configuration.
#[derive(Debug, Clone)]
pub struct ArchiveMetadata {
    pub name: String,
    pub description: String,
    pub attribution: String,
    pub version: String,
    pub is_overlay: bool,
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub bounds: TileBounds,
    pub tile_compression: Compression,
    /// `layer name → (field name → MVT type)` for vector_layers metadata
    pub layers: Vec<(String, HashMap<String, String>)>,
}

impl ArchiveMetadata {
    pub fn new(profile: &dyn Profile, config: &Config) -> Self {
        Self {
            name: profile.name().to_string(),
            description: profile.description().to_string(),
            attribution: profile.attribution().to_string(),
            version: profile.version().to_string(),
            is_overlay: profile.is_overlay(),
            min_zoom: config.min_zoom,
            max_zoom: config.max_zoom,
            bounds: config.bounds,
            tile_compression: config.tile_compression,
            layers: Vec::new(),
        }
    }
}

/// Write API for an on-disk tileset representation.
///
/// Implementations are not required to be thread-safe; the pipeline
/// guarantees a single writer thread, tiles arriving strictly in
/// `tile_order`.
pub trait TileArchive: Send {
    /// Preferred insertion order for this archive.
    fn tile_order(&self) -> TileOrder;

    /// Whether the archive stores one payload per distinct content hash.
    fn deduplicates(&self) -> bool {
        false
    }

    /// Called once before any tile is written.
    fn initialize(&mut self, metadata: &ArchiveMetadata) -> Result<()>;

    fn write_tile(&mut self, tile: &TileEncodingResult) -> Result<()>;

    /// Called after the last tile; the archive must be complete on disk when
    /// this returns.
    fn finish(&mut self, metadata: &ArchiveMetadata) -> Result<()>;
}

/// Output format, inferred from the URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// Single-file indexed archive
    Pmtiles,
    /// `{z}/{x}/{y}.pbf` files under a directory
    Files,
    /// Newline-delimited JSON records
    Json,
    /// CSV records
    Csv,
}

impl ArchiveFormat {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "pmtiles" => Some(ArchiveFormat::Pmtiles),
            "files" => Some(ArchiveFormat::Files),
            "json" | "ndjson" => Some(ArchiveFormat::Json),
            "csv" => Some(ArchiveFormat::Csv),
            _ => None,
        }
    }
}

/// A parsed output definition.
#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    pub format: ArchiveFormat,
    pub path: PathBuf,
    pub options: HashMap<String, String>,
}

impl ArchiveConfig {
    /// Parse `[scheme:]path[?key=value(&key=value)*]`.
    pub fn from_uri(uri: &str) -> Result<Self> {
        let without_scheme = match uri.split_once(':') {
            Some(("file", rest)) => rest.trim_start_matches("//"),
            Some((scheme, _)) if scheme.len() > 1 => {
                return Err(Error::Config(format!("unsupported scheme {:?}", scheme)));
            }
            // single letters are Windows drive prefixes, not schemes
            _ => uri,
        };

        let (path_part, query) = match without_scheme.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (without_scheme, None),
        };
        if path_part.is_empty() {
            return Err(Error::Config("empty output path".to_string()));
        }

        let mut options = HashMap::new();
        if let Some(query) = query {
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                match pair.split_once('=') {
                    Some((k, v)) => options.insert(k.to_string(), v.to_string()),
                    // bare key means boolean true
                    None => options.insert(pair.to_string(), "true".to_string()),
                };
            }
        }

        let format = if let Some(name) = options.get("format") {
            ArchiveFormat::from_name(name)
                .ok_or_else(|| Error::Config(format!("unsupported format {:?}", name)))?
        } else {
            let extension = std::path::Path::new(path_part)
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("");
            match ArchiveFormat::from_name(extension) {
                Some(f) => f,
                None if extension.is_empty() => ArchiveFormat::Files,
                None => {
                    return Err(Error::Config(format!(
                        "cannot infer archive format from {:?}; pass ?format=",
                        path_part
                    )))
                }
            }
        };

        Ok(Self {
            format,
            path: PathBuf::from(path_part),
            options,
        })
    }

    /// Boolean query option, defaulting to false.
    pub fn flag(&self, name: &str) -> bool {
        self.options.get(name).is_some_and(|v| v == "true" || v == "1")
    }

    /// Construct the writer for this output.
    pub fn open(&self, config: &Config) -> Result<Box<dyn TileArchive>> {
        match self.format {
            ArchiveFormat::Pmtiles => Ok(Box::new(crate::pmtiles::PmtilesArchive::new(
                self.path.clone(),
                config.tile_compression,
            ))),
            ArchiveFormat::Files => Ok(Box::new(crate::files_archive::FilesArchive::new(
                self.path.clone(),
            ))),
            ArchiveFormat::Json => Ok(Box::new(crate::stream_archive::StreamArchive::json(
                self.path.clone(),
            ))),
            ArchiveFormat::Csv => Ok(Box::new(crate::stream_archive::StreamArchive::csv(
                self.path.clone(),
            ))),
        }
    }
}
