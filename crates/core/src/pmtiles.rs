//! Single-file indexed archive writer (PMTiles v3 layout).
//!
//! Spec: <https://github.com/protomaps/PMTiles/blob/main/spec/v3/spec.md>
//!
//! Layout: a 127-byte header, a compressed root directory, compressed JSON
//! metadata, optional compressed leaf directories, then the tile data
//! section. Directory entries are columnar and varint-encoded with
//! delta-coded tile ids; consecutive identical tiles collapse into one
//! entry via `run_length`. Tiles arrive in Hilbert order, so the archive is
//! written clustered.
//!
//! Tile payloads stream to a temp file as they arrive; only directory
//! entries stay in memory. The final file is assembled under a `.tmp` name
//! on `finish` and renamed into place, so a crashed run never leaves a
//! half-written archive behind.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use crate::archive::{ArchiveMetadata, TileArchive, TileEncodingResult};
use crate::codec::{decode_varint, write_varint};
use crate::compression::{self, Compression};
use crate::tile::{TileBounds, TileOrder};
use crate::{Error, Result};

const MAGIC: &[u8; 7] = b"PMTiles";
const SPEC_VERSION: u8 = 3;
const HEADER_LEN: usize = 127;

/// Entries per leaf directory; the root holds one entry per leaf once the
/// tileset outgrows a root-only directory.
const LEAF_DIR_ENTRIES: usize = 4096;

/// Tile type byte in the header.
const TILE_TYPE_MVT: u8 = 1;

/// The 127-byte archive header.
#[derive(Debug, Clone, Default)]
struct Header {
    root_dir_offset: u64,
    root_dir_length: u64,
    json_metadata_offset: u64,
    json_metadata_length: u64,
    leaf_dirs_offset: u64,
    leaf_dirs_length: u64,
    tile_data_offset: u64,
    tile_data_length: u64,
    addressed_tiles_count: u64,
    tile_entries_count: u64,
    tile_contents_count: u64,
    clustered: bool,
    internal_compression: Compression,
    tile_compression: Compression,
    min_zoom: u8,
    max_zoom: u8,
    bounds: TileBounds,
    center_zoom: u8,
    center_lon: f64,
    center_lat: f64,
}

impl Header {
    /// Serialize to exactly 127 bytes. Positions are E7 fixed-point i32 LE.
    fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..7].copy_from_slice(MAGIC);
        buf[7] = SPEC_VERSION;

        buf[8..16].copy_from_slice(&self.root_dir_offset.to_le_bytes());
        buf[16..24].copy_from_slice(&self.root_dir_length.to_le_bytes());
        buf[24..32].copy_from_slice(&self.json_metadata_offset.to_le_bytes());
        buf[32..40].copy_from_slice(&self.json_metadata_length.to_le_bytes());
        buf[40..48].copy_from_slice(&self.leaf_dirs_offset.to_le_bytes());
        buf[48..56].copy_from_slice(&self.leaf_dirs_length.to_le_bytes());
        buf[56..64].copy_from_slice(&self.tile_data_offset.to_le_bytes());
        buf[64..72].copy_from_slice(&self.tile_data_length.to_le_bytes());
        buf[72..80].copy_from_slice(&self.addressed_tiles_count.to_le_bytes());
        buf[80..88].copy_from_slice(&self.tile_entries_count.to_le_bytes());
        buf[88..96].copy_from_slice(&self.tile_contents_count.to_le_bytes());

        buf[96] = u8::from(self.clustered);
        buf[97] = self.internal_compression.code();
        buf[98] = self.tile_compression.code();
        buf[99] = TILE_TYPE_MVT;
        buf[100] = self.min_zoom;
        buf[101] = self.max_zoom;

        let e7 = |v: f64| -> [u8; 4] { ((v * 10_000_000.0) as i32).to_le_bytes() };
        buf[102..106].copy_from_slice(&e7(self.bounds.lng_min));
        buf[106..110].copy_from_slice(&e7(self.bounds.lat_min));
        buf[110..114].copy_from_slice(&e7(self.bounds.lng_max));
        buf[114..118].copy_from_slice(&e7(self.bounds.lat_max));
        buf[118] = self.center_zoom;
        buf[119..123].copy_from_slice(&e7(self.center_lon));
        buf[123..127].copy_from_slice(&e7(self.center_lat));
        buf
    }
}

/// A directory entry. `run_length = 0` marks a leaf-directory reference in
/// the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub tile_id: u64,
    pub offset: u64,
    pub length: u32,
    pub run_length: u32,
}

/// Encode entries in the columnar directory format: count, delta tile ids,
/// run lengths, lengths, then offsets (0 when contiguous with the previous
/// entry, offset+1 otherwise).
pub fn encode_directory(entries: &[DirEntry]) -> Vec<u8> {
    let mut buf = Vec::new();
    write_varint(&mut buf, entries.len() as u64);
    if entries.is_empty() {
        return buf;
    }

    let mut last_id = 0u64;
    for entry in entries {
        write_varint(&mut buf, entry.tile_id - last_id);
        last_id = entry.tile_id;
    }
    for entry in entries {
        write_varint(&mut buf, entry.run_length as u64);
    }
    for entry in entries {
        write_varint(&mut buf, entry.length as u64);
    }
    let mut expected_offset = 0u64;
    for (i, entry) in entries.iter().enumerate() {
        if i > 0 && entry.offset == expected_offset {
            write_varint(&mut buf, 0);
        } else {
            write_varint(&mut buf, entry.offset + 1);
        }
        if entry.run_length > 0 {
            expected_offset = entry.offset + entry.length as u64;
        }
    }
    buf
}

/// Decode a directory (verification and tests).
pub fn decode_directory(data: &[u8]) -> Result<Vec<DirEntry>> {
    let mut pos = 0usize;
    let mut next = |what: &str| -> Result<u64> {
        let (value, used) = decode_varint(&data[pos..])
            .ok_or_else(|| Error::Archive(format!("truncated directory at {}", what)))?;
        pos += used;
        Ok(value)
    };

    let count = next("count")? as usize;
    let mut entries = vec![
        DirEntry {
            tile_id: 0,
            offset: 0,
            length: 0,
            run_length: 0,
        };
        count
    ];
    let mut last_id = 0u64;
    for entry in entries.iter_mut() {
        last_id += next("tile id")?;
        entry.tile_id = last_id;
    }
    for entry in entries.iter_mut() {
        entry.run_length = next("run length")? as u32;
    }
    for entry in entries.iter_mut() {
        entry.length = next("length")? as u32;
    }
    let mut expected_offset = 0u64;
    for entry in entries.iter_mut() {
        let raw = next("offset")?;
        entry.offset = if raw == 0 { expected_offset } else { raw - 1 };
        if entry.run_length > 0 {
            expected_offset = entry.offset + entry.length as u64;
        }
    }
    Ok(entries)
}

#[derive(Debug, Clone, Copy)]
struct RawEntry {
    tile_id: u64,
    offset: u64,
    length: u32,
}

/// Writer for the single-file indexed archive.
pub struct PmtilesArchive {
    path: PathBuf,
    tile_compression: Compression,
    internal_compression: Compression,
    temp_data_path: PathBuf,
    temp_data: Option<BufWriter<File>>,
    current_offset: u64,
    entries: Vec<RawEntry>,
    /// content hash → stored payload location, for resolving pointer records
    stored_by_hash: HashMap<u64, (u64, u32)>,
    addressed_tiles: u64,
    unique_payloads: u64,
    min_zoom: u8,
    max_zoom: u8,
    finished: bool,
}

impl PmtilesArchive {
    pub fn new(path: PathBuf, tile_compression: Compression) -> Self {
        let temp_data_path = path.with_extension("tmp-data");
        Self {
            path,
            tile_compression,
            internal_compression: Compression::Gzip,
            temp_data_path,
            temp_data: None,
            current_offset: 0,
            entries: Vec::new(),
            stored_by_hash: HashMap::new(),
            addressed_tiles: 0,
            unique_payloads: 0,
            min_zoom: u8::MAX,
            max_zoom: 0,
            finished: false,
        }
    }

    /// Collapse sorted raw entries into run-length directory entries.
    fn build_directory_entries(&self) -> Vec<DirEntry> {
        let mut dir_entries: Vec<DirEntry> = Vec::new();
        for entry in &self.entries {
            if let Some(last) = dir_entries.last_mut() {
                if last.offset == entry.offset
                    && last.length == entry.length
                    && entry.tile_id == last.tile_id + last.run_length as u64
                {
                    last.run_length += 1;
                    continue;
                }
            }
            dir_entries.push(DirEntry {
                tile_id: entry.tile_id,
                offset: entry.offset,
                length: entry.length,
                run_length: 1,
            });
        }
        dir_entries
    }

    /// Split directory entries into a root and leaf sections when the root
    /// would grow past one leaf's worth of entries.
    fn build_directories(&self, entries: &[DirEntry]) -> Result<(Vec<u8>, Vec<u8>, usize)> {
        if entries.len() <= LEAF_DIR_ENTRIES {
            let root = compression::compress(&encode_directory(entries), self.internal_compression)
                .map_err(|e| Error::Archive(format!("failed to compress directory: {}", e)))?;
            return Ok((root, Vec::new(), entries.len()));
        }

        let mut root_entries = Vec::new();
        let mut leaves = Vec::new();
        for chunk in entries.chunks(LEAF_DIR_ENTRIES) {
            let leaf =
                compression::compress(&encode_directory(chunk), self.internal_compression)
                    .map_err(|e| Error::Archive(format!("failed to compress leaf: {}", e)))?;
            root_entries.push(DirEntry {
                tile_id: chunk[0].tile_id,
                offset: leaves.len() as u64,
                length: leaf.len() as u32,
                // run_length 0 marks a leaf reference
                run_length: 0,
            });
            leaves.extend_from_slice(&leaf);
        }
        let root = compression::compress(
            &encode_directory(&root_entries),
            self.internal_compression,
        )
        .map_err(|e| Error::Archive(format!("failed to compress root: {}", e)))?;
        Ok((root, leaves, entries.len()))
    }

    fn build_metadata_json(&self, metadata: &ArchiveMetadata) -> String {
        let layers: Vec<serde_json::Value> = metadata
            .layers
            .iter()
            .map(|(name, fields)| {
                serde_json::json!({
                    "id": name,
                    "minzoom": self.observed_min_zoom(),
                    "maxzoom": self.observed_max_zoom(),
                    "fields": fields,
                })
            })
            .collect();
        serde_json::json!({
            "name": metadata.name,
            "description": metadata.description,
            "attribution": metadata.attribution,
            "version": metadata.version,
            "type": if metadata.is_overlay { "overlay" } else { "baselayer" },
            "format": "pbf",
            "vector_layers": layers,
        })
        .to_string()
    }

    fn observed_min_zoom(&self) -> u8 {
        if self.min_zoom == u8::MAX {
            0
        } else {
            self.min_zoom
        }
    }

    fn observed_max_zoom(&self) -> u8 {
        self.max_zoom
    }
}

impl TileArchive for PmtilesArchive {
    fn tile_order(&self) -> TileOrder {
        TileOrder::Hilbert
    }

    fn deduplicates(&self) -> bool {
        true
    }

    fn initialize(&mut self, _metadata: &ArchiveMetadata) -> Result<()> {
        let file = File::create(&self.temp_data_path)
            .map_err(|e| Error::Archive(format!("failed to create temp data file: {}", e)))?;
        self.temp_data = Some(BufWriter::with_capacity(64 * 1024, file));
        Ok(())
    }

    fn write_tile(&mut self, tile: &TileEncodingResult) -> Result<()> {
        let writer = self
            .temp_data
            .as_mut()
            .ok_or_else(|| Error::Archive("write before initialize".to_string()))?;

        let tile_id = TileOrder::Hilbert.encode(tile.coord) as u64;
        self.addressed_tiles += 1;
        self.min_zoom = self.min_zoom.min(tile.coord.z);
        self.max_zoom = self.max_zoom.max(tile.coord.z);

        let (offset, length) = match (&tile.data, tile.content_hash) {
            (Some(data), hash) => {
                let offset = self.current_offset;
                let length = data.len() as u32;
                writer
                    .write_all(data)
                    .map_err(|e| Error::Archive(format!("failed to write tile data: {}", e)))?;
                self.current_offset += length as u64;
                self.unique_payloads += 1;
                if let Some(hash) = hash {
                    self.stored_by_hash.insert(hash, (offset, length));
                }
                (offset, length)
            }
            (None, Some(hash)) => *self.stored_by_hash.get(&hash).ok_or_else(|| {
                Error::Internal(format!(
                    "pointer record for unknown content hash {:#x}",
                    hash
                ))
            })?,
            (None, None) => {
                return Err(Error::Internal(
                    "tile with neither payload nor content hash".to_string(),
                ))
            }
        };

        self.entries.push(RawEntry {
            tile_id,
            offset,
            length,
        });
        Ok(())
    }

    fn finish(&mut self, metadata: &ArchiveMetadata) -> Result<()> {
        let writer = self
            .temp_data
            .take()
            .ok_or_else(|| Error::Archive("finish before initialize".to_string()))?;
        writer
            .into_inner()
            .map_err(|e| Error::Archive(format!("failed to flush temp data: {}", e)))?;

        let dir_entries = self.build_directory_entries();
        let (root, leaves, entry_count) = self.build_directories(&dir_entries)?;

        let metadata_json = self.build_metadata_json(metadata);
        let compressed_metadata =
            compression::compress(metadata_json.as_bytes(), self.internal_compression)
                .map_err(|e| Error::Archive(format!("failed to compress metadata: {}", e)))?;

        let root_dir_offset = HEADER_LEN as u64;
        let root_dir_length = root.len() as u64;
        let json_metadata_offset = root_dir_offset + root_dir_length;
        let json_metadata_length = compressed_metadata.len() as u64;
        let leaf_dirs_offset = json_metadata_offset + json_metadata_length;
        let leaf_dirs_length = leaves.len() as u64;
        let tile_data_offset = leaf_dirs_offset + leaf_dirs_length;

        let header = Header {
            root_dir_offset,
            root_dir_length,
            json_metadata_offset,
            json_metadata_length,
            leaf_dirs_offset: if leaves.is_empty() { 0 } else { leaf_dirs_offset },
            leaf_dirs_length,
            tile_data_offset,
            tile_data_length: self.current_offset,
            addressed_tiles_count: self.addressed_tiles,
            tile_entries_count: entry_count as u64,
            tile_contents_count: self.unique_payloads,
            clustered: true,
            internal_compression: self.internal_compression,
            tile_compression: self.tile_compression,
            min_zoom: self.observed_min_zoom(),
            max_zoom: self.observed_max_zoom(),
            bounds: metadata.bounds,
            center_zoom: (self.observed_min_zoom() + self.observed_max_zoom()) / 2,
            center_lon: (metadata.bounds.lng_min + metadata.bounds.lng_max) / 2.0,
            center_lat: (metadata.bounds.lat_min + metadata.bounds.lat_max) / 2.0,
        };

        // assemble next to the final location, rename when complete
        let tmp_path = self.path.with_extension("pmtiles.tmp");
        {
            let file = File::create(&tmp_path)
                .map_err(|e| Error::Archive(format!("failed to create archive: {}", e)))?;
            let mut out = BufWriter::new(file);
            out.write_all(&header.to_bytes())
                .map_err(|e| Error::Archive(format!("failed to write header: {}", e)))?;
            out.write_all(&root)
                .map_err(|e| Error::Archive(format!("failed to write root dir: {}", e)))?;
            out.write_all(&compressed_metadata)
                .map_err(|e| Error::Archive(format!("failed to write metadata: {}", e)))?;
            out.write_all(&leaves)
                .map_err(|e| Error::Archive(format!("failed to write leaf dirs: {}", e)))?;
            let mut data = File::open(&self.temp_data_path)
                .map_err(|e| Error::Archive(format!("failed to reopen temp data: {}", e)))?;
            std::io::copy(&mut data, &mut out)
                .map_err(|e| Error::Archive(format!("failed to copy tile data: {}", e)))?;
            out.flush()
                .map_err(|e| Error::Archive(format!("failed to flush archive: {}", e)))?;
        }
        fs::rename(&tmp_path, &self.path)
            .map_err(|e| Error::Archive(format!("failed to move archive into place: {}", e)))?;
        let _ = fs::remove_file(&self.temp_data_path);
        self.finished = true;

        log::info!(
            "wrote {} ({} tiles, {} unique payloads)",
            self.path.display(),
            self.addressed_tiles,
            self.unique_payloads
        );
        Ok(())
    }
}

impl Drop for PmtilesArchive {
    fn drop(&mut self) {
        if !self.finished {
            let _ = fs::remove_file(&self.temp_data_path);
            let _ = fs::remove_file(self.path.with_extension("pmtiles.tmp"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::fnv1a64;
    use crate::tile::TileCoord;

    fn metadata() -> ArchiveMetadata {
        ArchiveMetadata {
            name: "test".to_string(),
            description: "d".to_string(),
            attribution: String::new(),
            version: "1".to_string(),
            is_overlay: false,
            min_zoom: 0,
            max_zoom: 3,
            bounds: TileBounds::world(),
            tile_compression: Compression::Gzip,
            layers: vec![("water".to_string(), HashMap::new())],
        }
    }

    fn tile(coord: TileCoord, data: Option<&[u8]>, hash: Option<u64>) -> TileEncodingResult {
        TileEncodingResult {
            coord,
            data: data.map(|d| d.to_vec()),
            content_hash: hash,
            uncompressed_len: data.map_or(0, |d| d.len() as u32),
        }
    }

    fn temp_archive_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "tilefoundry-test-{}-{}.pmtiles",
            name,
            std::process::id()
        ))
    }

    #[test]
    fn test_header_is_127_bytes_with_magic() {
        let header = Header {
            bounds: TileBounds::world(),
            internal_compression: Compression::Gzip,
            tile_compression: Compression::Gzip,
            ..Default::default()
        };
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), 127);
        assert_eq!(&bytes[0..7], b"PMTiles");
        assert_eq!(bytes[7], 3);
        assert_eq!(bytes[98], Compression::Gzip.code());
        assert_eq!(bytes[99], TILE_TYPE_MVT);
    }

    #[test]
    fn test_header_bounds_e7_roundtrip() {
        let header = Header {
            bounds: TileBounds::new(-122.4194, 37.7749, -122.3894, 37.8049),
            ..Default::default()
        };
        let bytes = header.to_bytes();
        let min_lon = i32::from_le_bytes(bytes[102..106].try_into().unwrap()) as f64 / 1e7;
        assert!((min_lon - (-122.4194)).abs() < 1e-4);
    }

    #[test]
    fn test_directory_roundtrip() {
        let entries = vec![
            DirEntry {
                tile_id: 0,
                offset: 0,
                length: 100,
                run_length: 1,
            },
            DirEntry {
                tile_id: 1,
                offset: 100,
                length: 50,
                run_length: 4,
            },
            DirEntry {
                tile_id: 40,
                offset: 0,
                length: 100,
                run_length: 1,
            },
        ];
        let encoded = encode_directory(&entries);
        let decoded = decode_directory(&encoded).unwrap();
        assert_eq!(decoded, entries);
    }

    #[test]
    fn test_directory_contiguous_offsets_encode_as_zero() {
        let entries = vec![
            DirEntry {
                tile_id: 0,
                offset: 0,
                length: 10,
                run_length: 1,
            },
            DirEntry {
                tile_id: 1,
                offset: 10,
                length: 20,
                run_length: 1,
            },
        ];
        let encoded = encode_directory(&entries);
        // count, 2 ids, 2 run lengths, 2 lengths, then offsets [1, 0]
        assert_eq!(encoded[encoded.len() - 1], 0, "contiguous offset encodes as 0");
        assert_eq!(decode_directory(&encoded).unwrap(), entries);
    }

    #[test]
    fn test_empty_directory() {
        let encoded = encode_directory(&[]);
        assert_eq!(encoded, vec![0]);
        assert!(decode_directory(&encoded).unwrap().is_empty());
    }

    #[test]
    fn test_archive_file_layout() {
        let path = temp_archive_path("layout");
        let _ = fs::remove_file(&path);

        let mut archive = PmtilesArchive::new(path.clone(), Compression::Gzip);
        archive.initialize(&metadata()).unwrap();
        archive
            .write_tile(&tile(TileCoord::new(0, 0, 0), Some(&[0x1a, 0x00]), None))
            .unwrap();
        archive.finish(&metadata()).unwrap();

        let data = fs::read(&path).unwrap();
        assert_eq!(&data[0..7], b"PMTiles");
        assert_eq!(data[7], 3);
        let root_offset = u64::from_le_bytes(data[8..16].try_into().unwrap());
        assert_eq!(root_offset, 127);
        assert!(data.len() > 127);
        // addressed=1, entries=1, contents=1
        assert_eq!(u64::from_le_bytes(data[72..80].try_into().unwrap()), 1);
        assert_eq!(u64::from_le_bytes(data[80..88].try_into().unwrap()), 1);
        assert_eq!(u64::from_le_bytes(data[88..96].try_into().unwrap()), 1);
        // clustered
        assert_eq!(data[96], 1);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_pointer_records_share_payload_and_collapse_runs() {
        let path = temp_archive_path("dedup");
        let _ = fs::remove_file(&path);

        let payload = [0x0a, 0x02];
        let hash = fnv1a64(&payload);
        let mut archive = PmtilesArchive::new(path.clone(), Compression::Gzip);
        archive.initialize(&metadata()).unwrap();
        // Hilbert ids 0, 1, 2 are consecutive: (0,0,0), (0,0,1), (0,1,1)
        archive
            .write_tile(&tile(TileCoord::new(0, 0, 0), Some(&payload), Some(hash)))
            .unwrap();
        archive
            .write_tile(&tile(TileCoord::new(0, 0, 1), None, Some(hash)))
            .unwrap();
        archive
            .write_tile(&tile(TileCoord::new(0, 1, 1), None, Some(hash)))
            .unwrap();

        let entries = archive.build_directory_entries();
        assert_eq!(entries.len(), 1, "consecutive identical tiles share one entry");
        assert_eq!(entries[0].run_length, 3);

        archive.finish(&metadata()).unwrap();
        let data = fs::read(&path).unwrap();
        assert_eq!(
            u64::from_le_bytes(data[72..80].try_into().unwrap()),
            3,
            "addressed tiles"
        );
        assert_eq!(
            u64::from_le_bytes(data[88..96].try_into().unwrap()),
            1,
            "unique contents"
        );
        // tile data section holds exactly one copy of the payload
        let tile_data_length = u64::from_le_bytes(data[64..72].try_into().unwrap());
        assert_eq!(tile_data_length, payload.len() as u64);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_pointer_to_unknown_hash_is_internal_error() {
        let path = temp_archive_path("badptr");
        let mut archive = PmtilesArchive::new(path, Compression::Gzip);
        archive.initialize(&metadata()).unwrap();
        let result = archive.write_tile(&tile(TileCoord::new(0, 0, 0), None, Some(42)));
        assert!(matches!(result, Err(Error::Internal(_))));
    }

    #[test]
    fn test_large_directory_splits_into_leaves() {
        let entries: Vec<DirEntry> = (0..10_000u64)
            .map(|i| DirEntry {
                tile_id: i * 2, // non-consecutive so runs don't collapse
                offset: i * 10,
                length: 10,
                run_length: 1,
            })
            .collect();
        let archive = PmtilesArchive::new(temp_archive_path("leaves"), Compression::Gzip);
        let (root, leaves, count) = archive.build_directories(&entries).unwrap();
        assert_eq!(count, 10_000);
        assert!(!leaves.is_empty(), "10k entries need leaf directories");
        assert!(!root.is_empty());
    }

    #[test]
    fn test_unfinished_archive_cleans_up_temp_files() {
        let path = temp_archive_path("cleanup");
        let temp_data = path.with_extension("tmp-data");
        {
            let mut archive = PmtilesArchive::new(path.clone(), Compression::Gzip);
            archive.initialize(&metadata()).unwrap();
            archive
                .write_tile(&tile(TileCoord::new(0, 0, 0), Some(&[1, 2, 3]), None))
                .unwrap();
            assert!(temp_data.exists());
        }
        assert!(!temp_data.exists(), "temp data should be removed on drop");
        assert!(!path.exists(), "no partial archive may remain");
    }
}
