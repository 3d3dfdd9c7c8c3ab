//! Streaming archive: newline-delimited tile records to a file.
//!
//! Useful for piping tiles into external loaders. Two record shapes:
//!
//! - JSON: `{"z":0,"x":0,"y":0,"encoded":"<base64>"}`
//! - CSV: `z,x,y,<base64>` with a header row
//!
//! Payloads are base64-encoded since they are compressed binary. Streams
//! do not deduplicate and cannot seek, so every record carries its bytes.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use serde::Serialize;

use crate::archive::{ArchiveMetadata, TileArchive, TileEncodingResult};
use crate::tile::TileOrder;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFormat {
    Json,
    Csv,
}

#[derive(Serialize)]
struct JsonRecord<'a> {
    z: u8,
    x: u32,
    y: u32,
    encoded: &'a str,
}

pub struct StreamArchive {
    path: PathBuf,
    tmp_path: PathBuf,
    format: StreamFormat,
    writer: Option<BufWriter<File>>,
    finished: bool,
}

impl StreamArchive {
    pub fn json(path: PathBuf) -> Self {
        Self::new(path, StreamFormat::Json)
    }

    pub fn csv(path: PathBuf) -> Self {
        Self::new(path, StreamFormat::Csv)
    }

    fn new(path: PathBuf, format: StreamFormat) -> Self {
        let tmp_path = path.with_extension("tmp");
        Self {
            path,
            tmp_path,
            format,
            writer: None,
            finished: false,
        }
    }
}

/// Standard base64 without padding dependencies: 3-byte groups to 4 chars.
fn base64(data: &[u8]) -> String {
    const ALPHABET: &[u8; 64] =
        b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::with_capacity(data.len().div_ceil(3) * 4);
    for chunk in data.chunks(3) {
        let b = [
            chunk[0],
            chunk.get(1).copied().unwrap_or(0),
            chunk.get(2).copied().unwrap_or(0),
        ];
        let n = (b[0] as u32) << 16 | (b[1] as u32) << 8 | b[2] as u32;
        out.push(ALPHABET[(n >> 18) as usize & 63] as char);
        out.push(ALPHABET[(n >> 12) as usize & 63] as char);
        out.push(if chunk.len() > 1 {
            ALPHABET[(n >> 6) as usize & 63] as char
        } else {
            '='
        });
        out.push(if chunk.len() > 2 {
            ALPHABET[n as usize & 63] as char
        } else {
            '='
        });
    }
    out
}

impl TileArchive for StreamArchive {
    fn tile_order(&self) -> TileOrder {
        TileOrder::Tms
    }

    fn initialize(&mut self, _metadata: &ArchiveMetadata) -> Result<()> {
        let file = File::create(&self.tmp_path)
            .map_err(|e| Error::Archive(format!("failed to create stream: {}", e)))?;
        let mut writer = BufWriter::new(file);
        if self.format == StreamFormat::Csv {
            writeln!(writer, "z,x,y,encoded")
                .map_err(|e| Error::Archive(format!("failed to write header: {}", e)))?;
        }
        self.writer = Some(writer);
        Ok(())
    }

    fn write_tile(&mut self, tile: &TileEncodingResult) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::Archive("write before initialize".to_string()))?;
        let Some(data) = &tile.data else {
            return Err(Error::Internal(
                "stream archive cannot store pointer records".to_string(),
            ));
        };
        let encoded = base64(data);
        let result = match self.format {
            StreamFormat::Json => {
                let record = JsonRecord {
                    z: tile.coord.z,
                    x: tile.coord.x,
                    y: tile.coord.y,
                    encoded: &encoded,
                };
                serde_json::to_writer(&mut *writer, &record)
                    .map_err(|e| Error::Archive(format!("failed to serialize record: {}", e)))?;
                writeln!(writer)
            }
            StreamFormat::Csv => {
                writeln!(
                    writer,
                    "{},{},{},{}",
                    tile.coord.z, tile.coord.x, tile.coord.y, encoded
                )
            }
        };
        result.map_err(|e| Error::Archive(format!("failed to write record: {}", e)))
    }

    fn finish(&mut self, _metadata: &ArchiveMetadata) -> Result<()> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| Error::Archive("finish before initialize".to_string()))?;
        writer
            .into_inner()
            .map_err(|e| Error::Archive(format!("failed to flush stream: {}", e)))?;
        fs::rename(&self.tmp_path, &self.path)
            .map_err(|e| Error::Archive(format!("failed to move stream into place: {}", e)))?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for StreamArchive {
    fn drop(&mut self) {
        if !self.finished {
            let _ = fs::remove_file(&self.tmp_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::Compression;
    use crate::tile::{TileBounds, TileCoord};
    use tempfile::TempDir;

    fn metadata() -> ArchiveMetadata {
        ArchiveMetadata {
            name: "stream-test".to_string(),
            description: String::new(),
            attribution: String::new(),
            version: String::new(),
            is_overlay: false,
            min_zoom: 0,
            max_zoom: 1,
            bounds: TileBounds::world(),
            tile_compression: Compression::Gzip,
            layers: Vec::new(),
        }
    }

    fn tile(coord: TileCoord, data: &[u8]) -> TileEncodingResult {
        TileEncodingResult {
            coord,
            data: Some(data.to_vec()),
            content_hash: None,
            uncompressed_len: data.len() as u32,
        }
    }

    #[test]
    fn test_base64_reference_values() {
        assert_eq!(base64(b""), "");
        assert_eq!(base64(b"f"), "Zg==");
        assert_eq!(base64(b"fo"), "Zm8=");
        assert_eq!(base64(b"foo"), "Zm9v");
        assert_eq!(base64(b"foobar"), "Zm9vYmFy");
    }

    #[test]
    fn test_json_stream_records() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("tiles.json");
        let mut archive = StreamArchive::json(out.clone());
        archive.initialize(&metadata()).unwrap();
        archive.write_tile(&tile(TileCoord::new(0, 0, 0), b"foo")).unwrap();
        archive.write_tile(&tile(TileCoord::new(1, 0, 1), b"bar")).unwrap();
        archive.finish(&metadata()).unwrap();

        let content = fs::read_to_string(&out).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["z"], 0);
        assert_eq!(first["encoded"], "Zm9v");
    }

    #[test]
    fn test_csv_stream_has_header() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("tiles.csv");
        let mut archive = StreamArchive::csv(out.clone());
        archive.initialize(&metadata()).unwrap();
        archive.write_tile(&tile(TileCoord::new(2, 1, 3), b"foo")).unwrap();
        archive.finish(&metadata()).unwrap();

        let content = fs::read_to_string(&out).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "z,x,y,encoded");
        assert_eq!(lines[1], "3,2,1,Zm9v");
    }

    #[test]
    fn test_unfinished_stream_is_cleaned_up() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("tiles.json");
        {
            let mut archive = StreamArchive::json(out.clone());
            archive.initialize(&metadata()).unwrap();
        }
        assert!(!out.exists());
        assert!(!out.with_extension("tmp").exists());
    }
}
