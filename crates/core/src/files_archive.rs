//! Per-file archive: one `{z}/{x}/{y}.pbf` file per tile.
//!
//! The simplest output for serving straight off a filesystem or object
//! store. Tiles are written into a `.tmp` sibling directory that is
//! renamed into place on `finish`, and a `metadata.json` sits next to the
//! tiles. No deduplication: every coordinate stores its own payload, so
//! the pipeline drops repeated fills instead of pointing at them.

use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;

use crate::archive::{ArchiveMetadata, TileArchive, TileEncodingResult};
use crate::tile::TileOrder;
use crate::{Error, Result};

pub struct FilesArchive {
    path: PathBuf,
    tmp_path: PathBuf,
    tiles_written: u64,
    finished: bool,
}

impl FilesArchive {
    pub fn new(path: PathBuf) -> Self {
        let tmp_path = path.with_extension("tmp");
        Self {
            path,
            tmp_path,
            tiles_written: 0,
            finished: false,
        }
    }

    fn metadata_json(metadata: &ArchiveMetadata) -> String {
        serde_json::json!({
            "name": metadata.name,
            "description": metadata.description,
            "attribution": metadata.attribution,
            "version": metadata.version,
            "format": "pbf",
            "minzoom": metadata.min_zoom,
            "maxzoom": metadata.max_zoom,
            "bounds": format!(
                "{},{},{},{}",
                metadata.bounds.lng_min,
                metadata.bounds.lat_min,
                metadata.bounds.lng_max,
                metadata.bounds.lat_max
            ),
        })
        .to_string()
    }
}

impl TileArchive for FilesArchive {
    fn tile_order(&self) -> TileOrder {
        TileOrder::Tms
    }

    fn initialize(&mut self, _metadata: &ArchiveMetadata) -> Result<()> {
        if self.tmp_path.exists() {
            fs::remove_dir_all(&self.tmp_path)
                .map_err(|e| Error::Archive(format!("failed to clear stale output: {}", e)))?;
        }
        fs::create_dir_all(&self.tmp_path)
            .map_err(|e| Error::Archive(format!("failed to create output dir: {}", e)))?;
        Ok(())
    }

    fn write_tile(&mut self, tile: &TileEncodingResult) -> Result<()> {
        let Some(data) = &tile.data else {
            return Err(Error::Internal(
                "per-file archive cannot store pointer records".to_string(),
            ));
        };
        let dir = self
            .tmp_path
            .join(tile.coord.z.to_string())
            .join(tile.coord.x.to_string());
        fs::create_dir_all(&dir)
            .map_err(|e| Error::Archive(format!("failed to create tile dir: {}", e)))?;
        let path = dir.join(format!("{}.pbf", tile.coord.y));
        let mut file = File::create(&path)
            .map_err(|e| Error::Archive(format!("failed to create {}: {}", path.display(), e)))?;
        file.write_all(data)
            .map_err(|e| Error::Archive(format!("failed to write {}: {}", path.display(), e)))?;
        self.tiles_written += 1;
        Ok(())
    }

    fn finish(&mut self, metadata: &ArchiveMetadata) -> Result<()> {
        let metadata_path = self.tmp_path.join("metadata.json");
        fs::write(&metadata_path, Self::metadata_json(metadata))
            .map_err(|e| Error::Archive(format!("failed to write metadata: {}", e)))?;

        if self.path.exists() {
            fs::remove_dir_all(&self.path)
                .map_err(|e| Error::Archive(format!("failed to replace output: {}", e)))?;
        }
        fs::rename(&self.tmp_path, &self.path)
            .map_err(|e| Error::Archive(format!("failed to move output into place: {}", e)))?;
        self.finished = true;
        log::info!(
            "wrote {} tiles under {}",
            self.tiles_written,
            self.path.display()
        );
        Ok(())
    }
}

impl Drop for FilesArchive {
    fn drop(&mut self) {
        if !self.finished {
            let _ = fs::remove_dir_all(&self.tmp_path);
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
            name: "files-test".to_string(),
            description: String::new(),
            attribution: String::new(),
            version: String::new(),
            is_overlay: false,
            min_zoom: 0,
            max_zoom: 2,
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
    fn test_writes_z_x_y_tree() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("tiles");
        let mut archive = FilesArchive::new(out.clone());
        archive.initialize(&metadata()).unwrap();
        archive.write_tile(&tile(TileCoord::new(0, 0, 0), b"root")).unwrap();
        archive.write_tile(&tile(TileCoord::new(3, 5, 3), b"deep")).unwrap();
        archive.finish(&metadata()).unwrap();

        assert_eq!(fs::read(out.join("0/0/0.pbf")).unwrap(), b"root");
        assert_eq!(fs::read(out.join("3/3/5.pbf")).unwrap(), b"deep");
        assert!(out.join("metadata.json").exists());
    }

    #[test]
    fn test_output_appears_only_on_finish() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("tiles");
        {
            let mut archive = FilesArchive::new(out.clone());
            archive.initialize(&metadata()).unwrap();
            archive.write_tile(&tile(TileCoord::new(0, 0, 0), b"x")).unwrap();
            assert!(!out.exists(), "output dir must not exist before finish");
        }
        // dropped without finish: temp dir cleaned up
        assert!(!out.with_extension("tmp").exists());
        assert!(!out.exists());
    }

    #[test]
    fn test_pointer_record_rejected() {
        let dir = TempDir::new().unwrap();
        let mut archive = FilesArchive::new(dir.path().join("tiles"));
        archive.initialize(&metadata()).unwrap();
        let pointer = TileEncodingResult {
            coord: TileCoord::new(0, 0, 0),
            data: None,
            content_hash: Some(1),
            uncompressed_len: 0,
        };
        assert!(archive.write_tile(&pointer).is_err());
    }
}
