//! The single ordered sink between the encoder pool and the archive.
//!
//! Batches arrive on the writer queue in the exact order the batcher
//! submitted them; the sink blocks on each batch's result slot, so tiles
//! reach the archive strictly in archive order no matter how the encoder
//! pool interleaved its work. Every emitted tile is checked against that
//! order — an out-of-order tile is a violated invariant, not a recoverable
//! condition.
//!
//! When the archive deduplicates, the sink owns the content-hash cache:
//! the first occurrence of a payload ships its bytes, repeats become
//! pointer records (`data = None`) to the data id the archive stored the
//! first copy under.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::Receiver;

use crate::archive::{ArchiveMetadata, TileArchive, TileEncodingResult};
use crate::dedup::{DedupCache, DedupOutcome, DedupStats};
use crate::encoder::WriteTask;
use crate::stats::Stats;
use crate::{Error, Result};

pub struct WriterOrderedSink {
    archive: Box<dyn TileArchive>,
    dedup: DedupCache,
    stats: Arc<Stats>,
}

impl WriterOrderedSink {
    pub fn new(archive: Box<dyn TileArchive>, stats: Arc<Stats>) -> Self {
        Self {
            archive,
            dedup: DedupCache::new(),
            stats,
        }
    }

    /// Drain the writer queue, awaiting each batch's encoded result, until
    /// the queue closes. Finishes the archive on success.
    pub fn run(
        mut self,
        tasks: Receiver<WriteTask>,
        metadata: &ArchiveMetadata,
        cancelled: &AtomicBool,
    ) -> Result<DedupStats> {
        self.archive.initialize(metadata)?;
        let order = self.archive.tile_order();
        let deduplicates = self.archive.deduplicates();

        let mut last_id: Option<u32> = None;
        let mut current_zoom: Option<u8> = None;

        for task in tasks.iter() {
            if cancelled.load(Ordering::Relaxed) {
                return Err(Error::Cancelled);
            }
            let results = task
                .result_rx
                .recv()
                .map_err(|_| Error::Internal("encoder dropped a batch result".to_string()))?;

            for tile in results {
                let id = order.encode(tile.coord);
                if last_id.is_some_and(|last| last >= id) {
                    return Err(Error::Internal(format!(
                        "tiles out of order: {} does not follow id {}",
                        tile.coord,
                        last_id.expect("checked"),
                    )));
                }
                last_id = Some(id);

                if current_zoom != Some(tile.coord.z) {
                    log::info!("starting z{}", tile.coord.z);
                    current_zoom = Some(tile.coord.z);
                }

                let payload_len = tile.data.as_ref().map_or(0, |d| d.len() as u64);
                let to_write = match tile.content_hash {
                    Some(hash) if deduplicates => {
                        match self.dedup.insert(hash, payload_len) {
                            DedupOutcome::Store(_) => tile,
                            DedupOutcome::Reuse(_) => TileEncodingResult {
                                data: None,
                                ..tile
                            },
                        }
                    }
                    _ => {
                        self.dedup.insert_unhashed();
                        tile
                    }
                };

                let zoom = to_write.coord.z;
                let uncompressed = to_write.uncompressed_len as u64;
                self.archive.write_tile(&to_write)?;
                self.stats.wrote_tile(zoom, uncompressed);
            }
        }

        // the batcher cancels before closing the queue on failure, so a
        // closed queue with the flag set means an aborted run, not a
        // completed one
        if cancelled.load(Ordering::Relaxed) {
            return Err(Error::Cancelled);
        }

        self.archive.finish(metadata)?;
        let stats = self.dedup.stats().clone();
        log::debug!(
            "archive finished: {} addressed tiles, {} distinct contents",
            stats.addressed_tiles,
            stats.tile_contents
        );
        Ok(stats)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::RecordingArchive;
    use super::*;
    use crate::codec::fnv1a64;
    use crate::tile::{TileCoord, TileOrder};
    use crossbeam_channel::bounded;

    fn result(coord: TileCoord, bytes: &[u8], hash: bool) -> TileEncodingResult {
        TileEncodingResult {
            coord,
            data: Some(bytes.to_vec()),
            content_hash: hash.then(|| fnv1a64(bytes)),
            uncompressed_len: bytes.len() as u32,
        }
    }

    fn metadata() -> ArchiveMetadata {
        ArchiveMetadata {
            name: "test".to_string(),
            description: String::new(),
            attribution: String::new(),
            version: String::new(),
            is_overlay: false,
            min_zoom: 0,
            max_zoom: 2,
            bounds: crate::tile::TileBounds::world(),
            tile_compression: crate::compression::Compression::Gzip,
            layers: Vec::new(),
        }
    }

    fn run_sink(
        archive: RecordingArchive,
        batches: Vec<Vec<TileEncodingResult>>,
    ) -> Result<DedupStats> {
        let (task_tx, task_rx) = bounded(16);
        for batch in batches {
            let (result_tx, result_rx) = bounded(1);
            result_tx.send(batch).unwrap();
            task_tx.send(WriteTask { result_rx }).unwrap();
        }
        drop(task_tx);

        let sink = WriterOrderedSink::new(Box::new(archive), Arc::new(Stats::new()));
        sink.run(task_rx, &metadata(), &AtomicBool::new(false))
    }

    #[test]
    fn test_writes_in_order_and_finishes() {
        let order = TileOrder::Hilbert;
        let (archive, state) = RecordingArchive::new(order, false);
        let tiles = vec![
            result(TileCoord::new(0, 0, 0), b"a", false),
            result(TileCoord::new(0, 0, 1), b"b", false),
            result(TileCoord::new(0, 1, 1), b"c", false),
        ];
        run_sink(archive, vec![tiles]).unwrap();

        let state = state.lock().unwrap();
        assert!(state.initialized);
        assert!(state.finished);
        assert_eq!(state.writes.len(), 3);
    }

    #[test]
    fn test_out_of_order_tile_is_an_internal_error() {
        let order = TileOrder::Hilbert;
        let (archive, _state) = RecordingArchive::new(order, false);
        let tiles = vec![
            result(TileCoord::new(0, 0, 1), b"a", false),
            result(TileCoord::new(0, 0, 0), b"b", false), // goes backwards
        ];
        let err = run_sink(archive, vec![tiles]).unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[test]
    fn test_duplicate_payloads_become_pointer_records() {
        let order = TileOrder::Hilbert;
        let (archive, state) = RecordingArchive::new(order, true);
        let tiles = vec![
            result(TileCoord::new(0, 0, 0), b"ocean", true),
            result(TileCoord::new(0, 0, 1), b"ocean", true),
            result(TileCoord::new(0, 1, 1), b"ocean", true),
        ];
        let stats = run_sink(archive, vec![tiles]).unwrap();

        assert_eq!(stats.addressed_tiles, 3);
        assert_eq!(stats.tile_contents, 1);

        let state = state.lock().unwrap();
        assert_eq!(state.writes.len(), 3, "every coordinate is addressed");
        assert!(state.writes[0].data.is_some(), "first copy ships bytes");
        assert!(state.writes[1].data.is_none(), "repeat is a pointer");
        assert!(state.writes[2].data.is_none());
    }

    #[test]
    fn test_unhashed_tiles_always_ship_bytes() {
        let order = TileOrder::Hilbert;
        let (archive, state) = RecordingArchive::new(order, true);
        let tiles = vec![
            result(TileCoord::new(0, 0, 0), b"same", false),
            result(TileCoord::new(0, 0, 1), b"same", false),
        ];
        let stats = run_sink(archive, vec![tiles]).unwrap();
        assert_eq!(stats.tile_contents, 2);

        let state = state.lock().unwrap();
        assert!(state.writes.iter().all(|w| w.data.is_some()));
    }

    #[test]
    fn test_batches_restore_submission_order() {
        // batch results arrive pre-completed out of encode order; the sink
        // still writes them in queue order
        let order = TileOrder::Hilbert;
        let (archive, state) = RecordingArchive::new(order, false);
        let batch1 = vec![result(TileCoord::new(0, 0, 0), b"a", false)];
        let batch2 = vec![result(TileCoord::new(0, 0, 1), b"b", false)];
        run_sink(archive, vec![batch1, batch2]).unwrap();

        let state = state.lock().unwrap();
        let zs: Vec<u8> = state.writes.iter().map(|w| w.coord.z).collect();
        assert_eq!(zs, vec![0, 1]);
    }
}
