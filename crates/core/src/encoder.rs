//! Parallel tile encoding: batching, the encoder workers, and their
//! memoization.
//!
//! The batcher walks tile groups in archive order and packs them into
//! batches of at most [`MAX_TILES_PER_BATCH`] tiles or
//! [`MAX_FEATURES_PER_BATCH`] features, whichever fills first (one huge
//! tile can be a whole batch; thousands of empty ocean tiles share one).
//! Each batch goes onto the encoder queue *and* the writer queue at the
//! same moment: encoders process batches in any order and complete the
//! batch's result slot, while the writer drains its queue in submission
//! order and blocks on each slot, which restores output ordering without a
//! reorder buffer.
//!
//! Workers memoize their last encoded tile: consecutive groups with equal
//! content fingerprints (vast ocean runs) reuse the previous bytes and
//! hash without re-encoding.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::archive::TileEncodingResult;
use crate::codec::fnv1a64;
use crate::compression::{compress, Compression};
use crate::feature_group::{LayerRegistry, TileGroup};
use crate::mvt::{LayerBuilder, TileBuilder};
use crate::stats::Stats;
use crate::{Error, Result};

pub const MAX_TILES_PER_BATCH: usize = 1_000;
pub const MAX_FEATURES_PER_BATCH: usize = 10_000;

/// Batch handed to an encoder worker, with the slot it completes.
pub struct EncodeTask {
    pub groups: Vec<TileGroup>,
    pub result_tx: Sender<Vec<TileEncodingResult>>,
}

/// The writer's side of a batch: a slot that resolves when the batch is
/// encoded.
pub struct WriteTask {
    pub result_rx: Receiver<Vec<TileEncodingResult>>,
}

/// Read ordered tile groups and fan batches out to the encode and writer
/// queues. Runs on its own thread; returns when the group stream ends.
pub fn batch_groups(
    groups: impl Iterator<Item = Result<TileGroup>>,
    encode_queue: &Sender<EncodeTask>,
    writer_queue: &Sender<WriteTask>,
    cancelled: &AtomicBool,
) -> Result<()> {
    let mut pending: Vec<TileGroup> = Vec::new();
    let mut pending_features = 0usize;

    let flush = |pending: &mut Vec<TileGroup>| -> Result<()> {
        if pending.is_empty() {
            return Ok(());
        }
        let (result_tx, result_rx) = bounded(1);
        let task = EncodeTask {
            groups: std::mem::take(pending),
            result_tx,
        };
        encode_queue
            .send(task)
            .map_err(|_| Error::Internal("encoder queue closed early".to_string()))?;
        writer_queue
            .send(WriteTask { result_rx })
            .map_err(|_| Error::Internal("writer queue closed early".to_string()))?;
        Ok(())
    };

    for group in groups {
        if cancelled.load(Ordering::Relaxed) {
            return Err(Error::Cancelled);
        }
        let group = group?;
        let features = group.num_features();
        if !pending.is_empty()
            && (pending.len() >= MAX_TILES_PER_BATCH
                || pending_features + features > MAX_FEATURES_PER_BATCH)
        {
            flush(&mut pending)?;
            pending_features = 0;
        }
        pending_features += features;
        pending.push(group);
    }
    flush(&mut pending)
}

/// One encoder worker. Holds the per-worker memoization state.
pub struct TileEncoder {
    registry: Arc<LayerRegistry>,
    stats: Arc<Stats>,
    compression: Compression,
    tile_warning_size_bytes: usize,
    skip_filled: bool,
    archive_deduplicates: bool,
    hash_all_tiles: bool,
    last_key: Option<(u64, usize)>,
    last_data: Option<Vec<u8>>,
    last_hash: Option<u64>,
    last_uncompressed_len: u32,
    last_is_fill: bool,
}

impl TileEncoder {
    pub fn new(
        registry: Arc<LayerRegistry>,
        stats: Arc<Stats>,
        config: &crate::Config,
        archive_deduplicates: bool,
    ) -> Self {
        Self {
            registry,
            stats,
            compression: config.tile_compression,
            tile_warning_size_bytes: config.tile_warning_size_bytes,
            skip_filled: config.skip_filled_tiles,
            archive_deduplicates,
            hash_all_tiles: config.hash_all_tiles,
            last_key: None,
            last_data: None,
            last_hash: None,
            last_uncompressed_len: 0,
            last_is_fill: false,
        }
    }

    /// Drain the encode queue until it closes or the pipeline cancels.
    pub fn run(&mut self, tasks: &Receiver<EncodeTask>, cancelled: &AtomicBool) -> Result<()> {
        while let Ok(task) = tasks.recv() {
            if cancelled.load(Ordering::Relaxed) {
                return Err(Error::Cancelled);
            }
            let mut results = Vec::with_capacity(task.groups.len());
            for group in &task.groups {
                if let Some(result) = self.encode_group(group)? {
                    results.push(result);
                }
            }
            // the writer going away early only happens on shutdown
            let _ = task.result_tx.send(results);
        }
        Ok(())
    }

    /// Encode one group, reusing the previous output when contents match.
    /// Returns `None` when the tile is a skipped fill.
    pub fn encode_group(&mut self, group: &TileGroup) -> Result<Option<TileEncodingResult>> {
        self.stats
            .features_processed
            .fetch_add(group.num_features() as u64, Ordering::Relaxed);

        // post-processing may have emptied the tile
        if group.features.is_empty() {
            return Ok(None);
        }

        let key = (group.fingerprint(), group.num_features());
        if self.last_key == Some(key) {
            self.stats.memoized_tiles.fetch_add(1, Ordering::Relaxed);
            if self.skip_filled && self.last_is_fill && !self.archive_deduplicates {
                // repeated fill on an archive that cannot point at the
                // first copy: drop it entirely
                return Ok(None);
            }
            return Ok(Some(TileEncodingResult {
                coord: group.coord,
                data: self.last_data.clone(),
                content_hash: self.last_hash,
                uncompressed_len: self.last_uncompressed_len,
            }));
        }

        let mut tile = TileBuilder::new();
        for (layer_id, run) in group.layers() {
            let mut layer = LayerBuilder::new(self.registry.layer_name(layer_id));
            let keys = self.registry.layer_keys(layer_id);
            for feature in run {
                layer.add_feature(feature, &keys);
            }
            if !layer.is_empty() {
                tile.add_layer(layer.build());
            }
        }
        let encoded = tile.encode();
        if encoded.len() > self.tile_warning_size_bytes {
            log::warn!("{} {}kb uncompressed", group.coord, encoded.len() / 1024);
        }

        let compressed = compress(&encoded, self.compression)?;
        let content_hash = if self.archive_deduplicates
            && (self.hash_all_tiles || group.is_likely_duplicated())
        {
            Some(fnv1a64(&compressed))
        } else {
            None
        };

        self.last_key = Some(key);
        self.last_data = Some(compressed.clone());
        self.last_hash = content_hash;
        self.last_uncompressed_len = encoded.len() as u32;
        self.last_is_fill = group.is_likely_duplicated();

        Ok(Some(TileEncodingResult {
            coord: group.coord,
            data: Some(compressed),
            content_hash,
            uncompressed_len: encoded.len() as u32,
        }))
    }
}
