//! Lock-free progress counters shared across pipeline stages.
//!
//! One [`Stats`] handle is created by the pipeline and cloned (via `Arc`)
//! into every worker; all counters are relaxed atomics since they only feed
//! progress logs and the final summary.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::memory::format_bytes;
use crate::MAX_ZOOM;

#[derive(Debug, Default)]
pub struct Stats {
    pub features_rendered: AtomicU64,
    pub features_processed: AtomicU64,
    pub memoized_tiles: AtomicU64,
    pub tiles_written: AtomicU64,
    tiles_by_zoom: [AtomicU64; MAX_ZOOM as usize + 1],
    tile_bytes_by_zoom: [AtomicU64; MAX_ZOOM as usize + 1],
    max_tile_bytes: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wrote_tile(&self, zoom: u8, uncompressed_len: u64) {
        self.tiles_written.fetch_add(1, Ordering::Relaxed);
        self.tiles_by_zoom[zoom as usize].fetch_add(1, Ordering::Relaxed);
        self.tile_bytes_by_zoom[zoom as usize].fetch_add(uncompressed_len, Ordering::Relaxed);
        self.max_tile_bytes.fetch_max(uncompressed_len, Ordering::Relaxed);
    }

    pub fn tiles_at_zoom(&self, zoom: u8) -> u64 {
        self.tiles_by_zoom[zoom as usize].load(Ordering::Relaxed)
    }

    /// Log the per-zoom tile summary after a successful run.
    pub fn log_summary(&self, min_zoom: u8, max_zoom: u8) {
        if !log::log_enabled!(log::Level::Debug) {
            return;
        }
        log::debug!("tile stats:");
        for zoom in min_zoom..=max_zoom {
            let count = self.tiles_by_zoom[zoom as usize].load(Ordering::Relaxed);
            let bytes = self.tile_bytes_by_zoom[zoom as usize].load(Ordering::Relaxed);
            let avg = if count == 0 { 0 } else { bytes / count };
            log::debug!("  z{} tiles:{} avg:{}", zoom, count, format_bytes(avg));
        }
        log::debug!(
            "  total tiles:{} features:{} memoized:{} max tile:{}",
            self.tiles_written.load(Ordering::Relaxed),
            self.features_processed.load(Ordering::Relaxed),
            self.memoized_tiles.load(Ordering::Relaxed),
            format_bytes(self.max_tile_bytes.load(Ordering::Relaxed)),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrote_tile_accumulates() {
        let stats = Stats::new();
        stats.wrote_tile(3, 100);
        stats.wrote_tile(3, 300);
        stats.wrote_tile(7, 50);

        assert_eq!(stats.tiles_written.load(Ordering::Relaxed), 3);
        assert_eq!(stats.tiles_at_zoom(3), 2);
        assert_eq!(stats.tiles_at_zoom(7), 1);
        assert_eq!(stats.max_tile_bytes.load(Ordering::Relaxed), 300);
    }
}
