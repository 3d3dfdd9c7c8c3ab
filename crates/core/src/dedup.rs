//! Content-addressed tile deduplication.
//!
//! A global tileset is mostly repeated tiles (oceans, deserts, empty land).
//! The ordered writer hashes each encoded payload and stores every distinct
//! content exactly once; repeats become pointer records to the first copy's
//! data id.
//!
//! # Strategy
//!
//! 1. The encoder hashes the compressed payload (FNV-1a-64) when the
//!    archive deduplicates and the tile looks likely to repeat
//! 2. The writer keeps `hash → tile data id`; a hit writes a pointer
//!    record, a miss allocates the next data id and ships the bytes
//! 3. Consecutive identical tiles additionally collapse via the archive's
//!    run-length encoding

use std::collections::HashMap;

/// Statistics about tile deduplication.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupStats {
    /// Tiles addressed, including duplicates
    pub addressed_tiles: u64,
    /// Distinct payloads stored
    pub tile_contents: u64,
    /// Pointer records written instead of payloads
    pub duplicates_eliminated: u64,
    /// Payload bytes avoided
    pub bytes_saved: u64,
}

impl DedupStats {
    /// Fraction of addressed tiles that were duplicates.
    pub fn dedup_ratio(&self) -> f64 {
        if self.addressed_tiles == 0 {
            return 0.0;
        }
        self.duplicates_eliminated as f64 / self.addressed_tiles as f64
    }
}

/// What the writer should do with one tile payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupOutcome {
    /// First occurrence: store the bytes under this data id
    Store(u64),
    /// Seen before: point the coordinate at this existing data id
    Reuse(u64),
}

/// `content hash → tile data id` cache with allocation of new data ids.
#[derive(Debug, Default)]
pub struct DedupCache {
    ids_by_hash: HashMap<u64, u64>,
    next_data_id: u64,
    stats: DedupStats,
}

impl DedupCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a tile with a content hash, returning whether its payload must
    /// be stored or can be reused.
    pub fn insert(&mut self, hash: u64, payload_len: u64) -> DedupOutcome {
        self.stats.addressed_tiles += 1;
        if let Some(&id) = self.ids_by_hash.get(&hash) {
            self.stats.duplicates_eliminated += 1;
            self.stats.bytes_saved += payload_len;
            return DedupOutcome::Reuse(id);
        }
        let id = self.next_data_id;
        self.next_data_id += 1;
        self.ids_by_hash.insert(hash, id);
        self.stats.tile_contents += 1;
        DedupOutcome::Store(id)
    }

    /// Record a tile without a content hash: always a fresh data id.
    pub fn insert_unhashed(&mut self) -> u64 {
        self.stats.addressed_tiles += 1;
        self.stats.tile_contents += 1;
        let id = self.next_data_id;
        self.next_data_id += 1;
        id
    }

    pub fn stats(&self) -> &DedupStats {
        &self.stats
    }

    pub fn unique_count(&self) -> usize {
        self.ids_by_hash.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::fnv1a64;

    #[test]
    fn test_empty_cache() {
        let cache = DedupCache::new();
        assert_eq!(cache.unique_count(), 0);
        assert_eq!(cache.stats().addressed_tiles, 0);
        assert_eq!(cache.stats().dedup_ratio(), 0.0);
    }

    #[test]
    fn test_first_occurrence_stores() {
        let mut cache = DedupCache::new();
        let outcome = cache.insert(fnv1a64(b"ocean"), 50);
        assert_eq!(outcome, DedupOutcome::Store(0));
        assert_eq!(cache.stats().tile_contents, 1);
        assert_eq!(cache.stats().duplicates_eliminated, 0);
    }

    #[test]
    fn test_repeat_reuses_same_data_id() {
        let mut cache = DedupCache::new();
        let hash = fnv1a64(b"ocean");
        assert_eq!(cache.insert(hash, 50), DedupOutcome::Store(0));
        assert_eq!(cache.insert(hash, 50), DedupOutcome::Reuse(0));
        assert_eq!(cache.insert(hash, 50), DedupOutcome::Reuse(0));

        let stats = cache.stats();
        assert_eq!(stats.addressed_tiles, 3);
        assert_eq!(stats.tile_contents, 1);
        assert_eq!(stats.duplicates_eliminated, 2);
        assert_eq!(stats.bytes_saved, 100);
    }

    #[test]
    fn test_distinct_contents_get_distinct_ids() {
        let mut cache = DedupCache::new();
        assert_eq!(cache.insert(fnv1a64(b"ocean"), 10), DedupOutcome::Store(0));
        assert_eq!(cache.insert(fnv1a64(b"land"), 10), DedupOutcome::Store(1));
        assert_eq!(cache.insert(fnv1a64(b"coast"), 10), DedupOutcome::Store(2));
        assert_eq!(cache.unique_count(), 3);
    }

    #[test]
    fn test_unhashed_tiles_never_dedup() {
        let mut cache = DedupCache::new();
        let a = cache.insert_unhashed();
        let b = cache.insert_unhashed();
        assert_ne!(a, b);
        assert_eq!(cache.stats().addressed_tiles, 2);
        assert_eq!(cache.stats().tile_contents, 2);
    }

    #[test]
    fn test_mixed_ids_do_not_collide() {
        let mut cache = DedupCache::new();
        let DedupOutcome::Store(hashed) = cache.insert(fnv1a64(b"x"), 1) else {
            panic!("expected store");
        };
        let unhashed = cache.insert_unhashed();
        assert_ne!(hashed, unhashed);
    }

    #[test]
    fn test_realistic_ocean_ratio() {
        let mut cache = DedupCache::new();
        let ocean = fnv1a64(b"empty ocean tile");
        cache.insert(ocean, 100);
        for _ in 0..699 {
            cache.insert(ocean, 100);
        }
        for i in 0..300u32 {
            cache.insert(fnv1a64(format!("land tile {}", i).as_bytes()), 500);
        }

        let stats = cache.stats();
        assert_eq!(stats.addressed_tiles, 1000);
        assert_eq!(stats.tile_contents, 301);
        assert_eq!(stats.duplicates_eliminated, 699);
        assert!((stats.dedup_ratio() - 0.699).abs() < 0.001);
    }
}
