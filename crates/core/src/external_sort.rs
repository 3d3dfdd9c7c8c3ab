//! External merge sort for memory-bounded tile generation.
//!
//! Render-features arrive in source order but must leave in sort-key order,
//! over datasets far larger than RAM. This module buffers opaque
//! `(key, bytes)` entries into a bounded in-memory chunk, spills each full
//! chunk to a temp file after a stable in-place sort, and streams everything
//! back in global key order through a k-way merge.
//!
//! # How It Works
//!
//! 1. `append` adds an entry to the current chunk and tracks its bytes
//! 2. When the chunk exceeds its byte budget it is sorted and written to a
//!    numbered spill file on a background thread while appends continue
//! 3. `finish` flushes the last chunk and seals the sorter
//! 4. `iter` merges all spill files through a 4-ary min-heap keyed by
//!    `(head key, chunk index)`, so equal keys surface in insertion order
//!
//! Spill records are framed as a `u32` little-endian length followed by the
//! 8-byte big-endian key and the value bytes. A frame that cannot be read
//! completely is reported as corruption with its file offset.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::PathBuf;
use std::thread::JoinHandle;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::memory::{format_bytes, MemoryTracker};
use crate::min_heap::MinHeap4;
use crate::{Error, Result};

/// Per-chunk read buffer; large enough that merge reads are sequential I/O.
const READ_BUFFER_BYTES: usize = 256 * 1024;

/// Fixed overhead charged per buffered entry on top of its value bytes.
const ENTRY_OVERHEAD_BYTES: u64 = 40;

/// An opaque record with a 64-bit sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortEntry {
    pub key: u64,
    pub value: Vec<u8>,
}

impl SortEntry {
    pub fn new(key: u64, value: Vec<u8>) -> Self {
        Self { key, value }
    }
}

/// Memory-bounded sorter over [`SortEntry`] records.
///
/// Append is single-threaded; the sort-and-spill of a sealed chunk runs on a
/// background thread so the producer can keep filling the next chunk. At most
/// one spill is in flight, bounding memory at two chunks.
pub struct ExternalMergeSort {
    dir: PathBuf,
    current: Vec<SortEntry>,
    tracker: MemoryTracker,
    chunk_paths: Vec<PathBuf>,
    pending_spill: Option<JoinHandle<std::io::Result<u64>>>,
    bytes_spilled: u64,
    num_records: u64,
    finished: bool,
}

impl ExternalMergeSort {
    /// Create a sorter spilling into a fresh subdirectory of `tmp_dir`.
    ///
    /// `chunk_max_bytes` bounds one in-memory chunk; the sorter may hold two
    /// chunks at once (one filling, one spilling).
    pub fn new(tmp_dir: &std::path::Path, chunk_max_bytes: u64) -> Result<Self> {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let dir = tmp_dir.join(format!("tilefoundry-sort-{}", nanos));
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            current: Vec::new(),
            tracker: MemoryTracker::with_budget(chunk_max_bytes),
            chunk_paths: Vec::new(),
            pending_spill: None,
            bytes_spilled: 0,
            num_records: 0,
            finished: false,
        })
    }

    /// Number of records appended so far.
    pub fn len(&self) -> u64 {
        self.num_records
    }

    pub fn is_empty(&self) -> bool {
        self.num_records == 0
    }

    /// Number of chunks spilled to disk.
    pub fn chunk_count(&self) -> usize {
        self.chunk_paths.len()
    }

    /// Total bytes written to spill files.
    pub fn bytes_spilled(&self) -> u64 {
        self.bytes_spilled
    }

    /// Buffer one entry, spilling the chunk when it exceeds its budget.
    pub fn append(&mut self, entry: SortEntry) -> Result<()> {
        debug_assert!(!self.finished, "append after finish");
        self.tracker
            .add(entry.value.len() as u64 + ENTRY_OVERHEAD_BYTES);
        self.current.push(entry);
        self.num_records += 1;
        if self.tracker.is_over_budget() {
            self.seal_chunk()?;
        }
        Ok(())
    }

    /// Flush the remaining chunk and transition to read-only mode.
    pub fn finish(&mut self) -> Result<()> {
        if !self.current.is_empty() {
            self.seal_chunk()?;
        }
        self.join_pending_spill()?;
        self.finished = true;
        log::debug!(
            "sorted {} records into {} chunks ({})",
            self.num_records,
            self.chunk_paths.len(),
            format_bytes(self.bytes_spilled)
        );
        Ok(())
    }

    /// Stream all records in non-decreasing key order.
    ///
    /// Single-consumer; requires `finish` to have been called.
    pub fn iter(&self) -> Result<SortedIter> {
        assert!(self.finished, "iter before finish");
        SortedIter::open(&self.chunk_paths)
    }

    fn seal_chunk(&mut self) -> Result<()> {
        // wait for the previous spill so at most two chunks exist in memory
        self.join_pending_spill()?;

        let mut entries = std::mem::take(&mut self.current);
        self.tracker.reset_current();

        let path = self.dir.join(format!("chunk-{}.spill", self.chunk_paths.len()));
        self.chunk_paths.push(path.clone());

        self.pending_spill = Some(std::thread::spawn(move || {
            // stable sort keeps insertion order for equal keys
            entries.sort_by_key(|e| e.key);
            write_chunk(&path, &entries)
        }));
        Ok(())
    }

    fn join_pending_spill(&mut self) -> Result<()> {
        if let Some(handle) = self.pending_spill.take() {
            let written = handle
                .join()
                .map_err(|_| Error::Internal("spill thread panicked".to_string()))??;
            self.bytes_spilled += written;
            log::trace!("spilled chunk ({} on disk)", format_bytes(self.bytes_spilled));
        }
        Ok(())
    }
}

impl Drop for ExternalMergeSort {
    fn drop(&mut self) {
        if let Some(handle) = self.pending_spill.take() {
            let _ = handle.join();
        }
        let _ = fs::remove_dir_all(&self.dir);
    }
}

fn write_chunk(path: &std::path::Path, entries: &[SortEntry]) -> std::io::Result<u64> {
    let file = File::create(path)?;
    let mut writer = BufWriter::with_capacity(READ_BUFFER_BYTES, file);
    let mut written = 0u64;
    for entry in entries {
        let frame_len = (8 + entry.value.len()) as u32;
        writer.write_all(&frame_len.to_le_bytes())?;
        writer.write_all(&entry.key.to_be_bytes())?;
        writer.write_all(&entry.value)?;
        written += 4 + frame_len as u64;
    }
    writer.flush()?;
    Ok(written)
}

/// Ordered lazy stream over all spilled chunks.
pub struct SortedIter {
    readers: Vec<ChunkReader>,
    heap: MinHeap4,
}

impl SortedIter {
    fn open(paths: &[PathBuf]) -> Result<Self> {
        let mut readers = Vec::with_capacity(paths.len());
        let mut heap = MinHeap4::new(paths.len().max(1));
        for (index, path) in paths.iter().enumerate() {
            let mut reader = ChunkReader::open(path)?;
            if let Some(entry) = reader.read_entry()? {
                heap.push(index as u32, entry.key);
                reader.head = Some(entry);
            }
            readers.push(reader);
        }
        Ok(Self { readers, heap })
    }
}

impl Iterator for SortedIter {
    type Item = Result<SortEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.heap.is_empty() {
            return None;
        }
        let index = self.heap.peek_id() as usize;
        let reader = &mut self.readers[index];
        let entry = reader.head.take().expect("chunk on heap has a head record");

        match reader.read_entry() {
            Ok(Some(next)) => {
                self.heap.update_head(next.key);
                reader.head = Some(next);
            }
            Ok(None) => {
                self.heap.poll();
            }
            Err(e) => return Some(Err(e)),
        }
        Some(Ok(entry))
    }
}

struct ChunkReader {
    reader: BufReader<File>,
    path: PathBuf,
    offset: u64,
    head: Option<SortEntry>,
}

impl ChunkReader {
    fn open(path: &PathBuf) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::with_capacity(READ_BUFFER_BYTES, file),
            path: path.clone(),
            offset: 0,
            head: None,
        })
    }

    fn corrupt(&self, reason: &str) -> Error {
        Error::CorruptSpill {
            offset: self.offset,
            reason: format!("{} in {}", reason, self.path.display()),
        }
    }

    /// Read the next frame, or `None` at a clean end of file.
    fn read_entry(&mut self) -> Result<Option<SortEntry>> {
        let mut len_buf = [0u8; 4];
        // a clean EOF is only legal on a frame boundary
        match self.reader.read(&mut len_buf[..1])? {
            0 => return Ok(None),
            _ => self
                .reader
                .read_exact(&mut len_buf[1..])
                .map_err(|_| self.corrupt("truncated frame length"))?,
        }
        let frame_len = u32::from_le_bytes(len_buf) as usize;
        if frame_len < 8 {
            return Err(self.corrupt("frame shorter than its key"));
        }

        let mut key_buf = [0u8; 8];
        self.reader
            .read_exact(&mut key_buf)
            .map_err(|_| self.corrupt("truncated key"))?;
        let mut value = vec![0u8; frame_len - 8];
        self.reader
            .read_exact(&mut value)
            .map_err(|_| self.corrupt("truncated value"))?;

        self.offset += 4 + frame_len as u64;
        Ok(Some(SortEntry::new(u64::from_be_bytes(key_buf), value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom};

    fn sorter_with_budget(budget: u64) -> ExternalMergeSort {
        // the sorter creates and cleans up its own unique subdirectory
        ExternalMergeSort::new(&std::env::temp_dir(), budget).unwrap()
    }

    fn collect(sorter: &ExternalMergeSort) -> Vec<SortEntry> {
        sorter.iter().unwrap().map(|r| r.unwrap()).collect()
    }

    #[test]
    fn test_empty_sorter() {
        let mut sorter = sorter_with_budget(1 << 20);
        sorter.finish().unwrap();
        assert!(sorter.is_empty());
        assert!(collect(&sorter).is_empty());
    }

    #[test]
    fn test_single_chunk_sorts_in_key_order() {
        let mut sorter = sorter_with_budget(1 << 20);
        for key in [5u64, 1, 9, 3, 7] {
            sorter.append(SortEntry::new(key, vec![key as u8])).unwrap();
        }
        sorter.finish().unwrap();

        let keys: Vec<u64> = collect(&sorter).iter().map(|e| e.key).collect();
        assert_eq!(keys, vec![1, 3, 5, 7, 9]);
        assert_eq!(sorter.chunk_count(), 1);
    }

    #[test]
    fn test_multi_chunk_merge_yields_input_multiset_sorted() {
        // tiny budget forces many spills
        let mut sorter = sorter_with_budget(1024);
        let mut expected = Vec::new();
        for i in 0..5_000u64 {
            let key = (i * 7919) % 1000; // lots of duplicate keys
            expected.push(key);
            sorter
                .append(SortEntry::new(key, key.to_le_bytes().to_vec()))
                .unwrap();
        }
        sorter.finish().unwrap();
        assert!(
            sorter.chunk_count() >= 8,
            "expected many chunks, got {}",
            sorter.chunk_count()
        );

        let merged: Vec<u64> = collect(&sorter).iter().map(|e| e.key).collect();
        expected.sort_unstable();
        assert_eq!(merged.len(), expected.len(), "records lost or duplicated");
        assert_eq!(merged, expected);
    }

    #[test]
    fn test_equal_keys_preserve_insertion_order() {
        let mut sorter = sorter_with_budget(256); // force spills between duplicates
        for seq in 0..200u8 {
            sorter.append(SortEntry::new(42, vec![seq])).unwrap();
        }
        sorter.finish().unwrap();
        assert!(sorter.chunk_count() > 1);

        let order: Vec<u8> = collect(&sorter).iter().map(|e| e.value[0]).collect();
        let expected: Vec<u8> = (0..200).collect();
        assert_eq!(order, expected, "equal keys lost insertion order");
    }

    #[test]
    fn test_values_survive_the_round_trip() {
        let mut sorter = sorter_with_budget(512);
        for i in (0..100u64).rev() {
            sorter
                .append(SortEntry::new(i, format!("payload-{}", i).into_bytes()))
                .unwrap();
        }
        sorter.finish().unwrap();

        for (i, entry) in collect(&sorter).iter().enumerate() {
            assert_eq!(entry.key, i as u64);
            assert_eq!(entry.value, format!("payload-{}", i).into_bytes());
        }
    }

    #[test]
    fn test_spill_files_are_deleted_on_drop() {
        let dir;
        {
            let mut sorter = sorter_with_budget(128);
            for i in 0..100u64 {
                sorter.append(SortEntry::new(i, vec![0; 16])).unwrap();
            }
            sorter.finish().unwrap();
            dir = sorter.dir.clone();
            assert!(dir.exists());
        }
        assert!(!dir.exists(), "spill dir should be removed on drop");
    }

    #[test]
    fn test_truncated_chunk_reports_corruption_with_offset() {
        let mut sorter = sorter_with_budget(1 << 20);
        for i in 0..10u64 {
            sorter.append(SortEntry::new(i, vec![7; 32])).unwrap();
        }
        sorter.finish().unwrap();

        // chop the tail off the only spill file
        let path = &sorter.chunk_paths[0];
        let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
        let len = file.metadata().unwrap().len();
        file.set_len(len - 10).unwrap();
        drop(file);

        let result: Result<Vec<SortEntry>> = sorter.iter().unwrap().collect();
        match result {
            Err(Error::CorruptSpill { offset, .. }) => {
                assert!(offset > 0, "offset should point into the file");
            }
            other => panic!("expected CorruptSpill, got {:?}", other.map(|v| v.len())),
        }
    }

    #[test]
    fn test_bad_frame_length_is_corruption() {
        let mut sorter = sorter_with_budget(1 << 20);
        sorter.append(SortEntry::new(1, vec![1, 2, 3])).unwrap();
        sorter.finish().unwrap();

        // overwrite the first frame length with a value shorter than a key
        let path = &sorter.chunk_paths[0];
        let mut file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        file.write_all(&3u32.to_le_bytes()).unwrap();
        drop(file);

        let result: Result<Vec<SortEntry>> = sorter.iter().unwrap().collect();
        assert!(matches!(result, Err(Error::CorruptSpill { .. })));
    }
}
