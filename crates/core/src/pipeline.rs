//! End-to-end pipeline: sources → renderer workers → external sort →
//! tile groups → encoder pool → ordered writer → archive.
//!
//! Thread layout for `threads = T`:
//!
//! - one reader thread per source, feeding the feature queue
//! - `R = max(1, T/2)` renderer workers, feeding the record queue
//! - the calling thread drains records into the sorter (append is
//!   single-threaded; the sorter spills chunks on its own background
//!   thread)
//! - after the sort: the calling thread batches tile groups, `E = max(1,
//!   T - R)` encoder workers drain the encode queue, and one writer thread
//!   drains the writer queue
//!
//! All hand-offs are bounded crossbeam channels, so a slow writer
//! throttles the encoders, which throttle the batcher, which throttles the
//! merge. One shared cancellation flag is polled between queue operations;
//! the first error wins and is surfaced after every worker has joined.
//! Archives and the sorter clean their partial on-disk state up on drop,
//! so a failed run leaves nothing behind.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Sender};

use crate::archive::{ArchiveConfig, ArchiveMetadata, TileArchive};
use crate::dedup::DedupStats;
use crate::encoder::{batch_groups, EncodeTask, TileEncoder, WriteTask};
use crate::external_sort::{ExternalMergeSort, SortEntry};
use crate::feature_group::{FeatureGroup, LayerRegistry};
use crate::profile::Profile;
use crate::renderer::FeatureRenderer;
use crate::source::{FeatureSource, SourceFeature};
use crate::stats::Stats;
use crate::writer::WriterOrderedSink;
use crate::{Config, Error, Result};

/// Pipeline lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelinePhase {
    Init,
    ReadSources,
    Sort,
    EmitTiles,
    Finish,
    Done,
    Failed,
}

/// Summary of a completed run.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub phase: PipelinePhase,
    pub dedup: DedupStats,
    pub features_rendered: u64,
    pub tiles_written: u64,
}

pub struct Pipeline {
    config: Config,
    profile: Arc<dyn Profile>,
    stats: Arc<Stats>,
}

impl Pipeline {
    pub fn new(config: Config, profile: Arc<dyn Profile>) -> Self {
        Self {
            config,
            profile,
            stats: Arc::new(Stats::new()),
        }
    }

    pub fn stats(&self) -> Arc<Stats> {
        Arc::clone(&self.stats)
    }

    /// Run against an output URI (`out.pmtiles`, `tiles/?format=files`, ...).
    pub fn run(
        &self,
        sources: Vec<Box<dyn FeatureSource>>,
        output: &str,
    ) -> Result<PipelineReport> {
        self.config.validate()?;
        let archive = ArchiveConfig::from_uri(output)?.open(&self.config)?;
        self.run_with_archive(sources, archive)
    }

    /// Run against an already-constructed archive writer.
    pub fn run_with_archive(
        &self,
        sources: Vec<Box<dyn FeatureSource>>,
        archive: Box<dyn TileArchive>,
    ) -> Result<PipelineReport> {
        self.config.validate()?;
        let cancelled = Arc::new(AtomicBool::new(false));
        let registry = Arc::new(LayerRegistry::new());

        let result = self.run_phases(sources, archive, &cancelled, &registry);
        if result.is_err() {
            // make sure every worker sees the failure even if it was the
            // supervisor that failed
            cancelled.store(true, Ordering::Relaxed);
        }
        result
    }

    fn run_phases(
        &self,
        sources: Vec<Box<dyn FeatureSource>>,
        archive: Box<dyn TileArchive>,
        cancelled: &Arc<AtomicBool>,
        registry: &Arc<LayerRegistry>,
    ) -> Result<PipelineReport> {
        let order = archive.tile_order();
        let deduplicates = archive.deduplicates();

        log::info!("phase: read sources");
        let mut sorter =
            ExternalMergeSort::new(&self.config.tmp_dir, self.config.chunk_max_bytes())?;
        self.read_and_render(sources, &mut sorter, cancelled, registry, order)?;

        log::info!("phase: sort ({} records)", sorter.len());
        sorter.finish()?;

        log::info!("phase: emit tiles");
        let mut metadata = ArchiveMetadata::new(self.profile.as_ref(), &self.config);
        metadata.layers = (0..registry.layer_count() as u8)
            .map(|id| (registry.layer_name(id), registry.layer_fields(id)))
            .collect();

        let dedup = self.emit_tiles(
            &sorter,
            archive,
            &metadata,
            cancelled,
            registry,
            order,
            deduplicates,
        )?;

        self.stats.log_summary(self.config.min_zoom, self.config.max_zoom);
        Ok(PipelineReport {
            phase: PipelinePhase::Done,
            dedup,
            features_rendered: self
                .stats
                .features_rendered
                .load(Ordering::Relaxed),
            tiles_written: self.stats.tiles_written.load(Ordering::Relaxed),
        })
    }

    /// Phase 1: source readers and renderer workers feed the sorter.
    fn read_and_render(
        &self,
        sources: Vec<Box<dyn FeatureSource>>,
        sorter: &mut ExternalMergeSort,
        cancelled: &Arc<AtomicBool>,
        registry: &Arc<LayerRegistry>,
        order: crate::tile::TileOrder,
    ) -> Result<()> {
        let queue_size = self.config.queue_size();
        let (feature_tx, feature_rx) = bounded::<SourceFeature>(queue_size);
        let (record_tx, record_rx) = bounded::<SortEntry>(queue_size);

        let mut reader_handles = Vec::new();
        for mut source in sources {
            if !self.profile.cares_about_source(source.name()) {
                log::debug!("skipping source {}", source.name());
                continue;
            }
            let tx = feature_tx.clone();
            let cancelled = Arc::clone(cancelled);
            reader_handles.push(thread::spawn(move || -> Result<()> {
                source.read(&mut |feature| send_cancellable(&tx, feature, &cancelled))
            }));
        }
        drop(feature_tx);

        let render_threads = (self.config.threads / 2).max(1);
        let mut render_handles = Vec::new();
        for _ in 0..render_threads {
            let rx = feature_rx.clone();
            let tx = record_tx.clone();
            let cancelled = Arc::clone(cancelled);
            let stats = Arc::clone(&self.stats);
            let mut renderer = FeatureRenderer::new(
                self.config.clone(),
                Arc::clone(&self.profile),
                Arc::clone(registry),
                order,
            );
            render_handles.push(thread::spawn(move || -> Result<()> {
                while let Ok(feature) = rx.recv() {
                    if cancelled.load(Ordering::Relaxed) {
                        return Err(Error::Cancelled);
                    }
                    renderer.render_feature(&feature, &mut |rendered| {
                        stats.features_rendered.fetch_add(1, Ordering::Relaxed);
                        let mut value = Vec::new();
                        rendered.encode_value(&mut value);
                        send_cancellable(
                            &tx,
                            SortEntry::new(rendered.sort_key.raw(), value),
                            &cancelled,
                        )
                    })?;
                }
                Ok(())
            }));
        }
        drop(record_tx);
        drop(feature_rx);

        // single-threaded append; spills run on the sorter's own thread
        let mut append_error = None;
        for entry in record_rx.iter() {
            if let Err(e) = sorter.append(entry) {
                append_error = Some(e);
                cancelled.store(true, Ordering::Relaxed);
                break;
            }
        }
        // drain so blocked renderers can observe cancellation and exit
        for _ in record_rx.iter() {}

        let mut first_error = append_error;
        for handle in reader_handles.into_iter().chain(render_handles) {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    cancelled.store(true, Ordering::Relaxed);
                    first_error.get_or_insert(e);
                }
                Err(_) => {
                    cancelled.store(true, Ordering::Relaxed);
                    first_error.get_or_insert(Error::Internal(
                        "worker thread panicked".to_string(),
                    ));
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Phases 3-4: batcher (this thread), encoder pool, ordered writer.
    #[allow(clippy::too_many_arguments)]
    fn emit_tiles(
        &self,
        sorter: &ExternalMergeSort,
        archive: Box<dyn TileArchive>,
        metadata: &ArchiveMetadata,
        cancelled: &Arc<AtomicBool>,
        registry: &Arc<LayerRegistry>,
        order: crate::tile::TileOrder,
        deduplicates: bool,
    ) -> Result<DedupStats> {
        let queue_size = self.config.queue_size();
        let (encode_tx, encode_rx) = bounded::<EncodeTask>(queue_size);
        let (writer_tx, writer_rx) = bounded::<WriteTask>(queue_size);

        let render_threads = (self.config.threads / 2).max(1);
        let encode_threads = (self.config.threads.saturating_sub(render_threads)).max(1);
        let mut encoder_handles = Vec::new();
        for _ in 0..encode_threads {
            let rx = encode_rx.clone();
            let cancelled = Arc::clone(cancelled);
            let mut encoder = TileEncoder::new(
                Arc::clone(registry),
                Arc::clone(&self.stats),
                &self.config,
                deduplicates,
            );
            encoder_handles.push(thread::spawn(move || -> Result<()> {
                encoder.run(&rx, &cancelled)
            }));
        }
        drop(encode_rx);

        let writer_handle = {
            let cancelled = Arc::clone(cancelled);
            let metadata = metadata.clone();
            let sink = WriterOrderedSink::new(archive, Arc::clone(&self.stats));
            thread::spawn(move || -> Result<DedupStats> {
                sink.run(writer_rx, &metadata, &cancelled)
            })
        };

        let groups = FeatureGroup::new(
            sorter.iter()?,
            Arc::clone(registry),
            Arc::clone(&self.profile),
            order,
        );
        let batch_result = batch_groups(groups, &encode_tx, &writer_tx, cancelled);
        // cancel before closing the queues so the writer never mistakes an
        // aborted stream for a completed one
        if batch_result.is_err() {
            cancelled.store(true, Ordering::Relaxed);
        }
        drop(encode_tx);
        drop(writer_tx);

        let mut first_error = batch_result.err();
        for handle in encoder_handles {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    cancelled.store(true, Ordering::Relaxed);
                    first_error.get_or_insert(e);
                }
                Err(_) => {
                    first_error.get_or_insert(Error::Internal(
                        "encoder thread panicked".to_string(),
                    ));
                }
            }
        }
        let dedup = match writer_handle.join() {
            Ok(Ok(stats)) => Some(stats),
            Ok(Err(e)) => {
                first_error.get_or_insert(e);
                None
            }
            Err(_) => {
                first_error
                    .get_or_insert(Error::Internal("writer thread panicked".to_string()));
                None
            }
        };

        match first_error {
            Some(e) => Err(e),
            None => Ok(dedup.expect("writer finished without error")),
        }
    }
}

/// Bounded send that keeps checking the cancellation flag, so producers
/// blocked on a full queue can still shut down.
fn send_cancellable<T>(tx: &Sender<T>, value: T, cancelled: &AtomicBool) -> Result<()> {
    let mut value = value;
    loop {
        if cancelled.load(Ordering::Relaxed) {
            return Err(Error::Cancelled);
        }
        match tx.send_timeout(value, Duration::from_millis(100)) {
            Ok(()) => return Ok(()),
            Err(crossbeam_channel::SendTimeoutError::Timeout(v)) => value = v,
            Err(crossbeam_channel::SendTimeoutError::Disconnected(_)) => {
                return Err(Error::Cancelled);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::RenderedFeature;
    use crate::profile::FeatureEmitter;
    use crate::source::MemorySource;
    use crate::tile::TileOrder;
    use crate::writer::test_support::RecordingArchive;
    use geo::point;

    struct PointProfile;

    impl Profile for PointProfile {
        fn process_feature(&self, _source: &SourceFeature, emitter: &mut FeatureEmitter) {
            emitter.point("poi").with_zoom_range(0, 1).attr("kind", "cafe");
        }

        fn name(&self) -> &str {
            "points"
        }
    }

    struct FatalProfile;

    impl Profile for FatalProfile {
        fn process_feature(&self, _source: &SourceFeature, emitter: &mut FeatureEmitter) {
            emitter.point("poi").with_zoom_range(0, 0);
        }

        fn post_process_layer_features(
            &self,
            _layer: &str,
            _zoom: u8,
            _features: Vec<RenderedFeature>,
        ) -> Result<Vec<RenderedFeature>> {
            Err(Error::Archive("disk detached".to_string()))
        }

        fn name(&self) -> &str {
            "fatal"
        }
    }

    fn point_sources() -> Vec<Box<dyn FeatureSource>> {
        let features = vec![SourceFeature::new(
            "mem",
            1,
            geo::Geometry::Point(point!(x: -90.0, y: 66.51326044311186)),
        )];
        vec![Box::new(MemorySource::new("mem", features)) as Box<dyn FeatureSource>]
    }

    fn test_config() -> Config {
        let mut config = Config::default().with_zoom_range(0, 1).with_threads(2);
        config.tmp_dir = std::env::temp_dir();
        config
    }

    #[test]
    fn test_end_to_end_point_run() {
        let pipeline = Pipeline::new(test_config(), Arc::new(PointProfile));
        let (archive, state) = RecordingArchive::new(TileOrder::Hilbert, false);
        let report = pipeline
            .run_with_archive(point_sources(), Box::new(archive))
            .unwrap();

        assert_eq!(report.phase, PipelinePhase::Done);
        assert_eq!(report.tiles_written, 2, "one tile per zoom");
        assert_eq!(report.features_rendered, 2);

        let state = state.lock().unwrap();
        assert!(state.initialized && state.finished);
        assert_eq!(state.writes.len(), 2);
        // archive order: z0 before z1
        assert_eq!(state.writes[0].coord.z, 0);
        assert_eq!(state.writes[1].coord.z, 1);
        assert!(state.writes.iter().all(|w| w.data.is_some()));
    }

    #[test]
    fn test_fatal_post_process_error_fails_the_run() {
        let pipeline = Pipeline::new(test_config(), Arc::new(FatalProfile));
        let (archive, state) = RecordingArchive::new(TileOrder::Hilbert, false);
        let result = pipeline.run_with_archive(point_sources(), Box::new(archive));

        assert!(matches!(result, Err(Error::Archive(_))));
        assert!(!state.lock().unwrap().finished, "archive must not be finalized");
    }

    #[test]
    fn test_empty_sources_produce_empty_archive() {
        let pipeline = Pipeline::new(test_config(), Arc::new(PointProfile));
        let (archive, state) = RecordingArchive::new(TileOrder::Hilbert, false);
        let report = pipeline
            .run_with_archive(
                vec![Box::new(MemorySource::new("mem", vec![])) as Box<dyn FeatureSource>],
                Box::new(archive),
            )
            .unwrap();
        assert_eq!(report.tiles_written, 0);
        assert!(state.lock().unwrap().finished);
    }

    #[test]
    fn test_invalid_config_rejected_before_any_work() {
        let mut config = test_config();
        config.min_zoom = 5;
        config.max_zoom = 2;
        let pipeline = Pipeline::new(config, Arc::new(PointProfile));
        let (archive, state) = RecordingArchive::new(TileOrder::Hilbert, false);
        let result = pipeline.run_with_archive(point_sources(), Box::new(archive));
        assert!(matches!(result, Err(Error::Config(_))));
        assert!(!state.lock().unwrap().initialized);
    }
}
