//! Generate a tiny world-ocean archive from an in-memory source.
//!
//! Run with: cargo run --example world_ocean -- /tmp/ocean.pmtiles

use std::sync::Arc;

use geo::{polygon, Geometry};
use tilefoundry_core::pipeline::Pipeline;
use tilefoundry_core::profile::{FeatureEmitter, Profile};
use tilefoundry_core::source::{FeatureSource, MemorySource, SourceFeature};
use tilefoundry_core::Config;

struct OceanProfile;

impl Profile for OceanProfile {
    fn process_feature(
        &self,
        _source: &SourceFeature,
        emitter: &mut FeatureEmitter,
    ) {
        emitter
            .polygon("water")
            .with_zoom_range(0, 5)
            .attr("class", "ocean");
    }

    fn name(&self) -> &str {
        "world-ocean"
    }

    fn description(&self) -> &str {
        "A single world-covering ocean polygon"
    }
}

fn main() {
    env_logger::init();
    let output = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ocean.pmtiles".to_string());

    let world = polygon![
        (x: -180.0, y: -85.1),
        (x: 180.0, y: -85.1),
        (x: 180.0, y: 85.1),
        (x: -180.0, y: 85.1),
    ];
    let sources: Vec<Box<dyn FeatureSource>> = vec![Box::new(MemorySource::new(
        "ocean",
        vec![SourceFeature::new("ocean", 1, Geometry::Polygon(world))],
    ))];

    let config = Config::default().with_zoom_range(0, 5);
    let pipeline = Pipeline::new(config, Arc::new(OceanProfile));
    match pipeline.run(sources, &output) {
        Ok(report) => println!(
            "wrote {}: {} tiles addressed, {} distinct payloads",
            output, report.dedup.addressed_tiles, report.dedup.tile_contents
        ),
        Err(e) => {
            eprintln!("failed: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}
