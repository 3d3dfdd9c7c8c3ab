//! Command line interface for the tilefoundry engine.
//!
//! Reads newline-delimited GeoJSON features, runs the tile pipeline with a
//! passthrough profile, and writes the archive named by `--output`
//! (`out.pmtiles`, `tiles/?format=files`, `dump.csv`, ...).
//!
//! Exit codes: 0 success, 1 usage error, 2 input error, 3 output error,
//! 4 internal error.

mod geojson_source;
mod passthrough_profile;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use tilefoundry_core::compression::Compression;
use tilefoundry_core::pipeline::Pipeline;
use tilefoundry_core::source::FeatureSource;
use tilefoundry_core::tile::TileBounds;
use tilefoundry_core::{Config, Error};

use geojson_source::GeoJsonSource;
use passthrough_profile::PassthroughProfile;

#[derive(Parser, Debug)]
#[command(
    name = "tilefoundry",
    about = "Generate a vector tile archive from geographic features",
    version
)]
struct Args {
    /// Input file: one GeoJSON feature per line
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output archive URI, e.g. out.pmtiles or tiles/?format=files
    #[arg(long, value_name = "URI")]
    output: String,

    /// Minimum zoom level
    #[arg(long, default_value = "0")]
    minzoom: u8,

    /// Maximum zoom level
    #[arg(long, default_value = "14")]
    maxzoom: u8,

    /// Worker threads (default: all cores)
    #[arg(long)]
    threads: Option<usize>,

    /// Bounds as minLon,minLat,maxLon,maxLat, or "world"
    #[arg(long, default_value = "world")]
    bounds: String,

    /// Tile payload compression (gzip or none)
    #[arg(long, default_value = "gzip")]
    tile_compression: String,

    /// Drop repeated full-tile fills
    #[arg(long)]
    skip_filled_tiles: bool,

    /// Warn when an uncompressed tile exceeds this many bytes
    #[arg(long, default_value_t = 500 * 1024)]
    tile_warning_size_bytes: usize,

    /// Directory for sort spill files
    #[arg(long)]
    tmpdir: Option<PathBuf>,

    /// Memory budget for sorting and queues
    #[arg(long)]
    max_memory_bytes: Option<u64>,

    /// Output layer name for all features
    #[arg(long, default_value = "features")]
    layer: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_bounds(spec: &str) -> Result<TileBounds, Error> {
    if spec == "world" {
        return Ok(TileBounds::world());
    }
    let parts: Vec<f64> = spec
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|_| Error::Config(format!("invalid bounds {:?}", spec)))?;
    if parts.len() != 4 {
        return Err(Error::Config(format!(
            "bounds need 4 comma-separated values, got {}",
            parts.len()
        )));
    }
    Ok(TileBounds::new(parts[0], parts[1], parts[2], parts[3]))
}

fn build_config(args: &Args) -> Result<Config, Error> {
    let mut config = Config::default().with_zoom_range(args.minzoom, args.maxzoom);
    config.bounds = parse_bounds(&args.bounds)?;
    if let Some(threads) = args.threads {
        config = config.with_threads(threads);
    }
    config.tile_compression = match Compression::from_str(&args.tile_compression) {
        Some(c @ (Compression::Gzip | Compression::None)) => c,
        Some(other) => {
            return Err(Error::Config(format!(
                "unsupported tile compression {:?}",
                other.name()
            )))
        }
        None => {
            return Err(Error::Config(format!(
                "unknown tile compression {:?}",
                args.tile_compression
            )))
        }
    };
    config.skip_filled_tiles = args.skip_filled_tiles;
    config.tile_warning_size_bytes = args.tile_warning_size_bytes;
    if let Some(tmpdir) = &args.tmpdir {
        config.tmp_dir = tmpdir.clone();
    }
    if let Some(max_memory) = args.max_memory_bytes {
        config.max_memory_bytes = max_memory;
    }
    config.validate()?;
    Ok(config)
}

fn run(args: Args) -> Result<(), Error> {
    let config = build_config(&args)?;
    let profile = Arc::new(PassthroughProfile::new(&args.layer));
    let source = GeoJsonSource::open(&args.input)?;

    let pipeline = Pipeline::new(config, profile);
    let report = pipeline.run(
        vec![Box::new(source) as Box<dyn FeatureSource>],
        &args.output,
    )?;

    println!(
        "✓ wrote {} ({} tiles, {} distinct payloads, {} features)",
        args.output,
        report.dedup.addressed_tiles,
        report.dedup.tile_contents,
        report.features_rendered
    );
    Ok(())
}

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // clap's help/version output is a clean exit, everything else a
            // usage error
            if e.use_stderr() {
                let _ = e.print();
                std::process::exit(1);
            }
            let _ = e.print();
            std::process::exit(0);
        }
    };

    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    if let Err(e) = run(args) {
        log::error!("{}", e);
        std::process::exit(e.exit_code());
    }
}
