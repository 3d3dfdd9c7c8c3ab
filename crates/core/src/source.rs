//! Source feature contract.
//!
//! Format-specific parsers (OSM PBF, shapefiles, Parquet, ...) live outside
//! this crate; they only need to produce [`SourceFeature`]s through the
//! [`FeatureSource`] trait. The engine treats geometry as opaque lng/lat
//! `geo` types and attributes as a string-keyed map.

use std::collections::HashMap;

use geo::Geometry;

use crate::feature::AttrValue;
use crate::Result;

/// One raw feature from a source dataset, in lng/lat degrees.
#[derive(Debug, Clone)]
pub struct SourceFeature {
    /// Name of the source this feature came from
    pub source: String,
    /// Layer within the source, for multi-layer formats
    pub source_layer: Option<String>,
    pub geometry: Geometry<f64>,
    pub attrs: HashMap<String, AttrValue>,
    /// Stable id from the source, for provenance and wire-format ids
    pub id: u64,
}

impl SourceFeature {
    pub fn new(source: impl Into<String>, id: u64, geometry: Geometry<f64>) -> Self {
        Self {
            source: source.into(),
            source_layer: None,
            geometry,
            attrs: HashMap::new(),
            id,
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: AttrValue) -> Self {
        self.attrs.insert(key.into(), value);
        self
    }

    pub fn with_source_layer(mut self, layer: impl Into<String>) -> Self {
        self.source_layer = Some(layer.into());
        self
    }
}

/// A stream of source features.
///
/// `read` pushes every feature into the sink; a sink error aborts the read.
/// Implementations are driven from a dedicated reader thread each, so they
/// only need to be `Send`.
pub trait FeatureSource: Send {
    fn name(&self) -> &str;

    fn read(&mut self, sink: &mut dyn FnMut(SourceFeature) -> Result<()>) -> Result<()>;
}

/// An in-memory source, used by tests and small programmatic runs.
pub struct MemorySource {
    name: String,
    features: Vec<SourceFeature>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, features: Vec<SourceFeature>) -> Self {
        Self {
            name: name.into(),
            features,
        }
    }
}

impl FeatureSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, sink: &mut dyn FnMut(SourceFeature) -> Result<()>) -> Result<()> {
        for feature in self.features.drain(..) {
            sink(feature)?;
        }
        Ok(())
    }
}
