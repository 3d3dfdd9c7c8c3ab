//! Default profile for the CLI: every source feature lands in one output
//! layer with its attributes copied through.

use geo::Geometry;

use tilefoundry_core::profile::{FeatureEmitter, Profile};
use tilefoundry_core::source::SourceFeature;

pub struct PassthroughProfile {
    layer: String,
}

impl PassthroughProfile {
    pub fn new(layer: &str) -> Self {
        Self {
            layer: layer.to_string(),
        }
    }
}

impl Profile for PassthroughProfile {
    fn process_feature(&self, source: &SourceFeature, emitter: &mut FeatureEmitter) {
        let feature = match source.geometry {
            Geometry::Point(_) | Geometry::MultiPoint(_) => emitter.point(&self.layer),
            Geometry::LineString(_) | Geometry::MultiLineString(_) => emitter.line(&self.layer),
            Geometry::Polygon(_) | Geometry::MultiPolygon(_) => emitter.polygon(&self.layer),
            _ => return,
        };
        feature.with_id(source.id);
        for (key, value) in &source.attrs {
            feature.attr(key.clone(), value.clone());
        }
    }

    fn name(&self) -> &str {
        "passthrough"
    }

    fn description(&self) -> &str {
        "All source features in a single layer"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }
}
