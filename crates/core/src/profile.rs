//! The profile contract and the feature emitter it writes into.
//!
//! A profile decides which source features appear on the map and how. The
//! engine calls [`Profile::process_feature`] once per source feature with a
//! [`FeatureEmitter`]; the profile calls `point`/`line`/`polygon` on the
//! emitter and configures the returned [`EmittedFeature`] in place. The
//! engine buffers the emissions, renders them into per-tile records, and
//! later hands each tile's layers back through
//! [`Profile::post_process_layer_features`].

use crate::feature::{AttrValue, RenderedFeature};
use crate::source::SourceFeature;
use crate::sort_key::{SORT_ORDER_MAX, SORT_ORDER_MIN};
use crate::{Result, MAX_ZOOM};

/// How the profile wants a source geometry rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryKind {
    Point,
    Line,
    Polygon,
    /// Single point at the geometry's centroid
    Centroid,
    /// Single point guaranteed to lie inside the geometry
    PointOnSurface,
}

/// A numeric render option that can vary by zoom level.
#[derive(Debug, Clone)]
pub struct ZoomOption {
    base: f64,
    overrides: Vec<(u8, f64)>,
}

impl ZoomOption {
    pub fn constant(base: f64) -> Self {
        Self {
            base,
            overrides: Vec::new(),
        }
    }

    /// Override the value at one zoom level.
    pub fn with_override(mut self, zoom: u8, value: f64) -> Self {
        self.overrides.retain(|(z, _)| *z != zoom);
        self.overrides.push((zoom, value));
        self
    }

    pub fn at(&self, zoom: u8) -> f64 {
        self.overrides
            .iter()
            .find(|(z, _)| *z == zoom)
            .map_or(self.base, |(_, v)| *v)
    }
}

/// One output feature the profile asked for, with its render options.
///
/// Returned by the emitter's geometry methods; configure it with the
/// builder-style setters before `process_feature` returns.
#[derive(Debug, Clone)]
pub struct EmittedFeature {
    pub layer: String,
    pub kind: GeometryKind,
    pub min_zoom: u8,
    pub max_zoom: u8,
    /// Clip buffer around each tile, in 256ths of a tile ("pixels")
    pub buffer_pixels: ZoomOption,
    /// Features smaller than this many pixels are dropped
    pub min_pixel_size: ZoomOption,
    /// Simplification tolerance in pixels
    pub pixel_tolerance: ZoomOption,
    /// Label grid cell size in pixels; 0 disables the grid
    pub label_grid_size: ZoomOption,
    /// Lower values render first within a layer
    pub sort_key: i32,
    /// Feature id to carry into the wire format
    pub id: Option<u64>,
    /// Emit a centroid point when the geometry collapses below the minimum
    /// pixel size
    pub keep_collapsed: bool,
    pub(crate) attrs: Vec<(String, AttrValue, u8)>,
}

/// Default minimum pixel size: one wire-format unit at 256px tile scale.
pub const DEFAULT_MIN_PIXEL_SIZE: f64 = 256.0 / 4096.0;

impl EmittedFeature {
    fn new(layer: String, kind: GeometryKind) -> Self {
        Self {
            layer,
            kind,
            min_zoom: 0,
            max_zoom: MAX_ZOOM,
            buffer_pixels: ZoomOption::constant(4.0),
            min_pixel_size: ZoomOption::constant(DEFAULT_MIN_PIXEL_SIZE),
            pixel_tolerance: ZoomOption::constant(0.1),
            label_grid_size: ZoomOption::constant(0.0),
            sort_key: 0,
            id: None,
            keep_collapsed: false,
            attrs: Vec::new(),
        }
    }

    pub fn with_zoom_range(&mut self, min_zoom: u8, max_zoom: u8) -> &mut Self {
        self.min_zoom = min_zoom;
        self.max_zoom = max_zoom.min(MAX_ZOOM);
        self
    }

    pub fn with_buffer_pixels(&mut self, pixels: f64) -> &mut Self {
        self.buffer_pixels = ZoomOption::constant(pixels);
        self
    }

    pub fn with_min_pixel_size(&mut self, pixels: f64) -> &mut Self {
        self.min_pixel_size = ZoomOption::constant(pixels);
        self
    }

    pub fn with_pixel_tolerance(&mut self, pixels: f64) -> &mut Self {
        self.pixel_tolerance = ZoomOption::constant(pixels);
        self
    }

    pub fn with_label_grid_size(&mut self, pixels: f64) -> &mut Self {
        self.label_grid_size = ZoomOption::constant(pixels);
        self
    }

    /// Set the within-layer sort order; lower renders first. Clamped to the
    /// 16-bit field of the packed sort key.
    pub fn with_sort_key(&mut self, sort_key: i32) -> &mut Self {
        self.sort_key = sort_key.clamp(SORT_ORDER_MIN, SORT_ORDER_MAX);
        self
    }

    pub fn with_id(&mut self, id: u64) -> &mut Self {
        self.id = Some(id);
        self
    }

    pub fn with_keep_collapsed(&mut self, keep: bool) -> &mut Self {
        self.keep_collapsed = keep;
        self
    }

    /// Attach an attribute at every zoom.
    pub fn attr(&mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> &mut Self {
        self.attrs.push((key.into(), value.into(), 0));
        self
    }

    /// Attach an attribute only at `min_zoom` and above.
    pub fn attr_with_min_zoom(
        &mut self,
        key: impl Into<String>,
        value: impl Into<AttrValue>,
        min_zoom: u8,
    ) -> &mut Self {
        self.attrs.push((key.into(), value.into(), min_zoom));
        self
    }

    /// Attributes visible at the given zoom.
    pub fn attrs_at_zoom(&self, zoom: u8) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.attrs
            .iter()
            .filter(move |(_, _, min)| *min <= zoom)
            .map(|(k, v, _)| (k.as_str(), v))
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::String(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::String(s)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Long(v)
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Double(v)
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Bool(v)
    }
}

/// Collects the output features a profile emits for one source feature.
#[derive(Debug, Default)]
pub struct FeatureEmitter {
    pending: Vec<EmittedFeature>,
}

impl FeatureEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    fn emit(&mut self, layer: &str, kind: GeometryKind) -> &mut EmittedFeature {
        self.pending.push(EmittedFeature::new(layer.to_string(), kind));
        self.pending.last_mut().expect("just pushed")
    }

    /// Emit the feature as points into `layer`.
    pub fn point(&mut self, layer: &str) -> &mut EmittedFeature {
        self.emit(layer, GeometryKind::Point)
    }

    /// Emit the feature as lines into `layer`.
    pub fn line(&mut self, layer: &str) -> &mut EmittedFeature {
        self.emit(layer, GeometryKind::Line)
    }

    /// Emit the feature as polygons into `layer`.
    pub fn polygon(&mut self, layer: &str) -> &mut EmittedFeature {
        self.emit(layer, GeometryKind::Polygon)
    }

    /// Emit a single point at the geometry's centroid.
    pub fn centroid(&mut self, layer: &str) -> &mut EmittedFeature {
        self.emit(layer, GeometryKind::Centroid)
    }

    /// Emit a single point guaranteed to be inside the geometry.
    pub fn point_on_surface(&mut self, layer: &str) -> &mut EmittedFeature {
        self.emit(layer, GeometryKind::PointOnSurface)
    }

    /// Drain everything emitted for the current source feature. Called by
    /// the engine after each `process_feature` invocation.
    pub fn take(&mut self) -> Vec<EmittedFeature> {
        std::mem::take(&mut self.pending)
    }
}

/// Controls how maps are generated: which features to emit, how to
/// post-process each tile layer, and the archive metadata to record.
///
/// Methods may be called concurrently from multiple worker threads.
pub trait Profile: Send + Sync {
    /// Generate output features for one source feature.
    fn process_feature(&self, source: &SourceFeature, emitter: &mut FeatureEmitter);

    /// Transform the features of one layer in one tile before encoding.
    ///
    /// A [`crate::Error::Geometry`] return is recoverable: the engine logs it
    /// and emits the original features unchanged.
    fn post_process_layer_features(
        &self,
        _layer: &str,
        _zoom: u8,
        features: Vec<RenderedFeature>,
    ) -> Result<Vec<RenderedFeature>> {
        Ok(features)
    }

    /// Whether this profile uses features from the named source at all.
    fn cares_about_source(&self, _name: &str) -> bool {
        true
    }

    /// Tileset name for archive metadata.
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn attribution(&self) -> &str {
        ""
    }

    fn version(&self) -> &str {
        ""
    }

    /// Overlay tilesets are rendered on top of a base map.
    fn is_overlay(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emitter_collects_configured_features() {
        let mut emitter = FeatureEmitter::new();
        emitter
            .point("poi")
            .with_zoom_range(4, 14)
            .with_sort_key(-5)
            .with_id(17)
            .attr("kind", "cafe");
        emitter.polygon("water").with_buffer_pixels(8.0);

        let features = emitter.take();
        assert_eq!(features.len(), 2);

        let poi = &features[0];
        assert_eq!(poi.layer, "poi");
        assert_eq!(poi.kind, GeometryKind::Point);
        assert_eq!((poi.min_zoom, poi.max_zoom), (4, 14));
        assert_eq!(poi.sort_key, -5);
        assert_eq!(poi.id, Some(17));

        let water = &features[1];
        assert_eq!(water.kind, GeometryKind::Polygon);
        assert_eq!(water.buffer_pixels.at(9), 8.0);
    }

    #[test]
    fn test_take_drains_the_emitter() {
        let mut emitter = FeatureEmitter::new();
        emitter.line("roads");
        assert_eq!(emitter.take().len(), 1);
        assert!(emitter.take().is_empty());
    }

    #[test]
    fn test_zoom_option_overrides() {
        let opt = ZoomOption::constant(4.0)
            .with_override(12, 16.0)
            .with_override(12, 32.0); // later override wins
        assert_eq!(opt.at(5), 4.0);
        assert_eq!(opt.at(12), 32.0);
    }

    #[test]
    fn test_attrs_respect_min_zoom() {
        let mut emitter = FeatureEmitter::new();
        emitter
            .point("poi")
            .attr("name", "x")
            .attr_with_min_zoom("detail", 42i64, 12);
        let features = emitter.take();

        let at_z8: Vec<&str> = features[0].attrs_at_zoom(8).map(|(k, _)| k).collect();
        assert_eq!(at_z8, vec!["name"]);

        let at_z13: Vec<&str> = features[0].attrs_at_zoom(13).map(|(k, _)| k).collect();
        assert_eq!(at_z13, vec!["name", "detail"]);
    }

    #[test]
    fn test_sort_key_clamps_to_field_width() {
        let mut emitter = FeatureEmitter::new();
        emitter.point("poi").with_sort_key(1_000_000);
        assert_eq!(emitter.take()[0].sort_key, SORT_ORDER_MAX);
    }
}
