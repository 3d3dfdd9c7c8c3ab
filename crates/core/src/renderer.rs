//! Turning one source feature into per-tile render records.
//!
//! For every feature the profile emits, the renderer walks the requested
//! zoom range and, at each zoom:
//!
//! 1. projects the geometry to Web Mercator "tile units" (one tile = 1.0)
//! 2. simplifies to the layer's pixel tolerance
//! 3. drops features below the layer's minimum pixel size (optionally
//!    collapsing to a centroid point instead)
//! 4. finds the covered tiles: the single buffered tile for points, the
//!    tiles along each segment for lines, and a per-row slab walk for
//!    polygons
//! 5. clips into each tile's buffered local frame, quantizes to integer
//!    tile coordinates, and emits a [`RenderedFeature`] with its packed
//!    sort key
//!
//! A polygon whose clipped ring fills the whole buffered tile square is
//! marked as a fill so downstream stages can deduplicate or skip it.

use std::collections::BTreeSet;
use std::sync::Arc;

use geo::algorithm::{Centroid, EuclideanLength, InteriorPoint, MapCoords};
use geo::{Coord, Geometry};

use crate::clip::{clip_line, clip_ring, ring_area, ClipRect};
use crate::feature::{AttrValue, GeometryType, RenderedFeature};
use crate::feature_group::LayerRegistry;
use crate::profile::{EmittedFeature, FeatureEmitter, GeometryKind, Profile};
use crate::simplify::{simplify, SimplifyMethod};
use crate::sort_key::SortKey;
use crate::source::SourceFeature;
use crate::tile::{lat_to_world_y, lng_to_world_x, tile_range_for_bounds, TileCoord, TileOrder};
use crate::{Config, Result, EXTENT};

/// Pixels per tile edge at display scale; buffers and tolerances are
/// expressed in these units.
const TILE_PIXELS: f64 = 256.0;

/// Renders profile emissions into sort-ready records.
///
/// One renderer per worker thread; the only cross-thread state is the shared
/// layer registry.
pub struct FeatureRenderer {
    config: Config,
    profile: Arc<dyn Profile>,
    registry: Arc<LayerRegistry>,
    order: TileOrder,
    next_feature_order: u8,
}

impl FeatureRenderer {
    pub fn new(
        config: Config,
        profile: Arc<dyn Profile>,
        registry: Arc<LayerRegistry>,
        order: TileOrder,
    ) -> Self {
        Self {
            config,
            profile,
            registry,
            order,
            next_feature_order: 0,
        }
    }

    /// Render one source feature, pushing every produced record into `sink`.
    pub fn render_feature(
        &mut self,
        source: &SourceFeature,
        sink: &mut dyn FnMut(RenderedFeature) -> Result<()>,
    ) -> Result<()> {
        if !self.profile.cares_about_source(&source.source) {
            return Ok(());
        }
        let mut emitter = FeatureEmitter::new();
        self.profile.process_feature(source, &mut emitter);
        for emitted in emitter.take() {
            self.render_emitted(source, &emitted, sink)?;
        }
        Ok(())
    }

    fn render_emitted(
        &mut self,
        source: &SourceFeature,
        emitted: &EmittedFeature,
        sink: &mut dyn FnMut(RenderedFeature) -> Result<()>,
    ) -> Result<()> {
        let geometry = match select_geometry(&source.geometry, emitted.kind) {
            Some(g) => g,
            None => {
                log::debug!(
                    "feature {} in {}: geometry kind {:?} incompatible with source geometry, skipped",
                    source.id,
                    source.source,
                    emitted.kind
                );
                return Ok(());
            }
        };
        let world = geometry.map_coords(|c| Coord {
            x: lng_to_world_x(c.x),
            y: lat_to_world_y(c.y),
        });

        let layer_id = self.registry.layer_id(&emitted.layer);
        let feature_order = self.next_feature_order;
        self.next_feature_order = self.next_feature_order.wrapping_add(1);

        let min_zoom = emitted.min_zoom.max(self.config.min_zoom);
        let max_zoom = emitted.max_zoom.min(self.config.max_zoom);
        for zoom in min_zoom..=max_zoom {
            self.render_at_zoom(emitted, &world, zoom, layer_id, feature_order, sink)?;
        }
        Ok(())
    }

    fn render_at_zoom(
        &self,
        emitted: &EmittedFeature,
        world: &Geometry<f64>,
        zoom: u8,
        layer_id: u8,
        feature_order: u8,
        sink: &mut dyn FnMut(RenderedFeature) -> Result<()>,
    ) -> Result<()> {
        let n = 1u32 << zoom;
        let scale = n as f64;
        let scaled = world.map_coords(|c| Coord {
            x: c.x * scale,
            y: c.y * scale,
        });

        let tolerance = emitted.pixel_tolerance.at(zoom) / TILE_PIXELS;
        let simplified = simplify(&scaled, tolerance, SimplifyMethod::DouglasPeucker);

        let attrs = self.resolve_attrs(emitted, layer_id, zoom);
        let ctx = EmitContext {
            emitted,
            zoom,
            layer_id,
            feature_order,
            attrs,
            buffer_units: emitted.buffer_pixels.at(zoom) / TILE_PIXELS,
            tile_range: tile_range_for_bounds(&self.config.bounds, zoom),
            n,
        };

        match classify(&simplified) {
            GeometryClass::Points(points) => self.emit_points(&ctx, &points, sink),
            GeometryClass::Lines(parts) => {
                let length_px = line_length(&parts) * TILE_PIXELS;
                if length_px < emitted.min_pixel_size.at(zoom) {
                    return self.emit_collapsed(&ctx, &simplified, sink);
                }
                self.emit_lines(&ctx, &parts, sink)
            }
            GeometryClass::Polygons(polygons) => {
                let area: f64 = polygons.iter().map(polygon_area).sum();
                if area.sqrt() * TILE_PIXELS < emitted.min_pixel_size.at(zoom) {
                    return self.emit_collapsed(&ctx, &simplified, sink);
                }
                self.emit_polygons(&ctx, &polygons, sink)
            }
            GeometryClass::Empty => Ok(()),
        }
    }

    fn resolve_attrs(
        &self,
        emitted: &EmittedFeature,
        layer_id: u8,
        zoom: u8,
    ) -> Vec<(u32, AttrValue)> {
        emitted
            .attrs_at_zoom(zoom)
            .map(|(key, value)| {
                (
                    self.registry.key_id_for_value(layer_id, key, Some(value)),
                    value.clone(),
                )
            })
            .collect()
    }

    /// Replace a degenerate geometry with its centroid point when the layer
    /// asked to keep collapsed features.
    fn emit_collapsed(
        &self,
        ctx: &EmitContext,
        scaled: &Geometry<f64>,
        sink: &mut dyn FnMut(RenderedFeature) -> Result<()>,
    ) -> Result<()> {
        if !ctx.emitted.keep_collapsed {
            return Ok(());
        }
        if let Some(center) = scaled.centroid() {
            self.emit_points(ctx, &[(center.x(), center.y())], sink)?;
        }
        Ok(())
    }

    fn emit_points(
        &self,
        ctx: &EmitContext,
        points: &[(f64, f64)],
        sink: &mut dyn FnMut(RenderedFeature) -> Result<()>,
    ) -> Result<()> {
        let mut covered: BTreeSet<(u32, u32)> = BTreeSet::new();
        for &(wx, wy) in points {
            for (tx, ty) in ctx.tiles_near(wx, wy) {
                covered.insert((tx, ty));
            }
        }

        for (tx, ty) in covered {
            let rect = ctx.clip_rect();
            let local: Vec<(i32, i32)> = points
                .iter()
                .filter_map(|&(wx, wy)| {
                    let lx = (wx - tx as f64) * EXTENT as f64;
                    let ly = (wy - ty as f64) * EXTENT as f64;
                    rect.contains(lx, ly)
                        .then(|| (lx.round() as i32, ly.round() as i32))
                })
                .collect();
            if local.is_empty() {
                continue;
            }

            let grid_size = ctx.emitted.label_grid_size.at(ctx.zoom);
            let label_grid_cell = (grid_size > 0.0).then(|| {
                // grid cells are computed in world pixels so neighbors on
                // either side of a tile edge share a cell
                let (wx, wy) = points[0];
                let gx = (wx * TILE_PIXELS / grid_size).floor() as i64 as u64;
                let gy = (wy * TILE_PIXELS / grid_size).floor() as i64 as u64;
                gx << 32 | (gy & 0xFFFF_FFFF)
            });

            let geometry_type = if local.len() > 1 {
                GeometryType::MultiPoint
            } else {
                GeometryType::Point
            };
            let parts = vec![local];
            self.emit(ctx, TileCoord::new(tx, ty, ctx.zoom), geometry_type, parts, false, label_grid_cell, sink)?;
        }
        Ok(())
    }

    fn emit_lines(
        &self,
        ctx: &EmitContext,
        parts: &[Vec<(f64, f64)>],
        sink: &mut dyn FnMut(RenderedFeature) -> Result<()>,
    ) -> Result<()> {
        // walk each segment's buffered bounding box to find covered tiles
        let mut covered: BTreeSet<(u32, u32)> = BTreeSet::new();
        for part in parts {
            for window in part.windows(2) {
                let (a, b) = (window[0], window[1]);
                let x_lo = a.0.min(b.0) - ctx.buffer_units;
                let x_hi = a.0.max(b.0) + ctx.buffer_units;
                let y_lo = a.1.min(b.1) - ctx.buffer_units;
                let y_hi = a.1.max(b.1) + ctx.buffer_units;
                for tx in ctx.clamp_x(x_lo)..=ctx.clamp_x(x_hi) {
                    for ty in ctx.clamp_y(y_lo)..=ctx.clamp_y(y_hi) {
                        covered.insert((tx, ty));
                    }
                }
            }
        }

        let rect = ctx.clip_rect();
        for (tx, ty) in covered {
            if !ctx.in_bounds(tx, ty) {
                continue;
            }
            let mut runs: Vec<Vec<(i32, i32)>> = Vec::new();
            for part in parts {
                let local: Vec<(f64, f64)> = part
                    .iter()
                    .map(|&(wx, wy)| {
                        (
                            (wx - tx as f64) * EXTENT as f64,
                            (wy - ty as f64) * EXTENT as f64,
                        )
                    })
                    .collect();
                for run in clip_line(&local, &rect) {
                    let quantized = quantize(&run);
                    if quantized.len() >= 2 {
                        runs.push(quantized);
                    }
                }
            }
            if runs.is_empty() {
                continue;
            }
            let geometry_type = if runs.len() > 1 {
                GeometryType::MultiLine
            } else {
                GeometryType::Line
            };
            self.emit(ctx, TileCoord::new(tx, ty, ctx.zoom), geometry_type, runs, false, None, sink)?;
        }
        Ok(())
    }

    fn emit_polygons(
        &self,
        ctx: &EmitContext,
        polygons: &[PolygonParts],
        sink: &mut dyn FnMut(RenderedFeature) -> Result<()>,
    ) -> Result<()> {
        let rect = ctx.clip_rect();
        let rect_area = rect.width() * rect.width();

        let mut covered: BTreeSet<(u32, u32)> = BTreeSet::new();
        for polygon in polygons {
            // slab walk: each tile row's covered columns are bounded by the
            // exterior edges crossing that row band
            let (y_lo, y_hi) = part_y_extent(&polygon.exterior, ctx.buffer_units);
            for ty in ctx.clamp_y(y_lo)..=ctx.clamp_y(y_hi) {
                let band_lo = ty as f64 - ctx.buffer_units;
                let band_hi = ty as f64 + 1.0 + ctx.buffer_units;
                if let Some((x_lo, x_hi)) =
                    slab_x_extent(&polygon.exterior, band_lo, band_hi)
                {
                    for tx in ctx.clamp_x(x_lo - ctx.buffer_units)..=ctx.clamp_x(x_hi + ctx.buffer_units) {
                        covered.insert((tx, ty));
                    }
                }
            }
        }

        for (tx, ty) in covered {
            if !ctx.in_bounds(tx, ty) {
                continue;
            }
            let mut rings: Vec<Vec<(i32, i32)>> = Vec::new();
            let mut exterior_count = 0usize;
            let mut all_fill = true;
            let mut hole_covers_tile = false;

            for polygon in polygons {
                let exterior = clip_local_ring(&polygon.exterior, tx, ty, &rect);
                if exterior.is_empty() {
                    continue;
                }
                let mut clipped_holes = Vec::new();
                for hole in &polygon.holes {
                    let clipped = clip_local_ring(hole, tx, ty, &rect);
                    if clipped.is_empty() {
                        continue;
                    }
                    if (ring_area(&clipped).abs() - rect_area).abs() < 1e-6 {
                        // the hole swallows the whole tile
                        hole_covers_tile = true;
                        break;
                    }
                    clipped_holes.push(clipped);
                }
                if hole_covers_tile {
                    hole_covers_tile = false;
                    continue;
                }

                // a ring covering the whole tile square is snapped to the
                // canonical buffered rectangle so every filled tile encodes
                // to identical bytes
                let is_fill = clipped_holes.is_empty() && ring_is_tile_fill(&exterior);
                let quantized = if is_fill {
                    canonical_fill_ring(&rect)
                } else {
                    orient_ring(quantize_ring(&exterior), true)
                };
                if quantized.len() < 4 {
                    continue;
                }
                exterior_count += 1;
                all_fill &= is_fill;
                rings.push(quantized);
                for hole in &clipped_holes {
                    let q = orient_ring(quantize_ring(hole), false);
                    if q.len() >= 4 {
                        rings.push(q);
                    }
                }
            }

            if exterior_count == 0 {
                continue;
            }
            let geometry_type = if exterior_count > 1 {
                GeometryType::MultiPolygon
            } else {
                GeometryType::Polygon
            };
            self.emit(
                ctx,
                TileCoord::new(tx, ty, ctx.zoom),
                geometry_type,
                rings,
                all_fill,
                None,
                sink,
            )?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn emit(
        &self,
        ctx: &EmitContext,
        coord: TileCoord,
        geometry_type: GeometryType,
        geometry: Vec<Vec<(i32, i32)>>,
        is_fill: bool,
        label_grid_cell: Option<u64>,
        sink: &mut dyn FnMut(RenderedFeature) -> Result<()>,
    ) -> Result<()> {
        let tile_id = self.order.encode(coord);
        let sort_key = SortKey::pack(
            tile_id,
            ctx.layer_id,
            ctx.emitted.sort_key,
            ctx.feature_order,
        );
        sink(RenderedFeature {
            sort_key,
            geometry_type,
            geometry,
            attrs: ctx.attrs.clone(),
            id: ctx.emitted.id,
            is_fill,
            label_grid_cell,
        })
    }
}

/// Per-(feature, zoom) state shared by the emit paths.
struct EmitContext<'a> {
    emitted: &'a EmittedFeature,
    zoom: u8,
    layer_id: u8,
    feature_order: u8,
    attrs: Vec<(u32, AttrValue)>,
    buffer_units: f64,
    tile_range: (
        std::ops::RangeInclusive<u32>,
        std::ops::RangeInclusive<u32>,
    ),
    n: u32,
}

impl EmitContext<'_> {
    fn clip_rect(&self) -> ClipRect {
        ClipRect::with_buffer(EXTENT as f64, self.buffer_units * EXTENT as f64)
    }

    fn clamp_x(&self, v: f64) -> u32 {
        (v.floor() as i64).clamp(0, (self.n - 1) as i64) as u32
    }

    fn clamp_y(&self, v: f64) -> u32 {
        (v.floor() as i64).clamp(0, (self.n - 1) as i64) as u32
    }

    fn in_bounds(&self, tx: u32, ty: u32) -> bool {
        self.tile_range.0.contains(&tx) && self.tile_range.1.contains(&ty)
    }

    /// Tiles whose buffered extent contains the point.
    fn tiles_near(&self, wx: f64, wy: f64) -> Vec<(u32, u32)> {
        let mut tiles = Vec::with_capacity(1);
        for tx in self.clamp_x(wx - self.buffer_units)..=self.clamp_x(wx + self.buffer_units) {
            for ty in self.clamp_y(wy - self.buffer_units)..=self.clamp_y(wy + self.buffer_units) {
                if self.in_bounds(tx, ty) {
                    tiles.push((tx, ty));
                }
            }
        }
        tiles
    }
}

/// Tile-unit polygon with its exterior and holes as closed rings.
struct PolygonParts {
    exterior: Vec<(f64, f64)>,
    holes: Vec<Vec<(f64, f64)>>,
}

enum GeometryClass {
    Points(Vec<(f64, f64)>),
    Lines(Vec<Vec<(f64, f64)>>),
    Polygons(Vec<PolygonParts>),
    Empty,
}

fn coords(line: &geo::LineString<f64>) -> Vec<(f64, f64)> {
    line.0.iter().map(|c| (c.x, c.y)).collect()
}

fn classify(geometry: &Geometry<f64>) -> GeometryClass {
    match geometry {
        Geometry::Point(p) => GeometryClass::Points(vec![(p.x(), p.y())]),
        Geometry::MultiPoint(mp) => {
            GeometryClass::Points(mp.0.iter().map(|p| (p.x(), p.y())).collect())
        }
        Geometry::LineString(ls) => GeometryClass::Lines(vec![coords(ls)]),
        Geometry::MultiLineString(mls) => {
            GeometryClass::Lines(mls.0.iter().map(coords).collect())
        }
        Geometry::Polygon(p) => GeometryClass::Polygons(vec![PolygonParts {
            exterior: coords(p.exterior()),
            holes: p.interiors().iter().map(coords).collect(),
        }]),
        Geometry::MultiPolygon(mp) => GeometryClass::Polygons(
            mp.0.iter()
                .map(|p| PolygonParts {
                    exterior: coords(p.exterior()),
                    holes: p.interiors().iter().map(coords).collect(),
                })
                .collect(),
        ),
        _ => GeometryClass::Empty,
    }
}

/// Derive the geometry the profile asked for, or `None` when the kinds are
/// incompatible (e.g. rendering a point source as polygons).
fn select_geometry(geometry: &Geometry<f64>, kind: GeometryKind) -> Option<Geometry<f64>> {
    match kind {
        GeometryKind::Point => match geometry {
            Geometry::Point(_) | Geometry::MultiPoint(_) => Some(geometry.clone()),
            _ => None,
        },
        GeometryKind::Line => match geometry {
            Geometry::LineString(_) | Geometry::MultiLineString(_) => Some(geometry.clone()),
            _ => None,
        },
        GeometryKind::Polygon => match geometry {
            Geometry::Polygon(_) | Geometry::MultiPolygon(_) => Some(geometry.clone()),
            _ => None,
        },
        GeometryKind::Centroid => geometry.centroid().map(Geometry::Point),
        GeometryKind::PointOnSurface => geometry.interior_point().map(Geometry::Point),
    }
}

fn line_length(parts: &[Vec<(f64, f64)>]) -> f64 {
    parts
        .iter()
        .map(|part| {
            geo::LineString::from(part.iter().map(|&(x, y)| Coord { x, y }).collect::<Vec<_>>())
                .euclidean_length()
        })
        .sum()
}

fn polygon_area(polygon: &PolygonParts) -> f64 {
    let exterior = ring_area(&polygon.exterior).abs();
    let holes: f64 = polygon.holes.iter().map(|h| ring_area(h).abs()).sum();
    (exterior - holes).max(0.0)
}

fn part_y_extent(ring: &[(f64, f64)], buffer: f64) -> (f64, f64) {
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for &(_, y) in ring {
        lo = lo.min(y);
        hi = hi.max(y);
    }
    (lo - buffer, hi + buffer)
}

/// X extent of the ring within one horizontal band: the slab step of the
/// coverage walk. Edges are clipped parametrically to the band and their x
/// span accumulated.
fn slab_x_extent(ring: &[(f64, f64)], band_lo: f64, band_hi: f64) -> Option<(f64, f64)> {
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for window in ring.windows(2) {
        let ((x1, y1), (x2, y2)) = (window[0], window[1]);
        let (y_min, y_max) = (y1.min(y2), y1.max(y2));
        if y_max < band_lo || y_min > band_hi {
            continue;
        }
        if (y2 - y1).abs() < f64::EPSILON {
            lo = lo.min(x1.min(x2));
            hi = hi.max(x1.max(x2));
            continue;
        }
        // clip the edge's parameter range to the band
        let t_at = |y: f64| (y - y1) / (y2 - y1);
        let (mut t0, mut t1) = (t_at(band_lo).clamp(0.0, 1.0), t_at(band_hi).clamp(0.0, 1.0));
        if t0 > t1 {
            std::mem::swap(&mut t0, &mut t1);
        }
        let xa = x1 + t0 * (x2 - x1);
        let xb = x1 + t1 * (x2 - x1);
        lo = lo.min(xa.min(xb));
        hi = hi.max(xa.max(xb));
    }
    (lo <= hi).then_some((lo, hi))
}

/// Clipped ring that is an axis-aligned rectangle covering at least the
/// whole unbuffered tile square: the tile renders as a solid fill.
fn ring_is_tile_fill(ring: &[(f64, f64)]) -> bool {
    if ring.len() != 5 {
        return false;
    }
    for window in ring.windows(2) {
        let ((x1, y1), (x2, y2)) = (window[0], window[1]);
        if (x1 - x2).abs() > 1e-9 && (y1 - y2).abs() > 1e-9 {
            return false; // not axis-aligned
        }
    }
    let xs: Vec<f64> = ring.iter().map(|p| p.0).collect();
    let ys: Vec<f64> = ring.iter().map(|p| p.1).collect();
    let (x_min, x_max) = (xs.iter().cloned().fold(f64::INFINITY, f64::min), xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max));
    let (y_min, y_max) = (ys.iter().cloned().fold(f64::INFINITY, f64::min), ys.iter().cloned().fold(f64::NEG_INFINITY, f64::max));
    let extent = EXTENT as f64;
    x_min <= 1e-9 && y_min <= 1e-9 && x_max >= extent - 1e-9 && y_max >= extent - 1e-9
}

/// The buffered tile rectangle as a closed clockwise ring (screen frame).
fn canonical_fill_ring(rect: &ClipRect) -> Vec<(i32, i32)> {
    let lo = rect.min.round() as i32;
    let hi = rect.max.round() as i32;
    vec![(lo, lo), (hi, lo), (hi, hi), (lo, hi), (lo, lo)]
}

fn clip_local_ring(
    ring: &[(f64, f64)],
    tx: u32,
    ty: u32,
    rect: &ClipRect,
) -> Vec<(f64, f64)> {
    let local: Vec<(f64, f64)> = ring
        .iter()
        .map(|&(wx, wy)| {
            (
                (wx - tx as f64) * EXTENT as f64,
                (wy - ty as f64) * EXTENT as f64,
            )
        })
        .collect();
    clip_ring(&local, rect)
}

fn quantize(points: &[(f64, f64)]) -> Vec<(i32, i32)> {
    let mut out: Vec<(i32, i32)> = Vec::with_capacity(points.len());
    for &(x, y) in points {
        let q = (x.round() as i32, y.round() as i32);
        if out.last() != Some(&q) {
            out.push(q);
        }
    }
    out
}

/// Force a quantized ring's winding: exteriors positive under the
/// surveyor's formula in tile coordinates, holes negative (the wire-format
/// convention the encoder relies on to tell ring roles apart).
fn orient_ring(mut ring: Vec<(i32, i32)>, positive: bool) -> Vec<(i32, i32)> {
    let mut sum = 0i64;
    for window in ring.windows(2) {
        let ((x1, y1), (x2, y2)) = (window[0], window[1]);
        sum += x1 as i64 * y2 as i64 - x2 as i64 * y1 as i64;
    }
    if (sum > 0) != positive && sum != 0 {
        ring.reverse();
    }
    ring
}

fn quantize_ring(ring: &[(f64, f64)]) -> Vec<(i32, i32)> {
    let mut out = quantize(ring);
    // keep the ring closed after rounding
    if out.len() >= 3 && out.first() != out.last() {
        let first = out[0];
        out.push(first);
    }
    out
}
