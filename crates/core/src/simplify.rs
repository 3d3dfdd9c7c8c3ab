//! Zoom-based geometry simplification.
//!
//! Before a geometry is split across tiles, it is simplified once per zoom
//! level to roughly tile resolution. Douglas–Peucker (via `geo::Simplify`)
//! is the default; Visvalingam–Whyatt is available for smoother coastline
//! work. Tolerances arrive in pixels and are converted by the caller into
//! the working coordinate space, so this module only deals in absolute
//! units.

use geo::{Geometry, Simplify, SimplifyVw};

/// Simplification algorithm choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimplifyMethod {
    /// Ramer–Douglas–Peucker: keeps points further than the tolerance from
    /// the simplified line.
    #[default]
    DouglasPeucker,
    /// Visvalingam–Whyatt: drops points by effective triangle area, with the
    /// tolerance treated as a length (area = tolerance²).
    VisvalingamWhyatt,
}

/// Simplify a geometry with the given tolerance in coordinate units.
///
/// Points pass through untouched. A non-positive tolerance disables
/// simplification entirely.
pub fn simplify(geom: &Geometry<f64>, tolerance: f64, method: SimplifyMethod) -> Geometry<f64> {
    if tolerance <= 0.0 || tolerance < 1e-12 {
        return geom.clone();
    }
    match method {
        SimplifyMethod::DouglasPeucker => simplify_dp(geom, tolerance),
        SimplifyMethod::VisvalingamWhyatt => simplify_vw(geom, tolerance * tolerance),
    }
}

fn simplify_dp(geom: &Geometry<f64>, tolerance: f64) -> Geometry<f64> {
    match geom {
        Geometry::LineString(ls) => Geometry::LineString(ls.simplify(&tolerance)),
        Geometry::MultiLineString(mls) => Geometry::MultiLineString(mls.simplify(&tolerance)),
        Geometry::Polygon(p) => Geometry::Polygon(p.simplify(&tolerance)),
        Geometry::MultiPolygon(mp) => Geometry::MultiPolygon(mp.simplify(&tolerance)),
        other => other.clone(),
    }
}

fn simplify_vw(geom: &Geometry<f64>, epsilon: f64) -> Geometry<f64> {
    match geom {
        Geometry::LineString(ls) => Geometry::LineString(ls.simplify_vw(&epsilon)),
        Geometry::MultiLineString(mls) => Geometry::MultiLineString(mls.simplify_vw(&epsilon)),
        Geometry::Polygon(p) => Geometry::Polygon(p.simplify_vw(&epsilon)),
        Geometry::MultiPolygon(mp) => Geometry::MultiPolygon(mp.simplify_vw(&epsilon)),
        other => other.clone(),
    }
}
