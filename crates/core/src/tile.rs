//! Tile coordinate math: Web Mercator projection, tile addressing, and the
//! two archive orderings.
//!
//! A tile is addressed by `(x, y, z)` on the Web Mercator grid. Archives
//! commit to one total ordering over tiles, either [`TileOrder::Tms`]
//! (lexicographic by zoom, column, flipped row) or [`TileOrder::Hilbert`]
//! (Hilbert curve within each zoom level, which keeps spatially adjacent
//! tiles adjacent on disk). Both orderings pack into a dense `u32` id that
//! is monotone in the archive order, so a single integer comparison decides
//! which of two tiles is written first.

use std::f64::consts::PI;

use crate::MAX_ZOOM;

/// Tile coordinates: x, y, and zoom level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    pub x: u32,
    pub y: u32,
    pub z: u8,
}

impl TileCoord {
    /// Create a new tile coordinate.
    ///
    /// Debug-asserts that `x` and `y` fit the grid at zoom `z`.
    pub fn new(x: u32, y: u32, z: u8) -> Self {
        debug_assert!(z <= MAX_ZOOM, "zoom {} out of range", z);
        debug_assert!(x < (1u32 << z), "x {} out of range at z{}", x, z);
        debug_assert!(y < (1u32 << z), "y {} out of range at z{}", y, z);
        Self { x, y, z }
    }

    /// Geographic bounds of this tile in lng/lat degrees.
    pub fn bounds(&self) -> TileBounds {
        let n = (1u32 << self.z) as f64;
        let lng = |x: f64| x / n * 360.0 - 180.0;
        let lat = |y: f64| {
            let y_rad = PI * (1.0 - 2.0 * y / n);
            y_rad.sinh().atan().to_degrees()
        };
        TileBounds {
            lng_min: lng(self.x as f64),
            lat_min: lat(self.y as f64 + 1.0),
            lng_max: lng(self.x as f64 + 1.0),
            lat_max: lat(self.y as f64),
        }
    }
}

impl std::fmt::Display for TileCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// Geographic bounding box in lng/lat degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileBounds {
    pub lng_min: f64,
    pub lat_min: f64,
    pub lng_max: f64,
    pub lat_max: f64,
}

impl Default for TileBounds {
    fn default() -> Self {
        Self::world()
    }
}

impl TileBounds {
    pub fn new(lng_min: f64, lat_min: f64, lng_max: f64, lat_max: f64) -> Self {
        Self {
            lng_min,
            lat_min,
            lng_max,
            lat_max,
        }
    }

    /// The whole world, clamped to the Web Mercator latitude limits.
    pub fn world() -> Self {
        Self::new(-180.0, -85.05112878, 180.0, 85.05112878)
    }

    /// An empty/inverted box that expands from nothing.
    pub fn empty() -> Self {
        Self {
            lng_min: f64::INFINITY,
            lat_min: f64::INFINITY,
            lng_max: f64::NEG_INFINITY,
            lat_max: f64::NEG_INFINITY,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.lng_min <= self.lng_max && self.lat_min <= self.lat_max
    }

    /// Expand this bounding box to include another.
    pub fn expand(&mut self, other: &Self) {
        self.lng_min = self.lng_min.min(other.lng_min);
        self.lat_min = self.lat_min.min(other.lat_min);
        self.lng_max = self.lng_max.max(other.lng_max);
        self.lat_max = self.lat_max.max(other.lat_max);
    }

    pub fn width(&self) -> f64 {
        self.lng_max - self.lng_min
    }

    pub fn height(&self) -> f64 {
        self.lat_max - self.lat_min
    }
}

/// Project longitude to the unit Web Mercator square (0.0 at -180°, 1.0 at +180°).
pub fn lng_to_world_x(lng: f64) -> f64 {
    (lng + 180.0) / 360.0
}

/// Project latitude to the unit Web Mercator square (0.0 at the north limit).
pub fn lat_to_world_y(lat: f64) -> f64 {
    let lat = lat.clamp(-85.05112878, 85.05112878);
    let sin = lat.to_radians().sin();
    0.5 - 0.25 * ((1.0 + sin) / (1.0 - sin)).ln() / PI
}

/// Tile containing a lng/lat position at the given zoom.
pub fn lng_lat_to_tile(lng: f64, lat: f64, zoom: u8) -> TileCoord {
    let n = 1u32 << zoom;
    let max = n - 1;
    let x = ((lng_to_world_x(lng) * n as f64).floor() as i64).clamp(0, max as i64) as u32;
    let y = ((lat_to_world_y(lat) * n as f64).floor() as i64).clamp(0, max as i64) as u32;
    TileCoord::new(x, y, zoom)
}

/// Inclusive tile ranges covering a geographic bounding box at one zoom.
///
/// Returns `(x_min..=x_max, y_min..=y_max)`. Callers iterating the ranges get
/// every tile that intersects the box.
pub fn tile_range_for_bounds(
    bounds: &TileBounds,
    zoom: u8,
) -> (std::ops::RangeInclusive<u32>, std::ops::RangeInclusive<u32>) {
    let min = lng_lat_to_tile(bounds.lng_min, bounds.lat_max, zoom);
    let max = lng_lat_to_tile(bounds.lng_max, bounds.lat_min, zoom);
    (min.x..=max.x, min.y..=max.y)
}

/// Total ordering over tiles that an archive commits to.
///
/// `encode` produces a dense integer id such that `encode(a) < encode(b)` iff
/// tile `a` precedes tile `b` in the archive. All zoom-`z` ids are below all
/// zoom-`z+1` ids under both orderings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TileOrder {
    /// Lexicographic `(z, x, flipped y)`, the natural order for rectangular
    /// row/column archives.
    Tms,
    /// Hilbert curve position within each zoom level, for spatial locality.
    #[default]
    Hilbert,
}

/// Number of tiles on all zoom levels below `z`: sum of 4^i for i < z.
fn level_offset(z: u8) -> u32 {
    (((1u64 << (2 * z)) - 1) / 3) as u32
}

impl TileOrder {
    /// Encode a tile coordinate into its dense archive-order id.
    pub fn encode(&self, coord: TileCoord) -> u32 {
        let n = 1u32 << coord.z;
        debug_assert!(coord.x < n && coord.y < n);
        let index = match self {
            TileOrder::Tms => coord.x as u64 * n as u64 + (n - 1 - coord.y) as u64,
            TileOrder::Hilbert => xy_to_hilbert(coord.z, coord.x, coord.y),
        };
        level_offset(coord.z) + index as u32
    }

    /// Decode a dense archive-order id back into a tile coordinate.
    pub fn decode(&self, id: u32) -> TileCoord {
        let mut z = 0u8;
        while z < MAX_ZOOM && id >= level_offset(z + 1) {
            z += 1;
        }
        let n = 1u32 << z;
        let index = id - level_offset(z);
        match self {
            TileOrder::Tms => {
                let x = index / n;
                let y = n - 1 - (index % n);
                TileCoord::new(x, y, z)
            }
            TileOrder::Hilbert => {
                let (x, y) = hilbert_to_xy(z, index as u64);
                TileCoord::new(x, y, z)
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TileOrder::Tms => "tms",
            TileOrder::Hilbert => "hilbert",
        }
    }
}

/// Position of `(x, y)` on the Hilbert curve filling the 2^z × 2^z grid.
fn xy_to_hilbert(z: u8, mut x: u32, mut y: u32) -> u64 {
    let n = 1u32 << z;
    let mut d = 0u64;
    let mut s = n / 2;
    while s > 0 {
        let rx = u32::from(x & s > 0);
        let ry = u32::from(y & s > 0);
        d += (s as u64) * (s as u64) * ((3 * rx) ^ ry) as u64;
        // rotate the quadrant so the curve stays continuous
        if ry == 0 {
            if rx == 1 {
                x = n - 1 - x;
                y = n - 1 - y;
            }
            std::mem::swap(&mut x, &mut y);
        }
        s /= 2;
    }
    d
}

/// Inverse of [`xy_to_hilbert`].
fn hilbert_to_xy(z: u8, d: u64) -> (u32, u32) {
    let n = 1u32 << z;
    let (mut x, mut y) = (0u32, 0u32);
    let mut t = d;
    let mut s = 1u32;
    while s < n {
        let rx = 1 & (t / 2) as u32;
        let ry = 1 & ((t as u32) ^ rx);
        if ry == 0 {
            if rx == 1 {
                x = s - 1 - x;
                y = s - 1 - y;
            }
            std::mem::swap(&mut x, &mut y);
        }
        x += s * rx;
        y += s * ry;
        t /= 4;
        s *= 2;
    }
    (x, y)
}
