//! Rectangle clipping in tile-local coordinates.
//!
//! The renderer translates geometry into a tile's local frame (one tile =
//! `0..4096` units) and clips against the tile square expanded by the layer's
//! buffer. Lines are clipped segment-by-segment (Liang–Barsky) and split
//! into runs where they leave the rectangle; polygon rings go through
//! Sutherland–Hodgman against the four half-planes. Features that span tile
//! boundaries are clipped independently per tile, so they appear in every
//! tile they touch.

/// Square clip window, `min..max` on both axes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipRect {
    pub min: f64,
    pub max: f64,
}

impl ClipRect {
    /// The tile extent expanded by `buffer` units on every side.
    pub fn with_buffer(extent: f64, buffer: f64) -> Self {
        Self {
            min: -buffer,
            max: extent + buffer,
        }
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min && x <= self.max && y >= self.min && y <= self.max
    }

    pub fn width(&self) -> f64 {
        self.max - self.min
    }
}

/// Clip a polyline, splitting it into the runs that cross the rectangle.
///
/// Returns zero or more polylines with at least two points each.
pub fn clip_line(points: &[(f64, f64)], rect: &ClipRect) -> Vec<Vec<(f64, f64)>> {
    let mut runs: Vec<Vec<(f64, f64)>> = Vec::new();
    let mut current: Vec<(f64, f64)> = Vec::new();

    for window in points.windows(2) {
        let (a, b) = (window[0], window[1]);
        match clip_segment(a, b, rect) {
            Some((ca, cb)) => {
                let continues = current
                    .last()
                    .is_some_and(|&last| close(last, ca));
                if !continues {
                    if current.len() >= 2 {
                        runs.push(std::mem::take(&mut current));
                    } else {
                        current.clear();
                    }
                    current.push(ca);
                }
                current.push(cb);
            }
            None => {
                if current.len() >= 2 {
                    runs.push(std::mem::take(&mut current));
                } else {
                    current.clear();
                }
            }
        }
    }
    if current.len() >= 2 {
        runs.push(current);
    }
    runs
}

/// Liang–Barsky segment clip. Returns the clipped endpoints, or `None` when
/// the segment misses the rectangle entirely.
pub fn clip_segment(
    a: (f64, f64),
    b: (f64, f64),
    rect: &ClipRect,
) -> Option<((f64, f64), (f64, f64))> {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let mut t0 = 0.0f64;
    let mut t1 = 1.0f64;

    // p = direction against the edge, q = distance to the edge
    let checks = [
        (-dx, a.0 - rect.min),
        (dx, rect.max - a.0),
        (-dy, a.1 - rect.min),
        (dy, rect.max - a.1),
    ];
    for &(p, q) in &checks {
        if p == 0.0 {
            if q < 0.0 {
                return None; // parallel and outside
            }
        } else {
            let r = q / p;
            if p < 0.0 {
                if r > t1 {
                    return None;
                }
                t0 = t0.max(r);
            } else {
                if r < t0 {
                    return None;
                }
                t1 = t1.min(r);
            }
        }
    }
    if t0 > t1 {
        return None;
    }
    Some((
        (a.0 + t0 * dx, a.1 + t0 * dy),
        (a.0 + t1 * dx, a.1 + t1 * dy),
    ))
}

/// Sutherland–Hodgman ring clip against the rectangle.
///
/// Input and output rings are closed (first point repeated last). Returns an
/// empty vector when the ring lies entirely outside.
pub fn clip_ring(ring: &[(f64, f64)], rect: &ClipRect) -> Vec<(f64, f64)> {
    if ring.len() < 4 {
        return Vec::new();
    }
    // drop the closing point while clipping, re-close at the end
    let mut output: Vec<(f64, f64)> = ring[..ring.len() - 1].to_vec();

    #[derive(Clone, Copy)]
    enum Edge {
        Left,
        Right,
        Bottom,
        Top,
    }

    let inside = |edge: Edge, p: (f64, f64)| -> bool {
        match edge {
            Edge::Left => p.0 >= rect.min,
            Edge::Right => p.0 <= rect.max,
            Edge::Bottom => p.1 >= rect.min,
            Edge::Top => p.1 <= rect.max,
        }
    };
    let intersect = |edge: Edge, a: (f64, f64), b: (f64, f64)| -> (f64, f64) {
        match edge {
            Edge::Left => lerp_x(a, b, rect.min),
            Edge::Right => lerp_x(a, b, rect.max),
            Edge::Bottom => lerp_y(a, b, rect.min),
            Edge::Top => lerp_y(a, b, rect.max),
        }
    };

    for edge in [Edge::Left, Edge::Right, Edge::Bottom, Edge::Top] {
        if output.is_empty() {
            return Vec::new();
        }
        let input = std::mem::take(&mut output);
        let mut prev = *input.last().expect("non-empty ring");
        for current in input {
            let current_in = inside(edge, current);
            let prev_in = inside(edge, prev);
            if current_in {
                if !prev_in {
                    output.push(intersect(edge, prev, current));
                }
                output.push(current);
            } else if prev_in {
                output.push(intersect(edge, prev, current));
            }
            prev = current;
        }
    }

    // drop consecutive duplicates the edge intersections can introduce
    output.dedup_by(|a, b| close(*a, *b));
    if output.len() < 3 {
        return Vec::new();
    }
    let first = output[0];
    output.push(first);
    output
}

fn lerp_x(a: (f64, f64), b: (f64, f64), x: f64) -> (f64, f64) {
    let t = (x - a.0) / (b.0 - a.0);
    (x, a.1 + t * (b.1 - a.1))
}

fn lerp_y(a: (f64, f64), b: (f64, f64), y: f64) -> (f64, f64) {
    let t = (y - a.1) / (b.1 - a.1);
    (a.0 + t * (b.0 - a.0), y)
}

fn close(a: (f64, f64), b: (f64, f64)) -> bool {
    (a.0 - b.0).abs() < 1e-9 && (a.1 - b.1).abs() < 1e-9
}

/// Signed shoelace area of a closed ring. Positive for counter-clockwise
/// rings in a y-up frame.
pub fn ring_area(ring: &[(f64, f64)]) -> f64 {
    if ring.len() < 4 {
        return 0.0;
    }
    let mut sum = 0.0;
    for window in ring.windows(2) {
        let (a, b) = (window[0], window[1]);
        sum += a.0 * b.1 - b.0 * a.1;
    }
    sum / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect() -> ClipRect {
        ClipRect { min: 0.0, max: 100.0 }
    }

    #[test]
    fn test_clip_rect_with_buffer() {
        let r = ClipRect::with_buffer(4096.0, 64.0);
        assert_eq!(r.min, -64.0);
        assert_eq!(r.max, 4160.0);
        assert!(r.contains(-64.0, 4160.0));
        assert!(!r.contains(-65.0, 0.0));
    }

    #[test]
    fn test_segment_fully_inside() {
        let clipped = clip_segment((10.0, 10.0), (90.0, 90.0), &rect()).unwrap();
        assert_eq!(clipped, ((10.0, 10.0), (90.0, 90.0)));
    }

    #[test]
    fn test_segment_fully_outside() {
        assert!(clip_segment((-10.0, -10.0), (-5.0, -20.0), &rect()).is_none());
        // diagonal passing wide of the corner
        assert!(clip_segment((150.0, 90.0), (90.0, 150.0), &rect()).is_none());
    }

    #[test]
    fn test_segment_crossing_is_trimmed_to_the_boundary() {
        let ((ax, ay), (bx, by)) = clip_segment((-50.0, 50.0), (150.0, 50.0), &rect()).unwrap();
        assert_eq!((ax, ay), (0.0, 50.0));
        assert_eq!((bx, by), (100.0, 50.0));
    }

    #[test]
    fn test_clip_line_splits_into_runs() {
        // zig-zag that leaves and re-enters the rectangle
        let points = [
            (10.0, 50.0),
            (110.0, 50.0), // exits right
            (110.0, 60.0),
            (10.0, 60.0), // re-enters
        ];
        let runs = clip_line(&points, &rect());
        assert_eq!(runs.len(), 2, "expected two runs, got {:?}", runs);
        assert_eq!(runs[0].first(), Some(&(10.0, 50.0)));
        assert_eq!(runs[0].last(), Some(&(100.0, 50.0)));
        assert_eq!(runs[1].first(), Some(&(100.0, 60.0)));
        assert_eq!(runs[1].last(), Some(&(10.0, 60.0)));
    }

    #[test]
    fn test_clip_line_keeps_contiguous_path_as_one_run() {
        let points = [(10.0, 10.0), (50.0, 50.0), (90.0, 10.0)];
        let runs = clip_line(&points, &rect());
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].len(), 3);
    }

    #[test]
    fn test_ring_fully_inside_unchanged() {
        let ring = [(10.0, 10.0), (90.0, 10.0), (90.0, 90.0), (10.0, 90.0), (10.0, 10.0)];
        let clipped = clip_ring(&ring, &rect());
        assert_eq!(clipped.len(), 5);
        assert!((ring_area(&clipped).abs() - 6400.0).abs() < 1e-6);
    }

    #[test]
    fn test_ring_fully_outside_is_dropped() {
        let ring = [
            (200.0, 200.0),
            (300.0, 200.0),
            (300.0, 300.0),
            (200.0, 300.0),
            (200.0, 200.0),
        ];
        assert!(clip_ring(&ring, &rect()).is_empty());
    }

    #[test]
    fn test_ring_covering_rect_clips_to_rect() {
        // ring much larger than the window clips to the full window
        let ring = [
            (-1000.0, -1000.0),
            (1000.0, -1000.0),
            (1000.0, 1000.0),
            (-1000.0, 1000.0),
            (-1000.0, -1000.0),
        ];
        let clipped = clip_ring(&ring, &rect());
        assert!((ring_area(&clipped).abs() - 10_000.0).abs() < 1e-6);
        for &(x, y) in &clipped {
            assert!(rect().contains(x, y));
        }
    }

    #[test]
    fn test_ring_partial_overlap() {
        // square overlapping the right half of the window
        let ring = [(50.0, 20.0), (150.0, 20.0), (150.0, 80.0), (50.0, 80.0), (50.0, 20.0)];
        let clipped = clip_ring(&ring, &rect());
        // clipped to 50..100 x 20..80
        assert!((ring_area(&clipped).abs() - 3000.0).abs() < 1e-6);
    }

    #[test]
    fn test_ring_area_sign_tracks_winding() {
        let ccw = [(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0), (0.0, 0.0)];
        let cw: Vec<(f64, f64)> = ccw.iter().rev().copied().collect();
        assert!(ring_area(&ccw) > 0.0);
        assert!(ring_area(&cw) < 0.0);
    }

    #[test]
    fn test_degenerate_ring_yields_nothing() {
        assert!(clip_ring(&[(0.0, 0.0), (1.0, 1.0)], &rect()).is_empty());
    }
}
