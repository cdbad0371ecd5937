//! Pure geometry kernel: Bézier sampling, polyline length, nearest-point
//! projection, forward look-ahead slicing, and curvature profiling.
//!
//! Every function here is total and side-effect free — no I/O, no RNG, no
//! wall-clock reads. Numerical thresholds (`seg_len_sq == 0`, the
//! `cos_theta` clamp to `[-1, 1]`) are kept exact so coverage counts stay
//! comparable across runs and across re-implementations of this service.

#![allow(clippy::many_single_char_names)]

use crate::{Point, Polyline};

/// Sample a cubic Bézier curve at parameter `t in [0, 1]` given four control points.
///
/// Standard Bernstein-polynomial form; no De Casteljau recursion needed for a
/// single evaluation.
pub fn sample_cubic_bezier(t: f64, p0: Point, p1: Point, p2: Point, p3: Point) -> Point {
    let u = 1.0 - t;
    let tt = t * t;
    let uu = u * u;
    let uuu = uu * u;
    let ttt = tt * t;
    let x = uuu * p0.0 + 3.0 * uu * t * p1.0 + 3.0 * u * tt * p2.0 + ttt * p3.0;
    let y = uuu * p0.1 + 3.0 * uu * t * p1.1 + 3.0 * u * tt * p2.1 + ttt * p3.1;
    (x, y)
}

/// Sum of Euclidean segment lengths along a polyline.
pub fn polyline_length(points: &[Point]) -> f64 {
    cumulative_lengths(points).last().copied().unwrap_or(0.0)
}

/// Length-prefix array: `cum[0] == 0.0`, `cum[i]` is the arc length of the
/// polyline up to and including vertex `i`.
pub fn cumulative_lengths(points: &[Point]) -> Vec<f64> {
    let mut cum = Vec::with_capacity(points.len());
    let mut acc = 0.0;
    cum.push(0.0);
    for w in points.windows(2) {
        let (x1, y1) = w[0];
        let (x2, y2) = w[1];
        acc += (x2 - x1).hypot(y2 - y1);
        cum.push(acc);
    }
    cum
}

/// Result of projecting a cursor onto a polyline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    /// Arc length from the start of the polyline to the projected point.
    pub pos: f64,
    /// The projected point itself.
    pub point: Point,
    /// Euclidean distance from the cursor to the projected point.
    pub dist: f64,
}

/// Project `cursor` onto the nearest point of `points`, tie-breaking toward
/// the earliest (lowest-index) segment on exact distance ties.
pub fn nearest_projection(points: &[Point], cursor: Point) -> Projection {
    let cum = cumulative_lengths(points);
    nearest_projection_with_cum(points, &cum, cursor)
}

/// Same as [`nearest_projection`] but takes a precomputed cumulative-length
/// array, avoiding an O(n) recompute when the caller already has one.
pub fn nearest_projection_with_cum(points: &[Point], cum: &[f64], cursor: Point) -> Projection {
    let mut best = Projection {
        pos: 0.0,
        point: points.first().copied().unwrap_or((0.0, 0.0)),
        dist: f64::INFINITY,
    };
    for i in 1..points.len() {
        let (x1, y1) = points[i - 1];
        let (x2, y2) = points[i];
        let dx = x2 - x1;
        let dy = y2 - y1;
        let seg_len_sq = dx * dx + dy * dy;
        let (t, seg_len) = if seg_len_sq == 0.0 {
            (0.0, 0.0)
        } else {
            let raw_t = ((cursor.0 - x1) * dx + (cursor.1 - y1) * dy) / seg_len_sq;
            (raw_t.clamp(0.0, 1.0), seg_len_sq.sqrt())
        };
        let proj = (x1 + t * dx, y1 + t * dy);
        let dist = (cursor.0 - proj.0).hypot(cursor.1 - proj.1);
        if dist < best.dist {
            best = Projection {
                pos: cum[i - 1] + t * seg_len,
                point: proj,
                dist,
            };
        }
    }
    best
}

/// Minimum Euclidean distance from `point` to `polyline`.
pub fn min_distance_to_polyline(point: Point, polyline: &[Point]) -> f64 {
    nearest_projection(polyline, point).dist
}

/// Remaining arc length from the cursor's projection to the end of the path.
pub fn distance_to_end(points: &[Point], cursor: Point) -> f64 {
    let cum = cumulative_lengths(points);
    let total = cum.last().copied().unwrap_or(0.0);
    let proj = nearest_projection_with_cum(points, &cum, cursor);
    (total - proj.pos).max(0.0)
}

/// The point on the polyline at arc length `s` from the start, clamped to
/// `[0, total_length]`.
fn point_at_arc_length(points: &[Point], cum: &[f64], s: f64) -> Point {
    let total = *cum.last().unwrap_or(&0.0);
    let s = s.clamp(0.0, total);
    if points.is_empty() {
        return (0.0, 0.0);
    }
    for i in 1..points.len() {
        if s <= cum[i] {
            let seg_len = cum[i] - cum[i - 1];
            let t = if seg_len == 0.0 {
                0.0
            } else {
                (s - cum[i - 1]) / seg_len
            };
            let (x1, y1) = points[i - 1];
            let (x2, y2) = points[i];
            return (x1 + t * (x2 - x1), y1 + t * (y2 - y1));
        }
    }
    *points.last().unwrap()
}

/// Forward look-ahead slice: given a cursor, project it onto the polyline and
/// return the sub-polyline covering arc-length interval
/// `[pos - behind, pos + ahead]`, with interpolated endpoints and consecutive
/// duplicate points dropped.
pub fn lookahead(points: &[Point], cursor: Point, ahead: f64, behind: f64) -> Polyline {
    if points.len() < 2 {
        return points.to_vec();
    }
    let cum = cumulative_lengths(points);
    let total = *cum.last().unwrap_or(&0.0);
    let proj = nearest_projection_with_cum(points, &cum, cursor);
    let lo = (proj.pos - behind).clamp(0.0, total);
    let hi = (proj.pos + ahead).clamp(0.0, total);

    let mut out = Vec::new();
    out.push(point_at_arc_length(points, &cum, lo));
    for (i, &p) in points.iter().enumerate() {
        if cum[i] > lo && cum[i] < hi {
            out.push(p);
        }
    }
    out.push(point_at_arc_length(points, &cum, hi));

    out.dedup_by(|a, b| a == b);
    out
}

/// Per-vertex curvature profile: the turning angle at each interior vertex,
/// normalized to `[0, 1]` (0 = straight, 1 = a full reversal). Endpoints are
/// always 0.
pub fn curvature_profile(points: &[Point]) -> Vec<f64> {
    let n = points.len();
    let mut profile = vec![0.0; n];
    if n < 3 {
        return profile;
    }
    for i in 1..n - 1 {
        let (ax, ay) = points[i - 1];
        let (bx, by) = points[i];
        let (cx, cy) = points[i + 1];
        let v1 = (bx - ax, by - ay);
        let v2 = (cx - bx, cy - by);
        let len1 = v1.0.hypot(v1.1);
        let len2 = v2.0.hypot(v2.1);
        if len1 <= 1e-9 || len2 <= 1e-9 {
            profile[i] = 0.0;
            continue;
        }
        let cos_theta = (v1.0 * v2.0 + v1.1 * v2.1) / (len1 * len2);
        let cos_theta = cos_theta.clamp(-1.0, 1.0);
        let angle = cos_theta.acos();
        profile[i] = (angle / std::f64::consts::PI).clamp(0.0, 1.0);
    }
    profile
}
