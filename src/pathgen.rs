//! Seeded path generator.
//!
//! Produces a cubic Bézier polyline whose total length lands in
//! `[PATH_TRAVEL_PX_MIN, PATH_TRAVEL_PX_MAX]` for the overwhelming majority
//! of seeds, with 1-2 gentle bends. Generation is a pure function of the
//! seed string: the same seed always yields the same polyline, bit for bit.

use rand::Rng;
use rand_pcg::Pcg32;
use rand::SeedableRng;

use crate::geometry::{polyline_length, sample_cubic_bezier};
use crate::{Point, Polyline};

/// Target minimum travel distance for a generated path, in pixels.
pub const PATH_TRAVEL_PX_MIN: f64 = 200.0;
/// Target maximum travel distance for a generated path, in pixels.
pub const PATH_TRAVEL_PX_MAX: f64 = 300.0;
/// Hard ceiling on generated path length regardless of retries.
pub const PATH_TRAVEL_PX_HARD_MAX: f64 = 400.0;

const MARGIN_PX: f64 = 60.0;
const SAMPLES: usize = 80;
const MAX_ATTEMPTS: usize = 10;
const BEND_RANGE: f64 = 80.0;
const HANDLE_MIN: f64 = 60.0;
const HANDLE_MAX: f64 = 120.0;

/// Deterministically derive a 64-bit seed from an arbitrary string using
/// FNV-1a, so that `generate_path` needs no external hashing dependency to
/// guarantee "same seed in, same polyline out" across processes and platforms.
fn seed_to_u64(seed: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in seed.as_bytes() {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Generate a smooth cubic Bézier path with 1-2 gentle bends and a total
/// length targeted at `[200, 300]` px. Retries up to 10 times internally;
/// if no attempt lands in range, the last sampled attempt is returned
/// anyway (total function, bounded wall-clock, no liveness failure).
pub fn generate_path(seed: &str, canvas_w: f64, canvas_h: f64) -> (Polyline, f64) {
    let mut rng = Pcg32::seed_from_u64(seed_to_u64(seed));

    let mut pts: Polyline = Vec::new();
    let mut length = 0.0;

    for attempt in 1..=MAX_ATTEMPTS {
        let p0: Point = (
            rng.gen_range(MARGIN_PX..canvas_w * 0.3),
            rng.gen_range(MARGIN_PX..canvas_h * 0.7),
        );
        let p3: Point = (
            rng.gen_range(canvas_w * 0.7..canvas_w - MARGIN_PX),
            rng.gen_range(MARGIN_PX..canvas_h * 0.7),
        );
        let bend = rng.gen_range(-BEND_RANGE..BEND_RANGE);
        let p1: Point = (p0.0 + rng.gen_range(HANDLE_MIN..HANDLE_MAX), p0.1 + bend);
        let p2: Point = (p3.0 - rng.gen_range(HANDLE_MIN..HANDLE_MAX), p3.1 - bend / 2.0);

        pts = (0..SAMPLES)
            .map(|i| sample_cubic_bezier(i as f64 / (SAMPLES - 1) as f64, p0, p1, p2, p3))
            .collect();
        length = polyline_length(&pts);

        if (PATH_TRAVEL_PX_MIN..=PATH_TRAVEL_PX_MAX).contains(&length) {
            break;
        }
        if attempt >= MAX_ATTEMPTS {
            break;
        }
    }

    (pts, length)
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: f64 = 400.0;
    const H: f64 = 400.0;

    #[test]
    fn generate_path_is_deterministic() {
        let (a, la) = generate_path("corpus-seed-1", W, H);
        let (b, lb) = generate_path("corpus-seed-1", W, H);
        assert_eq!(a, b);
        assert_eq!(la, lb);
    }

    #[test]
    fn different_seeds_usually_differ() {
        let (a, _) = generate_path("seed-a", W, H);
        let (b, _) = generate_path("seed-b", W, H);
        assert_ne!(a, b);
    }

    #[test]
    fn length_bounds_hold_for_a_seed_corpus() {
        let mut in_range = 0;
        let n = 1000;
        for i in 0..n {
            let seed = format!("corpus-{i}");
            let (_, length) = generate_path(&seed, W, H);
            assert!(length <= PATH_TRAVEL_PX_HARD_MAX, "seed {seed} length {length}");
            if (PATH_TRAVEL_PX_MIN..=PATH_TRAVEL_PX_MAX).contains(&length) {
                in_range += 1;
            }
        }
        let ratio = in_range as f64 / n as f64;
        assert!(ratio >= 0.99, "only {ratio} of seeds landed in range");
    }

    #[test]
    fn points_stay_on_canvas_with_slack_for_handles() {
        let (pts, _) = generate_path("canvas-bounds-seed", W, H);
        assert!(pts.len() >= 2);
        for (x, y) in &pts {
            assert!(*x >= -1.0 && *x <= W + 1.0, "x out of range: {x}");
            assert!(*y >= -200.0 && *y <= H + 200.0, "y out of range: {y}");
        }
    }
}
