//! Crate root: public surface and shared primitives for the line-tracing CAPTCHA.
//!
//! This module is the single canonical entry-point for the pipeline. It
//! centralizes the wire-facing `Point` alias and re-exports the submodules
//! that implement the challenge/peek/verify flow.
//!
//! ## Invariants
//!
//! - **Canvas.** All coordinates are confined to `[0, W] x [0, H]`, with
//!   `W = H = 400.0` unless a [`config::Config`] override says otherwise.
//! - **Determinism.** Path generation (`pathgen`) is a pure function of its
//!   seed string; the same seed always produces the same polyline.
//! - **Single-shot challenges.** Once a challenge's nonce is consumed, no
//!   further peek or verify call may succeed against it.
//! - **No unsafe.** The crate forbids `unsafe` throughout.
//!
//! These invariants are enforced by the submodules below; violations surface
//! as a [`CaptchaError`] variant, never a panic or UB.

#![forbid(unsafe_code)]

/// Pure geometry: Bézier sampling, polyline length, projection, look-ahead, curvature.
pub mod geometry;
/// Seeded path generator producing bounded-length Bézier polylines.
pub mod pathgen;
/// Challenge store trait + in-memory implementation, attempt telemetry.
pub mod store;
/// Canonical-JSON HMAC-SHA256 token signer.
pub mod token;
/// Progressive path-reveal oracle.
pub mod peek;
/// Trajectory verification engine.
pub mod verify;
/// Immutable runtime configuration (enforcement toggles + thresholds).
pub mod config;
/// Shared error taxonomy and HTTP status mapping.
pub mod error;

/// A single `(x, y)` point on the canvas.
///
/// Shared by every component: geometry, path generation, the store, the
/// peek oracle, the verifier, and the wire payloads.
pub type Point = (f64, f64);

/// An ordered sequence of points; always has at least two elements once
/// constructed by [`pathgen::generate_path`].
pub type Polyline = Vec<Point>;

pub use error::CaptchaError;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_alias_is_plain_tuple() {
        let p: Point = (1.0, 2.0);
        assert_eq!(p.0, 1.0);
        assert_eq!(p.1, 2.0);
    }
}
