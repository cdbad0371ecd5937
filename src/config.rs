//! Immutable runtime configuration.
//!
//! Collects the per-request `ENFORCE_*` toggles into a single value
//! ([`EnforcementConfig`]) instead of scattering ad hoc environment reads
//! through the peek oracle and verification engine, and wraps it together
//! with the signing secret, canvas size, and every tunable numeric threshold
//! into one [`Config`] loaded once at process startup. Tests construct
//! variant configurations directly; nothing here is a process-global.

use std::env;

/// One boolean per `ENFORCE_*` knob named in the wire/configuration surface.
/// All default to `true`; ablation studies flip individual gates off without
/// touching the rest of the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EnforcementConfig {
    /// Gate peek forward-progress / backtrack checks (§4.5 steps 7-8).
    pub peek_state: bool,
    /// Gate the peek per-challenge rate limit (§4.5 step 4).
    pub peek_rate: bool,
    /// Gate the peek distance-to-path check (§4.5 step 6).
    pub peek_distance: bool,
    /// Gate the peek budget (max peek count) check (§4.5 step 5).
    pub peek_budget: bool,
    /// Gate the verify-time forward-progress / backtrack check.
    pub monotonic_path: bool,
    /// Gate the verify-time max-speed check.
    pub speed_limits: bool,
    /// Gate the verify-time minimum-duration ("too fast") check.
    pub min_duration: bool,
    /// Gate the verify-time timing/spacing regularity check.
    pub regularity: bool,
    /// Gate the verify-time curvature-adaptation check.
    pub curvature_adaptation: bool,
    /// Gate the verify-time aggregate behavioural flag.
    pub behavioural: bool,
}

impl Default for EnforcementConfig {
    fn default() -> Self {
        Self {
            peek_state: true,
            peek_rate: true,
            peek_distance: true,
            peek_budget: true,
            monotonic_path: true,
            speed_limits: true,
            min_duration: true,
            regularity: true,
            curvature_adaptation: true,
            behavioural: true,
        }
    }
}

impl EnforcementConfig {
    /// Build from environment variables, defaulting every knob to `true`.
    /// A variable is considered "off" only if it is set to `0`, `false`, or
    /// `no` (case-insensitively); anything else (including unset) is "on".
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            peek_state: env_flag("ENFORCE_PEEK_STATE", d.peek_state),
            peek_rate: env_flag("ENFORCE_PEEK_RATE", d.peek_rate),
            peek_distance: env_flag("ENFORCE_PEEK_DISTANCE", d.peek_distance),
            peek_budget: env_flag("ENFORCE_PEEK_BUDGET", d.peek_budget),
            monotonic_path: env_flag("ENFORCE_MONOTONIC_PATH", d.monotonic_path),
            speed_limits: env_flag("ENFORCE_SPEED_LIMITS", d.speed_limits),
            min_duration: env_flag("ENFORCE_MIN_DURATION", d.min_duration),
            regularity: env_flag("ENFORCE_REGULARITY", d.regularity),
            curvature_adaptation: env_flag("ENFORCE_CURVATURE_ADAPTATION", d.curvature_adaptation),
            behavioural: env_flag("ENFORCE_BEHAVIOURAL", d.behavioural),
        }
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) => !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "no"),
        Err(_) => default,
    }
}

/// Per-pointer-type behavioural thresholds (§4.6's table).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointerThresholds {
    /// Hard cap on any single sample's instantaneous speed (px/s).
    pub max_speed: f64,
    /// Hard cap on the trajectory's mean speed (px/s).
    pub max_avg_speed: f64,
    /// Maximum fraction of samples allowed to register as a backtrack.
    pub max_backtrack_ratio: f64,
    /// Minimum number of acceleration sign changes expected of a human trace.
    pub min_accel_sign_changes: usize,
    /// Floor on `std(speed)/mean(speed)`; below this, speed reads as bot-constant.
    pub speed_constancy_ratio: f64,
    /// Hard cap on `|acceleration|` (px/s^2).
    pub max_abs_accel: f64,
    /// Floor on the coefficient of variation of inter-sample `dt`.
    pub min_dt_cv: f64,
    /// Floor on the coefficient of variation of inter-sample `dd`.
    pub min_dd_cv: f64,
    /// Floor on the ratio `var(speed_high_curvature) / var(speed_low_curvature)`.
    pub curvature_var_ratio_min: f64,
}

/// Default thresholds for mouse pointers.
pub const MOUSE_THRESHOLDS: PointerThresholds = PointerThresholds {
    max_speed: 2000.0,
    max_avg_speed: 900.0,
    max_backtrack_ratio: 0.10,
    min_accel_sign_changes: 2,
    speed_constancy_ratio: 0.15,
    max_abs_accel: 12_000.0,
    min_dt_cv: 0.08,
    min_dd_cv: 0.08,
    curvature_var_ratio_min: 1.2,
};

/// Default thresholds for touch/pen pointers.
pub const TOUCH_THRESHOLDS: PointerThresholds = PointerThresholds {
    max_speed: 1800.0,
    max_avg_speed: 750.0,
    max_backtrack_ratio: 0.12,
    min_accel_sign_changes: 2,
    speed_constancy_ratio: 0.18,
    max_abs_accel: 10_000.0,
    min_dt_cv: 0.07,
    min_dd_cv: 0.07,
    curvature_var_ratio_min: 1.2,
};

/// Top-level immutable configuration, constructed once at process startup
/// (or freely in tests) and threaded by reference through the peek oracle
/// and verification engine.
#[derive(Clone, Debug)]
pub struct Config {
    /// HMAC-SHA256 signing secret for challenge tokens.
    pub secret: Vec<u8>,
    /// Address the HTTP server binds to.
    pub addr: std::net::SocketAddr,
    /// Canvas width in pixels.
    pub canvas_width: f64,
    /// Canvas height in pixels.
    pub canvas_height: f64,
    /// Challenge time-to-live, in milliseconds.
    pub challenge_ttl_ms: u64,
    /// Target completion time surfaced to the client (advisory only).
    pub target_completion_ms: u64,
    /// Trail visible duration surfaced to the client (advisory only).
    pub trail_visible_ms: u64,
    /// Trail fade-out duration surfaced to the client (advisory only).
    pub trail_fadeout_ms: u64,
    /// Base tolerance for mouse pointers, in pixels, before jitter.
    pub tolerance_mouse_px: f64,
    /// Base tolerance for touch/pen pointers, in pixels, before jitter.
    pub tolerance_touch_px: f64,
    /// Maximum absolute jitter applied to the mouse tolerance per challenge.
    pub jitter_mouse_px: f64,
    /// Maximum absolute jitter applied to the touch tolerance per challenge.
    pub jitter_touch_px: f64,
    /// Minimum interval between accepted peeks on the same challenge (ms).
    pub peek_min_interval_ms: u64,
    /// Maximum number of peeks allowed per challenge.
    pub peek_max_count: u32,
    /// Multiplier applied to `max(tolerance_mouse, tolerance_touch)` for the
    /// peek distance gate.
    pub peek_distance_factor: f64,
    /// Maximum forward cursor advance allowed per second between peeks (px/s).
    pub peek_max_advance_px_per_s: f64,
    /// Extra slack added to the forward-progress bound (px).
    pub peek_advance_margin_px: f64,
    /// Maximum allowed backtrack, in arc-length pixels, before a peek/verify
    /// sample is flagged.
    pub progress_backtrack_px: f64,
    /// Forward reveal window length for peeks (px).
    pub peek_ahead_px: f64,
    /// Backward reveal window length for peeks (px, currently always emitted empty).
    pub peek_behind_px: f64,
    /// Distance-to-end threshold at which the peek oracle reveals the finish point.
    pub finish_reveal_px: f64,
    /// Minimum number of trajectory samples required to attempt verification.
    pub min_samples: usize,
    /// Fraction of arc length that must be covered within tolerance to pass.
    pub required_coverage_ratio: f64,
    /// Hard floor on trajectory duration (ms) below which a trace is "too fast".
    pub too_fast_threshold_ms: u64,
    /// Inter-sample gap (ms) at or above which a sample starts a "pause".
    pub pause_gap_ms: u64,
    /// Minimum samples required in both the low- and high-curvature buckets
    /// before the curvature-adaptation check is evaluated.
    pub curvature_min_samples: usize,
    /// Low-percentile cutoff (0-1) used to bucket "low curvature" samples.
    pub curvature_low_percentile: f64,
    /// High-percentile cutoff (0-1) used to bucket "high curvature" samples.
    pub curvature_high_percentile: f64,
    /// Per-request enforcement toggles.
    pub enforcement: EnforcementConfig,
}

impl Config {
    /// Build configuration from the environment. The signing secret is read
    /// from `LINE_CAPTCHA_SECRET`; in debug builds a development fallback is
    /// used if unset, but release builds fail closed (`None`) to avoid ever
    /// shipping the well-known default secret to production.
    pub fn from_env() -> Result<Self, ConfigError> {
        let secret = match env::var("LINE_CAPTCHA_SECRET") {
            Ok(s) if !s.is_empty() => s.into_bytes(),
            _ => {
                if cfg!(debug_assertions) {
                    b"dev-secret-change-me".to_vec()
                } else {
                    return Err(ConfigError::MissingSecret);
                }
            }
        };
        let mut cfg = Self::default_with_secret(secret);
        cfg.enforcement = EnforcementConfig::from_env();
        if let Ok(addr) = env::var("LINE_CAPTCHA_ADDR") {
            cfg.addr = addr.parse().map_err(|_| ConfigError::InvalidAddr(addr))?;
        }
        Ok(cfg)
    }

    /// Construct a default configuration with an explicit secret; used by
    /// tests and by [`Config::from_env`]'s fallback path.
    pub fn default_with_secret(secret: Vec<u8>) -> Self {
        Self {
            secret,
            addr: ([127, 0, 0, 1], 8080).into(),
            canvas_width: 400.0,
            canvas_height: 400.0,
            challenge_ttl_ms: 12_000,
            target_completion_ms: 3_000,
            trail_visible_ms: 400,
            trail_fadeout_ms: 600,
            tolerance_mouse_px: 20.0,
            tolerance_touch_px: 30.0,
            jitter_mouse_px: 2.0,
            jitter_touch_px: 3.0,
            peek_min_interval_ms: 100,
            peek_max_count: 120,
            peek_distance_factor: 1.2,
            peek_max_advance_px_per_s: 800.0,
            peek_advance_margin_px: 20.0,
            progress_backtrack_px: 10.0,
            peek_ahead_px: 40.0,
            peek_behind_px: 8.0,
            finish_reveal_px: 40.0,
            min_samples: 20,
            required_coverage_ratio: 0.75,
            too_fast_threshold_ms: 1_000,
            pause_gap_ms: 150,
            curvature_min_samples: 8,
            curvature_low_percentile: 0.30,
            curvature_high_percentile: 0.70,
            enforcement: EnforcementConfig::default(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_with_secret(b"dev-secret-change-me".to_vec())
    }
}

/// Configuration-loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// `LINE_CAPTCHA_SECRET` was unset in a release build.
    #[error("LINE_CAPTCHA_SECRET must be set in production")]
    MissingSecret,
    /// `LINE_CAPTCHA_ADDR` did not parse as a socket address.
    #[error("LINE_CAPTCHA_ADDR is not a valid socket address: {0}")]
    InvalidAddr(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_enforcement_is_all_on() {
        let e = EnforcementConfig::default();
        assert!(e.peek_state && e.peek_rate && e.peek_distance && e.peek_budget);
        assert!(e.monotonic_path && e.speed_limits && e.min_duration);
        assert!(e.regularity && e.curvature_adaptation && e.behavioural);
    }

    #[test]
    fn env_flag_respects_explicit_off_values() {
        std::env::set_var("LC_TEST_FLAG_OFF", "false");
        assert!(!env_flag("LC_TEST_FLAG_OFF", true));
        std::env::remove_var("LC_TEST_FLAG_OFF");
    }

    #[test]
    fn env_flag_defaults_when_unset() {
        std::env::remove_var("LC_TEST_FLAG_UNSET");
        assert!(env_flag("LC_TEST_FLAG_UNSET", true));
    }
}
