//! The verification engine.
//!
//! Scores one complete trajectory against coverage, timing, kinematic,
//! regularity and curvature-adaptation criteria in a single linear pass over
//! the samples, then applies a fixed-priority decision procedure to pick one
//! [`Reason`]. A verify always consumes the challenge's nonce and always
//! records an [`AttemptLog`], whatever the outcome — a challenge is
//! single-shot regardless of whether the trace passed.

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::CaptchaError;
use crate::geometry::{curvature_profile, cumulative_lengths, min_distance_to_polyline, nearest_projection_with_cum};
use crate::store::{now_ms, AttemptLog, Challenge, ChallengeStore, PointerKind};
use crate::token::Signer;
use crate::Point;

/// Pointer family as reported by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointerType {
    /// Mouse or generic pointer input.
    Mouse,
    /// Touch input.
    Touch,
    /// Pen/stylus input.
    Pen,
}

impl PointerType {
    /// Collapse `Pen` into `Touch`, the single call site both C5 and C6 share
    /// for the design choice "pen is treated as touch".
    pub fn effective(self) -> PointerKind {
        match self {
            PointerType::Mouse => PointerKind::Mouse,
            PointerType::Touch | PointerType::Pen => PointerKind::Touch,
        }
    }
}

/// One client-reported trajectory sample.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrajectorySample {
    /// Cursor x.
    pub x: f64,
    /// Cursor y.
    pub y: f64,
    /// Client-supplied timestamp, milliseconds.
    pub t: i64,
}

/// `POST /captcha/line/verify` request body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VerifyRequest {
    /// Challenge id.
    pub challenge_id: String,
    /// Nonce the client was issued.
    pub nonce: String,
    /// Signed token from `/new`.
    pub token: String,
    /// Opaque client session identifier, carried through to telemetry.
    pub session_id: String,
    /// Reported pointer family.
    pub pointer_type: PointerType,
    /// Optional client OS family, carried through to telemetry.
    #[serde(default)]
    pub os_family: Option<String>,
    /// Optional client browser family, carried through to telemetry.
    #[serde(default)]
    pub browser_family: Option<String>,
    /// Optional device pixel ratio; `>= 2` widens effective tolerance by 10%.
    #[serde(default)]
    pub device_pixel_ratio: Option<f64>,
    /// The submitted trajectory, at least 2 samples.
    pub trajectory: Vec<TrajectorySample>,
}

/// The closed vocabulary of verification outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    /// The challenge's TTL had already elapsed by the time of verify.
    Timeout,
    /// Fewer than `min_samples` trajectory samples were submitted.
    InsufficientSamples,
    /// A sample's timestamp did not strictly increase over the previous one.
    NonMonotonicTime,
    /// A single step covered more than `2T`, too far to be a real pointer move.
    JumpDetected,
    /// The cursor backtracked along the path more than the allowed ratio.
    NonMonotonicPath,
    /// Instantaneous speed exceeded the pointer's hard cap.
    SpeedViolation,
    /// The trajectory never reached within tolerance of the path's end.
    Incomplete,
    /// Coverage (by sample count or by arc length) fell short of the floor.
    LowCoverage,
    /// The whole trace completed faster than physically plausible.
    TooFast,
    /// Inter-sample timing/spacing was suspiciously uniform.
    Regularity,
    /// Speed failed to vary between high- and low-curvature path segments.
    NoCurvatureAdaptation,
    /// One or more individually-weak behavioural heuristics tripped.
    Behavioural,
    /// Every check passed.
    Success,
}

/// Threshold values echoed back to the client for display/debugging.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Thresholds {
    /// The coverage ratio floor applied.
    pub required_coverage_ratio: f64,
    /// The minimum plausible duration applied, in milliseconds.
    pub too_fast_ms: u64,
    /// The challenge's TTL, in milliseconds.
    pub ttl_ms: u64,
}

/// `POST /captcha/line/verify` response body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    /// Whether the trajectory passed verification.
    pub passed: bool,
    /// The single decided outcome reason.
    pub reason: Reason,
    /// Fraction of submitted samples within tolerance of the path.
    pub coverage_ratio: f64,
    /// Wall-clock duration of the submitted trajectory, milliseconds.
    pub duration_ms: i64,
    /// Whether the challenge's TTL had elapsed by verify time.
    pub ttl_expired: bool,
    /// Whether the trajectory completed faster than physically plausible.
    pub too_fast: bool,
    /// Whether any individually-weak behavioural heuristic tripped.
    pub behavioural_flag: bool,
    /// Advisory: true whenever `passed` is false, since this challenge is
    /// now single-shot-consumed regardless of outcome.
    pub new_challenge_recommended: bool,
    /// The threshold values applied.
    pub thresholds: Thresholds,
    /// The challenge's expiry time, epoch milliseconds.
    pub expires_at: i64,
}

struct Metrics {
    coverage_ratio: f64,
    coverage_len_ratio: f64,
    backtrack_ratio: f64,
    mean_speed: f64,
    max_speed: f64,
    pause_count: usize,
    pause_durations_ms: Vec<i64>,
    deviation_mean: f64,
    deviation_max: f64,
    dt_cv: f64,
    dd_cv: f64,
    duration_ms: i64,
    monotonic: bool,
    jumps_ok: bool,
    progress_ok: bool,
    speed_violation: bool,
    end_reached: bool,
    too_fast: bool,
    regularity_flag: bool,
    curvature_flag: bool,
    speed_const_flag: bool,
    accel_flag: bool,
    behavioural_flag: bool,
    bot_score: u32,
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        0.0
    } else {
        xs.iter().sum::<f64>() / xs.len() as f64
    }
}

fn std_dev(xs: &[f64], m: f64) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    (xs.iter().map(|v| (v - m).powi(2)).sum::<f64>() / xs.len() as f64).sqrt()
}

fn variance(xs: &[f64]) -> f64 {
    let m = mean(xs);
    if xs.is_empty() {
        0.0
    } else {
        xs.iter().map(|v| (v - m).powi(2)).sum::<f64>() / xs.len() as f64
    }
}

fn cv(xs: &[f64]) -> f64 {
    let m = mean(xs);
    if m.abs() < 1e-9 {
        0.0
    } else {
        std_dev(xs, m) / m
    }
}

/// 0-1 linear-interpolated percentile over a copy of `xs`, sorted ascending.
fn percentile(xs: &[f64], p: f64) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    let mut sorted = xs.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let idx = (p * (sorted.len() - 1) as f64).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn sign_changes(xs: &[f64]) -> usize {
    let mut changes = 0;
    let mut last_sign = 0i32;
    for &v in xs {
        let sign = if v > 0.0 {
            1
        } else if v < 0.0 {
            -1
        } else {
            0
        };
        if sign != 0 {
            if last_sign != 0 && sign != last_sign {
                changes += 1;
            }
            last_sign = sign;
        }
    }
    changes
}

#[allow(clippy::too_many_arguments)]
fn score(
    path: &[Point],
    path_length: f64,
    tolerance: f64,
    thresholds: &crate::config::PointerThresholds,
    trajectory: &[TrajectorySample],
    config: &Config,
) -> Metrics {
    let cum = cumulative_lengths(path);
    let profile = curvature_profile(path);
    let low_cut = percentile(&profile, config.curvature_low_percentile);
    let high_cut = percentile(&profile, config.curvature_high_percentile);

    let n = trajectory.len();
    let mut monotonic = true;
    let mut jumps_ok = true;
    let mut total_seg_len = 0.0;
    let mut covered_seg_len = 0.0;
    let mut last_good_pos = 0.0;
    let mut backtrack_samples = 0usize;
    let mut within_tolerance_samples = 0usize;
    let mut deviations = Vec::with_capacity(n);
    let mut speeds = Vec::with_capacity(n.saturating_sub(1));
    let mut accels = Vec::with_capacity(n.saturating_sub(2));
    let mut dts = Vec::with_capacity(n.saturating_sub(1));
    let mut dds = Vec::with_capacity(n.saturating_sub(1));
    let mut pause_count = 0usize;
    let mut pause_durations_ms = Vec::new();
    let mut speed_low = Vec::new();
    let mut speed_high = Vec::new();

    let first_dist = min_distance_to_polyline((trajectory[0].x, trajectory[0].y), path);
    deviations.push(first_dist);
    if first_dist <= tolerance {
        within_tolerance_samples += 1;
    }

    for i in 1..n {
        let prev = trajectory[i - 1];
        let cur = trajectory[i];

        if cur.t <= prev.t {
            monotonic = false;
            break;
        }
        let dt_ms = (cur.t - prev.t) as f64;
        let dd = (cur.x - prev.x).hypot(cur.y - prev.y);
        if dd > 2.0 * tolerance {
            jumps_ok = false;
            break;
        }

        let cur_dist = min_distance_to_polyline((cur.x, cur.y), path);
        deviations.push(cur_dist);
        if cur_dist <= tolerance {
            within_tolerance_samples += 1;
        }

        let prev_dist = deviations[i - 1];
        total_seg_len += dd;
        if prev_dist <= tolerance && cur_dist <= tolerance {
            covered_seg_len += dd;
        }

        let proj = nearest_projection_with_cum(path, &cum, (cur.x, cur.y));
        if proj.pos + config.progress_backtrack_px < last_good_pos {
            backtrack_samples += 1;
        } else {
            last_good_pos = last_good_pos.max(proj.pos);
        }

        let speed = dd / dt_ms.max(1.0) * 1000.0;
        if dt_ms >= config.pause_gap_ms as f64 {
            pause_count += 1;
            pause_durations_ms.push(dt_ms as i64);
        }

        if let Some(&prev_speed) = speeds.last() {
            let accel = (speed - prev_speed) / (dt_ms.max(1.0) / 1000.0);
            accels.push(accel);
        }
        speeds.push(speed);
        dts.push(dt_ms);
        dds.push(dd);

        let vertex = nearest_cum_index(&cum, proj.pos);
        let curvature = profile[vertex];
        if curvature <= low_cut {
            speed_low.push(speed);
        } else if curvature >= high_cut {
            speed_high.push(speed);
        }
    }

    let duration_ms = trajectory.last().unwrap().t - trajectory[0].t;
    let coverage_ratio = within_tolerance_samples as f64 / n as f64;
    let coverage_len_ratio = if total_seg_len > 0.0 {
        covered_seg_len / total_seg_len
    } else {
        0.0
    };
    let backtrack_ratio = backtrack_samples as f64 / n as f64;
    let mean_speed = mean(&speeds);
    let max_speed = speeds.iter().copied().fold(0.0, f64::max);
    let deviation_mean = mean(&deviations);
    let deviation_max = deviations.iter().copied().fold(0.0, f64::max);
    let dt_cv = cv(&dts);
    let dd_cv = cv(&dds);

    let speed_const_flag = mean_speed > 0.0 && (std_dev(&speeds, mean_speed) / mean_speed) < thresholds.speed_constancy_ratio;
    let max_abs_accel = accels.iter().map(|a| a.abs()).fold(0.0, f64::max);
    let accel_flag = max_abs_accel > thresholds.max_abs_accel;
    let accel_sign_change_flag = accels.len() >= 3 && sign_changes(&accels) < thresholds.min_accel_sign_changes;
    let speed_violation = max_speed > thresholds.max_speed;
    let regularity_flag = dt_cv < thresholds.min_dt_cv && dd_cv < thresholds.min_dd_cv;
    let var_lo = variance(&speed_low);
    let var_hi = variance(&speed_high);
    let curvature_flag = speed_low.len() >= config.curvature_min_samples
        && speed_high.len() >= config.curvature_min_samples
        && ((var_hi <= 1e-6 && var_lo <= 1e-6) || var_hi <= var_lo * thresholds.curvature_var_ratio_min);
    let progress_ok = backtrack_ratio <= thresholds.max_backtrack_ratio;
    let min_duration_ms = (config.too_fast_threshold_ms as f64).max(path_length / thresholds.max_avg_speed * 1000.0) as i64;
    let too_fast = duration_ms < min_duration_ms;
    let last_sample = trajectory.last().unwrap();
    let path_end = *path.last().unwrap();
    let end_reached = (last_sample.x - path_end.0).hypot(last_sample.y - path_end.1) <= tolerance;
    let behavioural_flag = speed_const_flag || accel_flag || accel_sign_change_flag;

    let bot_score = [
        speed_const_flag,
        accel_flag,
        accel_sign_change_flag,
        speed_violation,
        regularity_flag,
        curvature_flag,
        !progress_ok,
        too_fast,
    ]
    .iter()
    .filter(|&&f| f)
    .count() as u32;

    Metrics {
        coverage_ratio,
        coverage_len_ratio,
        backtrack_ratio,
        mean_speed,
        max_speed,
        pause_count,
        pause_durations_ms,
        deviation_mean,
        deviation_max,
        dt_cv,
        dd_cv,
        duration_ms,
        monotonic,
        jumps_ok,
        progress_ok,
        speed_violation,
        end_reached,
        too_fast,
        regularity_flag,
        curvature_flag,
        speed_const_flag,
        accel_flag,
        behavioural_flag,
        bot_score,
    }
}

/// The stable snake_case string for a [`Reason`], matching its `Serialize`
/// impl; used for the attempt log, which stores the reason as plain text
/// rather than a JSON value.
fn reason_code(reason: Reason) -> &'static str {
    match reason {
        Reason::Timeout => "timeout",
        Reason::InsufficientSamples => "insufficient_samples",
        Reason::NonMonotonicTime => "non_monotonic_time",
        Reason::JumpDetected => "jump_detected",
        Reason::NonMonotonicPath => "non_monotonic_path",
        Reason::SpeedViolation => "speed_violation",
        Reason::Incomplete => "incomplete",
        Reason::LowCoverage => "low_coverage",
        Reason::TooFast => "too_fast",
        Reason::Regularity => "regularity",
        Reason::NoCurvatureAdaptation => "no_curvature_adaptation",
        Reason::Behavioural => "behavioural",
        Reason::Success => "success",
    }
}

fn nearest_cum_index(cum: &[f64], pos: f64) -> usize {
    let mut best_i = 0;
    let mut best_d = f64::INFINITY;
    for (i, &c) in cum.iter().enumerate() {
        let d = (c - pos).abs();
        if d < best_d {
            best_d = d;
            best_i = i;
        }
    }
    best_i
}

fn decide(
    config: &Config,
    ttl_expired: bool,
    n_samples: usize,
    m: &Metrics,
) -> Reason {
    let e = &config.enforcement;
    if ttl_expired {
        return Reason::Timeout;
    }
    if n_samples < config.min_samples {
        return Reason::InsufficientSamples;
    }
    if !m.monotonic {
        return Reason::NonMonotonicTime;
    }
    if !m.jumps_ok {
        return Reason::JumpDetected;
    }
    if e.monotonic_path && !m.progress_ok {
        return Reason::NonMonotonicPath;
    }
    if e.speed_limits && m.speed_violation {
        return Reason::SpeedViolation;
    }
    if !m.end_reached {
        return Reason::Incomplete;
    }
    if m.coverage_len_ratio < config.required_coverage_ratio {
        return Reason::LowCoverage;
    }
    if m.coverage_ratio < config.required_coverage_ratio {
        return Reason::LowCoverage;
    }
    if e.min_duration && m.too_fast {
        return Reason::TooFast;
    }
    if e.regularity && m.regularity_flag {
        return Reason::Regularity;
    }
    if e.curvature_adaptation && m.curvature_flag {
        return Reason::NoCurvatureAdaptation;
    }
    if e.behavioural && m.behavioural_flag {
        return Reason::Behavioural;
    }
    Reason::Success
}

/// Evaluate a complete verify request, consuming the challenge's nonce and
/// recording telemetry regardless of outcome.
pub fn verify(
    store: &dyn ChallengeStore,
    signer: &Signer,
    config: &Config,
    req: &VerifyRequest,
) -> Result<VerifyResponse, CaptchaError> {
    if req.trajectory.len() < 2 {
        return Err(CaptchaError::BadRequest("trajectory must have at least 2 samples".into()));
    }
    let now = now_ms();

    let (response, log) = store.with_challenge(&req.challenge_id, &mut |challenge: &mut Challenge| {
        run(challenge, signer, config, req, now)
    })?;

    store.save_attempt(log);
    Ok(response)
}

fn run(
    challenge: &mut Challenge,
    signer: &Signer,
    config: &Config,
    req: &VerifyRequest,
    now: i64,
) -> Result<(VerifyResponse, AttemptLog), CaptchaError> {
    if challenge.nonce_used {
        return Err(CaptchaError::ChallengeUsed);
    }
    let claims = signer.verify(&req.token)?;
    if claims.cid != req.challenge_id
        || claims.nonce != req.nonce
        || claims.nonce != challenge.nonce
        || claims.ttl != challenge.ttl_ms
    {
        return Err(CaptchaError::TokenMismatch);
    }

    let pointer = req.pointer_type.effective();
    let base_tolerance = challenge.tolerance_for(pointer);
    let dpr_scale = match req.device_pixel_ratio {
        Some(dpr) if dpr >= 2.0 => 1.1,
        _ => 1.0,
    };
    let tolerance = base_tolerance * dpr_scale;
    let thresholds = pointer.thresholds();

    let ttl_expired = challenge.is_expired(now);
    let metrics = score(&challenge.points, challenge.path_length, tolerance, thresholds, &req.trajectory, config);
    let reason = decide(config, ttl_expired, req.trajectory.len(), &metrics);
    let passed = matches!(reason, Reason::Success);

    challenge.nonce_used = true;

    let response = VerifyResponse {
        passed,
        reason,
        coverage_ratio: metrics.coverage_ratio,
        duration_ms: metrics.duration_ms,
        ttl_expired,
        too_fast: metrics.too_fast,
        behavioural_flag: metrics.behavioural_flag,
        new_challenge_recommended: !passed,
        thresholds: Thresholds {
            required_coverage_ratio: config.required_coverage_ratio,
            too_fast_ms: config.too_fast_threshold_ms,
            ttl_ms: challenge.ttl_ms,
        },
        expires_at: challenge.created_at + challenge.ttl_ms as i64,
    };

    let log = AttemptLog {
        attempt_id: format!("{}-{now}", challenge.id),
        session_id: req.session_id.clone(),
        challenge_id: challenge.id.clone(),
        pointer,
        os_family: req.os_family.clone(),
        browser_family: req.browser_family.clone(),
        device_pixel_ratio: req.device_pixel_ratio,
        path_seed: challenge.seed.clone(),
        path_length_px: challenge.path_length,
        tolerance_px: tolerance,
        tolerance_jitter_px: match pointer {
            PointerKind::Mouse => challenge.jitter_mouse_px,
            PointerKind::Touch => challenge.jitter_touch_px,
        },
        ttl_ms: challenge.ttl_ms,
        started_at: req.trajectory[0].t,
        ended_at: now,
        duration_ms: metrics.duration_ms.max(0) as u64,
        outcome_reason: reason_code(reason).to_string(),
        coverage_ratio: metrics.coverage_ratio,
        coverage_len_ratio: metrics.coverage_len_ratio,
        mean_speed: metrics.mean_speed,
        max_speed: metrics.max_speed,
        pause_count: metrics.pause_count,
        pause_durations_ms: metrics.pause_durations_ms.clone(),
        deviation_stats: (metrics.deviation_mean, metrics.deviation_max),
        speed_const_flag: metrics.speed_const_flag,
        accel_flag: metrics.accel_flag,
        behavioural_flag: metrics.behavioural_flag,
        bot_score: metrics.bot_score,
        trajectory: req.trajectory.iter().map(|s| (s.x, s.y, s.t)).collect(),
        created_at: now,
    };

    Ok((response, log))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pathgen::generate_path;
    use crate::store::InMemoryChallengeStore;
    use crate::token::Claims;

    fn setup(points: Vec<Point>, path_length: f64) -> (InMemoryChallengeStore, Signer, Config, String, String) {
        let store = InMemoryChallengeStore::new();
        let signer = Signer::new(b"test-secret".to_vec());
        let config = Config::default_with_secret(b"test-secret".to_vec());
        let id = "chal-1".to_string();
        let nonce = "nonce-1".to_string();
        store.save(Challenge {
            id: id.clone(),
            seed: "seed".into(),
            points,
            path_length,
            ttl_ms: config.challenge_ttl_ms,
            nonce: nonce.clone(),
            tolerance_mouse_px: config.tolerance_mouse_px,
            tolerance_touch_px: config.tolerance_touch_px,
            jitter_mouse_px: 0.0,
            jitter_touch_px: 0.0,
            peek_pos: 0.0,
            peek_count: 0,
            last_peek_at: None,
            nonce_used: false,
            created_at: now_ms(),
        });
        (store, signer, config, id, nonce)
    }

    fn request(id: &str, nonce: &str, token: String, trajectory: Vec<TrajectorySample>) -> VerifyRequest {
        VerifyRequest {
            challenge_id: id.to_string(),
            nonce: nonce.to_string(),
            token,
            session_id: "sess-1".into(),
            pointer_type: PointerType::Mouse,
            os_family: None,
            browser_family: None,
            device_pixel_ratio: Some(1.0),
            trajectory,
        }
    }

    fn token_for(signer: &Signer, id: &str, nonce: &str, ttl: u64) -> String {
        signer
            .sign(&Claims {
                cid: id.to_string(),
                seed: "seed".into(),
                ttl,
                iat: now_ms(),
                nonce: nonce.to_string(),
            })
            .unwrap()
    }

    #[test]
    fn too_few_samples_is_bad_request() {
        let (points, length) = generate_path("verify-test", 400.0, 400.0);
        let (store, signer, config, id, nonce) = setup(points, length);
        let token = token_for(&signer, &id, &nonce, config.challenge_ttl_ms);
        let req = request(
            &id,
            &nonce,
            token,
            vec![TrajectorySample { x: 0.0, y: 0.0, t: 0 }],
        );
        let err = verify(&store, &signer, &config, &req).unwrap_err();
        assert!(matches!(err, CaptchaError::BadRequest(_)));
    }

    #[test]
    fn teleport_two_samples_is_insufficient_samples() {
        let (points, length) = generate_path("verify-test", 400.0, 400.0);
        let (store, signer, config, id, nonce) = setup(points.clone(), length);
        let token = token_for(&signer, &id, &nonce, config.challenge_ttl_ms);
        let req = request(
            &id,
            &nonce,
            token,
            vec![
                TrajectorySample { x: points[0].0, y: points[0].1, t: 0 },
                TrajectorySample { x: points.last().unwrap().0, y: points.last().unwrap().1, t: 2500 },
            ],
        );
        let resp = verify(&store, &signer, &config, &req).unwrap();
        assert!(!resp.passed);
        assert_eq!(resp.reason, Reason::InsufficientSamples);
    }

    #[test]
    fn non_monotonic_time_is_detected() {
        let (points, length) = generate_path("verify-test", 400.0, 400.0);
        let (store, signer, config, id, nonce) = setup(points.clone(), length);
        let token = token_for(&signer, &id, &nonce, config.challenge_ttl_ms);
        let mut trajectory: Vec<TrajectorySample> = points
            .iter()
            .enumerate()
            .map(|(i, p)| TrajectorySample { x: p.0, y: p.1, t: (i as i64) * 30 })
            .collect();
        // Break monotonic time at sample 10.
        trajectory[10].t = trajectory[9].t - 5;
        let req = request(&id, &nonce, token, trajectory);
        let resp = verify(&store, &signer, &config, &req).unwrap();
        assert_eq!(resp.reason, Reason::NonMonotonicTime);
    }

    #[test]
    fn ideal_trace_on_path_succeeds() {
        let (points, length) = generate_path("verify-test-ideal", 400.0, 400.0);
        let (store, signer, config, id, nonce) = setup(points.clone(), length);
        let token = token_for(&signer, &id, &nonce, config.challenge_ttl_ms);
        let n = points.len();
        let total_ms = 2500i64;
        let trajectory: Vec<TrajectorySample> = points
            .iter()
            .enumerate()
            .map(|(i, p)| TrajectorySample {
                x: p.0,
                y: p.1,
                t: (i as i64) * total_ms / (n as i64 - 1),
            })
            .collect();
        let req = request(&id, &nonce, token, trajectory);
        let resp = verify(&store, &signer, &config, &req).unwrap();
        assert_eq!(resp.reason, Reason::Success);
        assert!(resp.passed);
        assert!(resp.coverage_ratio >= 0.95);
    }

    #[test]
    fn second_verify_on_same_challenge_is_rejected() {
        let (points, length) = generate_path("verify-test-single-shot", 400.0, 400.0);
        let (store, signer, config, id, nonce) = setup(points.clone(), length);
        let token = token_for(&signer, &id, &nonce, config.challenge_ttl_ms);
        let n = points.len();
        let trajectory: Vec<TrajectorySample> = points
            .iter()
            .enumerate()
            .map(|(i, p)| TrajectorySample { x: p.0, y: p.1, t: (i as i64) * 30 })
            .collect();
        let req = request(&id, &nonce, token.clone(), trajectory.clone());
        verify(&store, &signer, &config, &req).unwrap();
        let req2 = request(&id, &nonce, token, trajectory);
        let err = verify(&store, &signer, &config, &req2).unwrap_err();
        assert!(matches!(err, CaptchaError::ChallengeUsed));
    }

    #[test]
    fn off_path_wobble_is_low_coverage() {
        let (points, length) = generate_path("verify-test-wobble", 400.0, 400.0);
        let (store, signer, config, id, nonce) = setup(points.clone(), length);
        let token = token_for(&signer, &id, &nonce, config.challenge_ttl_ms);
        let n = points.len();
        let mut trajectory: Vec<TrajectorySample> = points
            .iter()
            .enumerate()
            .map(|(i, p)| TrajectorySample {
                x: p.0,
                y: p.1 + 25.0,
                t: (i as i64) * 30,
            })
            .collect();
        // The wobble stays off-path throughout, but the trace still reaches
        // the target at the end, as a real (if sloppy) completion would.
        trajectory[n - 1].x = points[n - 1].0;
        trajectory[n - 1].y = points[n - 1].1;
        let req = request(&id, &nonce, token, trajectory);
        let resp = verify(&store, &signer, &config, &req).unwrap();
        assert_eq!(resp.reason, Reason::LowCoverage);
    }

    #[test]
    fn too_fast_completion_is_flagged() {
        let (points, length) = generate_path("verify-test-fast", 400.0, 400.0);
        let (store, signer, config, id, nonce) = setup(points.clone(), length);
        let token = token_for(&signer, &id, &nonce, config.challenge_ttl_ms);
        let n = points.len();
        let trajectory: Vec<TrajectorySample> = points
            .iter()
            .enumerate()
            .map(|(i, p)| TrajectorySample {
                x: p.0,
                y: p.1,
                t: (i as i64) * 600 / (n as i64 - 1),
            })
            .collect();
        let req = request(&id, &nonce, token, trajectory);
        let resp = verify(&store, &signer, &config, &req).unwrap();
        assert_eq!(resp.reason, Reason::TooFast);
    }
}
