//! Challenge storage.
//!
//! The peek oracle and the verification engine both need to read-then-write
//! a single challenge row atomically (advance the peek cursor, consume the
//! one-shot nonce) without a global lock serializing unrelated challenges.
//! [`InMemoryChallengeStore`] follows the sharded-row-lock pattern: a
//! [`dashmap::DashMap`] keyed by challenge id, each entry wrapped in its own
//! [`parking_lot::Mutex`], so two different challenges never contend and a
//! single challenge is never read mid-update.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::config::PointerThresholds;
use crate::error::CaptchaError;
use crate::{Point, Polyline};

/// A single issued challenge and its mutable peek/consumption state.
#[derive(Debug, Clone)]
pub struct Challenge {
    /// Opaque challenge id, also the map key.
    pub id: String,
    /// The seed the path was generated from (kept for diagnostics/replay).
    pub seed: String,
    /// The full target polyline, never sent to the client in one piece.
    pub points: Polyline,
    /// Total arc length of `points`.
    pub path_length: f64,
    /// Time-to-live in milliseconds from `created_at`.
    pub ttl_ms: u64,
    /// Single-use nonce bound into the issued token.
    pub nonce: String,
    /// Effective path-following tolerance for a mouse pointer, in pixels —
    /// the base tolerance with this challenge's jitter already folded in.
    pub tolerance_mouse_px: f64,
    /// Effective path-following tolerance for a touch/pen pointer, in
    /// pixels — the base tolerance with this challenge's jitter folded in.
    pub tolerance_touch_px: f64,
    /// The signed jitter actually applied to the mouse tolerance, kept only
    /// for telemetry; already baked into `tolerance_mouse_px`.
    pub jitter_mouse_px: f64,
    /// The signed jitter actually applied to the touch tolerance, kept only
    /// for telemetry; already baked into `tolerance_touch_px`.
    pub jitter_touch_px: f64,
    /// Arc-length position of the furthest cursor the peek oracle has
    /// accepted so far. Starts at 0.
    pub peek_pos: f64,
    /// Number of peeks accepted so far.
    pub peek_count: u32,
    /// Epoch-ms timestamp of the last accepted peek, if any.
    pub last_peek_at: Option<i64>,
    /// Set once a verify has consumed this challenge's nonce.
    pub nonce_used: bool,
    /// Epoch-ms creation timestamp.
    pub created_at: i64,
}

impl Challenge {
    /// Whether `now_ms` is at or past this challenge's expiry.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.created_at + self.ttl_ms as i64
    }

    /// Effective tolerance for the given pointer type. `tolerance_*_px` is
    /// already the post-jitter value fixed at challenge creation; the
    /// `jitter_*_px` fields record only the signed offset that was applied,
    /// for telemetry, and are never added in again here.
    pub fn tolerance_for(&self, pointer: PointerKind) -> f64 {
        match pointer {
            PointerKind::Mouse => self.tolerance_mouse_px,
            PointerKind::Touch => self.tolerance_touch_px,
        }
    }
}

/// The two pointer families the wire protocol distinguishes; each carries
/// its own [`PointerThresholds`] and base tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerKind {
    /// Mouse (or generic pointer) input.
    Mouse,
    /// Touch or pen input.
    Touch,
}

impl PointerKind {
    /// The behavioural thresholds that apply to this pointer kind.
    pub fn thresholds(self) -> &'static PointerThresholds {
        match self {
            PointerKind::Mouse => &crate::config::MOUSE_THRESHOLDS,
            PointerKind::Touch => &crate::config::TOUCH_THRESHOLDS,
        }
    }
}

/// One row of the attempt-telemetry log: a permanent record of a completed
/// verify, independent of whether it passed.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AttemptLog {
    /// Opaque id for this attempt row.
    pub attempt_id: String,
    /// Client session identifier, carried through from the request.
    pub session_id: String,
    /// The challenge this attempt verified against.
    pub challenge_id: String,
    /// Pointer kind the client reported.
    pub pointer: PointerKind,
    /// Optional client OS family.
    pub os_family: Option<String>,
    /// Optional client browser family.
    pub browser_family: Option<String>,
    /// Optional device pixel ratio reported by the client.
    pub device_pixel_ratio: Option<f64>,
    /// The challenge's path seed.
    pub path_seed: String,
    /// The challenge's path length, pixels.
    pub path_length_px: f64,
    /// Effective tolerance applied for this attempt, pixels.
    pub tolerance_px: f64,
    /// The signed per-challenge jitter applied to the base tolerance.
    pub tolerance_jitter_px: f64,
    /// The challenge's TTL, milliseconds.
    pub ttl_ms: u64,
    /// Epoch-ms timestamp of the trajectory's first sample.
    pub started_at: i64,
    /// Epoch-ms timestamp the verify was recorded.
    pub ended_at: i64,
    /// Wall-clock duration of the submitted trajectory, milliseconds.
    pub duration_ms: u64,
    /// The closed-vocabulary outcome reason.
    pub outcome_reason: String,
    /// Fraction of samples within tolerance of the path.
    pub coverage_ratio: f64,
    /// Fraction of trajectory arc length drawn within tolerance.
    pub coverage_len_ratio: f64,
    /// Mean instantaneous speed across samples, px/s.
    pub mean_speed: f64,
    /// Maximum instantaneous speed across samples, px/s.
    pub max_speed: f64,
    /// Number of inter-sample gaps treated as a pause.
    pub pause_count: usize,
    /// Duration of each detected pause, milliseconds.
    pub pause_durations_ms: Vec<i64>,
    /// Mean and max per-sample distance to the path, pixels.
    pub deviation_stats: (f64, f64),
    /// Whether the speed-constancy heuristic tripped.
    pub speed_const_flag: bool,
    /// Whether the acceleration heuristic tripped.
    pub accel_flag: bool,
    /// Whether any individually-weak behavioural heuristic tripped.
    pub behavioural_flag: bool,
    /// Count of simultaneously tripped heuristic flags, kept for offline
    /// threshold tuning rather than acted on directly by the decision step.
    pub bot_score: u32,
    /// The raw submitted trajectory, kept for offline analysis.
    pub trajectory: Vec<(f64, f64, i64)>,
    /// Epoch-ms timestamp this row was written.
    pub created_at: i64,
}

impl serde::Serialize for PointerKind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            PointerKind::Mouse => serializer.serialize_str("mouse"),
            PointerKind::Touch => serializer.serialize_str("touch"),
        }
    }
}

/// Storage contract the peek oracle, verification engine, and HTTP handlers
/// share. An in-memory implementation is provided; a persistent one (sqlite,
/// redis) would implement the same trait without touching call sites.
pub trait ChallengeStore: Send + Sync {
    /// Insert a newly generated challenge.
    fn save(&self, challenge: Challenge);

    /// Fetch a snapshot of a challenge by id. Returns a clone: callers that
    /// need a read-modify-write must use [`ChallengeStore::with_challenge`]
    /// instead, to avoid racing a concurrent peek or verify.
    fn get(&self, id: &str) -> Option<Challenge>;

    /// Atomically read-modify-write the challenge with the given id. `f` runs
    /// under the challenge's row lock; other challenges are unaffected. Fails
    /// with [`CaptchaError::UnknownChallenge`] if the id doesn't exist.
    fn with_challenge<T>(
        &self,
        id: &str,
        f: &mut dyn FnMut(&mut Challenge) -> Result<T, CaptchaError>,
    ) -> Result<T, CaptchaError>;

    /// Append a completed attempt's telemetry.
    fn save_attempt(&self, log: AttemptLog);

    /// Drop challenges expired as of `now_ms`, bounding unbounded memory
    /// growth from abandoned challenges that are never verified.
    fn prune_expired(&self, now_ms: i64);
}

/// `dashmap` + per-row `parking_lot::Mutex` backed [`ChallengeStore`].
#[derive(Default)]
pub struct InMemoryChallengeStore {
    challenges: DashMap<String, Arc<Mutex<Challenge>>>,
    attempts: Mutex<Vec<AttemptLog>>,
}

impl InMemoryChallengeStore {
    /// Construct an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every recorded attempt, oldest first. Exposed for tests
    /// and admin/debug surfaces; not on the `ChallengeStore` trait because a
    /// persistent backend would paginate this rather than load it whole.
    pub fn attempts_snapshot(&self) -> Vec<AttemptLog> {
        self.attempts.lock().clone()
    }
}

impl ChallengeStore for InMemoryChallengeStore {
    fn save(&self, challenge: Challenge) {
        self.challenges
            .insert(challenge.id.clone(), Arc::new(Mutex::new(challenge)));
    }

    fn get(&self, id: &str) -> Option<Challenge> {
        self.challenges.get(id).map(|row| row.lock().clone())
    }

    fn with_challenge<T>(
        &self,
        id: &str,
        f: &mut dyn FnMut(&mut Challenge) -> Result<T, CaptchaError>,
    ) -> Result<T, CaptchaError> {
        let row = self
            .challenges
            .get(id)
            .ok_or(CaptchaError::UnknownChallenge)?;
        let mut guard = row.lock();
        f(&mut guard)
    }

    fn save_attempt(&self, log: AttemptLog) {
        self.attempts.lock().push(log);
    }

    fn prune_expired(&self, now_ms: i64) {
        self.challenges.retain(|_, row| !row.lock().is_expired(now_ms));
    }
}

/// Current time as epoch milliseconds. The sole wall-clock read in the
/// store layer; callers that need a stable `now` across several checks
/// should read it once and pass it down rather than calling this repeatedly.
/// Matches the teacher's own `chrono::Utc::now()` convention for wall-clock
/// reads rather than a hand-rolled `SystemTime` computation.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_challenge(id: &str) -> Challenge {
        Challenge {
            id: id.to_string(),
            seed: "seed".into(),
            points: vec![(0.0, 0.0), (100.0, 0.0)],
            path_length: 100.0,
            ttl_ms: 12_000,
            nonce: "nonce".into(),
            tolerance_mouse_px: 20.0,
            tolerance_touch_px: 30.0,
            jitter_mouse_px: 0.0,
            jitter_touch_px: 0.0,
            peek_pos: 0.0,
            peek_count: 0,
            last_peek_at: None,
            nonce_used: false,
            created_at: now_ms(),
        }
    }

    #[test]
    fn save_then_get_round_trips() {
        let store = InMemoryChallengeStore::new();
        store.save(sample_challenge("c1"));
        let got = store.get("c1").unwrap();
        assert_eq!(got.id, "c1");
        assert_eq!(got.path_length, 100.0);
    }

    #[test]
    fn unknown_challenge_errors() {
        let store = InMemoryChallengeStore::new();
        assert!(store.get("missing").is_none());
        let res = store.with_challenge("missing", &mut |_| Ok(()));
        assert!(matches!(res, Err(CaptchaError::UnknownChallenge)));
    }

    #[test]
    fn with_challenge_mutates_in_place() {
        let store = InMemoryChallengeStore::new();
        store.save(sample_challenge("c1"));
        store
            .with_challenge("c1", &mut |c: &mut Challenge| {
                c.peek_count += 1;
                c.peek_pos = 42.0;
                Ok(())
            })
            .unwrap();
        let got = store.get("c1").unwrap();
        assert_eq!(got.peek_count, 1);
        assert_eq!(got.peek_pos, 42.0);
    }

    #[test]
    fn prune_expired_removes_only_expired_rows() {
        let store = InMemoryChallengeStore::new();
        let mut fresh = sample_challenge("fresh");
        fresh.created_at = now_ms();
        fresh.ttl_ms = 60_000;
        let mut stale = sample_challenge("stale");
        stale.created_at = now_ms() - 100_000;
        stale.ttl_ms = 1_000;
        store.save(fresh);
        store.save(stale);
        store.prune_expired(now_ms());
        assert!(store.get("fresh").is_some());
        assert!(store.get("stale").is_none());
    }

    #[test]
    fn save_attempt_accumulates() {
        let store = InMemoryChallengeStore::new();
        store.save_attempt(AttemptLog {
            attempt_id: "attempt-1".into(),
            session_id: "sess-1".into(),
            challenge_id: "c1".into(),
            pointer: PointerKind::Mouse,
            os_family: None,
            browser_family: None,
            device_pixel_ratio: Some(1.0),
            path_seed: "seed".into(),
            path_length_px: 250.0,
            tolerance_px: 20.0,
            tolerance_jitter_px: 0.0,
            ttl_ms: 12_000,
            started_at: now_ms(),
            ended_at: now_ms(),
            duration_ms: 1200,
            outcome_reason: "success".into(),
            coverage_ratio: 0.9,
            coverage_len_ratio: 0.9,
            mean_speed: 150.0,
            max_speed: 400.0,
            pause_count: 0,
            pause_durations_ms: Vec::new(),
            deviation_stats: (2.0, 5.0),
            speed_const_flag: false,
            accel_flag: false,
            behavioural_flag: false,
            bot_score: 0,
            trajectory: vec![(0.0, 0.0, 0), (10.0, 0.0, 100)],
            created_at: now_ms(),
        });
        assert_eq!(store.attempts_snapshot().len(), 1);
    }
}
