//! The peek oracle.
//!
//! Reveals a short forward window of the path near the client's reported
//! cursor, gated by rate, budget, distance-to-path, and forward-progress /
//! backtrack checks so that polling `/peek` cannot be used to reconstruct
//! the whole path cheaply. Every gate runs inside the same
//! [`crate::store::ChallengeStore::with_challenge`] critical section as the
//! state it mutates, so a burst of concurrent peeks on one challenge can't
//! race past the rate or budget check.

use serde::Serialize;

use crate::config::Config;
use crate::error::CaptchaError;
use crate::geometry::{distance_to_end, lookahead, min_distance_to_polyline, nearest_projection};
use crate::store::{now_ms, Challenge, ChallengeStore};
use crate::token::Signer;
use crate::{Point, Polyline};

/// Successful peek response, wire-shaped per the external interface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeekResponse {
    /// Forward-revealed path window.
    pub ahead: Polyline,
    /// Backward-revealed path window; always empty in this design, kept in
    /// the wire schema as a reserved slot for future use.
    pub behind: Polyline,
    /// Remaining arc length to the end of the path from the cursor.
    pub distance_to_end: f64,
    /// Revealed only once the cursor is within `finish_reveal_px` of the end.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish: Option<Point>,
}

/// Evaluate one peek request against a challenge, performing the full
/// precondition chain and, on success, the atomic progress update, all under
/// a single row lock.
pub fn peek(
    store: &dyn ChallengeStore,
    signer: &Signer,
    config: &Config,
    challenge_id: &str,
    nonce: &str,
    token: &str,
    cursor: Point,
) -> Result<PeekResponse, CaptchaError> {
    let now = now_ms();
    let claims = signer.verify(token)?;

    store.with_challenge(challenge_id, &mut |challenge: &mut Challenge| {
        evaluate(challenge, config, challenge_id, nonce, &claims.cid, &claims.nonce, cursor, now)
    })
}

#[allow(clippy::too_many_arguments)]
fn evaluate(
    challenge: &mut Challenge,
    config: &Config,
    challenge_id: &str,
    request_nonce: &str,
    claim_cid: &str,
    claim_nonce: &str,
    cursor: Point,
    now: i64,
) -> Result<PeekResponse, CaptchaError> {
    let e = &config.enforcement;

    // 1. existence is guaranteed by the caller's with_challenge lookup; only
    // the one-shot flag remains to check here.
    if challenge.nonce_used {
        return Err(CaptchaError::ChallengeUsed);
    }

    // 2. token claims must match this exact challenge and the nonce supplied
    // in the request body.
    if claim_cid != challenge_id || claim_nonce != challenge.nonce || request_nonce != challenge.nonce {
        return Err(CaptchaError::TokenMismatch);
    }

    // 3. TTL.
    if challenge.is_expired(now) {
        return Err(CaptchaError::ChallengeExpired);
    }

    // `last_peek_at` is only `None` before the first accepted peek; there is
    // nothing to rate-limit against yet, so the gate only applies from the
    // second peek onward. The `created_at` fallback below is still correct
    // for step 7's forward-progress `dt`, which is about bounding cursor
    // advance since issuance either way.
    if e.peek_rate {
        if let Some(last_peek_at) = challenge.last_peek_at {
            if now - last_peek_at < config.peek_min_interval_ms as i64 {
                return Err(CaptchaError::PeekRateLimit);
            }
        }
    }

    let last_peek_at = challenge.last_peek_at.unwrap_or(challenge.created_at);

    // 5. budget.
    if e.peek_budget && challenge.peek_count >= config.peek_max_count {
        return Err(CaptchaError::PeekBudget);
    }

    // 6. distance gate: off-path cursors still consume rate/budget but get
    // nothing revealed.
    let max_tolerance = challenge.tolerance_mouse_px.max(challenge.tolerance_touch_px);
    let distance = min_distance_to_polyline(cursor, &challenge.points);
    if e.peek_distance && distance > max_tolerance * config.peek_distance_factor {
        challenge.peek_count += 1;
        challenge.last_peek_at = Some(now);
        let distance_to_end = distance_to_end(&challenge.points, cursor);
        return Ok(PeekResponse {
            ahead: Vec::new(),
            behind: Vec::new(),
            distance_to_end,
            finish: None,
        });
    }

    let pos = nearest_projection(&challenge.points, cursor).pos;
    let dt = (now - last_peek_at).max(1) as f64;

    // 7. forward progress.
    if e.peek_state {
        let max_advance =
            challenge.peek_pos + config.peek_max_advance_px_per_s * (dt / 1000.0) + config.peek_advance_margin_px;
        if pos > max_advance {
            return Err(CaptchaError::PeekJump);
        }
    }

    // 8. backtrack.
    if e.peek_state && pos < challenge.peek_pos - config.progress_backtrack_px {
        return Err(CaptchaError::PeekBacktrack);
    }

    challenge.peek_pos = challenge.peek_pos.max(pos);
    challenge.last_peek_at = Some(now);
    challenge.peek_count += 1;

    let ahead = lookahead(&challenge.points, cursor, config.peek_ahead_px, config.peek_behind_px);
    let distance_to_end_val = distance_to_end(&challenge.points, cursor);
    let finish = if distance_to_end_val <= config.finish_reveal_px {
        challenge.points.last().copied()
    } else {
        None
    };

    Ok(PeekResponse {
        ahead,
        behind: Vec::new(),
        distance_to_end: distance_to_end_val,
        finish,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryChallengeStore;
    use crate::token::Claims;

    fn setup() -> (InMemoryChallengeStore, Signer, Config, String) {
        let store = InMemoryChallengeStore::new();
        let signer = Signer::new(b"test-secret".to_vec());
        let config = Config::default_with_secret(b"test-secret".to_vec());
        let id = "chal-1".to_string();
        store.save(Challenge {
            id: id.clone(),
            seed: "seed".into(),
            points: vec![(0.0, 0.0), (100.0, 0.0), (200.0, 0.0)],
            path_length: 200.0,
            ttl_ms: config.challenge_ttl_ms,
            nonce: "nonce-1".into(),
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
        (store, signer, config, id)
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
    fn on_path_peek_reveals_forward_window() {
        let (store, signer, config, id) = setup();
        let token = token_for(&signer, &id, "nonce-1", config.challenge_ttl_ms);
        let resp = peek(&store, &signer, &config, &id, "nonce-1", &token, (10.0, 0.0)).unwrap();
        assert!(!resp.ahead.is_empty());
        assert!(resp.behind.is_empty());
    }

    #[test]
    fn off_path_cursor_still_bumps_counters_but_reveals_nothing() {
        let (store, signer, config, id) = setup();
        let token = token_for(&signer, &id, "nonce-1", config.challenge_ttl_ms);
        let resp = peek(&store, &signer, &config, &id, "nonce-1", &token, (10.0, 100.0)).unwrap();
        assert!(resp.ahead.is_empty());
        let challenge = store.get(&id).unwrap();
        assert_eq!(challenge.peek_count, 1);
    }

    #[test]
    fn first_peek_is_never_rate_limited_even_immediately_after_issuance() {
        let (store, signer, config, id) = setup();
        let token = token_for(&signer, &id, "nonce-1", config.challenge_ttl_ms);
        // `setup` just saved the challenge, so `last_peek_at` is still `None`
        // and `now - created_at` is well under `peek_min_interval_ms`.
        let resp = peek(&store, &signer, &config, &id, "nonce-1", &token, (10.0, 0.0)).unwrap();
        assert!(!resp.ahead.is_empty());
    }

    #[test]
    fn second_peek_too_soon_hits_rate_limit() {
        let (store, signer, config, id) = setup();
        let token = token_for(&signer, &id, "nonce-1", config.challenge_ttl_ms);
        peek(&store, &signer, &config, &id, "nonce-1", &token, (10.0, 0.0)).unwrap();
        let err = peek(&store, &signer, &config, &id, "nonce-1", &token, (20.0, 0.0)).unwrap_err();
        assert!(matches!(err, CaptchaError::PeekRateLimit));
    }

    #[test]
    fn used_challenge_rejects_peek() {
        let (store, signer, config, id) = setup();
        store
            .with_challenge(&id, &mut |c: &mut Challenge| {
                c.nonce_used = true;
                Ok::<_, CaptchaError>(())
            })
            .unwrap();
        let token = token_for(&signer, &id, "nonce-1", config.challenge_ttl_ms);
        let err = peek(&store, &signer, &config, &id, "nonce-1", &token, (10.0, 0.0)).unwrap_err();
        assert!(matches!(err, CaptchaError::ChallengeUsed));
    }

    #[test]
    fn token_nonce_mismatch_is_rejected() {
        let (store, signer, config, id) = setup();
        let token = token_for(&signer, &id, "wrong-nonce", config.challenge_ttl_ms);
        let err = peek(&store, &signer, &config, &id, "wrong-nonce", &token, (10.0, 0.0)).unwrap_err();
        assert!(matches!(err, CaptchaError::TokenMismatch));
    }

    #[test]
    fn large_forward_jump_is_rejected() {
        let (store, signer, config, id) = setup();
        let token = token_for(&signer, &id, "nonce-1", config.challenge_ttl_ms);
        let err = peek(&store, &signer, &config, &id, "nonce-1", &token, (199.0, 0.0)).unwrap_err();
        assert!(matches!(err, CaptchaError::PeekJump));
    }

    #[test]
    fn finish_is_revealed_near_path_end() {
        let (store, signer, mut config, id) = setup();
        // Forward-progress gating is irrelevant to what's being tested here.
        config.enforcement.peek_state = false;
        let token = token_for(&signer, &id, "nonce-1", config.challenge_ttl_ms);
        let resp = peek(&store, &signer, &config, &id, "nonce-1", &token, (170.0, 0.0)).unwrap();
        assert!(resp.finish.is_some());
    }
}
