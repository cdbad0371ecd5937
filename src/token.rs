//! Canonical-JSON HMAC-SHA256 token signer.
//!
//! A token binds `(challengeId, seed, ttl, nonce, issued-at)` into a
//! self-contained, stateless credential: `base64url(body).base64url(hmac)`,
//! both halves padding-free. The server never stores tokens — it only ever
//! re-derives the HMAC over the canonical body and compares it in constant
//! time, which is what lets [`crate::peek`] and [`crate::verify`] rebind a
//! request's `(cid, nonce, ttl)` without a session table.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::CaptchaError;

type HmacSha256 = Hmac<Sha256>;

/// The claim set carried by every issued token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Challenge id this token is bound to.
    pub cid: String,
    /// The challenge's path seed (informational; not trusted for security).
    pub seed: String,
    /// Challenge TTL in milliseconds, bound so a verify can detect a ttl
    /// mismatch between the request and the stored challenge.
    pub ttl: u64,
    /// Issued-at, Unix epoch milliseconds.
    pub iat: i64,
    /// The challenge's single-use nonce.
    pub nonce: String,
}

/// Stateless signer/verifier over a fixed secret.
#[derive(Clone)]
pub struct Signer {
    secret: Vec<u8>,
}

impl Signer {
    /// Build a signer over the given secret bytes.
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self { secret: secret.into() }
    }

    /// Sign `claims` into a `body.sig` token.
    pub fn sign(&self, claims: &Claims) -> Result<String, CaptchaError> {
        let body = canonical_json(claims)?;
        let sig = self.mac_over(body.as_bytes())?.finalize().into_bytes();
        Ok(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(body.as_bytes()),
            URL_SAFE_NO_PAD.encode(sig)
        ))
    }

    /// Verify a token and recover its claims. Fails closed on any malformed
    /// input, base64 error, or signature mismatch, collapsing every failure
    /// mode into [`CaptchaError::InvalidToken`] so callers can't distinguish
    /// "bad format" from "bad signature" (that distinction is not useful to
    /// a caller and would leak verification internals).
    pub fn verify(&self, token: &str) -> Result<Claims, CaptchaError> {
        let (body_b64, sig_b64) = token
            .split_once('.')
            .ok_or(CaptchaError::InvalidToken)?;
        let body = URL_SAFE_NO_PAD
            .decode(body_b64)
            .map_err(|_| CaptchaError::InvalidToken)?;
        let sig = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| CaptchaError::InvalidToken)?;

        self.mac_over(&body)?
            .verify_slice(&sig)
            .map_err(|_| CaptchaError::InvalidToken)?;

        serde_json::from_slice(&body).map_err(|_| CaptchaError::InvalidToken)
    }

    fn mac_over(&self, body: &[u8]) -> Result<HmacSha256, CaptchaError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| CaptchaError::Internal(format!("hmac key: {e}")))?;
        mac.update(body);
        Ok(mac)
    }
}

/// Serialize to canonical JSON: UTF-8, ascending-sorted keys, no whitespace.
/// Achieved by round-tripping through `serde_json::Value`, whose object map
/// is key-sorted as long as the `preserve_order` feature is not enabled.
fn canonical_json<T: Serialize>(value: &T) -> Result<String, CaptchaError> {
    let v = serde_json::to_value(value).map_err(|e| CaptchaError::Internal(e.to_string()))?;
    serde_json::to_string(&v).map_err(|e| CaptchaError::Internal(e.to_string()))
}
