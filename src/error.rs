//! Shared error taxonomy.
//!
//! Every client-visible failure mode named in the external-interface surface
//! is a variant of [`CaptchaError`]. The verification *outcome* (e.g.
//! `low_coverage`) is not an error — a completed verify always returns
//! `200` with a [`crate::verify::Reason`] — this type is strictly for
//! requests that cannot be processed at all (unknown challenge, bad token,
//! rate limit, malformed body, internal failure).

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

/// The closed vocabulary of request-level failures.
#[derive(Debug, thiserror::Error)]
pub enum CaptchaError {
    /// No challenge exists with the given id.
    #[error("unknown challenge")]
    UnknownChallenge,
    /// The challenge's nonce has already been consumed by a prior verify.
    #[error("challenge already used")]
    ChallengeUsed,
    /// The challenge's TTL has elapsed.
    #[error("challenge expired")]
    ChallengeExpired,
    /// The token failed to parse or its signature did not verify.
    #[error("invalid token")]
    InvalidToken,
    /// The token verified but its claims do not match the request.
    #[error("token does not match challenge")]
    TokenMismatch,
    /// Too many peeks in too short a time on this challenge.
    #[error("peek rate limit exceeded")]
    PeekRateLimit,
    /// The per-challenge peek budget has been exhausted.
    #[error("peek budget exhausted")]
    PeekBudget,
    /// The cursor advanced further than the forward-progress bound allows.
    #[error("peek cursor jumped too far forward")]
    PeekJump,
    /// The cursor regressed further than the backtrack allowance permits.
    #[error("peek cursor backtracked too far")]
    PeekBacktrack,
    /// Malformed request: too few trajectory samples, bad JSON, etc.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Unexpected internal failure (store I/O, panics caught at the edge, etc).
    #[error("internal error: {0}")]
    Internal(String),
}

impl CaptchaError {
    /// The HTTP status code this error maps to.
    pub fn status_code(&self) -> StatusCode {
        match self {
            CaptchaError::UnknownChallenge => StatusCode::NOT_FOUND,
            CaptchaError::ChallengeUsed | CaptchaError::ChallengeExpired => StatusCode::GONE,
            CaptchaError::InvalidToken | CaptchaError::TokenMismatch => StatusCode::UNAUTHORIZED,
            CaptchaError::PeekRateLimit | CaptchaError::PeekBudget => StatusCode::TOO_MANY_REQUESTS,
            CaptchaError::PeekJump | CaptchaError::PeekBacktrack | CaptchaError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            CaptchaError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The stable machine-readable error code surfaced in the JSON body.
    pub fn code(&self) -> &'static str {
        match self {
            CaptchaError::UnknownChallenge => "unknownChallenge",
            CaptchaError::ChallengeUsed => "challengeUsed",
            CaptchaError::ChallengeExpired => "challengeExpired",
            CaptchaError::InvalidToken => "invalidToken",
            CaptchaError::TokenMismatch => "tokenMismatch",
            CaptchaError::PeekRateLimit => "peekRateLimit",
            CaptchaError::PeekBudget => "peekBudget",
            CaptchaError::PeekJump => "peekJump",
            CaptchaError::PeekBacktrack => "peekBacktrack",
            CaptchaError::BadRequest(_) => "badRequest",
            CaptchaError::Internal(_) => "internal",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for CaptchaError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = ErrorBody {
            error: self.code(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
