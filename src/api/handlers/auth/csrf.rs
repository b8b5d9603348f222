//! Per-session CSRF tokens.
//!
//! One random token per session, created lazily and stable until logout.
//! State-changing requests carry it in the `X-Csrf-Token` header; the
//! comparison against the stored value is constant-time.

use anyhow::{Context, Result};
use axum::Json;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use rand::{RngCore, rngs::OsRng};
use subtle::ConstantTimeEq;
use tracing::warn;

use super::session::{Session, SessionData};
use super::types::ErrorResponse;

/// Request header carrying the CSRF token on state-changing requests.
pub const CSRF_HEADER: &str = "x-csrf-token";

const TOKEN_BYTES: usize = 32;

/// Existing token, or a fresh 32-byte hex token stored into the session.
pub fn get_or_create_token(data: &mut SessionData) -> Result<String> {
    if let Some(token) = &data.csrf_token {
        return Ok(token.clone());
    }
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate CSRF token")?;
    let token = hex::encode(bytes);
    data.csrf_token = Some(token.clone());
    Ok(token)
}

/// Constant-time comparison of a submitted token against the session's.
///
/// An absent or empty submitted token fails, as does a session that never
/// had a token issued.
#[must_use]
pub fn validate(data: &SessionData, submitted: Option<&str>) -> bool {
    let Some(stored) = data.csrf_token.as_deref() else {
        return false;
    };
    let Some(submitted) = submitted else {
        return false;
    };
    if submitted.is_empty() {
        return false;
    }
    stored.as_bytes().ct_eq(submitted.as_bytes()).into()
}

/// Gate for state-changing handlers.
///
/// The rejection carries a generic message only; details stay in the log.
pub fn require_csrf(session: &Session, headers: &HeaderMap) -> Result<(), Response> {
    let submitted = headers.get(CSRF_HEADER).and_then(|value| value.to_str().ok());
    if session.validate_csrf_token(submitted) {
        return Ok(());
    }
    warn!("Rejected state-changing request with missing or invalid CSRF token");
    Err((
        StatusCode::FORBIDDEN,
        Json(ErrorResponse::new("invalid csrf token")),
    )
        .into_response())
}
