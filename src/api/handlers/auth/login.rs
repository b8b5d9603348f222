//! Panel login, logout, and session introspection endpoints.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, warn};

use super::csrf;
use super::rate_limit::RateLimitDecision;
use super::session::SessionHandle;
use super::state::PanelState;
use super::storage::lookup_admin;
use super::types::{
    ErrorResponse, LoginRejected, LoginRequest, MessageResponse, RateLimited, SessionInfo,
};
use super::utils::{extract_client_ip, login_rate_key, normalize_email, valid_email};

#[utoipa::path(
    get,
    path = "/v1/auth/session",
    responses(
        (status = 200, description = "Current session state", body = SessionInfo),
        (status = 500, description = "Session error", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn session_info(Extension(session): Extension<SessionHandle>) -> impl IntoResponse {
    let mut session = session.lock().await;

    // Handing out the token here is what arms the login form.
    let csrf_token = match session.get_csrf_token() {
        Ok(token) => token,
        Err(err) => {
            error!("Failed to issue CSRF token: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("session error")),
            )
                .into_response();
        }
    };

    let body = SessionInfo {
        logged_in: session.data.logged_in,
        email: session.data.email.clone(),
        role: session.data.role,
        csrf_token,
    };
    (StatusCode::OK, Json(body)).into_response()
}

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    params(
        ("X-Csrf-Token" = String, Header, description = "Session CSRF token")
    ),
    responses(
        (status = 200, description = "Login success", body = SessionInfo),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 401, description = "Invalid credentials", body = LoginRejected),
        (status = 403, description = "CSRF rejected", body = ErrorResponse),
        (status = 429, description = "Rate limited", body = RateLimited),
        (status = 500, description = "Login failed", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<PanelState>>,
    Extension(session): Extension<SessionHandle>,
    payload: Option<Json<LoginRequest>>,
) -> impl IntoResponse {
    let mut session = session.lock().await;
    if let Err(response) = csrf::require_csrf(&session, &headers) {
        return response;
    }

    // The rate probe runs before validation so malformed requests also count,
    // and an active block wins even over correct credentials.
    let client_ip = extract_client_ip(&headers);
    let rate_key = login_rate_key(client_ip.as_deref().unwrap_or("unknown"));
    let decision = match state
        .rate_limiter()
        .check(&rate_key, state.config().login_policy())
        .await
    {
        Ok(decision) => decision,
        Err(err) => {
            error!("Rate limiter unavailable: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("login failed")),
            )
                .into_response();
        }
    };

    let remaining_attempts = match decision {
        RateLimitDecision::Blocked {
            retry_after_seconds,
        } => return rate_limited_response(retry_after_seconds),
        RateLimitDecision::Allowed { remaining } => remaining,
    };

    let Some(Json(request)) = payload else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("missing payload")),
        )
            .into_response();
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) || request.password.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("invalid email or password")),
        )
            .into_response();
    }

    let record = match lookup_admin(&pool, &email).await {
        Ok(Some(record)) => record,
        Ok(None) => return unauthorized(remaining_attempts),
        Err(err) => {
            error!("Login lookup failed: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("login failed")),
            )
                .into_response();
        }
    };

    let verified = match state
        .hasher()
        .verify(&request.password, &record.password_hash)
    {
        Ok(verified) => verified,
        Err(err) => {
            error!("Stored credential hash rejected: {err}");
            false
        }
    };
    if !verified {
        return unauthorized(remaining_attempts);
    }

    session.login(record.id, record.email.clone(), record.role);

    // A failed reset only means the counter decays on its own.
    if let Err(err) = state.rate_limiter().reset(&rate_key).await {
        warn!("Failed to reset login rate key: {err}");
    }

    let csrf_token = match session.get_csrf_token() {
        Ok(token) => token,
        Err(err) => {
            error!("Failed to issue CSRF token: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("login failed")),
            )
                .into_response();
        }
    };

    let body = SessionInfo {
        logged_in: true,
        email: Some(record.email),
        role: Some(record.role),
        csrf_token,
    };
    (StatusCode::OK, Json(body)).into_response()
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    params(
        ("X-Csrf-Token" = String, Header, description = "Session CSRF token")
    ),
    responses(
        (status = 200, description = "Logged out", body = MessageResponse),
        (status = 403, description = "CSRF rejected", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    Extension(session): Extension<SessionHandle>,
) -> impl IntoResponse {
    let mut session = session.lock().await;
    if let Err(response) = csrf::require_csrf(&session, &headers) {
        return response;
    }

    // The row and cookie survive; only the data resets to anonymous.
    session.logout();

    (
        StatusCode::OK,
        Json(MessageResponse {
            message: "logged out".to_string(),
        }),
    )
        .into_response()
}

fn unauthorized(remaining_attempts: i32) -> Response {
    let body = LoginRejected {
        error: "invalid credentials".to_string(),
        remaining_attempts,
    };
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}

pub(super) fn rate_limited_response(retry_after_seconds: i64) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(RateLimited {
            error: "too many attempts".to_string(),
            retry_after_seconds,
        }),
    )
        .into_response();
    if let Ok(value) = HeaderValue::from_str(&retry_after_seconds.to_string()) {
        response.headers_mut().insert(RETRY_AFTER, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result};

    #[test]
    fn rate_limited_response_sets_retry_after_header() -> Result<()> {
        let response = rate_limited_response(90);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let header = response
            .headers()
            .get(RETRY_AFTER)
            .context("Retry-After header should be set")?;
        assert_eq!(header.to_str()?, "90");
        Ok(())
    }

    #[test]
    fn unauthorized_reports_remaining_attempts() {
        let response = unauthorized(3);
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
