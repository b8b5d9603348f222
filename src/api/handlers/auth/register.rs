//! Admin self-registration and email confirmation endpoints.

use axum::{
    Json,
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use super::csrf;
use super::login::rate_limited_response;
use super::rate_limit::RateLimitDecision;
use super::session::SessionHandle;
use super::state::PanelState;
use super::storage::{
    ConfirmOutcome, RegistrationOutcome, admin_email_taken, confirm_registration,
    insert_registration,
};
use super::types::{ErrorResponse, MessageResponse, RateLimited, RegisterRequest};
use super::utils::{
    build_confirm_url, extract_client_ip, generate_confirmation_token, normalize_email,
    registration_rate_key, valid_email,
};

const MIN_PASSWORD_LENGTH: usize = 8;

#[utoipa::path(
    post,
    path = "/v1/auth/register",
    request_body = RegisterRequest,
    params(
        ("X-Csrf-Token" = String, Header, description = "Session CSRF token")
    ),
    responses(
        (status = 201, description = "Registration queued", body = MessageResponse),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 403, description = "CSRF rejected", body = ErrorResponse),
        (status = 409, description = "Email already in use", body = ErrorResponse),
        (status = 429, description = "Rate limited", body = RateLimited),
        (status = 500, description = "Registration failed", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn register(
    headers: HeaderMap,
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<PanelState>>,
    Extension(session): Extension<SessionHandle>,
    payload: Option<Json<RegisterRequest>>,
) -> impl IntoResponse {
    {
        let session = session.lock().await;
        if let Err(response) = csrf::require_csrf(&session, &headers) {
            return response;
        }
    }

    let client_ip = extract_client_ip(&headers);
    let rate_key = registration_rate_key(client_ip.as_deref().unwrap_or("unknown"));
    let decision = match state
        .rate_limiter()
        .check(&rate_key, state.config().registration_policy())
        .await
    {
        Ok(decision) => decision,
        Err(err) => {
            error!("Rate limiter unavailable: {err}");
            return registration_failed();
        }
    };
    if let RateLimitDecision::Blocked {
        retry_after_seconds,
    } = decision
    {
        return rate_limited_response(retry_after_seconds);
    }

    let Some(Json(request)) = payload else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("missing payload")),
        )
            .into_response();
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("invalid email")),
        )
            .into_response();
    }
    if request.password.len() < MIN_PASSWORD_LENGTH {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("password too short")),
        )
            .into_response();
    }
    let reason = request.reason.trim();
    if reason.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("reason required")),
        )
            .into_response();
    }

    match admin_email_taken(&pool, &email).await {
        Ok(false) => {}
        Ok(true) => return email_conflict(),
        Err(err) => {
            error!("Failed to check registration email: {err}");
            return registration_failed();
        }
    }

    let password_hash = match state.hasher().hash_admin_password(&request.password) {
        Ok(hash) => hash,
        Err(err) => {
            error!("Failed to hash admin password: {err}");
            return registration_failed();
        }
    };

    let token = match generate_confirmation_token() {
        Ok(token) => token,
        Err(err) => {
            error!("Failed to generate confirmation token: {err}");
            return registration_failed();
        }
    };
    let confirm_url = build_confirm_url(state.config().base_url(), &token);

    match insert_registration(
        &pool,
        &email,
        &password_hash,
        reason,
        &token,
        state.config().registration_ttl_hours(),
        &confirm_url,
    )
    .await
    {
        Ok(RegistrationOutcome::Created) => (
            StatusCode::CREATED,
            Json(MessageResponse {
                message: "confirmation email sent".to_string(),
            }),
        )
            .into_response(),
        Ok(RegistrationOutcome::Conflict) => email_conflict(),
        Err(err) => {
            error!("Failed to insert registration: {err}");
            registration_failed()
        }
    }
}

#[utoipa::path(
    get,
    path = "/v1/auth/confirm/{token}",
    params(
        ("token" = String, Path, description = "Confirmation token from the email link")
    ),
    responses(
        (status = 200, description = "Registration confirmed", body = MessageResponse),
        (status = 404, description = "Unknown or expired token", body = ErrorResponse),
        (status = 500, description = "Confirmation failed", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn confirm(
    Extension(pool): Extension<PgPool>,
    Path(token): Path<String>,
) -> impl IntoResponse {
    match confirm_registration(&pool, &token).await {
        Ok(ConfirmOutcome::Confirmed { .. }) => (
            StatusCode::OK,
            Json(MessageResponse {
                message: "registration confirmed".to_string(),
            }),
        )
            .into_response(),
        Ok(ConfirmOutcome::Invalid) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("unknown or expired token")),
        )
            .into_response(),
        Err(err) => {
            error!("Failed to confirm registration: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("confirmation failed")),
            )
                .into_response()
        }
    }
}

fn email_conflict() -> axum::response::Response {
    (
        StatusCode::CONFLICT,
        Json(ErrorResponse::new("email already registered")),
    )
        .into_response()
}

fn registration_failed() -> axum::response::Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new("registration failed")),
    )
        .into_response()
}
