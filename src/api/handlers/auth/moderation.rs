//! Super admin moderation of pending registrations.

use axum::{
    Json,
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use sqlx::PgPool;
use tracing::error;

use super::csrf;
use super::principal::require_super_admin;
use super::session::SessionHandle;
use super::storage::{
    ApproveOutcome, DenyOutcome, approve_registration, deny_registration,
    list_pending_registrations,
};
use super::types::{ErrorResponse, MessageResponse, RegistrationSummary};

#[utoipa::path(
    get,
    path = "/v1/admin/registrations",
    responses(
        (status = 200, description = "Confirmed registrations awaiting review", body = [RegistrationSummary]),
        (status = 401, description = "Authentication required", body = ErrorResponse),
        (status = 404, description = "Not found", body = ErrorResponse),
        (status = 500, description = "Listing failed", body = ErrorResponse)
    ),
    tag = "admin"
)]
pub async fn list_registrations(
    Extension(pool): Extension<PgPool>,
    Extension(session): Extension<SessionHandle>,
) -> impl IntoResponse {
    {
        let session = session.lock().await;
        if let Err(response) = require_super_admin(&session) {
            return response;
        }
    }

    match list_pending_registrations(&pool).await {
        Ok(rows) => {
            let body: Vec<RegistrationSummary> = rows
                .into_iter()
                .map(|row| RegistrationSummary {
                    id: row.id,
                    email: row.email,
                    reason: row.reason,
                    created_at: row.created_at,
                })
                .collect();
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(err) => {
            error!("Failed to list registrations: {err}");
            moderation_failed()
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/admin/registrations/{id}/approve",
    params(
        ("id" = i64, Path, description = "Registration id"),
        ("X-Csrf-Token" = String, Header, description = "Session CSRF token")
    ),
    responses(
        (status = 200, description = "Registration approved", body = MessageResponse),
        (status = 401, description = "Authentication required", body = ErrorResponse),
        (status = 403, description = "CSRF rejected", body = ErrorResponse),
        (status = 404, description = "Not found", body = ErrorResponse),
        (status = 409, description = "Unconfirmed registration or email conflict", body = ErrorResponse),
        (status = 500, description = "Approval failed", body = ErrorResponse)
    ),
    tag = "admin"
)]
pub async fn approve(
    headers: HeaderMap,
    Extension(pool): Extension<PgPool>,
    Extension(session): Extension<SessionHandle>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    {
        let session = session.lock().await;
        if let Err(response) = require_super_admin(&session) {
            return response;
        }
        if let Err(response) = csrf::require_csrf(&session, &headers) {
            return response;
        }
    }

    match approve_registration(&pool, id).await {
        Ok(ApproveOutcome::Approved { email }) => (
            StatusCode::OK,
            Json(MessageResponse {
                message: format!("approved {email}"),
            }),
        )
            .into_response(),
        Ok(ApproveOutcome::Unconfirmed) => (
            StatusCode::CONFLICT,
            Json(ErrorResponse::new("registration not confirmed")),
        )
            .into_response(),
        Ok(ApproveOutcome::Conflict) => (
            StatusCode::CONFLICT,
            Json(ErrorResponse::new("email already registered")),
        )
            .into_response(),
        Ok(ApproveOutcome::NotFound) => not_found(),
        Err(err) => {
            error!("Failed to approve registration: {err}");
            moderation_failed()
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/admin/registrations/{id}/deny",
    params(
        ("id" = i64, Path, description = "Registration id"),
        ("X-Csrf-Token" = String, Header, description = "Session CSRF token")
    ),
    responses(
        (status = 200, description = "Registration denied", body = MessageResponse),
        (status = 401, description = "Authentication required", body = ErrorResponse),
        (status = 403, description = "CSRF rejected", body = ErrorResponse),
        (status = 404, description = "Not found", body = ErrorResponse),
        (status = 500, description = "Denial failed", body = ErrorResponse)
    ),
    tag = "admin"
)]
pub async fn deny(
    headers: HeaderMap,
    Extension(pool): Extension<PgPool>,
    Extension(session): Extension<SessionHandle>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    {
        let session = session.lock().await;
        if let Err(response) = require_super_admin(&session) {
            return response;
        }
        if let Err(response) = csrf::require_csrf(&session, &headers) {
            return response;
        }
    }

    match deny_registration(&pool, id).await {
        Ok(DenyOutcome::Denied { email }) => (
            StatusCode::OK,
            Json(MessageResponse {
                message: format!("denied {email}"),
            }),
        )
            .into_response(),
        Ok(DenyOutcome::NotFound) => not_found(),
        Err(err) => {
            error!("Failed to deny registration: {err}");
            moderation_failed()
        }
    }
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse::new("not found")),
    )
        .into_response()
}

fn moderation_failed() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new("moderation failed")),
    )
        .into_response()
}
