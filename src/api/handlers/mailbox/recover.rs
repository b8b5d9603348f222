//! Password changes and recovery-envelope access for owned mailboxes.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use sqlx::PgPool;
use tracing::error;

use crate::api::handlers::auth::PanelState;
use crate::api::handlers::auth::csrf;
use crate::api::handlers::auth::principal::{Principal, require_auth};
use crate::api::handlers::auth::recovery::{self, RecoveryError};
use crate::api::handlers::auth::session::SessionHandle;
use crate::api::handlers::auth::types::ErrorResponse;
use crate::api::handlers::auth::utils::normalize_email;

use super::storage;
use super::types::{
    ChangePasswordRequest, RecoverRequest, RecoveredPassword, RecoveryHintResponse, RekeyResponse,
};
use super::{mailbox_failed, not_found};

#[utoipa::path(
    post,
    path = "/v1/mailboxes/{email}/password",
    params(
        ("email" = String, Path, description = "Mailbox address"),
        ("X-Csrf-Token" = String, Header, description = "Session CSRF token")
    ),
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed; the old recovery phrase is dead", body = RekeyResponse),
        (status = 400, description = "Invalid payload", body = ErrorResponse),
        (status = 401, description = "Authentication required", body = ErrorResponse),
        (status = 403, description = "CSRF rejected", body = ErrorResponse),
        (status = 404, description = "Mailbox not owned by the caller", body = ErrorResponse),
        (status = 500, description = "Password change failed", body = ErrorResponse)
    ),
    tag = "mailbox"
)]
pub async fn change_password(
    headers: HeaderMap,
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<PanelState>>,
    Extension(session): Extension<SessionHandle>,
    Path(email): Path<String>,
    payload: Option<Json<ChangePasswordRequest>>,
) -> impl IntoResponse {
    let principal = {
        let session = session.lock().await;
        let principal = match require_auth(&session) {
            Ok(principal) => principal,
            Err(response) => return response,
        };
        if let Err(response) = csrf::require_csrf(&session, &headers) {
            return response;
        }
        principal
    };

    let Some(Json(request)) = payload else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("missing payload")),
        )
            .into_response();
    };
    if request.password.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("password required")),
        )
            .into_response();
    }

    let Some(user_id) = (match resolve_owned(&pool, &principal, &email).await {
        Ok(user_id) => user_id,
        Err(response) => return response,
    }) else {
        return not_found();
    };

    let password_hash = match state
        .hasher()
        .hash_mailbox_password(&request.password, state.config().mailbox_scheme())
    {
        Ok(hash) => hash,
        Err(err) => {
            error!("Failed to hash mailbox password: {err}");
            return mailbox_failed();
        }
    };

    let provisioned = match recovery::provision(&request.password) {
        Ok(provisioned) => provisioned,
        Err(err) => {
            error!("Failed to seal recovery envelope: {err}");
            return mailbox_failed();
        }
    };

    let updated = storage::update_mailbox_password(
        &pool,
        user_id,
        &password_hash,
        &provisioned.envelope,
        &provisioned.hint,
    )
    .await;

    match updated {
        Ok(()) => (
            StatusCode::OK,
            Json(RekeyResponse {
                recovery_phrase: provisioned.phrase,
                recovery_hint: provisioned.hint,
            }),
        )
            .into_response(),
        Err(err) => {
            error!("Failed to rekey mailbox: {err}");
            mailbox_failed()
        }
    }
}

#[utoipa::path(
    get,
    path = "/v1/mailboxes/{email}/recovery",
    params(
        ("email" = String, Path, description = "Mailbox address")
    ),
    responses(
        (status = 200, description = "Masked hint of the current recovery phrase", body = RecoveryHintResponse),
        (status = 401, description = "Authentication required", body = ErrorResponse),
        (status = 404, description = "Mailbox not owned by the caller", body = ErrorResponse),
        (status = 500, description = "Hint lookup failed", body = ErrorResponse)
    ),
    tag = "mailbox"
)]
pub async fn recovery_hint(
    Extension(pool): Extension<PgPool>,
    Extension(session): Extension<SessionHandle>,
    Path(email): Path<String>,
) -> impl IntoResponse {
    let principal = {
        let session = session.lock().await;
        match require_auth(&session) {
            Ok(principal) => principal,
            Err(response) => return response,
        }
    };

    let Some(user_id) = (match resolve_owned(&pool, &principal, &email).await {
        Ok(user_id) => user_id,
        Err(response) => return response,
    }) else {
        return not_found();
    };

    match storage::fetch_hint(&pool, user_id).await {
        Ok(Some(recovery_hint)) => {
            (StatusCode::OK, Json(RecoveryHintResponse { recovery_hint })).into_response()
        }
        Ok(None) => {
            // Envelopes are written in the same transaction as the mailbox,
            // so an owned mailbox without one is corrupted state.
            error!("Recovery envelope missing for an owned mailbox");
            mailbox_failed()
        }
        Err(err) => {
            error!("Failed to fetch recovery hint: {err}");
            mailbox_failed()
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/mailboxes/{email}/recovery",
    params(
        ("email" = String, Path, description = "Mailbox address"),
        ("X-Csrf-Token" = String, Header, description = "Session CSRF token")
    ),
    request_body = RecoverRequest,
    responses(
        (status = 200, description = "Recovered cleartext mailbox password", body = RecoveredPassword),
        (status = 400, description = "Invalid payload", body = ErrorResponse),
        (status = 401, description = "Authentication required", body = ErrorResponse),
        (status = 403, description = "CSRF rejected or wrong recovery phrase", body = ErrorResponse),
        (status = 404, description = "Mailbox not owned by the caller", body = ErrorResponse),
        (status = 500, description = "Envelope corrupted or recovery failed", body = ErrorResponse)
    ),
    tag = "mailbox"
)]
pub async fn recover_password(
    headers: HeaderMap,
    Extension(pool): Extension<PgPool>,
    Extension(session): Extension<SessionHandle>,
    Path(email): Path<String>,
    payload: Option<Json<RecoverRequest>>,
) -> impl IntoResponse {
    let principal = {
        let session = session.lock().await;
        let principal = match require_auth(&session) {
            Ok(principal) => principal,
            Err(response) => return response,
        };
        if let Err(response) = csrf::require_csrf(&session, &headers) {
            return response;
        }
        principal
    };

    let Some(Json(request)) = payload else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("missing payload")),
        )
            .into_response();
    };

    let Some(user_id) = (match resolve_owned(&pool, &principal, &email).await {
        Ok(user_id) => user_id,
        Err(response) => return response,
    }) else {
        return not_found();
    };

    let envelope = match storage::fetch_envelope(&pool, user_id).await {
        Ok(Some(envelope)) => envelope,
        Ok(None) => {
            error!("Recovery envelope missing for an owned mailbox");
            return mailbox_failed();
        }
        Err(err) => {
            error!("Failed to fetch recovery envelope: {err}");
            return mailbox_failed();
        }
    };

    match recovery::open(&envelope, &request.recovery_phrase) {
        Ok(mailbox_password) => {
            (StatusCode::OK, Json(RecoveredPassword { mailbox_password })).into_response()
        }
        Err(RecoveryError::WrongPhrase) => (
            StatusCode::FORBIDDEN,
            Json(ErrorResponse::new("wrong recovery phrase")),
        )
            .into_response(),
        Err(err) => {
            error!("Failed to open recovery envelope: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("recovery envelope corrupted")),
            )
                .into_response()
        }
    }
}

/// Ownership lookup shared by the per-mailbox routes; storage errors are
/// already mapped to a response.
async fn resolve_owned(
    pool: &PgPool,
    principal: &Principal,
    email: &str,
) -> Result<Option<i64>, Response> {
    let email = normalize_email(email);
    match storage::owned_mailbox(pool, principal.user_id, &email).await {
        Ok(user_id) => Ok(user_id),
        Err(err) => {
            error!("Failed to resolve mailbox ownership: {err}");
            Err(mailbox_failed())
        }
    }
}
