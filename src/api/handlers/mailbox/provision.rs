//! Mailbox listing, creation and deletion.

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
use crate::api::handlers::auth::recovery;
use crate::api::handlers::auth::session::SessionHandle;
use crate::api::handlers::auth::types::ErrorResponse;
use crate::api::handlers::auth::utils::{normalize_email, valid_email};

use super::storage::{self, CreateOutcome};
use super::types::{CreateMailboxRequest, MailboxCreated, MailboxSummary};
use super::{mailbox_failed, not_found};

#[utoipa::path(
    get,
    path = "/v1/mailboxes",
    responses(
        (status = 200, description = "Mailboxes owned by the calling admin", body = [MailboxSummary]),
        (status = 401, description = "Authentication required", body = ErrorResponse),
        (status = 500, description = "Listing failed", body = ErrorResponse)
    ),
    tag = "mailbox"
)]
pub async fn list_mailboxes(
    Extension(pool): Extension<PgPool>,
    Extension(session): Extension<SessionHandle>,
) -> impl IntoResponse {
    let principal = {
        let session = session.lock().await;
        match require_auth(&session) {
            Ok(principal) => principal,
            Err(response) => return response,
        }
    };

    match storage::list_mailboxes(&pool, principal.user_id).await {
        Ok(rows) => {
            let body: Vec<MailboxSummary> = rows
                .into_iter()
                .map(|row| MailboxSummary {
                    email: row.email,
                    active: row.active,
                })
                .collect();
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(err) => {
            error!("Failed to list mailboxes: {err}");
            mailbox_failed()
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/mailboxes",
    params(
        ("X-Csrf-Token" = String, Header, description = "Session CSRF token")
    ),
    request_body = CreateMailboxRequest,
    responses(
        (status = 201, description = "Mailbox created; the recovery phrase is shown only here", body = MailboxCreated),
        (status = 400, description = "Invalid payload", body = ErrorResponse),
        (status = 401, description = "Authentication required", body = ErrorResponse),
        (status = 403, description = "CSRF rejected or mailbox limit reached", body = ErrorResponse),
        (status = 404, description = "Domain not owned by the caller", body = ErrorResponse),
        (status = 409, description = "Address already exists", body = ErrorResponse),
        (status = 500, description = "Creation failed", body = ErrorResponse)
    ),
    tag = "mailbox"
)]
pub async fn create_mailbox(
    headers: HeaderMap,
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<PanelState>>,
    Extension(session): Extension<SessionHandle>,
    payload: Option<Json<CreateMailboxRequest>>,
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
        return bad_request("missing payload");
    };

    let email = normalize_email(&request.email);
    let Some((local, domain)) = email.rsplit_once('@') else {
        return bad_request("invalid email");
    };
    if local.is_empty() || !valid_email(&email) {
        return bad_request("invalid email");
    }
    if request.password.is_empty() {
        return bad_request("password required");
    }

    let Some(domain_id) = (match storage::domain_owned(&pool, principal.user_id, domain).await {
        Ok(domain_id) => domain_id,
        Err(err) => {
            error!("Failed to resolve domain ownership: {err}");
            return mailbox_failed();
        }
    }) else {
        // Unknown and unowned domains answer alike.
        return not_found();
    };

    match mailbox_quota_reached(&pool, &principal, state.config().max_mailboxes_per_admin()).await {
        Ok(false) => {}
        Ok(true) => {
            return (
                StatusCode::FORBIDDEN,
                Json(ErrorResponse::new("mailbox limit reached")),
            )
                .into_response();
        }
        Err(response) => return response,
    }

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

    let outcome = storage::create_mailbox(
        &pool,
        principal.user_id,
        domain_id,
        &email,
        &password_hash,
        &provisioned.envelope,
        &provisioned.hint,
    )
    .await;

    match outcome {
        Ok(CreateOutcome::Created) => (
            StatusCode::CREATED,
            Json(MailboxCreated {
                email,
                recovery_phrase: provisioned.phrase,
                recovery_hint: provisioned.hint,
            }),
        )
            .into_response(),
        Ok(CreateOutcome::Conflict) => (
            StatusCode::CONFLICT,
            Json(ErrorResponse::new("mailbox already exists")),
        )
            .into_response(),
        Err(err) => {
            error!("Failed to create mailbox: {err}");
            mailbox_failed()
        }
    }
}

#[utoipa::path(
    delete,
    path = "/v1/mailboxes/{email}",
    params(
        ("email" = String, Path, description = "Mailbox address"),
        ("X-Csrf-Token" = String, Header, description = "Session CSRF token")
    ),
    responses(
        (status = 204, description = "Mailbox deleted"),
        (status = 401, description = "Authentication required", body = ErrorResponse),
        (status = 403, description = "CSRF rejected", body = ErrorResponse),
        (status = 404, description = "Mailbox not owned by the caller", body = ErrorResponse),
        (status = 500, description = "Deletion failed", body = ErrorResponse)
    ),
    tag = "mailbox"
)]
pub async fn delete_mailbox(
    headers: HeaderMap,
    Extension(pool): Extension<PgPool>,
    Extension(session): Extension<SessionHandle>,
    Path(email): Path<String>,
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

    let email = normalize_email(&email);
    let user_id = match storage::owned_mailbox(&pool, principal.user_id, &email).await {
        Ok(Some(user_id)) => user_id,
        Ok(None) => return not_found(),
        Err(err) => {
            error!("Failed to resolve mailbox ownership: {err}");
            return mailbox_failed();
        }
    };

    match storage::delete_mailbox(&pool, user_id, &email).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            error!("Failed to delete mailbox: {err}");
            mailbox_failed()
        }
    }
}

async fn mailbox_quota_reached(
    pool: &PgPool,
    principal: &Principal,
    limit: i64,
) -> Result<bool, Response> {
    match storage::count_owned_mailboxes(pool, principal.user_id).await {
        Ok(count) => Ok(count >= limit),
        Err(err) => {
            error!("Failed to count owned mailboxes: {err}");
            Err(mailbox_failed())
        }
    }
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(message))).into_response()
}
