//! Forwarding alias management.
//!
//! Aliases are reachable through the mailbox they deliver to: an admin sees
//! exactly the aliases whose destination is one of their own mailboxes, and
//! an alias pointing anywhere else answers 404 like the mailbox itself
//! would. The alias source is unique across the whole platform, and each
//! destination carries a cap on how many aliases may point at it.

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
use crate::api::handlers::auth::principal::require_auth;
use crate::api::handlers::auth::session::SessionHandle;
use crate::api::handlers::auth::types::ErrorResponse;
use crate::api::handlers::auth::utils::{normalize_email, valid_email};

use super::storage::{self, AliasOutcome};
use super::types::{AliasSummary, CreateAliasRequest, UpdateAliasRequest};
use super::{mailbox_failed, not_found};

#[utoipa::path(
    get,
    path = "/v1/aliases",
    responses(
        (status = 200, description = "Aliases delivering to the caller's mailboxes", body = [AliasSummary]),
        (status = 401, description = "Authentication required", body = ErrorResponse),
        (status = 500, description = "Listing failed", body = ErrorResponse)
    ),
    tag = "alias"
)]
pub async fn list_aliases(
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

    match storage::list_aliases(&pool, principal.user_id).await {
        Ok(rows) => {
            let body: Vec<AliasSummary> = rows
                .into_iter()
                .map(|row| AliasSummary {
                    id: row.id,
                    source: row.source,
                    destination: row.destination,
                })
                .collect();
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(err) => {
            error!("Failed to list aliases: {err}");
            mailbox_failed()
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/aliases",
    params(
        ("X-Csrf-Token" = String, Header, description = "Session CSRF token")
    ),
    request_body = CreateAliasRequest,
    responses(
        (status = 201, description = "Alias created", body = AliasSummary),
        (status = 400, description = "Invalid payload", body = ErrorResponse),
        (status = 401, description = "Authentication required", body = ErrorResponse),
        (status = 403, description = "CSRF rejected or alias limit reached", body = ErrorResponse),
        (status = 404, description = "Destination not owned by the caller", body = ErrorResponse),
        (status = 409, description = "Source already in use", body = ErrorResponse),
        (status = 500, description = "Creation failed", body = ErrorResponse)
    ),
    tag = "alias"
)]
pub async fn create_alias(
    headers: HeaderMap,
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<PanelState>>,
    Extension(session): Extension<SessionHandle>,
    payload: Option<Json<CreateAliasRequest>>,
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
    let Some((source, destination)) = validate_pair(&request.source, &request.destination) else {
        return bad_request("invalid alias address");
    };

    let Some(domain_id) =
        (match storage::owned_mailbox_domain(&pool, principal.user_id, &destination).await {
            Ok(domain_id) => domain_id,
            Err(err) => {
                error!("Failed to resolve alias destination: {err}");
                return mailbox_failed();
            }
        })
    else {
        // Unknown and unowned destinations answer alike.
        return not_found();
    };

    match storage::count_aliases_for(&pool, &destination).await {
        Ok(count) if count >= state.config().max_aliases_per_mailbox() => {
            return (
                StatusCode::FORBIDDEN,
                Json(ErrorResponse::new("alias limit reached")),
            )
                .into_response();
        }
        Ok(_) => {}
        Err(err) => {
            error!("Failed to count aliases: {err}");
            return mailbox_failed();
        }
    }

    match storage::create_alias(&pool, domain_id, &source, &destination).await {
        Ok(AliasOutcome::Applied(id)) => (
            StatusCode::CREATED,
            Json(AliasSummary {
                id,
                source,
                destination,
            }),
        )
            .into_response(),
        Ok(AliasOutcome::Conflict) => alias_conflict(),
        Err(err) => {
            error!("Failed to create alias: {err}");
            mailbox_failed()
        }
    }
}

#[utoipa::path(
    put,
    path = "/v1/aliases/{id}",
    params(
        ("id" = i64, Path, description = "Alias id"),
        ("X-Csrf-Token" = String, Header, description = "Session CSRF token")
    ),
    request_body = UpdateAliasRequest,
    responses(
        (status = 200, description = "Alias updated", body = AliasSummary),
        (status = 400, description = "Invalid payload", body = ErrorResponse),
        (status = 401, description = "Authentication required", body = ErrorResponse),
        (status = 403, description = "CSRF rejected", body = ErrorResponse),
        (status = 404, description = "Alias or destination not owned by the caller", body = ErrorResponse),
        (status = 409, description = "Source already in use", body = ErrorResponse),
        (status = 500, description = "Update failed", body = ErrorResponse)
    ),
    tag = "alias"
)]
pub async fn update_alias(
    headers: HeaderMap,
    Extension(pool): Extension<PgPool>,
    Extension(session): Extension<SessionHandle>,
    Path(alias_id): Path<i64>,
    payload: Option<Json<UpdateAliasRequest>>,
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
    let Some((source, destination)) = validate_pair(&request.source, &request.destination) else {
        return bad_request("invalid alias address");
    };

    match resolve_owned_alias(&pool, principal.user_id, alias_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return not_found(),
        Err(response) => return response,
    }

    // The rewritten alias must still deliver into the caller's scope.
    let Some(domain_id) =
        (match storage::owned_mailbox_domain(&pool, principal.user_id, &destination).await {
            Ok(domain_id) => domain_id,
            Err(err) => {
                error!("Failed to resolve alias destination: {err}");
                return mailbox_failed();
            }
        })
    else {
        return not_found();
    };

    match storage::update_alias(&pool, alias_id, domain_id, &source, &destination).await {
        Ok(AliasOutcome::Applied(id)) => (
            StatusCode::OK,
            Json(AliasSummary {
                id,
                source,
                destination,
            }),
        )
            .into_response(),
        Ok(AliasOutcome::Conflict) => alias_conflict(),
        Err(err) => {
            error!("Failed to update alias: {err}");
            mailbox_failed()
        }
    }
}

#[utoipa::path(
    delete,
    path = "/v1/aliases/{id}",
    params(
        ("id" = i64, Path, description = "Alias id"),
        ("X-Csrf-Token" = String, Header, description = "Session CSRF token")
    ),
    responses(
        (status = 204, description = "Alias deleted"),
        (status = 401, description = "Authentication required", body = ErrorResponse),
        (status = 403, description = "CSRF rejected", body = ErrorResponse),
        (status = 404, description = "Alias not owned by the caller", body = ErrorResponse),
        (status = 500, description = "Deletion failed", body = ErrorResponse)
    ),
    tag = "alias"
)]
pub async fn delete_alias(
    headers: HeaderMap,
    Extension(pool): Extension<PgPool>,
    Extension(session): Extension<SessionHandle>,
    Path(alias_id): Path<i64>,
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

    match resolve_owned_alias(&pool, principal.user_id, alias_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return not_found(),
        Err(response) => return response,
    }

    match storage::delete_alias(&pool, alias_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            error!("Failed to delete alias: {err}");
            mailbox_failed()
        }
    }
}

async fn resolve_owned_alias(
    pool: &PgPool,
    admin_id: i64,
    alias_id: i64,
) -> Result<Option<storage::AliasRow>, Response> {
    storage::owned_alias(pool, admin_id, alias_id)
        .await
        .map_err(|err| {
            error!("Failed to resolve alias ownership: {err}");
            mailbox_failed()
        })
}

/// Normalize both addresses and reject anything that is not a full email.
fn validate_pair(source: &str, destination: &str) -> Option<(String, String)> {
    let source = normalize_email(source);
    let destination = normalize_email(destination);
    if valid_email(&source) && valid_email(&destination) {
        Some((source, destination))
    } else {
        None
    }
}

fn alias_conflict() -> Response {
    (
        StatusCode::CONFLICT,
        Json(ErrorResponse::new("alias already exists")),
    )
        .into_response()
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(message))).into_response()
}
