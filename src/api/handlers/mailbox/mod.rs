//! Ownership-scoped mailbox and alias management.
//!
//! Admins only ever see mailboxes they own; anything outside that scope
//! answers 404 so the listing cannot be used to probe other tenants'
//! addresses. Creation and rekeying hash the password with the configured
//! Dovecot scheme and seal it into a fresh recovery envelope, and every
//! mutation leaves a pending row for the external provisioning worker.
//! Forwarding aliases ride on the same ownership rows through their
//! destination mailbox.

use axum::{Json, http::StatusCode, response::IntoResponse, response::Response};

use super::auth::types::ErrorResponse;

pub(crate) mod alias;
pub(crate) mod provision;
pub(crate) mod recover;
mod storage;
pub(crate) mod types;

/// Shared 404 for unowned or unknown mailboxes and domains.
pub(super) fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(ErrorResponse::new("not found"))).into_response()
}

pub(super) fn mailbox_failed() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new("mailbox operation failed")),
    )
        .into_response()
}
