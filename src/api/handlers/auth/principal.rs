//! Session-derived identity for authenticated panel routes.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use super::session::{Role, Session};
use super::types::ErrorResponse;

/// Identity of the admin behind a logged-in session.
#[derive(Debug, Clone)]
pub(crate) struct Principal {
    pub(crate) user_id: i64,
    pub(crate) email: String,
    pub(crate) role: Role,
}

/// Require a logged-in session, rejecting with 401 otherwise.
pub(crate) fn require_auth(session: &Session) -> Result<Principal, Response> {
    let data = &session.data;
    if !data.logged_in {
        return Err(unauthorized());
    }
    match (data.user_id, data.email.clone(), data.role) {
        (Some(user_id), Some(email), Some(role)) => Ok(Principal {
            user_id,
            email,
            role,
        }),
        _ => Err(unauthorized()),
    }
}

/// Require a super admin session.
///
/// Lesser roles get 404 so moderation routes stay invisible to them.
pub(crate) fn require_super_admin(session: &Session) -> Result<Principal, Response> {
    let principal = require_auth(session)?;
    if principal.role != Role::SuperAdmin {
        return Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("not found")),
        )
            .into_response());
    }
    Ok(principal)
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse::new("authentication required")),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result};

    fn logged_in_session(role: Role) -> Session {
        let mut session = Session::default();
        session.login(42, "ops@example.com".to_string(), role);
        session
    }

    #[test]
    fn require_auth_returns_principal() -> Result<()> {
        let session = logged_in_session(Role::Admin);
        let principal = require_auth(&session)
            .ok()
            .context("logged-in session should authenticate")?;
        assert_eq!(principal.user_id, 42);
        assert_eq!(principal.email, "ops@example.com");
        assert_eq!(principal.role, Role::Admin);
        Ok(())
    }

    #[test]
    fn require_auth_rejects_anonymous() {
        let session = Session::default();
        let response = require_auth(&session).err();
        assert_eq!(
            response.map(|resp| resp.status()),
            Some(StatusCode::UNAUTHORIZED)
        );
    }

    #[test]
    fn require_auth_rejects_partial_session_state() {
        let mut session = Session::default();
        session.data.logged_in = true;
        let response = require_auth(&session).err();
        assert_eq!(
            response.map(|resp| resp.status()),
            Some(StatusCode::UNAUTHORIZED)
        );
    }

    #[test]
    fn require_super_admin_hides_route_from_admins() {
        let session = logged_in_session(Role::Admin);
        let response = require_super_admin(&session).err();
        assert_eq!(
            response.map(|resp| resp.status()),
            Some(StatusCode::NOT_FOUND)
        );
    }

    #[test]
    fn require_super_admin_accepts_super_admins() {
        let session = logged_in_session(Role::SuperAdmin);
        assert!(require_super_admin(&session).is_ok());
    }
}
