//! Request/response types for session, login and registration endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::session::Role;

/// Generic error body; the message is deliberately terse.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    #[must_use]
    pub fn new(error: &str) -> Self {
        Self {
            error: error.to_string(),
        }
    }
}

/// Session state handed to frontends, including the CSRF token they must
/// echo on state-changing requests.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionInfo {
    pub logged_in: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    pub csrf_token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Body of a 401 login rejection.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginRejected {
    pub error: String,
    pub remaining_attempts: i32,
}

/// Body of a 429 rejection; mirrored in the `Retry-After` header.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RateLimited {
    pub error: String,
    pub retry_after_seconds: i64,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    /// Free-form justification shown to the moderating super admin.
    pub reason: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MessageResponse {
    pub message: String,
}

/// A confirmed registration awaiting moderation.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RegistrationSummary {
    pub id: i64,
    pub email: String,
    pub reason: String,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result};

    #[test]
    fn login_request_round_trips() -> Result<()> {
        let request = LoginRequest {
            email: "alice@example.com".to_string(),
            password: "hunter2bis".to_string(),
        };
        let value = serde_json::to_value(&request)?;
        let email = value
            .get("email")
            .and_then(serde_json::Value::as_str)
            .context("missing email")?;
        assert_eq!(email, "alice@example.com");
        let decoded: LoginRequest = serde_json::from_value(value)?;
        assert_eq!(decoded.password, "hunter2bis");
        Ok(())
    }

    #[test]
    fn session_info_omits_absent_fields() -> Result<()> {
        let info = SessionInfo {
            logged_in: false,
            email: None,
            role: None,
            csrf_token: "ab".repeat(32),
        };
        let value = serde_json::to_value(&info)?;
        assert!(value.get("email").is_none());
        assert!(value.get("role").is_none());
        Ok(())
    }

    #[test]
    fn rate_limited_body_round_trips() -> Result<()> {
        let body = RateLimited {
            error: "too many attempts".to_string(),
            retry_after_seconds: 1800,
        };
        let value = serde_json::to_value(&body)?;
        let decoded: RateLimited = serde_json::from_value(value)?;
        assert_eq!(decoded.retry_after_seconds, 1800);
        Ok(())
    }
}
