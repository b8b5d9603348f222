//! Signed session identifiers and the typed state they carry.
//!
//! A session row is addressed by a random hex id which only ever travels
//! inside a signed cookie: `session_id=<hex_id>.<hex_hmac>`. The HMAC-SHA256
//! signature covers the raw id with a server-held secret and is checked on
//! every request; a cookie that fails validation is the same as no cookie.

use anyhow::{Result, anyhow};
use axum::http::{HeaderMap, HeaderValue, header::InvalidHeaderValue};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use utoipa::ToSchema;
use uuid::Uuid;

use super::csrf;

type HmacSha256 = Hmac<Sha256>;

pub const SESSION_COOKIE_NAME: &str = "session_id";

/// Panel roles. `SuperAdmin` additionally moderates admin registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    SuperAdmin,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::SuperAdmin => "super_admin",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "admin" => Ok(Self::Admin),
            "super_admin" => Ok(Self::SuperAdmin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Typed session state, serialized to JSON text in the session row.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionData {
    #[serde(default)]
    pub logged_in: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csrf_token: Option<String>,
}

/// One request's session: an optional store id plus its data.
///
/// A fresh session has no id until the first save assigns one.
#[derive(Debug, Clone, Default)]
pub struct Session {
    id: Option<String>,
    pub data: SessionData,
}

impl Session {
    /// Rebuild a session loaded from the store.
    #[must_use]
    pub fn from_store(id: String, data: SessionData) -> Self {
        Self {
            id: Some(id),
            data,
        }
    }

    /// Empty session bound to an already-validated id whose row is gone.
    #[must_use]
    pub fn with_id(id: String) -> Self {
        Self {
            id: Some(id),
            data: SessionData::default(),
        }
    }

    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Return the session id, assigning a fresh random one when absent.
    pub fn ensure_id(&mut self) -> String {
        if let Some(id) = &self.id {
            return id.clone();
        }
        let id = Uuid::new_v4().simple().to_string();
        self.id = Some(id.clone());
        id
    }

    /// Mark the session authenticated. Id and CSRF token stay stable.
    pub fn login(&mut self, user_id: i64, email: String, role: Role) {
        self.data.logged_in = true;
        self.data.user_id = Some(user_id);
        self.data.email = Some(email);
        self.data.role = Some(role);
    }

    /// Drop all session state; the row and cookie stay alive.
    pub fn logout(&mut self) {
        self.data = SessionData::default();
    }

    /// CSRF token for this session, created lazily on first access.
    pub fn get_csrf_token(&mut self) -> Result<String> {
        csrf::get_or_create_token(&mut self.data)
    }

    /// Constant-time check of a submitted CSRF token.
    #[must_use]
    pub fn validate_csrf_token(&self, submitted: Option<&str>) -> bool {
        csrf::validate(&self.data, submitted)
    }
}

/// Shared per-request session handle installed by the middleware.
#[derive(Debug, Clone)]
pub struct SessionHandle(Arc<Mutex<Session>>);

impl SessionHandle {
    #[must_use]
    pub fn new(session: Session) -> Self {
        Self(Arc::new(Mutex::new(session)))
    }

    pub async fn lock(&self) -> MutexGuard<'_, Session> {
        self.0.lock().await
    }
}

/// Signs session ids for cookie transport and validates them on the way in.
#[derive(Clone)]
pub struct SessionSigner {
    secret: SecretString,
}

impl SessionSigner {
    #[must_use]
    pub const fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    /// Hex HMAC-SHA256 over the raw id bytes.
    pub fn sign(&self, id: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|_| anyhow!("failed to initialize session signer"))?;
        mac.update(id.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// `<id>.<signature>` as transported in the cookie.
    pub fn encode(&self, id: &str) -> Result<String> {
        let signature = self.sign(id)?;
        Ok(format!("{id}.{signature}"))
    }

    /// Recover a validated id from a transported cookie value.
    ///
    /// Returns `None` on structural or signature mismatch; the caller treats
    /// that as an absent session.
    #[must_use]
    pub fn decode(&self, value: &str) -> Option<String> {
        let (id, signature) = value.split_once('.')?;
        if id.is_empty() {
            return None;
        }
        self.validate(id, signature).then(|| id.to_string())
    }

    #[must_use]
    pub fn validate(&self, id: &str, signature_hex: &str) -> bool {
        let Ok(signature) = hex::decode(signature_hex) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
        else {
            return false;
        };
        mac.update(id.as_bytes());
        mac.verify_slice(&signature).is_ok()
    }
}

impl std::fmt::Debug for SessionSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSigner").finish_non_exhaustive()
    }
}

/// Build the `Set-Cookie` value carrying a signed session id.
pub(crate) fn session_cookie(
    signed_id: &str,
    secure: bool,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{SESSION_COOKIE_NAME}={signed_id}; Path=/; HttpOnly");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Pull the raw signed session value out of the `Cookie` header.
pub(crate) fn extract_session_cookie(headers: &HeaderMap) -> Option<String> {
    let header = headers.get(axum::http::header::COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let Some((key, val)) = pair.trim().split_once('=') else {
            continue;
        };
        if key.trim() == SESSION_COOKIE_NAME {
            return Some(val.trim().to_string());
        }
    }
    None
}
