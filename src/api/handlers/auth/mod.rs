//! Auth handlers and supporting modules.
//!
//! This module is the panel's security layer: signed session cookies,
//! per-session CSRF tokens, database-backed rate limiting, and credential
//! hashing for both panel admins and hosted mailboxes.
//!
//! ## Sessions
//!
//! Session ids travel in an HMAC-signed `session_id` cookie. The id itself
//! carries no meaning; all state lives in the `panel_sessions` row, and a
//! cookie whose signature does not verify is ignored outright. Store outages
//! on load degrade to an anonymous session so reads never lock admins out.
//!
//! ## Rate Limiting
//!
//! Login and registration share one keyed limiter backed by the
//! `panel_rate_limits` table, scoped per client address (`ip:<addr>` and
//! `register:<addr>`). Exhausting a window's attempts sets a hard block whose
//! remaining duration is reported to the caller, and a successful login
//! clears its own key.
//!
//! ## Mailbox Credentials
//!
//! Mailbox password hashes are written in Dovecot's `{SCHEME}` prefix
//! notation so the mail stack can verify them directly. The scheme is chosen
//! per deployment; verification is self-describing and accepts any supported
//! scheme regardless of the configured default.
//!
//! ## Recovery Envelopes
//!
//! Every mailbox password is also sealed under a generated recovery phrase:
//! the password is encrypted with a random master key, and that key is
//! encrypted under a key derived from the phrase. Knowing the phrase is the
//! only way back to the password.

pub(crate) mod csrf;
pub(crate) mod login;
pub(crate) mod middleware;
pub(crate) mod moderation;
mod password;
pub(crate) mod principal;
mod rate_limit;
pub(crate) mod recovery;
pub(crate) mod register;
pub(crate) mod session;
mod state;
mod storage;
pub(crate) mod types;
pub(crate) mod utils;

pub use password::{CredentialHasher, MailboxScheme, PanelHasher};
pub use rate_limit::{RateLimitDecision, RateLimitPolicy, RateLimiter};
pub use session::Role;
pub use state::{PanelConfig, PanelState};
pub(crate) use storage::{delete_expired_registrations, delete_expired_sessions};

#[cfg(test)]
pub(crate) mod tests;
