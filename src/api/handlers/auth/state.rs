//! Panel configuration and shared handler state.
//!
//! Everything configurable is carried in [`PanelConfig`], constructed once at
//! startup and injected into the handlers through [`PanelState`]. Components
//! never read ambient globals, so tests can run them with fixture configs and
//! substitute hashers.

use secrecy::SecretString;
use std::sync::Arc;

use super::password::{CredentialHasher, MailboxScheme};
use super::rate_limit::{RateLimitPolicy, RateLimiter};
use super::session::SessionSigner;

const DEFAULT_SESSION_TTL_SECONDS: i64 = 24 * 60 * 60;
/// 5 attempts in a 15 minute window, 30 minute block.
const DEFAULT_LOGIN_POLICY: RateLimitPolicy = RateLimitPolicy::new(5, 15, 30);
/// 3 attempts in a 60 minute window, 60 minute block.
const DEFAULT_REGISTRATION_POLICY: RateLimitPolicy = RateLimitPolicy::new(3, 60, 60);
const DEFAULT_MAX_MAILBOXES_PER_ADMIN: i64 = 50;
const DEFAULT_MAX_ALIASES_PER_MAILBOX: i64 = 100;
const DEFAULT_REGISTRATION_TTL_HOURS: i64 = 48;

#[derive(Clone, Debug)]
pub struct PanelConfig {
    base_url: String,
    session_secret: SecretString,
    session_ttl_seconds: i64,
    login_policy: RateLimitPolicy,
    registration_policy: RateLimitPolicy,
    mailbox_scheme: MailboxScheme,
    max_mailboxes_per_admin: i64,
    max_aliases_per_mailbox: i64,
    registration_ttl_hours: i64,
}

impl PanelConfig {
    #[must_use]
    pub fn new(base_url: String, session_secret: SecretString) -> Self {
        Self {
            base_url,
            session_secret,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            login_policy: DEFAULT_LOGIN_POLICY,
            registration_policy: DEFAULT_REGISTRATION_POLICY,
            mailbox_scheme: MailboxScheme::Argon2id,
            max_mailboxes_per_admin: DEFAULT_MAX_MAILBOXES_PER_ADMIN,
            max_aliases_per_mailbox: DEFAULT_MAX_ALIASES_PER_MAILBOX,
            registration_ttl_hours: DEFAULT_REGISTRATION_TTL_HOURS,
        }
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_login_policy(mut self, policy: RateLimitPolicy) -> Self {
        self.login_policy = policy;
        self
    }

    #[must_use]
    pub fn with_registration_policy(mut self, policy: RateLimitPolicy) -> Self {
        self.registration_policy = policy;
        self
    }

    #[must_use]
    pub fn with_mailbox_scheme(mut self, scheme: MailboxScheme) -> Self {
        self.mailbox_scheme = scheme;
        self
    }

    #[must_use]
    pub fn with_max_mailboxes_per_admin(mut self, limit: i64) -> Self {
        self.max_mailboxes_per_admin = limit;
        self
    }

    #[must_use]
    pub fn with_max_aliases_per_mailbox(mut self, limit: i64) -> Self {
        self.max_aliases_per_mailbox = limit;
        self
    }

    #[must_use]
    pub fn with_registration_ttl_hours(mut self, hours: i64) -> Self {
        self.registration_ttl_hours = hours;
        self
    }

    #[must_use]
    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    pub(super) fn login_policy(&self) -> RateLimitPolicy {
        self.login_policy
    }

    pub(super) fn registration_policy(&self) -> RateLimitPolicy {
        self.registration_policy
    }

    pub(crate) fn mailbox_scheme(&self) -> MailboxScheme {
        self.mailbox_scheme
    }

    pub(crate) fn max_mailboxes_per_admin(&self) -> i64 {
        self.max_mailboxes_per_admin
    }

    pub(crate) fn max_aliases_per_mailbox(&self) -> i64 {
        self.max_aliases_per_mailbox
    }

    pub(super) fn registration_ttl_hours(&self) -> i64 {
        self.registration_ttl_hours
    }

    /// Cookies are only marked `Secure` when the panel itself is served
    /// over HTTPS.
    pub(crate) fn cookie_secure(&self) -> bool {
        self.base_url.starts_with("https://")
    }

    pub(crate) fn signer(&self) -> SessionSigner {
        SessionSigner::new(self.session_secret.clone())
    }
}

/// Shared state injected into auth and mailbox handlers.
pub struct PanelState {
    config: PanelConfig,
    hasher: Arc<dyn CredentialHasher>,
    rate_limiter: RateLimiter,
}

impl PanelState {
    #[must_use]
    pub fn new(
        config: PanelConfig,
        hasher: Arc<dyn CredentialHasher>,
        rate_limiter: RateLimiter,
    ) -> Self {
        Self {
            config,
            hasher,
            rate_limiter,
        }
    }

    #[must_use]
    pub fn config(&self) -> &PanelConfig {
        &self.config
    }

    pub(crate) fn hasher(&self) -> &dyn CredentialHasher {
        self.hasher.as_ref()
    }

    pub(crate) fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }
}
