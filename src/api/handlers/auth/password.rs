//! Credential hashing for panel admins and mailbox users.
//!
//! Admin login credentials are Argon2id PHC strings. Mailbox credentials are
//! hashed with whichever scheme the deployment configures and carry the
//! Dovecot scheme marker (`{ARGON2ID}`, `{BLF-CRYPT}`, ...) so the mail
//! server can verify them without panel involvement. Hashing is deliberately
//! expensive and belongs only on authentication and credential-change paths.

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use pbkdf2::Pbkdf2;
use rand::rngs::OsRng;
use sha_crypt::{
    Sha256Params, Sha512Params, sha256_check, sha256_simple, sha512_check, sha512_simple,
};
use std::str::FromStr;
use thiserror::Error;

/// crypt(3) default; omitted from the encoded form by the sha-crypt crate.
const SHA_CRYPT_ROUNDS: usize = 5_000;

#[derive(Debug, Error)]
pub enum HashError {
    /// The configured algorithm identifier names no supported scheme.
    #[error("unsupported password scheme: {0}")]
    UnsupportedScheme(String),
    /// The stored hash does not parse under any supported family.
    #[error("stored password hash is malformed")]
    Malformed,
    #[error("password hashing failed: {0}")]
    Hash(String),
}

/// Mailbox password schemes, named by their configuration identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxScheme {
    Argon2id,
    Argon2i,
    Bcrypt,
    Sha512Crypt,
    Sha256Crypt,
    Pbkdf2,
}

impl MailboxScheme {
    /// Marker Dovecot expects in front of a hash of this scheme.
    #[must_use]
    pub const fn dovecot_prefix(self) -> &'static str {
        match self {
            Self::Argon2id => "{ARGON2ID}",
            Self::Argon2i => "{ARGON2I}",
            Self::Bcrypt => "{BLF-CRYPT}",
            Self::Sha512Crypt => "{SHA512-CRYPT}",
            Self::Sha256Crypt => "{SHA256-CRYPT}",
            Self::Pbkdf2 => "{PBKDF2}",
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Argon2id => "argon2id",
            Self::Argon2i => "argon2i",
            Self::Bcrypt => "bcrypt",
            Self::Sha512Crypt => "sha512-crypt",
            Self::Sha256Crypt => "sha256-crypt",
            Self::Pbkdf2 => "pbkdf2",
        }
    }
}

impl FromStr for MailboxScheme {
    type Err = HashError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "argon2id" => Ok(Self::Argon2id),
            "argon2i" => Ok(Self::Argon2i),
            "bcrypt" => Ok(Self::Bcrypt),
            "sha512-crypt" => Ok(Self::Sha512Crypt),
            "sha256-crypt" => Ok(Self::Sha256Crypt),
            "pbkdf2" => Ok(Self::Pbkdf2),
            other => Err(HashError::UnsupportedScheme(other.to_string())),
        }
    }
}

/// Hashing seam for the panel.
///
/// Injected so tests can swap in a cheap deterministic implementation
/// instead of paying real Argon2 cost parameters.
pub trait CredentialHasher: Send + Sync {
    /// Hash a panel admin's login password (Argon2id PHC string).
    fn hash_admin_password(&self, password: &str) -> Result<String, HashError>;

    /// Hash a mailbox password with the given scheme, Dovecot-prefixed.
    fn hash_mailbox_password(&self, password: &str, scheme: MailboxScheme)
        -> Result<String, HashError>;

    /// Verify a password against a stored hash of any supported family,
    /// tolerating an optional `{SCHEME}` marker on the stored value.
    fn verify(&self, password: &str, stored: &str) -> Result<bool, HashError>;
}

/// Production hasher with real cost parameters.
#[derive(Debug, Default, Clone, Copy)]
pub struct PanelHasher;

impl CredentialHasher for PanelHasher {
    fn hash_admin_password(&self, password: &str) -> Result<String, HashError> {
        argon2_hash(password, argon2::Algorithm::Argon2id)
    }

    fn hash_mailbox_password(
        &self,
        password: &str,
        scheme: MailboxScheme,
    ) -> Result<String, HashError> {
        let body = match scheme {
            MailboxScheme::Argon2id => argon2_hash(password, argon2::Algorithm::Argon2id)?,
            MailboxScheme::Argon2i => argon2_hash(password, argon2::Algorithm::Argon2i)?,
            MailboxScheme::Bcrypt => bcrypt::hash(password, bcrypt::DEFAULT_COST)
                .map_err(|err| HashError::Hash(err.to_string()))?,
            MailboxScheme::Sha512Crypt => {
                let params = Sha512Params::new(SHA_CRYPT_ROUNDS)
                    .map_err(|_| HashError::Hash("invalid sha512-crypt rounds".to_string()))?;
                sha512_simple(password, &params)
                    .map_err(|_| HashError::Hash("sha512-crypt hashing failed".to_string()))?
            }
            MailboxScheme::Sha256Crypt => {
                let params = Sha256Params::new(SHA_CRYPT_ROUNDS)
                    .map_err(|_| HashError::Hash("invalid sha256-crypt rounds".to_string()))?;
                sha256_simple(password, &params)
                    .map_err(|_| HashError::Hash("sha256-crypt hashing failed".to_string()))?
            }
            MailboxScheme::Pbkdf2 => {
                let salt = SaltString::generate(&mut OsRng);
                Pbkdf2
                    .hash_password(password.as_bytes(), &salt)
                    .map_err(|err| HashError::Hash(err.to_string()))?
                    .to_string()
            }
        };
        Ok(format!("{}{body}", scheme.dovecot_prefix()))
    }

    fn verify(&self, password: &str, stored: &str) -> Result<bool, HashError> {
        let body = strip_scheme_prefix(stored);
        if body.starts_with("$argon2") {
            let parsed = PasswordHash::new(body).map_err(|_| HashError::Malformed)?;
            Ok(Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok())
        } else if body.starts_with("$2") {
            bcrypt::verify(password, body).map_err(|_| HashError::Malformed)
        } else if body.starts_with("$6$") {
            Ok(sha512_check(password, body).is_ok())
        } else if body.starts_with("$5$") {
            Ok(sha256_check(password, body).is_ok())
        } else if body.starts_with("$pbkdf2") {
            let parsed = PasswordHash::new(body).map_err(|_| HashError::Malformed)?;
            Ok(Pbkdf2.verify_password(password.as_bytes(), &parsed).is_ok())
        } else {
            Err(HashError::Malformed)
        }
    }
}

fn argon2_hash(password: &str, algorithm: argon2::Algorithm) -> Result<String, HashError> {
    let argon2 = Argon2::new(algorithm, argon2::Version::V0x13, argon2::Params::default());
    let salt = SaltString::generate(&mut OsRng);
    Ok(argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| HashError::Hash(err.to_string()))?
        .to_string())
}

/// Strip an optional `{SCHEME}` marker from a stored hash.
fn strip_scheme_prefix(stored: &str) -> &str {
    if let Some(rest) = stored.strip_prefix('{') {
        if let Some(end) = rest.find('}') {
            return &rest[end + 1..];
        }
    }
    stored
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SCHEMES: [(MailboxScheme, &str); 6] = [
        (MailboxScheme::Argon2id, "{ARGON2ID}"),
        (MailboxScheme::Argon2i, "{ARGON2I}"),
        (MailboxScheme::Bcrypt, "{BLF-CRYPT}"),
        (MailboxScheme::Sha512Crypt, "{SHA512-CRYPT}"),
        (MailboxScheme::Sha256Crypt, "{SHA256-CRYPT}"),
        (MailboxScheme::Pbkdf2, "{PBKDF2}"),
    ];

    #[test]
    fn every_scheme_hashes_and_verifies() {
        let hasher = PanelHasher;
        for (scheme, prefix) in SCHEMES {
            let hash = hasher.hash_mailbox_password("hunter2bis", scheme).unwrap();
            assert!(hash.starts_with(prefix), "{scheme:?} missing {prefix}");
            assert!(hasher.verify("hunter2bis", &hash).unwrap(), "{scheme:?}");
            assert!(!hasher.verify("wrong-password", &hash).unwrap(), "{scheme:?}");
        }
    }

    #[test]
    fn admin_hash_is_argon2id() {
        let hasher = PanelHasher;
        let hash = hasher.hash_admin_password("s3cret-admin").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify("s3cret-admin", &hash).unwrap());
        assert!(!hasher.verify("S3cret-admin", &hash).unwrap());
    }

    #[test]
    fn verify_accepts_unprefixed_hashes() {
        let hasher = PanelHasher;
        let hash = hasher
            .hash_mailbox_password("pass-phrase", MailboxScheme::Bcrypt)
            .unwrap();
        let body = hash.strip_prefix("{BLF-CRYPT}").unwrap();
        assert!(hasher.verify("pass-phrase", body).unwrap());
    }

    #[test]
    fn unknown_scheme_identifier_is_fatal() {
        let err = "md5".parse::<MailboxScheme>().unwrap_err();
        assert!(matches!(err, HashError::UnsupportedScheme(name) if name == "md5"));
    }

    #[test]
    fn scheme_identifiers_round_trip() {
        for (scheme, _) in SCHEMES {
            assert_eq!(scheme.as_str().parse::<MailboxScheme>().unwrap(), scheme);
        }
    }

    #[test]
    fn unrecognized_stored_hash_is_malformed() {
        let hasher = PanelHasher;
        assert!(matches!(
            hasher.verify("anything", "plaintext-not-a-hash"),
            Err(HashError::Malformed)
        ));
        assert!(matches!(
            hasher.verify("anything", "{MD5}abcdef"),
            Err(HashError::Malformed)
        ));
    }

    #[test]
    fn salts_differ_between_calls() {
        let hasher = PanelHasher;
        let first = hasher
            .hash_mailbox_password("same-input", MailboxScheme::Pbkdf2)
            .unwrap();
        let second = hasher
            .hash_mailbox_password("same-input", MailboxScheme::Pbkdf2)
            .unwrap();
        assert_ne!(first, second);
    }
}
