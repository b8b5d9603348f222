//! # Postkesto (Mail Server Administration Panel)
//!
//! `postkesto` is the administration panel for a Postfix/Dovecot mail
//! platform. It owns admin accounts, panel sessions and the mailbox
//! provisioning workflow; delivery itself is handled by external workers that
//! consume the pending rows this service writes.
//!
//! ## Sessions & CSRF
//!
//! Browser sessions are rows in Postgres referenced by an HMAC-signed cookie.
//! A tampered or unknown cookie silently degrades to a fresh anonymous
//! session. Every mutating request must echo the session's CSRF token in the
//! `X-Csrf-Token` header.
//!
//! ## Rate Limiting
//!
//! Login and registration are rate limited per key (account plus client
//! address) with a counting window and a hard block once the budget is spent.
//! Blocked probes are rejected without extending the block.
//!
//! ## Credentials & Recovery
//!
//! - **Admins:** Argon2id hashes, verified through the self-describing hash
//!   string.
//! - **Mailboxes:** hashes carry a Dovecot scheme marker (`{ARGON2ID}`,
//!   `{BLF-CRYPT}`, ...) selected at startup.
//! - **Recovery:** every mailbox password is sealed under AES-256-GCM behind
//!   an eight-token recovery phrase shown exactly once at provisioning time.
//!
//! ## Ownership Model
//!
//! Admins only ever see mailboxes they own; forwarding aliases follow the
//! mailbox they deliver to. Requests for resources owned by someone else
//! answer `404 Not Found` rather than `403 Forbidden` to prevent address
//! enumeration.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        // Should be a hex string (full SHA-1 is 40 chars, but could be short)
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }
}
