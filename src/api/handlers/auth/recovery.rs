//! Recovery phrases and envelope encryption for mailbox passwords.
//!
//! A mailbox password is sealed under a fresh random master key with
//! AES-256-GCM; the master key is in turn sealed under a key derived from a
//! human-readable recovery phrase. Only the two ciphertext blobs and a short
//! display hint are stored, so the password is recoverable with the phrase
//! and with nothing else.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Tokens per recovery phrase.
const PHRASE_TOKENS: usize = 8;
/// Lowercase letters at the start of each token.
const TOKEN_LETTERS: usize = 5;
/// Exclusive upper bound for the numeric half of a token.
const TOKEN_DIGIT_SPAN: u32 = 100_000;
/// Nonce size for AES-256-GCM (12 bytes).
const NONCE_SIZE: usize = 12;
/// AES-256 key size (32 bytes).
const KEY_SIZE: usize = 32;
/// GCM tag size (16 bytes).
const TAG_SIZE: usize = 16;

#[derive(Debug, Error)]
pub enum RecoveryError {
    /// The supplied recovery phrase does not open this envelope.
    #[error("recovery phrase does not match this envelope")]
    WrongPhrase,
    /// The stored envelope is structurally invalid or fails authentication
    /// under its own master key.
    #[error("recovery envelope is corrupted")]
    Corrupted,
    /// Key material could not be generated or the cipher rejected its input.
    #[error("failed to seal recovery envelope")]
    Seal,
}

/// The two ciphertext blobs persisted for a mailbox.
///
/// `wrapped_key` holds the master key (in its base64 form) sealed under the
/// phrase-derived key; `sealed_password` holds the mailbox password sealed
/// under the master key. Each blob is base64 over `nonce ‖ tag ‖ ciphertext`.
#[derive(Debug, Clone)]
pub struct SealedEnvelope {
    pub wrapped_key: String,
    pub sealed_password: String,
}

/// A freshly provisioned recovery bundle for a mailbox.
///
/// The phrase is shown to the admin exactly once and never persisted; the
/// hint and envelope are what the storage layer keeps.
#[derive(Debug)]
pub struct ProvisionedRecovery {
    pub phrase: String,
    pub hint: String,
    pub envelope: SealedEnvelope,
}

/// Generate a phrase, seal the password under it and compute the hint.
pub fn provision(mailbox_password: &str) -> Result<ProvisionedRecovery, RecoveryError> {
    let phrase = generate_recovery_phrase();
    let envelope = seal(mailbox_password, &phrase)?;
    let hint = phrase_hint(&phrase);
    Ok(ProvisionedRecovery {
        phrase,
        hint,
        envelope,
    })
}

/// Generate a recovery phrase: 8 tokens of 5 lowercase letters followed by a
/// zero-padded 5-digit number, sorted lexicographically and space-joined.
///
/// Sorting is deliberate: the rendered order carries no information about
/// generation order, and the same token set always renders identically.
#[must_use]
pub fn generate_recovery_phrase() -> String {
    let mut rng = OsRng;
    generate_phrase_with_rng(&mut rng)
}

fn generate_phrase_with_rng<R: Rng + ?Sized>(rng: &mut R) -> String {
    let mut tokens = Vec::with_capacity(PHRASE_TOKENS);
    for _ in 0..PHRASE_TOKENS {
        let mut token = String::with_capacity(TOKEN_LETTERS + 5);
        for _ in 0..TOKEN_LETTERS {
            token.push(char::from(rng.gen_range(b'a'..=b'z')));
        }
        let digits = rng.gen_range(0..TOKEN_DIGIT_SPAN);
        token.push_str(&format!("{digits:05}"));
        tokens.push(token);
    }
    tokens.sort();
    tokens.join(" ")
}

/// Short display fragment of a phrase, for user reassurance only.
///
/// Two leading and two trailing characters around an ellipsis; never enough
/// to reconstruct the phrase.
#[must_use]
pub fn phrase_hint(phrase: &str) -> String {
    let chars: Vec<char> = phrase.chars().collect();
    if chars.len() < 4 {
        return String::new();
    }
    let head: String = chars[..2].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{head}......{tail}")
}

/// Seal a mailbox password under a recovery phrase.
///
/// Generates a fresh 256-bit master key per call; re-keying therefore always
/// invalidates every previously issued phrase for the same mailbox.
pub fn seal(mailbox_password: &str, recovery_phrase: &str) -> Result<SealedEnvelope, RecoveryError> {
    let mut master_key = [0u8; KEY_SIZE];
    OsRng
        .try_fill_bytes(&mut master_key)
        .map_err(|_| RecoveryError::Seal)?;
    let sealed_password = encrypt_blob(&master_key, mailbox_password.as_bytes())?;
    // The master key travels in its base64 form so one decryption layer
    // yields printable text.
    let phrase_key = derive_phrase_key(recovery_phrase);
    let wrapped_key = encrypt_blob(&phrase_key, STANDARD.encode(master_key).as_bytes())?;
    Ok(SealedEnvelope {
        wrapped_key,
        sealed_password,
    })
}

/// Open an envelope with a recovery phrase, returning the mailbox password.
///
/// An authentication failure on the phrase layer maps to
/// [`RecoveryError::WrongPhrase`]; every failure past that point means the
/// stored blobs themselves are damaged.
pub fn open(envelope: &SealedEnvelope, recovery_phrase: &str) -> Result<String, RecoveryError> {
    let phrase_key = derive_phrase_key(recovery_phrase);
    let master_b64 = match decrypt_blob(&phrase_key, &envelope.wrapped_key) {
        Ok(bytes) => bytes,
        Err(BlobError::Auth) => return Err(RecoveryError::WrongPhrase),
        Err(BlobError::Malformed) => return Err(RecoveryError::Corrupted),
    };
    let master_key: [u8; KEY_SIZE] = STANDARD
        .decode(master_b64)
        .map_err(|_| RecoveryError::Corrupted)?
        .try_into()
        .map_err(|_| RecoveryError::Corrupted)?;
    let password =
        decrypt_blob(&master_key, &envelope.sealed_password).map_err(|_| RecoveryError::Corrupted)?;
    String::from_utf8(password).map_err(|_| RecoveryError::Corrupted)
}

fn derive_phrase_key(phrase: &str) -> [u8; KEY_SIZE] {
    Sha256::digest(phrase.as_bytes()).into()
}

enum BlobError {
    Malformed,
    Auth,
}

fn encrypt_blob(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> Result<String, RecoveryError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| RecoveryError::Seal)?;
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng
        .try_fill_bytes(&mut nonce)
        .map_err(|_| RecoveryError::Seal)?;
    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| RecoveryError::Seal)?;
    // The cipher appends the tag; the stored layout is nonce, tag, ciphertext.
    let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_SIZE);
    let mut blob = Vec::with_capacity(NONCE_SIZE + TAG_SIZE + ciphertext.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(tag);
    blob.extend_from_slice(ciphertext);
    Ok(STANDARD.encode(blob))
}

fn decrypt_blob(key: &[u8; KEY_SIZE], blob: &str) -> Result<Vec<u8>, BlobError> {
    let raw = STANDARD.decode(blob).map_err(|_| BlobError::Malformed)?;
    if raw.len() < NONCE_SIZE + TAG_SIZE {
        return Err(BlobError::Malformed);
    }
    let (nonce, rest) = raw.split_at(NONCE_SIZE);
    let (tag, ciphertext) = rest.split_at(TAG_SIZE);
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| BlobError::Malformed)?;
    let mut sealed = Vec::with_capacity(ciphertext.len() + TAG_SIZE);
    sealed.extend_from_slice(ciphertext);
    sealed.extend_from_slice(tag);
    cipher
        .decrypt(Nonce::from_slice(nonce), sealed.as_slice())
        .map_err(|_| BlobError::Auth)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn phrase_has_eight_sorted_tokens() {
        let phrase = generate_recovery_phrase();
        let tokens: Vec<&str> = phrase.split(' ').collect();
        assert_eq!(tokens.len(), PHRASE_TOKENS);
        for token in &tokens {
            assert_eq!(token.len(), 10);
            assert!(token[..5].chars().all(|ch| ch.is_ascii_lowercase()));
            assert!(token[5..].chars().all(|ch| ch.is_ascii_digit()));
        }
        let mut sorted = tokens.clone();
        sorted.sort_unstable();
        assert_eq!(tokens, sorted);
    }

    #[test]
    fn successive_phrases_differ() {
        assert_ne!(generate_recovery_phrase(), generate_recovery_phrase());
    }

    #[test]
    fn phrase_digits_are_zero_padded() {
        struct ZeroRng;
        impl RngCore for ZeroRng {
            fn next_u32(&mut self) -> u32 {
                0
            }
            fn next_u64(&mut self) -> u64 {
                0
            }
            fn fill_bytes(&mut self, dest: &mut [u8]) {
                dest.fill(0);
            }
            fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
                dest.fill(0);
                Ok(())
            }
        }
        let phrase = generate_phrase_with_rng(&mut ZeroRng);
        for token in phrase.split(' ') {
            assert_eq!(&token[5..], "00000");
        }
    }

    #[test]
    fn hint_keeps_only_edges() {
        let hint = phrase_hint("abcde01234 fghij56789");
        assert_eq!(hint, "ab......89");
        assert_eq!(phrase_hint("abc"), "");
    }

    #[test]
    fn envelope_round_trips() {
        let phrase = generate_recovery_phrase();
        let envelope = seal("CorrectHorse1234", &phrase).unwrap();
        let opened = open(&envelope, &phrase).unwrap();
        assert_eq!(opened, "CorrectHorse1234");
    }

    #[test]
    fn wrong_phrase_is_rejected() {
        let envelope = seal("hunter2", "abcde01234 fghij56789").unwrap();
        let err = open(&envelope, "abcde01234 fghij56780").unwrap_err();
        assert!(matches!(err, RecoveryError::WrongPhrase));
    }

    #[test]
    fn rekey_invalidates_old_phrase() {
        let first = provision("old-password").unwrap();
        let second = provision("new-password").unwrap();
        assert_ne!(first.phrase, second.phrase);
        let err = open(&second.envelope, &first.phrase).unwrap_err();
        assert!(matches!(err, RecoveryError::WrongPhrase));
        assert_eq!(open(&second.envelope, &second.phrase).unwrap(), "new-password");
    }

    #[test]
    fn tampered_wrapped_key_is_wrong_phrase() {
        let phrase = generate_recovery_phrase();
        let envelope = seal("secret", &phrase).unwrap();
        let mut raw = STANDARD.decode(&envelope.wrapped_key).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = SealedEnvelope {
            wrapped_key: STANDARD.encode(raw),
            sealed_password: envelope.sealed_password.clone(),
        };
        assert!(matches!(
            open(&tampered, &phrase).unwrap_err(),
            RecoveryError::WrongPhrase
        ));
    }

    #[test]
    fn malformed_blobs_are_corrupted() {
        let phrase = generate_recovery_phrase();
        let envelope = seal("secret", &phrase).unwrap();
        let truncated = SealedEnvelope {
            wrapped_key: "AAAA".to_string(),
            sealed_password: envelope.sealed_password.clone(),
        };
        assert!(matches!(
            open(&truncated, &phrase).unwrap_err(),
            RecoveryError::Corrupted
        ));

        let not_base64 = SealedEnvelope {
            wrapped_key: "not base64!".to_string(),
            sealed_password: envelope.sealed_password,
        };
        assert!(matches!(
            open(&not_base64, &phrase).unwrap_err(),
            RecoveryError::Corrupted
        ));
    }

    #[test]
    fn sealing_twice_yields_distinct_blobs() {
        let phrase = generate_recovery_phrase();
        let first = seal("same-password", &phrase).unwrap();
        let second = seal("same-password", &phrase).unwrap();
        assert_ne!(first.wrapped_key, second.wrapped_key);
        assert_ne!(first.sealed_password, second.sealed_password);
        assert_eq!(open(&first, &phrase).unwrap(), "same-password");
        assert_eq!(open(&second, &phrase).unwrap(), "same-password");
    }
}
