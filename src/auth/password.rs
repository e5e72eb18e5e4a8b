//! Password hashing, credential comparison and input validation.
//!
//! Stored hashes are self-describing:
//! `pbkdf2-sha256$<iterations>$<salt hex>$<hash hex>`

use crate::error::{AuthError, Result};
use rand::RngCore;
use sha2::Sha256;

/// Scheme tag at the start of every stored hash.
pub const HASH_SCHEME: &str = "pbkdf2-sha256";

/// Default number of PBKDF2 iterations.
pub const DEFAULT_ITERATIONS: u32 = 100_000;

/// Salt byte length for password hashing.
const SALT_BYTES: usize = 16;

/// Derived key length.
const HASH_BYTES: usize = 32;

const MIN_PASSWORD_LEN: usize = 8;
const MAX_PASSWORD_LEN: usize = 128;
const MAX_NAME_LEN: usize = 100;
const MAX_EMAIL_LEN: usize = 254;

/// Hash a password with a fresh random salt.
pub fn hash_password(password: &str, iterations: u32) -> String {
    let mut salt = [0u8; SALT_BYTES];
    rand::rng().fill_bytes(&mut salt);
    hash_password_with_salt(password, &salt, iterations)
}

/// Hash a password with an explicit salt.
pub fn hash_password_with_salt(password: &str, salt: &[u8], iterations: u32) -> String {
    let iterations = iterations.max(1);
    let derived = derive(password, salt, iterations);
    format!(
        "{HASH_SCHEME}${iterations}${}${}",
        hex::encode(salt),
        hex::encode(derived)
    )
}

/// Check a candidate password against a stored hash.
///
/// A stored value that does not parse never matches.
pub fn verify_password(candidate: &str, stored: &str) -> bool {
    let Some(parsed) = ParsedHash::parse(stored) else {
        return false;
    };
    let attempt = derive(candidate, &parsed.salt, parsed.iterations);
    constant_time_eq(&attempt, &parsed.hash)
}

/// Whether a stored value is in the current hash format.
pub fn is_supported_hash(stored: &str) -> bool {
    ParsedHash::parse(stored).is_some()
}

/// Spend the same work as a real verification; used when the user is unknown.
pub fn dummy_verify(candidate: &str, iterations: u32) {
    let _ = derive(candidate, &[0u8; SALT_BYTES], iterations.max(1));
}

struct ParsedHash {
    iterations: u32,
    salt: Vec<u8>,
    hash: Vec<u8>,
}

impl ParsedHash {
    fn parse(stored: &str) -> Option<Self> {
        let mut parts = stored.split('$');
        if parts.next()? != HASH_SCHEME {
            return None;
        }
        let iterations: u32 = parts.next()?.parse().ok().filter(|n| *n > 0)?;
        let salt = hex::decode(parts.next()?).ok()?;
        let hash = hex::decode(parts.next()?).ok()?;
        if parts.next().is_some() || salt.is_empty() || hash.len() != HASH_BYTES {
            return None;
        }
        Some(Self {
            iterations,
            salt,
            hash,
        })
    }
}

fn derive(password: &str, salt: &[u8], iterations: u32) -> [u8; HASH_BYTES] {
    let mut out = [0u8; HASH_BYTES];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut out);
    out
}

/// Constant-time byte comparison to prevent timing attacks.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Generate a random hex token of `bytes` random bytes.
pub fn generate_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

// ── Input validation ────────────────────────────────────────────

/// Enforce the site's password policy.
pub fn validate_password_strength(password: &str) -> Result<()> {
    let len = password.chars().count();
    if len < MIN_PASSWORD_LEN {
        return Err(AuthError::InvalidInput(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    if len > MAX_PASSWORD_LEN {
        return Err(AuthError::InvalidInput(format!(
            "Password must be at most {MAX_PASSWORD_LEN} characters"
        )));
    }
    if !password.chars().any(|c| c.is_lowercase()) {
        return Err(AuthError::InvalidInput(
            "Password must contain a lowercase letter".into(),
        ));
    }
    if !password.chars().any(|c| c.is_uppercase()) {
        return Err(AuthError::InvalidInput(
            "Password must contain an uppercase letter".into(),
        ));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(AuthError::InvalidInput(
            "Password must contain a number".into(),
        ));
    }
    Ok(())
}

/// Trim and lower-case an email, rejecting anything that is not `local@domain.tld`.
#[must_use]
pub fn normalize_email(email: &str) -> Option<String> {
    let normalized = email.trim().to_ascii_lowercase();
    if normalized.is_empty() || normalized.len() > MAX_EMAIL_LEN {
        return None;
    }
    if normalized.chars().any(char::is_whitespace) {
        return None;
    }
    let (local, domain) = normalized.split_once('@')?;
    if local.is_empty() || domain.contains('@') {
        return None;
    }
    let (host, tld) = domain.rsplit_once('.')?;
    if host.is_empty() || tld.is_empty() {
        return None;
    }
    Some(normalized)
}

/// Trim a display name and check its length.
pub fn validate_full_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(AuthError::InvalidInput("Full name cannot be empty".into()));
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(AuthError::InvalidInput(format!(
            "Full name too long (max {MAX_NAME_LEN} characters)"
        )));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAST: u32 = 10;

    #[test]
    fn hash_then_verify() {
        let stored = hash_password("Correct1horse", FAST);
        assert!(stored.starts_with("pbkdf2-sha256$10$"));
        assert!(verify_password("Correct1horse", &stored));
        assert!(!verify_password("correct1horse", &stored));
    }

    #[test]
    fn password_hash_is_deterministic_with_same_salt() {
        let h1 = hash_password_with_salt("test_password", b"fixed_salt_value", FAST);
        let h2 = hash_password_with_salt("test_password", b"fixed_salt_value", FAST);
        assert_eq!(h1, h2);
    }

    #[test]
    fn password_hash_differs_with_different_salt() {
        let h1 = hash_password_with_salt("test_password", b"salt_a", FAST);
        let h2 = hash_password_with_salt("test_password", b"salt_b", FAST);
        assert_ne!(h1, h2);
    }

    #[test]
    fn random_salts_differ() {
        assert_ne!(hash_password("Same1pass", FAST), hash_password("Same1pass", FAST));
    }

    #[test]
    fn malformed_stored_hash_never_matches() {
        assert!(!verify_password("anything", ""));
        assert!(!verify_password("anything", "plaintext"));
        assert!(!verify_password("anything", "pbkdf2-sha256$0$00$00"));
        assert!(!verify_password("anything", "pbkdf2-sha256$10$zz$00"));
        assert!(!verify_password("anything", "md5$10$00$00"));
        assert!(!is_supported_hash("plaintext"));
    }

    #[test]
    fn constant_time_eq_works() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"short", b"longer"));
    }

    #[test]
    fn generate_token_is_hex_of_requested_length() {
        let token = generate_token(32);
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_token(32));
    }

    #[test]
    fn password_policy() {
        assert!(validate_password_strength("Abcdefg1").is_ok());
        assert!(validate_password_strength("Abc1").is_err());
        assert!(validate_password_strength("abcdefg1").is_err());
        assert!(validate_password_strength("ABCDEFG1").is_err());
        assert!(validate_password_strength("Abcdefgh").is_err());

        let err = validate_password_strength("short").unwrap_err();
        assert!(err.to_string().contains("8 characters"));
    }

    #[test]
    fn email_normalization() {
        assert_eq!(
            normalize_email("  Student@LearnTAV.com ").as_deref(),
            Some("student@learntav.com")
        );
        assert!(normalize_email("").is_none());
        assert!(normalize_email("no-at-sign.com").is_none());
        assert!(normalize_email("a@b@c.com").is_none());
        assert!(normalize_email("user@localhost").is_none());
        assert!(normalize_email("user@.com").is_none());
        assert!(normalize_email("us er@site.com").is_none());
    }

    #[test]
    fn full_name_validation() {
        assert_eq!(validate_full_name("  Ada Lovelace ").unwrap(), "Ada Lovelace");
        assert!(validate_full_name("   ").is_err());
        assert!(validate_full_name(&"x".repeat(101)).is_err());
    }
}
