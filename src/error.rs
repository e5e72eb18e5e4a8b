//! Error type shared by the credential, session and admin components.

/// Failures surfaced to callers of the auth library.
///
/// Every variant renders a message suitable for showing to an end user.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("an account with email '{0}' already exists")]
    EmailTaken(String),
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("too many login attempts; try again in {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },
    #[error("user not found")]
    UserNotFound,
    #[error("session not found")]
    SessionNotFound,
    #[error("session expired")]
    SessionExpired,
    #[error("device fingerprint does not match the session")]
    FingerprintMismatch,
    #[error("invalid CSRF token")]
    CsrfMismatch,
    #[error("admin access locked; try again in {retry_after_secs} seconds")]
    AdminLocked { retry_after_secs: u64 },
    #[error("incorrect admin passcode ({remaining} attempts remaining)")]
    WrongPasscode { remaining: u32 },
    #[error("malformed stored record: {0}")]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub type Result<T, E = AuthError> = std::result::Result<T, E>;
