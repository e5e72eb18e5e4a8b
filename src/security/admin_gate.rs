//! Admin passcode gate.
//!
//! The admin area is unlocked by a shared 4-digit passcode, independent of
//! user accounts. A successful unlock writes an admin session (default 4 h)
//! under `admin_auth_session`. Consecutive failures are counted under
//! `admin_auth_lockout`; reaching the limit (default 3) locks the gate for
//! `lockout_secs` (default 60), during which attempts are rejected without
//! comparing the code.
//!
//! ## Storage
//! The admin session stores the SHA-256 digest of the passcode that unlocked
//! it, so changing the configured passcode invalidates existing sessions.

use crate::auth::password::constant_time_eq;
use crate::clock::Clock;
use crate::config::AdminConfig;
use crate::error::{AuthError, Result};
use crate::security::audit::{SecurityEventKind, SecurityLog};
use crate::storage::{keys, read_json, write_json, Storage};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Passcode shipped with the site.
pub const DEFAULT_PASSCODE: &str = "0410";

/// Required passcode length.
pub const PASSCODE_LEN: usize = 4;

/// An unlocked admin session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminSession {
    /// Hex SHA-256 of the passcode used to unlock.
    pub access_code: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires: DateTime<Utc>,
}

impl AdminSession {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct LockoutState {
    failed_attempts: u32,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    locked_until: Option<DateTime<Utc>>,
}

/// Snapshot of the gate for status displays.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminStatus {
    pub authenticated: bool,
    pub expires: Option<DateTime<Utc>>,
    pub failed_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
}

/// Passcode check plus admin session bookkeeping.
pub struct AdminGate {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    audit: SecurityLog,
    passcode_digest: String,
    default_passcode: bool,
    session_ttl: Duration,
    max_attempts: u32,
    lockout: Duration,
}

impl AdminGate {
    pub fn new(
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
        audit: SecurityLog,
        config: &AdminConfig,
    ) -> Self {
        Self {
            storage,
            clock,
            audit,
            passcode_digest: digest(&config.passcode),
            default_passcode: config.passcode == DEFAULT_PASSCODE,
            session_ttl: crate::clock::seconds(config.session_ttl_secs),
            max_attempts: config.max_attempts.max(1),
            lockout: crate::clock::seconds(config.lockout_secs),
        }
    }

    pub fn uses_default_passcode(&self) -> bool {
        self.default_passcode
    }

    /// Try a passcode. On success the admin session is written and returned.
    pub fn unlock(&self, code: &str) -> Result<AdminSession> {
        let now = self.clock.now();
        let mut state = self.lockout_state()?;

        if let Some(until) = state.locked_until {
            if now < until {
                return Err(AuthError::AdminLocked {
                    retry_after_secs: ceil_secs(until - now),
                });
            }
            // Lockout served
            state = LockoutState::default();
        }

        let candidate = code.trim();
        if candidate.len() != PASSCODE_LEN || !candidate.chars().all(|c| c.is_ascii_digit()) {
            return Err(AuthError::InvalidInput(format!(
                "Passcode must be {PASSCODE_LEN} digits"
            )));
        }

        let candidate_digest = digest(candidate);
        if !constant_time_eq(candidate_digest.as_bytes(), self.passcode_digest.as_bytes()) {
            state.failed_attempts += 1;
            if state.failed_attempts >= self.max_attempts {
                let until = now + self.lockout;
                state.locked_until = Some(until);
                self.save_lockout(&state)?;
                self.audit.record(
                    SecurityEventKind::AdminLockout,
                    "admin",
                    &format!(
                        "{} failed passcode attempts; locked for {}s",
                        state.failed_attempts,
                        self.lockout.num_seconds()
                    ),
                );
                return Err(AuthError::AdminLocked {
                    retry_after_secs: ceil_secs(until - now),
                });
            }
            self.save_lockout(&state)?;
            let remaining = self.max_attempts - state.failed_attempts;
            self.audit.record(
                SecurityEventKind::AdminFailure,
                "admin",
                &format!("Incorrect passcode ({remaining} attempts remaining)"),
            );
            return Err(AuthError::WrongPasscode { remaining });
        }

        self.storage.remove(keys::ADMIN_LOCKOUT)?;
        let session = AdminSession {
            access_code: candidate_digest,
            created: now,
            expires: now + self.session_ttl,
        };
        write_json(self.storage.as_ref(), keys::ADMIN_SESSION, &session)?;
        self.audit
            .record(SecurityEventKind::AdminUnlock, "admin", "Admin session granted");
        Ok(session)
    }

    /// The active admin session, if any. Expired or stale sessions are removed.
    pub fn session(&self) -> Result<Option<AdminSession>> {
        let Some(session) = read_json::<AdminSession>(self.storage.as_ref(), keys::ADMIN_SESSION)?
        else {
            return Ok(None);
        };

        let stale = !constant_time_eq(
            session.access_code.as_bytes(),
            self.passcode_digest.as_bytes(),
        );
        if session.is_expired(self.clock.now()) || stale {
            self.storage.remove(keys::ADMIN_SESSION)?;
            tracing::info!(stale, "Admin session ended");
            return Ok(None);
        }
        Ok(Some(session))
    }

    pub fn is_authenticated(&self) -> Result<bool> {
        Ok(self.session()?.is_some())
    }

    /// Remaining lockout time, if locked.
    pub fn lockout_remaining(&self) -> Result<Option<Duration>> {
        let now = self.clock.now();
        Ok(self
            .lockout_state()?
            .locked_until
            .filter(|until| now < *until)
            .map(|until| until - now))
    }

    pub fn status(&self) -> Result<AdminStatus> {
        let session = self.session()?;
        let state = self.lockout_state()?;
        let now = self.clock.now();
        let locked_until = state.locked_until.filter(|until| now < *until);
        Ok(AdminStatus {
            authenticated: session.is_some(),
            expires: session.map(|s| s.expires),
            failed_attempts: if locked_until.is_some() || state.locked_until.is_none() {
                state.failed_attempts
            } else {
                0
            },
            locked_until,
        })
    }

    /// End the admin session. Returns whether one existed.
    pub fn logout(&self) -> Result<bool> {
        let removed = self.storage.remove(keys::ADMIN_SESSION)?;
        if removed {
            self.audit
                .record(SecurityEventKind::AdminLogout, "admin", "Admin session ended");
        }
        Ok(removed)
    }

    fn lockout_state(&self) -> Result<LockoutState> {
        Ok(read_json(self.storage.as_ref(), keys::ADMIN_LOCKOUT)?.unwrap_or_default())
    }

    fn save_lockout(&self, state: &LockoutState) -> Result<()> {
        write_json(self.storage.as_ref(), keys::ADMIN_LOCKOUT, state)
    }
}

/// Hex SHA-256 of a passcode.
pub fn digest(code: &str) -> String {
    hex::encode(Sha256::digest(code.as_bytes()))
}

fn ceil_secs(wait: Duration) -> u64 {
    let millis = wait.num_milliseconds().max(0);
    u64::try_from((millis + 999) / 1000).unwrap_or(0)
}
