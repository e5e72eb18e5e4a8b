//! Session lifecycle: create, validate, renew, destroy, sweep.
//!
//! Records live under `session_<id>` in the local area. The "current"
//! session is a pointer record: `learntav_session` in the tab area for
//! ordinary logins, `learntav_session_persistent` in the local area for
//! remember-me logins.
//!
//! States: absent -> active -> (renewed | expired | destroyed).
//! - Expiry is detected lazily on validation and by the periodic sweep.
//! - Renewal happens during validation once fewer than
//!   `renewal_threshold` remains: the new record is written first, then the
//!   old one removed. A failure in between leaves a stale record for the
//!   sweep to collect.

use super::password::{constant_time_eq, generate_token};
use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::error::{AuthError, Result};
use crate::security::audit::{SecurityEventKind, SecurityLog};
use crate::storage::{keys, read_json, write_json, Storage};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// CSRF token byte length before hex encoding (32 bytes = 64 hex chars).
const CSRF_TOKEN_BYTES: usize = 32;

/// A stored session record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub user_id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires: DateTime<Utc>,
    #[serde(default)]
    pub device_fingerprint: Option<String>,
    #[serde(default)]
    pub csrf_token: String,
    /// Created with remember-me.
    #[serde(default)]
    pub persistent: bool,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires
    }

    /// Whether the session is active but inside the renewal window.
    pub fn needs_renewal(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        !self.is_expired(now) && self.expires - now < threshold
    }

    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires - now).max(Duration::zero())
    }
}

/// Pointer to the current session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPointer {
    pub session_id: String,
    pub user_id: String,
}

/// Outcome of a successful validation.
#[derive(Debug, Clone)]
pub enum Validation {
    Valid(Session),
    /// The session was inside the renewal window and has been replaced.
    Renewed { previous_id: String, session: Session },
}

impl Validation {
    pub fn session(&self) -> &Session {
        match self {
            Self::Valid(session) | Self::Renewed { session, .. } => session,
        }
    }

    pub fn into_session(self) -> Session {
        match self {
            Self::Valid(session) | Self::Renewed { session, .. } => session,
        }
    }
}

/// Storage-backed session manager.
pub struct SessionManager {
    local: Arc<dyn Storage>,
    tab: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    audit: SecurityLog,
    ttl: Duration,
    renewal_threshold: Duration,
    enforce_fingerprint: bool,
}

impl SessionManager {
    pub fn new(
        local: Arc<dyn Storage>,
        tab: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
        audit: SecurityLog,
        config: &SessionConfig,
    ) -> Self {
        Self {
            local,
            tab,
            clock,
            audit,
            ttl: crate::clock::seconds(config.ttl_secs),
            renewal_threshold: crate::clock::seconds(config.renewal_threshold_secs),
            enforce_fingerprint: config.enforce_fingerprint,
        }
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Start a session for an authenticated user and make it current.
    ///
    /// Any previous current session is destroyed.
    pub fn create(&self, user_id: &str, persistent: bool, fingerprint: Option<String>) -> Result<Session> {
        if let Some((pointer, _)) = self.pointer()? {
            self.destroy(&pointer.session_id)?;
        }

        let now = self.clock.now();
        let session = Session {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            created: now,
            expires: now + self.ttl,
            device_fingerprint: fingerprint,
            csrf_token: generate_token(CSRF_TOKEN_BYTES),
            persistent,
        };
        self.write_record(&session)?;
        self.write_pointer(&session)?;

        self.audit.record(
            SecurityEventKind::SessionCreated,
            user_id,
            &format!("Session {} created (persistent: {persistent})", session.id),
        );
        Ok(session)
    }

    /// Load a session record without validating it.
    pub fn get(&self, session_id: &str) -> Result<Option<Session>> {
        read_json(self.local.as_ref(), &keys::session(session_id))
    }

    /// Validate a session, renewing it when inside the renewal window.
    ///
    /// Expired sessions and fingerprint mismatches are destroyed.
    pub fn validate(&self, session_id: &str, fingerprint: Option<&str>) -> Result<Validation> {
        let Some(session) = self.get(session_id)? else {
            return Err(AuthError::SessionNotFound);
        };
        let now = self.clock.now();

        if session.is_expired(now) {
            self.remove_record(session_id)?;
            self.clear_pointers_to(session_id)?;
            self.audit.record(
                SecurityEventKind::SessionExpired,
                &session.user_id,
                &format!("Session {session_id} expired"),
            );
            return Err(AuthError::SessionExpired);
        }

        if self.enforce_fingerprint {
            if let (Some(expected), Some(actual)) = (session.device_fingerprint.as_deref(), fingerprint) {
                if !constant_time_eq(expected.as_bytes(), actual.as_bytes()) {
                    self.remove_record(session_id)?;
                    self.clear_pointers_to(session_id)?;
                    self.audit.record(
                        SecurityEventKind::FingerprintMismatch,
                        &session.user_id,
                        &format!("Session {session_id} presented from a different device"),
                    );
                    return Err(AuthError::FingerprintMismatch);
                }
            }
        }

        if session.needs_renewal(now, self.renewal_threshold) {
            let renewed = self.renew(&session)?;
            return Ok(Validation::Renewed {
                previous_id: session.id,
                session: renewed,
            });
        }

        Ok(Validation::Valid(session))
    }

    /// Replace a session with a fresh id, CSRF token and expiry.
    pub fn renew(&self, session: &Session) -> Result<Session> {
        let now = self.clock.now();
        let renewed = Session {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: session.user_id.clone(),
            created: now,
            expires: now + self.ttl,
            device_fingerprint: session.device_fingerprint.clone(),
            csrf_token: generate_token(CSRF_TOKEN_BYTES),
            persistent: session.persistent,
        };

        self.write_record(&renewed)?;
        self.remove_record(&session.id)?;
        self.move_pointers(&session.id, &renewed)?;

        self.audit.record(
            SecurityEventKind::SessionRenewed,
            &session.user_id,
            &format!("Session {} renewed as {}", session.id, renewed.id),
        );
        Ok(renewed)
    }

    /// The validated current session, if any. Invalid pointers are cleared.
    pub fn current(&self, fingerprint: Option<&str>) -> Result<Option<Session>> {
        for (area, key) in self.pointer_slots() {
            let Some(pointer) = self.read_pointer(area, key)? else {
                continue;
            };
            match self.validate(&pointer.session_id, fingerprint) {
                Ok(validation) => return Ok(Some(validation.into_session())),
                Err(AuthError::SessionNotFound) => {
                    tracing::debug!(session_id = %pointer.session_id, "Dropping dangling session pointer");
                    area.remove(key)?;
                }
                Err(AuthError::SessionExpired | AuthError::FingerprintMismatch) => {
                    area.remove(key)?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// The current-session pointer and whether it is the persistent one.
    pub fn pointer(&self) -> Result<Option<(SessionPointer, bool)>> {
        if let Some(pointer) = self.read_pointer(self.tab.as_ref(), keys::CURRENT_SESSION)? {
            return Ok(Some((pointer, false)));
        }
        Ok(self
            .read_pointer(self.local.as_ref(), keys::PERSISTENT_SESSION)?
            .map(|p| (p, true)))
    }

    /// Remove a session record and any pointer to it. Returns whether it existed.
    pub fn destroy(&self, session_id: &str) -> Result<bool> {
        let removed = self.remove_record(session_id)?;
        self.clear_pointers_to(session_id)?;
        Ok(removed)
    }

    /// Destroy the current session.
    pub fn logout(&self) -> Result<Option<SessionPointer>> {
        let Some((pointer, _)) = self.pointer()? else {
            return Ok(None);
        };
        self.destroy(&pointer.session_id)?;
        // A corrupt or foreign pointer may survive `destroy`
        self.tab.remove(keys::CURRENT_SESSION)?;
        self.local.remove(keys::PERSISTENT_SESSION)?;
        self.audit.record(
            SecurityEventKind::Logout,
            &pointer.user_id,
            &format!("Session {} ended by logout", pointer.session_id),
        );
        Ok(Some(pointer))
    }

    /// Administrative revocation of every session a user holds.
    pub fn revoke_user(&self, user_id: &str) -> Result<usize> {
        let mut revoked = 0;
        for session in self.list()? {
            if session.user_id == user_id && self.destroy(&session.id)? {
                revoked += 1;
            }
        }
        if revoked > 0 {
            self.audit.record(
                SecurityEventKind::SessionRevoked,
                user_id,
                &format!("{revoked} session(s) revoked"),
            );
        }
        Ok(revoked)
    }

    /// All readable session records. Corrupt entries are skipped.
    pub fn list(&self) -> Result<Vec<Session>> {
        let mut sessions = Vec::new();
        for key in self.local.keys_with_prefix(keys::SESSION_PREFIX)? {
            match read_json::<Session>(self.local.as_ref(), &key) {
                Ok(Some(session)) => sessions.push(session),
                Ok(None) => {}
                Err(AuthError::Serde(e)) => {
                    tracing::warn!(key = %key, "Skipping unreadable session record: {e}");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(sessions)
    }

    /// Remove expired records and pointers to missing sessions.
    /// Returns the number of records removed.
    pub fn sweep_expired(&self) -> Result<usize> {
        let now = self.clock.now();
        let mut removed = 0;
        for session in self.list()? {
            if session.is_expired(now) {
                self.remove_record(&session.id)?;
                self.clear_pointers_to(&session.id)?;
                removed += 1;
            }
        }

        for (area, key) in self.pointer_slots() {
            if let Some(pointer) = self.read_pointer(area, key)? {
                if self.get(&pointer.session_id)?.is_none() {
                    area.remove(key)?;
                }
            }
        }

        if removed > 0 {
            tracing::info!(removed, "Swept expired sessions");
        }
        Ok(removed)
    }

    /// Check a submitted CSRF token against the session's.
    pub fn verify_csrf(&self, session_id: &str, token: &str) -> Result<()> {
        let session = self.get(session_id)?.ok_or(AuthError::SessionNotFound)?;
        if session.is_expired(self.clock.now()) {
            return Err(AuthError::SessionExpired);
        }
        if session.csrf_token.is_empty()
            || !constant_time_eq(session.csrf_token.as_bytes(), token.as_bytes())
        {
            self.audit.record(
                SecurityEventKind::CsrfMismatch,
                &session.user_id,
                &format!("CSRF token mismatch for session {session_id}"),
            );
            return Err(AuthError::CsrfMismatch);
        }
        Ok(())
    }

    /// Run `sweep_expired` every `every` until the handle is aborted.
    pub fn spawn_sweeper(self: Arc<Self>, every: std::time::Duration) -> JoinHandle<()> {
        let every = every.max(std::time::Duration::from_millis(10));
        tracing::info!(interval_secs = every.as_secs(), "Session sweeper started");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = self.sweep_expired() {
                    tracing::warn!("Session sweep failed: {e}");
                }
            }
        })
    }

    // ── Storage helpers ────────────────────────────────────────────

    fn write_record(&self, session: &Session) -> Result<()> {
        write_json(self.local.as_ref(), &keys::session(&session.id), session)
    }

    fn remove_record(&self, session_id: &str) -> Result<bool> {
        Ok(self.local.remove(&keys::session(session_id))?)
    }

    fn pointer_slots(&self) -> [(&dyn Storage, &'static str); 2] {
        [
            (self.tab.as_ref(), keys::CURRENT_SESSION),
            (self.local.as_ref(), keys::PERSISTENT_SESSION),
        ]
    }

    fn write_pointer(&self, session: &Session) -> Result<()> {
        let pointer = SessionPointer {
            session_id: session.id.clone(),
            user_id: session.user_id.clone(),
        };
        if session.persistent {
            write_json(self.local.as_ref(), keys::PERSISTENT_SESSION, &pointer)?;
            self.tab.remove(keys::CURRENT_SESSION)?;
        } else {
            write_json(self.tab.as_ref(), keys::CURRENT_SESSION, &pointer)?;
            self.local.remove(keys::PERSISTENT_SESSION)?;
        }
        Ok(())
    }

    /// Read a pointer; an unreadable pointer is removed and treated as absent.
    fn read_pointer(&self, area: &dyn Storage, key: &str) -> Result<Option<SessionPointer>> {
        match read_json::<SessionPointer>(area, key) {
            Ok(pointer) => Ok(pointer),
            Err(AuthError::Serde(e)) => {
                tracing::warn!(key = key, "Removing unreadable session pointer: {e}");
                area.remove(key)?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn clear_pointers_to(&self, session_id: &str) -> Result<()> {
        for (area, key) in self.pointer_slots() {
            if let Some(pointer) = self.read_pointer(area, key)? {
                if pointer.session_id == session_id {
                    area.remove(key)?;
                }
            }
        }
        Ok(())
    }

    fn move_pointers(&self, old_id: &str, renewed: &Session) -> Result<()> {
        for (area, key) in self.pointer_slots() {
            if let Some(pointer) = self.read_pointer(area, key)? {
                if pointer.session_id == old_id {
                    let moved = SessionPointer {
                        session_id: renewed.id.clone(),
                        user_id: pointer.user_id,
                    };
                    write_json(area, key, &moved)?;
                }
            }
        }
        Ok(())
    }
}
