//! Key/value storage areas.
//!
//! The site keeps all auth state as JSON strings in two areas:
//! - a persistent *local* area (users, session records, admin state, logs)
//! - a per-process *tab* area (the non-remembered current-session pointer)
//!
//! ## Backends
//! - [`MemoryStorage`]: process-lifetime map, used for the tab area and tests
//! - [`SqliteStorage`]: single `kv` table, used for the local area

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Well-known storage keys.
pub mod keys {
    /// JSON array of user records.
    pub const USERS: &str = "learntav_users";
    /// Current-session pointer for the tab area.
    pub const CURRENT_SESSION: &str = "learntav_session";
    /// Current-session pointer for remember-me logins (local area).
    pub const PERSISTENT_SESSION: &str = "learntav_session_persistent";
    /// Admin session record.
    pub const ADMIN_SESSION: &str = "admin_auth_session";
    /// Admin passcode failure counter and lockout deadline.
    pub const ADMIN_LOCKOUT: &str = "admin_auth_lockout";
    /// Bounded security event log.
    pub const SECURITY_LOGS: &str = "security_logs";
    /// Failed-login counters and cooldowns, keyed by email.
    pub const LOGIN_ATTEMPTS: &str = "login_attempts";
    /// Prefix of individual session records.
    pub const SESSION_PREFIX: &str = "session_";

    pub fn session(id: &str) -> String {
        format!("{SESSION_PREFIX}{id}")
    }
}

/// A string-keyed, string-valued storage area.
pub trait Storage: Send + Sync {
    /// Backend name for logs and diagnostics.
    fn name(&self) -> &str;

    fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;

    /// Remove a key. Returns whether it existed.
    fn remove(&self, key: &str) -> anyhow::Result<bool>;

    /// All keys currently stored, in ascending order.
    fn keys(&self) -> anyhow::Result<Vec<String>>;

    /// Keys starting with `prefix`.
    fn keys_with_prefix(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        Ok(self
            .keys()?
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect())
    }
}

/// Read and decode a JSON value. Missing keys yield `None`.
pub fn read_json<T: DeserializeOwned>(storage: &dyn Storage, key: &str) -> Result<Option<T>> {
    match storage.get(key)? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Encode and store a JSON value.
pub fn write_json<T: Serialize + ?Sized>(storage: &dyn Storage, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    storage.set(key, &raw)?;
    Ok(())
}
