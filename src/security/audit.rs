//! Security event log kept under `security_logs`.
//!
//! Events are appended to a bounded JSON array (oldest dropped first) and
//! mirrored to `tracing`. Recording never fails the operation being logged:
//! storage errors are reported as warnings and swallowed.

use crate::clock::Clock;
use crate::error::Result;
use crate::storage::{keys, read_json, write_json, Storage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Maximum number of events retained.
pub const DEFAULT_CAPACITY: usize = 100;

/// Severity level for security events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    /// Normal activity.
    Info,
    /// Suspicious or failed activity.
    Warning,
    /// Activity requiring immediate attention.
    Critical,
}

impl AlertLevel {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

/// What happened.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    Registration,
    LoginSuccess,
    LoginFailure,
    LoginRateLimited,
    Logout,
    PasswordChanged,
    SessionCreated,
    SessionRenewed,
    SessionExpired,
    SessionRevoked,
    FingerprintMismatch,
    CsrfMismatch,
    AdminUnlock,
    AdminFailure,
    AdminLockout,
    AdminLogout,
    AccessDenied,
}

impl SecurityEventKind {
    pub fn level(&self) -> AlertLevel {
        match self {
            Self::LoginFailure | Self::AdminFailure | Self::AccessDenied | Self::SessionRevoked => {
                AlertLevel::Warning
            }
            Self::LoginRateLimited
            | Self::AdminLockout
            | Self::FingerprintMismatch
            | Self::CsrfMismatch => AlertLevel::Critical,
            _ => AlertLevel::Info,
        }
    }
}

/// A single logged event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: String,
    pub kind: SecurityEventKind,
    pub level: AlertLevel,
    /// User id, email, session id or path the event is about.
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub details: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

/// Handle to the security log. Cheap to clone.
#[derive(Clone)]
pub struct SecurityLog {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    capacity: usize,
}

impl SecurityLog {
    pub fn new(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>) -> Self {
        Self::with_capacity(storage, clock, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>, capacity: usize) -> Self {
        Self {
            storage,
            clock,
            capacity: capacity.max(1),
        }
    }

    /// Record an event.
    pub fn record(&self, kind: SecurityEventKind, subject: &str, details: &str) {
        let level = kind.level();
        match level {
            AlertLevel::Info => {
                tracing::info!(kind = ?kind, subject = subject, "{details}");
            }
            AlertLevel::Warning | AlertLevel::Critical => {
                tracing::warn!(kind = ?kind, level = level.as_str(), subject = subject, "{details}");
            }
        }

        let event = SecurityEvent {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            level,
            subject: subject.to_string(),
            details: details.to_string(),
            timestamp: self.clock.now(),
        };
        if let Err(e) = self.append(event) {
            tracing::warn!("Failed to persist security event: {e}");
        }
    }

    fn append(&self, event: SecurityEvent) -> Result<()> {
        let mut events = self.load()?;
        events.push(event);
        if events.len() > self.capacity {
            let excess = events.len() - self.capacity;
            events.drain(..excess);
        }
        write_json(self.storage.as_ref(), keys::SECURITY_LOGS, &events)
    }

    fn load(&self) -> Result<Vec<SecurityEvent>> {
        Ok(read_json(self.storage.as_ref(), keys::SECURITY_LOGS)?.unwrap_or_default())
    }

    /// The most recent `limit` events, oldest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<SecurityEvent>> {
        let mut events = self.load()?;
        if events.len() > limit {
            events.drain(..events.len() - limit);
        }
        Ok(events)
    }

    /// Events at or above `level`.
    pub fn alerts(&self, level: AlertLevel) -> Result<Vec<SecurityEvent>> {
        Ok(self
            .load()?
            .into_iter()
            .filter(|e| e.level >= level)
            .collect())
    }

    pub fn clear(&self) -> Result<()> {
        self.storage.remove(keys::SECURITY_LOGS)?;
        Ok(())
    }
}
