//! Storage inspection for authentication defects.
//!
//! Reads every auth-related key in both storage areas and reports what is
//! inconsistent: sessions pointing at deleted users, pointers to missing
//! records, unreadable JSON, duplicate accounts and an admin session that
//! exists without any matching user login ("fragmented auth").
//!
//! Diagnostics never modify storage; `sweep` and `revoke` do the cleanup.

use crate::auth::password::{is_supported_hash, normalize_email};
use crate::auth::session::{Session, SessionPointer};
use crate::auth::users::{Role, User};
use crate::clock::Clock;
use crate::config::AdminConfig;
use crate::error::{AuthError, Result};
use crate::security::admin_gate::{AdminSession, DEFAULT_PASSCODE};
use crate::storage::{keys, read_json, Storage};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Finding severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Housekeeping; the sweep fixes it.
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Category of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    /// Admin session active with no admin user logged in.
    FragmentedAuth,
    /// Session record for a user that no longer exists.
    OrphanedSession,
    /// Expired record not yet swept.
    ExpiredSession,
    /// Current-session pointer to a missing record.
    DanglingPointer,
    /// Two accounts share an email (case-insensitive).
    DuplicateEmail,
    /// Session without a CSRF token.
    MissingCsrf,
    /// Stored value that does not decode.
    CorruptEntry,
    /// Password hash in a format this build cannot verify.
    UnsupportedPasswordHash,
    /// Admin passcode left at the shipped default.
    DefaultAdminPasscode,
}

impl FindingKind {
    pub fn severity(&self) -> Severity {
        match self {
            Self::ExpiredSession => Severity::Low,
            Self::FragmentedAuth
            | Self::DanglingPointer
            | Self::MissingCsrf
            | Self::DefaultAdminPasscode => Severity::Medium,
            Self::OrphanedSession
            | Self::DuplicateEmail
            | Self::CorruptEntry
            | Self::UnsupportedPasswordHash => Severity::High,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub severity: Severity,
    /// Storage key the finding is about.
    pub key: String,
    pub description: String,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity.as_str(), self.key, self.description)
    }
}

/// Result of a diagnostic run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiagnosticReport {
    pub users: usize,
    pub sessions: usize,
    pub active_sessions: usize,
    pub admin_session_active: bool,
    pub findings: Vec<Finding>,
}

impl DiagnosticReport {
    /// No findings above [`Severity::Low`].
    pub fn is_healthy(&self) -> bool {
        self.findings.iter().all(|f| f.severity == Severity::Low)
    }

    pub fn highest_severity(&self) -> Option<Severity> {
        self.findings.iter().map(|f| f.severity).max()
    }

    pub fn count(&self, kind: FindingKind) -> usize {
        self.findings.iter().filter(|f| f.kind == kind).count()
    }

    fn push(&mut self, kind: FindingKind, key: &str, description: String) {
        self.findings.push(Finding {
            kind,
            severity: kind.severity(),
            key: key.to_string(),
            description,
        });
    }
}

/// Read-only inspector over both storage areas.
pub struct AuthDiagnostics {
    local: Arc<dyn Storage>,
    tab: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    default_passcode: bool,
}

impl AuthDiagnostics {
    pub fn new(
        local: Arc<dyn Storage>,
        tab: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
        admin: &AdminConfig,
    ) -> Self {
        Self {
            local,
            tab,
            clock,
            default_passcode: admin.passcode == DEFAULT_PASSCODE,
        }
    }

    pub fn run(&self) -> Result<DiagnosticReport> {
        let mut report = DiagnosticReport::default();
        let now = self.clock.now();

        // ── Users ──────────────────────────────────────────────────
        let users: Vec<User> = self
            .decode(&mut report, self.local.as_ref(), keys::USERS)?
            .unwrap_or_default();
        report.users = users.len();

        let mut seen_emails: HashMap<String, &str> = HashMap::new();
        for user in &users {
            let email = normalize_email(&user.email).unwrap_or_else(|| user.email.to_lowercase());
            if let Some(first) = seen_emails.insert(email.clone(), &user.id) {
                report.push(
                    FindingKind::DuplicateEmail,
                    keys::USERS,
                    format!("Users {first} and {} share email {email}", user.id),
                );
            }
            if !is_supported_hash(&user.password_hash) {
                report.push(
                    FindingKind::UnsupportedPasswordHash,
                    keys::USERS,
                    format!("User {} has a password hash that cannot be verified", user.id),
                );
            }
        }
        let user_ids: HashSet<&str> = users.iter().map(|u| u.id.as_str()).collect();

        // ── Sessions ───────────────────────────────────────────────
        let mut session_ids = HashSet::new();
        for key in self.local.keys_with_prefix(keys::SESSION_PREFIX)? {
            let Some(session) = self.decode::<Session>(&mut report, self.local.as_ref(), &key)? else {
                continue;
            };
            report.sessions += 1;
            session_ids.insert(session.id.clone());

            if session.is_expired(now) {
                report.push(
                    FindingKind::ExpiredSession,
                    &key,
                    format!("Expired at {}", session.expires.to_rfc3339()),
                );
            } else {
                report.active_sessions += 1;
            }
            if !user_ids.contains(session.user_id.as_str()) {
                report.push(
                    FindingKind::OrphanedSession,
                    &key,
                    format!("Session belongs to unknown user {}", session.user_id),
                );
            }
            if session.csrf_token.is_empty() {
                report.push(FindingKind::MissingCsrf, &key, "Session has no CSRF token".into());
            }
        }

        // ── Pointers ───────────────────────────────────────────────
        let mut current_user = None;
        for (area, key) in [
            (self.tab.as_ref(), keys::CURRENT_SESSION),
            (self.local.as_ref(), keys::PERSISTENT_SESSION),
        ] {
            let Some(pointer) = self.decode::<SessionPointer>(&mut report, area, key)? else {
                continue;
            };
            if session_ids.contains(&pointer.session_id) {
                current_user.get_or_insert(pointer.user_id);
            } else {
                report.push(
                    FindingKind::DanglingPointer,
                    key,
                    format!("Points at missing session {}", pointer.session_id),
                );
            }
        }

        // ── Admin ──────────────────────────────────────────────────
        if let Some(admin) = self.decode::<AdminSession>(&mut report, self.local.as_ref(), keys::ADMIN_SESSION)? {
            report.admin_session_active = !admin.is_expired(now);
        }
        if report.admin_session_active {
            let admin_logged_in = current_user
                .as_deref()
                .and_then(|id| users.iter().find(|u| u.id == id))
                .is_some_and(|u| u.role == Role::Admin);
            if !admin_logged_in {
                report.push(
                    FindingKind::FragmentedAuth,
                    keys::ADMIN_SESSION,
                    "Admin session is active without an admin user session".into(),
                );
            }
        }
        if self.default_passcode {
            report.push(
                FindingKind::DefaultAdminPasscode,
                "admin.passcode",
                "The admin passcode is the shipped default".into(),
            );
        }

        tracing::info!(
            users = report.users,
            sessions = report.sessions,
            findings = report.findings.len(),
            "Auth diagnostics complete"
        );
        Ok(report)
    }

    /// Decode a key, turning malformed JSON into a finding.
    fn decode<T: serde::de::DeserializeOwned>(
        &self,
        report: &mut DiagnosticReport,
        area: &dyn Storage,
        key: &str,
    ) -> Result<Option<T>> {
        match read_json(area, key) {
            Ok(value) => Ok(value),
            Err(AuthError::Serde(e)) => {
                report.push(
                    FindingKind::CorruptEntry,
                    key,
                    format!("Unreadable value in {} storage: {e}", area.name()),
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::hash_password;
    use crate::clock::ManualClock;
    use crate::storage::{write_json, MemoryStorage};
    use chrono::Duration;

    struct Fixture {
        clock: Arc<ManualClock>,
        local: Arc<MemoryStorage>,
        tab: Arc<MemoryStorage>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                clock: Arc::new(ManualClock::starting_now()),
                local: Arc::new(MemoryStorage::new("local")),
                tab: Arc::new(MemoryStorage::new("tab")),
            }
        }

        fn run_with(&self, passcode: &str) -> DiagnosticReport {
            let admin = AdminConfig {
                passcode: passcode.into(),
                ..AdminConfig::default()
            };
            AuthDiagnostics::new(self.local.clone(), self.tab.clone(), self.clock.clone(), &admin)
                .run()
                .unwrap()
        }

        fn run(&self) -> DiagnosticReport {
            self.run_with("7391")
        }

        fn user(&self, id: &str, email: &str, role: Role) -> User {
            User {
                id: id.into(),
                full_name: "Test User".into(),
                email: email.into(),
                password_hash: hash_password("Password1", 10),
                created: self.clock.now(),
                role,
                settings: Default::default(),
            }
        }

        fn session(&self, id: &str, user_id: &str, ttl: Duration) -> Session {
            let now = self.clock.now();
            let session = Session {
                id: id.into(),
                user_id: user_id.into(),
                created: now,
                expires: now + ttl,
                device_fingerprint: None,
                csrf_token: "token".into(),
                persistent: false,
            };
            write_json(self.local.as_ref(), &keys::session(id), &session).unwrap();
            session
        }

        fn point_at(&self, session_id: &str, user_id: &str) {
            let pointer = SessionPointer {
                session_id: session_id.into(),
                user_id: user_id.into(),
            };
            write_json(self.tab.as_ref(), keys::CURRENT_SESSION, &pointer).unwrap();
        }

        fn admin_session(&self) {
            let now = self.clock.now();
            let session = AdminSession {
                access_code: crate::security::admin_gate::digest("7391"),
                created: now,
                expires: now + Duration::hours(4),
            };
            write_json(self.local.as_ref(), keys::ADMIN_SESSION, &session).unwrap();
        }
    }

    #[test]
    fn empty_storage_is_healthy() {
        let f = Fixture::new();
        let report = f.run();
        assert!(report.findings.is_empty());
        assert!(report.is_healthy());
        assert_eq!(report.highest_severity(), None);
    }

    #[test]
    fn consistent_login_is_healthy() {
        let f = Fixture::new();
        let user = f.user("u1", "ada@example.com", Role::User);
        write_json(f.local.as_ref(), keys::USERS, &vec![user]).unwrap();
        f.session("s1", "u1", Duration::hours(24));
        f.point_at("s1", "u1");

        let report = f.run();
        assert_eq!(report.users, 1);
        assert_eq!(report.active_sessions, 1);
        assert!(report.findings.is_empty(), "{:?}", report.findings);
    }

    #[test]
    fn flags_orphaned_and_expired_sessions() {
        let f = Fixture::new();
        f.session("gone", "deleted-user", Duration::hours(24));
        f.session("old", "deleted-user", Duration::hours(1));
        f.clock.advance(Duration::hours(2));

        let report = f.run();
        assert_eq!(report.count(FindingKind::OrphanedSession), 2);
        assert_eq!(report.count(FindingKind::ExpiredSession), 1);
        assert_eq!(report.active_sessions, 1);
        assert_eq!(report.highest_severity(), Some(Severity::High));
        assert!(!report.is_healthy());
    }

    #[test]
    fn flags_fragmented_auth() {
        let f = Fixture::new();
        f.admin_session();
        let report = f.run();
        assert!(report.admin_session_active);
        assert_eq!(report.count(FindingKind::FragmentedAuth), 1);
    }

    #[test]
    fn admin_user_with_admin_session_is_not_fragmented() {
        let f = Fixture::new();
        let admin = f.user("a1", "root@example.com", Role::Admin);
        write_json(f.local.as_ref(), keys::USERS, &vec![admin]).unwrap();
        f.session("s1", "a1", Duration::hours(24));
        f.point_at("s1", "a1");
        f.admin_session();

        assert_eq!(f.run().count(FindingKind::FragmentedAuth), 0);
    }

    #[test]
    fn flags_dangling_pointer_and_corrupt_entries() {
        let f = Fixture::new();
        f.point_at("missing", "u1");
        f.local.set("session_bad", "not json").unwrap();

        let report = f.run();
        assert_eq!(report.count(FindingKind::DanglingPointer), 1);
        assert_eq!(report.count(FindingKind::CorruptEntry), 1);
        assert_eq!(report.sessions, 0);
    }

    #[test]
    fn flags_duplicate_email_and_bad_hash() {
        let f = Fixture::new();
        let mut legacy = f.user("u2", "ADA@example.com", Role::User);
        legacy.password_hash = "plaintext".into();
        let users = vec![f.user("u1", "ada@example.com", Role::User), legacy];
        write_json(f.local.as_ref(), keys::USERS, &users).unwrap();

        let report = f.run();
        assert_eq!(report.count(FindingKind::DuplicateEmail), 1);
        assert_eq!(report.count(FindingKind::UnsupportedPasswordHash), 1);
    }

    #[test]
    fn flags_default_passcode_and_missing_csrf() {
        let f = Fixture::new();
        let user = f.user("u1", "ada@example.com", Role::User);
        write_json(f.local.as_ref(), keys::USERS, &vec![user]).unwrap();
        let mut session = f.session("s1", "u1", Duration::hours(1));
        session.csrf_token.clear();
        write_json(f.local.as_ref(), &keys::session("s1"), &session).unwrap();

        let report = f.run_with(DEFAULT_PASSCODE);
        assert_eq!(report.count(FindingKind::DefaultAdminPasscode), 1);
        assert_eq!(report.count(FindingKind::MissingCsrf), 1);
    }

    #[test]
    fn finding_display_includes_severity_and_key() {
        let f = Fixture::new();
        f.point_at("missing", "u1");
        let report = f.run();
        let line = report.findings[0].to_string();
        assert!(line.starts_with("[medium] learntav_session"));
    }
}
