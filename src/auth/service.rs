//! The auth facade used by the CLI and by page handlers.
//!
//! Ties the credential store, session manager, login limiter, admin gate
//! and route table to one pair of storage areas and one clock.

use super::password::normalize_email;
use super::session::{Session, SessionManager, SessionPointer};
use super::users::{Role, User, UserStore};
use crate::clock::Clock;
use crate::config::Config;
use crate::error::{AuthError, Result};
use crate::gatekeeper::{AccessContext, RouteDecision, RouteTable};
use crate::security::admin_gate::{AdminGate, AdminSession, AdminStatus};
use crate::security::audit::{SecurityEventKind, SecurityLog};
use crate::security::diagnostics::{AuthDiagnostics, DiagnosticReport};
use crate::security::fingerprint::DeviceInfo;
use crate::security::rate_limiter::LoginRateLimiter;
use crate::storage::Storage;
use std::sync::Arc;

/// Credentials submitted to [`AuthService::login`].
#[derive(Debug, Clone, Copy)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
    /// Keep the session pointer in the local area.
    pub remember_me: bool,
    pub device: Option<&'a DeviceInfo>,
}

#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user: User,
    pub session: Session,
}

pub struct AuthService {
    users: UserStore,
    sessions: Arc<SessionManager>,
    admin: AdminGate,
    limiter: LoginRateLimiter,
    audit: SecurityLog,
    routes: RouteTable,
    diagnostics: AuthDiagnostics,
}

impl AuthService {
    pub fn new(
        config: &Config,
        local: Arc<dyn Storage>,
        tab: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let audit = SecurityLog::new(local.clone(), clock.clone());
        let limits = &config.login_limit;
        Self {
            users: UserStore::new(local.clone(), clock.clone(), config.password.iterations),
            sessions: Arc::new(SessionManager::new(
                local.clone(),
                tab.clone(),
                clock.clone(),
                audit.clone(),
                &config.session,
            )),
            admin: AdminGate::new(local.clone(), clock.clone(), audit.clone(), &config.admin),
            limiter: LoginRateLimiter::new(
                local.clone(),
                clock.clone(),
                limits.enabled,
                limits.max_attempts,
                crate::clock::seconds(limits.window_secs),
            ),
            audit,
            routes: RouteTable::default_table(),
            diagnostics: AuthDiagnostics::new(local, tab, clock, &config.admin),
        }
    }

    // ── Accounts ───────────────────────────────────────────────────

    pub fn register(&self, full_name: &str, email: &str, password: &str) -> Result<User> {
        let user = self.users.register(full_name, email, password, Role::User)?;
        self.audit
            .record(SecurityEventKind::Registration, &user.email, "Account created");
        Ok(user)
    }

    /// Check credentials and start a session.
    ///
    /// The login limiter is consulted before the password is checked.
    pub fn login(&self, request: &LoginRequest<'_>) -> Result<LoginOutcome> {
        let key = limiter_key(request.email);

        let gate = self.limiter.check(&key)?;
        if !gate.allowed {
            self.audit.record(
                SecurityEventKind::LoginRateLimited,
                &key,
                &format!("Login blocked for {}s", gate.retry_after_secs),
            );
            return Err(AuthError::RateLimited {
                retry_after_secs: gate.retry_after_secs,
            });
        }

        let user = match self.users.authenticate(request.email, request.password) {
            Ok(user) => user,
            Err(AuthError::InvalidCredentials) => {
                let after = self.limiter.record_failure(&key)?;
                self.audit.record(
                    SecurityEventKind::LoginFailure,
                    &key,
                    &format!("Invalid credentials ({} attempts remaining)", after.remaining),
                );
                if !after.allowed {
                    self.audit.record(
                        SecurityEventKind::LoginRateLimited,
                        &key,
                        &format!("Too many failures; blocked for {}s", after.retry_after_secs),
                    );
                }
                return Err(AuthError::InvalidCredentials);
            }
            Err(e) => return Err(e),
        };

        self.limiter.record_success(&key)?;
        let fingerprint = request.device.map(DeviceInfo::fingerprint);
        let session = self
            .sessions
            .create(&user.id, request.remember_me, fingerprint)?;
        self.audit.record(
            SecurityEventKind::LoginSuccess,
            &user.email,
            &format!("Logged in (remember me: {})", request.remember_me),
        );
        Ok(LoginOutcome { user, session })
    }

    /// End the current session, if any.
    pub fn logout(&self) -> Result<Option<SessionPointer>> {
        self.sessions.logout()
    }

    /// The logged-in user and their (possibly renewed) session.
    ///
    /// A session whose user no longer exists is destroyed.
    pub fn current_user(&self, device: Option<&DeviceInfo>) -> Result<Option<(User, Session)>> {
        let fingerprint = device.map(DeviceInfo::fingerprint);
        let Some(session) = self.sessions.current(fingerprint.as_deref())? else {
            return Ok(None);
        };
        match self.users.get(&session.user_id)? {
            Some(user) => Ok(Some((user, session))),
            None => {
                tracing::warn!(session_id = %session.id, user_id = %session.user_id, "Session for deleted user");
                self.sessions.destroy(&session.id)?;
                Ok(None)
            }
        }
    }

    /// Check a form's CSRF token against the current session.
    ///
    /// Returns the (possibly renewed) session on a match.
    pub fn verify_csrf(&self, token: &str, device: Option<&DeviceInfo>) -> Result<Session> {
        let (pointer, _) = self.sessions.pointer()?.ok_or(AuthError::SessionNotFound)?;
        self.sessions.verify_csrf(&pointer.session_id, token)?;
        let fingerprint = device.map(DeviceInfo::fingerprint);
        self.sessions
            .current(fingerprint.as_deref())?
            .ok_or(AuthError::SessionNotFound)
    }

    /// Change the logged-in user's password. Their other sessions are revoked.
    pub fn change_password(
        &self,
        current: &str,
        new_password: &str,
        device: Option<&DeviceInfo>,
    ) -> Result<User> {
        let (user, session) = self
            .current_user(device)?
            .ok_or(AuthError::SessionNotFound)?;
        let user = self.users.change_password(&user.id, current, new_password)?;

        let mut revoked = 0;
        for other in self.sessions.list()? {
            if other.user_id == user.id && other.id != session.id && self.sessions.destroy(&other.id)? {
                revoked += 1;
            }
        }
        self.audit.record(
            SecurityEventKind::PasswordChanged,
            &user.email,
            &format!("Password changed; {revoked} other session(s) ended"),
        );
        Ok(user)
    }

    /// Revoke every session of the user with `email`.
    pub fn revoke_user(&self, email: &str) -> Result<usize> {
        let user = self
            .users
            .find_by_email(email)?
            .ok_or(AuthError::UserNotFound)?;
        self.sessions.revoke_user(&user.id)
    }

    // ── Routes ─────────────────────────────────────────────────────

    /// Decide access to `path` for the current user and admin state.
    pub fn check_route(&self, path: &str, device: Option<&DeviceInfo>) -> Result<RouteDecision> {
        let ctx = AccessContext {
            authenticated: self.current_user(device)?.is_some(),
            admin: self.admin.is_authenticated()?,
        };
        let decision = self.routes.decide(path, &ctx);
        if let RouteDecision::Deny { .. } = decision {
            self.audit.record(
                SecurityEventKind::AccessDenied,
                path,
                "Admin page requested without an admin session",
            );
        }
        Ok(decision)
    }

    // ── Admin ──────────────────────────────────────────────────────

    pub fn admin_unlock(&self, code: &str) -> Result<AdminSession> {
        self.admin.unlock(code)
    }

    pub fn admin_status(&self) -> Result<AdminStatus> {
        self.admin.status()
    }

    pub fn admin_logout(&self) -> Result<bool> {
        self.admin.logout()
    }

    /// Whether the admin passcode is still the built-in one.
    pub fn admin_uses_default_passcode(&self) -> bool {
        self.admin.uses_default_passcode()
    }

    // ── Maintenance ────────────────────────────────────────────────

    /// Remove expired sessions and idle limiter state.
    pub fn sweep(&self) -> Result<usize> {
        self.limiter.cleanup_stale()?;
        self.sessions.sweep_expired()
    }

    pub fn diagnose(&self) -> Result<DiagnosticReport> {
        self.diagnostics.run()
    }

    // ── Accessors ──────────────────────────────────────────────────

    pub fn users(&self) -> &UserStore {
        &self.users
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn security_log(&self) -> &SecurityLog {
        &self.audit
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }
}

fn limiter_key(email: &str) -> String {
    normalize_email(email).unwrap_or_else(|| email.trim().to_lowercase())
}
