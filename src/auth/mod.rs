//! User accounts and sessions.
//!
//! Provides:
//! - User registration and login against the `learntav_users` table
//! - PBKDF2-SHA256 password hashing with per-user salt
//! - Session records with expiry, sliding renewal, CSRF tokens and device binding
//! - [`AuthService`], the facade tying accounts, sessions, the admin gate and
//!   the route table together
//!
//! ## Design Decisions
//! - Session ids are UUID v4; CSRF tokens are 32 random bytes, hex encoded.
//! - Renewal replaces the session id instead of extending the old record.
//! - Remember-me only decides which storage area holds the current-session
//!   pointer; the session lifetime is the same either way.

pub mod password;
pub mod service;
pub mod session;
pub mod users;

pub use service::{AuthService, LoginOutcome, LoginRequest};
pub use session::{Session, SessionManager, SessionPointer, Validation};
pub use users::{Role, User, UserSettings, UserStore};
