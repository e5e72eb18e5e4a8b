//! Security components around the session core.
//!
//! - [`admin_gate`]: shared-passcode gate for the admin pages
//! - [`audit`]: bounded security event log
//! - [`diagnostics`]: read-only consistency check of stored auth state
//! - [`fingerprint`]: device fingerprints bound to sessions
//! - [`rate_limiter`]: failed-login limiter

pub mod admin_gate;
pub mod audit;
pub mod diagnostics;
pub mod fingerprint;
pub mod rate_limiter;

pub use admin_gate::{AdminGate, AdminSession, AdminStatus};
pub use audit::{AlertLevel, SecurityEvent, SecurityEventKind, SecurityLog};
pub use diagnostics::{AuthDiagnostics, DiagnosticReport, Finding, FindingKind, Severity};
pub use fingerprint::DeviceInfo;
pub use rate_limiter::{LoginRateLimiter, RateLimitResult};
