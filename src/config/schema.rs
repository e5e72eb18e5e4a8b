use crate::security::admin_gate::{DEFAULT_PASSCODE, PASSCODE_LEN};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Upper bound for any configured duration: ten years.
const MAX_DURATION_SECS: u64 = 10 * 365 * 24 * 3600;

/// Root configuration, loaded from `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub session: SessionConfig,
    pub admin: AdminConfig,
    pub password: PasswordConfig,
    pub login_limit: LoginLimitConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    /// Where this config was read from (not serialized).
    #[serde(skip)]
    pub config_path: PathBuf,
}

/// User session lifetimes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Session lifetime. Default: 24 hours.
    pub ttl_secs: u64,
    /// Renew when fewer than this many seconds remain. Default: 15 minutes.
    pub renewal_threshold_secs: u64,
    /// Interval of the background expiry sweep. Default: 5 minutes.
    pub sweep_interval_secs: u64,
    /// Destroy sessions validated from a different device.
    pub enforce_fingerprint: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 24 * 3600,
            renewal_threshold_secs: 15 * 60,
            sweep_interval_secs: 5 * 60,
            enforce_fingerprint: true,
        }
    }
}

/// Admin passcode gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub passcode: String,
    /// Admin session lifetime. Default: 4 hours.
    pub session_ttl_secs: u64,
    /// Consecutive failures before lockout. Default: 3.
    pub max_attempts: u32,
    /// Lockout length. Default: 60 seconds.
    pub lockout_secs: u64,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            passcode: DEFAULT_PASSCODE.into(),
            session_ttl_secs: 4 * 3600,
            max_attempts: 3,
            lockout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordConfig {
    /// PBKDF2 iterations for new hashes.
    pub iterations: u32,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            iterations: crate::auth::password::DEFAULT_ITERATIONS,
        }
    }
}

/// Failed-login limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginLimitConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    pub window_secs: u64,
}

impl Default for LoginLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: crate::security::rate_limiter::DEFAULT_MAX_ATTEMPTS,
            window_secs: crate::security::rate_limiter::DEFAULT_WINDOW_SECS,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding `local.db`. Defaults to the platform data dir.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl Config {
    /// Reject values the auth components cannot work with.
    pub fn validate(&self) -> Result<()> {
        let s = &self.session;
        if s.ttl_secs == 0 {
            bail!("session.ttl_secs must be greater than zero");
        }
        if s.ttl_secs > MAX_DURATION_SECS {
            bail!("session.ttl_secs must be at most {MAX_DURATION_SECS}");
        }
        if s.renewal_threshold_secs >= s.ttl_secs {
            bail!(
                "session.renewal_threshold_secs ({}) must be less than session.ttl_secs ({})",
                s.renewal_threshold_secs,
                s.ttl_secs
            );
        }
        if s.sweep_interval_secs == 0 {
            bail!("session.sweep_interval_secs must be greater than zero");
        }

        let a = &self.admin;
        if a.passcode.len() != PASSCODE_LEN || !a.passcode.chars().all(|c| c.is_ascii_digit()) {
            bail!("admin.passcode must be exactly {PASSCODE_LEN} digits");
        }
        if a.session_ttl_secs == 0 || a.session_ttl_secs > MAX_DURATION_SECS {
            bail!("admin.session_ttl_secs must be between 1 and {MAX_DURATION_SECS}");
        }
        if a.max_attempts == 0 {
            bail!("admin.max_attempts must be greater than zero");
        }
        if a.lockout_secs > MAX_DURATION_SECS {
            bail!("admin.lockout_secs must be at most {MAX_DURATION_SECS}");
        }

        if self.password.iterations == 0 {
            bail!("password.iterations must be greater than zero");
        }

        let l = &self.login_limit;
        if l.max_attempts == 0 {
            bail!("login_limit.max_attempts must be greater than zero");
        }
        if l.window_secs == 0 || l.window_secs > MAX_DURATION_SECS {
            bail!("login_limit.window_secs must be between 1 and {MAX_DURATION_SECS}");
        }
        Ok(())
    }
}
