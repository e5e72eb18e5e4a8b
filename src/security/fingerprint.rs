//! Device fingerprints attached to sessions.
//!
//! A fingerprint is the SHA-256 of the device attributes a client reports
//! (user agent, language, platform, screen, time zone). It is advisory: a
//! session validated with a different fingerprint is destroyed, but nothing
//! stops a client from replaying the original attributes.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Attributes describing the device a session was created on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeviceInfo {
    pub user_agent: String,
    pub language: String,
    pub platform: String,
    pub screen: String,
    pub timezone: String,
}

impl DeviceInfo {
    /// Describe the machine this process is running on.
    pub fn from_host() -> Self {
        let mut parts = Vec::new();

        if let Ok(hostname) = hostname::get() {
            parts.push(hostname.to_string_lossy().to_string());
        }

        // Machine ID (Linux)
        if let Ok(machine_id) = std::fs::read_to_string("/etc/machine-id") {
            parts.push(machine_id.trim().to_string());
        }

        Self {
            user_agent: format!("learntav-auth/{}", env!("CARGO_PKG_VERSION")),
            language: std::env::var("LANG").unwrap_or_default(),
            platform: format!("{}:{}", std::env::consts::OS, std::env::consts::ARCH),
            screen: parts.join("|"),
            timezone: std::env::var("TZ").unwrap_or_default(),
        }
    }

    /// Hex SHA-256 over the normalized attributes.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [
            &self.user_agent,
            &self.language,
            &self.platform,
            &self.screen,
            &self.timezone,
        ] {
            hasher.update(part.trim().as_bytes());
            hasher.update(b"|");
        }
        hex::encode(hasher.finalize())
    }
}
