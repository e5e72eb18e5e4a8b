//! Configuration loading.
//!
//! Lookup order for the config file:
//! 1. explicit path (CLI `--config`)
//! 2. `LEARNTAV_CONFIG` environment variable
//! 3. `<platform config dir>/config.toml`
//!
//! A missing file yields defaults; a present but invalid file is an error.

pub mod schema;

pub use schema::{
    AdminConfig, Config, LoggingConfig, LoginLimitConfig, PasswordConfig, SessionConfig,
    StorageConfig,
};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the config path.
pub const CONFIG_ENV: &str = "LEARNTAV_CONFIG";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "LearnTAV", "learntav-auth")
}

/// Default location of `config.toml`.
pub fn default_config_path() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from(".learntav").join("config.toml"))
}

/// Default directory for persistent storage.
pub fn default_data_dir() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".learntav"))
}

/// Resolve which config file to read.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    match std::env::var(CONFIG_ENV) {
        Ok(path) if !path.trim().is_empty() => {
            PathBuf::from(shellexpand::tilde(path.trim()).into_owned())
        }
        _ => default_config_path(),
    }
}

/// Load and validate configuration.
pub fn load(explicit: Option<&Path>) -> Result<Config> {
    let path = resolve_config_path(explicit);
    let mut config = if path.exists() {
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        parse(&contents).with_context(|| format!("Failed to parse config {}", path.display()))?
    } else {
        if explicit.is_some() {
            anyhow::bail!("Config file {} does not exist", path.display());
        }
        tracing::debug!(path = %path.display(), "No config file; using defaults");
        Config::default()
    };
    config.config_path = path;
    Ok(config)
}

/// Parse and validate a TOML document.
pub fn parse(contents: &str) -> Result<Config> {
    let config: Config = toml::from_str(contents)?;
    config.validate()?;
    Ok(config)
}

impl Config {
    /// Directory for persistent storage.
    pub fn data_dir(&self) -> PathBuf {
        self.storage.data_dir.clone().unwrap_or_else(default_data_dir)
    }

    /// Path of the local storage database.
    pub fn local_db_path(&self) -> PathBuf {
        self.data_dir().join("local.db")
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.session.ttl_secs, 86_400);
        assert_eq!(config.session.renewal_threshold_secs, 900);
        assert_eq!(config.session.sweep_interval_secs, 300);
        assert_eq!(config.admin.passcode, "0410");
        assert_eq!(config.admin.session_ttl_secs, 14_400);
        assert_eq!(config.admin.max_attempts, 3);
        assert_eq!(config.admin.lockout_secs, 60);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config = parse(
            r#"
            [session]
            ttl_secs = 3600

            [admin]
            passcode = "1234"
            "#,
        )
        .unwrap();
        assert_eq!(config.session.ttl_secs, 3600);
        assert_eq!(config.session.renewal_threshold_secs, 900);
        assert_eq!(config.admin.passcode, "1234");
        assert_eq!(config.admin.max_attempts, 3);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn rejects_threshold_not_below_ttl() {
        let err = parse("[session]\nttl_secs = 600\nrenewal_threshold_secs = 600\n").unwrap_err();
        assert!(err.to_string().contains("renewal_threshold_secs"));
    }

    #[test]
    fn rejects_bad_passcode() {
        assert!(parse("[admin]\npasscode = \"12345\"\n").is_err());
        assert!(parse("[admin]\npasscode = \"12a4\"\n").is_err());
    }

    #[test]
    fn rejects_zero_values() {
        assert!(parse("[session]\nttl_secs = 0\n").is_err());
        assert!(parse("[password]\niterations = 0\n").is_err());
        assert!(parse("[login_limit]\nmax_attempts = 0\n").is_err());
        assert!(parse("[admin]\nmax_attempts = 0\n").is_err());
    }

    #[test]
    fn load_explicit_missing_path_fails() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("nope.toml");
        assert!(load(Some(&missing)).is_err());
    }

    #[test]
    fn load_reads_file_and_records_path() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        let data_dir = tmp.path().join("data");
        std::fs::write(
            &path,
            format!(
                "[storage]\ndata_dir = \"{}\"\n",
                data_dir.display().to_string().replace('\\', "\\\\")
            ),
        )
        .unwrap();

        let config = load(Some(&path)).unwrap();
        assert_eq!(config.config_path, path);
        assert_eq!(config.local_db_path(), data_dir.join("local.db"));
    }

    #[test]
    fn toml_round_trip_keeps_values() {
        let mut config = Config::default();
        config.admin.passcode = "5555".into();
        let rendered = config.to_toml().unwrap();
        let reparsed = parse(&rendered).unwrap();
        assert_eq!(reparsed.admin.passcode, "5555");
    }
}
