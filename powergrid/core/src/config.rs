//! Durable Charge Configuration
//!
//! Per-scope JSON persistence for charge-limit and feature preferences.
//! One system-scope file (`system.json`) plus one file per user scope
//! (`users/<uid>.json`) live under a configurable root directory.
//!
//! Writes are atomic (write to `<path>.tmp`, then rename). The system file
//! is created once with the built-in default and never overwritten
//! automatically afterwards. Reads are lenient: a missing or corrupt file
//! yields the default config rather than an error, so the daemon can always
//! resolve an effective limit.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::limits::{ClampBounds, DAEMON_BOUNDS};

/// Default root directory for persisted configuration.
pub const DEFAULT_CONFIG_DIR: &str = "/var/lib/powergrid";

/// Errors from the config store
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Filesystem error
    #[error("config i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("config serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Writes to uid 0 are rejected; root has no user scope
    #[error("invalid uid for user config: {0}")]
    InvalidUid(u32),
}

/// Persisted per-scope preferences.
///
/// `charge_limit == 0` means "unset" for that scope.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeConfig {
    /// Charge limit percentage, 0 = unset
    #[serde(default)]
    pub charge_limit: u8,
    /// Whether the user wants the daemon driving the accessory LED
    #[serde(default)]
    pub control_led: bool,
    /// Whether charging should be disabled before system sleep
    #[serde(default)]
    pub disable_charging_before_sleep: bool,
}

impl ChargeConfig {
    /// Config holding just a limit, other preferences off.
    #[must_use]
    pub fn with_limit(limit: u8) -> Self {
        Self {
            charge_limit: limit,
            ..Self::default()
        }
    }
}

/// Filesystem-backed store for [`ChargeConfig`] scopes.
#[derive(Clone, Debug)]
pub struct ConfigStore {
    root: PathBuf,
    bounds: ClampBounds,
}

impl ConfigStore {
    /// Create a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            bounds: DAEMON_BOUNDS,
        }
    }

    /// Store at the default system location.
    #[must_use]
    pub fn system_default() -> Self {
        Self::new(DEFAULT_CONFIG_DIR)
    }

    /// Path of the system-scope file.
    #[must_use]
    pub fn system_path(&self) -> PathBuf {
        self.root.join("system.json")
    }

    /// Path of a user-scope file.
    #[must_use]
    pub fn user_path(&self, uid: u32) -> PathBuf {
        self.root.join("users").join(format!("{uid}.json"))
    }

    /// Create the system config with the given default limit if, and only
    /// if, no system file exists yet. An existing file is left untouched.
    pub fn ensure_system_config(&self, default_limit: u8) -> Result<(), ConfigError> {
        let path = self.system_path();
        if path.is_file() {
            return Ok(());
        }
        self.write_atomic(&path, &ChargeConfig::with_limit(default_limit))
    }

    /// Read the system-scope config. Missing or corrupt files yield the
    /// default (all-unset) config.
    #[must_use]
    pub fn read_system(&self) -> ChargeConfig {
        self.read_lenient(&self.system_path())
    }

    /// Read a user-scope config. uid 0 never has a user scope.
    #[must_use]
    pub fn read_user(&self, uid: u32) -> ChargeConfig {
        if uid == 0 {
            return ChargeConfig::default();
        }
        self.read_lenient(&self.user_path(uid))
    }

    /// Persist a user-scope config atomically.
    pub fn write_user(&self, uid: u32, config: &ChargeConfig) -> Result<(), ConfigError> {
        if uid == 0 {
            return Err(ConfigError::InvalidUid(uid));
        }
        self.write_atomic(&self.user_path(uid), config)
    }

    fn read_lenient(&self, path: &Path) -> ChargeConfig {
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(_) => return ChargeConfig::default(),
        };
        match serde_json::from_slice::<ChargeConfig>(&bytes) {
            Ok(mut cfg) => {
                cfg.charge_limit = self.bounds.clamp(cfg.charge_limit);
                cfg
            }
            Err(e) => {
                tracing::warn!(path = ?path, error = %e, "Ignoring corrupt config file");
                ChargeConfig::default()
            }
        }
    }

    fn write_atomic(&self, path: &Path, config: &ChargeConfig) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut stored = config.clone();
        stored.charge_limit = self.bounds.clamp(stored.charge_limit);

        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(&stored)?;
        fs::write(&tmp, bytes)?;
        if let Err(e) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn user_config_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path());

        let cfg = ChargeConfig {
            charge_limit: 75,
            control_led: true,
            disable_charging_before_sleep: true,
        };
        store.write_user(501, &cfg).unwrap();

        assert_eq!(store.read_user(501), cfg);
    }

    #[test]
    fn missing_files_read_as_default() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path());

        assert_eq!(store.read_system(), ChargeConfig::default());
        assert_eq!(store.read_user(501), ChargeConfig::default());
    }

    #[test]
    fn corrupt_file_reads_as_default() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path());

        fs::create_dir_all(dir.path()).unwrap();
        fs::write(store.system_path(), b"not json at all").unwrap();

        assert_eq!(store.read_system(), ChargeConfig::default());
    }

    #[test]
    fn ensure_system_config_never_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path());

        store.ensure_system_config(80).unwrap();
        assert_eq!(store.read_system().charge_limit, 80);

        // Simulate an admin edit, then re-run the ensure step.
        store
            .write_atomic(&store.system_path(), &ChargeConfig::with_limit(60))
            .unwrap();
        store.ensure_system_config(80).unwrap();
        assert_eq!(store.read_system().charge_limit, 60);
    }

    #[test]
    fn stored_limit_is_clamped_on_read() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path());

        fs::write(
            store.system_path(),
            br#"{"charge_limit": 250, "control_led": false, "disable_charging_before_sleep": false}"#,
        )
        .unwrap();
        assert_eq!(store.read_system().charge_limit, 100);
    }

    #[test]
    fn root_uid_has_no_user_scope() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path());

        assert!(matches!(
            store.write_user(0, &ChargeConfig::with_limit(80)),
            Err(ConfigError::InvalidUid(0))
        ));
        assert_eq!(store.read_user(0), ChargeConfig::default());
    }
}
