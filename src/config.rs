//! # Configuration Module
//!
//! Data directory setup and runtime settings for Attune.
//!
//! ## Data Storage
//!
//! Attune keeps its learned profile in the platform-standard data directory:
//! - Linux: `~/.local/share/attune/attune.db`
//! - macOS: `~/Library/Application Support/attune/attune.db`
//! - Windows: `%APPDATA%\attune\attune.db`
//!
//! ## Runtime Settings
//!
//! [`RuntimeConfig`] can be read from a JSON file. Every field is optional;
//! missing fields take their defaults, and command-line flags or the
//! `ATTUNE_DB` / `ATTUNE_CATALOG` environment variables override the file.
//!
//! ```json
//! {
//!   "db_path": "/srv/attune/profile.db",
//!   "catalog_path": "library.json",
//!   "seed": 7,
//!   "persistence": "background"
//! }
//! ```

use anyhow::{Context, Result};
use path_absolutize::Absolutize;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "attune";
const DB_FILE: &str = "attune.db";

/// Returns the platform-appropriate data directory for Attune, creating it
/// when missing.
///
/// # Errors
///
/// Fails when the system data directory cannot be determined or the
/// `attune` subdirectory cannot be created.
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().ok_or_else(|| {
        anyhow::anyhow!(
            "Could not determine system data directory. Please ensure your platform supports standard data directories."
        )
    })?;

    let app_dir = data_dir.join(APP_DIR);
    fs::create_dir_all(&app_dir).with_context(|| {
        format!(
            "Failed to create Attune data directory at {}. Please check file permissions.",
            app_dir.display()
        )
    })?;

    Ok(app_dir)
}

/// Returns the platform-appropriate database file path.
///
/// ```no_run
/// use attune::config::get_db_path;
///
/// let db_path = get_db_path()?;
/// println!("Profile location: {}", db_path.display());
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn get_db_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join(DB_FILE))
}

/// When persistence writes happen relative to the rating call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceMode {
    /// Written before the rating call returns.
    #[default]
    Immediate,
    /// Queued to a writer thread.
    Background,
}

/// Configuration for runtime behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Path to the profile database
    pub db_path: PathBuf,
    /// Offline track library (JSON)
    pub catalog_path: Option<PathBuf>,
    /// Fixed RNG seed for reproducible recommendations
    pub seed: Option<u64>,
    pub persistence: PersistenceMode,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            db_path: get_db_path().unwrap_or_else(|_| PathBuf::from(DB_FILE)),
            catalog_path: None,
            seed: None,
            persistence: PersistenceMode::default(),
        }
    }
}

impl RuntimeConfig {
    /// Create configuration with explicit database path
    #[must_use]
    pub fn with_db_path(db_path: PathBuf) -> Self {
        Self {
            db_path,
            ..Self::default()
        }
    }

    /// Read a JSON config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Config file {} is not valid JSON", path.display()))?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Turn relative paths into absolute ones against the working directory.
    pub fn absolutize(mut self) -> Result<Self> {
        self.db_path = absolute(&self.db_path)?;
        if let Some(catalog) = self.catalog_path.take() {
            self.catalog_path = Some(absolute(&catalog)?);
        }
        Ok(self)
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    Ok(path
        .absolutize()
        .with_context(|| format!("Failed to resolve path {}", path.display()))?
        .into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_db_path_structure() {
        let path = get_db_path().expect("Should get valid path");
        assert_eq!(path.file_name().unwrap(), "attune.db");
        let parent = path.parent().expect("Should have parent directory");
        assert_eq!(parent.file_name().unwrap(), "attune");
        assert!(parent.is_dir());
        assert!(path.is_absolute(), "Database path should be absolute");
    }

    #[test]
    fn test_get_db_path_consistent_results() {
        let path1 = get_db_path().expect("First call should succeed");
        let path2 = get_db_path().expect("Second call should succeed");
        assert_eq!(path1, path2);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: RuntimeConfig =
            serde_json::from_str(r#"{ "seed": 7, "persistence": "background" }"#).unwrap();
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.persistence, PersistenceMode::Background);
        assert_eq!(config.catalog_path, None);
        assert_eq!(config.db_path, RuntimeConfig::default().db_path);
    }

    #[test]
    fn test_absolutize_relative_paths() {
        let config = RuntimeConfig {
            catalog_path: Some(PathBuf::from("library.json")),
            ..RuntimeConfig::with_db_path(PathBuf::from("profile.db"))
        }
        .absolutize()
        .unwrap();
        assert!(config.db_path.is_absolute());
        assert!(config.db_path.ends_with("profile.db"));
        assert!(config.catalog_path.unwrap().is_absolute());
    }

    #[test]
    fn test_load_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attune.json");
        fs::write(&path, r#"{ "db_path": "/tmp/x.db" }"#).unwrap();
        let config = RuntimeConfig::load(&path).unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/x.db"));
        assert!(RuntimeConfig::load(&dir.path().join("missing.json")).is_err());
    }
}
