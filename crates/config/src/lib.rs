//! Configuration loading for label sync applications
//!
//! Config files live in a shared directory, `~/.config/labelsync/` by
//! default. [`ConfigDir`] addresses any directory with the same layout; the
//! free functions operate on the default one.
//!
//! Call [`init`] at application startup to bootstrap the config directory.

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Name of the application directory under the platform config dir
const APP_DIR: &str = "labelsync";

/// A directory holding JSON config files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDir {
    root: PathBuf,
}

impl ConfigDir {
    /// Use `root` as the config directory
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The shared directory (`~/.config/labelsync/`), if the platform has one
    pub fn shared() -> Option<Self> {
        dirs::config_dir().map(|p| Self::at(p.join(APP_DIR)))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }

    pub fn exists(&self, filename: &str) -> bool {
        self.path(filename).exists()
    }

    /// Create the directory if it doesn't exist
    pub fn ensure(&self) -> Result<&Path> {
        std::fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create config directory: {}", self.root.display()))?;
        Ok(&self.root)
    }

    pub fn load_json<T: DeserializeOwned>(&self, filename: &str) -> Result<T> {
        load_json_file(&self.path(filename))
    }

    /// Write `value` as pretty JSON, creating the directory first
    pub fn save_json<T: Serialize>(&self, filename: &str, value: &T) -> Result<()> {
        self.ensure()?;
        let path = self.path(filename);
        let content = serde_json::to_string_pretty(value)?;
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }
}

/// Initialize the shared config directory.
///
/// Creates ~/.config/labelsync/ if it doesn't exist.
/// Call this once at application startup.
pub fn init() -> Result<PathBuf> {
    ensure_config_dir()
}

/// Get the shared config directory (~/.config/labelsync/)
pub fn config_dir() -> Option<PathBuf> {
    ConfigDir::shared().map(|dir| dir.root)
}

/// Get the path to a config file within the shared config directory
pub fn config_path(filename: &str) -> Option<PathBuf> {
    ConfigDir::shared().map(|dir| dir.path(filename))
}

/// Load and parse a JSON file from an arbitrary path
pub fn load_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Ensure the shared config directory exists
pub fn ensure_config_dir() -> Result<PathBuf> {
    let dir = shared_dir()?;
    dir.ensure()?;
    Ok(dir.root)
}

fn shared_dir() -> Result<ConfigDir> {
    ConfigDir::shared().context("Could not determine config directory")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        retries: u32,
    }

    #[test]
    fn test_config_dir() {
        let dir = config_dir();
        assert!(dir.is_some());
        assert!(dir.unwrap().ends_with("labelsync"));
    }

    #[test]
    fn test_config_path() {
        let path = config_path("label-sync.json").unwrap();
        assert!(path.ends_with("labelsync/label-sync.json"));
    }

    #[test]
    fn test_save_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = ConfigDir::at(tmp.path().join("nested"));
        assert!(!dir.exists("sample.json"));

        let sample = Sample {
            name: "work".to_string(),
            retries: 2,
        };
        dir.save_json("sample.json", &sample).unwrap();

        assert!(dir.exists("sample.json"));
        assert_eq!(dir.load_json::<Sample>("sample.json").unwrap(), sample);
    }

    #[test]
    fn test_load_invalid_json() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = ConfigDir::at(tmp.path());
        std::fs::write(dir.path("broken.json"), "{ not json").unwrap();

        let err = dir.load_json::<Sample>("broken.json").unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_load_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = ConfigDir::at(tmp.path());
        assert!(dir.load_json::<Sample>("missing.json").is_err());
    }
}
