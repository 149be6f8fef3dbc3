//! Engine configuration
//!
//! Supports loading tunables from (in order of priority):
//! 1. An explicit JSON file
//! 2. `label-sync.json` in the shared config directory
//! 3. Built-in defaults

use anyhow::{Context, Result, ensure};
use config::ConfigDir;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Config filename in the shared config directory
const CONFIG_FILE: &str = "label-sync.json";

/// Timing constants and limits of the sync engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// How long a fetched label set counts as fresh
    pub ttl: Duration,
    /// Quiet period after a successful request during which an identical
    /// request is answered with the previous result
    pub cooldown: Duration,
    /// Labels hydrated per batch
    pub batch_size: usize,
    /// Retries after a rate-limited detail fetch
    pub max_rate_limit_retries: u32,
    /// Backoff before retry `n` is `backoff_step * n`
    pub backoff_step: Duration,
    /// Pause between hydration batches
    pub inter_batch_delay: Duration,
    /// Upper bound on the wall-clock time of one hydration run
    pub hydration_deadline: Option<Duration>,
    /// Consecutive authoritative failures before an account is reported degraded
    pub degraded_after_failures: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5 * 60),
            cooldown: Duration::from_secs(3),
            batch_size: 10,
            max_rate_limit_retries: 2,
            backoff_step: Duration::from_millis(400),
            inter_batch_delay: Duration::from_millis(150),
            hydration_deadline: None,
            degraded_after_failures: 3,
        }
    }
}

/// On-disk format, every field optional
#[derive(Debug, Default, Serialize, Deserialize)]
struct EngineConfigFile {
    ttl_ms: Option<u64>,
    cooldown_ms: Option<u64>,
    batch_size: Option<usize>,
    max_rate_limit_retries: Option<u32>,
    backoff_step_ms: Option<u64>,
    inter_batch_delay_ms: Option<u64>,
    hydration_deadline_ms: Option<u64>,
    degraded_after_failures: Option<u32>,
}

impl EngineConfig {
    /// Load the config file from the shared config directory, or defaults if absent
    pub fn load() -> Result<Self> {
        match ConfigDir::shared() {
            Some(dir) => Self::load_in(&dir),
            None => Ok(Self::default()),
        }
    }

    /// Load the config file from `dir`, or defaults if absent
    pub fn load_in(dir: &ConfigDir) -> Result<Self> {
        if dir.exists(CONFIG_FILE) {
            let file: EngineConfigFile = dir.load_json(CONFIG_FILE)?;
            return Self::from_config_file(file);
        }
        Ok(Self::default())
    }

    /// Load configuration from a specific JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let file: EngineConfigFile = config::load_json_file(path)?;
        Self::from_config_file(file)
    }

    /// Parse configuration from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let file: EngineConfigFile =
            serde_json::from_str(json).context("Failed to parse engine config JSON")?;
        Self::from_config_file(file)
    }

    /// Save this configuration to the shared config directory
    pub fn save(&self) -> Result<()> {
        let dir = ConfigDir::shared().context("Could not determine config directory")?;
        self.save_in(&dir)
    }

    pub fn save_in(&self, dir: &ConfigDir) -> Result<()> {
        dir.save_json(CONFIG_FILE, &self.to_config_file())
    }

    /// Path of the config file in the shared config directory
    pub fn default_config_path() -> Option<std::path::PathBuf> {
        config::config_path(CONFIG_FILE)
    }

    fn from_config_file(file: EngineConfigFile) -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            ttl: file.ttl_ms.map(Duration::from_millis).unwrap_or(defaults.ttl),
            cooldown: file
                .cooldown_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.cooldown),
            batch_size: file.batch_size.unwrap_or(defaults.batch_size),
            max_rate_limit_retries: file
                .max_rate_limit_retries
                .unwrap_or(defaults.max_rate_limit_retries),
            backoff_step: file
                .backoff_step_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.backoff_step),
            inter_batch_delay: file
                .inter_batch_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.inter_batch_delay),
            hydration_deadline: file.hydration_deadline_ms.map(Duration::from_millis),
            degraded_after_failures: file
                .degraded_after_failures
                .unwrap_or(defaults.degraded_after_failures),
        };
        config.validate()?;
        Ok(config)
    }

    fn to_config_file(&self) -> EngineConfigFile {
        EngineConfigFile {
            ttl_ms: Some(self.ttl.as_millis() as u64),
            cooldown_ms: Some(self.cooldown.as_millis() as u64),
            batch_size: Some(self.batch_size),
            max_rate_limit_retries: Some(self.max_rate_limit_retries),
            backoff_step_ms: Some(self.backoff_step.as_millis() as u64),
            inter_batch_delay_ms: Some(self.inter_batch_delay.as_millis() as u64),
            hydration_deadline_ms: self.hydration_deadline.map(|d| d.as_millis() as u64),
            degraded_after_failures: Some(self.degraded_after_failures),
        }
    }

    /// Check invariants the engine relies on
    pub fn validate(&self) -> Result<()> {
        ensure!(self.batch_size > 0, "batch_size must be at least 1");
        ensure!(
            self.degraded_after_failures > 0,
            "degraded_after_failures must be at least 1"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.ttl, Duration::from_secs(300));
        assert_eq!(config.cooldown, Duration::from_secs(3));
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.max_rate_limit_retries, 2);
        assert_eq!(config.backoff_step, Duration::from_millis(400));
        assert_eq!(config.inter_batch_delay, Duration::from_millis(150));
        assert!(config.hydration_deadline.is_none());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = EngineConfig::from_json(r#"{ "ttl_ms": 60000, "batch_size": 5 }"#).unwrap();
        assert_eq!(config.ttl, Duration::from_secs(60));
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.cooldown, Duration::from_secs(3));
    }

    #[test]
    fn test_hydration_deadline() {
        let config = EngineConfig::from_json(r#"{ "hydration_deadline_ms": 2500 }"#).unwrap();
        assert_eq!(config.hydration_deadline, Some(Duration::from_millis(2500)));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        assert!(EngineConfig::from_json(r#"{ "batch_size": 0 }"#).is_err());
    }

    #[test]
    fn test_invalid_json() {
        assert!(EngineConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "cooldown_ms": 1000, "max_rate_limit_retries": 4 }}"#).unwrap();

        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.cooldown, Duration::from_secs(1));
        assert_eq!(config.max_rate_limit_retries, 4);
    }

    #[test]
    fn test_load_in_missing_dir_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = ConfigDir::at(tmp.path().join("absent"));
        assert_eq!(EngineConfig::load_in(&dir).unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_save_in_then_load_in() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = ConfigDir::at(tmp.path());
        let config = EngineConfig {
            ttl: Duration::from_secs(30),
            hydration_deadline: Some(Duration::from_secs(20)),
            ..EngineConfig::default()
        };
        config.save_in(&dir).unwrap();
        assert_eq!(EngineConfig::load_in(&dir).unwrap(), config);
    }

    #[test]
    fn test_file_format_roundtrip() {
        let config = EngineConfig {
            hydration_deadline: Some(Duration::from_secs(20)),
            ..EngineConfig::default()
        };
        let json = serde_json::to_string(&config.to_config_file()).unwrap();
        assert_eq!(EngineConfig::from_json(&json).unwrap(), config);
    }
}
