//! Configuration module
//!
//! Runner configuration loaded from YAML/JSON files and environment overrides.

pub mod env;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::utils::LogLevel;

pub use env::{EnvBuilder, EnvConfig, EnvGuard};

/// Runner configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Discover sibling blocks concurrently
    pub parallel_discovery: bool,

    /// Run top-level suites concurrently
    pub parallel_suites: bool,

    /// Shuffle execution order of sequential siblings
    pub random_order: bool,

    /// Seed for shuffling; a fresh one is generated when absent
    pub random_seed: Option<String>,

    /// Timeout applied to every test that sets none of its own
    pub default_timeout_ms: Option<u64>,

    /// Parameter expansions larger than this are marked boring
    pub boring_threshold: usize,

    /// Log level for `init_logger`
    pub log_level: LogLevel,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            parallel_discovery: false,
            parallel_suites: false,
            random_order: false,
            random_seed: None,
            default_timeout_ms: None,
            boring_threshold: 10,
            log_level: LogLevel::Warn,
        }
    }
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}

impl RunnerConfig {
    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content =
            std::fs::read_to_string(path.as_ref()).context("Failed to read config file")?;

        let config: Self = if is_yaml(path.as_ref()) {
            serde_yaml::from_str(&content).context("Failed to parse YAML config")?
        } else {
            serde_json::from_str(&content).context("Failed to parse JSON config")?
        };

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = if is_yaml(path.as_ref()) {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        std::fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// Resolve configuration from the environment.
    ///
    /// Loads `TEST_LOOM_CONFIG` when set, then applies the remaining
    /// `TEST_LOOM_*` overrides on top.
    pub fn from_env() -> Result<Self> {
        let env = EnvConfig::load();
        let base = match &env.config_file {
            Some(path) => Self::load(path)
                .with_context(|| format!("Failed to load config from {path}"))?,
            None => Self::default(),
        };
        let config = base.apply_env(&env);
        config.validate()?;
        Ok(config)
    }

    /// Layer environment overrides over this configuration
    pub fn apply_env(mut self, env: &EnvConfig) -> Self {
        if let Some(v) = env.parallel_discovery {
            self.parallel_discovery = v;
        }
        if let Some(v) = env.parallel_suites {
            self.parallel_suites = v;
        }
        if let Some(v) = env.random_order {
            self.random_order = v;
        }
        if let Some(seed) = &env.seed {
            self.random_seed = Some(seed.clone());
        }
        if let Some(ms) = env.timeout_ms {
            self.default_timeout_ms = Some(ms);
        }
        if let Some(threshold) = env.boring_threshold {
            self.boring_threshold = threshold;
        }
        if let Some(level) = env.log_level {
            self.log_level = level;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_timeout_ms == Some(0) {
            bail!("default_timeout_ms must be greater than zero");
        }
        if self.boring_threshold == 0 {
            bail!("boring_threshold must be greater than zero");
        }
        Ok(())
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = RunnerConfig::default();
        assert_eq!(config.boring_threshold, 10);
        assert!(!config.parallel_suites);
        assert!(config.default_timeout().is_none());
    }

    #[test]
    fn test_save_and_load_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("loom.yaml");

        let config = RunnerConfig {
            random_order: true,
            random_seed: Some("abc".into()),
            default_timeout_ms: Some(250),
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = RunnerConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_partial_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("loom.json");
        std::fs::write(&path, r#"{"parallel_suites": true, "log_level": "debug"}"#).unwrap();

        let loaded = RunnerConfig::load(&path).unwrap();
        assert!(loaded.parallel_suites);
        assert_eq!(loaded.log_level, LogLevel::Debug);
        assert_eq!(loaded.boring_threshold, 10);
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = RunnerConfig {
            default_timeout_ms: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_apply_env() {
        let env = EnvConfig {
            parallel_suites: Some(true),
            seed: Some("s33d".into()),
            timeout_ms: Some(500),
            ..Default::default()
        };
        let config = RunnerConfig::default().apply_env(&env);
        assert!(config.parallel_suites);
        assert_eq!(config.random_seed.as_deref(), Some("s33d"));
        assert_eq!(config.default_timeout(), Some(Duration::from_millis(500)));
    }
}
