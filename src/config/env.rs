//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration.

use std::env;

use crate::utils::LogLevel;

/// Environment variable prefix
const ENV_PREFIX: &str = "TEST_LOOM";

/// Environment configuration from environment variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// From TEST_LOOM_PARALLEL_DISCOVERY
    pub parallel_discovery: Option<bool>,
    /// From TEST_LOOM_PARALLEL_SUITES
    pub parallel_suites: Option<bool>,
    /// From TEST_LOOM_RANDOM_ORDER
    pub random_order: Option<bool>,
    /// From TEST_LOOM_SEED
    pub seed: Option<String>,
    /// From TEST_LOOM_TIMEOUT (milliseconds)
    pub timeout_ms: Option<u64>,
    /// From TEST_LOOM_BORING_THRESHOLD
    pub boring_threshold: Option<usize>,
    /// From TEST_LOOM_LOG_LEVEL
    pub log_level: Option<LogLevel>,
    /// From TEST_LOOM_CONFIG
    pub config_file: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            parallel_discovery: get_env_bool("PARALLEL_DISCOVERY"),
            parallel_suites: get_env_bool("PARALLEL_SUITES"),
            random_order: get_env_bool("RANDOM_ORDER"),
            seed: get_env("SEED"),
            timeout_ms: get_env_parse("TIMEOUT"),
            boring_threshold: get_env_parse("BORING_THRESHOLD"),
            log_level: get_env_parse("LOG_LEVEL"),
            config_file: get_env("CONFIG"),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.parallel_discovery.is_some()
            || self.parallel_suites.is_some()
            || self.random_order.is_some()
            || self.seed.is_some()
            || self.timeout_ms.is_some()
            || self.boring_threshold.is_some()
            || self.log_level.is_some()
            || self.config_file.is_some()
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
}

/// Get environment variable and parse to type
fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.parse().ok())
}

/// Get environment variable as boolean
fn get_env_bool(name: &str) -> Option<bool> {
    get_env(name).map(|v| {
        matches!(
            v.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "enabled"
        )
    })
}

/// Builder for setting environment variables (useful for testing)
#[derive(Default)]
pub struct EnvBuilder {
    vars: Vec<(String, String)>,
}

impl EnvBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn var(mut self, name: &str, value: impl ToString) -> Self {
        self.vars
            .push((format!("{ENV_PREFIX}_{name}"), value.to_string()));
        self
    }

    pub fn parallel_discovery(self, parallel: bool) -> Self {
        self.var("PARALLEL_DISCOVERY", parallel)
    }

    pub fn parallel_suites(self, parallel: bool) -> Self {
        self.var("PARALLEL_SUITES", parallel)
    }

    pub fn random_order(self, random: bool) -> Self {
        self.var("RANDOM_ORDER", random)
    }

    pub fn seed(self, seed: impl Into<String>) -> Self {
        self.var("SEED", seed.into())
    }

    pub fn timeout_ms(self, timeout: u64) -> Self {
        self.var("TIMEOUT", timeout)
    }

    pub fn log_level(self, level: LogLevel) -> Self {
        self.var("LOG_LEVEL", level)
    }

    /// Apply environment variables
    pub fn apply(self) {
        for (key, value) in self.vars {
            env::set_var(key, value);
        }
    }

    /// Apply and return guard that restores on drop
    pub fn apply_scoped(self) -> EnvGuard {
        let previous: Vec<_> = self
            .vars
            .iter()
            .map(|(k, _)| (k.clone(), env::var(k).ok()))
            .collect();

        self.apply();

        EnvGuard { previous }
    }
}

/// Guard that restores environment variables on drop
pub struct EnvGuard {
    previous: Vec<(String, Option<String>)>,
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
    }
}
