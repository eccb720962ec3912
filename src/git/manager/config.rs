//! Configuration for the operation manager.

use crate::error::Result;
use crate::git::{GIT_BINARY_ENV, locate_git};
use crate::lock::{DEFAULT_POLL_INTERVAL, DEFAULT_STALE_AGE};
use crate::state::{DEFAULT_IDLE_TIMEOUT, DEFAULT_SWEEP_INTERVAL, RegistryConfig};
use std::path::PathBuf;
use std::time::Duration;

/// Default wait for a foreign `index.lock` to clear before a write
pub const DEFAULT_EXTERNAL_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for [`GitOperationManager`](super::GitOperationManager)
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Repository entries idle longer than this are evicted
    pub idle_timeout: Duration,

    /// Period of the idle sweep
    pub sweep_interval: Duration,

    /// How long a write waits for a foreign index lock to clear
    pub external_lock_timeout: Duration,

    /// Poll interval while waiting for the index lock
    pub lock_poll_interval: Duration,

    /// Index locks older than this may be force-cleared by the clean workflow
    pub stale_lock_age: Duration,

    /// Git executable; located on `PATH` when `None`
    pub git_binary: Option<PathBuf>,

    /// Resolve symlinks and relative components before keying repositories
    pub canonicalize_paths: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,            // 5 minutes
            sweep_interval: DEFAULT_SWEEP_INTERVAL,        // 1 minute
            external_lock_timeout: DEFAULT_EXTERNAL_LOCK_TIMEOUT,
            lock_poll_interval: DEFAULT_POLL_INTERVAL,     // 100ms
            stale_lock_age: DEFAULT_STALE_AGE,             // 2 seconds
            git_binary: None,
            canonicalize_paths: true,
        }
    }
}

impl ManagerConfig {
    /// Parse a number from an environment variable, clamped to `[min, max]`
    fn parse_env(var_name: &str, default: u64, min: u64, max: u64) -> u64 {
        Self::parse_value(std::env::var(var_name).ok().as_deref(), default, min, max)
    }

    fn parse_value(raw: Option<&str>, default: u64, min: u64, max: u64) -> u64 {
        raw.and_then(|s| s.trim().parse::<u64>().ok())
            .map(|v| v.clamp(min, max))
            .unwrap_or(default)
    }

    /// Create config from environment variables with fallback to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            idle_timeout: Duration::from_secs(Self::parse_env(
                "KODEGEN_GIT_IDLE_TIMEOUT_SECS",
                defaults.idle_timeout.as_secs(),
                1,
                86_400,
            )),
            sweep_interval: Duration::from_secs(Self::parse_env(
                "KODEGEN_GIT_SWEEP_INTERVAL_SECS",
                defaults.sweep_interval.as_secs(),
                1,
                3_600,
            )),
            external_lock_timeout: Duration::from_millis(Self::parse_env(
                "KODEGEN_GIT_LOCK_TIMEOUT_MS",
                defaults.external_lock_timeout.as_millis() as u64,
                0,
                600_000,
            )),
            lock_poll_interval: Duration::from_millis(Self::parse_env(
                "KODEGEN_GIT_LOCK_POLL_MS",
                defaults.lock_poll_interval.as_millis() as u64,
                1,
                10_000,
            )),
            stale_lock_age: Duration::from_millis(Self::parse_env(
                "KODEGEN_GIT_STALE_LOCK_MS",
                defaults.stale_lock_age.as_millis() as u64,
                0,
                3_600_000,
            )),
            git_binary: std::env::var_os(GIT_BINARY_ENV).map(PathBuf::from),
            canonicalize_paths: defaults.canonicalize_paths,
        }
        .with_idle_margin()
    }

    /// Raise `idle_timeout` past `external_lock_timeout` when needed
    pub fn with_idle_margin(mut self) -> Self {
        if self.idle_timeout <= self.external_lock_timeout {
            self.idle_timeout = self.external_lock_timeout + self.sweep_interval;
        }
        self
    }

    /// Validate settings are usable
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.sweep_interval.is_zero() {
            return Err("sweep_interval must be greater than zero".to_string());
        }
        if self.idle_timeout.is_zero() {
            return Err("idle_timeout must be greater than zero".to_string());
        }
        if self.idle_timeout <= self.external_lock_timeout {
            return Err(format!(
                "idle_timeout ({}ms) must exceed external_lock_timeout ({}ms)",
                self.idle_timeout.as_millis(),
                self.external_lock_timeout.as_millis()
            ));
        }
        if self.lock_poll_interval.is_zero() {
            return Err("lock_poll_interval must be greater than zero".to_string());
        }
        if self.lock_poll_interval > self.external_lock_timeout && !self.external_lock_timeout.is_zero() {
            return Err(format!(
                "lock_poll_interval ({}ms) exceeds external_lock_timeout ({}ms)",
                self.lock_poll_interval.as_millis(),
                self.external_lock_timeout.as_millis()
            ));
        }
        if let Some(binary) = &self.git_binary
            && binary.as_os_str().is_empty()
        {
            return Err("git_binary must not be empty".to_string());
        }
        Ok(())
    }

    /// Git executable to run: the configured one, or `git` found on `PATH`
    pub fn resolve_git_binary(&self) -> Result<PathBuf> {
        match &self.git_binary {
            Some(binary) => Ok(binary.clone()),
            None => locate_git(),
        }
    }

    pub(crate) fn registry_config(&self, git_binary: PathBuf) -> RegistryConfig {
        RegistryConfig {
            git_binary,
            idle_timeout: self.idle_timeout,
            sweep_interval: self.sweep_interval,
            canonicalize_paths: self.canonicalize_paths,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ManagerConfig::default();
        assert_eq!(config.idle_timeout, Duration::from_secs(300));
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.stale_lock_age, Duration::from_secs(2));
        assert!(config.canonicalize_paths);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_intervals() {
        let config = ManagerConfig {
            sweep_interval: Duration::ZERO,
            ..ManagerConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ManagerConfig {
            lock_poll_interval: Duration::from_secs(5),
            external_lock_timeout: Duration::from_secs(1),
            ..ManagerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn idle_timeout_must_outlast_the_lock_wait() {
        let config = ManagerConfig {
            idle_timeout: Duration::from_millis(50),
            external_lock_timeout: Duration::from_millis(200),
            ..ManagerConfig::default()
        };
        let err = config.validate().expect_err("idle shorter than lock wait");
        assert!(err.contains("idle_timeout"));

        let config = config.with_idle_margin();
        assert!(config.idle_timeout > config.external_lock_timeout);
        assert!(config.validate().is_ok());

        let config = ManagerConfig::default().with_idle_margin();
        assert_eq!(config.idle_timeout, Duration::from_secs(300));
    }

    #[test]
    fn env_values_are_clamped_or_fall_back() {
        assert_eq!(ManagerConfig::parse_value(Some("999999"), 5, 1, 100), 100);
        assert_eq!(ManagerConfig::parse_value(Some(" 0 "), 5, 1, 100), 1);
        assert_eq!(ManagerConfig::parse_value(Some("soon"), 5, 1, 100), 5);
        assert_eq!(ManagerConfig::parse_value(None, 7, 1, 100), 7);
        assert_eq!(ManagerConfig::parse_env("KODEGEN_GIT_TEST_UNSET_VARIABLE", 7, 1, 100), 7);
    }

    #[test]
    fn explicit_binary_wins_over_path_lookup() {
        let config = ManagerConfig {
            git_binary: Some(PathBuf::from("/opt/git/bin/git")),
            ..ManagerConfig::default()
        };
        assert_eq!(
            config.resolve_git_binary().expect("resolve"),
            PathBuf::from("/opt/git/bin/git")
        );
    }
}
