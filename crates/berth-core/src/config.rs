//! Berth configuration.
//!
//! Loaded from TOML; every section is optional:
//! - `[runtime]` daemon address, host override and stop grace period
//! - `[startup]` default attempt limit
//! - `[wait]` default readiness timeout and poll interval
//! - `[resources]` roots searched for init scripts and configuration overrides

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lifecycle::{ControllerSettings, DEFAULT_STARTUP_ATTEMPTS};
use crate::script::ResourceResolver;
use crate::wait::{WaitCondition, WaitStrategy};

/// Environment variable that overrides `runtime.host_override`.
pub const HOST_OVERRIDE_ENV: &str = "BERTH_HOST_OVERRIDE";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file '{path}': {reason}")]
    Read {
        /// Config path.
        path: PathBuf,
        /// Failure reason.
        reason: String,
    },

    /// The TOML did not parse.
    #[error("invalid TOML: {0}")]
    Parse(String),

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Container runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RuntimeSection {
    /// Daemon address; the platform default when unset.
    pub docker_host: Option<String>,
    /// Host reported to callers instead of the daemon's.
    pub host_override: Option<String>,
    /// Grace period before a stopping container is killed.
    pub stop_timeout_secs: u64,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            docker_host: None,
            host_override: None,
            stop_timeout_secs: 10,
        }
    }
}

/// Startup retry settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StartupSection {
    /// Attempts for specs that do not set their own.
    pub attempts: u32,
}

impl Default for StartupSection {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_STARTUP_ATTEMPTS,
        }
    }
}

/// Readiness defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WaitSection {
    /// Readiness timeout in seconds.
    pub timeout_secs: u64,
    /// Poll interval in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for WaitSection {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            poll_interval_ms: 100,
        }
    }
}

/// Resource lookup settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ResourcesSection {
    /// Directories searched, in order, for relative resource names.
    pub roots: Vec<PathBuf>,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BerthConfig {
    /// Runtime settings.
    pub runtime: RuntimeSection,
    /// Startup settings.
    pub startup: StartupSection,
    /// Wait settings.
    pub wait: WaitSection,
    /// Resource settings.
    pub resources: ResourcesSection,
}

impl BerthConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut config = Self::from_toml(&content)?;
        // Relative roots are relative to the config file.
        if let Some(dir) = path.parent() {
            for root in &mut config.resources.roots {
                if root.is_relative() {
                    *root = dir.join(&*root);
                }
            }
        }
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.startup.attempts == 0 {
            return Err(ConfigError::Invalid(
                "startup.attempts must be greater than 0".to_string(),
            ));
        }

        if self.wait.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "wait.poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self
            .runtime
            .host_override
            .as_deref()
            .is_some_and(|h| h.trim().is_empty())
        {
            return Err(ConfigError::Invalid(
                "runtime.host_override cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Apply `BERTH_HOST_OVERRIDE` from the process environment.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_host_override_from(std::env::var(HOST_OVERRIDE_ENV).ok())
    }

    fn with_host_override_from(mut self, value: Option<String>) -> Self {
        if let Some(host) = value.filter(|h| !h.trim().is_empty()) {
            self.runtime.host_override = Some(host);
        }
        self
    }

    /// Controller defaults derived from this configuration.
    #[must_use]
    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            default_attempts: self.startup.attempts,
            stop_timeout: Duration::from_secs(self.runtime.stop_timeout_secs),
            host_override: self.runtime.host_override.clone(),
        }
    }

    /// Wait strategy for `condition` with the configured timing.
    #[must_use]
    pub fn wait_strategy(&self, condition: WaitCondition) -> WaitStrategy {
        WaitStrategy::new(condition)
            .with_timeout(Duration::from_secs(self.wait.timeout_secs))
            .with_poll_interval(Duration::from_millis(self.wait.poll_interval_ms))
    }

    /// Resolver over the configured resource roots.
    #[must_use]
    pub fn resolver(&self) -> ResourceResolver {
        ResourceResolver::new(self.resources.roots.iter().cloned())
    }
}
