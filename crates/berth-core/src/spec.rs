//! Declarative container specification.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;

use crate::error::{RuntimeError, RuntimeResult};

/// Image reference split into repository and tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    /// Repository, including any registry prefix (e.g. `localhost:5000/cassandra`).
    pub repository: String,

    /// Tag (defaults to `latest`).
    pub tag: String,
}

impl ImageRef {
    /// Create an image reference from repository and tag.
    #[must_use]
    pub fn new(repository: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            tag: tag.into(),
        }
    }

    /// Parse `repository[:tag]`.
    ///
    /// A colon inside the registry host (`host:port/repo`) is not a tag separator.
    #[must_use]
    pub fn parse(reference: &str) -> Self {
        match reference.rsplit_once(':') {
            Some((repository, tag)) if !tag.contains('/') && !repository.is_empty() => {
                Self::new(repository, tag)
            }
            _ => Self::new(reference, "latest"),
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

/// Volume mount configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    /// Source path on host or volume name.
    pub source: String,

    /// Target path in container.
    pub target: String,

    /// Whether mount is read-only.
    pub read_only: bool,

    /// Mount type (bind, volume, tmpfs).
    pub mount_type: MountType,
}

/// Mount type for volumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MountType {
    /// Bind mount from host path.
    #[default]
    Bind,

    /// Named volume.
    Volume,

    /// Temporary filesystem.
    Tmpfs,
}

impl VolumeMount {
    /// Create a bind mount.
    #[must_use]
    pub fn bind(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            read_only: false,
            mount_type: MountType::Bind,
        }
    }

    /// Create a volume mount.
    #[must_use]
    pub fn volume(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: name.into(),
            target: target.into(),
            read_only: false,
            mount_type: MountType::Volume,
        }
    }

    /// Create a tmpfs mount.
    #[must_use]
    pub fn tmpfs(target: impl Into<String>) -> Self {
        Self {
            source: String::new(),
            target: target.into(),
            read_only: false,
            mount_type: MountType::Tmpfs,
        }
    }

    /// Make mount read-only.
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

/// A host file or directory copied into the container after creation and before start.
///
/// Directories replace the content of `target`; files are written as `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyToContainer {
    /// Host path.
    pub source: PathBuf,

    /// Absolute path inside the container.
    pub target: String,
}

impl CopyToContainer {
    /// Create a copy declaration.
    #[must_use]
    pub fn new(source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Runtime health check configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Command to run for health check.
    pub test: Vec<String>,

    /// Interval between checks in seconds.
    pub interval_secs: u32,

    /// Timeout for health check in seconds.
    pub timeout_secs: u32,

    /// Number of retries before marking unhealthy.
    pub retries: u32,

    /// Start period in seconds (grace period for startup).
    pub start_period_secs: u32,
}

impl HealthCheck {
    /// Create a health check with a command.
    #[must_use]
    pub fn cmd(cmd: Vec<String>) -> Self {
        Self {
            test: cmd,
            interval_secs: 1,
            timeout_secs: 5,
            retries: 3,
            start_period_secs: 0,
        }
    }

    /// Set check interval.
    #[must_use]
    pub fn with_interval(mut self, secs: u32) -> Self {
        self.interval_secs = secs;
        self
    }

    /// Set retry count.
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }
}

/// Full declarative description of a fixture container.
///
/// Built by the caller (or a provider), then handed to a
/// [`LifecycleController`](crate::LifecycleController), which never mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Image to run.
    pub image: ImageRef,

    /// Optional container name. Left unset, the runtime picks one, which keeps
    /// retries from colliding with a half-removed predecessor.
    pub name: Option<String>,

    /// Command to run (overrides image CMD).
    pub command: Option<Vec<String>>,

    /// Container-side ports to publish on random host ports.
    pub exposed_ports: BTreeSet<u16>,

    /// Environment variables.
    pub env: HashMap<String, String>,

    /// Volume mounts.
    pub volumes: Vec<VolumeMount>,

    /// Host resources copied in before start.
    pub copy_files: Vec<CopyToContainer>,

    /// Labels for container metadata.
    pub labels: HashMap<String, String>,

    /// Health check command.
    pub healthcheck: Option<HealthCheck>,

    /// Startup attempt limit; `None` uses the controller default.
    pub startup_attempts: Option<u32>,
}

impl ContainerSpec {
    /// Create a spec for an image reference such as `cassandra:3.11.2`.
    #[must_use]
    pub fn new(image: impl AsRef<str>) -> Self {
        Self::from_image(ImageRef::parse(image.as_ref()))
    }

    /// Create a spec from a parsed image reference.
    #[must_use]
    pub fn from_image(image: ImageRef) -> Self {
        Self {
            image,
            name: None,
            command: None,
            exposed_ports: BTreeSet::new(),
            env: HashMap::new(),
            volumes: Vec::new(),
            copy_files: Vec::new(),
            labels: HashMap::new(),
            healthcheck: None,
            startup_attempts: None,
        }
    }

    /// Set container name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set command to run.
    #[must_use]
    pub fn with_command(mut self, cmd: Vec<String>) -> Self {
        self.command = Some(cmd);
        self
    }

    /// Declare a container port to publish.
    #[must_use]
    pub fn with_exposed_port(mut self, port: u16) -> Self {
        self.exposed_ports.insert(port);
        self
    }

    /// Add environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Add volume mount.
    #[must_use]
    pub fn with_volume(mut self, volume: VolumeMount) -> Self {
        self.volumes.push(volume);
        self
    }

    /// Copy a host file or directory into the container before start.
    #[must_use]
    pub fn with_copy_to_container(
        mut self,
        source: impl Into<PathBuf>,
        target: impl Into<String>,
    ) -> Self {
        self.copy_files.push(CopyToContainer::new(source, target));
        self
    }

    /// Add label.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Set health check.
    #[must_use]
    pub fn with_healthcheck(mut self, healthcheck: HealthCheck) -> Self {
        self.healthcheck = Some(healthcheck);
        self
    }

    /// Set the startup attempt limit.
    #[must_use]
    pub fn with_startup_attempts(mut self, attempts: u32) -> Self {
        self.startup_attempts = Some(attempts);
        self
    }

    /// Validate the spec.
    ///
    /// # Errors
    ///
    /// Returns error if the spec is invalid or a copy source does not exist.
    pub fn validate(&self) -> RuntimeResult<()> {
        if self.image.repository.is_empty() || self.image.tag.is_empty() {
            return Err(RuntimeError::InvalidSpec(
                "image cannot be empty".to_string(),
            ));
        }

        if let Some(ref name) = self.name {
            if name.is_empty()
                || !name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
            {
                return Err(RuntimeError::InvalidSpec(format!(
                    "invalid container name: {name}"
                )));
            }
        }

        if self.exposed_ports.contains(&0) {
            return Err(RuntimeError::InvalidSpec(
                "exposed port cannot be 0".to_string(),
            ));
        }

        if let Some(key) = self.env.keys().find(|k| k.is_empty() || k.contains('=')) {
            return Err(RuntimeError::InvalidSpec(format!(
                "invalid environment variable name: {key:?}"
            )));
        }

        if self.startup_attempts == Some(0) {
            return Err(RuntimeError::InvalidSpec(
                "startup attempts must be at least 1".to_string(),
            ));
        }

        for copy in &self.copy_files {
            if !copy.target.starts_with('/') {
                return Err(RuntimeError::InvalidSpec(format!(
                    "copy target must be an absolute path: {}",
                    copy.target
                )));
            }
            if !copy.source.exists() {
                return Err(RuntimeError::InvalidSpec(format!(
                    "copy source does not exist: {}",
                    copy.source.display()
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("cassandra:3.11.2", "cassandra", "3.11.2" ; "repository and tag")]
    #[test_case("cassandra", "cassandra", "latest" ; "implicit latest")]
    #[test_case("localhost:5000/cassandra", "localhost:5000/cassandra", "latest" ; "registry port is not a tag")]
    #[test_case("localhost:5000/cassandra:4.1", "localhost:5000/cassandra", "4.1" ; "registry port and tag")]
    fn test_image_ref_parse(reference: &str, repository: &str, tag: &str) {
        let image = ImageRef::parse(reference);
        assert_eq!(image.repository, repository);
        assert_eq!(image.tag, tag);
    }

    #[test]
    fn test_spec_builder() {
        let spec = ContainerSpec::new("cassandra:3.11.2")
            .with_exposed_port(9042)
            .with_exposed_port(9042)
            .with_env("CASSANDRA_START_RPC", "true")
            .with_volume(VolumeMount::tmpfs("/var/lib/cassandra"))
            .with_startup_attempts(3);

        assert_eq!(spec.image.to_string(), "cassandra:3.11.2");
        assert_eq!(spec.exposed_ports.len(), 1);
        assert_eq!(spec.env.get("CASSANDRA_START_RPC").map(String::as_str), Some("true"));
        assert_eq!(spec.startup_attempts, Some(3));
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let spec = ContainerSpec::new("alpine").with_startup_attempts(0);
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_env_key() {
        let spec = ContainerSpec::new("alpine").with_env("A=B", "c");
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_missing_copy_source() {
        let spec = ContainerSpec::new("alpine")
            .with_copy_to_container("/definitely/not/here", "/etc/cassandra");
        let err = spec.validate().expect_err("missing source");
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_validate_rejects_relative_copy_target() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spec = ContainerSpec::new("alpine").with_copy_to_container(dir.path(), "etc");
        assert!(spec.validate().is_err());
    }
}
