//! Runtime gateway trait definition.
//!
//! The lifecycle engine never talks to a container daemon directly; every
//! side effect goes through [`RuntimeGateway`].

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ContainerId, RuntimeResult};
use crate::spec::ContainerSpec;

/// Container state as reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ContainerState {
    /// Container has been created but not started.
    Created,

    /// Container is restarting.
    Restarting,

    /// Container is running.
    Running,

    /// Container is paused.
    Paused,

    /// Container is being removed.
    Removing,

    /// Container has exited.
    Exited,

    /// Container is dead.
    Dead,

    /// Container state is unknown.
    #[default]
    Unknown,
}

impl ContainerState {
    /// Check if container is terminal (won't change without intervention).
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Exited | Self::Dead | Self::Removing)
    }

    /// Get state name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Restarting => "restarting",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Removing => "removing",
            Self::Exited => "exited",
            Self::Dead => "dead",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Container health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum HealthStatus {
    /// No health check configured.
    #[default]
    None,

    /// Health check is starting up.
    Starting,

    /// Container is healthy.
    Healthy,

    /// Container is unhealthy.
    Unhealthy,
}

impl HealthStatus {
    /// Get status name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Starting => "starting",
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Port binding information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    /// Container port.
    pub container_port: u16,

    /// Protocol (tcp/udp).
    pub protocol: String,

    /// Host IP the port is bound to.
    pub host_ip: Option<String>,

    /// Host port.
    pub host_port: Option<u16>,
}

impl PortBinding {
    /// Create a TCP binding.
    #[must_use]
    pub fn tcp(container_port: u16, host_port: u16) -> Self {
        Self {
            container_port,
            protocol: "tcp".to_string(),
            host_ip: Some("0.0.0.0".to_string()),
            host_port: Some(host_port),
        }
    }
}

/// Post-start container metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerInspection {
    /// Container ID.
    pub id: String,

    /// Runtime state.
    pub state: ContainerState,

    /// Health status.
    pub health: HealthStatus,

    /// Exit code, once exited.
    pub exit_code: Option<i64>,

    /// Address at which published ports are reachable from the caller.
    pub host: Option<String>,

    /// Published port bindings.
    pub ports: Vec<PortBinding>,
}

/// Exec result.
#[derive(Debug, Clone, Default)]
pub struct ExecResult {
    /// Exit code.
    pub exit_code: i64,

    /// Stdout output.
    pub stdout: Vec<u8>,

    /// Stderr output.
    pub stderr: Vec<u8>,
}

impl ExecResult {
    /// Check if command succeeded.
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Get stdout as string.
    #[must_use]
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// Get stderr as string.
    #[must_use]
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }
}

/// Boxed future returned by gateway operations.
pub type GatewayFuture<'a, T> = Pin<Box<dyn Future<Output = RuntimeResult<T>> + Send + 'a>>;

/// Abstraction over a container runtime (Docker, or a scripted test double).
pub trait RuntimeGateway: Send + Sync {
    /// Create a container from a spec. Does not start it.
    ///
    /// # Errors
    ///
    /// Returns error if container creation fails.
    fn create<'a>(&'a self, spec: &'a ContainerSpec) -> GatewayFuture<'a, ContainerId>;

    /// Start a created container.
    ///
    /// # Errors
    ///
    /// Returns error if container start fails.
    fn start<'a>(&'a self, id: &'a ContainerId) -> GatewayFuture<'a, ()>;

    /// Stop a container, killing it after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns error if container stop fails.
    fn stop<'a>(&'a self, id: &'a ContainerId, timeout: Duration) -> GatewayFuture<'a, ()>;

    /// Forcefully remove a container and its anonymous volumes.
    ///
    /// # Errors
    ///
    /// Returns error if container removal fails.
    fn remove<'a>(&'a self, id: &'a ContainerId) -> GatewayFuture<'a, ()>;

    /// Inspect state, health and published ports.
    ///
    /// # Errors
    ///
    /// Returns error if inspection fails.
    fn inspect<'a>(&'a self, id: &'a ContainerId) -> GatewayFuture<'a, ContainerInspection>;

    /// Fetch accumulated stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns error if log retrieval fails.
    fn logs<'a>(&'a self, id: &'a ContainerId) -> GatewayFuture<'a, Vec<u8>>;

    /// Copy a host file or directory to `target` inside the container.
    ///
    /// # Errors
    ///
    /// Returns error if the source cannot be read or the upload fails.
    fn copy_file_in<'a>(
        &'a self,
        id: &'a ContainerId,
        source: &'a Path,
        target: &'a str,
    ) -> GatewayFuture<'a, ()>;

    /// Execute a command in a running container.
    ///
    /// # Errors
    ///
    /// Returns error if exec fails. A non-zero exit code is not an error.
    fn exec<'a>(&'a self, id: &'a ContainerId, cmd: &'a [String]) -> GatewayFuture<'a, ExecResult>;
}

/// Extension trait for convenient container operations.
pub trait RuntimeGatewayExt: RuntimeGateway {
    /// Stop and remove a container.
    ///
    /// # Errors
    ///
    /// Returns the remove error; a failed stop is ignored since remove is forced.
    fn stop_and_remove<'a>(
        &'a self,
        id: &'a ContainerId,
        timeout: Duration,
    ) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            if let Err(e) = self.stop(id, timeout).await {
                tracing::debug!(id = %id, error = %e, "stop before remove failed");
            }
            self.remove(id).await
        })
    }
}

impl<T: RuntimeGateway + ?Sized> RuntimeGatewayExt for T {}
