//! Runtime gateway and startup error types.

use std::fmt;
use thiserror::Error;

use crate::lifecycle::{HookError, LifecycleState};
use crate::mapper::PortError;
use crate::wait::WaitError;

/// Errors reported by a runtime gateway.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Failed to connect to the container daemon.
    #[error("failed to connect to container daemon: {0}")]
    ConnectionFailed(String),

    /// Container not found.
    #[error("container not found: {id}")]
    NotFound {
        /// Container ID.
        id: String,
    },

    /// Image not found and could not be pulled.
    #[error("image not found: {image}")]
    ImageNotFound {
        /// Image reference.
        image: String,
    },

    /// Container creation failed.
    #[error("container creation failed: {0}")]
    CreateFailed(String),

    /// Container start failed.
    #[error("container start failed: {id}: {reason}")]
    StartFailed {
        /// Container ID.
        id: String,
        /// Failure reason.
        reason: String,
    },

    /// Container stop failed.
    #[error("container stop failed: {id}: {reason}")]
    StopFailed {
        /// Container ID.
        id: String,
        /// Failure reason.
        reason: String,
    },

    /// Container remove failed.
    #[error("container remove failed: {id}: {reason}")]
    RemoveFailed {
        /// Container ID.
        id: String,
        /// Failure reason.
        reason: String,
    },

    /// Copying a host resource into the container failed.
    #[error("copy into container failed: {id}: {target}: {reason}")]
    CopyFailed {
        /// Container ID.
        id: String,
        /// Destination path inside the container.
        target: String,
        /// Failure reason.
        reason: String,
    },

    /// Running a command inside the container failed.
    #[error("exec failed: {id}: {reason}")]
    ExecFailed {
        /// Container ID.
        id: String,
        /// Failure reason.
        reason: String,
    },

    /// Invalid container spec.
    #[error("invalid container spec: {0}")]
    InvalidSpec(String),

    /// Internal runtime error.
    #[error("internal runtime error: {0}")]
    Internal(String),
}

/// Result type for runtime gateway operations.
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

/// Container ID wrapper for type safety.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerId(String);

impl ContainerId {
    /// Create a new container ID from a string.
    ///
    /// # Errors
    ///
    /// Returns error if ID is empty or contains invalid characters.
    pub fn new(id: impl Into<String>) -> RuntimeResult<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(RuntimeError::InvalidSpec(
                "container ID cannot be empty".to_string(),
            ));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
        {
            return Err(RuntimeError::InvalidSpec(format!(
                "invalid container ID: {id}"
            )));
        }
        Ok(Self(id))
    }

    /// Create a container ID without validation (for IDs reported by the daemon).
    #[must_use]
    pub fn new_unchecked(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the short form (first 12 chars) of the container ID.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short())
    }
}

impl AsRef<str> for ContainerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A single typed failure of [`LifecycleController::start`](crate::LifecycleController::start).
///
/// Runtime-phase variants carry the attempt that produced the error and the
/// configured attempt limit, so callers can tell an environmental failure
/// (timeouts, daemon hiccups) from a configuration defect (bad script,
/// bad image reference).
#[derive(Debug, Error)]
pub enum StartupError {
    /// The spec failed validation before any container was created.
    #[error("invalid container spec: {0}")]
    InvalidSpec(String),

    /// `start` was called on a controller that already left `Unstarted`.
    #[error("cannot start a controller in {state} state")]
    InvalidState {
        /// Current controller state.
        state: LifecycleState,
    },

    /// The runtime could not instantiate the container.
    #[error("container creation failed on attempt {attempt}/{attempts}: {source}")]
    Creation {
        /// Attempt that produced this error (1-based).
        attempt: u32,
        /// Configured attempt limit.
        attempts: u32,
        /// Underlying gateway error.
        #[source]
        source: RuntimeError,
    },

    /// The runtime could not start the container.
    #[error("container start failed on attempt {attempt}/{attempts}: {source}")]
    Start {
        /// Attempt that produced this error (1-based).
        attempt: u32,
        /// Configured attempt limit.
        attempts: u32,
        /// Underlying gateway error.
        #[source]
        source: RuntimeError,
    },

    /// A declared port did not resolve to a host mapping.
    #[error("port mapping failed on attempt {attempt}/{attempts}: {source}")]
    PortMapping {
        /// Attempt that produced this error (1-based).
        attempt: u32,
        /// Configured attempt limit.
        attempts: u32,
        /// Unresolved port.
        #[source]
        source: PortError,
    },

    /// The wait condition never held within its budget.
    #[error("container not ready on attempt {attempt}/{attempts}: {source}")]
    ReadinessTimeout {
        /// Attempt that produced this error (1-based).
        attempt: u32,
        /// Configured attempt limit.
        attempts: u32,
        /// Timeout details, including the last observed state.
        #[source]
        source: WaitError,
    },

    /// The started hook failed. Never retried.
    #[error("started hook failed: {0}")]
    Hook(#[from] HookError),

    /// Startup was cancelled through the controller's cancellation token.
    #[error("startup cancelled while {phase}")]
    Cancelled {
        /// Phase that was interrupted.
        phase: LifecycleState,
    },
}

impl StartupError {
    /// The attempt that produced this error, for runtime-phase failures.
    #[must_use]
    pub const fn attempt(&self) -> Option<u32> {
        match self {
            Self::Creation { attempt, .. }
            | Self::Start { attempt, .. }
            | Self::PortMapping { attempt, .. }
            | Self::ReadinessTimeout { attempt, .. } => Some(*attempt),
            _ => None,
        }
    }

    /// The lifecycle phase the failure belongs to.
    #[must_use]
    pub const fn phase(&self) -> LifecycleState {
        match self {
            Self::InvalidSpec(_) | Self::InvalidState { .. } | Self::Creation { .. } => {
                LifecycleState::Creating
            }
            Self::Start { .. } => LifecycleState::Starting,
            Self::PortMapping { .. } | Self::ReadinessTimeout { .. } | Self::Hook(_) => {
                LifecycleState::AwaitingReady
            }
            Self::Cancelled { phase } => *phase,
        }
    }

    /// Whether the failure points at the environment rather than the configuration.
    #[must_use]
    pub const fn is_environmental(&self) -> bool {
        matches!(
            self,
            Self::Creation { .. }
                | Self::Start { .. }
                | Self::PortMapping { .. }
                | Self::ReadinessTimeout { .. }
                | Self::Cancelled { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_id_valid_hex() {
        let id = ContainerId::new("abc123def456").expect("valid hex ID");
        assert_eq!(id.as_str(), "abc123def456");
        assert_eq!(id.short(), "abc123def456");
    }

    #[test]
    fn test_container_id_short_form() {
        let id = ContainerId::new("abc123def456789012345678").expect("valid long hex ID");
        assert_eq!(id.short(), "abc123def456");
        assert_eq!(format!("{id}"), "abc123def456");
    }

    #[test]
    fn test_container_id_rejects_empty_and_spaces() {
        assert!(ContainerId::new("").is_err());
        assert!(ContainerId::new("my container!").is_err());
    }

    #[test]
    fn test_startup_error_carries_attempt_context() {
        let err = StartupError::Creation {
            attempt: 2,
            attempts: 2,
            source: RuntimeError::ImageNotFound {
                image: "cassandra:0.0".to_string(),
            },
        };
        assert_eq!(err.attempt(), Some(2));
        assert_eq!(err.phase(), LifecycleState::Creating);
        assert!(err.is_environmental());
        let msg = err.to_string();
        assert!(msg.contains("2/2"));
        assert!(msg.contains("cassandra:0.0"));
    }

    #[test]
    fn test_invalid_spec_is_configurational() {
        let err = StartupError::InvalidSpec("image cannot be empty".to_string());
        assert_eq!(err.attempt(), None);
        assert!(!err.is_environmental());
    }
}
