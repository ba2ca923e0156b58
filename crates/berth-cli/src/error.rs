//! CLI error types.

use berth_core::{ConfigError, RegistryError, RuntimeError, StartupError};
use thiserror::Error;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Service reference could not be resolved.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Service failed to start.
    #[error(transparent)]
    Startup(#[from] StartupError),

    /// Container runtime unavailable.
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// Output formatting error.
    #[error("format error: {0}")]
    Format(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_error_is_transparent() {
        let err = CliError::from(RegistryError::Unsupported {
            name: "oracle".into(),
        });
        assert_eq!(
            err.to_string(),
            RegistryError::Unsupported { name: "oracle".into() }.to_string()
        );
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed");
        assert!(matches!(CliError::from(io_err), CliError::Io(_)));
    }
}
