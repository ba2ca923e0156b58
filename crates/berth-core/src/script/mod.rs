//! Initialization scripts.
//!
//! An [`InitScript`] is loaded from a [`ScriptSource`], split into
//! statements and executed in order by a [`ScriptExecutor`] through a
//! [`StatementDelegate`]. Load failures and execution failures are distinct
//! [`ScriptError`] variants; neither is ever retried.

mod executor;
mod source;
mod splitter;

pub use executor::{
    DelegateError, DelegateFactory, DelegateFuture, InitScriptHook, ScriptExecutor,
    StatementDelegate,
};
pub use source::{ResourceResolver, ScriptSource};
pub use splitter::split_statements;

use thiserror::Error;

/// Script errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    /// The script could not be resolved or read.
    #[error("could not load init script {source_name}: {reason}")]
    Load {
        /// Logical script name.
        source_name: String,
        /// Failure reason.
        reason: String,
    },

    /// A statement was rejected.
    #[error("init script {source_name} failed at statement {position} `{statement}`: {reason}")]
    Execution {
        /// Logical script name.
        source_name: String,
        /// 1-based statement position.
        position: usize,
        /// Statement text after splitting.
        statement: String,
        /// Delegate failure reason.
        reason: String,
    },

    /// Execution was cancelled.
    #[error("init script execution cancelled")]
    Cancelled,
}

/// Result type for script operations.
pub type ScriptResult<T> = std::result::Result<T, ScriptError>;

/// Raw script text plus its logical name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitScript {
    name: String,
    content: String,
}

impl InitScript {
    /// Wrap in-memory script text.
    pub fn from_text(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    /// Load a script.
    ///
    /// # Errors
    ///
    /// Returns [`ScriptError::Load`] when the source does not resolve or
    /// cannot be read.
    pub fn load(source: &ScriptSource, resolver: &ResourceResolver) -> ScriptResult<Self> {
        let load_error = |reason: String| ScriptError::Load {
            source_name: source.name(),
            reason,
        };

        let path = match source {
            ScriptSource::Inline { name, content } => {
                return Ok(Self::from_text(name.clone(), content.clone()));
            }
            ScriptSource::Path(path) => path.clone(),
            ScriptSource::Resource(name) => resolver.resolve(name).ok_or_else(|| {
                load_error(format!("not found in resource roots {:?}", resolver.roots()))
            })?,
        };

        let content = std::fs::read_to_string(&path)
            .map_err(|e| load_error(format!("{}: {e}", path.display())))?;
        Ok(Self::from_text(source.name(), content))
    }

    /// Logical name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw text.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Ordered statements.
    #[must_use]
    pub fn statements(&self) -> Vec<String> {
        split_statements(&self.content)
    }
}
