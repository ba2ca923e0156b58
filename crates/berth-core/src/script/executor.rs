//! Statement execution against a protocol-agnostic delegate.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::source::{ResourceResolver, ScriptSource};
use super::{InitScript, ScriptError};
use crate::lifecycle::{HookContext, HookError, HookFuture, StartedHook};

/// A statement rejected by the service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct DelegateError(pub String);

impl DelegateError {
    /// Create a delegate error.
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Boxed future returned by statement delegates.
pub type DelegateFuture<'a> = Pin<Box<dyn Future<Output = Result<(), DelegateError>> + Send + 'a>>;

/// Runs one statement against the service, whatever its wire protocol.
pub trait StatementDelegate: Send + Sync {
    /// Execute a single statement.
    fn execute<'a>(&'a self, statement: &'a str) -> DelegateFuture<'a>;
}

/// Builds a statement delegate for a started container.
pub trait DelegateFactory: Send + Sync {
    /// Delegate bound to the container in `ctx`.
    fn delegate(&self, ctx: &HookContext) -> Box<dyn StatementDelegate>;
}

/// Executes scripts statement by statement.
#[derive(Debug, Clone, Default)]
pub struct ScriptExecutor {
    cancel: CancellationToken,
}

impl ScriptExecutor {
    /// Create an executor that is never cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop between statements once `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Run every statement of `script` in order. Returns the number executed.
    ///
    /// # Errors
    ///
    /// Returns [`ScriptError::Execution`] for the first rejected statement;
    /// later statements never run. Returns [`ScriptError::Cancelled`] if
    /// the token fires.
    pub async fn run(
        &self,
        delegate: &dyn StatementDelegate,
        script: &InitScript,
    ) -> Result<usize, ScriptError> {
        let statements = script.statements();
        info!(script = %script.name(), statements = statements.len(), "executing init script");

        for (index, statement) in statements.iter().enumerate() {
            let position = index + 1;
            debug!(script = %script.name(), position, statement = %statement, "executing statement");

            let outcome = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(ScriptError::Cancelled),
                outcome = delegate.execute(statement) => outcome,
            };
            if let Err(e) = outcome {
                return Err(ScriptError::Execution {
                    source_name: script.name().to_string(),
                    position,
                    statement: statement.clone(),
                    reason: e.0,
                });
            }
        }

        info!(script = %script.name(), "init script executed");
        Ok(statements.len())
    }
}

/// Started hook that loads a script and runs it through a delegate.
#[derive(Clone)]
pub struct InitScriptHook {
    source: ScriptSource,
    resolver: ResourceResolver,
    delegates: Arc<dyn DelegateFactory>,
}

impl InitScriptHook {
    /// Create a hook running `source` through delegates built by `delegates`.
    #[must_use]
    pub fn new(source: ScriptSource, delegates: Arc<dyn DelegateFactory>) -> Self {
        Self {
            source,
            resolver: ResourceResolver::default(),
            delegates,
        }
    }

    /// Resolve resource names against `resolver`.
    #[must_use]
    pub fn with_resolver(mut self, resolver: ResourceResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Script source.
    #[must_use]
    pub fn source(&self) -> &ScriptSource {
        &self.source
    }
}

impl StartedHook for InitScriptHook {
    fn on_started<'a>(&'a self, ctx: &'a HookContext) -> HookFuture<'a> {
        Box::pin(async move {
            let script = InitScript::load(&self.source, &self.resolver)?;
            let delegate = self.delegates.delegate(ctx);
            ScriptExecutor::new()
                .with_cancellation(ctx.cancel.clone())
                .run(delegate.as_ref(), &script)
                .await
                .map_err(HookError::from)?;
            Ok(())
        })
    }
}

impl std::fmt::Debug for InitScriptHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitScriptHook")
            .field("source", &self.source)
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}
