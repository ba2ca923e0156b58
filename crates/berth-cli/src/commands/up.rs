//! Start a service, report its coordinates and hold it until shutdown.

use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use berth_core::{
    BerthConfig, LifecycleController, ProviderRegistry, RuntimeGateway, ScriptSource,
    ServiceDefinition,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cli::UpArgs;
use crate::error::CliResult;
use crate::output::{OutputFormat, ServiceStatus};

/// Up command executor.
pub struct UpCommand<'a> {
    registry: &'a ProviderRegistry,
    config: &'a BerthConfig,
}

impl<'a> UpCommand<'a> {
    /// Create an up command.
    #[must_use]
    pub const fn new(registry: &'a ProviderRegistry, config: &'a BerthConfig) -> Self {
        Self { registry, config }
    }

    /// Resolve the service reference and apply configuration and flags.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CliError::Registry`] for unknown or malformed references.
    pub fn prepare(&self, args: &UpArgs) -> CliResult<ServiceDefinition> {
        let definition = self.registry.instantiate(&args.service)?;

        let mut wait = self.config.wait_strategy(definition.wait().condition.clone());
        if let Some(secs) = args.timeout {
            wait = wait.with_timeout(Duration::from_secs(secs));
        }
        let mut definition = definition.with_wait(wait);

        if let Some(name) = &args.init_script {
            definition = definition.with_init_script(ScriptSource::Resource(name.clone()));
        }
        if let Some(attempts) = args.attempts {
            definition = definition.with_startup_attempts(attempts);
        }
        Ok(definition)
    }

    /// Start the service and keep it until `shutdown` resolves.
    ///
    /// `cancel` aborts a startup in progress. The container is stopped and
    /// removed before returning, whatever the outcome of reporting.
    ///
    /// # Errors
    ///
    /// Returns an error if resolution, startup or output fails.
    pub async fn execute<W, F>(
        &self,
        writer: &mut W,
        format: &OutputFormat,
        args: &UpArgs,
        runtime: Arc<dyn RuntimeGateway>,
        cancel: CancellationToken,
        shutdown: F,
    ) -> CliResult<()>
    where
        W: Write,
        F: Future<Output = ()>,
    {
        let definition = self.prepare(args)?;
        info!(service = %args.service, image = %definition.spec().image, "starting service");

        let mut controller = definition
            .launch_with_cancellation(runtime, self.config.controller_settings(), cancel)
            .await?;

        let reported = Self::report(writer, format, definition.name(), &controller);
        if reported.is_ok() {
            shutdown.await;
        }

        info!(service = %args.service, "stopping service");
        controller.stop().await;
        reported
    }

    fn report<W: Write>(
        writer: &mut W,
        format: &OutputFormat,
        name: &str,
        controller: &LifecycleController,
    ) -> CliResult<()> {
        if let Some(status) = ServiceStatus::from_controller(name, controller) {
            format.write(writer, &status)?;
        }
        if !format.is_json() {
            writeln!(writer)?;
            writeln!(writer, "Press Ctrl-C to stop")?;
            writer.flush()?;
        }
        Ok(())
    }
}
