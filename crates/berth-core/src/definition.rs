//! Fully specified services, ready to launch.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::StartupError;
use crate::lifecycle::{ControllerSettings, HookChain, LifecycleController, StartedHook};
use crate::runtime::RuntimeGateway;
use crate::script::{DelegateFactory, InitScriptHook, ResourceResolver, ScriptSource};
use crate::spec::ContainerSpec;
use crate::wait::WaitStrategy;

/// Container spec, readiness strategy and started hooks for one service.
#[derive(Clone)]
pub struct ServiceDefinition {
    name: String,
    spec: ContainerSpec,
    wait: WaitStrategy,
    hooks: HookChain,
    delegates: Option<Arc<dyn DelegateFactory>>,
    init_script: Option<ScriptSource>,
    resolver: ResourceResolver,
}

impl ServiceDefinition {
    /// Create a definition waiting on all declared ports.
    pub fn new(name: impl Into<String>, spec: ContainerSpec) -> Self {
        Self {
            name: name.into(),
            spec,
            wait: WaitStrategy::default(),
            hooks: HookChain::new(),
            delegates: None,
            init_script: None,
            resolver: ResourceResolver::default(),
        }
    }

    /// Set the readiness strategy.
    #[must_use]
    pub fn with_wait(mut self, wait: WaitStrategy) -> Self {
        self.wait = wait;
        self
    }

    /// Override only the readiness timeout.
    #[must_use]
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait.timeout = timeout;
        self
    }

    /// Set how init script statements reach the service.
    #[must_use]
    pub fn with_delegate_factory(mut self, factory: Arc<dyn DelegateFactory>) -> Self {
        self.delegates = Some(factory);
        self
    }

    /// Run `source` once the container is ready.
    #[must_use]
    pub fn with_init_script(mut self, source: ScriptSource) -> Self {
        self.init_script = Some(source);
        self
    }

    /// Resolve resource names against `resolver`.
    #[must_use]
    pub fn with_resolver(mut self, resolver: ResourceResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Run an extra hook after readiness (before the init script).
    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn StartedHook>) -> Self {
        self.hooks = self.hooks.then(hook);
        self
    }

    /// Set the startup attempt limit.
    #[must_use]
    pub fn with_startup_attempts(mut self, attempts: u32) -> Self {
        self.spec.startup_attempts = Some(attempts);
        self
    }

    /// Logical service name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Container specification.
    #[must_use]
    pub fn spec(&self) -> &ContainerSpec {
        &self.spec
    }

    /// Readiness strategy.
    #[must_use]
    pub fn wait(&self) -> &WaitStrategy {
        &self.wait
    }

    /// Configured init script.
    #[must_use]
    pub fn init_script(&self) -> Option<&ScriptSource> {
        self.init_script.as_ref()
    }

    /// Combined started hook: extra hooks, then the init script.
    ///
    /// # Errors
    ///
    /// Returns [`StartupError::InvalidSpec`] when an init script is set but
    /// the service has no statement delegate.
    pub fn started_hook(&self) -> Result<HookChain, StartupError> {
        let mut chain = self.hooks.clone();
        if let Some(source) = &self.init_script {
            let Some(delegates) = &self.delegates else {
                return Err(StartupError::InvalidSpec(format!(
                    "service {} cannot run init scripts",
                    self.name
                )));
            };
            let hook = InitScriptHook::new(source.clone(), Arc::clone(delegates))
                .with_resolver(self.resolver.clone());
            chain = chain.then(Arc::new(hook));
        }
        Ok(chain)
    }

    /// Build an unstarted controller for this service.
    #[must_use]
    pub fn controller(
        &self,
        runtime: Arc<dyn RuntimeGateway>,
        settings: ControllerSettings,
    ) -> LifecycleController {
        LifecycleController::new(runtime, self.spec.clone())
            .with_wait(self.wait.clone())
            .with_settings(settings)
    }

    /// Start the service and return its ready controller.
    ///
    /// # Errors
    ///
    /// Returns the controller's [`StartupError`].
    pub async fn launch(
        &self,
        runtime: Arc<dyn RuntimeGateway>,
        settings: ControllerSettings,
    ) -> Result<LifecycleController, StartupError> {
        self.launch_with_cancellation(runtime, settings, CancellationToken::new())
            .await
    }

    /// Like [`launch`](Self::launch), aborting when `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns the controller's [`StartupError`].
    pub async fn launch_with_cancellation(
        &self,
        runtime: Arc<dyn RuntimeGateway>,
        settings: ControllerSettings,
        cancel: CancellationToken,
    ) -> Result<LifecycleController, StartupError> {
        let hook = self.started_hook()?;
        let mut controller = self.controller(runtime, settings).with_cancellation(cancel);
        let handle = controller.start(&hook).await?;
        info!(service = %self.name, id = %handle.id(), "service launched");
        Ok(controller)
    }
}

impl std::fmt::Debug for ServiceDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceDefinition")
            .field("name", &self.name)
            .field("spec", &self.spec)
            .field("wait", &self.wait)
            .field("init_script", &self.init_script)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{HookContext, LifecycleState};
    use crate::script::{ScriptError, StatementDelegate};
    use crate::testing::{RecordingDelegate, ScriptedRuntime};
    use crate::wait::{ProbeContext, WaitCondition};

    struct FailingSecond;

    impl DelegateFactory for FailingSecond {
        fn delegate(&self, _ctx: &HookContext) -> Box<dyn StatementDelegate> {
            Box::new(RecordingDelegate::new().fail_at(2, "unknown keyspace"))
        }
    }

    fn definition() -> ServiceDefinition {
        ServiceDefinition::new("svc", ContainerSpec::new("svc:1.0"))
            .with_wait(WaitStrategy::new(WaitCondition::probe(|_ctx: ProbeContext| async { true })))
    }

    #[tokio::test]
    async fn test_launch_returns_ready_controller() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let mut controller = definition()
            .launch(runtime.clone(), ControllerSettings::default())
            .await
            .expect("launch");
        assert_eq!(controller.state(), LifecycleState::Ready);
        controller.stop().await;
        assert!(runtime.live().is_empty());
    }

    #[tokio::test]
    async fn test_init_script_without_delegate_is_rejected() {
        let def = definition().with_init_script(ScriptSource::Inline {
            name: "init".to_string(),
            content: "SELECT 1;".to_string(),
        });
        let runtime = Arc::new(ScriptedRuntime::new());
        let err = def
            .launch(runtime.clone(), ControllerSettings::default())
            .await
            .expect_err("no delegate");
        assert!(matches!(err, StartupError::InvalidSpec(_)));
        assert_eq!(runtime.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_init_script_failure_surfaces_position() {
        let def = definition()
            .with_startup_attempts(3)
            .with_delegate_factory(Arc::new(FailingSecond))
            .with_init_script(ScriptSource::Inline {
                name: "init".to_string(),
                content: "SELECT 1; SELECT nope; SELECT 3;".to_string(),
            });
        let runtime = Arc::new(ScriptedRuntime::new());
        let err = def
            .launch(runtime.clone(), ControllerSettings::default())
            .await
            .expect_err("second statement fails");

        match err {
            StartupError::Hook(crate::lifecycle::HookError::Script(ScriptError::Execution { position, .. })) => {
                assert_eq!(position, 2);
            }
            other => panic!("expected script failure, got {other:?}"),
        }
        assert_eq!(runtime.create_calls(), 1);
        assert!(runtime.live().is_empty());
    }
}
