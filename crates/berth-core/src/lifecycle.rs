//! Container lifecycle controller.
//!
//! [`LifecycleController`] drives one container through
//! create → copy files → start → resource map → wait → started hook → ready,
//! retrying runtime-phase failures with fresh containers until the startup
//! attempt budget is spent, and tearing down whatever it still owns.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ContainerId, RuntimeError, StartupError};
use crate::mapper::{ResourceMapper, RuntimeHandle};
use crate::runtime::{RuntimeGateway, RuntimeGatewayExt};
use crate::script::ScriptError;
use crate::spec::ContainerSpec;
use crate::wait::{WaitEngine, WaitError, WaitStrategy};

/// Default time a container gets to stop before it is killed.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Default startup attempt limit.
pub const DEFAULT_STARTUP_ATTEMPTS: u32 = 1;

/// Controller lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Nothing created yet.
    Unstarted,
    /// Validating the spec, creating the container and copying files in.
    Creating,
    /// Starting the container.
    Starting,
    /// Resolving ports and waiting for readiness, then running the hook.
    AwaitingReady,
    /// Handle handed to the caller.
    Ready,
    /// The last attempt failed.
    Failed,
    /// Torn down.
    Stopped,
}

impl LifecycleState {
    /// Get state name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Unstarted => "unstarted",
            Self::Creating => "creating",
            Self::Starting => "starting",
            Self::AwaitingReady => "awaiting_ready",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }

    /// Check whether `next` is a legal successor.
    ///
    /// Progress is monotonic apart from the retry edge `Failed → Creating`.
    /// Any state except `Stopped` may move to `Stopped`.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Unstarted | Self::Failed, Self::Creating)
                | (Self::Creating, Self::Starting)
                | (Self::Starting, Self::AwaitingReady)
                | (Self::AwaitingReady, Self::Ready)
                | (Self::Creating | Self::Starting | Self::AwaitingReady, Self::Failed)
                | (
                    Self::Unstarted
                        | Self::Creating
                        | Self::Starting
                        | Self::AwaitingReady
                        | Self::Ready
                        | Self::Failed,
                    Self::Stopped
                )
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One recorded state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    /// Previous state.
    pub from: LifecycleState,
    /// New state.
    pub to: LifecycleState,
    /// Attempt in progress (0 before the first attempt).
    pub attempt: u32,
}

/// Started-hook errors. Hooks are never retried.
#[derive(Debug, Error)]
pub enum HookError {
    /// An init script failed to load or execute.
    #[error(transparent)]
    Script(#[from] ScriptError),

    /// Any other hook failure.
    #[error("{0}")]
    Failed(String),
}

/// What a started hook gets to work with.
#[derive(Clone)]
pub struct HookContext {
    /// Gateway of the running container.
    pub runtime: Arc<dyn RuntimeGateway>,
    /// Resolved coordinates.
    pub handle: RuntimeHandle,
    /// Controller cancellation token.
    pub cancel: CancellationToken,
}

/// Boxed future returned by started hooks.
pub type HookFuture<'a> = Pin<Box<dyn Future<Output = Result<(), HookError>> + Send + 'a>>;

/// Post-readiness work, run once per successful start.
pub trait StartedHook: Send + Sync {
    /// Run against a ready container.
    fn on_started<'a>(&'a self, ctx: &'a HookContext) -> HookFuture<'a>;
}

/// Hook that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHook;

impl StartedHook for NoopHook {
    fn on_started<'a>(&'a self, _ctx: &'a HookContext) -> HookFuture<'a> {
        Box::pin(async { Ok(()) })
    }
}

/// Runs hooks in order, stopping at the first failure.
#[derive(Default, Clone)]
pub struct HookChain {
    hooks: Vec<Arc<dyn StartedHook>>,
}

impl HookChain {
    /// Create an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a hook.
    #[must_use]
    pub fn then(mut self, hook: Arc<dyn StartedHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Number of hooks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// Check if the chain is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

impl StartedHook for HookChain {
    fn on_started<'a>(&'a self, ctx: &'a HookContext) -> HookFuture<'a> {
        Box::pin(async move {
            for hook in &self.hooks {
                hook.on_started(ctx).await?;
            }
            Ok(())
        })
    }
}

/// Controller-wide defaults, usually derived from configuration.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Attempt limit for specs that leave it unset.
    pub default_attempts: u32,
    /// Grace period passed to the runtime on stop.
    pub stop_timeout: Duration,
    /// Report this host instead of the runtime's.
    pub host_override: Option<String>,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            default_attempts: DEFAULT_STARTUP_ATTEMPTS,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            host_override: None,
        }
    }
}

enum AttemptFailure {
    Retryable(StartupError),
    Fatal(StartupError),
}

/// Drives one container specification to a ready state and back.
pub struct LifecycleController {
    runtime: Arc<dyn RuntimeGateway>,
    spec: ContainerSpec,
    wait: WaitStrategy,
    settings: ControllerSettings,
    cancel: CancellationToken,
    state: LifecycleState,
    transitions: Vec<Transition>,
    attempt: u32,
    container: Option<ContainerId>,
    handle: Option<RuntimeHandle>,
}

impl LifecycleController {
    /// Create a controller with the default wait strategy and settings.
    #[must_use]
    pub fn new(runtime: Arc<dyn RuntimeGateway>, spec: ContainerSpec) -> Self {
        Self {
            runtime,
            spec,
            wait: WaitStrategy::default(),
            settings: ControllerSettings::default(),
            cancel: CancellationToken::new(),
            state: LifecycleState::Unstarted,
            transitions: Vec::new(),
            attempt: 0,
            container: None,
            handle: None,
        }
    }

    /// Set the readiness strategy.
    #[must_use]
    pub fn with_wait(mut self, wait: WaitStrategy) -> Self {
        self.wait = wait;
        self
    }

    /// Set controller defaults.
    #[must_use]
    pub fn with_settings(mut self, settings: ControllerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Abort startup when `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Every state change so far, oldest first.
    #[must_use]
    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// Container specification.
    #[must_use]
    pub fn spec(&self) -> &ContainerSpec {
        &self.spec
    }

    /// Effective startup attempt limit.
    #[must_use]
    pub fn attempt_limit(&self) -> u32 {
        self.spec
            .startup_attempts
            .unwrap_or(self.settings.default_attempts)
            .max(1)
    }

    /// Coordinates of the ready container.
    #[must_use]
    pub fn handle(&self) -> Option<&RuntimeHandle> {
        match self.state {
            LifecycleState::Ready => self.handle.as_ref(),
            _ => None,
        }
    }

    /// Gateway this controller drives.
    #[must_use]
    pub fn runtime(&self) -> &Arc<dyn RuntimeGateway> {
        &self.runtime
    }

    /// Bring the container to `Ready`, then run `hook` once.
    ///
    /// # Errors
    ///
    /// Returns the last concrete [`StartupError`] once the attempt budget is
    /// spent, immediately for hook and spec failures, and
    /// [`StartupError::Cancelled`] when the cancellation token fires.
    pub async fn start(&mut self, hook: &dyn StartedHook) -> Result<RuntimeHandle, StartupError> {
        if self.state != LifecycleState::Unstarted {
            return Err(StartupError::InvalidState { state: self.state });
        }

        let attempts = self.attempt_limit();
        let handle = loop {
            self.attempt += 1;
            let attempt = self.attempt;
            self.transition(LifecycleState::Creating);
            info!(image = %self.spec.image, attempt, attempts, "creating container");

            match self.run_attempt(attempt, attempts).await {
                Ok(handle) => break handle,
                Err(AttemptFailure::Retryable(err)) if attempt < attempts => {
                    warn!(attempt, attempts, error = %err, "startup attempt failed, retrying");
                    self.discard_container().await;
                    self.transition(LifecycleState::Failed);
                }
                Err(AttemptFailure::Retryable(err) | AttemptFailure::Fatal(err)) => {
                    self.discard_container().await;
                    self.transition(LifecycleState::Failed);
                    return Err(err);
                }
            }
        };

        let ctx = HookContext {
            runtime: Arc::clone(&self.runtime),
            handle: handle.clone(),
            cancel: self.cancel.clone(),
        };
        let outcome = tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(StartupError::Cancelled {
                phase: LifecycleState::AwaitingReady,
            }),
            result = hook.on_started(&ctx) => result.map_err(|err| match err {
                HookError::Script(ScriptError::Cancelled) => StartupError::Cancelled {
                    phase: LifecycleState::AwaitingReady,
                },
                other => StartupError::Hook(other),
            }),
        };
        if let Err(err) = outcome {
            warn!(id = %handle.id(), error = %err, "started hook failed");
            self.discard_container().await;
            self.transition(LifecycleState::Failed);
            return Err(err);
        }

        self.handle = Some(handle.clone());
        self.transition(LifecycleState::Ready);
        info!(id = %handle.id(), host = %handle.host(), "container ready");
        Ok(handle)
    }

    /// Stop and remove the container, if any. Idempotent.
    pub async fn stop(&mut self) {
        self.discard_container().await;
        self.handle = None;
        if self.state != LifecycleState::Stopped {
            self.transition(LifecycleState::Stopped);
        }
    }

    async fn run_attempt(
        &mut self,
        attempt: u32,
        attempts: u32,
    ) -> Result<RuntimeHandle, AttemptFailure> {
        if let Err(err) = self.spec.validate() {
            let reason = match err {
                RuntimeError::InvalidSpec(reason) => reason,
                other => other.to_string(),
            };
            return Err(AttemptFailure::Fatal(StartupError::InvalidSpec(reason)));
        }
        self.check_cancelled()?;

        let creation = |source| AttemptFailure::Retryable(StartupError::Creation {
            attempt,
            attempts,
            source,
        });
        let id = self.runtime.create(&self.spec).await.map_err(creation)?;
        self.container = Some(id.clone());
        debug!(id = %id, "container created");

        for copy in &self.spec.copy_files {
            self.runtime
                .copy_file_in(&id, &copy.source, &copy.target)
                .await
                .map_err(creation)?;
            debug!(id = %id, target = %copy.target, "copied resource into container");
        }
        self.check_cancelled()?;

        self.transition(LifecycleState::Starting);
        let start = |source| AttemptFailure::Retryable(StartupError::Start {
            attempt,
            attempts,
            source,
        });
        self.runtime.start(&id).await.map_err(start)?;
        let inspection = self.runtime.inspect(&id).await.map_err(start)?;
        self.check_cancelled()?;

        let mut mapper = ResourceMapper::new();
        if let Some(host) = &self.settings.host_override {
            mapper = mapper.with_host_override(host.clone());
        }
        let handle = mapper
            .resolve(id, &self.spec, &inspection)
            .map_err(|source| {
                AttemptFailure::Retryable(StartupError::PortMapping {
                    attempt,
                    attempts,
                    source,
                })
            })?;

        self.transition(LifecycleState::AwaitingReady);
        let elapsed = WaitEngine::new()
            .with_cancellation(self.cancel.clone())
            .await_ready(&self.runtime, &handle, &self.wait)
            .await
            .map_err(|err| match err {
                WaitError::Cancelled => AttemptFailure::Fatal(StartupError::Cancelled {
                    phase: LifecycleState::AwaitingReady,
                }),
                source => AttemptFailure::Retryable(StartupError::ReadinessTimeout {
                    attempt,
                    attempts,
                    source,
                }),
            })?;
        debug!(id = %handle.id(), elapsed = ?elapsed, "wait condition satisfied");

        Ok(handle)
    }

    fn check_cancelled(&self) -> Result<(), AttemptFailure> {
        if self.cancel.is_cancelled() {
            return Err(AttemptFailure::Fatal(StartupError::Cancelled { phase: self.state }));
        }
        Ok(())
    }

    fn transition(&mut self, to: LifecycleState) {
        let from = self.state;
        debug_assert!(from.can_transition_to(to), "illegal transition {from} -> {to}");
        debug!(from = %from, to = %to, attempt = self.attempt, "lifecycle transition");
        self.transitions.push(Transition {
            from,
            to,
            attempt: self.attempt,
        });
        self.state = to;
    }

    async fn discard_container(&mut self) {
        let Some(id) = self.container.take() else {
            return;
        };
        match self
            .runtime
            .stop_and_remove(&id, self.settings.stop_timeout)
            .await
        {
            Ok(()) => debug!(id = %id, "container removed"),
            Err(e) => warn!(id = %id, error = %e, "container teardown failed"),
        }
    }
}

impl fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleController")
            .field("image", &self.spec.image.to_string())
            .field("state", &self.state)
            .field("attempt", &self.attempt)
            .field("container", &self.container)
            .finish_non_exhaustive()
    }
}

impl Drop for LifecycleController {
    fn drop(&mut self) {
        let Some(id) = self.container.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                let runtime = Arc::clone(&self.runtime);
                let timeout = self.settings.stop_timeout;
                debug!(id = %id, "controller dropped, tearing down container");
                rt.spawn(async move {
                    if let Err(e) = runtime.stop_and_remove(&id, timeout).await {
                        warn!(id = %id, error = %e, "container teardown on drop failed");
                    }
                });
            }
            Err(_) => warn!(id = %id, "controller dropped outside a tokio runtime, container left running"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::HealthStatus;
    use crate::testing::{GatewayCall, ScriptedRuntime};
    use crate::wait::{ProbeContext, WaitCondition};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use test_case::test_case;

    struct FailingHook;

    impl StartedHook for FailingHook {
        fn on_started<'a>(&'a self, _ctx: &'a HookContext) -> HookFuture<'a> {
            Box::pin(async { Err(HookError::Failed("schema missing".to_string())) })
        }
    }

    struct CountingHook(AtomicUsize);

    impl StartedHook for CountingHook {
        fn on_started<'a>(&'a self, ctx: &'a HookContext) -> HookFuture<'a> {
            Box::pin(async move {
                assert!(ctx.handle.mapped_port(9042).is_ok());
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    fn ready_wait() -> WaitStrategy {
        WaitStrategy::new(WaitCondition::probe(|_ctx: ProbeContext| async { true }))
    }

    #[test_case(LifecycleState::Unstarted, LifecycleState::Creating, true)]
    #[test_case(LifecycleState::Creating, LifecycleState::Starting, true)]
    #[test_case(LifecycleState::Starting, LifecycleState::AwaitingReady, true)]
    #[test_case(LifecycleState::AwaitingReady, LifecycleState::Ready, true)]
    #[test_case(LifecycleState::Failed, LifecycleState::Creating, true)]
    #[test_case(LifecycleState::Ready, LifecycleState::Stopped, true)]
    #[test_case(LifecycleState::Ready, LifecycleState::Creating, false)]
    #[test_case(LifecycleState::Starting, LifecycleState::Creating, false)]
    #[test_case(LifecycleState::Stopped, LifecycleState::Stopped, false)]
    #[test_case(LifecycleState::Unstarted, LifecycleState::Ready, false)]
    fn test_transition_table(from: LifecycleState, to: LifecycleState, allowed: bool) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[tokio::test]
    async fn test_start_runs_hook_once_and_reaches_ready() {
        let runtime = Arc::new(ScriptedRuntime::new().with_port_mapping(9042, 54321));
        let spec = ContainerSpec::new("cassandra:3.11.2").with_exposed_port(9042);
        let mut controller = LifecycleController::new(runtime.clone(), spec).with_wait(ready_wait());
        let hook = CountingHook(AtomicUsize::new(0));

        let handle = controller.start(&hook).await.expect("start");

        assert_eq!(handle.mapped_port(9042), Ok(54321));
        assert_eq!(hook.0.load(Ordering::SeqCst), 1);
        assert_eq!(controller.state(), LifecycleState::Ready);
        assert_eq!(controller.handle(), Some(&handle));
        let states: Vec<_> = controller.transitions().iter().map(|t| t.to).collect();
        assert_eq!(
            states,
            [
                LifecycleState::Creating,
                LifecycleState::Starting,
                LifecycleState::AwaitingReady,
                LifecycleState::Ready
            ]
        );
    }

    #[tokio::test]
    async fn test_start_failure_removes_container_and_retries_fresh() {
        let runtime = Arc::new(ScriptedRuntime::new());
        runtime.fail_start(RuntimeError::StartFailed {
            id: "scripted-1".to_string(),
            reason: "port already allocated".to_string(),
        });
        let spec = ContainerSpec::new("alpine").with_startup_attempts(2);
        let mut controller = LifecycleController::new(runtime.clone(), spec).with_wait(ready_wait());

        let handle = controller.start(&NoopHook).await.expect("second attempt");

        let created = runtime.created();
        assert_eq!(created.len(), 2);
        assert_ne!(created[0], created[1]);
        assert_eq!(runtime.removed(), vec![created[0].clone()]);
        assert_eq!(handle.id(), &created[1]);
        assert!(
            controller
                .transitions()
                .iter()
                .any(|t| t.from == LifecycleState::Failed && t.to == LifecycleState::Creating)
        );
    }

    #[tokio::test]
    async fn test_files_copied_before_start_and_copy_failure_retries_fresh() {
        let conf = tempfile::tempdir().expect("tempdir");
        std::fs::write(conf.path().join("cassandra.yaml"), "cluster_name: 'Test Cluster'\n").expect("write");
        let runtime = Arc::new(ScriptedRuntime::new());
        runtime.fail_copy(RuntimeError::CopyFailed {
            id: "scripted-1".to_string(),
            target: "/etc/cassandra".to_string(),
            reason: "archive rejected".to_string(),
        });
        let spec = ContainerSpec::new("cassandra")
            .with_copy_to_container(conf.path(), "/etc/cassandra")
            .with_startup_attempts(2);
        let mut controller = LifecycleController::new(runtime.clone(), spec).with_wait(ready_wait());

        let handle = controller.start(&NoopHook).await.expect("second attempt");

        let created = runtime.created();
        assert_eq!(created.len(), 2);
        let (first, second) = (&created[0], &created[1]);
        assert_eq!(handle.id(), second);

        // The failed container was never started, only torn down.
        assert_eq!(runtime.started(), vec![second.clone()]);
        assert_eq!(runtime.stopped(), vec![first.clone()]);
        assert_eq!(runtime.removed(), vec![first.clone()]);

        assert_eq!(
            runtime.copies(),
            vec![(second.clone(), conf.path().to_path_buf(), "/etc/cassandra".to_string())]
        );
        let calls: Vec<GatewayCall> = runtime
            .journal()
            .into_iter()
            .filter(|(_, id)| id == second)
            .map(|(call, _)| call)
            .collect();
        assert_eq!(calls, [GatewayCall::Create, GatewayCall::Copy, GatewayCall::Start]);

        let created_spec = runtime.spec_of(second).expect("spec recorded");
        assert_eq!(created_spec.copy_files.len(), 1);
        assert_eq!(handle.mounted_paths(), ["/etc/cassandra".to_string()]);
    }

    #[tokio::test]
    async fn test_copy_failure_exhausts_budget_as_creation_error() {
        let conf = tempfile::tempdir().expect("tempdir");
        let runtime = Arc::new(ScriptedRuntime::new());
        runtime.fail_copy(RuntimeError::CopyFailed {
            id: "scripted-1".to_string(),
            target: "/etc/cassandra".to_string(),
            reason: "no space left on device".to_string(),
        });
        let spec = ContainerSpec::new("cassandra").with_copy_to_container(conf.path(), "/etc/cassandra");
        let mut controller = LifecycleController::new(runtime.clone(), spec).with_wait(ready_wait());

        let err = controller.start(&NoopHook).await.expect_err("single attempt");

        assert!(matches!(
            err,
            StartupError::Creation {
                attempt: 1,
                attempts: 1,
                source: RuntimeError::CopyFailed { .. }
            }
        ));
        assert_eq!(err.phase(), LifecycleState::Creating);
        assert!(runtime.started().is_empty());
        assert!(runtime.live().is_empty());
        assert_eq!(controller.state(), LifecycleState::Failed);
    }

    #[tokio::test]
    async fn test_port_mapping_failure_consumes_attempt() {
        let runtime = Arc::new(ScriptedRuntime::new());
        runtime.withhold_ports(1);
        let spec = ContainerSpec::new("alpine").with_exposed_port(8080);
        let mut controller = LifecycleController::new(runtime.clone(), spec).with_wait(ready_wait());

        let err = controller.start(&NoopHook).await.expect_err("single attempt");
        assert!(matches!(err, StartupError::PortMapping { attempt: 1, attempts: 1, .. }));
        assert_eq!(controller.state(), LifecycleState::Failed);
        assert!(runtime.live().is_empty());
    }

    #[tokio::test]
    async fn test_hook_failure_is_not_retried() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let spec = ContainerSpec::new("alpine").with_startup_attempts(3);
        let mut controller = LifecycleController::new(runtime.clone(), spec).with_wait(ready_wait());

        let err = controller.start(&FailingHook).await.expect_err("hook fails");
        assert!(matches!(err, StartupError::Hook(HookError::Failed(_))));
        assert!(!err.is_environmental());
        assert_eq!(runtime.create_calls(), 1);
        assert!(runtime.live().is_empty());
    }

    #[tokio::test]
    async fn test_second_start_is_invalid_state() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let mut controller =
            LifecycleController::new(runtime, ContainerSpec::new("alpine")).with_wait(ready_wait());
        controller.start(&NoopHook).await.expect("start");

        let err = controller.start(&NoopHook).await.expect_err("already ready");
        assert!(matches!(
            err,
            StartupError::InvalidState {
                state: LifecycleState::Ready
            }
        ));
    }

    #[tokio::test]
    async fn test_invalid_spec_creates_nothing() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let spec = ContainerSpec::new("alpine").with_exposed_port(0);
        let mut controller = LifecycleController::new(runtime.clone(), spec).with_settings(ControllerSettings {
            default_attempts: 5,
            ..Default::default()
        });

        let err = controller.start(&NoopHook).await.expect_err("port 0");
        assert!(matches!(err, StartupError::InvalidSpec(_)));
        assert_eq!(runtime.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let mut controller =
            LifecycleController::new(runtime.clone(), ContainerSpec::new("alpine")).with_wait(ready_wait());
        let handle = controller.start(&NoopHook).await.expect("start");

        controller.stop().await;
        controller.stop().await;

        assert_eq!(controller.state(), LifecycleState::Stopped);
        assert_eq!(controller.handle(), None);
        assert_eq!(runtime.removed(), vec![handle.id().clone()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_tears_down_in_flight_container() {
        let runtime = Arc::new(ScriptedRuntime::new().with_health(HealthStatus::Starting));
        let token = CancellationToken::new();
        let mut controller = LifecycleController::new(runtime.clone(), ContainerSpec::new("alpine"))
            .with_wait(WaitStrategy::new(WaitCondition::Healthy).with_timeout(Duration::from_secs(600)))
            .with_cancellation(token.clone());

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let err = controller.start(&NoopHook).await.expect_err("cancelled");
        assert!(matches!(
            err,
            StartupError::Cancelled {
                phase: LifecycleState::AwaitingReady
            }
        ));
        assert_eq!(runtime.create_calls(), 1);
        assert!(runtime.live().is_empty());
    }

    #[tokio::test]
    async fn test_drop_tears_down_ready_container() {
        let runtime = Arc::new(ScriptedRuntime::new());
        {
            let mut controller =
                LifecycleController::new(runtime.clone(), ContainerSpec::new("alpine")).with_wait(ready_wait());
            controller.start(&NoopHook).await.expect("start");
        }
        for _ in 0..10 {
            if runtime.live().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(runtime.live().is_empty());
    }

    #[tokio::test]
    async fn test_hook_chain_stops_at_first_failure() {
        let runtime = Arc::new(ScriptedRuntime::new().with_port_mapping(9042, 1));
        let counting = Arc::new(CountingHook(AtomicUsize::new(0)));
        let chain = HookChain::new()
            .then(counting.clone())
            .then(Arc::new(FailingHook))
            .then(counting.clone());
        let spec = ContainerSpec::new("cassandra").with_exposed_port(9042);
        let mut controller = LifecycleController::new(runtime, spec).with_wait(ready_wait());

        assert!(controller.start(&chain).await.is_err());
        assert_eq!(counting.0.load(Ordering::SeqCst), 1);
    }
}
