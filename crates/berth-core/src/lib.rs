//! # berth-core
//!
//! Lifecycle engine for disposable service containers used as test fixtures.
//!
//! A container goes from a declarative [`ContainerSpec`] to a verified-ready
//! [`RuntimeHandle`], runs optional initialization work, and is torn down
//! deterministically, tolerating slow or flaky startup along the way.
//!
//! ## Features
//!
//! - `docker` (default) - Docker runtime gateway via bollard
//! - `testing` - [`testing::ScriptedRuntime`], a scriptable in-memory gateway
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use berth_core::{ContainerSpec, DockerRuntime, LifecycleController, NoopHook, WaitCondition, WaitStrategy};
//!
//! let runtime = Arc::new(DockerRuntime::connect()?);
//! let spec = ContainerSpec::new("redis:7").with_exposed_port(6379);
//! let mut controller = LifecycleController::new(runtime, spec)
//!     .with_wait(WaitStrategy::new(WaitCondition::all_ports()));
//! let handle = controller.start(&NoopHook).await?;
//! println!("redis at {}", handle.endpoint(6379)?);
//! controller.stop().await;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ProviderRegistry ──► ServiceDefinition ──► LifecycleController
//!                                              │
//!            ┌─────────────────┬───────────────┼──────────────────┐
//!            ▼                 ▼               ▼                  ▼
//!     RuntimeGateway     ResourceMapper    WaitEngine       StartedHook
//!   (Docker, Scripted)   (RuntimeHandle)  (WaitStrategy)  (InitScriptHook)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod definition;
#[cfg(feature = "docker")]
pub mod docker;
pub mod error;
pub mod lifecycle;
pub mod mapper;
pub mod registry;
pub mod runtime;
pub mod script;
pub mod spec;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod wait;

pub use config::{BerthConfig, ConfigError};
pub use definition::ServiceDefinition;
#[cfg(feature = "docker")]
pub use docker::DockerRuntime;
pub use error::{ContainerId, RuntimeError, RuntimeResult, StartupError};
pub use lifecycle::{
    ControllerSettings, HookChain, HookContext, HookError, HookFuture, LifecycleController,
    LifecycleState, NoopHook, StartedHook, Transition,
};
pub use mapper::{PortError, ResourceMapper, RuntimeHandle};
pub use registry::{ProviderFactory, ProviderRegistry, ProviderRegistryBuilder, RegistryError};
pub use runtime::{
    ContainerInspection, ContainerState, ExecResult, GatewayFuture, HealthStatus, PortBinding,
    RuntimeGateway, RuntimeGatewayExt,
};
pub use script::{
    DelegateError, DelegateFactory, DelegateFuture, InitScript, InitScriptHook, ResourceResolver,
    ScriptError, ScriptExecutor, ScriptSource, StatementDelegate,
};
pub use spec::{ContainerSpec, CopyToContainer, HealthCheck, ImageRef, MountType, VolumeMount};
pub use wait::{
    LogMatcher, ProbeContext, ReadinessProbe, WaitCondition, WaitEngine, WaitError, WaitStrategy,
};
