//! Scriptable in-memory runtime gateway for tests.
//!
//! [`ScriptedRuntime`] records every call and lets a test queue failures,
//! pin port mappings, feed log output and answer exec requests without a
//! container daemon. [`RecordingDelegate`] stands in for a service client
//! when running init scripts.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::{ContainerId, RuntimeError};
use crate::runtime::{
    ContainerInspection, ContainerState, ExecResult, GatewayFuture, HealthStatus, PortBinding,
    RuntimeGateway,
};
use crate::script::{DelegateError, DelegateFuture, StatementDelegate};
use crate::spec::ContainerSpec;

/// First host port handed out for ports without a pinned mapping.
pub const AUTO_PORT_BASE: u16 = 49_152;

type ExecHandler = Box<dyn Fn(&ContainerId, &[String]) -> ExecResult + Send + Sync>;

#[derive(Debug, Clone)]
struct Container {
    spec: ContainerSpec,
    state: ContainerState,
    exit_code: Option<i64>,
    bindings: Vec<PortBinding>,
}

#[derive(Default)]
struct State {
    next_id: u32,
    next_auto_port: u16,
    containers: HashMap<String, Container>,
    pinned_ports: HashMap<u16, u16>,
    unmapped_creates: u32,
    create_failures: VecDeque<RuntimeError>,
    always_fail_create: Option<String>,
    start_failures: VecDeque<RuntimeError>,
    copy_failures: VecDeque<RuntimeError>,
    health: HealthStatus,
    host: Option<String>,
    logs: HashMap<String, Vec<u8>>,
    shared_logs: Vec<u8>,
    exec_handler: Option<ExecHandler>,

    create_calls: usize,
    created: Vec<ContainerId>,
    started: Vec<ContainerId>,
    stopped: Vec<ContainerId>,
    removed: Vec<ContainerId>,
    copies: Vec<(ContainerId, PathBuf, String)>,
    execs: Vec<(ContainerId, Vec<String>)>,
    journal: Vec<(GatewayCall, ContainerId)>,
}

/// Gateway operation recorded in [`ScriptedRuntime::journal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayCall {
    /// Successful create.
    Create,
    /// Successful copy into the container.
    Copy,
    /// Start, successful or not.
    Start,
    /// Stop.
    Stop,
    /// Remove.
    Remove,
}

/// In-memory [`RuntimeGateway`] driven by test scripts.
#[derive(Default)]
pub struct ScriptedRuntime {
    state: Mutex<State>,
}

impl ScriptedRuntime {
    /// Create a runtime where every operation succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Always bind `container_port` to `host_port`.
    #[must_use]
    pub fn with_port_mapping(self, container_port: u16, host_port: u16) -> Self {
        self.lock().pinned_ports.insert(container_port, host_port);
        self
    }

    /// Report `host` in inspections.
    #[must_use]
    pub fn with_host(self, host: impl Into<String>) -> Self {
        self.lock().host = Some(host.into());
        self
    }

    /// Report `health` for running containers.
    #[must_use]
    pub fn with_health(self, health: HealthStatus) -> Self {
        self.lock().health = health;
        self
    }

    /// Log output shared by every container.
    #[must_use]
    pub fn with_logs(self, text: &str) -> Self {
        self.lock().shared_logs.extend_from_slice(text.as_bytes());
        self
    }

    /// Answer exec calls with `handler` instead of an empty success.
    #[must_use]
    pub fn with_exec_handler(
        self,
        handler: impl Fn(&ContainerId, &[String]) -> ExecResult + Send + Sync + 'static,
    ) -> Self {
        self.lock().exec_handler = Some(Box::new(handler));
        self
    }

    /// Fail the next create call.
    pub fn fail_create(&self, error: RuntimeError) {
        self.lock().create_failures.push_back(error);
    }

    /// Fail every create call.
    pub fn fail_create_always(&self, reason: impl Into<String>) {
        self.lock().always_fail_create = Some(reason.into());
    }

    /// Fail the next start call.
    pub fn fail_start(&self, error: RuntimeError) {
        self.lock().start_failures.push_back(error);
    }

    /// Fail the next copy into a container.
    pub fn fail_copy(&self, error: RuntimeError) {
        self.lock().copy_failures.push_back(error);
    }

    /// Publish no ports for the next `count` created containers.
    pub fn withhold_ports(&self, count: u32) {
        self.lock().unmapped_creates += count;
    }

    /// Append log output for one container.
    pub fn push_logs(&self, id: &ContainerId, text: &str) {
        self.lock()
            .logs
            .entry(id.as_str().to_string())
            .or_default()
            .extend_from_slice(text.as_bytes());
    }

    /// Mark a container as exited with `code`.
    pub fn exit_container(&self, id: &ContainerId, code: i64) {
        if let Some(c) = self.lock().containers.get_mut(id.as_str()) {
            c.state = ContainerState::Exited;
            c.exit_code = Some(code);
        }
    }

    /// Number of create calls, including failed ones.
    #[must_use]
    pub fn create_calls(&self) -> usize {
        self.lock().create_calls
    }

    /// Ids of successfully created containers, in order.
    #[must_use]
    pub fn created(&self) -> Vec<ContainerId> {
        self.lock().created.clone()
    }

    /// Ids passed to start, in order.
    #[must_use]
    pub fn started(&self) -> Vec<ContainerId> {
        self.lock().started.clone()
    }

    /// Ids passed to stop, in order.
    #[must_use]
    pub fn stopped(&self) -> Vec<ContainerId> {
        self.lock().stopped.clone()
    }

    /// Ids passed to remove, in order.
    #[must_use]
    pub fn removed(&self) -> Vec<ContainerId> {
        self.lock().removed.clone()
    }

    /// Containers created but not yet removed.
    #[must_use]
    pub fn live(&self) -> Vec<ContainerId> {
        let state = self.lock();
        state
            .created
            .iter()
            .filter(|id| !state.removed.contains(id))
            .cloned()
            .collect()
    }

    /// Recorded `(id, source, target)` copy calls.
    #[must_use]
    pub fn copies(&self) -> Vec<(ContainerId, PathBuf, String)> {
        self.lock().copies.clone()
    }

    /// Create, copy, start, stop and remove calls in the order they happened.
    #[must_use]
    pub fn journal(&self) -> Vec<(GatewayCall, ContainerId)> {
        self.lock().journal.clone()
    }

    /// Recorded exec commands.
    #[must_use]
    pub fn execs(&self) -> Vec<(ContainerId, Vec<String>)> {
        self.lock().execs.clone()
    }

    /// Spec a container was created from.
    #[must_use]
    pub fn spec_of(&self, id: &ContainerId) -> Option<ContainerSpec> {
        self.lock().containers.get(id.as_str()).map(|c| c.spec.clone())
    }
}

impl RuntimeGateway for ScriptedRuntime {
    fn create<'a>(&'a self, spec: &'a ContainerSpec) -> GatewayFuture<'a, ContainerId> {
        Box::pin(async move {
            let mut state = self.lock();
            state.create_calls += 1;
            if let Some(error) = state.create_failures.pop_front() {
                return Err(error);
            }
            if let Some(reason) = &state.always_fail_create {
                return Err(RuntimeError::CreateFailed(reason.clone()));
            }

            state.next_id += 1;
            let id = ContainerId::new_unchecked(format!("scripted-{}", state.next_id));

            let withhold = state.unmapped_creates > 0;
            if withhold {
                state.unmapped_creates -= 1;
            }
            let mut bindings = Vec::new();
            if !withhold {
                for &port in &spec.exposed_ports {
                    let host_port = match state.pinned_ports.get(&port) {
                        Some(&p) => p,
                        None => {
                            let p = AUTO_PORT_BASE + state.next_auto_port;
                            state.next_auto_port += 1;
                            p
                        }
                    };
                    bindings.push(PortBinding::tcp(port, host_port));
                }
            }

            state.containers.insert(
                id.as_str().to_string(),
                Container {
                    spec: spec.clone(),
                    state: ContainerState::Created,
                    exit_code: None,
                    bindings,
                },
            );
            state.created.push(id.clone());
            state.journal.push((GatewayCall::Create, id.clone()));
            Ok(id)
        })
    }

    fn start<'a>(&'a self, id: &'a ContainerId) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.lock();
            state.started.push(id.clone());
            state.journal.push((GatewayCall::Start, id.clone()));
            if let Some(error) = state.start_failures.pop_front() {
                return Err(error);
            }
            match state.containers.get_mut(id.as_str()) {
                Some(c) => {
                    c.state = ContainerState::Running;
                    Ok(())
                }
                None => Err(RuntimeError::NotFound {
                    id: id.as_str().to_string(),
                }),
            }
        })
    }

    fn stop<'a>(&'a self, id: &'a ContainerId, _timeout: Duration) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.lock();
            state.stopped.push(id.clone());
            state.journal.push((GatewayCall::Stop, id.clone()));
            if let Some(c) = state.containers.get_mut(id.as_str()) {
                c.state = ContainerState::Exited;
                c.exit_code.get_or_insert(0);
            }
            Ok(())
        })
    }

    fn remove<'a>(&'a self, id: &'a ContainerId) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.lock();
            state.removed.push(id.clone());
            state.journal.push((GatewayCall::Remove, id.clone()));
            match state.containers.remove(id.as_str()) {
                Some(_) => Ok(()),
                None => Err(RuntimeError::NotFound {
                    id: id.as_str().to_string(),
                }),
            }
        })
    }

    fn inspect<'a>(&'a self, id: &'a ContainerId) -> GatewayFuture<'a, ContainerInspection> {
        Box::pin(async move {
            let state = self.lock();
            let mut info = ContainerInspection {
                id: id.as_str().to_string(),
                host: state.host.clone(),
                ..Default::default()
            };
            if let Some(c) = state.containers.get(id.as_str()) {
                info.state = c.state;
                info.exit_code = c.exit_code;
                info.ports.clone_from(&c.bindings);
                if c.state == ContainerState::Running {
                    info.health = state.health;
                }
            }
            Ok(info)
        })
    }

    fn logs<'a>(&'a self, id: &'a ContainerId) -> GatewayFuture<'a, Vec<u8>> {
        Box::pin(async move {
            let state = self.lock();
            let mut out = state.shared_logs.clone();
            if let Some(own) = state.logs.get(id.as_str()) {
                out.extend_from_slice(own);
            }
            Ok(out)
        })
    }

    fn copy_file_in<'a>(
        &'a self,
        id: &'a ContainerId,
        source: &'a Path,
        target: &'a str,
    ) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.lock();
            if let Some(error) = state.copy_failures.pop_front() {
                return Err(error);
            }
            if !source.exists() {
                return Err(RuntimeError::CopyFailed {
                    id: id.as_str().to_string(),
                    target: target.to_string(),
                    reason: format!("{} does not exist", source.display()),
                });
            }
            state
                .copies
                .push((id.clone(), source.to_path_buf(), target.to_string()));
            state.journal.push((GatewayCall::Copy, id.clone()));
            Ok(())
        })
    }

    fn exec<'a>(&'a self, id: &'a ContainerId, cmd: &'a [String]) -> GatewayFuture<'a, ExecResult> {
        Box::pin(async move {
            let mut state = self.lock();
            state.execs.push((id.clone(), cmd.to_vec()));
            Ok(state
                .exec_handler
                .as_ref()
                .map_or_else(ExecResult::default, |handler| handler(id, cmd)))
        })
    }
}

/// Statement delegate that records statements and fails on request.
#[derive(Debug, Default)]
pub struct RecordingDelegate {
    executed: Mutex<Vec<String>>,
    fail_at: Option<(usize, String)>,
}

impl RecordingDelegate {
    /// Create a delegate that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the statement at 1-based `position` with `reason`.
    #[must_use]
    pub fn fail_at(mut self, position: usize, reason: impl Into<String>) -> Self {
        self.fail_at = Some((position, reason.into()));
        self
    }

    /// Statements received so far, including the rejected one.
    #[must_use]
    pub fn executed(&self) -> Vec<String> {
        self.executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl StatementDelegate for RecordingDelegate {
    fn execute<'a>(&'a self, statement: &'a str) -> DelegateFuture<'a> {
        Box::pin(async move {
            let mut executed = self.executed.lock().unwrap_or_else(PoisonError::into_inner);
            executed.push(statement.to_string());
            match &self.fail_at {
                Some((position, reason)) if *position == executed.len() => {
                    Err(DelegateError::new(reason.clone()))
                }
                _ => Ok(()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_auto_and_pinned_ports() {
        let runtime = ScriptedRuntime::new().with_port_mapping(9042, 54321);
        let spec = ContainerSpec::new("cassandra")
            .with_exposed_port(9042)
            .with_exposed_port(7199);
        let id = runtime.create(&spec).await.expect("create");
        runtime.start(&id).await.expect("start");

        let info = runtime.inspect(&id).await.expect("inspect");
        assert_eq!(info.state, ContainerState::Running);
        assert!(info.ports.contains(&PortBinding::tcp(9042, 54321)));
        assert!(info.ports.contains(&PortBinding::tcp(7199, AUTO_PORT_BASE)));
    }

    #[tokio::test]
    async fn test_queued_failures_are_consumed_in_order() {
        let runtime = ScriptedRuntime::new();
        runtime.fail_create(RuntimeError::CreateFailed("first".to_string()));
        let spec = ContainerSpec::new("alpine");

        assert!(runtime.create(&spec).await.is_err());
        assert!(runtime.create(&spec).await.is_ok());
        assert_eq!(runtime.create_calls(), 2);
        assert_eq!(runtime.created().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_tracks_live_containers() {
        let runtime = ScriptedRuntime::new();
        let spec = ContainerSpec::new("alpine");
        let a = runtime.create(&spec).await.expect("create");
        let b = runtime.create(&spec).await.expect("create");
        runtime.remove(&a).await.expect("remove");

        assert_eq!(runtime.live(), vec![b]);
        assert!(runtime.remove(&a).await.is_err());
    }
}
