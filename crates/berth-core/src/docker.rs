//! Docker runtime gateway using bollard.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StopContainerOptions, UploadToContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::{
    ContainerState as BollardState, ContainerStateStatusEnum, HealthConfig, HealthStatusEnum,
    HostConfig, Mount, MountTypeEnum,
};
use bollard::Docker;
use futures::StreamExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ContainerId, RuntimeError, RuntimeResult};
use crate::runtime::{
    ContainerInspection, ContainerState, ExecResult, GatewayFuture, HealthStatus, PortBinding,
    RuntimeGateway,
};
use crate::spec::{ContainerSpec, HealthCheck, MountType, VolumeMount};

/// Label carrying the id of the process session that created a container.
pub const SESSION_LABEL: &str = "org.berth.session";

/// Label marking containers managed by berth.
pub const MANAGED_LABEL: &str = "org.berth.managed";

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Docker runtime gateway.
pub struct DockerRuntime {
    client: Docker,
    host: Option<String>,
    session: Uuid,
}

impl DockerRuntime {
    /// Connect to the Docker daemon using `DOCKER_HOST` or the local socket.
    ///
    /// # Errors
    ///
    /// Returns error if connection fails.
    pub fn connect() -> RuntimeResult<Self> {
        let client = Docker::connect_with_local_defaults().map_err(|e| {
            RuntimeError::ConnectionFailed(format!("failed to connect to Docker: {e}"))
        })?;
        let host = std::env::var("DOCKER_HOST")
            .ok()
            .and_then(|url| host_from_docker_url(&url));

        Ok(Self::with_client(client, host))
    }

    /// Connect to the Docker daemon at `url` (`unix://`, `tcp://` or `http://`).
    ///
    /// # Errors
    ///
    /// Returns error if connection fails.
    pub fn connect_with_url(url: &str) -> RuntimeResult<Self> {
        let client = if let Some(socket) = url.strip_prefix("unix://") {
            Docker::connect_with_socket(socket, 120, bollard::API_DEFAULT_VERSION)
        } else {
            Docker::connect_with_http(url, 120, bollard::API_DEFAULT_VERSION)
        }
        .map_err(|e| {
            RuntimeError::ConnectionFailed(format!("failed to connect to Docker at {url}: {e}"))
        })?;

        Ok(Self::with_client(client, host_from_docker_url(url)))
    }

    fn with_client(client: Docker, host: Option<String>) -> Self {
        let session = Uuid::new_v4();
        debug!(session = %session, host = ?host, "docker runtime connected");
        Self {
            client,
            host,
            session,
        }
    }

    /// Session id stamped on every created container.
    #[must_use]
    pub fn session(&self) -> Uuid {
        self.session
    }

    /// Check the daemon is reachable.
    ///
    /// # Errors
    ///
    /// Returns error if the daemon does not answer.
    pub async fn ping(&self) -> RuntimeResult<()> {
        self.client
            .ping()
            .await
            .map_err(|e| RuntimeError::ConnectionFailed(e.to_string()))?;
        Ok(())
    }

    fn container_config(&self, spec: &ContainerSpec) -> Config<String> {
        let env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect();

        let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
            .exposed_ports
            .iter()
            .map(|port| (format!("{port}/tcp"), HashMap::new()))
            .collect();

        let mut labels = spec.labels.clone();
        labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
        labels.insert(SESSION_LABEL.to_string(), self.session.to_string());

        Config {
            image: Some(spec.image.to_string()),
            cmd: spec.command.clone(),
            env: Some(env),
            labels: Some(labels),
            exposed_ports: if exposed_ports.is_empty() {
                None
            } else {
                Some(exposed_ports)
            },
            healthcheck: spec.healthcheck.as_ref().map(health_config),
            host_config: Some(host_config(spec)),
            ..Default::default()
        }
    }

    async fn pull(&self, spec: &ContainerSpec) -> RuntimeResult<()> {
        info!(image = %spec.image, "pulling image");
        let options = CreateImageOptions {
            from_image: spec.image.repository.clone(),
            tag: spec.image.tag.clone(),
            ..Default::default()
        };
        let mut stream = self.client.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            progress.map_err(|e| {
                warn!(image = %spec.image, error = %e, "image pull failed");
                RuntimeError::ImageNotFound {
                    image: spec.image.to_string(),
                }
            })?;
        }
        Ok(())
    }
}

impl RuntimeGateway for DockerRuntime {
    fn create<'a>(&'a self, spec: &'a ContainerSpec) -> GatewayFuture<'a, ContainerId> {
        Box::pin(async move {
            spec.validate()?;
            debug!(image = %spec.image, "creating container");

            let options = spec.name.as_ref().map(|name| CreateContainerOptions {
                name: name.clone(),
                platform: None,
            });

            let mut pulled = false;
            let response = loop {
                match self
                    .client
                    .create_container(options.clone(), self.container_config(spec))
                    .await
                {
                    Ok(response) => break response,
                    Err(bollard::errors::Error::DockerResponseServerError {
                        status_code: 404,
                        ..
                    }) if !pulled => {
                        self.pull(spec).await?;
                        pulled = true;
                    }
                    Err(bollard::errors::Error::DockerResponseServerError {
                        status_code: 404,
                        ..
                    }) => {
                        return Err(RuntimeError::ImageNotFound {
                            image: spec.image.to_string(),
                        });
                    }
                    Err(bollard::errors::Error::DockerResponseServerError {
                        status_code: 409,
                        message,
                    }) => {
                        return Err(RuntimeError::CreateFailed(format!(
                            "container already exists: {message}"
                        )));
                    }
                    Err(e) => return Err(RuntimeError::CreateFailed(e.to_string())),
                }
            };

            for warning in &response.warnings {
                warn!(id = %response.id, warning = %warning, "docker create warning");
            }
            info!(id = %response.id, image = %spec.image, "container created");
            Ok(ContainerId::new_unchecked(response.id))
        })
    }

    fn start<'a>(&'a self, id: &'a ContainerId) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            debug!(id = %id, "starting container");

            self.client
                .start_container::<String>(id.as_str(), None)
                .await
                .map_err(|e| match e {
                    bollard::errors::Error::DockerResponseServerError {
                        status_code: 404, ..
                    } => RuntimeError::NotFound { id: id.to_string() },
                    _ => RuntimeError::StartFailed {
                        id: id.to_string(),
                        reason: e.to_string(),
                    },
                })?;

            info!(id = %id, "container started");
            Ok(())
        })
    }

    fn stop<'a>(&'a self, id: &'a ContainerId, timeout: Duration) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            debug!(id = %id, "stopping container");

            let options = StopContainerOptions {
                t: i64::try_from(timeout.as_secs()).unwrap_or(i64::MAX),
            };

            match self.client.stop_container(id.as_str(), Some(options)).await {
                Ok(()) => {
                    info!(id = %id, "container stopped");
                    Ok(())
                }
                Err(bollard::errors::Error::DockerResponseServerError {
                    status_code: 404, ..
                }) => Err(RuntimeError::NotFound { id: id.to_string() }),
                // Already stopped
                Err(bollard::errors::Error::DockerResponseServerError {
                    status_code: 304, ..
                }) => Ok(()),
                Err(e) => Err(RuntimeError::StopFailed {
                    id: id.to_string(),
                    reason: e.to_string(),
                }),
            }
        })
    }

    fn remove<'a>(&'a self, id: &'a ContainerId) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            debug!(id = %id, "removing container");

            let options = RemoveContainerOptions {
                force: true,
                v: true,
                ..Default::default()
            };

            self.client
                .remove_container(id.as_str(), Some(options))
                .await
                .map_err(|e| match e {
                    bollard::errors::Error::DockerResponseServerError {
                        status_code: 404, ..
                    } => RuntimeError::NotFound { id: id.to_string() },
                    _ => RuntimeError::RemoveFailed {
                        id: id.to_string(),
                        reason: e.to_string(),
                    },
                })?;

            info!(id = %id, "container removed");
            Ok(())
        })
    }

    fn inspect<'a>(&'a self, id: &'a ContainerId) -> GatewayFuture<'a, ContainerInspection> {
        Box::pin(async move {
            let inspect = self
                .client
                .inspect_container(id.as_str(), None::<InspectContainerOptions>)
                .await
                .map_err(|e| match e {
                    bollard::errors::Error::DockerResponseServerError {
                        status_code: 404, ..
                    } => RuntimeError::NotFound { id: id.to_string() },
                    _ => RuntimeError::Internal(e.to_string()),
                })?;

            let mut ports = Vec::new();
            if let Some(published) = inspect.network_settings.and_then(|n| n.ports) {
                for (key, bindings) in published {
                    let Some((container_port, protocol)) = parse_port_key(&key) else {
                        continue;
                    };
                    for binding in bindings.unwrap_or_default() {
                        ports.push(PortBinding {
                            container_port,
                            protocol: protocol.clone(),
                            host_ip: binding.host_ip,
                            host_port: binding.host_port.and_then(|p| p.parse().ok()),
                        });
                    }
                }
            }

            Ok(ContainerInspection {
                id: inspect.id.unwrap_or_else(|| id.as_str().to_string()),
                state: container_state(inspect.state.as_ref()),
                health: health_status(inspect.state.as_ref()),
                exit_code: inspect.state.as_ref().and_then(|s| s.exit_code),
                host: self.host.clone(),
                ports,
            })
        })
    }

    fn logs<'a>(&'a self, id: &'a ContainerId) -> GatewayFuture<'a, Vec<u8>> {
        Box::pin(async move {
            let options = LogsOptions::<String> {
                stdout: true,
                stderr: true,
                tail: "all".to_string(),
                follow: false,
                ..Default::default()
            };

            let mut stream = self.client.logs(id.as_str(), Some(options));
            let mut output = Vec::new();

            while let Some(result) = stream.next().await {
                match result {
                    Ok(chunk) => output.extend_from_slice(&chunk.into_bytes()),
                    Err(bollard::errors::Error::DockerResponseServerError {
                        status_code: 404, ..
                    }) => return Err(RuntimeError::NotFound { id: id.to_string() }),
                    Err(e) => {
                        warn!(id = %id, error = %e, "error reading logs");
                        break;
                    }
                }
            }

            Ok(output)
        })
    }

    fn copy_file_in<'a>(
        &'a self,
        id: &'a ContainerId,
        source: &'a Path,
        target: &'a str,
    ) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            let copy_error = |reason: String| RuntimeError::CopyFailed {
                id: id.to_string(),
                target: target.to_string(),
                reason,
            };

            let owned_source = source.to_path_buf();
            let owned_target = target.to_string();
            let archive = tokio::task::spawn_blocking(move || build_archive(&owned_source, &owned_target))
                .await
                .map_err(|e| copy_error(e.to_string()))?
                .map_err(|e| copy_error(e.to_string()))?;

            let options = UploadToContainerOptions {
                path: "/".to_string(),
                ..Default::default()
            };
            self.client
                .upload_to_container(id.as_str(), Some(options), archive.into())
                .await
                .map_err(|e| copy_error(e.to_string()))?;

            debug!(id = %id, source = %source.display(), target = %target, "copied into container");
            Ok(())
        })
    }

    fn exec<'a>(&'a self, id: &'a ContainerId, cmd: &'a [String]) -> GatewayFuture<'a, ExecResult> {
        Box::pin(async move {
            let exec_error = |reason: String| RuntimeError::ExecFailed {
                id: id.to_string(),
                reason,
            };

            let options = CreateExecOptions {
                cmd: Some(cmd.to_vec()),
                attach_stdout: Some(true),
                attach_stderr: Some(true),
                tty: Some(false),
                ..Default::default()
            };

            let exec = self
                .client
                .create_exec(id.as_str(), options)
                .await
                .map_err(|e| exec_error(format!("failed to create exec: {e}")))?;

            let mut stdout = Vec::new();
            let mut stderr = Vec::new();

            let started = self
                .client
                .start_exec(&exec.id, None)
                .await
                .map_err(|e| exec_error(format!("failed to start exec: {e}")))?;

            if let StartExecResults::Attached { mut output, .. } = started {
                while let Some(result) = output.next().await {
                    match result {
                        Ok(LogOutput::StdErr { message }) => stderr.extend_from_slice(&message),
                        Ok(chunk) => stdout.extend_from_slice(&chunk.into_bytes()),
                        Err(e) => {
                            warn!(id = %id, error = %e, "error reading exec output");
                            break;
                        }
                    }
                }
            }

            let inspect = self
                .client
                .inspect_exec(&exec.id)
                .await
                .map_err(|e| exec_error(format!("failed to inspect exec: {e}")))?;

            Ok(ExecResult {
                exit_code: inspect.exit_code.unwrap_or(-1),
                stdout,
                stderr,
            })
        })
    }
}

fn host_config(spec: &ContainerSpec) -> HostConfig {
    let mounts: Vec<Mount> = spec.volumes.iter().map(volume_to_mount).collect();
    HostConfig {
        mounts: if mounts.is_empty() { None } else { Some(mounts) },
        // Docker picks a free host port for every exposed port.
        publish_all_ports: Some(!spec.exposed_ports.is_empty()),
        ..Default::default()
    }
}

fn volume_to_mount(volume: &VolumeMount) -> Mount {
    Mount {
        target: Some(volume.target.clone()),
        source: match volume.mount_type {
            MountType::Tmpfs => None,
            MountType::Bind | MountType::Volume => Some(volume.source.clone()),
        },
        typ: Some(match volume.mount_type {
            MountType::Bind => MountTypeEnum::BIND,
            MountType::Volume => MountTypeEnum::VOLUME,
            MountType::Tmpfs => MountTypeEnum::TMPFS,
        }),
        read_only: Some(volume.read_only),
        ..Default::default()
    }
}

fn health_config(check: &HealthCheck) -> HealthConfig {
    let nanos = |secs: u32| i64::from(secs) * NANOS_PER_SEC;
    HealthConfig {
        test: Some(check.test.clone()),
        interval: Some(nanos(check.interval_secs)),
        timeout: Some(nanos(check.timeout_secs)),
        retries: Some(i64::from(check.retries)),
        start_period: Some(nanos(check.start_period_secs)),
        ..Default::default()
    }
}

fn container_state(state: Option<&BollardState>) -> ContainerState {
    let Some(s) = state else {
        return ContainerState::Unknown;
    };
    match s.status {
        Some(ContainerStateStatusEnum::CREATED) => ContainerState::Created,
        Some(ContainerStateStatusEnum::RUNNING) => ContainerState::Running,
        Some(ContainerStateStatusEnum::PAUSED) => ContainerState::Paused,
        Some(ContainerStateStatusEnum::RESTARTING) => ContainerState::Restarting,
        Some(ContainerStateStatusEnum::REMOVING) => ContainerState::Removing,
        Some(ContainerStateStatusEnum::EXITED) => ContainerState::Exited,
        Some(ContainerStateStatusEnum::DEAD) => ContainerState::Dead,
        _ if s.running == Some(true) => ContainerState::Running,
        _ => ContainerState::Unknown,
    }
}

fn health_status(state: Option<&BollardState>) -> HealthStatus {
    match state.and_then(|s| s.health.as_ref()).and_then(|h| h.status) {
        Some(HealthStatusEnum::HEALTHY) => HealthStatus::Healthy,
        Some(HealthStatusEnum::UNHEALTHY) => HealthStatus::Unhealthy,
        Some(HealthStatusEnum::STARTING) => HealthStatus::Starting,
        Some(HealthStatusEnum::NONE | HealthStatusEnum::EMPTY) | None => HealthStatus::None,
    }
}

/// Split `"9042/tcp"` into port and protocol.
fn parse_port_key(key: &str) -> Option<(u16, String)> {
    let (port, protocol) = key.split_once('/').unwrap_or((key, "tcp"));
    Some((port.parse().ok()?, protocol.to_string()))
}

/// Host reachable through a daemon URL; `None` for local sockets.
fn host_from_docker_url(url: &str) -> Option<String> {
    let rest = url
        .strip_prefix("tcp://")
        .or_else(|| url.strip_prefix("http://"))
        .or_else(|| url.strip_prefix("https://"))?;
    let authority = rest.split('/').next().unwrap_or(rest);
    let host = match authority.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => authority,
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');
    (!host.is_empty()).then(|| host.to_string())
}

/// Tar `source` so that it extracts to `target` when uploaded at `/`.
fn build_archive(source: &Path, target: &str) -> std::io::Result<Vec<u8>> {
    let entry = PathBuf::from(target.trim_start_matches('/'));
    let mut builder = tar::Builder::new(Vec::new());
    if source.is_dir() {
        builder.append_dir_all(&entry, source)?;
    } else {
        builder.append_path_with_name(source, &entry)?;
    }
    builder.into_inner()
}
