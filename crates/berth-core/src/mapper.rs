//! Resource mapping: declared container ports to live host coordinates.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::error::ContainerId;
use crate::runtime::{ContainerInspection, PortBinding};
use crate::spec::ContainerSpec;

/// Host used when neither an override nor the runtime supplies one.
pub const DEFAULT_HOST: &str = "localhost";

/// Port lookup errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortError {
    /// The port was never declared on the spec.
    #[error("port {port} was not declared as exposed")]
    Undeclared {
        /// Container-side port.
        port: u16,
    },

    /// The port was declared but the runtime reported no host binding.
    #[error("declared port {port} has no host binding")]
    Unmapped {
        /// Container-side port.
        port: u16,
    },
}

/// Live identity and network coordinates of a started container.
///
/// Only the [`ResourceMapper`] creates handles; everything else reads them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeHandle {
    #[serde(serialize_with = "serialize_id")]
    id: ContainerId,
    host: String,
    ports: BTreeMap<u16, u16>,
    mounted_paths: Vec<String>,
}

fn serialize_id<S: serde::Serializer>(id: &ContainerId, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(id.as_str())
}

impl RuntimeHandle {
    /// Container identity.
    #[must_use]
    pub fn id(&self) -> &ContainerId {
        &self.id
    }

    /// Address at which mapped ports are reachable.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Host port assigned to a declared container port.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::Undeclared`] for ports the spec never declared.
    pub fn mapped_port(&self, port: u16) -> Result<u16, PortError> {
        self.ports
            .get(&port)
            .copied()
            .ok_or(PortError::Undeclared { port })
    }

    /// `host:port` endpoint for a declared container port.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::Undeclared`] for ports the spec never declared.
    pub fn endpoint(&self, port: u16) -> Result<String, PortError> {
        let mapped = self.mapped_port(port)?;
        Ok(format!("{}:{mapped}", self.host))
    }

    /// All `(container_port, host_port)` pairs.
    pub fn ports(&self) -> impl Iterator<Item = (u16, u16)> + '_ {
        self.ports.iter().map(|(&c, &h)| (c, h))
    }

    /// Container paths populated from host resources.
    #[must_use]
    pub fn mounted_paths(&self) -> &[String] {
        &self.mounted_paths
    }
}

/// Resolves declared ports and resources against runtime metadata.
#[derive(Debug, Clone, Default)]
pub struct ResourceMapper {
    host_override: Option<String>,
}

impl ResourceMapper {
    /// Create a mapper that trusts the runtime's reported host.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Always report `host` as the container address.
    #[must_use]
    pub fn with_host_override(mut self, host: impl Into<String>) -> Self {
        self.host_override = Some(host.into());
        self
    }

    /// Build a handle for a started container.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::Unmapped`] for the first declared port without a
    /// usable host binding.
    pub fn resolve(
        &self,
        id: ContainerId,
        spec: &ContainerSpec,
        inspection: &ContainerInspection,
    ) -> Result<RuntimeHandle, PortError> {
        let mut ports = BTreeMap::new();
        for &port in &spec.exposed_ports {
            let host_port = pick_binding(&inspection.ports, port)
                .ok_or(PortError::Unmapped { port })?;
            ports.insert(port, host_port);
        }

        let host = self
            .host_override
            .clone()
            .or_else(|| inspection.host.clone())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| DEFAULT_HOST.to_string());

        let mounted_paths: Vec<String> = spec
            .volumes
            .iter()
            .map(|v| v.target.clone())
            .chain(spec.copy_files.iter().map(|c| c.target.clone()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        debug!(id = %id, host = %host, ports = ?ports, "resolved container coordinates");

        Ok(RuntimeHandle {
            id,
            host,
            ports,
            mounted_paths,
        })
    }
}

/// Pick the host port for a TCP container port, preferring IPv4 bindings.
fn pick_binding(bindings: &[PortBinding], port: u16) -> Option<u16> {
    let mut candidates = bindings.iter().filter(|b| {
        b.container_port == port && b.protocol.eq_ignore_ascii_case("tcp") && b.host_port.is_some()
    });
    let first = candidates.clone().next()?;
    let ipv4 = candidates.find(|b| b.host_ip.as_deref().is_none_or(|ip| !ip.contains(':')));
    ipv4.unwrap_or(first).host_port
}
