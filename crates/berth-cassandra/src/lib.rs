//! # berth-cassandra
//!
//! Cassandra service module for berth.
//!
//! [`CassandraContainer`] builds a [`ServiceDefinition`] for the official
//! `cassandra` image: CQL port 9042 always exposed, optional Thrift (9160)
//! and JMX (7199) ports, an optional configuration directory copied over
//! `/etc/cassandra`, and an optional CQL init script executed through
//! `cqlsh` inside the container once the node answers queries.
//!
//! ```rust,ignore
//! use berth_cassandra::{CassandraContainer, CassandraCoordinates};
//!
//! let controller = CassandraContainer::new()
//!     .with_init_script("initial.cql")
//!     .definition()
//!     .launch(runtime, settings)
//!     .await?;
//! let coords = CassandraCoordinates::from_handle(controller.handle().expect("ready"))?;
//! println!("contact point: {}", coords.contact_point());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod delegate;

pub use delegate::{CqlshDelegate, CqlshDelegates};

use std::path::PathBuf;
use std::sync::Arc;

use berth_core::{
    ContainerSpec, ImageRef, PortError, ProbeContext, ProviderFactory, ProviderRegistryBuilder,
    RegistryError, ResourceResolver, RuntimeHandle, ScriptSource, ServiceDefinition,
    WaitCondition, WaitStrategy,
};
use serde::Serialize;
use tracing::debug;

/// Logical service name.
pub const NAME: &str = "cassandra";
/// Image repository.
pub const IMAGE: &str = "cassandra";
/// Default image tag.
pub const DEFAULT_TAG: &str = "3.11.2";
/// CQL native protocol port.
pub const CQL_PORT: u16 = 9042;
/// Thrift RPC port.
pub const THRIFT_PORT: u16 = 9160;
/// JMX port.
pub const JMX_PORT: u16 = 7199;
/// Configuration directory inside the container.
pub const CONFIG_LOCATION: &str = "/etc/cassandra";
/// Default superuser name.
pub const USERNAME: &str = "cassandra";
/// Default superuser password.
pub const PASSWORD: &str = "cassandra";
/// Startup attempts; first boots of a JVM node are slow and flaky.
pub const STARTUP_ATTEMPTS: u32 = 3;
/// Query used to verify the node answers CQL.
pub const TEST_QUERY: &str = "SELECT release_version FROM system.local";
/// Driver class recommended for JDBC access over Thrift.
pub const DEFAULT_DRIVER_CLASS_NAME: &str = "com.github.adejanovski.cassandra.jdbc.CassandraDriver";

/// Builder for a Cassandra service definition.
#[derive(Debug, Clone)]
pub struct CassandraContainer {
    image: ImageRef,
    init_script: Option<String>,
    configuration_override: Option<String>,
    native_api: bool,
    driver_class_name: String,
    jmx_reporting: bool,
    startup_attempts: u32,
    resolver: ResourceResolver,
}

impl Default for CassandraContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl CassandraContainer {
    /// `cassandra:3.11.2`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_image(ImageRef::new(IMAGE, DEFAULT_TAG))
    }

    /// `cassandra:<tag>`.
    #[must_use]
    pub fn with_tag(tag: &str) -> Self {
        Self::with_image(ImageRef::new(IMAGE, tag))
    }

    /// Any Cassandra-compatible image.
    #[must_use]
    pub fn with_image(image: ImageRef) -> Self {
        Self {
            image,
            init_script: None,
            configuration_override: None,
            native_api: false,
            driver_class_name: DEFAULT_DRIVER_CLASS_NAME.to_string(),
            jmx_reporting: false,
            startup_attempts: STARTUP_ATTEMPTS,
            resolver: ResourceResolver::default(),
        }
    }

    /// Run a CQL script, resolved against the resource roots, once ready.
    #[must_use]
    pub fn with_init_script(mut self, name: impl Into<String>) -> Self {
        self.init_script = Some(name.into());
        self
    }

    /// Replace `/etc/cassandra` with the contents of a resource directory.
    ///
    /// The directory must contain a usable `cassandra.yaml`, otherwise the
    /// node will not boot.
    #[must_use]
    pub fn with_configuration_override(mut self, name: impl Into<String>) -> Self {
        self.configuration_override = Some(name.into());
        self
    }

    /// Expose the Thrift port and start the RPC server.
    #[must_use]
    pub fn with_native_api(mut self, enabled: bool) -> Self {
        self.native_api = enabled;
        self
    }

    /// Like [`with_native_api`](Self::with_native_api) with a custom driver class.
    #[must_use]
    pub fn with_native_api_driver(mut self, enabled: bool, driver_class_name: impl Into<String>) -> Self {
        self.native_api = enabled;
        self.driver_class_name = driver_class_name.into();
        self
    }

    /// Expose the JMX port.
    #[must_use]
    pub fn with_jmx_reporting(mut self, enabled: bool) -> Self {
        self.jmx_reporting = enabled;
        self
    }

    /// Set the startup attempt limit.
    #[must_use]
    pub fn with_startup_attempts(mut self, attempts: u32) -> Self {
        self.startup_attempts = attempts;
        self
    }

    /// Resolve script and configuration names against `resolver`.
    #[must_use]
    pub fn with_resolver(mut self, resolver: ResourceResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Container specification.
    #[must_use]
    pub fn spec(&self) -> ContainerSpec {
        let mut spec = ContainerSpec::from_image(self.image.clone())
            .with_exposed_port(CQL_PORT)
            .with_startup_attempts(self.startup_attempts);

        if let Some(name) = &self.configuration_override {
            // An unresolved name is reported by spec validation.
            let source = self
                .resolver
                .resolve(name)
                .unwrap_or_else(|| PathBuf::from(name));
            debug!(source = %source.display(), "overriding cassandra configuration");
            spec = spec.with_copy_to_container(source, CONFIG_LOCATION);
        }
        if self.native_api {
            spec = spec
                .with_exposed_port(THRIFT_PORT)
                .with_env("CASSANDRA_START_RPC", "true");
        }
        if self.jmx_reporting {
            spec = spec.with_exposed_port(JMX_PORT);
        }
        spec
    }

    /// Readiness: CQL port accepting connections and the test query answering.
    #[must_use]
    pub fn wait_strategy(&self) -> WaitStrategy {
        WaitStrategy::new(WaitCondition::all([
            WaitCondition::listening_ports([CQL_PORT]),
            WaitCondition::probe(|ctx: ProbeContext| async move {
                CqlshDelegate::new(ctx.runtime, ctx.handle.id().clone())
                    .query(TEST_QUERY)
                    .await
                    .is_ok()
            }),
        ]))
    }

    /// Recommended JDBC driver class.
    #[must_use]
    pub fn driver_class_name(&self) -> &str {
        &self.driver_class_name
    }

    /// Complete service definition.
    #[must_use]
    pub fn definition(&self) -> ServiceDefinition {
        let mut definition = ServiceDefinition::new(NAME, self.spec())
            .with_wait(self.wait_strategy())
            .with_delegate_factory(Arc::new(CqlshDelegates::default()))
            .with_resolver(self.resolver.clone());
        if let Some(name) = &self.init_script {
            definition = definition.with_init_script(ScriptSource::Resource(name.clone()));
        }
        definition
    }
}

/// Connection details of a ready Cassandra node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CassandraCoordinates {
    /// Host the mapped ports are reachable on.
    pub host: String,
    /// Host port for CQL.
    pub cql_port: u16,
    /// Host port for Thrift, when the native API is enabled.
    pub native_port: Option<u16>,
    /// Host port for JMX, when reporting is enabled.
    pub jmx_port: Option<u16>,
    /// Superuser name.
    pub username: String,
    /// Superuser password.
    pub password: String,
}

impl CassandraCoordinates {
    /// Read coordinates from a ready handle.
    ///
    /// # Errors
    ///
    /// Returns [`PortError`] if the CQL port was not declared.
    pub fn from_handle(handle: &RuntimeHandle) -> Result<Self, PortError> {
        Ok(Self {
            host: handle.host().to_string(),
            cql_port: handle.mapped_port(CQL_PORT)?,
            native_port: handle.mapped_port(THRIFT_PORT).ok(),
            jmx_port: handle.mapped_port(JMX_PORT).ok(),
            username: USERNAME.to_string(),
            password: PASSWORD.to_string(),
        })
    }

    /// `host:port` for CQL drivers.
    #[must_use]
    pub fn contact_point(&self) -> String {
        format!("{}:{}", self.host, self.cql_port)
    }

    /// JDBC URL over Thrift, when the native API is enabled.
    #[must_use]
    pub fn jdbc_url(&self) -> Option<String> {
        self.native_port
            .map(|port| format!("jdbc:cassandra://{}:{port}", self.host))
    }
}

/// Registry provider for `cassandra[:tag]`.
#[derive(Debug, Clone, Default)]
pub struct CassandraProvider {
    resolver: ResourceResolver,
}

impl CassandraProvider {
    /// Create a provider that resolves resources against `resolver`.
    #[must_use]
    pub fn new(resolver: ResourceResolver) -> Self {
        Self { resolver }
    }
}

impl ProviderFactory for CassandraProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn default_image(&self) -> &str {
        IMAGE
    }

    fn default_tag(&self) -> &str {
        DEFAULT_TAG
    }

    fn create(&self, tag: Option<&str>) -> ServiceDefinition {
        CassandraContainer::with_tag(tag.unwrap_or(DEFAULT_TAG))
            .with_resolver(self.resolver.clone())
            .definition()
    }
}

/// Register the Cassandra provider.
///
/// # Errors
///
/// Returns [`RegistryError::Duplicate`] if a `cassandra` provider exists.
pub fn register(builder: ProviderRegistryBuilder) -> Result<ProviderRegistryBuilder, RegistryError> {
    builder.register(CassandraProvider::default())
}
