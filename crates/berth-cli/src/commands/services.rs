//! Service listing command.

use std::io::Write;

use berth_core::ProviderRegistry;

use crate::error::CliResult;
use crate::output::{OutputFormat, ServiceEntry, ServiceList};

/// Lists the providers a registry can instantiate.
pub struct ServicesCommand<'a> {
    registry: &'a ProviderRegistry,
}

impl<'a> ServicesCommand<'a> {
    /// Create a services command.
    #[must_use]
    pub const fn new(registry: &'a ProviderRegistry) -> Self {
        Self { registry }
    }

    /// Write the provider list.
    ///
    /// # Errors
    ///
    /// Returns an error if output fails.
    pub fn execute<W: Write>(&self, writer: &mut W, format: &OutputFormat) -> CliResult<()> {
        format.write(writer, &self.list())
    }

    /// Providers in registration order.
    #[must_use]
    pub fn list(&self) -> ServiceList {
        ServiceList {
            services: self
                .registry
                .providers()
                .map(|p| ServiceEntry::from_provider(p.as_ref()))
                .collect(),
        }
    }
}
