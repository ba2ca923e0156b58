//! Output formatting for CLI commands.
//!
//! Supports table (human-readable) and JSON output formats.

use std::io::Write;

use berth_core::{LifecycleController, ProviderFactory, Transition};
use serde::Serialize;

use crate::cli::Format;
use crate::error::CliError;

/// Output formatter that handles both table and JSON output.
#[derive(Debug, Clone)]
pub struct OutputFormat {
    format: Format,
}

impl OutputFormat {
    /// Create a new output formatter.
    #[must_use]
    pub const fn new(format: Format) -> Self {
        Self { format }
    }

    /// Get the current format.
    #[must_use]
    pub const fn format(&self) -> Format {
        self.format
    }

    /// Check if JSON format is selected.
    #[must_use]
    pub const fn is_json(&self) -> bool {
        matches!(self.format, Format::Json)
    }

    /// Write a value in the selected format.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write<W, T>(&self, writer: &mut W, value: &T) -> Result<(), CliError>
    where
        W: Write,
        T: Serialize + TableDisplay,
    {
        match self.format {
            Format::Json => {
                serde_json::to_writer_pretty(&mut *writer, value)
                    .map_err(|e| CliError::Format(format!("JSON serialization failed: {e}")))?;
                writeln!(writer)?;
            }
            Format::Table => {
                value.write_table(writer)?;
            }
        }
        writer.flush()?;
        Ok(())
    }

    /// Render a value to a string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_string<T>(&self, value: &T) -> Result<String, CliError>
    where
        T: Serialize + TableDisplay,
    {
        let mut buf = Vec::new();
        self.write(&mut buf, value)?;
        String::from_utf8(buf).map_err(|e| CliError::Format(format!("UTF-8 error: {e}")))
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::new(Format::Table)
    }
}

/// Types that can be displayed as a table.
pub trait TableDisplay {
    /// Write the value as a human-readable table.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError>;
}

/// One registered provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceEntry {
    /// Logical service name.
    pub name: String,
    /// Image repository.
    pub image: String,
    /// Tag used when none is given.
    pub default_tag: String,
}

impl ServiceEntry {
    /// Describe a provider.
    #[must_use]
    pub fn from_provider(provider: &dyn ProviderFactory) -> Self {
        Self {
            name: provider.name().to_string(),
            image: provider.default_image().to_string(),
            default_tag: provider.default_tag().to_string(),
        }
    }
}

/// Registered providers.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceList {
    /// Providers in registration order.
    pub services: Vec<ServiceEntry>,
}

impl TableDisplay for ServiceList {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        if self.services.is_empty() {
            writeln!(writer, "No services registered")?;
            return Ok(());
        }

        writeln!(writer, "{:<16}  {:<24}  {:<12}", "NAME", "IMAGE", "DEFAULT TAG")?;
        writeln!(writer, "{}", "─".repeat(56))?;
        for service in &self.services {
            writeln!(
                writer,
                "{:<16}  {:<24}  {:<12}",
                service.name,
                truncate(&service.image, 24),
                service.default_tag
            )?;
        }
        Ok(())
    }
}

/// Published port of a running service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PortEntry {
    /// Port inside the container.
    pub container_port: u16,
    /// Port on the host.
    pub host_port: u16,
}

/// A service that reached readiness.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    /// Logical service name.
    pub service: String,
    /// Image reference.
    pub image: String,
    /// Container identity.
    pub container_id: String,
    /// Host the ports are reachable on.
    pub host: String,
    /// Published ports.
    pub ports: Vec<PortEntry>,
    /// Attempt that succeeded.
    pub attempt: u32,
    /// Configured attempt limit.
    pub attempts: u32,
    /// Lifecycle history.
    pub transitions: Vec<Transition>,
}

impl ServiceStatus {
    /// Snapshot a ready controller.
    ///
    /// Returns `None` unless the controller is ready.
    #[must_use]
    pub fn from_controller(service: &str, controller: &LifecycleController) -> Option<Self> {
        let handle = controller.handle()?;
        let transitions = controller.transitions().to_vec();
        Some(Self {
            service: service.to_string(),
            image: controller.spec().image.to_string(),
            container_id: handle.id().to_string(),
            host: handle.host().to_string(),
            ports: handle
                .ports()
                .map(|(container_port, host_port)| PortEntry {
                    container_port,
                    host_port,
                })
                .collect(),
            attempt: transitions.last().map_or(0, |t| t.attempt),
            attempts: controller.attempt_limit(),
            transitions,
        })
    }
}

impl TableDisplay for ServiceStatus {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "Service: {}", self.service)?;
        writeln!(writer, "══════════════════════════════════")?;
        writeln!(writer, "Image:      {}", self.image)?;
        writeln!(writer, "Container:  {}", truncate(&self.container_id, 12))?;
        writeln!(writer, "Host:       {}", self.host)?;
        writeln!(writer, "Attempt:    {}/{}", self.attempt, self.attempts)?;
        writeln!(writer)?;

        if self.ports.is_empty() {
            writeln!(writer, "No published ports")?;
            return Ok(());
        }
        writeln!(writer, "{:>10}  {:<24}", "PORT", "ENDPOINT")?;
        writeln!(writer, "{}", "─".repeat(36))?;
        for port in &self.ports {
            writeln!(
                writer,
                "{:>10}  {}:{}",
                port.container_port, self.host, port.host_port
            )?;
        }
        Ok(())
    }
}

/// Truncate to `max` characters, marking the cut with an ellipsis.
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}
