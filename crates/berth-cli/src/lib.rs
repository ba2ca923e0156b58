//! # berth-cli
//!
//! Command-line front end for berth.
//!
//! - `berth services` lists the registered service providers.
//! - `berth up <service[:tag]>` starts a service container, prints its
//!   coordinates and keeps it running until Ctrl-C.
//!
//! The Docker gateway is only connected for commands that need one, so
//! argument and registry errors surface without a daemon.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod commands;
pub mod error;
pub mod output;

pub use cli::{Cli, Commands, Format, UpArgs};
pub use error::{CliError, CliResult};
pub use output::OutputFormat;

use berth_core::{BerthConfig, ProviderRegistry};

/// Registry with every bundled service module.
///
/// # Errors
///
/// Returns [`CliError::Registry`] if two modules claim the same name.
pub fn default_registry(config: &BerthConfig) -> CliResult<ProviderRegistry> {
    let builder = ProviderRegistry::builder()
        .register(berth_cassandra::CassandraProvider::new(config.resolver()))?;
    Ok(builder.build())
}
