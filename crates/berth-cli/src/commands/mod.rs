//! CLI command implementations.
//!
//! - [`services`] - List registered service providers
//! - [`up`] - Start a service and hold it until interrupted

pub mod services;
pub mod up;

pub use services::ServicesCommand;
pub use up::UpCommand;
