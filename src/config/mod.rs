//! Configuration module

pub mod cli;
pub mod tls_config;
pub mod topology_config;

pub use cli::{CliArgs, Command, OutputFormat};
pub use tls_config::TlsConfig;
pub use topology_config::TopologyConfig;
