//! # Agent Container
//!
//! Configuration and the port implementations the runtime is built from.

pub mod config;
pub mod services;

pub use config::{ConfigError, TellerConfig};
pub use services::AgentServices;
