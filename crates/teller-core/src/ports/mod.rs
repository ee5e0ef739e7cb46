//! # Ports Module
//!
//! Outbound dependencies of the agent. The agent has no inbound API: it is
//! driven by its own timers, the telemetry stream and process signals.

pub mod outbound;

pub use outbound::*;
