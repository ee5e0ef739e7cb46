//! # Teller Runtime
//!
//! Process-level wiring for the teller agent.
//!
//! - `container/` - Configuration and outbound service wiring
//! - `runtime` - Bootstrap, task supervision and graceful shutdown
//!
//! ## Task Layout
//!
//! ```text
//!                 ┌─ StreamingLoop ──────┐
//! TellerRuntime ──┼─ BillingAggregator ──┼──→ watch shutdown ──→ ShutdownHandler
//!   (start)       ├─ SessionRefresher ───┤
//!                 └─ StateUpdater ←─ SIGUSR1
//! ```

pub mod container;
pub mod runtime;

pub use container::{AgentServices, ConfigError, TellerConfig};
pub use runtime::{wait_for_termination, RunningAgent, TellerRuntime};
