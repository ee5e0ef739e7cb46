//! Port implementations.
//!
//! - `ipfs`: content store over the IPFS HTTP API
//! - `particle`: telemetry source over the Particle event stream
//! - `platform`: ledger, billing, notifications and session over the platform API
//! - `memory`: in-memory doubles used by tests

pub mod ipfs;
pub mod memory;
pub mod particle;
pub mod platform;

pub use ipfs::IpfsHttpStore;
pub use particle::ParticleSource;
pub use platform::{PlatformClient, PlatformConfig};
