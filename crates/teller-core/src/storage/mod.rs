//! # Local Storage
//!
//! Files under the teller home directory:
//!
//! | File | Owner |
//! |------|-------|
//! | `deviceid.hex` | [`IdentityStore`] |
//! | `data.txt` | chain buffer ([`Buffers::chain`]) |
//! | `energy.txt` | energy buffer ([`Buffers::energy`]), written by the meter collector |
//! | `teller.lock` | [`HomeLock`] |

pub mod buffer;
pub mod identity_store;
pub mod lock;

pub use buffer::{Buffers, FileBuffer, CHAIN_BUFFER_FILE, ENERGY_BUFFER_FILE};
pub use identity_store::{IdentityStore, DEVICE_ID_FILE};
pub use lock::{HomeLock, LockError};
