//! # Device Identity Store
//!
//! The device id is generated once and persisted to `<home>/deviceid.hex`.
//! Every later start reads it back; a missing or corrupt file on a device that
//! already has a chain is an operator problem, not something to paper over.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::info;

use crate::domain::{DeviceId, IdentityError};
use crate::ports::PlatformSession;
use crate::service::bounded;

/// Identity file name inside the home directory.
pub const DEVICE_ID_FILE: &str = "deviceid.hex";

pub struct IdentityStore {
    path: PathBuf,
}

impl IdentityStore {
    pub fn new(home: &Path) -> Self {
        Self {
            path: home.join(DEVICE_ID_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted id, `None` on first run.
    pub fn load(&self) -> Result<Option<DeviceId>, IdentityError> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => DeviceId::parse(&raw).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(self.io(source)),
        }
    }

    /// Persist `id`. Write-then-rename so the file is never half written.
    pub fn persist(&self, id: &DeviceId) -> Result<(), IdentityError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io(e))?;
        }
        let tmp = self.path.with_extension("hex.tmp");
        fs::write(&tmp, id.as_str()).map_err(|e| self.io(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io(e))
    }

    /// Return the persisted id, generating and persisting one on first run.
    pub fn load_or_create(&self) -> Result<DeviceId, IdentityError> {
        if let Some(id) = self.load()? {
            return Ok(id);
        }
        let id = DeviceId::generate();
        self.persist(&id)?;
        info!(device_id = %id, "Generated device id");
        Ok(id)
    }

    /// Like [`load_or_create`](Self::load_or_create), but a new id is
    /// registered with the platform before it is persisted. A failed
    /// registration leaves no identity file behind.
    pub async fn load_or_register(
        &self,
        platform: &dyn PlatformSession,
        call_timeout: Duration,
    ) -> Result<DeviceId, IdentityError> {
        if let Some(id) = self.load()? {
            info!(device_id = %id, "Loaded device id");
            return Ok(id);
        }

        let id = DeviceId::generate();
        bounded(call_timeout, "register_device", platform.register_device(&id)).await?;
        self.persist(&id)?;
        info!(device_id = %id, "Generated and registered device id");
        Ok(id)
    }

    fn io(&self, source: io::Error) -> IdentityError {
        IdentityError::Io {
            path: self.path.clone(),
            source,
        }
    }
}
