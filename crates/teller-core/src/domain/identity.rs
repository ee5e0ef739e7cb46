//! Device identity and the metadata carried on every notification.

use std::fmt;

use rand::Rng;

use super::errors::IdentityError;

/// Length of a device identifier in characters.
pub const DEVICE_ID_LEN: usize = 16;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Immutable 16 character uppercase alphanumeric device identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let id = (0..DEVICE_ID_LEN)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect();
        Self(id)
    }

    /// Parse a persisted identifier. Surrounding whitespace is ignored.
    pub fn parse(raw: &str) -> Result<Self, IdentityError> {
        let trimmed = raw.trim();
        let valid = trimmed.len() == DEVICE_ID_LEN
            && trimmed
                .bytes()
                .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit());
        if !valid {
            return Err(IdentityError::Malformed(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Operator supplied description of the device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Free-form hardware / installation description.
    pub info: String,
    /// Physical location of the installation.
    pub location: String,
}

/// Everything a notification needs to identify the device and its project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceMeta {
    pub device_id: DeviceId,
    pub project_index: u32,
    pub info: DeviceInfo,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_id_shape() {
        for _ in 0..64 {
            let id = DeviceId::generate();
            assert_eq!(id.as_str().len(), DEVICE_ID_LEN);
            assert!(DeviceId::parse(id.as_str()).is_ok());
        }
    }

    #[test]
    fn test_generated_ids_differ() {
        assert_ne!(DeviceId::generate(), DeviceId::generate());
    }

    #[test]
    fn test_parse_trims_newline() {
        let id = DeviceId::parse("ABCDEFGH12345678\n").unwrap();
        assert_eq!(id.to_string(), "ABCDEFGH12345678");
    }

    #[test]
    fn test_parse_rejects_lowercase_and_length() {
        assert!(DeviceId::parse("abcdefgh12345678").is_err());
        assert!(DeviceId::parse("ABC").is_err());
        assert!(DeviceId::parse("ABCDEFGH123456789").is_err());
        assert!(DeviceId::parse("ABCDEFGH1234567-").is_err());
    }
}
