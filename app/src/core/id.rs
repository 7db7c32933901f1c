use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ValidationError;

pub const MIN_ENDPOINT: u8 = 1;
pub const MAX_ENDPOINT: u8 = 240;

/// Device identifier in canonical form: `0x` followed by 16 lowercase hex digits.
///
/// `parse` enforces the format and is used before anything is sent to the gateway.
/// `normalized` only lowercases and trims; it is used for identifiers that arrive from the
/// gateway itself, which are trusted to be well-formed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, derive_more::Display, derive_more::AsRef)]
#[as_ref(str)]
pub struct DeviceUid(String);

impl DeviceUid {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let uid = Self::normalized(raw);
        let digits = uid.0.strip_prefix("0x").unwrap_or_default();

        if digits.len() != 16 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ValidationError::DeviceUid(raw.to_owned()));
        }

        Ok(uid)
    }

    pub fn normalized(raw: &str) -> Self {
        Self(raw.trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for DeviceUid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(|s| DeviceUid::normalized(&s))
    }
}

pub fn validate_endpoint(endpoint: u64) -> Result<u8, ValidationError> {
    match u8::try_from(endpoint) {
        Ok(ep) if (MIN_ENDPOINT..=MAX_ENDPOINT).contains(&ep) => Ok(ep),
        _ => Err(ValidationError::Endpoint(endpoint)),
    }
}
