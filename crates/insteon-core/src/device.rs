//! Device addressing for the Insteon network

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::command::CommandError;

/// Insteon device address: three bytes written as six upper-case hex digits
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(String);

impl DeviceId {
    /// Parse and normalize a device id ("40565b" -> "40565B")
    pub fn parse(id: &str) -> Result<Self, CommandError> {
        let id = id.trim();
        if id.len() != 6 || !id.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CommandError::InvalidDeviceId(id.to_string()));
        }
        Ok(Self(id.to_ascii_uppercase()))
    }

    /// Build an id from the three address fields of a decoded message
    pub fn from_parts(high: &str, mid: &str, low: &str) -> Result<Self, CommandError> {
        Self::parse(&format!("{}{}{}", high, mid, low))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if a hex field from the hub buffer names this device
    pub fn matches(&self, field: &str) -> bool {
        self.0.eq_ignore_ascii_case(field)
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DeviceId {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DeviceId {
    type Error = CommandError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_normalizes_case() {
        let id = DeviceId::parse("40565b").unwrap();
        assert_eq!(id.as_str(), "40565B");
        assert!(id.matches("40565b"));
    }

    #[test]
    fn test_device_id_rejects_bad_input() {
        assert!(DeviceId::parse("40565").is_err());
        assert!(DeviceId::parse("40565BB").is_err());
        assert!(DeviceId::parse("4056ZB").is_err());
    }

    #[test]
    fn test_device_id_from_parts() {
        let id = DeviceId::from_parts("42", "90", "2e").unwrap();
        assert_eq!(id.as_str(), "42902E");
        assert!(DeviceId::from_parts("42", "90", "").is_err());
    }

    #[test]
    fn test_device_id_serde() {
        let id: DeviceId = serde_json::from_str("\"1a2b3c\"").unwrap();
        assert_eq!(id.as_str(), "1A2B3C");
        assert!(serde_json::from_str::<DeviceId>("\"nope\"").is_err());
    }
}
