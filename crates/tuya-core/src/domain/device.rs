//! Device identity types shared by every table in the broker.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

// ── DeviceId ──────────────────────────────────────────────────────────────────

/// Stable, vendor-assigned identifier of a physical device (the Tuya `gwId`).
///
/// The identifier does not change when the device moves to another IP
/// address, which is why it is the primary key of every table here.
/// Ordering is lexicographic so listings are deterministic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Wraps a raw identifier string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` when the identifier is the empty string.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

// ── ProtocolVersion ───────────────────────────────────────────────────────────

/// Error returned when a version string is not one of the recognised values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognised protocol version '{0}' (expected one of 3.1, 3.2, 3.3, 3.4, 3.5)")]
pub struct UnknownVersion(pub String);

/// Version of the device's local communication protocol.
///
/// The device-control library needs this to frame messages correctly, so the
/// broker hands it out alongside the address and the local key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProtocolVersion {
    V31,
    V32,
    V33,
    V34,
    V35,
}

impl ProtocolVersion {
    /// All recognised versions, oldest first.
    pub const ALL: [ProtocolVersion; 5] = [
        ProtocolVersion::V31,
        ProtocolVersion::V32,
        ProtocolVersion::V33,
        ProtocolVersion::V34,
        ProtocolVersion::V35,
    ];

    /// Returns the canonical dotted form, e.g. `"3.3"`.
    pub fn as_str(self) -> &'static str {
        match self {
            ProtocolVersion::V31 => "3.1",
            ProtocolVersion::V32 => "3.2",
            ProtocolVersion::V33 => "3.3",
            ProtocolVersion::V34 => "3.4",
            ProtocolVersion::V35 => "3.5",
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolVersion {
    type Err = UnknownVersion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        ProtocolVersion::ALL
            .into_iter()
            .find(|v| v.as_str() == trimmed)
            .ok_or_else(|| UnknownVersion(trimmed.to_string()))
    }
}

impl Serialize for ProtocolVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ProtocolVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ── LocalKey ──────────────────────────────────────────────────────────────────

/// Per-device shared secret required to open a local session with a device.
///
/// The key must never reach a log line or an error message.  `Debug` is
/// therefore redacted and there is no `Display` or `Serialize`
/// implementation; the only way to read the secret is the explicit
/// [`LocalKey::expose`] call.
#[derive(Clone, PartialEq, Eq)]
pub struct LocalKey(String);

impl LocalKey {
    /// Wraps a raw key string.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the raw secret.  Call sites must not log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for LocalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LocalKey(***)")
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
