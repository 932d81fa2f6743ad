//! Operator-supplied credential table.
//!
//! The credential source is a JSON object keyed by device identifier:
//!
//! ```json
//! {
//!   "bf1234567890abcdef": { "name": "Lamp", "local_key": "a1b2c3d4e5f6a7b8", "version": "3.3" }
//! }
//! ```
//!
//! Loading is a pure function of the bytes ([`CredentialTable::from_json`]).
//! The table is validated eagerly: unknown fields, missing keys, and
//! unrecognised protocol versions are rejected at load time rather than
//! discovered when a client asks for the device.
//!
//! # Secrets in error messages
//!
//! None of the [`ConfigError`] variants carry the local key.  Validation errors
//! name the device and the field, never the field's value.  `local_key` is
//! read as an untyped JSON value so a wrong type is reported as
//! [`ConfigError::InvalidField`] rather than by serde.  serde's own data
//! errors quote the offending value and are reduced to a line and column.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use serde_json::error::Category;
use serde_json::Value;
use thiserror::Error;

use super::device::{DeviceId, LocalKey, ProtocolVersion};

/// Error type for loading or reloading the credential table.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The credential source could not be read.
    #[error("failed to read credential source {origin}: {source}")]
    Io {
        origin: String,
        #[source]
        source: std::io::Error,
    },

    /// The bytes are not a JSON object of the expected shape.
    #[error("malformed credential source: {0}")]
    Malformed(String),

    /// A device entry has an empty identifier.
    #[error("credential source contains an empty device identifier")]
    EmptyIdentifier,

    /// The same identifier appears more than once in the source.
    #[error("device '{0}' is listed more than once")]
    DuplicateIdentifier(DeviceId),

    /// A required field is absent from a device entry.
    #[error("device '{device}': missing required field '{field}'")]
    MissingField {
        device: DeviceId,
        field: &'static str,
    },

    /// A field is present but its value is not acceptable.
    #[error("device '{device}': invalid '{field}': {reason}")]
    InvalidField {
        device: DeviceId,
        field: &'static str,
        reason: String,
    },
}

/// One device's static credentials.
///
/// Immutable once loaded; a reload replaces the whole table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    pub id: DeviceId,
    /// Friendly name, matched case-sensitively by name lookups.
    pub name: Option<String>,
    pub local_key: LocalKey,
    pub version: ProtocolVersion,
}

/// Validated mapping from device identifier to [`CredentialRecord`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialTable {
    records: BTreeMap<DeviceId, CredentialRecord>,
}

// ── Raw (unvalidated) schema ──────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRecord {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    local_key: Option<Value>,
    #[serde(default)]
    version: Option<RawVersion>,
}

/// Versions are documented as strings, but JSON numbers such as `3.3` show up
/// in hand-written files and are accepted.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawVersion {
    Text(String),
    Number(f64),
}

impl RawVersion {
    fn into_text(self) -> String {
        match self {
            RawVersion::Text(s) => s,
            RawVersion::Number(n) => n.to_string(),
        }
    }
}

/// The top-level object in file order.  A plain map would let a repeated
/// identifier silently replace the earlier entry.
struct RawEntries(Vec<(String, RawRecord)>);

impl<'de> Deserialize<'de> for RawEntries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = RawEntries;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object keyed by device identifier")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<RawEntries, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry::<String, RawRecord>()? {
                    entries.push(entry);
                }
                Ok(RawEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

/// serde_json data errors quote the value they choked on; only syntax and
/// end-of-input messages are passed through verbatim.
fn describe_parse_error(e: &serde_json::Error) -> String {
    match e.classify() {
        Category::Data => format!(
            "unexpected field or value type at line {} column {}",
            e.line(),
            e.column()
        ),
        Category::Syntax | Category::Eof | Category::Io => e.to_string(),
    }
}

// ── CredentialTable ───────────────────────────────────────────────────────────

impl CredentialTable {
    /// Parses and validates a credential source.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Malformed`] if the bytes are not a JSON object of
    /// device entries (including entries with unknown fields), and
    /// [`ConfigError::MissingField`] / [`ConfigError::InvalidField`] /
    /// [`ConfigError::EmptyIdentifier`] for entries that fail validation.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use tuya_core::{CredentialTable, DeviceId, ProtocolVersion};
    ///
    /// let table = CredentialTable::from_json(
    ///     br#"{"dev1": {"name": "Lamp", "local_key": "k1", "version": "3.3"}}"#,
    /// ).unwrap();
    /// let lamp = table.get(&DeviceId::from("dev1")).unwrap();
    /// assert_eq!(lamp.version, ProtocolVersion::V33);
    /// ```
    pub fn from_json(bytes: &[u8]) -> Result<Self, ConfigError> {
        let RawEntries(raw) = serde_json::from_slice(bytes)
            .map_err(|e| ConfigError::Malformed(describe_parse_error(&e)))?;

        let mut records = BTreeMap::new();
        for (id, entry) in raw {
            let record = validate(DeviceId::new(id), entry)?;
            if records.contains_key(&record.id) {
                return Err(ConfigError::DuplicateIdentifier(record.id));
            }
            records.insert(record.id.clone(), record);
        }
        Ok(Self { records })
    }

    /// Builds a table from already-validated records.  Later duplicates win.
    pub fn from_records(records: impl IntoIterator<Item = CredentialRecord>) -> Self {
        Self {
            records: records.into_iter().map(|r| (r.id.clone(), r)).collect(),
        }
    }

    /// Looks up a device by identifier.
    pub fn get(&self, id: &DeviceId) -> Option<&CredentialRecord> {
        self.records.get(id)
    }

    /// Looks up a device by exact, case-sensitive friendly name.
    ///
    /// When several devices share the name, the one with the lowest
    /// identifier is returned.
    pub fn find_by_name(&self, name: &str) -> Option<&CredentialRecord> {
        self.records
            .values()
            .find(|r| r.name.as_deref() == Some(name))
    }

    /// Iterates over the records in identifier order.
    pub fn iter(&self) -> impl Iterator<Item = &CredentialRecord> {
        self.records.values()
    }

    /// Number of configured devices.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` when no device is configured.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Friendly names used by more than one device, sorted.
    pub fn duplicate_names(&self) -> Vec<String> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for name in self.records.values().filter_map(|r| r.name.as_deref()) {
            *counts.entry(name).or_default() += 1;
        }
        counts
            .into_iter()
            .filter(|(_, n)| *n > 1)
            .map(|(name, _)| name.to_string())
            .collect()
    }
}

fn validate(id: DeviceId, raw: RawRecord) -> Result<CredentialRecord, ConfigError> {
    if id.is_empty() {
        return Err(ConfigError::EmptyIdentifier);
    }

    let local_key = match raw.local_key {
        None => {
            return Err(ConfigError::MissingField {
                device: id,
                field: "local_key",
            })
        }
        Some(Value::String(k)) if k.is_empty() => {
            return Err(ConfigError::InvalidField {
                device: id,
                field: "local_key",
                reason: "must not be empty".to_string(),
            })
        }
        Some(Value::String(k)) => LocalKey::new(k),
        Some(_) => {
            return Err(ConfigError::InvalidField {
                device: id,
                field: "local_key",
                reason: "must be a string".to_string(),
            })
        }
    };

    let version = match raw.version {
        None => {
            return Err(ConfigError::MissingField {
                device: id,
                field: "version",
            })
        }
        Some(v) => match v.into_text().parse::<ProtocolVersion>() {
            Ok(v) => v,
            Err(e) => {
                return Err(ConfigError::InvalidField {
                    device: id,
                    field: "version",
                    reason: e.to_string(),
                })
            }
        },
    };

    // An empty name is treated as "no name" so it can never match a lookup.
    let name = raw.name.filter(|n| !n.is_empty());

    Ok(CredentialRecord {
        id,
        name,
        local_key,
        version,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const LAMP: &[u8] = br#"{"dev1": {"name": "Lamp", "local_key": "k1", "version": "3.3"}}"#;

    #[test]
    fn test_from_json_loads_single_device() {
        // Arrange / Act
        let table = CredentialTable::from_json(LAMP).expect("valid source");

        // Assert
        let record = table.get(&DeviceId::from("dev1")).expect("dev1 present");
        assert_eq!(record.name.as_deref(), Some("Lamp"));
        assert_eq!(record.local_key.expose(), "k1");
        assert_eq!(record.version, ProtocolVersion::V33);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_from_json_accepts_empty_object() {
        let table = CredentialTable::from_json(b"{}").unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_from_json_name_is_optional() {
        let table =
            CredentialTable::from_json(br#"{"d": {"local_key": "k", "version": "3.1"}}"#).unwrap();
        assert_eq!(table.get(&"d".into()).unwrap().name, None);
    }

    #[test]
    fn test_from_json_accepts_numeric_version() {
        let table =
            CredentialTable::from_json(br#"{"d": {"local_key": "k", "version": 3.4}}"#).unwrap();
        assert_eq!(table.get(&"d".into()).unwrap().version, ProtocolVersion::V34);
    }

    #[test]
    fn test_from_json_rejects_missing_local_key() {
        // Arrange
        let src = br#"{"d": {"name": "x", "version": "3.3"}}"#;

        // Act
        let err = CredentialTable::from_json(src).unwrap_err();

        // Assert
        assert!(matches!(
            err,
            ConfigError::MissingField { field: "local_key", .. }
        ));
    }

    #[test]
    fn test_from_json_rejects_missing_version() {
        let err = CredentialTable::from_json(br#"{"d": {"local_key": "k"}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { field: "version", .. }));
    }

    #[test]
    fn test_from_json_rejects_unknown_version() {
        let err =
            CredentialTable::from_json(br#"{"d": {"local_key": "k", "version": "2.0"}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidField { field: "version", .. }));
    }

    #[test]
    fn test_from_json_rejects_unknown_field() {
        let err = CredentialTable::from_json(
            br#"{"d": {"local_key": "k", "version": "3.3", "ip": "10.0.0.9"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Malformed(_)));
    }

    #[test]
    fn test_from_json_rejects_non_object_source() {
        let err = CredentialTable::from_json(b"[1, 2, 3]").unwrap_err();
        assert!(matches!(err, ConfigError::Malformed(_)));
    }

    #[test]
    fn test_from_json_rejects_truncated_json() {
        let err = CredentialTable::from_json(br#"{"d": {"local_key": "#).unwrap_err();
        assert!(matches!(err, ConfigError::Malformed(_)));
    }

    #[test]
    fn test_from_json_rejects_empty_identifier() {
        let err =
            CredentialTable::from_json(br#"{"": {"local_key": "k", "version": "3.3"}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyIdentifier));
    }

    #[test]
    fn test_from_json_rejects_empty_local_key() {
        let err =
            CredentialTable::from_json(br#"{"d": {"local_key": "", "version": "3.3"}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidField { field: "local_key", .. }));
    }

    #[test]
    fn test_validation_errors_never_contain_the_local_key() {
        // Arrange: a valid-looking key on an entry that fails on its version
        let src = br#"{"d": {"local_key": "topsecretvalue01", "version": "9.9"}}"#;

        // Act
        let msg = CredentialTable::from_json(src).unwrap_err().to_string();

        // Assert
        assert!(!msg.contains("topsecretvalue01"), "message leaked key: {msg}");
        assert!(msg.contains("version"));
    }

    #[test]
    fn test_non_string_local_key_is_rejected_without_echoing_it() {
        // Arrange: a numeric key, which serde would quote in a type error
        let src = br#"{"dev1": {"name": "Lamp", "local_key": 8837261544390012, "version": "3.3"}}"#;

        // Act
        let err = CredentialTable::from_json(src).unwrap_err();
        let msg = err.to_string();

        // Assert
        assert!(matches!(
            err,
            ConfigError::InvalidField { field: "local_key", .. }
        ));
        assert!(!msg.contains("8837261544390012"), "message leaked key: {msg}");
    }

    #[test]
    fn test_boolean_local_key_is_rejected() {
        let err = CredentialTable::from_json(br#"{"d": {"local_key": true, "version": "3.3"}}"#)
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidField { field: "local_key", .. }
        ));
    }

    #[test]
    fn test_data_errors_report_position_not_values() {
        // Arrange: a numeric name produces a serde type error
        let src = br#"{"d": {"name": 99887766, "local_key": "k", "version": "3.3"}}"#;

        // Act
        let err = CredentialTable::from_json(src).unwrap_err();
        let msg = err.to_string();

        // Assert
        assert!(matches!(err, ConfigError::Malformed(_)));
        assert!(!msg.contains("99887766"), "message leaked value: {msg}");
        assert!(msg.contains("line 1"));
    }

    #[test]
    fn test_duplicate_identifier_is_rejected() {
        // Arrange
        let src = br#"{
            "dev1": {"name": "Lamp", "local_key": "k1", "version": "3.3"},
            "dev1": {"name": "Lamp 2", "local_key": "k2", "version": "3.4"}
        }"#;

        // Act
        let err = CredentialTable::from_json(src).unwrap_err();

        // Assert
        assert!(matches!(err, ConfigError::DuplicateIdentifier(ref id) if id.as_str() == "dev1"));
        assert!(!err.to_string().contains("k2"));
    }

    #[test]
    fn test_empty_name_is_treated_as_absent() {
        let table = CredentialTable::from_json(
            br#"{"d": {"name": "", "local_key": "k", "version": "3.3"}}"#,
        )
        .unwrap();
        assert!(table.find_by_name("").is_none());
    }

    #[test]
    fn test_find_by_name_is_case_sensitive() {
        let table = CredentialTable::from_json(LAMP).unwrap();
        assert!(table.find_by_name("Lamp").is_some());
        assert!(table.find_by_name("lamp").is_none());
    }

    #[test]
    fn test_find_by_name_prefers_lowest_identifier_and_reports_duplicates() {
        // Arrange
        let table = CredentialTable::from_json(
            br#"{
                "zz": {"name": "Plug", "local_key": "k1", "version": "3.3"},
                "aa": {"name": "Plug", "local_key": "k2", "version": "3.4"}
            }"#,
        )
        .unwrap();

        // Act
        let found = table.find_by_name("Plug").unwrap();

        // Assert
        assert_eq!(found.id.as_str(), "aa");
        assert_eq!(table.duplicate_names(), vec!["Plug".to_string()]);
    }

    #[test]
    fn test_iter_yields_identifier_order() {
        let table = CredentialTable::from_json(
            br#"{
                "c": {"local_key": "k", "version": "3.3"},
                "a": {"local_key": "k", "version": "3.3"},
                "b": {"local_key": "k", "version": "3.3"}
            }"#,
        )
        .unwrap();
        let ids: Vec<&str> = table.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }
}
