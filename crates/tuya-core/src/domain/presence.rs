//! Presence records and the read-time credential join.
//!
//! A [`PresenceRecord`] says "device X answered from address Y at time T".
//! Presence records are produced only by a network scan and the whole set is
//! replaced on every successful scan.
//!
//! A [`DeviceView`] is the join of the credential table and the presence set
//! on the device identifier.  It is the only object exposed to API clients
//! and is computed on demand, never stored.
//!
//! # Fresh, stale, absent
//!
//! ```text
//! credential  presence            view
//! ──────────  ──────────────────  ─────────────────────────────────────────
//! yes         none                configured, address = None, fresh = false
//! yes/no      seen, recent        address = Some, fresh = true
//! yes/no      retained (grace)    address = Some, stale = true, fresh = false
//! yes/no      seen, too old       address = Some, fresh = false
//! no          none                no view at all (lookup is NotFound)
//! ```
//!
//! An address is never invented: a configured device that has not been seen
//! is reported as unreachable with no address.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::credentials::{CredentialRecord, CredentialTable};
use super::device::{DeviceId, LocalKey, ProtocolVersion};

/// Optional facts a device reports in its discovery broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceMetadata {
    /// Version string the device advertised, verbatim.
    pub advertised_version: Option<String>,
    /// Tuya product key, identifies the device model.
    pub product_key: Option<String>,
    /// Whether the device reports that its local session is encrypted.
    pub encrypted: Option<bool>,
}

/// Where and when a device was last observed on the local network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceRecord {
    pub id: DeviceId,
    pub address: IpAddr,
    pub last_seen: DateTime<Utc>,
    pub metadata: PresenceMetadata,
    /// `true` when the record was carried over from an earlier scan during
    /// the grace period instead of being observed by the latest one.
    pub stale: bool,
}

impl PresenceRecord {
    /// Creates a fresh record with no metadata.
    pub fn new(id: DeviceId, address: IpAddr, last_seen: DateTime<Utc>) -> Self {
        Self {
            id,
            address,
            last_seen,
            metadata: PresenceMetadata::default(),
            stale: false,
        }
    }

    /// Attaches broadcast metadata.
    pub fn with_metadata(mut self, metadata: PresenceMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Returns this record tagged as retained-but-not-observed.
    pub fn into_stale(mut self) -> Self {
        self.stale = true;
        self
    }

    /// Time elapsed since the device was seen.  Clock skew (a `last_seen`
    /// in the future) counts as zero.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.last_seen)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// A record is fresh when it came from the latest scan and is younger
    /// than `stale_after`.
    pub fn is_fresh(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        !self.stale && self.age(now) <= stale_after
    }
}

/// Read-time join of a credential record and a presence record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceView {
    pub id: DeviceId,
    pub name: Option<String>,
    /// Configured version, or the advertised one for unconfigured devices.
    pub version: Option<ProtocolVersion>,
    pub local_key: Option<LocalKey>,
    /// A credential entry exists for this device.
    pub configured: bool,
    /// Current address; `None` when the device is not present.
    pub address: Option<IpAddr>,
    pub last_seen: Option<DateTime<Utc>>,
    pub fresh: bool,
    pub stale: bool,
    pub product_key: Option<String>,
}

impl DeviceView {
    /// Joins the two records for one identifier.
    ///
    /// Returns `None` when neither record exists.
    pub fn merge(
        id: &DeviceId,
        credential: Option<&CredentialRecord>,
        presence: Option<&PresenceRecord>,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Option<Self> {
        if credential.is_none() && presence.is_none() {
            return None;
        }

        let advertised = presence
            .and_then(|p| p.metadata.advertised_version.as_deref())
            .and_then(|v| v.parse::<ProtocolVersion>().ok());

        Some(Self {
            id: id.clone(),
            name: credential.and_then(|c| c.name.clone()),
            version: credential.map(|c| c.version).or(advertised),
            local_key: credential.map(|c| c.local_key.clone()),
            configured: credential.is_some(),
            address: presence.map(|p| p.address),
            last_seen: presence.map(|p| p.last_seen),
            fresh: presence.is_some_and(|p| p.is_fresh(now, stale_after)),
            stale: presence.is_some_and(|p| p.stale),
            product_key: presence.and_then(|p| p.metadata.product_key.clone()),
        })
    }

    /// Returns `true` when the device has a known address.
    pub fn is_present(&self) -> bool {
        self.address.is_some()
    }
}

/// Joins every configured and every present device, ordered by identifier.
pub fn merge_all(
    credentials: &CredentialTable,
    presence: &BTreeMap<DeviceId, PresenceRecord>,
    now: DateTime<Utc>,
    stale_after: Duration,
) -> Vec<DeviceView> {
    let ids: BTreeSet<&DeviceId> = credentials
        .iter()
        .map(|r| &r.id)
        .chain(presence.keys())
        .collect();

    ids.into_iter()
        .filter_map(|id| {
            DeviceView::merge(id, credentials.get(id), presence.get(id), now, stale_after)
        })
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
