//! DeviceDirectory: the read side.  Joins the latest presence snapshot with
//! the latest credential snapshot on every call.
//!
//! Every operation here is read-only and idempotent.  None of them waits for
//! a scan: they work on whatever snapshots were current when they started.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tuya_core::{merge_all, DeviceId, DeviceView};

use super::credential_store::CredentialStore;
use super::discovery_cache::DiscoveryCache;
use super::scan_cycle::ScanControl;

/// A lookup key matched nothing.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("no device with identifier or name '{0}'")]
    NotFound(String),
}

/// Health summary for monitoring and for clients deciding whether to trust
/// returned addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub last_scan_at: Option<DateTime<Utc>>,
    pub last_scan_error: Option<String>,
    pub last_scan_duration: Option<Duration>,
    pub scanning: bool,
    pub scans_completed: u64,
    pub scans_failed: u64,
    /// Devices with a known address.
    pub present_count: usize,
    /// Devices in the credential table.
    pub configured_count: usize,
    /// Configured ∪ present.
    pub device_count: usize,
    pub credentials_loaded_at: DateTime<Utc>,
    pub last_reload_error: Option<String>,
}

/// Read-only lookups over the discovery cache and the credential store.
pub struct DeviceDirectory {
    credentials: Arc<CredentialStore>,
    cache: Arc<DiscoveryCache>,
    control: Arc<ScanControl>,
    stale_after: Duration,
}

impl DeviceDirectory {
    pub fn new(
        credentials: Arc<CredentialStore>,
        cache: Arc<DiscoveryCache>,
        control: Arc<ScanControl>,
        stale_after: Duration,
    ) -> Self {
        Self {
            credentials,
            cache,
            control,
            stale_after,
        }
    }

    /// Every configured or present device, ordered by identifier.
    pub fn list_devices(&self) -> Vec<DeviceView> {
        self.list_devices_at(Utc::now())
    }

    /// [`list_devices`](Self::list_devices) with an explicit clock.
    pub fn list_devices_at(&self, now: DateTime<Utc>) -> Vec<DeviceView> {
        let credentials = self.credentials.snapshot();
        let presence = self.cache.snapshot();
        merge_all(&credentials.table, &presence.devices, now, self.stale_after)
    }

    /// Looks a device up by identifier, then by exact friendly name.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::NotFound`] when neither a credential entry nor a
    /// presence entry matches `key`.
    pub fn get_device(&self, key: &str) -> Result<DeviceView, LookupError> {
        self.get_device_at(key, Utc::now())
    }

    /// [`get_device`](Self::get_device) with an explicit clock.
    pub fn get_device_at(&self, key: &str, now: DateTime<Utc>) -> Result<DeviceView, LookupError> {
        let credentials = self.credentials.snapshot();
        let presence = self.cache.snapshot();
        let table = &credentials.table;

        let by_id = DeviceId::from(key);
        let id = if table.get(&by_id).is_some() || presence.devices.contains_key(&by_id) {
            by_id
        } else {
            table
                .find_by_name(key)
                .map(|record| record.id.clone())
                .ok_or_else(|| LookupError::NotFound(key.to_string()))?
        };

        DeviceView::merge(
            &id,
            table.get(&id),
            presence.devices.get(&id),
            now,
            self.stale_after,
        )
        .ok_or_else(|| LookupError::NotFound(key.to_string()))
    }

    /// Current health summary.
    pub fn status(&self) -> StatusReport {
        let credentials = self.credentials.snapshot();
        let presence = self.cache.snapshot();

        let configured_count = credentials.table.len();
        let unconfigured_present = presence
            .devices
            .keys()
            .filter(|id| credentials.table.get(id).is_none())
            .count();

        StatusReport {
            last_scan_at: presence.last_scan_at,
            last_scan_error: presence.last_scan_error.as_ref().map(ToString::to_string),
            last_scan_duration: presence.last_scan_duration,
            scanning: self.control.is_running(),
            scans_completed: presence.scans_completed,
            scans_failed: presence.scans_failed,
            present_count: presence.present_count(),
            configured_count,
            device_count: configured_count + unconfigured_present,
            credentials_loaded_at: credentials.loaded_at,
            last_reload_error: self.credentials.last_reload_error(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
