//! DiscoveryCache: the presence table and the outcome of the last scan.
//!
//! # State machine
//!
//! ```text
//!                 scan ok                         scan failed / timed out
//!  ┌──────────┐ ───────────────► devices  := observed (+ retained, if grace)
//!  │ snapshot │                  last_scan_at := now, last_scan_error := none
//!  └──────────┘ ───────────────► devices, last_scan_at unchanged
//!                                last_scan_error := error
//! ```
//!
//! The whole state is one immutable [`PresenceSnapshot`] behind an `Arc`.
//! A transition builds the next snapshot and swaps the pointer under a write
//! lock; a reader clones the pointer under a read lock.  A reader therefore
//! sees either the complete old snapshot or the complete new one.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;
use tuya_core::{DeviceId, PresenceRecord};

use super::scan_cycle::ScanError;
use crate::domain::StalenessPolicy;

/// Immutable view of the cache at one instant.
#[derive(Debug, Clone, Default)]
pub struct PresenceSnapshot {
    /// Devices from the most recent successful scan, plus retained stale
    /// records when a grace period is configured.
    pub devices: Arc<BTreeMap<DeviceId, PresenceRecord>>,
    /// Completion time of the most recent successful scan.
    pub last_scan_at: Option<DateTime<Utc>>,
    /// Error of the most recent scan, `None` once a scan succeeds.
    pub last_scan_error: Option<ScanError>,
    /// Duration of the most recent scan attempt, successful or not.
    pub last_scan_duration: Option<Duration>,
    pub scans_completed: u64,
    pub scans_failed: u64,
}

impl PresenceSnapshot {
    /// Number of devices with a known address (fresh or retained).
    pub fn present_count(&self) -> usize {
        self.devices.len()
    }
}

/// Shared presence state.  One writer (the scan scheduler), many readers.
pub struct DiscoveryCache {
    state: RwLock<Arc<PresenceSnapshot>>,
    policy: StalenessPolicy,
}

impl DiscoveryCache {
    /// Creates an empty cache: no devices, never scanned.
    pub fn new(policy: StalenessPolicy) -> Self {
        Self {
            state: RwLock::new(Arc::new(PresenceSnapshot::default())),
            policy,
        }
    }

    pub fn policy(&self) -> StalenessPolicy {
        self.policy
    }

    /// Returns the current snapshot.  Never waits for a scan.
    pub fn snapshot(&self) -> Arc<PresenceSnapshot> {
        Arc::clone(&self.state.read())
    }

    /// Replaces the presence table with the result of a successful scan.
    ///
    /// With [`StalenessPolicy::DropMissing`] the new table contains exactly
    /// the observed identifiers.  With [`StalenessPolicy::RetainFor`] a
    /// device missing from this scan keeps its last record, tagged stale,
    /// until its `last_seen` is older than the grace period.
    pub fn apply_success(
        &self,
        observed: Vec<PresenceRecord>,
        completed_at: DateTime<Utc>,
        duration: Duration,
    ) {
        let mut devices: BTreeMap<DeviceId, PresenceRecord> = BTreeMap::new();
        for record in observed {
            // A device may answer on several ports in one window; keep the
            // latest sighting.
            match devices.get(&record.id) {
                Some(existing) if existing.last_seen > record.last_seen => {}
                _ => {
                    devices.insert(record.id.clone(), record);
                }
            }
        }

        let mut state = self.state.write();
        let previous = Arc::clone(&state);

        if let StalenessPolicy::RetainFor(grace) = self.policy {
            for (id, old) in previous.devices.iter() {
                if devices.contains_key(id) {
                    continue;
                }
                if old.age(completed_at) <= grace {
                    devices.insert(id.clone(), old.clone().into_stale());
                } else {
                    debug!(device = %id, "grace period expired; dropping presence");
                }
            }
        }

        *state = Arc::new(PresenceSnapshot {
            devices: Arc::new(devices),
            last_scan_at: Some(completed_at),
            last_scan_error: None,
            last_scan_duration: Some(duration),
            scans_completed: previous.scans_completed + 1,
            scans_failed: previous.scans_failed,
        });
    }

    /// Records a failed scan.  The presence table and `last_scan_at` are
    /// left untouched.
    pub fn record_failure(&self, error: ScanError, duration: Duration) {
        let mut state = self.state.write();
        let previous = Arc::clone(&state);
        *state = Arc::new(PresenceSnapshot {
            devices: Arc::clone(&previous.devices),
            last_scan_at: previous.last_scan_at,
            last_scan_error: Some(error),
            last_scan_duration: Some(duration),
            scans_completed: previous.scans_completed,
            scans_failed: previous.scans_failed + 1,
        });
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
