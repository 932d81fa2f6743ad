//! CredentialStore: holds the operator's credential table and swaps it on
//! reload.
//!
//! # Reload semantics
//!
//! A reload reads and validates the whole source first.  Only a fully valid
//! table replaces the current one; on any [`ConfigError`] the previous table
//! stays in service and the error is remembered for the status report.
//!
//! Readers take an `Arc` clone of the current snapshot and never hold the
//! lock while they work with it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{info, warn};
use tuya_core::{ConfigError, CredentialTable};

/// Where credential tables come from.
///
/// The production implementation reads a JSON file; tests supply tables from
/// memory.
pub trait CredentialSource: Send + Sync {
    /// Reads and validates the full table.
    fn load(&self) -> Result<CredentialTable, ConfigError>;

    /// Human-readable origin for log lines, e.g. the file path.
    fn describe(&self) -> String;
}

/// One loaded credential table.
#[derive(Debug)]
pub struct CredentialSnapshot {
    pub table: CredentialTable,
    pub loaded_at: DateTime<Utc>,
}

#[derive(Debug)]
struct StoreState {
    snapshot: Arc<CredentialSnapshot>,
    last_reload_error: Option<String>,
}

/// The live credential table.
pub struct CredentialStore {
    source: Arc<dyn CredentialSource>,
    state: RwLock<StoreState>,
}

impl CredentialStore {
    /// Loads the initial table.  Failure here is fatal to startup.
    ///
    /// # Errors
    ///
    /// Returns the [`ConfigError`] produced by the source.
    pub fn load(source: Arc<dyn CredentialSource>) -> Result<Self, ConfigError> {
        let table = source.load()?;
        log_loaded(source.as_ref(), &table);
        Ok(Self {
            source,
            state: RwLock::new(StoreState {
                snapshot: Arc::new(CredentialSnapshot {
                    table,
                    loaded_at: Utc::now(),
                }),
                last_reload_error: None,
            }),
        })
    }

    /// Re-reads the source and swaps in the new table if it validates.
    ///
    /// Returns the number of devices in the new table.
    ///
    /// # Errors
    ///
    /// Returns the [`ConfigError`]; the previous table remains current.
    pub fn reload(&self) -> Result<usize, ConfigError> {
        match self.source.load() {
            Ok(table) => {
                log_loaded(self.source.as_ref(), &table);
                let count = table.len();
                let snapshot = Arc::new(CredentialSnapshot {
                    table,
                    loaded_at: Utc::now(),
                });
                let mut state = self.state.write();
                state.snapshot = snapshot;
                state.last_reload_error = None;
                Ok(count)
            }
            Err(e) => {
                warn!(
                    source = %self.source.describe(),
                    error = %e,
                    "credential reload rejected; keeping previous table"
                );
                self.state.write().last_reload_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Returns the current table.  Cheap: one `Arc` clone.
    pub fn snapshot(&self) -> Arc<CredentialSnapshot> {
        Arc::clone(&self.state.read().snapshot)
    }

    /// Message of the most recent failed reload, cleared by a successful one.
    pub fn last_reload_error(&self) -> Option<String> {
        self.state.read().last_reload_error.clone()
    }
}

fn log_loaded(source: &dyn CredentialSource, table: &CredentialTable) {
    info!(
        source = %source.describe(),
        devices = table.len(),
        "credential table loaded"
    );
    for name in table.duplicate_names() {
        warn!(name = %name, "friendly name used by more than one device; name lookup picks the lowest identifier");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
