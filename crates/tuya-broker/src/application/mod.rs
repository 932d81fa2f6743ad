//! Application layer for tuya-broker.
//!
//! The application layer knows *what* the broker does: keep the presence
//! table current, swap credential tables safely, and answer lookups.  It
//! delegates *how* (UDP sockets, files, HTTP) to the infrastructure layer
//! through two traits:
//!
//! - [`Scanner`]: one discovery pass over the LAN.
//! - [`CredentialSource`]: one read of the credential table.
//!
//! # What does NOT belong here?
//!
//! - Binding sockets or reading files (infrastructure)
//! - HTTP status codes or JSON shapes (infrastructure::http_api)

pub mod credential_store;
pub mod directory;
pub mod discovery_cache;
pub mod scan_cycle;

pub use credential_store::{CredentialSnapshot, CredentialSource, CredentialStore};
pub use directory::{DeviceDirectory, LookupError, StatusReport};
pub use discovery_cache::{DiscoveryCache, PresenceSnapshot};
pub use scan_cycle::{
    CycleOutcome, ScanControl, ScanError, ScanRequestError, ScanScheduler, Scanner,
};
