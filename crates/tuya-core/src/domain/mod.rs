//! Domain entities for the Tuya local broker.
//!
//! This module contains pure business logic with no infrastructure
//! dependencies: no sockets, no file system, no async runtime.
//!
//! # The three tables (for beginners)
//!
//! Every table in the broker is keyed by the same stable [`device::DeviceId`]:
//!
//! - The **credential table** ([`credentials::CredentialTable`]) is written by
//!   the operator and tells us a device's friendly name, local key, and
//!   protocol version.  It only changes on an explicit reload.
//! - The **presence table** is a set of [`presence::PresenceRecord`]s produced
//!   by a network scan.  It says where a device was last seen.
//! - The **view** ([`presence::DeviceView`]) joins the two at read time.  It is
//!   never stored; every request computes it from the latest snapshots.

/// Identifiers, protocol versions, and the secret local key.
pub mod device;

/// The operator-supplied credential table and its JSON loader.
pub mod credentials;

/// Presence records and the read-time join with credentials.
pub mod presence;
