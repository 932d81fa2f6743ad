//! # tuya-core
//!
//! Shared library for the Tuya local broker containing the device domain
//! types, the credential table loader, the presence/credential join, and the
//! codec for the UDP discovery broadcasts that Tuya devices send on the LAN.
//!
//! This crate has no dependencies on sockets, async runtimes, or the HTTP
//! stack.  It is used by the `tuya-broker` service and by its tests.
//!
//! # Architecture overview (for beginners)
//!
//! Tuya Wi-Fi devices are addressed by a stable *device identifier* (the
//! `gwId`), but their IP address is handed out by DHCP and can change at any
//! time.  To talk to a device locally you need three things: its current
//! address, its *local key* (a per-device shared secret), and the protocol
//! version it speaks.  The broker keeps the first one fresh by listening to
//! discovery broadcasts, and reads the other two from an operator-supplied
//! credential file.
//!
//! - **`domain`** – Pure types: identifiers, protocol versions, the secret
//!   local key, the credential table, presence records, and the merged
//!   [`DeviceView`] that is the only object exposed to API clients.
//!
//! - **`protocol`** – How discovery datagrams look on the wire.  Devices
//!   broadcast a small JSON document, either in plaintext or encrypted with a
//!   well-known key, wrapped in one of two binary framings.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `tuya_core::DeviceView` instead of `tuya_core::domain::presence::DeviceView`.
pub use domain::credentials::{ConfigError, CredentialRecord, CredentialTable};
pub use domain::device::{DeviceId, LocalKey, ProtocolVersion, UnknownVersion};
pub use domain::presence::{merge_all, DeviceView, PresenceMetadata, PresenceRecord};
pub use protocol::broadcast::{decode_broadcast, encode_discovery_request, Broadcast};
pub use protocol::frame::FrameError;
