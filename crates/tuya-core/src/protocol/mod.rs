//! LAN discovery wire format.
//!
//! - [`frame`] – the 55AA and 6699 binary framings and CRC-32.
//! - [`crypto`] – the shared discovery key and the two AES modes.
//! - [`broadcast`] – turning one datagram into a [`broadcast::Broadcast`],
//!   and building the protocol 3.5 probe request.

pub mod broadcast;
pub mod crypto;
pub mod frame;

pub use broadcast::{decode_broadcast, encode_discovery_request, Broadcast};
pub use frame::FrameError;
