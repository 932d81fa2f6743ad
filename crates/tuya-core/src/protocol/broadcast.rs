//! Discovery broadcast decoding and the protocol 3.5 probe request.
//!
//! # What a device sends (for beginners)
//!
//! Every few seconds an idle Tuya device broadcasts a small JSON document
//! describing itself:
//!
//! ```json
//! {"ip":"10.0.0.5","gwId":"bf12...","active":2,"encrypt":true,
//!  "productKey":"keyabc","version":"3.3"}
//! ```
//!
//! Depending on firmware the document is sent in plaintext inside a 55AA
//! frame, ECB-encrypted inside a 55AA frame, ECB-encrypted with no framing at
//! all, or GCM-encrypted inside a 6699 frame.  [`decode_broadcast`] accepts all
//! four and hands back the only facts the broker cares about: who, where, and
//! a little optional metadata.

use std::net::{IpAddr, Ipv4Addr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::crypto::{discovery_key, ecb_decrypt, GCM_IV_LEN};
use super::frame::{
    decode_55aa, decode_6699, encode_6699, prefix_of, FrameError, PREFIX_55AA, PREFIX_6699,
};
use crate::domain::device::DeviceId;
use crate::domain::presence::{PresenceMetadata, PresenceRecord};

/// Command word of the app-to-device "who is there" request (protocol 3.5).
pub const CMD_REQ_DEVINFO: u32 = 0x25;

/// UDP port that protocol 3.5 devices listen on for the probe request.
pub const PROBE_PORT: u16 = 7000;

/// One device announcement, decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Broadcast {
    pub id: DeviceId,
    pub address: IpAddr,
    pub metadata: PresenceMetadata,
}

impl Broadcast {
    /// Converts the announcement into a fresh presence record.
    pub fn into_presence(self, seen_at: DateTime<Utc>) -> PresenceRecord {
        PresenceRecord::new(self.id, self.address, seen_at).with_metadata(self.metadata)
    }
}

/// The subset of the broadcast document the broker reads.  Devices add
/// fields between firmware releases, so unknown keys are ignored here.
#[derive(Debug, Deserialize)]
struct RawBroadcast {
    #[serde(rename = "gwId")]
    gw_id: Option<String>,
    /// Older firmware sends `id`; some send both.
    id: Option<String>,
    ip: Option<String>,
    version: Option<String>,
    #[serde(rename = "productKey")]
    product_key: Option<String>,
    encrypt: Option<bool>,
}

#[derive(Serialize)]
struct ProbePayload<'a> {
    from: &'a str,
    ip: String,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Decodes one discovery datagram received from `source`.
///
/// The reported address is the `ip` field of the document when it parses,
/// otherwise `source`.
///
/// # Errors
///
/// Returns [`FrameError`] when the datagram cannot be unframed, decrypted, or
/// does not contain a non-empty device identifier.
pub fn decode_broadcast(datagram: &[u8], source: IpAddr) -> Result<Broadcast, FrameError> {
    let key = discovery_key();
    let document = match prefix_of(datagram) {
        Some(PREFIX_55AA) => {
            let frame = decode_55aa(datagram)?;
            if looks_like_json(&frame.payload) {
                frame.payload
            } else {
                ecb_decrypt(key, &frame.payload)?
            }
        }
        Some(PREFIX_6699) => decode_6699(datagram, key)?.payload,
        other => {
            trace!(prefix = ?other, %source, "no frame prefix, trying raw ECB");
            ecb_decrypt(key, datagram)?
        }
    };

    parse_document(&document, source)
}

/// Builds the 6699-framed probe that asks protocol 3.5 devices to announce
/// themselves immediately instead of waiting for their next broadcast.
///
/// # Errors
///
/// Returns [`FrameError::Crypto`] if encryption fails.
pub fn encode_discovery_request(
    local_ip: Ipv4Addr,
    seq: u32,
    iv: &[u8; GCM_IV_LEN],
) -> Result<Vec<u8>, FrameError> {
    let payload = serde_json::to_vec(&ProbePayload {
        from: "app",
        ip: local_ip.to_string(),
    })
    .map_err(|e| FrameError::MalformedPayload(e.to_string()))?;
    encode_6699(seq, CMD_REQ_DEVINFO, &payload, discovery_key(), iv)
}

// ── Private helpers ───────────────────────────────────────────────────────────

fn looks_like_json(payload: &[u8]) -> bool {
    payload.iter().find(|b| !b.is_ascii_whitespace()) == Some(&b'{')
}

fn parse_document(document: &[u8], source: IpAddr) -> Result<Broadcast, FrameError> {
    // Some firmware pads the document with NULs.
    let end = document
        .iter()
        .rposition(|&b| b != 0 && !b.is_ascii_whitespace())
        .map_or(0, |i| i + 1);

    let raw: RawBroadcast = serde_json::from_slice(&document[..end])
        .map_err(|e| FrameError::MalformedPayload(e.to_string()))?;

    let non_blank = |s: Option<String>| s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    let id = non_blank(raw.gw_id)
        .or_else(|| non_blank(raw.id))
        .ok_or_else(|| FrameError::MalformedPayload("missing device identifier".to_string()))?;

    let address = raw
        .ip
        .as_deref()
        .and_then(|ip| ip.trim().parse::<IpAddr>().ok())
        .unwrap_or(source);

    Ok(Broadcast {
        id: DeviceId::new(id),
        address,
        metadata: PresenceMetadata {
            advertised_version: raw.version,
            product_key: raw.product_key,
            encrypted: raw.encrypt,
        },
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
