//! Binary framings that wrap Tuya discovery payloads.
//!
//! Two framings are seen on the discovery ports.
//!
//! The classic **55AA** frame (protocol 3.1 – 3.4):
//! ```text
//! [prefix:4=0x000055AA][seq:4][cmd:4][len:4][retcode:4?][payload:N][crc32:4][suffix:4=0x0000AA55]
//! ```
//! `len` counts everything after the length field (retcode, payload, CRC, and
//! suffix).  The retcode is only present in device-to-app frames; it is
//! detected by its upper 24 bits being zero, which a JSON or ciphertext
//! payload never starts with in practice.  The CRC-32 (IEEE) covers the
//! prefix through the end of the payload.
//!
//! The **6699** frame (protocol 3.5):
//! ```text
//! [prefix:4=0x00006699][reserved:2][seq:4][cmd:4][len:4][iv:12][ciphertext:N][tag:16][suffix:4=0x00009966]
//! ```
//! `len` counts IV, ciphertext, and tag.  The payload is AES-128-GCM
//! encrypted and the 14 header bytes after the prefix are the associated data.
//!
//! All integers are big-endian.

use thiserror::Error;

use super::crypto::{gcm_decrypt, gcm_encrypt, GCM_IV_LEN, GCM_TAG_LEN};

/// First word of a 55AA frame.
pub const PREFIX_55AA: u32 = 0x0000_55AA;
/// Last word of a 55AA frame.
pub const SUFFIX_55AA: u32 = 0x0000_AA55;
/// First word of a 6699 frame.
pub const PREFIX_6699: u32 = 0x0000_6699;
/// Last word of a 6699 frame.
pub const SUFFIX_6699: u32 = 0x0000_9966;

/// Prefix, seq, cmd, len.
pub const HEADER_55AA_LEN: usize = 16;
/// Prefix, reserved, seq, cmd, len.
pub const HEADER_6699_LEN: usize = 18;
/// CRC plus suffix.
const TRAILER_55AA_LEN: usize = 8;
const SUFFIX_LEN: usize = 4;

/// Errors that can occur while decoding or encoding a discovery frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The byte slice is shorter than the minimum frame size.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The first word is not a recognised frame prefix.
    #[error("unknown frame prefix: 0x{0:08X}")]
    UnknownPrefix(u32),

    /// The length field does not agree with the bytes received.
    #[error("frame length mismatch: header says {declared}, available is {available}")]
    LengthMismatch { declared: usize, available: usize },

    /// The frame does not end with the expected suffix word.
    #[error("bad frame suffix: 0x{0:08X}")]
    BadSuffix(u32),

    /// The CRC-32 of the frame does not match the transmitted value.
    #[error("CRC mismatch: frame carries 0x{expected:08X}, computed 0x{computed:08X}")]
    CrcMismatch { expected: u32, computed: u32 },

    /// Decryption or encryption failed.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// The decoded payload is not a usable discovery document.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

/// Which framing a decoded frame arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Classic55AA,
    Gcm6699,
}

/// A decoded frame.  For 6699 frames `payload` is already decrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub framing: Framing,
    pub seq: u32,
    pub cmd: u32,
    pub retcode: Option<u32>,
    pub payload: Vec<u8>,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Reads the first big-endian word, if there are at least four bytes.
pub fn prefix_of(bytes: &[u8]) -> Option<u32> {
    read_u32(bytes, 0)
}

/// Decodes a 55AA frame.  The payload is returned as carried, which for
/// protocol 3.2+ broadcasts is still ECB ciphertext.
///
/// # Errors
///
/// Returns [`FrameError`] if the frame is truncated, has the wrong prefix or
/// suffix, or fails its CRC check.
pub fn decode_55aa(bytes: &[u8]) -> Result<Frame, FrameError> {
    let min = HEADER_55AA_LEN + TRAILER_55AA_LEN;
    if bytes.len() < min {
        return Err(FrameError::InsufficientData {
            needed: min,
            available: bytes.len(),
        });
    }

    let prefix = word(bytes, 0);
    if prefix != PREFIX_55AA {
        return Err(FrameError::UnknownPrefix(prefix));
    }

    let seq = word(bytes, 4);
    let cmd = word(bytes, 8);
    let declared = word(bytes, 12) as usize;
    let available = bytes.len() - HEADER_55AA_LEN;
    if declared < TRAILER_55AA_LEN || declared > available {
        return Err(FrameError::LengthMismatch {
            declared,
            available,
        });
    }

    let end = HEADER_55AA_LEN + declared;
    let suffix = word(bytes, end - SUFFIX_LEN);
    if suffix != SUFFIX_55AA {
        return Err(FrameError::BadSuffix(suffix));
    }

    let crc_at = end - TRAILER_55AA_LEN;
    let expected = word(bytes, crc_at);
    let computed = crc32(&bytes[..crc_at]);
    if expected != computed {
        return Err(FrameError::CrcMismatch { expected, computed });
    }

    let (retcode, payload) = split_retcode(&bytes[HEADER_55AA_LEN..crc_at]);
    Ok(Frame {
        framing: Framing::Classic55AA,
        seq,
        cmd,
        retcode,
        payload: payload.to_vec(),
    })
}

/// Encodes a 55AA frame around `payload`.
pub fn encode_55aa(seq: u32, cmd: u32, retcode: Option<u32>, payload: &[u8]) -> Vec<u8> {
    let retcode_len = if retcode.is_some() { 4 } else { 0 };
    let declared = retcode_len + payload.len() + TRAILER_55AA_LEN;

    let mut buf = Vec::with_capacity(HEADER_55AA_LEN + declared);
    buf.extend_from_slice(&PREFIX_55AA.to_be_bytes());
    buf.extend_from_slice(&seq.to_be_bytes());
    buf.extend_from_slice(&cmd.to_be_bytes());
    buf.extend_from_slice(&(declared as u32).to_be_bytes());
    if let Some(code) = retcode {
        buf.extend_from_slice(&code.to_be_bytes());
    }
    buf.extend_from_slice(payload);
    let crc = crc32(&buf);
    buf.extend_from_slice(&crc.to_be_bytes());
    buf.extend_from_slice(&SUFFIX_55AA.to_be_bytes());
    buf
}

/// Decodes and decrypts a 6699 frame.
///
/// # Errors
///
/// Returns [`FrameError`] if the frame is truncated, has the wrong prefix or
/// suffix, or the GCM tag does not verify under `key`.
pub fn decode_6699(bytes: &[u8], key: &[u8; 16]) -> Result<Frame, FrameError> {
    let min = HEADER_6699_LEN + GCM_IV_LEN + GCM_TAG_LEN + SUFFIX_LEN;
    if bytes.len() < min {
        return Err(FrameError::InsufficientData {
            needed: min,
            available: bytes.len(),
        });
    }

    let prefix = word(bytes, 0);
    if prefix != PREFIX_6699 {
        return Err(FrameError::UnknownPrefix(prefix));
    }

    let seq = word(bytes, 6);
    let cmd = word(bytes, 10);
    let declared = word(bytes, 14) as usize;
    let available = bytes.len() - HEADER_6699_LEN - SUFFIX_LEN;
    if declared < GCM_IV_LEN + GCM_TAG_LEN || declared > available {
        return Err(FrameError::LengthMismatch {
            declared,
            available,
        });
    }

    let body_end = HEADER_6699_LEN + declared;
    let suffix = word(bytes, body_end);
    if suffix != SUFFIX_6699 {
        return Err(FrameError::BadSuffix(suffix));
    }

    let iv = &bytes[HEADER_6699_LEN..HEADER_6699_LEN + GCM_IV_LEN];
    let sealed = &bytes[HEADER_6699_LEN + GCM_IV_LEN..body_end];
    let aad = &bytes[4..HEADER_6699_LEN];
    let plain = gcm_decrypt(key, iv, sealed, aad)?;

    let (retcode, payload) = split_retcode(&plain);
    Ok(Frame {
        framing: Framing::Gcm6699,
        seq,
        cmd,
        retcode,
        payload: payload.to_vec(),
    })
}

/// Encrypts `payload` under `key` and wraps it in a 6699 frame.
///
/// `iv` must not repeat for the same key; callers derive it from a clock and
/// a sequence number.
///
/// # Errors
///
/// Returns [`FrameError::Crypto`] if encryption fails.
pub fn encode_6699(
    seq: u32,
    cmd: u32,
    payload: &[u8],
    key: &[u8; 16],
    iv: &[u8; GCM_IV_LEN],
) -> Result<Vec<u8>, FrameError> {
    let declared = GCM_IV_LEN + payload.len() + GCM_TAG_LEN;

    let mut buf = Vec::with_capacity(HEADER_6699_LEN + declared + SUFFIX_LEN);
    buf.extend_from_slice(&PREFIX_6699.to_be_bytes());
    buf.extend_from_slice(&0u16.to_be_bytes()); // reserved
    buf.extend_from_slice(&seq.to_be_bytes());
    buf.extend_from_slice(&cmd.to_be_bytes());
    buf.extend_from_slice(&(declared as u32).to_be_bytes());

    let sealed = gcm_encrypt(key, iv, payload, &buf[4..HEADER_6699_LEN])?;
    buf.extend_from_slice(iv);
    buf.extend_from_slice(&sealed);
    buf.extend_from_slice(&SUFFIX_6699.to_be_bytes());
    Ok(buf)
}

// ── CRC-32 ────────────────────────────────────────────────────────────────────

/// CRC-32 (IEEE 802.3) over `data`, as carried in the 55AA trailer.
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

// ── Private helpers ───────────────────────────────────────────────────────────

fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    let chunk: [u8; 4] = bytes.get(at..at + 4)?.try_into().ok()?;
    Some(u32::from_be_bytes(chunk))
}

/// Callers have already bounds-checked `at`.
fn word(bytes: &[u8], at: usize) -> u32 {
    read_u32(bytes, at).unwrap_or(0)
}

fn split_retcode(body: &[u8]) -> (Option<u32>, &[u8]) {
    match read_u32(body, 0) {
        Some(code) if code & 0xFFFF_FF00 == 0 => (Some(code), &body[4..]),
        _ => (None, body),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::crypto::discovery_key;

    #[test]
    fn test_crc32_matches_standard_check_value() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(crc32(b""), 0);
    }

    #[test]
    fn test_decode_55aa_plaintext_frame() {
        // Arrange
        let payload = br#"{"gwId":"dev1","ip":"10.0.0.5"}"#;
        let bytes = encode_55aa(7, 0x12, Some(0), payload);

        // Act
        let frame = decode_55aa(&bytes).expect("decode");

        // Assert
        assert_eq!(frame.framing, Framing::Classic55AA);
        assert_eq!(frame.seq, 7);
        assert_eq!(frame.cmd, 0x12);
        assert_eq!(frame.retcode, Some(0));
        assert_eq!(frame.payload, payload);
    }

    #[test]
    fn test_decode_55aa_without_retcode_keeps_json_intact() {
        let payload = br#"{"gwId":"dev1"}"#;
        let frame = decode_55aa(&encode_55aa(1, 0x12, None, payload)).unwrap();
        assert_eq!(frame.retcode, None);
        assert_eq!(frame.payload, payload);
    }

    #[test]
    fn test_decode_55aa_ignores_trailing_bytes() {
        let mut bytes = encode_55aa(1, 0x13, None, b"{}");
        bytes.extend_from_slice(&[0xFF; 5]);
        assert_eq!(decode_55aa(&bytes).unwrap().payload, b"{}");
    }

    #[test]
    fn test_decode_55aa_rejects_corrupted_crc() {
        // Arrange
        let mut bytes = encode_55aa(1, 0x12, None, br#"{"gwId":"x"}"#);
        bytes[HEADER_55AA_LEN] ^= 0x01;

        // Act
        let result = decode_55aa(&bytes);

        // Assert
        assert!(matches!(result, Err(FrameError::CrcMismatch { .. })));
    }

    #[test]
    fn test_decode_55aa_rejects_bad_suffix() {
        let mut bytes = encode_55aa(1, 0x12, None, b"{}");
        let last = bytes.len() - 1;
        bytes[last] = 0x00;
        assert!(matches!(decode_55aa(&bytes), Err(FrameError::BadSuffix(_))));
    }

    #[test]
    fn test_decode_55aa_rejects_truncated_frame() {
        let bytes = encode_55aa(1, 0x12, None, b"{\"gwId\":\"abc\"}");
        let result = decode_55aa(&bytes[..bytes.len() - 6]);
        assert!(matches!(result, Err(FrameError::LengthMismatch { .. })));
    }

    #[test]
    fn test_decode_55aa_rejects_short_input() {
        let result = decode_55aa(&[0x00, 0x00, 0x55, 0xAA]);
        assert_eq!(
            result,
            Err(FrameError::InsufficientData {
                needed: 24,
                available: 4
            })
        );
    }

    #[test]
    fn test_decode_55aa_rejects_wrong_prefix() {
        let mut bytes = encode_55aa(1, 0x12, None, b"{}");
        bytes[3] = 0x99;
        assert!(matches!(decode_55aa(&bytes), Err(FrameError::UnknownPrefix(_))));
    }

    #[test]
    fn test_decode_6699_decrypts_payload() {
        // Arrange
        let key = discovery_key();
        let iv = [3u8; GCM_IV_LEN];
        let bytes = encode_6699(9, 0x13, br#"{"gwId":"dev35"}"#, key, &iv).unwrap();

        // Act
        let frame = decode_6699(&bytes, key).expect("decode");

        // Assert
        assert_eq!(frame.framing, Framing::Gcm6699);
        assert_eq!(frame.seq, 9);
        assert_eq!(frame.cmd, 0x13);
        assert_eq!(frame.retcode, None);
        assert_eq!(frame.payload, br#"{"gwId":"dev35"}"#);
    }

    #[test]
    fn test_decode_6699_detects_header_tampering() {
        let key = discovery_key();
        let mut bytes = encode_6699(9, 0x13, b"{}", key, &[1u8; GCM_IV_LEN]).unwrap();
        // Flip a bit in the cmd field, which is covered by the AAD.
        bytes[13] ^= 0x01;
        assert!(matches!(decode_6699(&bytes, key), Err(FrameError::Crypto(_))));
    }

    #[test]
    fn test_decode_6699_rejects_bad_suffix() {
        let key = discovery_key();
        let mut bytes = encode_6699(1, 0x13, b"{}", key, &[1u8; GCM_IV_LEN]).unwrap();
        let last = bytes.len() - 1;
        bytes[last] = 0x00;
        assert!(matches!(decode_6699(&bytes, key), Err(FrameError::BadSuffix(_))));
    }

    #[test]
    fn test_prefix_of_short_input_is_none() {
        assert_eq!(prefix_of(&[0x00, 0x00]), None);
        assert_eq!(prefix_of(&PREFIX_6699.to_be_bytes()), Some(PREFIX_6699));
    }
}
