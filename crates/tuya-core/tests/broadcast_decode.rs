//! Integration tests for the tuya-core discovery codec.
//!
//! These tests build datagrams the way devices of each protocol generation
//! send them and check that [`decode_broadcast`] yields a presence record
//! that joins with the credential table.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tuya_core::protocol::crypto::{discovery_key, ecb_encrypt, GCM_IV_LEN};
use tuya_core::protocol::frame::{encode_55aa, encode_6699};
use tuya_core::{decode_broadcast, merge_all, CredentialTable, DeviceId, FrameError, ProtocolVersion};

const STALE_AFTER: Duration = Duration::from_secs(180);

fn source() -> IpAddr {
    "10.0.0.250".parse().unwrap()
}

fn document(id: &str, ip: &str, version: &str) -> Vec<u8> {
    format!(r#"{{"ip":"{ip}","gwId":"{id}","active":2,"ability":0,"mode":0,"encrypt":true,"productKey":"keyabc","version":"{version}"}}"#)
        .into_bytes()
}

#[test]
fn test_protocol_31_plaintext_broadcast() {
    let datagram = encode_55aa(0, 0x13, Some(0), &document("dev31", "10.0.0.31", "3.1"));
    let b = decode_broadcast(&datagram, source()).expect("decode");
    assert_eq!(b.id, DeviceId::from("dev31"));
    assert_eq!(b.address.to_string(), "10.0.0.31");
}

#[test]
fn test_protocol_33_encrypted_broadcast() {
    let sealed = ecb_encrypt(discovery_key(), &document("dev33", "10.0.0.33", "3.3"));
    let datagram = encode_55aa(0, 0x13, Some(0), &sealed);
    let b = decode_broadcast(&datagram, source()).expect("decode");
    assert_eq!(b.id, DeviceId::from("dev33"));
}

#[test]
fn test_protocol_35_gcm_broadcast() {
    let iv = [9u8; GCM_IV_LEN];
    let datagram = encode_6699(0, 0x13, &document("dev35", "10.0.0.35", "3.5"), discovery_key(), &iv)
        .expect("encode");
    let b = decode_broadcast(&datagram, source()).expect("decode");
    assert_eq!(b.id, DeviceId::from("dev35"));
    assert_eq!(b.metadata.advertised_version.as_deref(), Some("3.5"));
}

#[test]
fn test_corrupted_datagram_is_an_error_not_a_panic() {
    // Arrange
    let mut datagram = encode_55aa(0, 0x13, None, &document("dev", "10.0.0.1", "3.1"));
    let mid = datagram.len() / 2;
    datagram[mid] ^= 0xFF;

    // Act
    let result = decode_broadcast(&datagram, source());

    // Assert
    assert!(matches!(result, Err(FrameError::CrcMismatch { .. })));
}

#[test]
fn test_truncated_datagrams_never_panic() {
    let full = encode_6699(1, 0x13, &document("dev", "10.0.0.1", "3.5"), discovery_key(), &[1; 12])
        .unwrap();
    for len in 0..full.len() {
        assert!(decode_broadcast(&full[..len], source()).is_err(), "len {len}");
    }
}

#[test]
fn test_decoded_broadcast_joins_with_credentials() {
    // Arrange
    let table = CredentialTable::from_json(
        br#"{"dev1": {"name": "Lamp", "local_key": "k1", "version": "3.3"}}"#,
    )
    .unwrap();
    let datagram = encode_55aa(0, 0x13, Some(0), &document("dev1", "10.0.0.5", "3.3"));
    let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let record = decode_broadcast(&datagram, source()).unwrap().into_presence(now);
    let presence = BTreeMap::from([(record.id.clone(), record)]);

    // Act
    let views = merge_all(&table, &presence, now, STALE_AFTER);

    // Assert
    assert_eq!(views.len(), 1);
    let lamp = &views[0];
    assert_eq!(lamp.name.as_deref(), Some("Lamp"));
    assert_eq!(lamp.address.map(|a| a.to_string()).as_deref(), Some("10.0.0.5"));
    assert_eq!(lamp.version, Some(ProtocolVersion::V33));
    assert_eq!(lamp.local_key.as_ref().map(|k| k.expose()), Some("k1"));
    assert!(lamp.fresh);
}
