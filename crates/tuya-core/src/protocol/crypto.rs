//! Symmetric crypto used by discovery broadcasts.
//!
//! Discovery payloads are not secret: every device and every app encrypts
//! them with the same published key, `MD5("yGAdlopoPVldABfn")`.  The
//! encryption only hides the payload from casual sniffing.  Two modes are in
//! use:
//!
//! - AES-128-ECB with PKCS#7 padding (protocol 3.2 – 3.4 broadcasts).
//! - AES-128-GCM with a 12-byte IV and 16-byte tag (protocol 3.5 broadcasts,
//!   carried in the 6699 framing).

use std::sync::OnceLock;

use aes::Aes128;
use aes_gcm::aead::{Aead, Payload};
use aes_gcm::Aes128Gcm;
use ecb::cipher::{
    block_padding::Pkcs7, generic_array::GenericArray, BlockDecryptMut, BlockEncryptMut, KeyInit,
};

use super::frame::FrameError;

type EcbDecryptor = ecb::Decryptor<Aes128>;
type EcbEncryptor = ecb::Encryptor<Aes128>;

/// Seed string whose MD5 digest is the discovery key.
pub const DISCOVERY_KEY_SEED: &[u8] = b"yGAdlopoPVldABfn";

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// Returns the shared discovery key, computed once.
pub fn discovery_key() -> &'static [u8; 16] {
    static KEY: OnceLock<[u8; 16]> = OnceLock::new();
    KEY.get_or_init(|| md5::compute(DISCOVERY_KEY_SEED).0)
}

// ── AES-128-ECB ───────────────────────────────────────────────────────────────

/// Decrypts AES-128-ECB ciphertext and strips PKCS#7 padding.
///
/// # Errors
///
/// Returns [`FrameError::Crypto`] if the length is not a positive multiple of
/// the block size or the padding is invalid.
pub fn ecb_decrypt(key: &[u8; 16], ciphertext: &[u8]) -> Result<Vec<u8>, FrameError> {
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(FrameError::Crypto(format!(
            "ciphertext length {} is not a multiple of {BLOCK_SIZE}",
            ciphertext.len()
        )));
    }

    EcbDecryptor::new(GenericArray::from_slice(key))
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| FrameError::Crypto("invalid PKCS#7 padding".to_string()))
}

/// Pads with PKCS#7 and encrypts with AES-128-ECB.
pub fn ecb_encrypt(key: &[u8; 16], plaintext: &[u8]) -> Vec<u8> {
    EcbEncryptor::new(GenericArray::from_slice(key)).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

// ── AES-128-GCM ───────────────────────────────────────────────────────────────

/// Length of the GCM IV carried in a 6699 frame.
pub const GCM_IV_LEN: usize = 12;

/// Length of the GCM authentication tag.
pub const GCM_TAG_LEN: usize = 16;

/// Decrypts and authenticates `ciphertext || tag`.
///
/// # Errors
///
/// Returns [`FrameError::Crypto`] if the IV has the wrong length or the tag
/// does not verify.
pub fn gcm_decrypt(
    key: &[u8; 16],
    iv: &[u8],
    ciphertext_and_tag: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, FrameError> {
    if iv.len() != GCM_IV_LEN {
        return Err(FrameError::Crypto(format!("GCM IV must be {GCM_IV_LEN} bytes")));
    }
    let cipher = Aes128Gcm::new(GenericArray::from_slice(key));
    cipher
        .decrypt(
            GenericArray::from_slice(iv),
            Payload {
                msg: ciphertext_and_tag,
                aad,
            },
        )
        .map_err(|_| FrameError::Crypto("GCM authentication failed".to_string()))
}

/// Encrypts `plaintext`, returning `ciphertext || tag`.
///
/// # Errors
///
/// Returns [`FrameError::Crypto`] if encryption fails.
pub fn gcm_encrypt(
    key: &[u8; 16],
    iv: &[u8; GCM_IV_LEN],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, FrameError> {
    let cipher = Aes128Gcm::new(GenericArray::from_slice(key));
    cipher
        .encrypt(
            GenericArray::from_slice(iv),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| FrameError::Crypto("GCM encryption failed".to_string()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_key_is_md5_of_seed() {
        // MD5("yGAdlopoPVldABfn") as published by the device SDK.
        let expected: [u8; 16] = [
            0x6c, 0x1e, 0xc8, 0xe2, 0xbb, 0x9b, 0xb5, 0x9a, 0xb5, 0x0b, 0x0d, 0xaf, 0x64, 0x9b,
            0x41, 0x0a,
        ];
        assert_eq!(discovery_key(), &expected);
    }

    #[test]
    fn test_ecb_decrypt_reverses_encrypt() {
        // Arrange
        let key = discovery_key();
        let plaintext = br#"{"gwId":"abc","ip":"10.0.0.5"}"#;

        // Act
        let ciphertext = ecb_encrypt(key, plaintext);
        let decrypted = ecb_decrypt(key, &ciphertext).expect("decrypt");

        // Assert
        assert_eq!(ciphertext.len() % BLOCK_SIZE, 0);
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_ecb_encrypt_matches_known_ciphertext() {
        // One block: 15 bytes of JSON plus one byte of PKCS#7 padding.
        let ciphertext = ecb_encrypt(discovery_key(), br#"{"gwId":"dev1"}"#);
        let expected: [u8; 16] = [
            0x82, 0xd5, 0xa9, 0x61, 0x44, 0x5a, 0xed, 0xad, 0xdf, 0xd7, 0x72, 0x3a, 0xc6, 0xe8,
            0xef, 0xce,
        ];
        assert_eq!(ciphertext, expected);
        assert_eq!(
            ecb_decrypt(discovery_key(), &expected).unwrap(),
            br#"{"gwId":"dev1"}"#
        );
    }

    #[test]
    fn test_ecb_decrypt_rejects_bad_padding() {
        // Arrange: a valid block whose last plaintext byte is 0x00
        let ciphertext = ecb_encrypt(discovery_key(), &[0u8; 16]);

        // Act: drop the padding block so the zero byte becomes "padding"
        let result = ecb_decrypt(discovery_key(), &ciphertext[..16]);

        // Assert
        assert!(matches!(result, Err(FrameError::Crypto(_))));
    }

    #[test]
    fn test_ecb_encrypt_adds_full_block_for_aligned_input() {
        let ciphertext = ecb_encrypt(discovery_key(), &[0u8; 16]);
        assert_eq!(ciphertext.len(), 32);
    }

    #[test]
    fn test_ecb_decrypt_rejects_unaligned_input() {
        let result = ecb_decrypt(discovery_key(), &[0u8; 15]);
        assert!(matches!(result, Err(FrameError::Crypto(_))));
    }

    #[test]
    fn test_ecb_decrypt_rejects_empty_input() {
        assert!(ecb_decrypt(discovery_key(), &[]).is_err());
    }

    #[test]
    fn test_ecb_decrypt_with_wrong_key_fails_padding_check_or_differs() {
        let ciphertext = ecb_encrypt(discovery_key(), b"hello");
        let other = [0x11u8; 16];
        match ecb_decrypt(&other, &ciphertext) {
            Ok(plain) => assert_ne!(plain, b"hello"),
            Err(e) => assert!(matches!(e, FrameError::Crypto(_))),
        }
    }

    #[test]
    fn test_gcm_decrypt_reverses_encrypt_with_aad() {
        // Arrange
        let key = discovery_key();
        let iv = [7u8; GCM_IV_LEN];
        let aad = b"header";

        // Act
        let sealed = gcm_encrypt(key, &iv, b"payload", aad).unwrap();
        let opened = gcm_decrypt(key, &iv, &sealed, aad).unwrap();

        // Assert
        assert_eq!(sealed.len(), b"payload".len() + GCM_TAG_LEN);
        assert_eq!(opened, b"payload");
    }

    #[test]
    fn test_gcm_decrypt_rejects_tampered_aad() {
        let key = discovery_key();
        let iv = [7u8; GCM_IV_LEN];
        let sealed = gcm_encrypt(key, &iv, b"payload", b"header").unwrap();
        assert!(gcm_decrypt(key, &iv, &sealed, b"HEADER").is_err());
    }

    #[test]
    fn test_gcm_decrypt_rejects_short_iv() {
        let result = gcm_decrypt(discovery_key(), &[0u8; 8], &[0u8; 32], b"");
        assert!(matches!(result, Err(FrameError::Crypto(_))));
    }
}
