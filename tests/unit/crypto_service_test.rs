//! Integration-level unit tests for the CryptoService and the payload codec.
//!
//! These tests exercise the public crypto API the sync engine relies on:
//! per-user key derivation, authenticated encryption and the remote payload
//! layout.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use marksync::services::crypto_service::{CryptoService, CryptoServiceTrait, KEY_LENGTH, TAG_LENGTH};
use marksync::services::sync_codec::{SyncCodec, KEY_SALT};
use marksync::types::bookmark::Bookmark;
use marksync::types::errors::CryptoError;
use marksync::types::sync::EncryptedData;
use rstest::rstest;

fn codec() -> SyncCodec {
    SyncCodec::new(Arc::new(CryptoService::new()), "test-app-secret")
}

/// Different plaintexts under the same key must produce different ciphertexts.
#[test]
fn test_different_plaintexts_produce_different_ciphertexts() {
    let service = CryptoService::new();
    let key = service.derive_key("secret:user-a", KEY_SALT).unwrap();

    let encrypted_a = service.encrypt_aes256gcm(b"[{\"id\":\"1\"}]", &key).unwrap();
    let encrypted_b = service.encrypt_aes256gcm(b"[{\"id\":\"2\"}]", &key).unwrap();

    assert_ne!(encrypted_a.ciphertext, encrypted_b.ciphertext);
}

/// The same plaintext encrypted twice uses fresh IVs.
#[test]
fn test_same_plaintext_gets_fresh_iv() {
    let service = CryptoService::new();
    let key = service.generate_random_bytes(KEY_LENGTH).unwrap();

    let first = service.encrypt_aes256gcm(b"same", &key).unwrap();
    let second = service.encrypt_aes256gcm(b"same", &key).unwrap();
    assert_ne!(first.iv, second.iv);
}

/// Decryption with a key derived for another user fails.
#[test]
fn test_decryption_with_wrong_key_fails() {
    let service = CryptoService::new();
    let key_a = service.derive_key("secret:user-a", KEY_SALT).unwrap();
    let key_b = service.derive_key("secret:user-b", KEY_SALT).unwrap();

    let encrypted = service.encrypt_aes256gcm(b"bookmarks", &key_a).unwrap();
    assert!(service.decrypt_aes256gcm(&encrypted, &key_b).is_err());
}

#[rstest]
#[case::short_iv(8, TAG_LENGTH)]
#[case::long_iv(16, TAG_LENGTH)]
#[case::short_tag(12, 8)]
fn test_decrypt_rejects_malformed_parts(#[case] iv_len: usize, #[case] tag_len: usize) {
    let service = CryptoService::new();
    let key = service.generate_random_bytes(KEY_LENGTH).unwrap();
    let encrypted = EncryptedData {
        ciphertext: vec![0u8; 10],
        iv: vec![0u8; iv_len],
        auth_tag: vec![0u8; tag_len],
    };
    assert!(matches!(
        service.decrypt_aes256gcm(&encrypted, &key),
        Err(CryptoError::Decryption(_))
    ));
}

#[test]
fn test_encrypt_rejects_short_key() {
    let service = CryptoService::new();
    assert!(matches!(
        service.encrypt_aes256gcm(b"test", &[0u8; 16]),
        Err(CryptoError::InvalidKey(_))
    ));
}

/// zeroize_memory clears a buffer to all zeros.
#[test]
fn test_zeroize_memory_clears_buffer() {
    let service = CryptoService::new();
    let mut key = service.generate_random_bytes(KEY_LENGTH).unwrap();
    service.zeroize_memory(&mut key);
    assert!(key.iter().all(|&b| b == 0));
}

/// A payload is portable between two codec instances with the same secret,
/// as it is between two devices of one user.
#[test]
fn test_payload_decrypts_on_another_device() {
    let tree = vec![Bookmark::folder("Work", vec![Bookmark::link("https://a.com", "A")])];
    let payload = codec().encrypt(&tree, "user-1").unwrap();
    let decrypted = codec().decrypt(&payload, "user-1").unwrap();
    assert_eq!(decrypted, tree);
}

/// Tampering with the content is detected, never silently returned.
#[test]
fn test_tampered_content_fails_decryption() {
    let codec = codec();
    let mut payload = codec.encrypt(&vec![Bookmark::link("https://a.com", "A")], "user-1").unwrap();
    let mut raw = BASE64.decode(&payload.content).unwrap();
    raw[0] ^= 0xFF;
    payload.content = BASE64.encode(&raw);

    assert!(matches!(codec.decrypt(&payload, "user-1"), Err(CryptoError::Decryption(_))));
}

#[test]
fn test_invalid_base64_fails_decryption() {
    let codec = codec();
    let mut payload = codec.encrypt(&Vec::new(), "user-1").unwrap();
    payload.iv = "***".to_string();
    assert!(matches!(codec.decrypt(&payload, "user-1"), Err(CryptoError::Decryption(_))));
}
