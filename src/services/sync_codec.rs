//! Encryption codec for the remote bookmark payload.
//!
//! The per-user key is PBKDF2-HMAC-SHA256 over `"{app_secret}:{user_id}"`
//! with a fixed salt, so every device of a user derives the same key without
//! any key exchange. The payload is the JSON tree sealed with AES-256-GCM;
//! `content` carries the ciphertext with the 16-byte tag appended.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::sync::{Arc, Mutex};
use zeroize::Zeroizing;

use crate::services::crypto_service::{CryptoServiceTrait, TAG_LENGTH};
use crate::types::bookmark::BookmarkTree;
use crate::types::errors::CryptoError;
use crate::types::sync::{EncryptedData, EncryptedPayload};

/// Fixed PBKDF2 salt shared by all clients.
pub const KEY_SALT: &[u8] = b"static-salt-bookmarks";

/// Encrypts and decrypts bookmark trees for one application secret.
pub struct SyncCodec {
    crypto: Arc<dyn CryptoServiceTrait>,
    app_secret: Zeroizing<String>,
    /// Last derived key, keyed by user ID. Derivation is deliberately slow.
    cached_key: Mutex<Option<(String, Zeroizing<Vec<u8>>)>>,
}

impl SyncCodec {
    pub fn new(crypto: Arc<dyn CryptoServiceTrait>, app_secret: &str) -> Self {
        Self {
            crypto,
            app_secret: Zeroizing::new(app_secret.to_string()),
            cached_key: Mutex::new(None),
        }
    }

    fn key_for(&self, user_id: &str) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let mut cache = self
            .cached_key
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some((cached_user, key)) = cache.as_ref() {
            if cached_user == user_id {
                return Ok(key.clone());
            }
        }

        let material = Zeroizing::new(format!("{}:{}", self.app_secret.as_str(), user_id));
        let key = Zeroizing::new(self.crypto.derive_key(&material, KEY_SALT)?);
        *cache = Some((user_id.to_string(), key.clone()));
        Ok(key)
    }

    /// Serializes and encrypts `tree` under the key of `user_id`.
    pub fn encrypt(&self, tree: &BookmarkTree, user_id: &str) -> Result<EncryptedPayload, CryptoError> {
        let key = self.key_for(user_id)?;
        let plaintext = Zeroizing::new(
            serde_json::to_vec(tree).map_err(|e| CryptoError::Encryption(e.to_string()))?,
        );

        let sealed = self.crypto.encrypt_aes256gcm(&plaintext, &key)?;
        let mut content = sealed.ciphertext;
        content.extend_from_slice(&sealed.auth_tag);

        Ok(EncryptedPayload {
            iv: BASE64.encode(&sealed.iv),
            content: BASE64.encode(&content),
        })
    }

    /// Decrypts a payload produced by [`SyncCodec::encrypt`].
    ///
    /// Any failure (bad base64, wrong key, tampering, non-tree plaintext) is a
    /// `CryptoError::Decryption`; a partial or empty tree is never returned.
    pub fn decrypt(&self, payload: &EncryptedPayload, user_id: &str) -> Result<BookmarkTree, CryptoError> {
        let iv = BASE64
            .decode(&payload.iv)
            .map_err(|e| CryptoError::Decryption(format!("invalid iv encoding: {}", e)))?;
        let mut content = BASE64
            .decode(&payload.content)
            .map_err(|e| CryptoError::Decryption(format!("invalid content encoding: {}", e)))?;

        if content.len() < TAG_LENGTH {
            return Err(CryptoError::Decryption(format!(
                "content too short: {} bytes",
                content.len()
            )));
        }
        let auth_tag = content.split_off(content.len() - TAG_LENGTH);

        let key = self.key_for(user_id)?;
        let plaintext = Zeroizing::new(self.crypto.decrypt_aes256gcm(
            &EncryptedData {
                ciphertext: content,
                iv,
                auth_tag,
            },
            &key,
        )?);

        serde_json::from_slice(&plaintext)
            .map_err(|e| CryptoError::Decryption(format!("plaintext is not a bookmark tree: {}", e)))
    }
}
