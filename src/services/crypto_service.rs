use ring::aead::{self, Aad, BoundKey, Nonce, NonceSequence, UnboundKey, AES_256_GCM};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use std::num::NonZeroU32;
use zeroize::Zeroize;

use crate::types::errors::CryptoError;
use crate::types::sync::EncryptedData;

/// PBKDF2 iteration count for key derivation.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// AES-256-GCM key length in bytes.
pub const KEY_LENGTH: usize = 32;

/// AES-256-GCM nonce/IV length in bytes.
pub const NONCE_LENGTH: usize = 12;

/// AES-256-GCM authentication tag length in bytes.
pub const TAG_LENGTH: usize = 16;

/// Low-level primitives used by the bookmark payload codec.
pub trait CryptoServiceTrait: Send + Sync {
    /// Derives a 256-bit key from key material and salt using PBKDF2-HMAC-SHA256.
    fn derive_key(&self, material: &str, salt: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Encrypts plaintext using AES-256-GCM with a fresh random IV.
    fn encrypt_aes256gcm(
        &self,
        plaintext: &[u8],
        key: &[u8],
    ) -> Result<EncryptedData, CryptoError>;

    /// Decrypts and authenticates data encrypted with AES-256-GCM.
    fn decrypt_aes256gcm(
        &self,
        encrypted: &EncryptedData,
        key: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// Generates cryptographically secure random bytes of the specified length.
    fn generate_random_bytes(&self, length: usize) -> Result<Vec<u8>, CryptoError>;

    /// Overwrites sensitive data with zeros.
    fn zeroize_memory(&self, data: &mut [u8]);
}

/// A nonce sequence that yields exactly one nonce.
struct SingleNonce {
    nonce: Option<[u8; NONCE_LENGTH]>,
}

impl SingleNonce {
    fn new(nonce_bytes: [u8; NONCE_LENGTH]) -> Self {
        Self {
            nonce: Some(nonce_bytes),
        }
    }
}

impl NonceSequence for SingleNonce {
    fn advance(&mut self) -> Result<Nonce, ring::error::Unspecified> {
        self.nonce
            .take()
            .map(Nonce::assume_unique_for_key)
            .ok_or(ring::error::Unspecified)
    }
}

/// Implementation of cryptographic services using the `ring` crate.
pub struct CryptoService {
    rng: SystemRandom,
}

impl CryptoService {
    pub fn new() -> Self {
        Self {
            rng: SystemRandom::new(),
        }
    }

    fn check_key(key: &[u8]) -> Result<(), CryptoError> {
        if key.len() != KEY_LENGTH {
            return Err(CryptoError::InvalidKey(format!(
                "Key must be {} bytes, got {}",
                KEY_LENGTH,
                key.len()
            )));
        }
        Ok(())
    }
}

impl Default for CryptoService {
    fn default() -> Self {
        Self::new()
    }
}

impl CryptoServiceTrait for CryptoService {
    fn derive_key(&self, material: &str, salt: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let iterations = NonZeroU32::new(PBKDF2_ITERATIONS)
            .ok_or_else(|| CryptoError::KeyDerivation("Invalid iteration count".to_string()))?;

        let mut key = vec![0u8; KEY_LENGTH];
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            iterations,
            salt,
            material.as_bytes(),
            &mut key,
        );

        Ok(key)
    }

    fn encrypt_aes256gcm(
        &self,
        plaintext: &[u8],
        key: &[u8],
    ) -> Result<EncryptedData, CryptoError> {
        Self::check_key(key)?;

        let iv = self.generate_random_bytes(NONCE_LENGTH)?;
        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        nonce_bytes.copy_from_slice(&iv);

        let unbound_key = UnboundKey::new(&AES_256_GCM, key)
            .map_err(|_| CryptoError::Encryption("Failed to create encryption key".to_string()))?;
        let mut sealing_key = aead::SealingKey::new(unbound_key, SingleNonce::new(nonce_bytes));

        let mut in_out = plaintext.to_vec();
        sealing_key
            .seal_in_place_append_tag(Aad::empty(), &mut in_out)
            .map_err(|_| CryptoError::Encryption("Encryption operation failed".to_string()))?;

        // ring appends the tag; keep it separate so callers choose the wire layout.
        let auth_tag = in_out.split_off(in_out.len() - TAG_LENGTH);

        Ok(EncryptedData {
            ciphertext: in_out,
            iv: nonce_bytes.to_vec(),
            auth_tag,
        })
    }

    fn decrypt_aes256gcm(
        &self,
        encrypted: &EncryptedData,
        key: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        Self::check_key(key)?;

        if encrypted.iv.len() != NONCE_LENGTH {
            return Err(CryptoError::Decryption(format!(
                "IV must be {} bytes, got {}",
                NONCE_LENGTH,
                encrypted.iv.len()
            )));
        }

        if encrypted.auth_tag.len() != TAG_LENGTH {
            return Err(CryptoError::Decryption(format!(
                "Auth tag must be {} bytes, got {}",
                TAG_LENGTH,
                encrypted.auth_tag.len()
            )));
        }

        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        nonce_bytes.copy_from_slice(&encrypted.iv);

        let unbound_key = UnboundKey::new(&AES_256_GCM, key)
            .map_err(|_| CryptoError::Decryption("Failed to create decryption key".to_string()))?;
        let mut opening_key = aead::OpeningKey::new(unbound_key, SingleNonce::new(nonce_bytes));

        let mut in_out = Vec::with_capacity(encrypted.ciphertext.len() + TAG_LENGTH);
        in_out.extend_from_slice(&encrypted.ciphertext);
        in_out.extend_from_slice(&encrypted.auth_tag);

        let plaintext = opening_key
            .open_in_place(Aad::empty(), &mut in_out)
            .map(|plaintext| plaintext.to_vec())
            .map_err(|_| {
                CryptoError::Decryption(
                    "invalid key or corrupted data".to_string(),
                )
            });

        // The buffer holds the opened plaintext.
        self.zeroize_memory(&mut in_out);
        plaintext
    }

    fn generate_random_bytes(&self, length: usize) -> Result<Vec<u8>, CryptoError> {
        let mut bytes = vec![0u8; length];
        self.rng
            .fill(&mut bytes)
            .map_err(|_| CryptoError::RandomGeneration("Failed to generate random bytes".to_string()))?;
        Ok(bytes)
    }

    fn zeroize_memory(&self, data: &mut [u8]) {
        data.zeroize();
    }
}
