//! Authenticated encryption of the vault payload
//!
//! - AES-256-GCM with a fresh 96-bit OS-random nonce per call
//! - Blob layout: `nonce (12 bytes) || ciphertext || tag (16 bytes)`
//! - Keys and decrypted plaintext are zeroized on drop

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use secrecy::{ExposeSecret, Secret};
use zeroize::Zeroizing;

use crate::error::{VaultError, VaultResult};

/// Size of AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of AES-GCM nonce in bytes
pub const NONCE_SIZE: usize = 12;

/// Size of the AES-GCM authentication tag in bytes
pub const TAG_SIZE: usize = 16;

/// Symmetric key for the vault payload.
///
/// Only ever held in memory for the lifetime of a session.
pub struct MasterKey {
    key: Secret<[u8; KEY_SIZE]>,
}

impl MasterKey {
    /// Wrap raw key bytes. Arrays are `Copy`, so the caller still has to
    /// wipe its own buffer.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self {
            key: Secret::new(bytes),
        }
    }

    fn cipher(&self) -> VaultResult<Aes256Gcm> {
        Aes256Gcm::new_from_slice(self.key.expose_secret())
            .map_err(|e| VaultError::Encryption(e.to_string()))
    }

    /// Encrypt `plaintext`, returning `nonce || ciphertext+tag`.
    pub fn encrypt(&self, plaintext: &[u8]) -> VaultResult<Vec<u8>> {
        let cipher = self.cipher()?;

        let nonce_bytes = generate_nonce();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| VaultError::Encryption(e.to_string()))?;

        let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    /// Decrypt a blob produced by [`MasterKey::encrypt`].
    ///
    /// Authentication failure covers both a wrong key and a tampered or
    /// truncated blob; they cannot be told apart.
    pub fn decrypt(&self, blob: &[u8]) -> VaultResult<Zeroizing<Vec<u8>>> {
        if blob.len() < NONCE_SIZE + TAG_SIZE {
            return Err(VaultError::WrongPassphrase);
        }

        let cipher = self.cipher()?;
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| VaultError::WrongPassphrase)?;

        Ok(Zeroizing::new(plaintext))
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey([REDACTED])")
    }
}

/// Generate a cryptographically secure random nonce
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn random_key() -> MasterKey {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        MasterKey::from_bytes(bytes)
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = random_key();
        let plaintext = b"{\"passwordMap\":{}}";

        let blob = key.encrypt(plaintext).unwrap();
        assert_eq!(blob.len(), NONCE_SIZE + plaintext.len() + TAG_SIZE);

        let decrypted = key.decrypt(&blob).unwrap();
        assert_eq!(plaintext.as_slice(), decrypted.as_slice());
    }

    #[test]
    fn test_wrong_key_fails() {
        let key1 = random_key();
        let key2 = random_key();

        let blob = key1.encrypt(b"Secret data").unwrap();

        let result = key2.decrypt(&blob);
        assert!(matches!(result, Err(VaultError::WrongPassphrase)));
    }

    #[test]
    fn test_tampered_blob_fails() {
        let key = random_key();
        let mut blob = key.encrypt(b"Secret data").unwrap();

        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        assert!(matches!(key.decrypt(&blob), Err(VaultError::WrongPassphrase)));

        blob[last] ^= 0x01;
        blob[0] ^= 0x80;
        assert!(matches!(key.decrypt(&blob), Err(VaultError::WrongPassphrase)));
    }

    #[test]
    fn test_truncated_blob_fails() {
        let key = random_key();
        assert!(matches!(key.decrypt(&[]), Err(VaultError::WrongPassphrase)));
        assert!(matches!(
            key.decrypt(&[0u8; NONCE_SIZE + TAG_SIZE - 1]),
            Err(VaultError::WrongPassphrase)
        ));
    }

    #[test]
    fn test_nonce_prefix_never_repeats() {
        let key = random_key();
        let mut seen = HashSet::new();

        for _ in 0..1000 {
            let blob = key.encrypt(b"same plaintext").unwrap();
            let prefix: [u8; NONCE_SIZE] = blob[..NONCE_SIZE].try_into().unwrap();
            assert!(seen.insert(prefix), "nonce reused");
        }
    }

    #[test]
    fn test_debug_redacts_key() {
        let key = MasterKey::from_bytes([7u8; KEY_SIZE]);
        assert_eq!(format!("{:?}", key), "MasterKey([REDACTED])");
    }
}
