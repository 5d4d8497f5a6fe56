//! Master key derivation
//!
//! PBKDF2-HMAC-SHA256 over the master passphrase and a persisted 16-byte
//! salt. The salt is created on first use and never rewritten; losing it
//! makes every existing vault undecryptable.

use pbkdf2::pbkdf2_hmac;
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::crypto::{MasterKey, KEY_SIZE};
use crate::error::{VaultError, VaultResult};
use crate::storage::ensure_vault_dir;

/// Size of the PBKDF2 salt in bytes
pub const SALT_SIZE: usize = 16;

/// Lowest accepted PBKDF2 iteration count
pub const MIN_KDF_ITERATIONS: u32 = 65_536;

/// Derives the session key from a passphrase and the salt file.
#[derive(Debug, Clone)]
pub struct KeyDerivation {
    salt_path: PathBuf,
    iterations: u32,
}

impl KeyDerivation {
    pub fn new(salt_path: impl Into<PathBuf>, iterations: u32) -> VaultResult<Self> {
        if iterations < MIN_KDF_ITERATIONS {
            return Err(VaultError::KeyDerivation(format!(
                "{} iterations is below the minimum of {}",
                iterations, MIN_KDF_ITERATIONS
            )));
        }
        Ok(Self {
            salt_path: salt_path.into(),
            iterations,
        })
    }

    pub fn salt_path(&self) -> &Path {
        &self.salt_path
    }

    /// Derive the vault key. The passphrase is only borrowed; wiping it is
    /// up to the owner of the buffer.
    pub fn derive_key(&self, passphrase: &[u8]) -> VaultResult<MasterKey> {
        let salt = load_or_create_salt(&self.salt_path)?;

        let mut output = Zeroizing::new([0u8; KEY_SIZE]);
        pbkdf2_hmac::<Sha256>(passphrase, &salt[..], self.iterations, &mut output[..]);

        debug!(iterations = self.iterations, "Derived master key");
        Ok(MasterKey::from_bytes(*output))
    }
}

/// Read the salt file, or generate and persist a new salt if it is missing.
pub fn load_or_create_salt(path: &Path) -> VaultResult<Zeroizing<[u8; SALT_SIZE]>> {
    let mut salt = Zeroizing::new([0u8; SALT_SIZE]);

    if path.exists() {
        let bytes = Zeroizing::new(fs::read(path)?);
        if bytes.len() != SALT_SIZE {
            return Err(VaultError::Config(format!(
                "Salt file {} has {} bytes, expected {}",
                path.display(),
                bytes.len(),
                SALT_SIZE
            )));
        }
        salt.copy_from_slice(&bytes);
        return Ok(salt);
    }

    if let Some(parent) = path.parent() {
        ensure_vault_dir(parent)?;
    }

    OsRng.fill_bytes(&mut salt[..]);

    // create_new so a concurrently created salt is never overwritten
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    file.write_all(&salt[..])?;
    file.sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }

    info!("Created new salt file at {}", path.display());
    Ok(salt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_key_derivation_is_deterministic() {
        let temp_dir = TempDir::new().unwrap();
        let kdf = KeyDerivation::new(temp_dir.path().join("salt.bin"), MIN_KDF_ITERATIONS).unwrap();

        let key1 = kdf.derive_key(b"Abcdef1!gh").unwrap();
        let key2 = kdf.derive_key(b"Abcdef1!gh").unwrap();

        let blob = key1.encrypt(b"payload").unwrap();
        assert_eq!(key2.decrypt(&blob).unwrap().as_slice(), b"payload");
    }

    #[test]
    fn test_different_passphrase_gives_different_key() {
        let temp_dir = TempDir::new().unwrap();
        let kdf = KeyDerivation::new(temp_dir.path().join("salt.bin"), MIN_KDF_ITERATIONS).unwrap();

        let key1 = kdf.derive_key(b"password1").unwrap();
        let key2 = kdf.derive_key(b"password2").unwrap();

        let blob = key1.encrypt(b"payload").unwrap();
        assert!(matches!(key2.decrypt(&blob), Err(VaultError::WrongPassphrase)));
    }

    #[test]
    fn test_salt_created_once_and_reused() {
        let temp_dir = TempDir::new().unwrap();
        let salt_path = temp_dir.path().join("nested").join("salt.bin");

        let first = load_or_create_salt(&salt_path).unwrap();
        assert!(salt_path.exists());
        assert_eq!(fs::read(&salt_path).unwrap().len(), SALT_SIZE);

        let second = load_or_create_salt(&salt_path).unwrap();
        assert_eq!(*first, *second);
    }

    #[test]
    fn test_salt_uniqueness() {
        let temp_dir = TempDir::new().unwrap();
        let salt1 = load_or_create_salt(&temp_dir.path().join("a.bin")).unwrap();
        let salt2 = load_or_create_salt(&temp_dir.path().join("b.bin")).unwrap();
        assert_ne!(*salt1, *salt2);
    }

    #[test]
    fn test_short_salt_file_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let salt_path = temp_dir.path().join("salt.bin");
        fs::write(&salt_path, [1u8; 8]).unwrap();

        let result = load_or_create_salt(&salt_path);
        assert!(matches!(result, Err(VaultError::Config(_))));
    }

    #[test]
    fn test_low_iteration_count_rejected() {
        let result = KeyDerivation::new("salt.bin", 1000);
        assert!(matches!(result, Err(VaultError::KeyDerivation(_))));
    }
}
