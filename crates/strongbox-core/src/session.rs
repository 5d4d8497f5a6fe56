//! Vault session: the interface the presentation layer talks to
//!
//! A session is either closed, or open with a derived key, the decrypted
//! store and the single-instance lock. Every mutation is persisted
//! immediately; a failed save after a mutation is reported as
//! [`VaultError::PersistenceFailure`] and should end the session.

use secrecy::{ExposeSecret, SecretString};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::crypto::MasterKey;
use crate::error::{VaultError, VaultResult};
use crate::generator::{CharClasses, PasswordGenerator, SPECIAL};
use crate::kdf::KeyDerivation;
use crate::models::{VaultConfig, VaultStore};
use crate::storage::{VaultLock, VaultPaths, VaultPersistence};

/// Shortest passphrase [`is_strong_passphrase`] accepts
pub const MIN_PASSPHRASE_LENGTH: usize = 10;

/// State held while the vault is open
struct OpenVault {
    key: MasterKey,
    store: VaultStore,
    lock: VaultLock,
}

pub struct VaultSession {
    config: VaultConfig,
    persistence: VaultPersistence,
    kdf: KeyDerivation,
    vault: Option<OpenVault>,
}

impl VaultSession {
    /// Create a closed session for the vault in `base_dir`.
    pub fn new(base_dir: &Path, config: VaultConfig) -> VaultResult<Self> {
        config.validate()?;
        let paths = VaultPaths::new(base_dir, &config);
        let kdf = KeyDerivation::new(&paths.salt, config.kdf_iterations)?;

        Ok(Self {
            config,
            persistence: VaultPersistence::new(paths),
            kdf,
            vault: None,
        })
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn persistence(&self) -> &VaultPersistence {
        &self.persistence
    }

    pub fn is_open(&self) -> bool {
        self.vault.is_some()
    }

    /// Open the vault with the master passphrase.
    ///
    /// The passphrase is consumed and wiped on every path. If anything
    /// fails after the lock was taken, the lock is released again so the
    /// caller can re-prompt.
    pub fn open(&mut self, passphrase: SecretString) -> VaultResult<()> {
        if self.vault.is_some() {
            return Err(VaultError::AlreadyOpen);
        }

        let lock = self.persistence.acquire_lock()?;

        let key = self.kdf.derive_key(passphrase.expose_secret().as_bytes());
        drop(passphrase);

        let opened = key.and_then(|key| {
            let store = self.persistence.load(&key)?;
            Ok((key, store))
        });

        match opened {
            Ok((key, store)) => {
                info!(entries = store.len(), "Vault opened");
                self.vault = Some(OpenVault { key, store, lock });
                Ok(())
            }
            Err(e) => {
                if let Err(release_err) = lock.release() {
                    warn!("Failed to release vault lock after failed open: {}", release_err);
                }
                Err(e)
            }
        }
    }

    /// Wipe the store, drop the key, and release the lock. Never fails;
    /// release problems are logged.
    pub fn close(&mut self) {
        let Some(OpenVault {
            key,
            mut store,
            lock,
        }) = self.vault.take()
        else {
            return;
        };

        store.clear_all();
        drop(store);
        drop(key);

        match lock.release() {
            Ok(()) => info!("Vault closed"),
            Err(e) => warn!("Vault closed but the lock could not be released: {}", e),
        }
    }

    fn open_vault(&self) -> VaultResult<&OpenVault> {
        self.vault.as_ref().ok_or(VaultError::NotOpen)
    }

    fn open_vault_mut(&mut self) -> VaultResult<&mut OpenVault> {
        self.vault.as_mut().ok_or(VaultError::NotOpen)
    }

    fn persist(&self) -> VaultResult<()> {
        let vault = self.open_vault()?;
        self.persistence
            .save(&vault.store, &vault.key)
            .map_err(VaultError::persistence)
    }

    /// Generate a password for a new login and persist it.
    pub fn generate_and_save(
        &mut self,
        name: &str,
        username: &str,
        length: usize,
        classes: CharClasses,
    ) -> VaultResult<()> {
        if name.is_empty() {
            return Err(VaultError::EmptyField("login name"));
        }
        if username.is_empty() {
            return Err(VaultError::EmptyField("username"));
        }

        let max_length = self.config.max_password_length;
        let vault = self.open_vault_mut()?;
        if vault.store.has_login(name) {
            return Err(VaultError::DuplicateName(name.to_string()));
        }

        let password = PasswordGenerator::new(classes)
            .with_max_length(max_length)
            .generate(length)?;
        vault
            .store
            .add_login(name, Zeroizing::new(username.to_owned()), password)?;

        self.persist()?;
        info!(login = name, "Generated and saved login");
        Ok(())
    }

    /// Formatted name, username and password for one login.
    pub fn read_entry(&self, name: &str) -> VaultResult<Zeroizing<String>> {
        let vault = self.open_vault()?;
        let entry = vault
            .store
            .get_login(name)
            .ok_or_else(|| VaultError::NotFound(name.to_string()))?;

        let username = entry.username();
        let password = entry.password();
        entry.clear();

        Ok(format_entry(name, &username, &password))
    }

    /// Remove a login and persist. Absent names are a no-op.
    pub fn remove_entry(&mut self, name: &str) -> VaultResult<()> {
        let vault = self.open_vault_mut()?;
        if !vault.store.remove_login(name) {
            return Ok(());
        }

        self.persist()?;
        info!(login = name, "Removed login");
        Ok(())
    }

    /// Names of all stored logins
    pub fn list_names(&self) -> VaultResult<BTreeSet<String>> {
        Ok(self.open_vault()?.store.get_all_logins())
    }

    /// Persist the current store.
    pub fn save_now(&self) -> VaultResult<()> {
        self.persist()
    }

    /// Wipe every login and persist the empty vault.
    pub fn clear_all(&mut self) -> VaultResult<()> {
        self.open_vault_mut()?.store.clear_all();
        self.persist()?;
        info!("Cleared all logins");
        Ok(())
    }

    /// See [`is_strong_passphrase`], with the configured minimum length.
    pub fn is_strong_passphrase(&self, passphrase: &str) -> bool {
        is_strong_with_min(passphrase, self.config.min_passphrase_length)
    }
}

impl Drop for VaultSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for VaultSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultSession")
            .field("paths", self.persistence.paths())
            .field("open", &self.is_open())
            .finish()
    }
}

/// At least ten characters with a lowercase letter, an uppercase letter,
/// a digit and one of `!@#$%&*_+-=/?`.
pub fn is_strong_passphrase(passphrase: &str) -> bool {
    is_strong_with_min(passphrase, MIN_PASSPHRASE_LENGTH)
}

fn is_strong_with_min(passphrase: &str, min_length: usize) -> bool {
    if passphrase.chars().count() < min_length {
        return false;
    }

    let (mut lower, mut upper, mut digit, mut special) = (false, false, false, false);
    for c in passphrase.chars() {
        if c.is_lowercase() {
            lower = true;
        } else if c.is_uppercase() {
            upper = true;
        } else if c.is_ascii_digit() {
            digit = true;
        } else if SPECIAL.contains(c) {
            special = true;
        }

        if lower && upper && digit && special {
            return true;
        }
    }
    false
}

const LABEL_NAME: &str = "Login name: ";
const LABEL_USERNAME: &str = "\nUsername: ";
const LABEL_PASSWORD: &str = "\nPassword: ";

fn format_entry(name: &str, username: &str, password: &str) -> Zeroizing<String> {
    let len = LABEL_NAME.len()
        + name.len()
        + LABEL_USERNAME.len()
        + username.len()
        + LABEL_PASSWORD.len()
        + password.len()
        + 1;

    let mut out = Zeroizing::new(String::with_capacity(len));
    out.push_str(LABEL_NAME);
    out.push_str(name);
    out.push_str(LABEL_USERNAME);
    out.push_str(username);
    out.push_str(LABEL_PASSWORD);
    out.push_str(password);
    out.push('\n');
    out
}
