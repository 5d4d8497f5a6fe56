//! Data models for login entries, the in-memory store, and configuration

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use zeroize::{Zeroize, Zeroizing};

use crate::error::{VaultError, VaultResult};
use crate::kdf::MIN_KDF_ITERATIONS;
use crate::session::MIN_PASSPHRASE_LENGTH;

/// A stored login: username and password, both wiped on drop.
///
/// Accessors hand out independent copies; the internal buffers are never
/// borrowed outward.
pub struct LoginEntry {
    username: Zeroizing<String>,
    password: Zeroizing<String>,
}

impl LoginEntry {
    /// Create an entry by copying the caller's buffers. The caller still
    /// owns (and must wipe) the originals.
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: Zeroizing::new(username.to_owned()),
            password: Zeroizing::new(password.to_owned()),
        }
    }

    /// Create an entry that takes over already-wrapped buffers.
    pub fn from_owned(username: Zeroizing<String>, password: Zeroizing<String>) -> Self {
        Self { username, password }
    }

    /// Copy of the username
    pub fn username(&self) -> Zeroizing<String> {
        Zeroizing::new(self.username.as_str().to_owned())
    }

    /// Copy of the password
    pub fn password(&self) -> Zeroizing<String> {
        Zeroizing::new(self.password.as_str().to_owned())
    }

    /// Overwrite both buffers with zeros and release them.
    pub fn clear(mut self) {
        self.username.zeroize();
        self.password.zeroize();
    }

    fn same_credentials(&self, other: &LoginEntry) -> bool {
        *self.username == *other.username && *self.password == *other.password
    }
}

impl Clone for LoginEntry {
    fn clone(&self) -> Self {
        Self::from_owned(self.username(), self.password())
    }
}

impl std::fmt::Debug for LoginEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginEntry")
            .field("username", &"[REDACTED]")
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// In-memory login store, keyed by login name.
#[derive(Debug, Default)]
pub struct VaultStore {
    logins: HashMap<String, LoginEntry>,
}

impl VaultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new login. The credential buffers are consumed and wiped
    /// whether or not the insert succeeds.
    pub fn add_login(
        &mut self,
        name: &str,
        username: Zeroizing<String>,
        password: Zeroizing<String>,
    ) -> VaultResult<()> {
        if self.logins.contains_key(name) {
            return Err(VaultError::DuplicateName(name.to_string()));
        }
        self.logins
            .insert(name.to_string(), LoginEntry::from_owned(username, password));
        Ok(())
    }

    /// Copy of the entry for `name`
    pub fn get_login(&self, name: &str) -> Option<LoginEntry> {
        self.logins.get(name).cloned()
    }

    pub fn has_login(&self, name: &str) -> bool {
        self.logins.contains_key(name)
    }

    /// Remove and wipe an entry. Absent names are ignored.
    pub fn remove_login(&mut self, name: &str) -> bool {
        match self.logins.remove(name) {
            Some(entry) => {
                entry.clear();
                true
            }
            None => false,
        }
    }

    /// Names of all stored logins
    pub fn get_all_logins(&self) -> BTreeSet<String> {
        self.logins.keys().cloned().collect()
    }

    /// Wipe every entry and empty the store.
    pub fn clear_all(&mut self) {
        for (_, entry) in self.logins.drain() {
            entry.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.logins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logins.is_empty()
    }

    /// Same names with the same credentials
    pub fn same_contents(&self, other: &VaultStore) -> bool {
        self.logins.len() == other.logins.len()
            && self.logins.iter().all(|(name, entry)| {
                other
                    .logins
                    .get(name)
                    .is_some_and(|o| entry.same_credentials(o))
            })
    }

    /// Serialize into a zeroizing JSON buffer.
    pub fn to_json(&self) -> VaultResult<Zeroizing<Vec<u8>>> {
        let view = StoredVaultRef {
            password_map: self
                .logins
                .iter()
                .map(|(name, entry)| {
                    (
                        name.as_str(),
                        StoredLoginRef {
                            username: entry.username.as_str(),
                            password: entry.password.as_str(),
                        },
                    )
                })
                .collect(),
        };

        // Exact capacity: a reallocation would leave an unwiped copy behind.
        let mut counter = ByteCounter(0);
        serde_json::to_writer(&mut counter, &view).map_err(VaultError::Serialization)?;

        let mut json = Zeroizing::new(Vec::with_capacity(counter.0));
        serde_json::to_writer(&mut *json, &view).map_err(VaultError::Serialization)?;
        Ok(json)
    }

    /// Parse a decrypted JSON payload.
    pub fn from_json(plaintext: &[u8]) -> VaultResult<Self> {
        let stored: StoredVault = serde_json::from_slice(plaintext)?;

        let logins = stored
            .password_map
            .into_iter()
            .map(|(name, login)| {
                let StoredLogin { username, password } = login;
                (
                    name,
                    LoginEntry::from_owned(Zeroizing::new(username), Zeroizing::new(password)),
                )
            })
            .collect();

        Ok(Self { logins })
    }
}

impl Drop for VaultStore {
    fn drop(&mut self) {
        self.clear_all();
    }
}

struct ByteCounter(usize);

impl std::io::Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0 += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Serialization view borrowing the store's buffers
#[derive(Serialize)]
struct StoredVaultRef<'a> {
    #[serde(rename = "passwordMap")]
    password_map: BTreeMap<&'a str, StoredLoginRef<'a>>,
}

#[derive(Serialize)]
struct StoredLoginRef<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct StoredVault {
    #[serde(rename = "passwordMap", default)]
    password_map: HashMap<String, StoredLogin>,
}

#[derive(Deserialize)]
struct StoredLogin {
    username: String,
    password: String,
}

/// Vault configuration (non-sensitive, stored in plaintext)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VaultConfig {
    /// Salt file name inside the vault directory
    pub salt_file: String,

    /// Encrypted vault file name
    pub vault_file: String,

    /// Lock file name
    pub lock_file: String,

    /// PBKDF2 iterations.
    ///
    /// Not recorded in the vault file. Changing it after the vault was
    /// created derives a different key, and the correct passphrase is then
    /// rejected as wrong.
    pub kdf_iterations: u32,

    /// Longest password the generator will produce
    pub max_password_length: usize,

    /// Shortest master passphrase considered strong. May be raised but not
    /// lowered below [`MIN_PASSPHRASE_LENGTH`].
    pub min_passphrase_length: usize,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            salt_file: "salt.bin".to_string(),
            vault_file: "vault.bin".to_string(),
            lock_file: "vault.lock".to_string(),
            kdf_iterations: MIN_KDF_ITERATIONS,
            max_password_length: 64,
            min_passphrase_length: MIN_PASSPHRASE_LENGTH,
        }
    }
}

impl VaultConfig {
    pub fn validate(&self) -> VaultResult<()> {
        if self.kdf_iterations < MIN_KDF_ITERATIONS {
            return Err(VaultError::Config(format!(
                "kdf_iterations must be at least {}",
                MIN_KDF_ITERATIONS
            )));
        }
        if self.min_passphrase_length < MIN_PASSPHRASE_LENGTH {
            return Err(VaultError::Config(format!(
                "min_passphrase_length must be at least {}",
                MIN_PASSPHRASE_LENGTH
            )));
        }
        if self.max_password_length == 0 {
            return Err(VaultError::Config(
                "max_password_length must be at least 1".to_string(),
            ));
        }
        for name in [&self.salt_file, &self.vault_file, &self.lock_file] {
            if name.is_empty() {
                return Err(VaultError::Config("file names must not be empty".to_string()));
            }
        }
        Ok(())
    }
}
