//! Encrypted file storage for vault data
//!
//! Handles reading/writing the encrypted vault file with:
//! - Atomic writes (write to temp, then rename)
//! - Owner-only permissions on Unix
//! - A non-blocking single-instance lock file

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::crypto::MasterKey;
use crate::error::{VaultError, VaultResult};
use crate::models::{VaultConfig, VaultStore};

/// Default vault directory, relative to the working directory
pub const DEFAULT_VAULT_DIR: &str = "vault";

/// Config file name
const CONFIG_FILE: &str = "config.toml";

/// Get the config file path
pub fn config_file_path(base_dir: &Path) -> PathBuf {
    base_dir.join(CONFIG_FILE)
}

/// Ensure the vault directory exists with proper permissions
pub fn ensure_vault_dir(base_dir: &Path) -> VaultResult<()> {
    if base_dir.as_os_str().is_empty() || base_dir.exists() {
        return Ok(());
    }

    fs::create_dir_all(base_dir)?;

    // Set directory permissions to 700 (owner only) on Unix
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(base_dir, fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

/// Load vault configuration, falling back to defaults when absent
pub fn load_config(base_dir: &Path) -> VaultResult<VaultConfig> {
    let config_path = config_file_path(base_dir);

    if !config_path.exists() {
        return Ok(VaultConfig::default());
    }

    let content = fs::read_to_string(&config_path)?;
    let config: VaultConfig =
        toml::from_str(&content).map_err(|e| VaultError::Config(e.to_string()))?;
    config.validate()?;

    Ok(config)
}

/// Save vault configuration
pub fn save_config(base_dir: &Path, config: &VaultConfig) -> VaultResult<()> {
    config.validate()?;
    ensure_vault_dir(base_dir)?;

    let content =
        toml::to_string_pretty(config).map_err(|e| VaultError::Config(e.to_string()))?;
    fs::write(config_file_path(base_dir), content)?;

    Ok(())
}

/// Resolved on-disk locations for one vault
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultPaths {
    pub base_dir: PathBuf,
    pub salt: PathBuf,
    pub vault: PathBuf,
    pub lock: PathBuf,
}

impl VaultPaths {
    pub fn new(base_dir: &Path, config: &VaultConfig) -> Self {
        Self {
            base_dir: base_dir.to_path_buf(),
            salt: base_dir.join(&config.salt_file),
            vault: base_dir.join(&config.vault_file),
            lock: base_dir.join(&config.lock_file),
        }
    }
}

/// Reads and writes the encrypted vault file and hands out the lock.
#[derive(Debug, Clone)]
pub struct VaultPersistence {
    paths: VaultPaths,
}

impl VaultPersistence {
    pub fn new(paths: VaultPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &VaultPaths {
        &self.paths
    }

    /// Check if a vault file exists
    pub fn vault_exists(&self) -> bool {
        self.paths.vault.exists()
    }

    /// Load and decrypt the store. A missing vault file is a new, empty vault.
    pub fn load(&self, key: &MasterKey) -> VaultResult<VaultStore> {
        if !self.vault_exists() {
            info!("No vault at {}, starting empty", self.paths.vault.display());
            return Ok(VaultStore::new());
        }

        let blob = fs::read(&self.paths.vault)?;
        let plaintext = key.decrypt(&blob)?;
        let store = VaultStore::from_json(&plaintext)?;

        debug!(entries = store.len(), "Loaded vault");
        Ok(store)
    }

    /// Encrypt and write the store, replacing the vault file atomically.
    pub fn save(&self, store: &VaultStore, key: &MasterKey) -> VaultResult<()> {
        let plaintext = store.to_json()?;
        let blob = key.encrypt(&plaintext)?;
        drop(plaintext);

        ensure_vault_dir(&self.paths.base_dir)?;

        let temp_path = self.paths.vault.with_extension("bin.tmp");
        if let Err(e) = write_vault_file(&temp_path, &blob) {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }
        if let Err(e) = fs::rename(&temp_path, &self.paths.vault) {
            let _ = fs::remove_file(&temp_path);
            return Err(VaultError::Io(e));
        }
        sync_dir(&self.paths.base_dir)?;

        debug!(entries = store.len(), "Saved vault");
        Ok(())
    }

    /// Take the single-instance lock without waiting.
    pub fn acquire_lock(&self) -> VaultResult<VaultLock> {
        VaultLock::acquire(&self.paths.lock)
    }
}

/// Write encrypted vault to file
fn write_vault_file(path: &Path, blob: &[u8]) -> VaultResult<()> {
    let mut file = File::create(path)?;
    file.write_all(blob)?;
    file.sync_all()?;

    // Set file permissions to 600 (owner only) on Unix
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

/// Flush a rename in `dir` to disk.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> VaultResult<()> {
    let dir = if dir.as_os_str().is_empty() {
        Path::new(".")
    } else {
        dir
    };
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> VaultResult<()> {
    Ok(())
}

/// Exclusive advisory lock on the vault lock file.
///
/// Held for the whole open session. `release` unlocks and deletes the
/// file; dropping an unreleased lock does the same on a best-effort basis.
#[derive(Debug)]
pub struct VaultLock {
    file: Option<File>,
    path: PathBuf,
}

impl VaultLock {
    fn acquire(path: &Path) -> VaultResult<Self> {
        if let Some(parent) = path.parent() {
            ensure_vault_dir(parent)?;
        }

        let file = open_lock_file(path)?;
        Self::lock_opened(file, path)
    }

    /// Lock an already opened handle on `path`.
    ///
    /// The handle may refer to a file a previous holder has since unlinked;
    /// holding a lock on that is not holding the vault lock.
    fn lock_opened(file: File, path: &Path) -> VaultResult<Self> {
        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if is_contended(&e) => {
                info!("Vault lock {} is held by another instance", path.display());
                return Err(VaultError::AlreadyOpenElsewhere);
            }
            Err(e) => return Err(VaultError::Io(e)),
        }

        if !is_current_lock_file(&file, path)? {
            info!("Vault lock {} was replaced while locking", path.display());
            return Err(VaultError::AlreadyOpenElsewhere);
        }

        debug!("Acquired vault lock {}", path.display());
        Ok(Self {
            file: Some(file),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unlock, close, and delete the lock file.
    pub fn release(mut self) -> VaultResult<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> VaultResult<()> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };

        // Unlink before unlocking: any handle locked after this point must
        // fail the identity check in `lock_opened`.
        #[cfg(unix)]
        let removed = remove_lock_file(&self.path);
        let unlocked = FileExt::unlock(&file);
        drop(file);
        #[cfg(not(unix))]
        let removed = remove_lock_file(&self.path);
        removed.map_err(VaultError::LockRelease)?;
        unlocked.map_err(VaultError::LockRelease)?;

        debug!("Released vault lock {}", self.path.display());
        Ok(())
    }
}

impl Drop for VaultLock {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            warn!("Failed to release vault lock {}: {}", self.path.display(), e);
        }
    }
}

fn open_lock_file(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)
}

fn remove_lock_file(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// True if `file` is still the file named by `path`.
#[cfg(unix)]
fn is_current_lock_file(file: &File, path: &Path) -> VaultResult<bool> {
    use std::os::unix::fs::MetadataExt;

    let held = file.metadata()?;
    match fs::metadata(path) {
        Ok(current) => Ok(held.dev() == current.dev() && held.ino() == current.ino()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(VaultError::Io(e)),
    }
}

// Open files cannot be unlinked on Windows
#[cfg(not(unix))]
fn is_current_lock_file(_file: &File, path: &Path) -> VaultResult<bool> {
    Ok(path.exists())
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kdf::KeyDerivation;
    use tempfile::TempDir;
    use zeroize::Zeroizing;

    fn setup(temp_dir: &TempDir) -> (VaultPersistence, KeyDerivation) {
        let config = VaultConfig::default();
        let paths = VaultPaths::new(temp_dir.path(), &config);
        let kdf = KeyDerivation::new(&paths.salt, config.kdf_iterations).unwrap();
        (VaultPersistence::new(paths), kdf)
    }

    fn secret(s: &str) -> Zeroizing<String> {
        Zeroizing::new(s.to_string())
    }

    #[test]
    fn test_missing_vault_loads_empty() {
        let temp_dir = TempDir::new().unwrap();
        let (persistence, kdf) = setup(&temp_dir);
        let key = kdf.derive_key(b"test-password").unwrap();

        let store = persistence.load(&key).unwrap();
        assert!(store.is_empty());
        assert!(!persistence.vault_exists());
    }

    #[test]
    fn test_save_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let (persistence, kdf) = setup(&temp_dir);
        let key = kdf.derive_key(b"test-password").unwrap();

        let mut store = VaultStore::new();
        store.add_login("mail", secret("alice"), secret("pw1")).unwrap();
        store.add_login("bank", secret("bob"), secret("pw2")).unwrap();
        persistence.save(&store, &key).unwrap();

        assert!(persistence.vault_exists());
        assert!(!persistence.paths().vault.with_extension("bin.tmp").exists());

        let reloaded = persistence.load(&key).unwrap();
        assert!(reloaded.same_contents(&store));
    }

    #[test]
    fn test_wrong_password() {
        let temp_dir = TempDir::new().unwrap();
        let (persistence, kdf) = setup(&temp_dir);

        let key = kdf.derive_key(b"password1").unwrap();
        persistence.save(&VaultStore::new(), &key).unwrap();

        let wrong = kdf.derive_key(b"password2").unwrap();
        let result = persistence.load(&wrong);
        assert!(matches!(result, Err(VaultError::WrongPassphrase)));
    }

    #[test]
    fn test_vault_file_is_not_plaintext() {
        let temp_dir = TempDir::new().unwrap();
        let (persistence, kdf) = setup(&temp_dir);
        let key = kdf.derive_key(b"test-password").unwrap();

        let mut store = VaultStore::new();
        store.add_login("mail", secret("alice"), secret("hunter2")).unwrap();
        persistence.save(&store, &key).unwrap();

        let raw = fs::read(&persistence.paths().vault).unwrap();
        let raw = String::from_utf8_lossy(&raw);
        assert!(!raw.contains("hunter2"));
        assert!(!raw.contains("passwordMap"));
    }

    #[test]
    fn test_garbage_plaintext_is_unexpected_content() {
        let temp_dir = TempDir::new().unwrap();
        let (persistence, kdf) = setup(&temp_dir);
        let key = kdf.derive_key(b"test-password").unwrap();

        let blob = key.encrypt(b"not json at all").unwrap();
        fs::write(&persistence.paths().vault, blob).unwrap();

        let result = persistence.load(&key);
        assert!(matches!(result, Err(VaultError::UnexpectedContent(_))));
    }

    #[test]
    fn test_lock_is_exclusive() {
        let temp_dir = TempDir::new().unwrap();
        let (persistence, _) = setup(&temp_dir);

        let lock = persistence.acquire_lock().unwrap();
        assert!(lock.path().exists());

        let second = persistence.acquire_lock();
        assert!(matches!(second, Err(VaultError::AlreadyOpenElsewhere)));
        // a failed attempt must not remove the holder's lock file
        assert!(lock.path().exists());

        lock.release().unwrap();
        assert!(!persistence.paths().lock.exists());

        let again = persistence.acquire_lock().unwrap();
        again.release().unwrap();
    }

    #[test]
    #[cfg(unix)]
    fn test_lock_on_unlinked_file_is_not_held() {
        let temp_dir = TempDir::new().unwrap();
        let (persistence, _) = setup(&temp_dir);
        let path = persistence.paths().lock.clone();

        let first = persistence.acquire_lock().unwrap();
        // a second instance opened the lock file before the first released it
        let stale = open_lock_file(&path).unwrap();
        first.release().unwrap();

        let result = VaultLock::lock_opened(stale, &path);
        assert!(matches!(result, Err(VaultError::AlreadyOpenElsewhere)));

        // a fresh attempt gets the lock, and there is only one holder
        let holder = persistence.acquire_lock().unwrap();
        let stale = open_lock_file(&path).unwrap();
        assert!(matches!(
            VaultLock::lock_opened(stale, &path),
            Err(VaultError::AlreadyOpenElsewhere)
        ));
        holder.release().unwrap();
    }

    #[test]
    #[cfg(unix)]
    fn test_replaced_lock_file_is_not_held() {
        let temp_dir = TempDir::new().unwrap();
        let (persistence, _) = setup(&temp_dir);
        let path = persistence.paths().lock.clone();

        let stale = open_lock_file(&path).unwrap();
        fs::remove_file(&path).unwrap();
        let current = persistence.acquire_lock().unwrap();

        assert!(matches!(
            VaultLock::lock_opened(stale, &path),
            Err(VaultError::AlreadyOpenElsewhere)
        ));
        assert!(path.exists());
        current.release().unwrap();
    }

    #[test]
    fn test_failed_rename_leaves_no_temp_file() {
        let temp_dir = TempDir::new().unwrap();
        let (persistence, kdf) = setup(&temp_dir);
        let key = kdf.derive_key(b"test-password").unwrap();

        let vault = persistence.paths().vault.clone();
        fs::create_dir(&vault).unwrap();
        fs::write(vault.join("occupied"), b"x").unwrap();

        assert!(persistence.save(&VaultStore::new(), &key).is_err());
        assert!(!vault.with_extension("bin.tmp").exists());
    }

    #[test]
    fn test_dropped_lock_is_released() {
        let temp_dir = TempDir::new().unwrap();
        let (persistence, _) = setup(&temp_dir);

        {
            let _lock = persistence.acquire_lock().unwrap();
        }
        assert!(!persistence.paths().lock.exists());
        persistence.acquire_lock().unwrap().release().unwrap();
    }

    #[test]
    fn test_config_roundtrip_and_default() {
        let temp_dir = TempDir::new().unwrap();
        assert_eq!(load_config(temp_dir.path()).unwrap(), VaultConfig::default());

        let config = VaultConfig {
            max_password_length: 32,
            kdf_iterations: 100_000,
            ..VaultConfig::default()
        };
        save_config(temp_dir.path(), &config).unwrap();
        assert_eq!(load_config(temp_dir.path()).unwrap(), config);
    }

    #[test]
    fn test_malformed_config_rejected() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(config_file_path(temp_dir.path()), "kdf_iterations = \"lots\"").unwrap();
        assert!(matches!(load_config(temp_dir.path()), Err(VaultError::Config(_))));

        fs::write(config_file_path(temp_dir.path()), "kdf_iterations = 10").unwrap();
        assert!(matches!(load_config(temp_dir.path()), Err(VaultError::Config(_))));
    }
}
