//! File-based key provider for `phivault`.
//!
//! Keys are read once, when the provider is constructed. Rotating keys on
//! disk has no effect on a running provider; a new one must be built at the
//! next startup.

#![warn(clippy::pedantic, clippy::nursery)]

use phivault::error::ConfigurationError;
use phivault::key_provider::{DataKey, KeyProvider, Keyring, KEY_SIZE};
use rand::{rngs::OsRng, RngCore};
use secrecy::SecretVec;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use zeroize::Zeroizing;

/// File holding the id of the active encryption key.
pub const CURRENT_FILE: &str = "current";

/// File holding the blind index key.
pub const HASH_KEY_FILE: &str = "hash.key";

const KEY_PREFIX: &str = "enc_v";
const KEY_EXTENSION: &str = ".key";

/// File-based key provider.
///
/// Keys are stored in the filesystem with the following structure:
/// ```text
/// keys/
/// ├── enc_v1.key      (32 bytes, 0600 permissions)
/// ├── enc_v2.key      (32 bytes, 0600 permissions)
/// ├── current         (text: id of the active key, e.g. `enc_v2`)
/// └── hash.key        (32 bytes, 0600 permissions)
/// ```
///
/// The active key comes first in the verification order, followed by the
/// remaining keys from the highest version down.
pub struct FileKeyProvider {
    key_dir: PathBuf,
    keyring: Keyring,
}

impl FileKeyProvider {
    /// Loads every key in `key_dir`.
    ///
    /// # Arguments
    ///
    /// * `key_dir` - Directory containing key files
    ///
    /// # Errors
    ///
    /// Returns error if the directory, the `current` pointer, the key it
    /// names, or the hash key is missing, or if any key is malformed.
    pub fn new(key_dir: impl Into<PathBuf>) -> Result<Self, ConfigurationError> {
        let key_dir = key_dir.into();
        if !key_dir.is_dir() {
            return Err(ConfigurationError::MissingKey(format!(
                "key directory does not exist: {}",
                key_dir.display()
            )));
        }

        let current = read_current(&key_dir)?;
        let mut versions = list_versions(&key_dir)?;
        if !versions.iter().any(|v| key_id(*v) == current) {
            return Err(ConfigurationError::MissingKey(format!(
                "active key `{current}` has no key file"
            )));
        }
        versions.sort_unstable_by(|a, b| b.cmp(a));

        let mut keys = Vec::with_capacity(versions.len());
        keys.push(load_key(&key_dir, &current)?);
        for version in versions {
            let id = key_id(version);
            if id != current {
                keys.push(load_key(&key_dir, &id)?);
            }
        }

        let hash_key = read_secret(&key_dir.join(HASH_KEY_FILE))?;
        let keyring = Keyring::new(keys, hash_key)?;

        Ok(Self { key_dir, keyring })
    }

    /// Initializes a new key directory with `enc_v1` and a hash key.
    ///
    /// Returns the id of the active key.
    ///
    /// # Errors
    ///
    /// Returns error if the directory already holds keys or a file cannot be
    /// written.
    pub fn init(key_dir: impl AsRef<Path>) -> Result<String, ConfigurationError> {
        let key_dir = key_dir.as_ref();
        fs::create_dir_all(key_dir)?;

        let id = key_id(1);
        let hash_path = key_dir.join(HASH_KEY_FILE);
        let key_path = key_dir.join(key_file(&id));

        if key_dir.join(CURRENT_FILE).exists() || hash_path.exists() || key_path.exists() {
            return Err(ConfigurationError::Source(format!(
                "key directory already initialized: {}",
                key_dir.display()
            )));
        }

        let written = write_secret(&hash_path, generate_key().as_slice())
            .and_then(|()| write_secret(&key_path, generate_key().as_slice()))
            .and_then(|()| write_current(key_dir, &id));
        if let Err(e) = written {
            // Leave the directory empty so init can be retried.
            for path in [&hash_path, &key_path] {
                if path.exists() {
                    if let Err(cleanup) = fs::remove_file(path) {
                        warn!(
                            path = %path.display(),
                            error = %cleanup,
                            "failed to remove key file"
                        );
                    }
                }
            }
            return Err(e);
        }

        info!(key_dir = %key_dir.display(), active_key = %id, "key directory initialized");
        Ok(id)
    }

    /// Writes the next `enc_vN.key` and makes it the active key. Older keys
    /// stay on disk so existing blobs keep decrypting.
    ///
    /// Returns the id of the new active key.
    ///
    /// # Errors
    ///
    /// Returns error if the directory is not initialized or a file cannot be
    /// written.
    pub fn rotate(key_dir: impl AsRef<Path>) -> Result<String, ConfigurationError> {
        let key_dir = key_dir.as_ref();
        read_current(key_dir)?;

        let next = list_versions(key_dir)?.into_iter().max().unwrap_or(0) + 1;
        let id = key_id(next);
        write_secret(&key_dir.join(key_file(&id)), generate_key().as_slice())?;
        write_current(key_dir, &id)?;

        info!(key_dir = %key_dir.display(), active_key = %id, "encryption key rotated");
        Ok(id)
    }

    /// Returns the directory the keys were loaded from.
    #[must_use]
    pub fn key_dir(&self) -> &Path {
        &self.key_dir
    }

    /// Returns the loaded keyring.
    #[must_use]
    pub const fn keyring(&self) -> &Keyring {
        &self.keyring
    }
}

impl KeyProvider for FileKeyProvider {
    fn get_active_key(&self) -> Option<&DataKey> {
        self.keyring.get_active_key()
    }

    fn get_verification_keys(&self) -> Vec<&DataKey> {
        self.keyring.get_verification_keys()
    }

    fn get_hash_key(&self) -> Option<&SecretVec<u8>> {
        self.keyring.get_hash_key()
    }
}

fn key_id(version: u32) -> String {
    format!("{KEY_PREFIX}{version}")
}

fn key_file(id: &str) -> String {
    format!("{id}{KEY_EXTENSION}")
}

fn list_versions(key_dir: &Path) -> Result<Vec<u32>, ConfigurationError> {
    let mut versions = Vec::new();
    for entry in fs::read_dir(key_dir)? {
        let name = entry?.file_name();
        let Some(name) = name.to_str() else { continue };
        let version = name
            .strip_prefix(KEY_PREFIX)
            .and_then(|rest| rest.strip_suffix(KEY_EXTENSION))
            .and_then(|v| v.parse::<u32>().ok());
        if let Some(version) = version {
            versions.push(version);
        }
    }
    Ok(versions)
}

fn read_current(key_dir: &Path) -> Result<String, ConfigurationError> {
    let path = key_dir.join(CURRENT_FILE);
    if !path.exists() {
        return Err(ConfigurationError::MissingKey(format!(
            "no active key pointer at {}",
            path.display()
        )));
    }
    let id = fs::read_to_string(&path)?.trim().to_string();
    if id.is_empty() {
        return Err(ConfigurationError::MissingKey("active key pointer is empty".to_string()));
    }
    Ok(id)
}

fn write_current(key_dir: &Path, id: &str) -> Result<(), ConfigurationError> {
    // Replace via rename so a crash never leaves a half-written pointer.
    let tmp = key_dir.join(format!("{CURRENT_FILE}.tmp"));
    fs::write(&tmp, format!("{id}\n"))?;
    fs::rename(&tmp, key_dir.join(CURRENT_FILE))?;
    Ok(())
}

fn load_key(key_dir: &Path, id: &str) -> Result<DataKey, ConfigurationError> {
    DataKey::new(id, read_secret(&key_dir.join(key_file(id)))?)
}

fn read_secret(path: &Path) -> Result<SecretVec<u8>, ConfigurationError> {
    if !path.exists() {
        return Err(ConfigurationError::MissingKey(path.display().to_string()));
    }
    check_permissions(path)?;
    let bytes = Zeroizing::new(fs::read(path)?);
    Ok(SecretVec::new(bytes.to_vec()))
}

fn generate_key() -> Zeroizing<[u8; KEY_SIZE]> {
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    OsRng.fill_bytes(key.as_mut_slice());
    key
}

#[cfg(unix)]
fn write_secret(path: &Path, material: &[u8]) -> Result<(), ConfigurationError> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new().write(true).create_new(true).mode(0o600).open(path)?;
    file.write_all(material)?;
    file.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn write_secret(path: &Path, material: &[u8]) -> Result<(), ConfigurationError> {
    use std::io::Write;

    let mut file = fs::OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(material)?;
    file.sync_all()?;
    Ok(())
}

#[cfg(unix)]
fn check_permissions(path: &Path) -> Result<(), ConfigurationError> {
    use std::os::unix::fs::PermissionsExt;

    let mode = fs::metadata(path)?.permissions().mode();
    if mode & 0o077 != 0 {
        warn!(
            path = %path.display(),
            mode = %format!("{mode:o}"),
            "key file is readable by group or others"
        );
    }
    Ok(())
}

#[cfg(not(unix))]
#[allow(clippy::unnecessary_wraps)]
fn check_permissions(_path: &Path) -> Result<(), ConfigurationError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    #[test]
    fn test_init_and_load() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        let id = FileKeyProvider::init(temp_dir.path()).expect("Failed to initialize keys");
        assert_eq!(id, "enc_v1");

        let provider = FileKeyProvider::new(temp_dir.path()).expect("Failed to load keys");
        assert_eq!(provider.get_active_key().unwrap().id(), "enc_v1");
        assert_eq!(provider.get_verification_keys().len(), 1);
        assert_eq!(provider.get_hash_key().unwrap().expose_secret().len(), KEY_SIZE);
        assert_eq!(provider.key_dir(), temp_dir.path());
    }

    #[test]
    fn test_init_refuses_existing_directory() {
        let temp_dir = TempDir::new().unwrap();
        FileKeyProvider::init(temp_dir.path()).unwrap();

        assert!(FileKeyProvider::init(temp_dir.path()).is_err());
    }

    #[test]
    fn test_failed_init_can_be_retried() {
        let temp_dir = TempDir::new().unwrap();
        // A directory in the way of the temporary pointer makes the last step fail.
        let blocker = temp_dir.path().join(format!("{CURRENT_FILE}.tmp"));
        fs::create_dir(&blocker).unwrap();

        assert!(FileKeyProvider::init(temp_dir.path()).is_err());
        assert!(!temp_dir.path().join(HASH_KEY_FILE).exists());
        assert!(!temp_dir.path().join("enc_v1.key").exists());

        fs::remove_dir(&blocker).unwrap();
        assert_eq!(FileKeyProvider::init(temp_dir.path()).unwrap(), "enc_v1");
        assert!(FileKeyProvider::new(temp_dir.path()).is_ok());
    }

    #[test]
    fn test_init_refuses_stray_key_file() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("enc_v1.key"), [1u8; KEY_SIZE]).unwrap();

        assert!(FileKeyProvider::init(temp_dir.path()).is_err());
    }

    #[test]
    fn test_rotate_orders_keys() {
        let temp_dir = TempDir::new().unwrap();
        FileKeyProvider::init(temp_dir.path()).unwrap();

        assert_eq!(FileKeyProvider::rotate(temp_dir.path()).unwrap(), "enc_v2");
        assert_eq!(FileKeyProvider::rotate(temp_dir.path()).unwrap(), "enc_v3");

        let provider = FileKeyProvider::new(temp_dir.path()).unwrap();
        assert_eq!(provider.keyring().key_ids(), vec!["enc_v3", "enc_v2", "enc_v1"]);
    }

    #[test]
    fn test_current_may_point_at_older_key() {
        let temp_dir = TempDir::new().unwrap();
        FileKeyProvider::init(temp_dir.path()).unwrap();
        FileKeyProvider::rotate(temp_dir.path()).unwrap();
        fs::write(temp_dir.path().join(CURRENT_FILE), "enc_v1\n").unwrap();

        let provider = FileKeyProvider::new(temp_dir.path()).unwrap();
        assert_eq!(provider.keyring().key_ids(), vec!["enc_v1", "enc_v2"]);
    }

    #[test]
    fn test_rotate_requires_init() {
        let temp_dir = TempDir::new().unwrap();
        let result = FileKeyProvider::rotate(temp_dir.path());
        assert!(matches!(result, Err(ConfigurationError::MissingKey(_))));
    }

    #[test]
    fn test_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let result = FileKeyProvider::new(temp_dir.path().join("absent"));
        assert!(matches!(result, Err(ConfigurationError::MissingKey(_))));
    }

    #[test]
    fn test_missing_hash_key() {
        let temp_dir = TempDir::new().unwrap();
        FileKeyProvider::init(temp_dir.path()).unwrap();
        fs::remove_file(temp_dir.path().join(HASH_KEY_FILE)).unwrap();

        let result = FileKeyProvider::new(temp_dir.path());
        assert!(matches!(result, Err(ConfigurationError::MissingKey(_))));
    }

    #[test]
    fn test_dangling_current_pointer() {
        let temp_dir = TempDir::new().unwrap();
        FileKeyProvider::init(temp_dir.path()).unwrap();
        fs::write(temp_dir.path().join(CURRENT_FILE), "enc_v9").unwrap();

        let result = FileKeyProvider::new(temp_dir.path());
        assert!(matches!(result, Err(ConfigurationError::MissingKey(_))));
    }

    #[test]
    fn test_truncated_key_file() {
        let temp_dir = TempDir::new().unwrap();
        FileKeyProvider::init(temp_dir.path()).unwrap();
        fs::write(temp_dir.path().join("enc_v1.key"), [0u8; 10]).unwrap();

        let result = FileKeyProvider::new(temp_dir.path());
        assert!(matches!(result, Err(ConfigurationError::InvalidKey { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_key_files_are_private() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        FileKeyProvider::init(temp_dir.path()).unwrap();

        for name in ["enc_v1.key", HASH_KEY_FILE] {
            let mode = fs::metadata(temp_dir.path().join(name)).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600, "{name} has mode {mode:o}");
        }
    }
}
