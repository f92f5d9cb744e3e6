//! Key provider abstraction and the immutable in-memory keyring.

use crate::error::ConfigurationError;
use secrecy::{ExposeSecret, SecretVec};
use std::collections::HashSet;
use std::fmt;
use tracing::info;

/// Size of an encryption key in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

/// Minimum size of the blind index hash key in bytes.
pub const MIN_HASH_KEY_SIZE: usize = 32;

/// A named 256-bit encryption key.
pub struct DataKey {
    id: String,
    material: SecretVec<u8>,
}

impl DataKey {
    /// Creates a key after checking its length.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::InvalidKey` if the id is empty or the
    /// material is not exactly [`KEY_SIZE`] bytes.
    pub fn new(id: impl Into<String>, material: SecretVec<u8>) -> Result<Self, ConfigurationError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ConfigurationError::InvalidKey {
                id,
                reason: "key id must not be empty".to_string(),
            });
        }
        let len = material.expose_secret().len();
        if len != KEY_SIZE {
            return Err(ConfigurationError::InvalidKey {
                id,
                reason: format!("expected {KEY_SIZE} bytes, got {len}"),
            });
        }
        Ok(Self { id, material })
    }

    /// Returns the key identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the secret key material.
    #[must_use]
    pub const fn material(&self) -> &SecretVec<u8> {
        &self.material
    }
}

impl fmt::Debug for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataKey").field("id", &self.id).field("material", &"[REDACTED]").finish()
    }
}

/// Supplies the key material used by the cipher engine and blind index generator.
///
/// Implementations are loaded once at startup and never mutated afterwards,
/// so every method is a plain read. They must be `Send + Sync` to support
/// concurrent use.
pub trait KeyProvider: Send + Sync {
    /// Returns the key new blobs are sealed under.
    fn get_active_key(&self) -> Option<&DataKey>;

    /// Returns every key a blob may have been sealed under, active key first,
    /// then retired keys from newest to oldest.
    fn get_verification_keys(&self) -> Vec<&DataKey>;

    /// Returns the blind index key. It lives in a separate namespace from the
    /// encryption keys.
    fn get_hash_key(&self) -> Option<&SecretVec<u8>>;
}

/// Immutable keyset validated at construction.
///
/// # Example
///
/// ```
/// use phivault::key_provider::{DataKey, KeyProvider, Keyring};
/// use secrecy::SecretVec;
///
/// let active = DataKey::new("enc_v2", SecretVec::new(vec![2u8; 32])).unwrap();
/// let retired = DataKey::new("enc_v1", SecretVec::new(vec![1u8; 32])).unwrap();
/// let keyring = Keyring::new(vec![active, retired], SecretVec::new(vec![9u8; 32])).unwrap();
///
/// assert_eq!(keyring.get_active_key().unwrap().id(), "enc_v2");
/// assert_eq!(keyring.get_verification_keys().len(), 2);
/// ```
pub struct Keyring {
    keys: Vec<DataKey>,
    hash_key: SecretVec<u8>,
}

impl Keyring {
    /// Builds a keyring. `keys` is ordered: the first entry is the active key,
    /// the rest are retired keys still accepted for decryption.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if `keys` is empty, ids repeat, the hash
    /// key is too short, or the hash key reuses an encryption key.
    pub fn new(keys: Vec<DataKey>, hash_key: SecretVec<u8>) -> Result<Self, ConfigurationError> {
        if keys.is_empty() {
            return Err(ConfigurationError::NoActiveKey);
        }

        let mut seen = HashSet::new();
        for key in &keys {
            if !seen.insert(key.id()) {
                return Err(ConfigurationError::DuplicateKeyId(key.id().to_string()));
            }
        }

        let hash_len = hash_key.expose_secret().len();
        if hash_len < MIN_HASH_KEY_SIZE {
            return Err(ConfigurationError::InvalidKey {
                id: "hash".to_string(),
                reason: format!("expected at least {MIN_HASH_KEY_SIZE} bytes, got {hash_len}"),
            });
        }
        if keys.iter().any(|k| k.material().expose_secret() == hash_key.expose_secret()) {
            return Err(ConfigurationError::InvalidKey {
                id: "hash".to_string(),
                reason: "hash key must not reuse an encryption key".to_string(),
            });
        }

        info!(
            active_key = keys[0].id(),
            retired_keys = keys.len() - 1,
            "keyring loaded"
        );

        Ok(Self { keys, hash_key })
    }

    /// Returns the identifier of the active key.
    #[must_use]
    pub fn active_key_id(&self) -> &str {
        self.keys[0].id()
    }

    /// Returns the identifiers of all keys, active first.
    #[must_use]
    pub fn key_ids(&self) -> Vec<&str> {
        self.keys.iter().map(DataKey::id).collect()
    }
}

impl KeyProvider for Keyring {
    fn get_active_key(&self) -> Option<&DataKey> {
        self.keys.first()
    }

    fn get_verification_keys(&self) -> Vec<&DataKey> {
        self.keys.iter().collect()
    }

    fn get_hash_key(&self) -> Option<&SecretVec<u8>> {
        Some(&self.hash_key)
    }
}

impl fmt::Debug for Keyring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keyring")
            .field("keys", &self.key_ids())
            .field("hash_key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: &str, byte: u8) -> DataKey {
        DataKey::new(id, SecretVec::new(vec![byte; KEY_SIZE])).unwrap()
    }

    #[test]
    fn test_keyring_orders_active_first() {
        let keys = vec![key("enc_v3", 3), key("enc_v2", 2), key("enc_v1", 1)];
        let keyring = Keyring::new(keys, SecretVec::new(vec![9; 32])).unwrap();

        assert_eq!(keyring.active_key_id(), "enc_v3");
        assert_eq!(keyring.get_active_key().unwrap().id(), "enc_v3");
        let ids: Vec<&str> = keyring.get_verification_keys().iter().map(|k| k.id()).collect();
        assert_eq!(ids, vec!["enc_v3", "enc_v2", "enc_v1"]);
        assert!(keyring.get_hash_key().is_some());
    }

    #[test]
    fn test_keyring_requires_a_key() {
        let result = Keyring::new(vec![], SecretVec::new(vec![9; 32]));
        assert!(matches!(result, Err(ConfigurationError::NoActiveKey)));
    }

    #[test]
    fn test_keyring_rejects_duplicate_ids() {
        let result =
            Keyring::new(vec![key("enc_v1", 1), key("enc_v1", 2)], SecretVec::new(vec![9; 32]));
        assert!(matches!(result, Err(ConfigurationError::DuplicateKeyId(id)) if id == "enc_v1"));
    }

    #[test]
    fn test_keyring_rejects_short_hash_key() {
        let result = Keyring::new(vec![key("enc_v1", 1)], SecretVec::new(vec![9; 16]));
        assert!(matches!(result, Err(ConfigurationError::InvalidKey { .. })));
    }

    #[test]
    fn test_keyring_rejects_shared_hash_key() {
        let result = Keyring::new(vec![key("enc_v1", 1)], SecretVec::new(vec![1; 32]));
        assert!(matches!(result, Err(ConfigurationError::InvalidKey { .. })));
    }

    #[test]
    fn test_data_key_rejects_wrong_length() {
        let result = DataKey::new("enc_v1", SecretVec::new(vec![0; 16]));
        assert!(matches!(result, Err(ConfigurationError::InvalidKey { .. })));
    }

    #[test]
    fn test_debug_redacts_material() {
        let keyring = Keyring::new(vec![key("enc_v1", 1)], SecretVec::new(vec![9; 32])).unwrap();
        let rendered = format!("{keyring:?}");
        assert!(rendered.contains("enc_v1"));
        assert!(rendered.contains("REDACTED"));
    }
}
