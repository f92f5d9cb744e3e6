//! Loading key material from environment variables.
//!
//! Exactly two secrets are read, both prefixed `PHIVAULT_`:
//!
//! - `PHIVAULT_ENCRYPTION_KEYS`: comma-separated `id:base64key` entries,
//!   active key first, then retired keys still accepted for decryption.
//! - `PHIVAULT_HASH_KEY`: base64 blind index key.
//!
//! Keys use standard base64 with padding. Loading happens once at startup;
//! any problem is a fatal [`ConfigurationError`].

use crate::error::ConfigurationError;
use crate::key_provider::{DataKey, Keyring};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use secrecy::{ExposeSecret, SecretString, SecretVec};
use serde::Deserialize;
use std::collections::HashMap;
use zeroize::Zeroizing;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "PHIVAULT";

/// Raw key configuration as read from the environment.
#[derive(Deserialize)]
pub struct KeyringConfig {
    /// `id:base64key` entries, active first
    pub encryption_keys: SecretString,
    /// Base64 hash key
    pub hash_key: SecretString,
}

impl KeyringConfig {
    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::Source` if either variable is absent.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_environment(environment())
    }

    /// Reads the configuration from an explicit variable map instead of the
    /// process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::Source` if either variable is absent.
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, ConfigurationError> {
        Self::from_environment(environment().source(Some(vars)))
    }

    fn from_environment(env: config::Environment) -> Result<Self, ConfigurationError> {
        config::Config::builder()
            .add_source(env)
            .build()
            .and_then(config::Config::try_deserialize)
            .map_err(|e| ConfigurationError::Source(e.to_string()))
    }

    /// Decodes and validates the key material into an immutable [`Keyring`].
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if an entry is not `id:base64key`, a key
    /// has the wrong length, or the keyring fails validation.
    pub fn into_keyring(self) -> Result<Keyring, ConfigurationError> {
        let keys = parse_keyset(self.encryption_keys.expose_secret())?;
        let hash_key = decode_key("hash", self.hash_key.expose_secret())?;
        Keyring::new(keys, hash_key)
    }
}

/// Loads the keyring from `PHIVAULT_ENCRYPTION_KEYS` and `PHIVAULT_HASH_KEY`.
///
/// # Errors
///
/// Returns a `ConfigurationError` if the variables are missing or malformed.
pub fn keyring_from_env() -> Result<Keyring, ConfigurationError> {
    KeyringConfig::from_env()?.into_keyring()
}

/// Renders a keyset entry in the `id:base64key` form read by this module.
#[must_use]
pub fn format_key_entry(id: &str, material: &[u8]) -> String {
    format!("{id}:{}", STANDARD.encode(material))
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX).prefix_separator("_")
}

fn parse_keyset(raw: &str) -> Result<Vec<DataKey>, ConfigurationError> {
    let entries: Vec<&str> = raw.split(',').map(str::trim).filter(|e| !e.is_empty()).collect();
    if entries.is_empty() {
        return Err(ConfigurationError::MissingKey("encryption key".to_string()));
    }

    entries
        .into_iter()
        .map(|entry| {
            let (id, encoded) = entry.split_once(':').ok_or_else(|| {
                ConfigurationError::InvalidKey {
                    id: "<unnamed>".to_string(),
                    reason: "expected `id:base64key`".to_string(),
                }
            })?;
            let id = id.trim();
            DataKey::new(id, decode_key(id, encoded)?)
        })
        .collect()
}

fn decode_key(id: &str, encoded: &str) -> Result<SecretVec<u8>, ConfigurationError> {
    let bytes = STANDARD.decode(encoded.trim()).map_err(|e| ConfigurationError::InvalidKey {
        id: id.to_string(),
        reason: format!("invalid base64: {e}"),
    })?;
    let bytes = Zeroizing::new(bytes);
    Ok(SecretVec::new(bytes.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_provider::KeyProvider;

    fn vars(keys: &str, hash: &str) -> HashMap<String, String> {
        HashMap::from([
            ("PHIVAULT_ENCRYPTION_KEYS".to_string(), keys.to_string()),
            ("PHIVAULT_HASH_KEY".to_string(), hash.to_string()),
        ])
    }

    #[test]
    fn test_keyring_from_vars() {
        let keys = format!(
            "{},{}",
            format_key_entry("enc_v2", &[2u8; 32]),
            format_key_entry("enc_v1", &[1u8; 32])
        );
        let hash = STANDARD.encode([9u8; 32]);

        let keyring = KeyringConfig::from_vars(vars(&keys, &hash)).unwrap().into_keyring().unwrap();

        assert_eq!(keyring.key_ids(), vec!["enc_v2", "enc_v1"]);
        assert_eq!(keyring.get_active_key().unwrap().id(), "enc_v2");
    }

    #[test]
    fn test_missing_hash_key() {
        let vars = HashMap::from([(
            "PHIVAULT_ENCRYPTION_KEYS".to_string(),
            format_key_entry("enc_v1", &[1u8; 32]),
        )]);

        let result = KeyringConfig::from_vars(vars);
        assert!(matches!(result, Err(ConfigurationError::Source(_))));
    }

    #[test]
    fn test_empty_keyset() {
        let config = KeyringConfig::from_vars(vars(" , ", &STANDARD.encode([9u8; 32]))).unwrap();
        assert!(matches!(config.into_keyring(), Err(ConfigurationError::MissingKey(_))));
    }

    #[test]
    fn test_entry_without_id() {
        let config =
            KeyringConfig::from_vars(vars(&STANDARD.encode([1u8; 32]), &STANDARD.encode([9u8; 32])))
                .unwrap();
        assert!(matches!(config.into_keyring(), Err(ConfigurationError::InvalidKey { .. })));
    }

    #[test]
    fn test_bad_base64() {
        let config = KeyringConfig::from_vars(vars("enc_v1:not base64!", "AAAA")).unwrap();
        assert!(matches!(
            config.into_keyring(),
            Err(ConfigurationError::InvalidKey { id, .. }) if id == "enc_v1"
        ));
    }

    #[test]
    fn test_short_key() {
        let keys = format_key_entry("enc_v1", &[1u8; 16]);
        let config = KeyringConfig::from_vars(vars(&keys, &STANDARD.encode([9u8; 32]))).unwrap();
        assert!(matches!(config.into_keyring(), Err(ConfigurationError::InvalidKey { .. })));
    }
}
