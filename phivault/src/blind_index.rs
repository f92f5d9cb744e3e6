//! Blind index generation for searchable encryption.
//!
//! Blind indexes allow equality queries on encrypted fields without revealing
//! the plaintext value. They are HMAC-SHA256 digests keyed per field from a
//! hash key that is independent of the encryption keys.

use crate::error::CryptoError;
use crate::kdf::derive_field_key;
use crate::key_provider::KeyProvider;
use crate::registry::companion_field;
use hmac::{Hmac, Mac};
use serde_json::{Map, Value};
use sha2::Sha256;
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

/// Length of a search digest in hex characters.
pub const DIGEST_HEX_LEN: usize = 64;

/// Computes search digests and equality query fragments.
///
/// The digest is computed as:
/// `hex(HMAC-SHA256(HKDF(hash_key, field_name), normalize(value)))`
///
/// # Example
///
/// ```ignore
/// use phivault::blind_index::BlindIndexer;
/// use phivault_key_file::FileKeyProvider;
///
/// let indexer = BlindIndexer::new(FileKeyProvider::new("./keys")?);
/// let query = indexer.create_searchable_query("mrn", "12345678")?;
/// // {"mrn_hash": "3f1c..."}
/// ```
pub struct BlindIndexer<P: KeyProvider> {
    provider: Arc<P>,
}

impl<P: KeyProvider> BlindIndexer<P> {
    /// Creates an indexer that owns the key provider.
    pub fn new(provider: P) -> Self {
        Self::from_shared(Arc::new(provider))
    }

    /// Creates an indexer over a provider shared with other components.
    pub const fn from_shared(provider: Arc<P>) -> Self {
        Self { provider }
    }

    /// Returns the search digest of `plaintext` in `field_name`.
    ///
    /// `""` yields `""`.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The provider has no hash key
    /// - Field key derivation fails
    pub fn generate_search_hash(
        &self,
        field_name: &str,
        plaintext: &str,
    ) -> Result<String, CryptoError> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let hash_key = self.provider.get_hash_key().ok_or(CryptoError::NoHashKey)?;
        let field_key = derive_field_key(hash_key, field_name)?;

        let mut mac = HmacSha256::new_from_slice(field_key.as_slice())
            .map_err(|_| CryptoError::KeyDerivation)?;
        mac.update(normalize(plaintext).as_bytes());

        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Like [`generate_search_hash`](Self::generate_search_hash); `None` yields `""`.
    ///
    /// # Errors
    ///
    /// Same as [`generate_search_hash`](Self::generate_search_hash).
    pub fn generate_search_hash_opt(
        &self,
        field_name: &str,
        plaintext: Option<&str>,
    ) -> Result<String, CryptoError> {
        plaintext.map_or_else(|| Ok(String::new()), |p| self.generate_search_hash(field_name, p))
    }

    /// Builds the equality filter `{"<field_name>_hash": digest}`.
    ///
    /// # Errors
    ///
    /// Same as [`generate_search_hash`](Self::generate_search_hash).
    pub fn create_searchable_query(
        &self,
        field_name: &str,
        plaintext: &str,
    ) -> Result<Value, CryptoError> {
        let digest = self.generate_search_hash(field_name, plaintext)?;
        let mut query = Map::new();
        query.insert(companion_field(field_name), Value::String(digest));
        Ok(Value::Object(query))
    }
}

impl<P: KeyProvider> Clone for BlindIndexer<P> {
    fn clone(&self) -> Self {
        Self { provider: Arc::clone(&self.provider) }
    }
}

/// Normalizes a value before hashing: surrounding whitespace is dropped and
/// letters are lowercased.
#[must_use]
pub fn normalize(plaintext: &str) -> String {
    plaintext.trim().to_lowercase()
}
