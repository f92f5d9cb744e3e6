//! Key derivation using HKDF (HMAC-based Key Derivation Function).
//!
//! The blind index never keys HMAC with the raw hash key. Each field gets its
//! own key, derived with HKDF-SHA256 using the field name as the `info`
//! parameter, so digests of the same value in two fields are unrelated.

use crate::error::CryptoError;
use hkdf::Hkdf;
use secrecy::{ExposeSecret, SecretVec};
use sha2::Sha256;
use zeroize::Zeroizing;

/// Size of a derived field key in bytes (256 bits).
pub const FIELD_KEY_SIZE: usize = 32;

/// Salt fixing the derivation to the blind index purpose.
const BLIND_INDEX_SALT: &[u8] = b"phivault/blind-index/v1";

/// Derives the blind index key for one field from the hash key.
///
/// # Errors
///
/// Returns `CryptoError::KeyDerivation` if the expansion fails.
///
/// # Example
///
/// ```
/// use phivault::kdf::derive_field_key;
/// use secrecy::SecretVec;
///
/// let hash_key = SecretVec::new(vec![0u8; 32]);
/// let mrn_key = derive_field_key(&hash_key, "mrn").expect("derivation failed");
/// let nhs_key = derive_field_key(&hash_key, "nhs_number").expect("derivation failed");
/// assert_ne!(*mrn_key, *nhs_key);
/// ```
pub fn derive_field_key(
    hash_key: &SecretVec<u8>,
    field_name: &str,
) -> Result<Zeroizing<[u8; FIELD_KEY_SIZE]>, CryptoError> {
    let hkdf = Hkdf::<Sha256>::new(Some(BLIND_INDEX_SALT), hash_key.expose_secret());

    let info = format!("field:{field_name}");
    let mut okm = Zeroizing::new([0u8; FIELD_KEY_SIZE]);
    hkdf.expand(info.as_bytes(), okm.as_mut_slice()).map_err(|_| CryptoError::KeyDerivation)?;

    Ok(okm)
}
