//! Randomized authenticated encryption of single field values.
//!
//! Every call to [`CipherEngine::encrypt`] draws a fresh nonce, so sealing the
//! same plaintext twice yields two unrelated blobs. Equality search goes
//! through the blind index instead.

use crate::blob::{CipherBlob, NONCE_SIZE, TAG_SIZE};
use crate::error::CryptoError;
use crate::key_provider::{DataKey, KeyProvider};
use chacha20poly1305::{
    aead::{rand_core::RngCore, AeadInPlace, KeyInit, OsRng},
    ChaCha20Poly1305, Nonce, Tag,
};
use secrecy::ExposeSecret;
use std::sync::Arc;
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// Associated data bound into every blob.
const AAD: &[u8] = b"phivault:v1";

/// Encrypts and decrypts individual field values.
///
/// `""` passes through both directions untouched, and the `_opt` variants
/// additionally pass `None` through.
///
/// # Example
///
/// ```ignore
/// use phivault::cipher::CipherEngine;
/// use phivault_key_file::FileKeyProvider;
///
/// let provider = FileKeyProvider::new("./keys")?;
/// let engine = CipherEngine::new(provider);
///
/// let blob = engine.encrypt("12345678")?;
/// assert_eq!(engine.decrypt(&blob)?, "12345678");
/// ```
pub struct CipherEngine<P: KeyProvider> {
    provider: Arc<P>,
}

impl<P: KeyProvider> CipherEngine<P> {
    /// Creates an engine that owns the key provider.
    pub fn new(provider: P) -> Self {
        Self::from_shared(Arc::new(provider))
    }

    /// Creates an engine over a provider shared with other components.
    pub const fn from_shared(provider: Arc<P>) -> Self {
        Self { provider }
    }

    /// Encrypts `plaintext` under the active key.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::NoActiveKey` if the provider has no active key.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }
        let key = self.provider.get_active_key().ok_or(CryptoError::NoActiveKey)?;
        Ok(seal(key, plaintext.as_bytes())?.encode())
    }

    /// Like [`encrypt`](Self::encrypt), passing `None` through.
    ///
    /// # Errors
    ///
    /// Same as [`encrypt`](Self::encrypt).
    pub fn encrypt_opt(&self, plaintext: Option<&str>) -> Result<Option<String>, CryptoError> {
        plaintext.map(|p| self.encrypt(p)).transpose()
    }

    /// Decrypts a blob, trying each verification key in order.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The blob does not parse (`MalformedBlob`, `UnsupportedVersion`)
    /// - No verification key authenticates it (`AuthenticationFailed`)
    pub fn decrypt(&self, blob: &str) -> Result<String, CryptoError> {
        if blob.is_empty() {
            return Ok(String::new());
        }
        let (plaintext, _) = self.open(blob)?;
        String::from_utf8(plaintext.to_vec())
            .map_err(|_| CryptoError::MalformedBlob("plaintext is not valid UTF-8".to_string()))
    }

    /// Like [`decrypt`](Self::decrypt), passing `None` through.
    ///
    /// # Errors
    ///
    /// Same as [`decrypt`](Self::decrypt).
    pub fn decrypt_opt(&self, blob: Option<&str>) -> Result<Option<String>, CryptoError> {
        blob.map(|b| self.decrypt(b)).transpose()
    }

    /// Reports whether `blob` is sealed under the active key.
    ///
    /// # Errors
    ///
    /// Same as [`decrypt`](Self::decrypt).
    pub fn is_current(&self, blob: &str) -> Result<bool, CryptoError> {
        if blob.is_empty() {
            return Ok(true);
        }
        let (_, position) = self.open(blob)?;
        Ok(position == 0)
    }

    /// Re-seals `blob` under the active key. Blobs from retired keys come back
    /// sealed under the current one; current blobs get a fresh nonce.
    ///
    /// # Errors
    ///
    /// Returns error if the blob cannot be decrypted or re-encrypted.
    pub fn rewrap(&self, blob: &str) -> Result<String, CryptoError> {
        if blob.is_empty() {
            return Ok(String::new());
        }
        let (plaintext, _) = self.open(blob)?;
        let key = self.provider.get_active_key().ok_or(CryptoError::NoActiveKey)?;
        Ok(seal(key, &plaintext)?.encode())
    }

    /// Authenticates and decrypts `blob`, returning the plaintext bytes and the
    /// position of the key that opened it in the verification list.
    fn open(&self, blob: &str) -> Result<(Zeroizing<Vec<u8>>, usize), CryptoError> {
        let parsed = CipherBlob::parse(blob)?;
        let nonce = Nonce::from_slice(parsed.nonce());
        let tag = Tag::from_slice(parsed.tag());

        let keys = self.provider.get_verification_keys();
        if keys.is_empty() {
            return Err(CryptoError::NoActiveKey);
        }

        for (position, key) in keys.iter().enumerate() {
            let cipher = build_cipher(key)?;
            let mut buffer = Zeroizing::new(parsed.ciphertext().to_vec());
            if cipher.decrypt_in_place_detached(nonce, AAD, buffer.as_mut_slice(), tag).is_ok() {
                if position > 0 {
                    debug!(key_id = key.id(), "blob opened with retired key");
                }
                return Ok((buffer, position));
            }
        }

        warn!(candidates = keys.len(), "blob failed authentication under every verification key");
        Err(CryptoError::AuthenticationFailed)
    }
}

impl<P: KeyProvider> Clone for CipherEngine<P> {
    fn clone(&self) -> Self {
        Self { provider: Arc::clone(&self.provider) }
    }
}

fn build_cipher(key: &DataKey) -> Result<ChaCha20Poly1305, CryptoError> {
    ChaCha20Poly1305::new_from_slice(key.material().expose_secret())
        .map_err(|e| CryptoError::EncryptionFailed(format!("invalid key `{}`: {e}", key.id())))
}

fn seal(key: &DataKey, plaintext: &[u8]) -> Result<CipherBlob, CryptoError> {
    let cipher = build_cipher(key)?;

    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(&nonce), AAD, &mut buffer)
        .map_err(|e| CryptoError::EncryptionFailed(format!("ChaCha20-Poly1305 seal failed: {e}")))?;

    let mut tag_bytes = [0u8; TAG_SIZE];
    tag_bytes.copy_from_slice(&tag);

    Ok(CipherBlob::new(nonce, buffer, tag_bytes))
}
