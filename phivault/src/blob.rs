//! Text encoding of encrypted field values.
//!
//! A blob carries everything needed for decryption except the key:
//! - Version tag
//! - Nonce
//! - Ciphertext
//! - Authentication tag

use crate::error::CryptoError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use std::fmt;

/// Version tag written at the start of every blob.
pub const BLOB_VERSION: &str = "v1";

/// Nonce size for ChaCha20-Poly1305 (96 bits).
pub const NONCE_SIZE: usize = 12;

/// Poly1305 authentication tag size (128 bits).
pub const TAG_SIZE: usize = 16;

const SEPARATOR: char = '.';

/// Parsed form of an encrypted field value.
///
/// Format (each part base64url without padding):
/// ```text
/// v1.<nonce>.<ciphertext>.<tag>
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct CipherBlob {
    nonce: [u8; NONCE_SIZE],
    ciphertext: Vec<u8>,
    tag: [u8; TAG_SIZE],
}

impl CipherBlob {
    /// Creates a blob from its parts.
    #[must_use]
    pub const fn new(nonce: [u8; NONCE_SIZE], ciphertext: Vec<u8>, tag: [u8; TAG_SIZE]) -> Self {
        Self { nonce, ciphertext, tag }
    }

    /// Returns the nonce.
    #[must_use]
    pub const fn nonce(&self) -> &[u8; NONCE_SIZE] {
        &self.nonce
    }

    /// Returns the ciphertext without the tag.
    #[must_use]
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Returns the authentication tag.
    #[must_use]
    pub const fn tag(&self) -> &[u8; TAG_SIZE] {
        &self.tag
    }

    /// Serializes the blob to its text form.
    #[must_use]
    pub fn encode(&self) -> String {
        format!(
            "{BLOB_VERSION}{SEPARATOR}{}{SEPARATOR}{}{SEPARATOR}{}",
            URL_SAFE_NO_PAD.encode(self.nonce),
            URL_SAFE_NO_PAD.encode(&self.ciphertext),
            URL_SAFE_NO_PAD.encode(self.tag),
        )
    }

    /// Parses a blob from its text form.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::UnsupportedVersion` if the blob is tagged with a
    /// version other than [`BLOB_VERSION`], and `CryptoError::MalformedBlob`
    /// for anything else that does not decode.
    pub fn parse(encoded: &str) -> Result<Self, CryptoError> {
        let parts: Vec<&str> = encoded.split(SEPARATOR).collect();

        let version = parts[0];
        if version != BLOB_VERSION {
            if is_version_tag(version) {
                return Err(CryptoError::UnsupportedVersion {
                    found: version.to_string(),
                    supported: BLOB_VERSION,
                });
            }
            return Err(CryptoError::MalformedBlob("missing version tag".to_string()));
        }

        let [_, nonce, ciphertext, tag] = parts.as_slice() else {
            return Err(CryptoError::MalformedBlob(format!(
                "expected 4 parts, found {}",
                parts.len()
            )));
        };

        let nonce: [u8; NONCE_SIZE] = decode_part(nonce, "nonce")?
            .try_into()
            .map_err(|_| CryptoError::MalformedBlob("invalid nonce size".to_string()))?;

        let ciphertext = decode_part(ciphertext, "ciphertext")?;
        if ciphertext.is_empty() {
            return Err(CryptoError::MalformedBlob("empty ciphertext".to_string()));
        }

        let tag: [u8; TAG_SIZE] = decode_part(tag, "tag")?
            .try_into()
            .map_err(|_| CryptoError::MalformedBlob("invalid tag size".to_string()))?;

        Ok(Self { nonce, ciphertext, tag })
    }
}

impl fmt::Debug for CipherBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherBlob")
            .field("version", &BLOB_VERSION)
            .field("ciphertext_len", &self.ciphertext.len())
            .finish_non_exhaustive()
    }
}

fn decode_part(part: &str, name: &str) -> Result<Vec<u8>, CryptoError> {
    URL_SAFE_NO_PAD
        .decode(part)
        .map_err(|e| CryptoError::MalformedBlob(format!("invalid {name} encoding: {e}")))
}

// `v` followed by digits, e.g. `v2`.
fn is_version_tag(s: &str) -> bool {
    s.len() > 1 && s.starts_with('v') && s[1..].bytes().all(|b| b.is_ascii_digit())
}
