//! Error types for `phivault` operations.

use std::fmt;

/// Main error type for `phivault` operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Key material or field registry could not be loaded
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// A single-value cryptographic operation failed
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// A whole-document transform failed
    #[error(transparent)]
    Document(#[from] DocumentError),
}

/// Errors raised by the cipher engine and blind index generator.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// The key provider has no active encryption key
    #[error("no active encryption key available")]
    NoActiveKey,

    /// The key provider has no hash key
    #[error("no hash key available")]
    NoHashKey,

    /// The stored blob does not follow the `v1.<nonce>.<ciphertext>.<tag>` encoding
    #[error("malformed blob: {0}")]
    MalformedBlob(String),

    /// The blob carries a version tag this build cannot read
    #[error("unsupported blob version: {found} (supported: {supported})")]
    UnsupportedVersion {
        /// The version tag found in the blob
        found: String,
        /// Supported versions
        supported: &'static str,
    },

    /// No verification key authenticated the blob (data may be corrupted or tampered)
    #[error("authentication failed: blob may be corrupted or tampered")]
    AuthenticationFailed,

    /// The AEAD primitive refused to seal the value
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Field-scoped key derivation failed
    #[error("key derivation failed")]
    KeyDerivation,
}

/// Errors raised while transforming a whole document.
///
/// `field` is the dotted path of the offending leaf, e.g. `encounters[1].mrn`.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    /// A sensitive field could not be encrypted
    #[error("failed to encrypt field `{field}`")]
    Encryption {
        /// Path of the field
        field: String,
        /// Underlying failure
        #[source]
        source: CryptoError,
    },

    /// A sensitive field could not be decrypted; no part of the document is returned
    #[error("failed to decrypt field `{field}`")]
    Decryption {
        /// Path of the field
        field: String,
        /// Underlying failure
        #[source]
        source: CryptoError,
    },

    /// The search digest of a sensitive field could not be computed
    #[error("failed to compute search digest for field `{field}`")]
    SearchHash {
        /// Path of the field
        field: String,
        /// Underlying failure
        #[source]
        source: CryptoError,
    },

    /// A sensitive field holds something other than a string or `null`
    #[error("sensitive field `{field}` holds a {found}, expected a string")]
    UnsupportedValue {
        /// Path of the field
        field: String,
        /// JSON kind that was found
        found: &'static str,
    },

    /// A document in a batch failed
    #[error("document {index} in batch failed")]
    Batch {
        /// Position of the document in the batch
        index: usize,
        /// Underlying failure
        #[source]
        source: Box<DocumentError>,
    },
}

impl DocumentError {
    /// Returns the path of the field that caused the failure, if any.
    #[must_use]
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Encryption { field, .. }
            | Self::Decryption { field, .. }
            | Self::SearchHash { field, .. }
            | Self::UnsupportedValue { field, .. } => Some(field),
            Self::Batch { source, .. } => source.field(),
        }
    }
}

/// Errors raised while loading key material or the field registry.
///
/// These are fatal: a process that hits one must not start serving.
#[derive(Debug)]
pub enum ConfigurationError {
    /// A required key is absent
    MissingKey(String),

    /// Key material has the wrong length or encoding
    InvalidKey {
        /// Identifier of the offending key
        id: String,
        /// What was wrong with it
        reason: String,
    },

    /// Two encryption keys share an identifier
    DuplicateKeyId(String),

    /// The keyset contains no encryption key at all
    NoActiveKey,

    /// The field registry is inconsistent
    InvalidRegistry(String),

    /// The configuration source could not be read or parsed
    Source(String),

    /// I/O operation failed
    Io(std::io::Error),
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingKey(what) => write!(f, "missing key material: {what}"),
            Self::InvalidKey { id, reason } => write!(f, "invalid key `{id}`: {reason}"),
            Self::DuplicateKeyId(id) => write!(f, "duplicate key id: {id}"),
            Self::NoActiveKey => write!(f, "no active encryption key configured"),
            Self::InvalidRegistry(msg) => write!(f, "invalid field registry: {msg}"),
            Self::Source(msg) => write!(f, "configuration source error: {msg}"),
            Self::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for ConfigurationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ConfigurationError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}
