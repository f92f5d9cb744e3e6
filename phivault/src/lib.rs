//! # `phivault`
//!
//! Field-level encryption and blind indexing for clinical identifiers such as
//! MRNs and NHS numbers.
//!
//! ## Features
//!
//! - Randomized AEAD encryption (ChaCha20-Poly1305) of single field values
//! - Blind indexes (HMAC-SHA256 with per-field HKDF keys) for exact-match lookup
//! - Registry-driven recursive encryption and decryption of JSON documents
//! - Key rotation: retired keys keep decrypting, documents can be re-sealed
//! - Fail-closed decryption that names the offending field
//!
//! ## Example
//!
//! ```rust,ignore
//! use phivault::prelude::*;
//! use serde_json::json;
//!
//! let keyring = phivault::config::keyring_from_env()?;
//! let transformer = DocumentTransformer::new(keyring, FieldRegistry::clinical_default());
//!
//! let stored = transformer.encrypt_document(&json!({"patient_id": "TEST01", "mrn": "12345678"}))?;
//! let filter = transformer.create_searchable_query("mrn", "12345678")?;
//! assert_eq!(filter["mrn_hash"], stored["mrn_hash"]);
//! ```

#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod blind_index;
pub mod blob;
pub mod cipher;
pub mod config;
pub mod document;
pub mod error;
pub mod kdf;
pub mod key_provider;
pub mod registry;

pub mod prelude {
    //! Convenience re-exports for common use.
    pub use crate::blind_index::BlindIndexer;
    pub use crate::cipher::CipherEngine;
    pub use crate::document::DocumentTransformer;
    pub use crate::error::{ConfigurationError, CryptoError, DocumentError, Error};
    pub use crate::key_provider::{DataKey, KeyProvider, Keyring};
    pub use crate::registry::{FieldRegistry, FieldSpec, SensitiveFields};
}
