//! Recursive encryption and decryption of whole documents.
//!
//! The transformer walks every map and sequence of a JSON document. Keys the
//! registry marks `encrypt` are sealed with the cipher engine; `hashable` keys
//! also get a `<field>_hash` sibling holding the search digest of the original
//! value. Everything else is copied through untouched at every depth.
//!
//! Decryption is fail-closed: if a single field does not decrypt, the caller
//! gets an error naming that field and no document at all.

use crate::blind_index::BlindIndexer;
use crate::cipher::CipherEngine;
use crate::error::{CryptoError, DocumentError};
use crate::key_provider::KeyProvider;
use crate::registry::{companion_field, FieldRegistry, FieldSpec};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// Applies the cipher engine and blind index generator to documents,
/// guided by a [`FieldRegistry`].
///
/// # Example
///
/// ```ignore
/// use phivault::document::DocumentTransformer;
/// use phivault::registry::FieldRegistry;
/// use phivault_key_file::FileKeyProvider;
/// use serde_json::json;
///
/// let provider = FileKeyProvider::new("./keys")?;
/// let transformer = DocumentTransformer::new(provider, FieldRegistry::clinical_default());
///
/// let stored = transformer.encrypt_document(&json!({"patient_id": "TEST01", "mrn": "12345678"}))?;
/// let restored = transformer.decrypt_document(&stored)?;
/// assert_eq!(restored["mrn"], "12345678");
/// ```
pub struct DocumentTransformer<P: KeyProvider> {
    cipher: CipherEngine<P>,
    indexer: BlindIndexer<P>,
    registry: Arc<FieldRegistry>,
}

/// Per-field operation applied during a walk.
#[derive(Clone, Copy)]
enum Pass {
    Encrypt,
    Decrypt,
    Reencrypt,
}

impl<P: KeyProvider> DocumentTransformer<P> {
    /// Creates a transformer that owns the provider and registry.
    pub fn new(provider: P, registry: FieldRegistry) -> Self {
        Self::from_shared(Arc::new(provider), Arc::new(registry))
    }

    /// Creates a transformer over a provider and registry shared with other
    /// components.
    pub fn from_shared(provider: Arc<P>, registry: Arc<FieldRegistry>) -> Self {
        Self {
            cipher: CipherEngine::from_shared(Arc::clone(&provider)),
            indexer: BlindIndexer::from_shared(provider),
            registry,
        }
    }

    /// Returns the cipher engine used for single values.
    pub const fn cipher(&self) -> &CipherEngine<P> {
        &self.cipher
    }

    /// Returns the blind index generator.
    pub const fn indexer(&self) -> &BlindIndexer<P> {
        &self.indexer
    }

    /// Returns the field registry.
    pub fn registry(&self) -> &FieldRegistry {
        &self.registry
    }

    /// Returns a copy of `doc` with every registered field encrypted and its
    /// digest companion written.
    ///
    /// The input is assumed to be plaintext. Passing an already encrypted
    /// document seals the blobs a second time.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - A registered field holds a number, boolean, object or array
    ///   (`UnsupportedValue`)
    /// - The search digest of a field cannot be computed (`SearchHash`)
    /// - Encryption of a field fails (`Encryption`)
    pub fn encrypt_document(&self, doc: &Value) -> Result<Value, DocumentError> {
        self.transform(doc, Pass::Encrypt)
    }

    /// Returns a copy of `doc` with every registered field decrypted.
    ///
    /// `<field>_hash` companions are left in place.
    ///
    /// # Errors
    ///
    /// Returns `DocumentError::Decryption` naming the first field that fails;
    /// the partially decrypted copy is discarded.
    pub fn decrypt_document(&self, doc: &Value) -> Result<Value, DocumentError> {
        self.transform(doc, Pass::Decrypt)
    }

    /// Decrypts every registered field under any verification key and seals it
    /// again under the active key, re-deriving digest companions.
    ///
    /// # Errors
    ///
    /// Returns `DocumentError::Decryption` if a field does not decrypt, or
    /// `DocumentError::Encryption` if re-sealing fails.
    pub fn reencrypt_document(&self, doc: &Value) -> Result<Value, DocumentError> {
        self.transform(doc, Pass::Reencrypt)
    }

    /// Encrypts a batch of documents, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns `DocumentError::Batch` carrying the index of the failing document.
    pub fn encrypt_documents(&self, docs: &[Value]) -> Result<Vec<Value>, DocumentError> {
        self.transform_batch(docs, Pass::Encrypt)
    }

    /// Decrypts a batch of documents, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns `DocumentError::Batch` carrying the index of the failing document.
    pub fn decrypt_documents(&self, docs: &[Value]) -> Result<Vec<Value>, DocumentError> {
        self.transform_batch(docs, Pass::Decrypt)
    }

    /// Builds the equality filter for `field_name`; see
    /// [`BlindIndexer::create_searchable_query`].
    ///
    /// # Errors
    ///
    /// Returns `DocumentError::SearchHash` if the digest cannot be computed.
    pub fn create_searchable_query(
        &self,
        field_name: &str,
        plaintext: &str,
    ) -> Result<Value, DocumentError> {
        self.indexer
            .create_searchable_query(field_name, plaintext)
            .map_err(|source| DocumentError::SearchHash { field: field_name.to_string(), source })
    }

    fn transform_batch(&self, docs: &[Value], pass: Pass) -> Result<Vec<Value>, DocumentError> {
        docs.iter()
            .enumerate()
            .map(|(index, doc)| {
                self.transform(doc, pass)
                    .map_err(|source| DocumentError::Batch { index, source: Box::new(source) })
            })
            .collect()
    }

    fn transform(&self, doc: &Value, pass: Pass) -> Result<Value, DocumentError> {
        let mut out = doc.clone();
        let mut touched = 0usize;
        self.walk(&mut out, "", pass, &mut touched)?;
        debug!(fields = touched, pass = pass.name(), "document transformed");
        Ok(out)
    }

    fn walk(
        &self,
        value: &mut Value,
        path: &str,
        pass: Pass,
        touched: &mut usize,
    ) -> Result<(), DocumentError> {
        match value {
            Value::Object(map) => self.walk_map(map, path, pass, touched),
            Value::Array(items) => {
                for (i, item) in items.iter_mut().enumerate() {
                    self.walk(item, &format!("{path}[{i}]"), pass, touched)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn walk_map(
        &self,
        map: &mut Map<String, Value>,
        path: &str,
        pass: Pass,
        touched: &mut usize,
    ) -> Result<(), DocumentError> {
        let mut companions = Vec::new();

        for (key, value) in map.iter_mut() {
            let field_path = child_path(path, key);
            match self.registry.get(key) {
                Some(spec) if spec.encrypt => {
                    if let Some(digest) = self.apply(key, spec, value, &field_path, pass)? {
                        companions.push((companion_field(key), Value::String(digest)));
                    }
                    *touched += 1;
                }
                _ => self.walk(value, &field_path, pass, touched)?,
            }
        }

        // Written after the loop so a stale companion in the input is replaced.
        for (key, digest) in companions {
            map.insert(key, digest);
        }
        Ok(())
    }

    /// Transforms one registered leaf in place and returns the digest to store
    /// beside it, if the pass writes one.
    fn apply(
        &self,
        key: &str,
        spec: FieldSpec,
        value: &mut Value,
        field_path: &str,
        pass: Pass,
    ) -> Result<Option<String>, DocumentError> {
        let encryption_error = |source: CryptoError| DocumentError::Encryption {
            field: field_path.to_string(),
            source,
        };
        let digest_error = |source: CryptoError| DocumentError::SearchHash {
            field: field_path.to_string(),
            source,
        };
        let decryption_error = |source: CryptoError| DocumentError::Decryption {
            field: field_path.to_string(),
            source,
        };

        let plaintext = match pass {
            Pass::Encrypt => string_plaintext(value, field_path)?,
            Pass::Decrypt | Pass::Reencrypt => {
                let blob = stored_blob(value).map_err(decryption_error)?;
                self.cipher.decrypt_opt(blob).map_err(decryption_error)?
            }
        };

        match pass {
            Pass::Decrypt => {
                *value = plaintext.map_or(Value::Null, Value::String);
                Ok(None)
            }
            Pass::Encrypt | Pass::Reencrypt => {
                let digest = if spec.hashable {
                    let digest = self
                        .indexer
                        .generate_search_hash_opt(key, plaintext.as_deref())
                        .map_err(digest_error)?;
                    Some(digest)
                } else {
                    None
                };
                let blob =
                    self.cipher.encrypt_opt(plaintext.as_deref()).map_err(encryption_error)?;
                *value = blob.map_or(Value::Null, Value::String);
                Ok(digest)
            }
        }
    }
}

impl<P: KeyProvider> Clone for DocumentTransformer<P> {
    fn clone(&self) -> Self {
        Self {
            cipher: self.cipher.clone(),
            indexer: self.indexer.clone(),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl Pass {
    const fn name(self) -> &'static str {
        match self {
            Self::Encrypt => "encrypt",
            Self::Decrypt => "decrypt",
            Self::Reencrypt => "reencrypt",
        }
    }
}

fn child_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

/// Reads the plaintext of a registered leaf. Only strings and `null` are
/// accepted; a sealed number or boolean would come back as a string.
fn string_plaintext(value: &Value, field_path: &str) -> Result<Option<String>, DocumentError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        other => Err(DocumentError::UnsupportedValue {
            field: field_path.to_string(),
            found: kind(other),
        }),
    }
}

/// Reads the stored blob of a registered leaf. Only strings and `null` can
/// have been written by [`DocumentTransformer::encrypt_document`].
fn stored_blob(value: &Value) -> Result<Option<&str>, CryptoError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        other => {
            Err(CryptoError::MalformedBlob(format!("expected a string, found {}", kind(other))))
        }
    }
}

const fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
