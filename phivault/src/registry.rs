//! Field classification registry.
//!
//! The registry is the single table deciding which document keys are
//! encrypted and which also carry a blind index. Covering a new sensitive
//! field is a registry entry, never a change to the traversal.

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Suffix of the sibling key holding a field's search digest.
pub const HASH_SUFFIX: &str = "_hash";

/// Returns the name of the digest key paired with `field_name`.
///
/// ```
/// assert_eq!(phivault::registry::companion_field("mrn"), "mrn_hash");
/// ```
#[must_use]
pub fn companion_field(field_name: &str) -> String {
    format!("{field_name}{HASH_SUFFIX}")
}

/// How a single field is protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Replace the value with a blob
    #[serde(default)]
    pub encrypt: bool,
    /// Also write a `<field>_hash` search digest
    #[serde(default)]
    pub hashable: bool,
}

impl FieldSpec {
    /// Encrypted and searchable by exact match.
    pub const SENSITIVE: Self = Self { encrypt: true, hashable: true };

    /// Encrypted only.
    pub const ENCRYPTED: Self = Self { encrypt: true, hashable: false };
}

/// Types that declare their own sensitive fields, usually through
/// `#[derive(SensitiveFields)]`.
pub trait SensitiveFields {
    /// Returns `(field_name, spec)` pairs for the type's sensitive fields.
    fn sensitive_fields() -> &'static [(&'static str, FieldSpec)];
}

/// Immutable `field_name -> FieldSpec` table.
///
/// # Example
///
/// ```
/// use phivault::registry::{FieldRegistry, FieldSpec};
///
/// let registry = FieldRegistry::builder()
///     .sensitive("mrn")
///     .encrypted("clinical_notes")
///     .build()
///     .unwrap();
///
/// assert_eq!(registry.get("mrn"), Some(FieldSpec::SENSITIVE));
/// assert!(registry.get("patient_id").is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldRegistry {
    fields: BTreeMap<String, FieldSpec>,
}

impl FieldRegistry {
    /// Starts an empty builder.
    #[must_use]
    pub fn builder() -> FieldRegistryBuilder {
        FieldRegistryBuilder::default()
    }

    /// Registry covering MRNs and NHS numbers, both encrypted and searchable.
    #[must_use]
    pub fn clinical_default() -> Self {
        let fields = [("mrn", FieldSpec::SENSITIVE), ("nhs_number", FieldSpec::SENSITIVE)]
            .into_iter()
            .map(|(name, spec)| (name.to_string(), spec))
            .collect();
        Self { fields }
    }

    /// Parses a registry from a JSON object such as
    /// `{"mrn": {"encrypt": true, "hashable": true}}`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::Source` if the JSON does not parse, or
    /// `ConfigurationError::InvalidRegistry` if the table is inconsistent.
    pub fn from_json(json: &str) -> Result<Self, ConfigurationError> {
        let fields: BTreeMap<String, FieldSpec> = serde_json::from_str(json)
            .map_err(|e| ConfigurationError::Source(format!("invalid registry JSON: {e}")))?;
        fields.into_iter().fold(Self::builder(), |b, (name, spec)| b.field(name, spec)).build()
    }

    /// Returns the spec registered for `field_name`.
    #[must_use]
    pub fn get(&self, field_name: &str) -> Option<FieldSpec> {
        self.fields.get(field_name).copied()
    }

    /// Returns `true` if `field_name` is registered for encryption.
    #[must_use]
    pub fn is_encrypted(&self, field_name: &str) -> bool {
        self.get(field_name).is_some_and(|spec| spec.encrypt)
    }

    /// Iterates over registered fields in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, FieldSpec)> {
        self.fields.iter().map(|(name, spec)| (name.as_str(), *spec))
    }

    /// Returns the number of registered fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if no field is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Collects field entries and validates them into a [`FieldRegistry`].
#[derive(Debug, Default)]
pub struct FieldRegistryBuilder {
    entries: Vec<(String, FieldSpec)>,
}

impl FieldRegistryBuilder {
    /// Registers `field_name` with an explicit spec.
    #[must_use]
    pub fn field(mut self, field_name: impl Into<String>, spec: FieldSpec) -> Self {
        self.entries.push((field_name.into(), spec));
        self
    }

    /// Registers `field_name` as encrypted and searchable.
    #[must_use]
    pub fn sensitive(self, field_name: impl Into<String>) -> Self {
        self.field(field_name, FieldSpec::SENSITIVE)
    }

    /// Registers `field_name` as encrypted only.
    #[must_use]
    pub fn encrypted(self, field_name: impl Into<String>) -> Self {
        self.field(field_name, FieldSpec::ENCRYPTED)
    }

    /// Registers every field declared by `T`.
    #[must_use]
    pub fn with_type<T: SensitiveFields>(self) -> Self {
        T::sensitive_fields().iter().fold(self, |b, (name, spec)| b.field(*name, *spec))
    }

    /// Validates the collected entries.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::InvalidRegistry` if:
    /// - A field name is empty
    /// - A field is `hashable` without `encrypt`
    /// - The same field is registered twice with different specs
    /// - A registered field collides with another field's `_hash` companion
    pub fn build(self) -> Result<FieldRegistry, ConfigurationError> {
        let mut fields = BTreeMap::new();

        for (name, spec) in self.entries {
            if name.trim().is_empty() {
                return Err(invalid("field name must not be empty".to_string()));
            }
            if spec.hashable && !spec.encrypt {
                return Err(invalid(format!("`{name}` is hashable but not encrypted")));
            }
            if let Some(existing) = fields.get(&name) {
                if *existing != spec {
                    return Err(invalid(format!("`{name}` registered with conflicting specs")));
                }
                continue;
            }
            fields.insert(name, spec);
        }

        for (name, spec) in &fields {
            let companion = companion_field(name);
            if spec.hashable && fields.contains_key(&companion) {
                return Err(invalid(format!(
                    "`{companion}` is reserved for the digest of `{name}`"
                )));
            }
        }

        Ok(FieldRegistry { fields })
    }
}

fn invalid(msg: String) -> ConfigurationError {
    ConfigurationError::InvalidRegistry(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clinical_default() {
        let registry = FieldRegistry::clinical_default();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("mrn"), Some(FieldSpec::SENSITIVE));
        assert_eq!(registry.get("nhs_number"), Some(FieldSpec::SENSITIVE));
        assert!(!registry.is_encrypted("date_of_birth"));
    }

    #[test]
    fn test_builder_registers_fields() {
        let registry =
            FieldRegistry::builder().sensitive("mrn").encrypted("clinical_notes").build().unwrap();

        assert!(registry.is_encrypted("mrn"));
        assert!(registry.is_encrypted("clinical_notes"));
        assert_eq!(registry.get("clinical_notes"), Some(FieldSpec::ENCRYPTED));
        let names: Vec<&str> = registry.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["clinical_notes", "mrn"]);
    }

    #[test]
    fn test_hashable_requires_encrypt() {
        let spec = FieldSpec { encrypt: false, hashable: true };
        let result = FieldRegistry::builder().field("mrn", spec).build();
        assert!(matches!(result, Err(ConfigurationError::InvalidRegistry(_))));
    }

    #[test]
    fn test_companion_collision_rejected() {
        let result = FieldRegistry::builder().sensitive("mrn").encrypted("mrn_hash").build();
        assert!(matches!(result, Err(ConfigurationError::InvalidRegistry(_))));
    }

    #[test]
    fn test_conflicting_duplicate_rejected() {
        let result = FieldRegistry::builder().sensitive("mrn").encrypted("mrn").build();
        assert!(matches!(result, Err(ConfigurationError::InvalidRegistry(_))));
    }

    #[test]
    fn test_identical_duplicate_accepted() {
        let registry = FieldRegistry::builder().sensitive("mrn").sensitive("mrn").build().unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_empty_name_rejected() {
        let result = FieldRegistry::builder().sensitive("  ").build();
        assert!(matches!(result, Err(ConfigurationError::InvalidRegistry(_))));
    }

    #[test]
    fn test_from_json() {
        let registry = FieldRegistry::from_json(
            r#"{"mrn": {"encrypt": true, "hashable": true}, "notes": {"encrypt": true}}"#,
        )
        .unwrap();

        assert_eq!(registry.get("mrn"), Some(FieldSpec::SENSITIVE));
        assert_eq!(registry.get("notes"), Some(FieldSpec::ENCRYPTED));
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        let result = FieldRegistry::from_json("[1, 2]");
        assert!(matches!(result, Err(ConfigurationError::Source(_))));
    }

    #[test]
    fn test_from_json_validates() {
        let result = FieldRegistry::from_json(r#"{"mrn": {"hashable": true}}"#);
        assert!(matches!(result, Err(ConfigurationError::InvalidRegistry(_))));
    }

    #[test]
    fn test_registry_serializes_as_table() {
        let json = serde_json::to_value(FieldRegistry::clinical_default()).unwrap();
        assert_eq!(json["mrn"], serde_json::json!({ "encrypt": true, "hashable": true }));
    }

    struct Encounter;

    impl SensitiveFields for Encounter {
        fn sensitive_fields() -> &'static [(&'static str, FieldSpec)] {
            &[("mrn", FieldSpec::SENSITIVE), ("clinician_notes", FieldSpec::ENCRYPTED)]
        }
    }

    #[test]
    fn test_with_type() {
        let registry = FieldRegistry::builder().with_type::<Encounter>().build().unwrap();

        assert_eq!(registry.get("mrn"), Some(FieldSpec::SENSITIVE));
        assert_eq!(registry.get("clinician_notes"), Some(FieldSpec::ENCRYPTED));
    }
}
