//! Candidate entities handed over by the extraction collaborator.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

use super::entity::{Entity, EntityId, EntityType};
use super::profile::{Address, ContactInfo};

fn default_confidence() -> f64 {
    1.0
}

/// A freshly extracted, unverified entity awaiting resolution.
///
/// The shape mirrors [`Entity`] minus the identifier. `name` and `type` are
/// required for resolution but modelled as possibly absent, because the
/// extractor's JSON is not trusted; [`CandidateEntity::validate`] enforces them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateEntity {
    /// Name as extracted.
    #[serde(default)]
    pub name: String,

    /// Entity kind; required for resolution.
    #[serde(rename = "type", default)]
    pub entity_type: Option<EntityType>,

    /// Other names seen on the document ("formerly known as", DBA).
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub aliases: BTreeSet<String>,

    /// Extracted fields with no typed slot.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, serde_json::Value>,

    /// Extracted address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,

    /// Extracted contact details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<ContactInfo>,

    /// Extractor confidence in [0.0, 1.0]. Weights the resolver's own score
    /// but never replaces it.
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

impl CandidateEntity {
    /// Creates a candidate with a name and type.
    #[must_use]
    pub fn new(name: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            name: name.into(),
            entity_type: Some(entity_type),
            aliases: BTreeSet::new(),
            attributes: BTreeMap::new(),
            address: None,
            contact: None,
            confidence: 1.0,
        }
    }

    /// Shorthand for a company candidate.
    #[must_use]
    pub fn company(name: impl Into<String>) -> Self {
        Self::new(name, EntityType::Company)
    }

    /// Sets the address.
    #[must_use]
    pub fn with_address(mut self, address: Address) -> Self {
        self.address = Some(address);
        self
    }

    /// Sets the contact details.
    #[must_use]
    pub fn with_contact(mut self, contact: ContactInfo) -> Self {
        self.contact = Some(contact);
        self
    }

    /// Adds an alternate name.
    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.insert(alias.into());
        self
    }

    /// Sets the extractor confidence.
    #[must_use]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    /// Sets an open attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Checks that the candidate can be resolved.
    ///
    /// # Errors
    /// - `MissingField { field: "name" }` if the name is blank
    /// - `MissingField { field: "type" }` if no type was extracted
    /// - `ConfidenceOutOfRange` if the extractor confidence is outside [0.0, 1.0]
    pub fn validate(&self) -> Result<EntityType, ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "name".to_string(),
            });
        }
        let Some(entity_type) = self.entity_type else {
            return Err(ValidationError::MissingField {
                field: "type".to_string(),
            });
        };
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(ValidationError::ConfidenceOutOfRange {
                value: self.confidence,
            });
        }
        Ok(entity_type)
    }

    /// Builds a canonical entity from this candidate.
    ///
    /// Used by callers that decide to register an unmatched candidate as new.
    ///
    /// # Errors
    /// Same as [`CandidateEntity::validate`].
    pub fn to_entity(&self, id: impl Into<EntityId>) -> Result<Entity, ValidationError> {
        let entity_type = self.validate()?;
        let mut entity = Entity::with_id(id, self.name.trim(), entity_type);
        for alias in &self.aliases {
            entity.add_alias(alias.as_str());
        }
        entity.attributes = self.attributes.clone();
        entity.address = self.address.clone().filter(|a| !a.is_empty());
        entity.contact = self.contact.clone().filter(|c| !c.is_empty());
        entity.version = 1;
        Ok(entity)
    }

    /// Builds a candidate that mirrors a canonical entity.
    #[must_use]
    pub fn from_entity(entity: &Entity) -> Self {
        Self {
            name: entity.primary_name.clone(),
            entity_type: Some(entity.entity_type),
            aliases: entity.aliases.clone(),
            attributes: entity.attributes.clone(),
            address: entity.address.clone(),
            contact: entity.contact.clone(),
            confidence: 1.0,
        }
    }

    /// Stable content fingerprint (blake3, hex) used to correlate audit records.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        // Maps are BTree-backed, so the JSON encoding is canonical.
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        blake3::hash(&bytes).to_hex().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_requires_name_and_type() {
        let mut candidate = CandidateEntity::company("   ");
        assert_eq!(
            candidate.validate().unwrap_err(),
            ValidationError::MissingField {
                field: "name".to_string()
            }
        );

        candidate.name = "Acme".to_string();
        candidate.entity_type = None;
        assert_eq!(
            candidate.validate().unwrap_err(),
            ValidationError::MissingField {
                field: "type".to_string()
            }
        );
    }

    #[test]
    fn test_validate_rejects_bad_confidence() {
        let candidate = CandidateEntity::company("Acme").with_confidence(-0.1);
        assert!(matches!(
            candidate.validate(),
            Err(ValidationError::ConfidenceOutOfRange { .. })
        ));
    }

    #[test]
    fn test_missing_fields_deserialize_as_absent() {
        let candidate: CandidateEntity = serde_json::from_str(r#"{"name":"Acme"}"#).unwrap();
        assert_eq!(candidate.entity_type, None);
        assert!((candidate.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_to_entity_copies_profile() {
        let candidate = CandidateEntity::company("Acme Corp")
            .with_alias("ACME")
            .with_contact(ContactInfo::phone("8885646546"))
            .with_address(Address::default());
        let entity = candidate.to_entity("E9").unwrap();

        assert_eq!(entity.id.as_str(), "E9");
        assert_eq!(entity.primary_name, "Acme Corp");
        assert!(entity.aliases.contains("ACME"));
        assert!(entity.contact.is_some());
        assert!(entity.address.is_none());
        assert_eq!(entity.version, 1);
    }

    #[test]
    fn test_fingerprint_is_stable_and_content_sensitive() {
        let a = CandidateEntity::company("Acme Corp");
        let b = CandidateEntity::company("Acme Corp");
        let c = CandidateEntity::company("Acme Corporation");
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }
}
