//! Name-change provenance.
//!
//! A name change records that a canonical entity was seen under a new name
//! while its identity persisted (acquisition, rebrand). It never implies a
//! new entity.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A recorded transition from one name to another.
///
/// # Examples
///
/// ```
/// use entity_resolver::NameChange;
///
/// let change = NameChange::new("Acme Corp", "Acme Holdings LLC", 0.9)
///     .unwrap()
///     .with_reason("acquisition");
/// assert_eq!(change.change_reason.as_deref(), Some("acquisition"));
///
/// assert!(NameChange::new("Acme", "Acme", 1.0).is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameChange {
    /// Name the entity traded under before.
    pub previous_name: String,
    /// Name observed on the new document.
    pub current_name: String,

    /// When the change took effect, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_date: Option<NaiveDate>,

    /// Free-text cause ("acquisition", "rebrand"). Left for manual annotation
    /// when the change was detected automatically.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_reason: Option<String>,

    /// Confidence in [0.0, 1.0].
    pub confidence: f64,

    /// When the change was recorded; orders merged histories.
    #[serde(default = "Utc::now")]
    pub recorded_at: DateTime<Utc>,
}

impl NameChange {
    /// Creates a validated name change.
    ///
    /// # Errors
    /// - `IdenticalNames` if both names are equal after trimming
    /// - `EmptyEntityName` if either name is blank
    /// - `ConfidenceOutOfRange` if `confidence` is outside [0.0, 1.0]
    pub fn new(
        previous_name: impl Into<String>,
        current_name: impl Into<String>,
        confidence: f64,
    ) -> Result<Self, ValidationError> {
        let change = Self {
            previous_name: previous_name.into().trim().to_string(),
            current_name: current_name.into().trim().to_string(),
            change_date: None,
            change_reason: None,
            confidence,
            recorded_at: Utc::now(),
        };
        change.validate()?;
        Ok(change)
    }

    /// Sets the effective date.
    #[must_use]
    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.change_date = Some(date);
        self
    }

    /// Sets the cause of the change.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.change_reason = Some(reason.into());
        self
    }

    /// Checks the name-change invariants.
    ///
    /// # Errors
    /// See [`NameChange::new`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.previous_name.trim().is_empty() || self.current_name.trim().is_empty() {
            return Err(ValidationError::EmptyEntityName);
        }
        if self.previous_name.trim() == self.current_name.trim() {
            return Err(ValidationError::IdenticalNames {
                name: self.current_name.clone(),
            });
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(ValidationError::ConfidenceOutOfRange {
                value: self.confidence,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_change_rejects_identical_names() {
        let err = NameChange::new("Acme Corp", " Acme Corp ", 0.8).unwrap_err();
        assert!(matches!(err, ValidationError::IdenticalNames { .. }));
    }

    #[test]
    fn test_name_change_case_change_is_a_change() {
        assert!(NameChange::new("ACME CORP", "Acme Corp", 0.8).is_ok());
    }

    #[test]
    fn test_name_change_rejects_bad_confidence() {
        let err = NameChange::new("A", "B", 1.2).unwrap_err();
        assert!(matches!(err, ValidationError::ConfidenceOutOfRange { .. }));
    }

    #[test]
    fn test_name_change_serializes_iso_date() {
        let date = NaiveDate::from_ymd_opt(2023, 7, 1).unwrap();
        let change = NameChange::new("Acme Corp", "Acme Holdings LLC", 0.75)
            .unwrap()
            .with_date(date);
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json["change_date"], "2023-07-01");
        assert!(json.get("change_reason").is_none());

        let decoded: NameChange = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, change);
    }
}
