//! Resolution results.
//!
//! A [`MappingResult`] is created once per resolution call and never mutated
//! afterwards. It is the serialization boundary of the resolver: audit logs
//! store it as JSON and read it back unchanged.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::entity::{CandidateEntity, EntityId, NameChange};
use crate::resolution::matcher::MatchCandidate;

/// Where a resolution ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionOutcome {
    /// No canonical entity scored above the minimum; the caller decides
    /// whether to create one.
    NoMatch,
    /// Matched, and a name change was appended to the entity's history.
    NameChangeRecorded,
    /// Matched under a new spelling, which was recorded as an alias.
    AliasAdded,
    /// Matched a known name; nothing was written.
    NoOp,
    /// Top candidates too close to call, or a store invariant blocked the
    /// update. Nothing was written.
    ReviewRequired,
}

impl ResolutionOutcome {
    /// Returns the outcome name as used in serialized results.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoMatch => "no_match",
            Self::NameChangeRecorded => "name_change_recorded",
            Self::AliasAdded => "alias_added",
            Self::NoOp => "no_op",
            Self::ReviewRequired => "review_required",
        }
    }

    /// True if the store was written.
    #[must_use]
    pub const fn mutated_store(self) -> bool {
        matches!(self, Self::NameChangeRecorded | Self::AliasAdded)
    }
}

impl fmt::Display for ResolutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of resolving one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingResult {
    /// The candidate exactly as submitted.
    pub original_entity: CandidateEntity,

    /// The canonical entity the candidate maps to. `None` means no confident
    /// match.
    pub mapped_entity_id: Option<EntityId>,

    /// Primary name of the mapped entity after any update.
    #[serde(default)]
    pub mapped_entity_name: Option<String>,

    /// Resolver confidence in `[0, 1]`, scaled by the extractor's; `0.0` for no match.
    #[serde(default)]
    pub confidence: f64,

    /// True when this resolution observed a rename.
    #[serde(default)]
    pub name_change_detected: bool,

    /// Present iff `name_change_detected`.
    #[serde(default)]
    pub name_change: Option<NameChange>,

    /// True when a person should confirm the mapping.
    #[serde(default)]
    pub requires_review: bool,

    /// What the resolver did.
    pub outcome: ResolutionOutcome,

    /// Contending matches when the result needs review.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub review_candidates: Vec<MatchCandidate>,
}

impl MappingResult {
    /// A result for a candidate nothing matched.
    #[must_use]
    pub fn no_match(candidate: CandidateEntity) -> Self {
        Self {
            original_entity: candidate,
            mapped_entity_id: None,
            mapped_entity_name: None,
            confidence: 0.0,
            name_change_detected: false,
            name_change: None,
            requires_review: false,
            outcome: ResolutionOutcome::NoMatch,
            review_candidates: Vec::new(),
        }
    }

    /// A result that maps to `entity_id`.
    #[must_use]
    pub fn matched(
        candidate: CandidateEntity,
        entity_id: EntityId,
        entity_name: impl Into<String>,
        confidence: f64,
        outcome: ResolutionOutcome,
    ) -> Self {
        Self {
            original_entity: candidate,
            mapped_entity_id: Some(entity_id),
            mapped_entity_name: Some(entity_name.into()),
            confidence,
            name_change_detected: false,
            name_change: None,
            requires_review: outcome == ResolutionOutcome::ReviewRequired,
            outcome,
            review_candidates: Vec::new(),
        }
    }

    /// A result flagged for review without a chosen entity.
    #[must_use]
    pub fn ambiguous(
        candidate: CandidateEntity,
        confidence: f64,
        contenders: Vec<MatchCandidate>,
    ) -> Self {
        Self {
            original_entity: candidate,
            mapped_entity_id: None,
            mapped_entity_name: None,
            confidence,
            name_change_detected: false,
            name_change: None,
            requires_review: true,
            outcome: ResolutionOutcome::ReviewRequired,
            review_candidates: contenders,
        }
    }

    /// Attaches a detected name change.
    #[must_use]
    pub fn with_name_change(mut self, change: NameChange) -> Self {
        self.name_change_detected = true;
        self.name_change = Some(change);
        self
    }

    /// True if a canonical entity was chosen.
    #[must_use]
    pub fn is_mapped(&self) -> bool {
        self.mapped_entity_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::entity::{Address, ContactInfo};
    use crate::resolution::matcher::MatchField;

    #[test]
    fn test_no_match_shape() {
        let result = MappingResult::no_match(CandidateEntity::company("Zephyr Lines"));
        assert!(!result.is_mapped());
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.outcome, ResolutionOutcome::NoMatch);
        assert!(!result.outcome.mutated_store());
    }

    #[test]
    fn test_json_round_trip_is_lossless() {
        let candidate = CandidateEntity::company("Acme Holdings LLC")
            .with_address(Address::postal("64111"))
            .with_contact(ContactInfo::phone("888-564-6546"))
            .with_confidence(0.92);
        let change = NameChange::new("Acme Corp", "Acme Holdings LLC", 1.0).unwrap();
        let result = MappingResult::matched(
            candidate,
            EntityId::from("E2"),
            "Acme Corp",
            0.98,
            ResolutionOutcome::NameChangeRecorded,
        )
        .with_name_change(change);

        let json = serde_json::to_string(&result).unwrap();
        let back: MappingResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
        assert!(!json.contains("review_candidates"));
    }

    #[test]
    fn test_computed_scores_round_trip_exactly() {
        // Values produced by weighting and scaling, not tidy literals.
        let mut values = vec![
            0.5 / 0.75 * 0.96,
            (0.25 + 0.5 * 0.875) / 0.75,
            0.985_690_694_632_869_5,
            1.0 / 3.0,
        ];
        values.extend((1..500).map(|i| f64::from(i) / 499.0 * (0.8 + 0.2 * 0.37)));

        for value in values {
            let contender = MatchCandidate {
                entity_id: EntityId::from("E7"),
                score: value,
                matched_on: BTreeSet::from([MatchField::Name, MatchField::Phone]),
                name_score: value * 0.9,
                address_score: Some(value / 7.0),
                contact_score: Some(1.0 - value),
                evidence: value * value,
            };
            let result = MappingResult::ambiguous(
                CandidateEntity::company("Acme Freight").with_confidence(value),
                value,
                vec![contender],
            );

            let json = serde_json::to_string(&result).unwrap();
            let back: MappingResult = serde_json::from_str(&json).unwrap();
            assert_eq!(back.confidence.to_bits(), value.to_bits(), "{json}");
            assert_eq!(back, result);
        }
    }

    #[test]
    fn test_ambiguous_round_trip_keeps_contenders() {
        let contender = MatchCandidate {
            entity_id: EntityId::from("E3"),
            score: 0.9,
            matched_on: BTreeSet::from([MatchField::Name]),
            name_score: 0.9,
            address_score: None,
            contact_score: None,
            evidence: 0.0,
        };
        let result = MappingResult::ambiguous(
            CandidateEntity::company("Acme Freight"),
            0.9,
            vec![contender.clone(), MatchCandidate { entity_id: EntityId::from("E4"), ..contender }],
        );
        assert!(result.requires_review);
        assert!(result.mapped_entity_id.is_none());

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["outcome"], "review_required");
        let back: MappingResult = serde_json::from_value(value).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn test_original_field_names_parse() {
        let json = r#"{
            "original_entity": {"name": "Acme Corp", "type": "company"},
            "mapped_entity_id": "E2",
            "mapped_entity_name": "Acme Corp",
            "confidence": 0.8,
            "name_change_detected": false,
            "name_change": null,
            "outcome": "no_op"
        }"#;
        let result: MappingResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.mapped_entity_id, Some(EntityId::from("E2")));
        assert!(!result.requires_review);
    }
}
