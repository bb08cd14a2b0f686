//! Name-change detection.
//!
//! Strong address/contact evidence paired with a name that is neither a
//! known name nor a spelling variant of one is read as the entity having been
//! renamed (acquisition, rebrand). The detector never infers a cause.

use crate::config::ResolverConfig;
use crate::entity::{Entity, NameChange};

use super::matcher::MatchCandidate;
use super::normalize::{normalize_name, NormalizedCandidate};

/// Decides whether a match represents a renamed entity.
#[derive(Debug, Clone)]
pub struct NameChangeDetector {
    strong_evidence: f64,
    variant_similarity: f64,
}

impl NameChangeDetector {
    /// Creates a detector from the resolver thresholds.
    #[must_use]
    pub fn new(config: &ResolverConfig) -> Self {
        Self {
            strong_evidence: config.strong_evidence,
            variant_similarity: config.variant_similarity,
        }
    }

    /// Returns the name change `best` implies, if any.
    ///
    /// `candidate_name` is the name as extracted; it becomes `current_name`.
    /// Fires only when the non-name evidence reaches the strong-evidence
    /// threshold, the candidate's root differs from the entity's current
    /// primary root, and no known name of the entity is a close variant.
    #[must_use]
    pub fn detect(
        &self,
        candidate: &NormalizedCandidate,
        candidate_name: &str,
        best: &MatchCandidate,
        entity: &Entity,
    ) -> Option<NameChange> {
        if best.evidence < self.strong_evidence {
            return None;
        }
        if candidate.name.root.is_empty()
            || candidate.name.root == normalize_name(&entity.primary_name).root
        {
            return None;
        }
        if best.name_score >= self.variant_similarity {
            return None;
        }

        NameChange::new(entity.primary_name.as_str(), candidate_name, best.evidence).ok()
    }

    /// True when the candidate's name is a new spelling of a known name:
    /// similar enough not to be a rename, but not an exact match to any known
    /// name once normalized. Formatting-only differences ("ACME CORP.",
    /// "Acme Co") are not recorded.
    #[must_use]
    pub fn is_variant(&self, candidate_name: &str, best: &MatchCandidate, entity: &Entity) -> bool {
        !candidate_name.trim().is_empty()
            && !entity.knows_name(candidate_name)
            && best.name_score >= self.variant_similarity
            && best.name_score < 1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Address, CandidateEntity, ContactInfo, EntityType};
    use crate::resolution::matcher::Matcher;
    use crate::resolution::normalize::normalize;

    fn acme() -> Entity {
        Entity::with_id("E2", "Acme Corp", EntityType::Company)
            .with_address(Address::postal("64111"))
            .with_contact(ContactInfo::phone("8885646546"))
    }

    fn run(candidate: &CandidateEntity, entity: &Entity) -> (Option<NameChange>, bool) {
        let config = ResolverConfig::default();
        let normalized = normalize(candidate);
        let best = Matcher::new(&config).score(&normalized, entity);
        let detector = NameChangeDetector::new(&config);
        (
            detector.detect(&normalized, &candidate.name, &best, entity),
            detector.is_variant(&candidate.name, &best, entity),
        )
    }

    #[test]
    fn test_rebrand_with_same_address_and_phone() {
        let candidate = CandidateEntity::company("Acme Holdings LLC")
            .with_address(Address::postal("64111"))
            .with_contact(ContactInfo::phone("888-564-6546"));
        let (change, variant) = run(&candidate, &acme());

        let change = change.unwrap();
        assert_eq!(change.previous_name, "Acme Corp");
        assert_eq!(change.current_name, "Acme Holdings LLC");
        assert!((change.confidence - 1.0).abs() < 1e-9);
        assert!(change.change_reason.is_none());
        assert!(!variant);
    }

    #[test]
    fn test_no_change_without_non_name_evidence() {
        let candidate = CandidateEntity::company("Acme Holdings LLC")
            .with_address(Address::postal("10001"))
            .with_contact(ContactInfo::phone("2125550100"));
        assert!(run(&candidate, &acme()).0.is_none());

        let name_only = CandidateEntity::company("Acme Holdings LLC");
        assert!(run(&name_only, &acme()).0.is_none());
    }

    #[test]
    fn test_suffix_only_difference_is_neither() {
        let candidate = CandidateEntity::company("ACME Corporation")
            .with_contact(ContactInfo::phone("8885646546"));
        let (change, variant) = run(&candidate, &acme());
        assert!(change.is_none());
        assert!(!variant);
    }

    #[test]
    fn test_spelling_variant_is_an_alias_not_a_change() {
        let entity = Entity::with_id("E3", "Bennett Logistics", EntityType::Company)
            .with_contact(ContactInfo::phone("7709571866"));
        let candidate = CandidateEntity::company("Benett Logistics")
            .with_contact(ContactInfo::phone("770-957-1866"));
        let (change, variant) = run(&candidate, &entity);
        assert!(change.is_none());
        assert!(variant);
    }

    #[test]
    fn test_known_old_name_is_neither() {
        let entity = acme().with_alias("Acme Holdings");
        let candidate = CandidateEntity::company("Acme Holdings")
            .with_contact(ContactInfo::phone("8885646546"));
        let (change, variant) = run(&candidate, &entity);
        assert!(change.is_none());
        assert!(!variant);
    }
}
