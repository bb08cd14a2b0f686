//! Properties that must hold for any store contents.

use std::sync::Arc;

use entity_resolver::resolution::normalize;
use entity_resolver::{
    Address, CandidateEntity, ContactInfo, Entity, EntityStore, EntityType, InMemoryEntityStore,
    ResolutionOutcome, Resolver,
};

fn fleet() -> Vec<Entity> {
    vec![
        Entity::with_id("E1", "Acme Corp", EntityType::Company)
            .with_address(Address::postal("64111").with_city("Kansas City"))
            .with_contact(ContactInfo::phone("8885646546")),
        Entity::with_id("E2", "Bennett International Logistics, LLC", EntityType::Company)
            .with_alias("BIL")
            .with_contact(ContactInfo::phone("7709571866").with_email("ops@bennettig.com")),
        Entity::with_id("E3", "Zephyr Lines", EntityType::Company)
            .with_address(
                Address::postal("30303")
                    .with_street("100 Peachtree St NW")
                    .with_city("Atlanta")
                    .with_state("GA"),
            ),
        Entity::with_id("P1", "Dana Ruiz", EntityType::Person)
            .with_contact(ContactInfo::email("dana.ruiz@acme.example")),
        Entity::with_id("L1", "Kansas City", EntityType::Location),
    ]
}

fn resolver() -> Resolver {
    let store = InMemoryEntityStore::new();
    for entity in fleet() {
        store.create(entity).unwrap();
    }
    Resolver::new(Arc::new(store))
}

fn messy_candidates() -> Vec<CandidateEntity> {
    vec![
        CandidateEntity::company("  ACME  Corp., Inc. ")
            .with_address(Address::postal("64111-2345"))
            .with_contact(ContactInfo::phone("+1 (888) 564-6546")),
        CandidateEntity::company("Bennett Intl Logistics & Sons")
            .with_alias("B.I.L.")
            .with_contact(ContactInfo::email("OPS@BennettIG.com")),
        CandidateEntity::company("Zéphyr Lines")
            .with_address(Address::postal("30303").with_street("100 Peachtree Street Northwest")),
        CandidateEntity::new("dana ruiz", EntityType::Person).with_confidence(0.4),
        CandidateEntity::company("LLC"),
        CandidateEntity::company(""),
    ]
}

#[test]
fn test_identical_candidate_maps_with_full_confidence() {
    let resolver = resolver();
    for entity in fleet() {
        let result = resolver
            .resolve(CandidateEntity::from_entity(&entity))
            .unwrap();
        assert_eq!(result.mapped_entity_id.as_ref(), Some(&entity.id), "{}", entity.primary_name);
        assert!(
            (result.confidence - 1.0).abs() < 1e-9,
            "{}: confidence {}",
            entity.primary_name,
            result.confidence
        );
        assert_eq!(result.outcome, ResolutionOutcome::NoOp);
    }
}

#[test]
fn test_normalize_is_idempotent() {
    for candidate in messy_candidates() {
        let once = normalize(&candidate);
        let twice = normalize(&once.to_candidate());
        assert_eq!(twice, once, "{:?}", candidate.name);
    }
}

#[test]
fn test_matching_is_deterministic() {
    let resolver = resolver();
    for candidate in messy_candidates().into_iter().filter(|c| !c.name.trim().is_empty()) {
        let first = resolver.find_matches(&candidate).unwrap();
        let second = resolver.find_matches(&candidate).unwrap();
        assert_eq!(first, second);
    }
}

#[test]
fn test_no_rename_without_address_or_contact_evidence() {
    let resolver = resolver();
    let result = resolver
        .resolve(
            CandidateEntity::company("Acme Holdings")
                .with_address(Address::postal("10001").with_city("New York"))
                .with_contact(ContactInfo::phone("212-555-0100")),
        )
        .unwrap();

    assert!(!result.name_change_detected);
    assert!(result.name_change.is_none());

    let e1 = resolver.store().get(&"E1".into()).unwrap().unwrap();
    assert!(e1.name_change_history.is_empty());
    assert_eq!(e1.alias_count(), 0);
}

#[test]
fn test_matching_never_writes() {
    let resolver = resolver();
    let before = resolver.store().list().unwrap();
    for candidate in messy_candidates().into_iter().filter(|c| !c.name.trim().is_empty()) {
        let _ = resolver.find_matches(&candidate).unwrap();
    }
    assert_eq!(resolver.store().list().unwrap(), before);
}
