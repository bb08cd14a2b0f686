//! End-to-end resolution scenarios against the in-memory store.

use std::sync::Arc;

use entity_resolver::{
    Address, CandidateEntity, ContactInfo, Entity, EntityId, EntityStore, EntityType,
    InMemoryEntityStore, ResolutionOutcome, Resolver,
};

fn resolver_with(entities: Vec<Entity>) -> Resolver {
    let store = InMemoryEntityStore::new();
    for entity in entities {
        store.create(entity).unwrap();
    }
    Resolver::new(Arc::new(store))
}

fn get(resolver: &Resolver, id: &str) -> Entity {
    resolver.store().get(&EntityId::from(id)).unwrap().unwrap()
}

#[test]
fn test_abbreviated_name_with_same_phone_resolves_without_rename() {
    let resolver = resolver_with(vec![Entity::with_id(
        "E1",
        "Bennett International Logistics, LLC",
        EntityType::Company,
    )
    .with_alias("BIL")
    .with_contact(ContactInfo::phone("7709571866"))]);

    let result = resolver
        .resolve(
            CandidateEntity::company("Bennett Intl Logistics")
                .with_contact(ContactInfo::phone("770-957-1866")),
        )
        .unwrap();

    assert_eq!(result.mapped_entity_id, Some(EntityId::from("E1")));
    assert!(result.confidence >= 0.7, "confidence {}", result.confidence);
    assert!(!result.name_change_detected);
    assert!(result.name_change.is_none());
    assert!(!result.requires_review);
    // "Intl" expands to "International": same root, nothing new to record.
    assert_eq!(result.outcome, ResolutionOutcome::NoOp);

    let e1 = get(&resolver, "E1");
    assert!(e1.name_change_history.is_empty());
    assert_eq!(e1.alias_count(), 1);
    assert_eq!(e1.version, 1);
}

#[test]
fn test_new_name_with_same_address_and_phone_records_name_change() {
    let resolver = resolver_with(vec![Entity::with_id("E2", "Acme Corp", EntityType::Company)
        .with_address(Address::postal("64111"))
        .with_contact(ContactInfo::phone("8885646546"))]);

    let result = resolver
        .resolve(
            CandidateEntity::company("Acme Holdings LLC")
                .with_address(Address::postal("64111"))
                .with_contact(ContactInfo::phone("888-564-6546")),
        )
        .unwrap();

    assert_eq!(result.mapped_entity_id, Some(EntityId::from("E2")));
    assert_eq!(result.mapped_entity_name.as_deref(), Some("Acme Corp"));
    assert!(result.name_change_detected);
    assert_eq!(result.outcome, ResolutionOutcome::NameChangeRecorded);

    let change = result.name_change.unwrap();
    assert_eq!(change.previous_name, "Acme Corp");
    assert_eq!(change.current_name, "Acme Holdings LLC");

    let e2 = get(&resolver, "E2");
    assert_eq!(e2.name_change_history.len(), 1);
    assert_eq!(e2.name_change_history[0].current_name, "Acme Holdings LLC");
    assert!(e2.knows_name("Acme Holdings LLC"));
    assert_eq!(e2.primary_name, "Acme Corp");
}

#[test]
fn test_no_shared_blocking_key_is_no_match() {
    let resolver = resolver_with(vec![Entity::with_id("E1", "Acme Corp", EntityType::Company)
        .with_address(Address::postal("64111"))
        .with_contact(ContactInfo::phone("8885646546"))]);

    let result = resolver
        .resolve(
            CandidateEntity::company("Zephyr Lines")
                .with_address(Address::postal("30303"))
                .with_contact(ContactInfo::phone("404-555-0100")),
        )
        .unwrap();

    assert!(result.mapped_entity_id.is_none());
    assert!(result.mapped_entity_name.is_none());
    assert!(result.confidence.abs() < f64::EPSILON);
    assert_eq!(result.outcome, ResolutionOutcome::NoMatch);
    assert_eq!(resolver.store().list().unwrap().len(), 1);
}

#[test]
fn test_near_tie_is_flagged_for_review_without_mutation() {
    let resolver = resolver_with(vec![
        Entity::with_id("E1", "Acme Transport", EntityType::Company)
            .with_address(Address::postal("64111").with_city("Kansas City")),
        Entity::with_id("E3", "Acme Transport", EntityType::Company)
            .with_address(Address::postal("30303").with_city("Atlanta")),
    ]);

    let result = resolver
        .resolve(CandidateEntity::company("ACME Transport Inc"))
        .unwrap();

    assert!(result.requires_review);
    assert!(result.mapped_entity_id.is_none());
    assert_eq!(result.outcome, ResolutionOutcome::ReviewRequired);

    let contenders: Vec<&str> = result
        .review_candidates
        .iter()
        .map(|m| m.entity_id.as_str())
        .collect();
    assert_eq!(contenders, ["E1", "E3"]);

    for id in ["E1", "E3"] {
        let entity = get(&resolver, id);
        assert_eq!(entity.version, 1);
        assert_eq!(entity.alias_count(), 0);
    }
}

#[test]
fn test_type_mismatch_never_matches() {
    let resolver = resolver_with(vec![Entity::with_id("L1", "Kansas City", EntityType::Location)]);
    let result = resolver.resolve(CandidateEntity::company("Kansas City")).unwrap();
    assert_eq!(result.outcome, ResolutionOutcome::NoMatch);
}

#[test]
fn test_mapping_result_survives_json() {
    let resolver = resolver_with(vec![Entity::with_id("E2", "Acme Corp", EntityType::Company)
        .with_address(Address::postal("64111"))
        .with_contact(ContactInfo::phone("8885646546"))]);
    let result = resolver
        .resolve(
            CandidateEntity::company("Acme Holdings LLC")
                .with_address(Address::postal("64111"))
                .with_contact(ContactInfo::phone("888-564-6546")),
        )
        .unwrap();

    let json = serde_json::to_string(&result).unwrap();
    let back: entity_resolver::MappingResult = serde_json::from_str(&json).unwrap();
    assert_eq!(back, result);
}
