//! Crash recovery of the persistent entity store.

#![cfg(feature = "persistent")]

use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use entity_resolver::storage::persistent::{open_store, PersistentConfig, PersistentEntityStore};
use entity_resolver::{
    Address, CandidateEntity, ContactInfo, Entity, EntityId, EntityStore, EntityType,
    ResolutionOutcome, Resolver,
};
use tempfile::tempdir;

const WAL_FILE: &str = "entities.wal";

fn open(dir: &Path) -> PersistentEntityStore {
    open_store(dir, None).unwrap()
}

fn seed(store: &PersistentEntityStore, count: usize) {
    for i in 0..count {
        store
            .create(Entity::with_id(
                format!("E{i}"),
                format!("Carrier {i} Freight"),
                EntityType::Company,
            ))
            .unwrap();
    }
}

#[test]
fn test_name_change_survives_restart() {
    let dir = tempdir().unwrap();
    let candidate = CandidateEntity::company("Acme Holdings LLC")
        .with_address(Address::postal("64111"))
        .with_contact(ContactInfo::phone("888-564-6546"));
    {
        let store = Arc::new(open(dir.path()));
        store
            .create(
                Entity::with_id("E2", "Acme Corp", EntityType::Company)
                    .with_address(Address::postal("64111"))
                    .with_contact(ContactInfo::phone("8885646546")),
            )
            .unwrap();
        let result = Resolver::new(store).resolve(candidate.clone()).unwrap();
        assert_eq!(result.outcome, ResolutionOutcome::NameChangeRecorded);
    }

    let store = Arc::new(open(dir.path()));
    let e2 = store.get(&EntityId::from("E2")).unwrap().unwrap();
    assert_eq!(e2.name_change_history.len(), 1);
    assert!(e2.knows_name("Acme Holdings LLC"));

    // Already known after the restart: nothing more to record.
    let again = Resolver::new(store).resolve(candidate).unwrap();
    assert_eq!(again.outcome, ResolutionOutcome::NoOp);
}

#[test]
fn test_torn_wal_tail_is_dropped() {
    let dir = tempdir().unwrap();
    {
        let store = open(dir.path());
        seed(&store, 5);
    }

    // Crash mid-append: lose the end of the last record.
    let wal = OpenOptions::new()
        .write(true)
        .open(dir.path().join(WAL_FILE))
        .unwrap();
    let size = wal.metadata().unwrap().len();
    wal.set_len(size - 20).unwrap();
    drop(wal);

    {
        let store = open(dir.path());
        assert_eq!(store.len().unwrap(), 4);
        assert!(store.get(&EntityId::from("E4")).unwrap().is_none());

        // The log accepts appends after the cut.
        store
            .create(Entity::with_id("E9", "Zephyr Lines", EntityType::Company))
            .unwrap();
    }

    let store = open(dir.path());
    assert_eq!(store.len().unwrap(), 5);
    assert!(store.get(&EntityId::from("E9")).unwrap().is_some());
}

#[test]
fn test_corrupt_record_stops_replay() {
    let dir = tempdir().unwrap();
    {
        let store = open(dir.path());
        seed(&store, 3);
    }

    // Flip a byte inside the last record's payload.
    let path = dir.path().join(WAL_FILE);
    let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
    let offset = file.metadata().unwrap().len() - 12;
    let mut byte = [0u8; 1];
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.read_exact(&mut byte).unwrap();
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(&[byte[0] ^ 0x5A]).unwrap();
    drop(file);

    let store = open(dir.path());
    assert_eq!(store.len().unwrap(), 2);
    assert!(store.get(&EntityId::from("E2")).unwrap().is_none());
}

#[test]
fn test_merge_redirect_survives_compaction_and_restart() {
    let dir = tempdir().unwrap();
    {
        let store = open(dir.path());
        seed(&store, 3);
        store
            .merge(&EntityId::from("E0"), &EntityId::from("E1"))
            .unwrap();
        store.compact().unwrap();
        store
            .apply_mutation(
                &EntityId::from("E1"),
                &[entity_resolver::EntityMutation::AddAlias {
                    alias: "C0F".to_string(),
                }],
            )
            .unwrap();
    }

    let store = open(dir.path());
    assert_eq!(store.len().unwrap(), 2);
    let survivor = store.get(&EntityId::from("E1")).unwrap().unwrap();
    assert_eq!(survivor.id.as_str(), "E0");
    assert!(survivor.knows_name("Carrier 1 Freight"));
    assert!(survivor.knows_name("C0F"));
}

#[test]
fn test_small_wal_limit_compacts_automatically() {
    let dir = tempdir().unwrap();
    let config = PersistentConfig {
        max_wal_size: PersistentConfig::MIN_WAL_SIZE,
        sync_on_write: false,
    };
    {
        let store = open_store(dir.path(), Some(config.clone())).unwrap();
        seed(&store, 60);
        assert!(store.wal_size().unwrap() <= PersistentConfig::MIN_WAL_SIZE);
    }
    assert!(dir.path().join("entities.snapshot").exists());

    let store = open_store(dir.path(), Some(config)).unwrap();
    assert_eq!(store.len().unwrap(), 60);
    assert!(fs::metadata(dir.path().join(WAL_FILE)).unwrap().len() <= PersistentConfig::MIN_WAL_SIZE);
}
