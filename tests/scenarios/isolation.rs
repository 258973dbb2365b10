//! Isolation between concurrently active transactions

use crate::common::*;
use txstore::prelude::*;

/// A value mutated inside one transaction stays invisible to others until commit
#[test]
fn test_uncommitted_mutation_is_invisible() {
    let (c, store) = people(StoreConfig::default());
    seed(&c, &store, &["alice"]);

    let writer = c.begin_local_transaction("writer").unwrap();
    store
        .modify(&key("alice"), |p| p.set_balance(500))
        .unwrap()
        .unwrap()
        .unwrap();
    let mut copy = store.get(&key("alice")).unwrap().unwrap();
    copy.set_balance(700).unwrap();
    store.update(key("alice"), copy).unwrap();
    let writer_handle = c.suspend().unwrap();

    let seen = c
        .with_local_tx("reader", || store.get(&key("alice")))
        .unwrap()
        .unwrap();
    assert_eq!(seen.balance(), 0);
    assert_eq!(store.get_read_only(&key("alice")).unwrap().unwrap().balance(), 0);

    c.resume(&writer_handle).unwrap();
    writer.commit().unwrap();
    assert_eq!(store.get_read_only(&key("alice")).unwrap().unwrap().balance(), 700);
}

/// The original value captured on first access survives a concurrent commit
#[test]
fn test_original_value_is_stable() {
    let (c, store) = people(StoreConfig::default());
    seed(&c, &store, &["bob"]);

    let first = c.begin_local_transaction("first").unwrap();
    store.get(&key("bob")).unwrap();
    let handle = c.suspend().unwrap();

    c.with_local_tx("second", || {
        let mut bob = store.get(&key("bob"))?.unwrap();
        bob.set_balance(42)?;
        store.update(key("bob"), bob)
    })
    .unwrap();

    c.resume(&handle).unwrap();
    let info = store.object_info(&key("bob")).unwrap();
    assert!(info.orig_value.unwrap().contains("balance: 0"));
    assert!(info.committed.unwrap().contains("balance: 42"));
    assert!(!info.updated);
    first.rollback().unwrap();
}

#[test]
fn test_read_only_reads_are_idempotent() {
    let (c, store) = people(StoreConfig::default());
    seed(&c, &store, &["carol"]);

    c.with_local_tx("reader", || {
        let first = store.get_read_only(&key("carol"))?;
        let second = store.get_read_only(&key("carol"))?;
        assert_eq!(first, second);
        assert_eq!(first, Some(Person::new("carol", 0)));
        Ok(())
    })
    .unwrap();
}

/// A committed value equals what was written but is an independent copy
#[test]
fn test_committed_value_is_a_copy() {
    let (c, store) = people(StoreConfig::default());
    let mut written = Person::new("dave", 10);
    c.with_local_tx("write", || store.update(key("dave"), written.clone()))
        .unwrap();
    written.set_balance(99).unwrap();

    let read = c
        .with_local_tx("read", || store.get(&key("dave")))
        .unwrap()
        .unwrap();
    assert_eq!(read, Person::new("dave", 10));
    assert_ne!(read, written);
}

#[test]
fn test_read_only_snapshot_then_writable_update() {
    let (c, store) = people(StoreConfig::default());
    c.with_local_tx("t1", || store.update(key("a"), Person::new("a", 1)))
        .unwrap();

    c.with_local_tx("t2", || {
        let mut snapshot = store.get_read_only(&key("a"))?.unwrap();
        let err = snapshot.set_balance(2).unwrap_err();
        assert!(err.is_read_only_violation());

        let mut writable = store.get(&key("a"))?.unwrap();
        writable.set_balance(2)?;
        store.update(key("a"), writable)
    })
    .unwrap();

    let seen = c
        .with_local_tx("t3", || store.get(&key("a")))
        .unwrap()
        .unwrap();
    assert_eq!(seen.balance(), 2);
}

#[test]
fn test_concurrent_inserts_last_writer_wins() {
    let (c, store) = people(StoreConfig::default());

    let t1 = c.begin_local_transaction("t1").unwrap();
    assert_eq!(store.get(&key("x")).unwrap(), None);
    let h1 = c.suspend().unwrap();

    let t2 = c.begin_local_transaction("t2").unwrap();
    assert_eq!(store.get(&key("x")).unwrap(), None);
    let h2 = c.suspend().unwrap();

    c.resume(&h1).unwrap();
    store.update(key("x"), Person::new("v1", 1)).unwrap();
    t1.commit().unwrap();

    c.resume(&h2).unwrap();
    store.update(key("x"), Person::new("v2", 2)).unwrap();
    t2.commit().unwrap();

    let x = store.get_read_only(&key("x")).unwrap().unwrap();
    assert_eq!(x.name(), "v2");
}

#[test]
fn test_strict_read_only_rejects_plain_values() {
    let c = Container::new();
    let config = StoreConfig::default().with_strict_read_only(true);
    assert!(c.create_store_with::<String, Person>("people", config).is_ok());
    let err = c
        .create_store_with::<String, String>("names", config)
        .unwrap_err();
    assert!(matches!(err, StoreError::IsolationUnsupported { .. }));
}

#[test]
fn test_store_access_without_transaction() {
    let (_c, store) = people(StoreConfig::default());
    assert_eq!(store.get(&key("a")), Err(StoreError::NoActiveTransaction));
    assert_eq!(store.get_read_only(&key("a")), Ok(None));
    assert_eq!(store.size(), Ok(0));
}
