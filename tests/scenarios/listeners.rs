//! Modification listeners and dirty checking

use crate::common::*;
use parking_lot::Mutex;
use std::sync::Arc;
use txstore::prelude::*;

type Calls = Arc<Mutex<Vec<(String, Option<i64>, Option<i64>)>>>;

fn record_balances(store: &Store<String, Person>) -> Calls {
    let calls: Calls = Arc::default();
    let sink = Arc::clone(&calls);
    store
        .register_modification_listener(
            move |k: &String, old: Option<&Person>, new: Option<&Person>, _: &TransactionHandle| {
                sink.lock()
                    .push((k.clone(), old.map(Person::balance), new.map(Person::balance)));
                Ok::<(), ListenerError>(())
            },
        )
        .unwrap();
    calls
}

#[test]
fn test_in_place_change_detected_by_object_based_check() {
    let (c, store) = people(StoreConfig::default().with_dirty_check(DirtyCheck::ObjectBased));
    seed(&c, &store, &["erin"]);
    let calls = record_balances(&store);

    c.with_local_tx("raise", || {
        store.modify(&key("erin"), |p| p.set_balance(30))?.transpose()?;
        // reading another key without changing it merges nothing
        store.get(&key("nobody"))?;
        Ok(())
    })
    .unwrap();

    assert_eq!(*calls.lock(), vec![(key("erin"), Some(0), Some(30))]);
}

#[test]
fn test_in_place_change_ignored_by_explicit_check() {
    let (c, store) = people(StoreConfig::default());
    seed(&c, &store, &["frank"]);
    let calls = record_balances(&store);

    c.with_local_tx("raise", || {
        store.modify(&key("frank"), |p| p.set_balance(30))?.transpose()?;
        Ok(())
    })
    .unwrap();

    assert!(calls.lock().is_empty());
    assert_eq!(store.get_read_only(&key("frank")).unwrap().unwrap().balance(), 0);
}

#[test]
fn test_listener_on_untracked_store_fails_at_registration() {
    let (c, store) = people(StoreConfig::default().with_tracking(false));
    let err = store
        .register_modification_listener(
            |_: &String, _: Option<&Person>, _: Option<&Person>, _: &TransactionHandle| {
                Ok::<(), ListenerError>(())
            },
        )
        .unwrap_err();
    assert!(matches!(err, StoreError::TrackingDisabled { ref store, .. } if store == "people"));
    assert_eq!(c.metrics().total_started, 0);
}

#[test]
fn test_object_based_check_requires_tracking() {
    let c = Container::new();
    let config = StoreConfig::default()
        .with_tracking(false)
        .with_dirty_check(DirtyCheck::ObjectBased);
    let err = c
        .create_store_with::<String, Person>("people", config)
        .unwrap_err();
    assert!(matches!(err, StoreError::TrackingDisabled { .. }));
}

#[test]
fn test_untracked_store_still_commits() {
    let (c, store) = people(StoreConfig::default().with_tracking(false));
    c.with_local_tx("write", || store.update(key("gus"), Person::new("gus", 5)))
        .unwrap();
    assert_eq!(store.size().unwrap(), 1);
    let info = store.object_info(&key("gus")).unwrap();
    assert_eq!(info.committed_version, 1);
}
