//! Tracing output of the commit protocol

use crate::common::*;
use txstore::prelude::*;

#[test]
fn test_commit_and_rollback_are_logged() {
    let (c, store) = people(StoreConfig::default());

    let (result, logs) = with_tracing_capture(|| {
        c.with_local_tx("logged", || store.update(key("a"), Person::new("a", 1)))?;
        let tx = c.begin_local_transaction("undone")?;
        tx.rollback()
    });
    result.unwrap();

    assert!(logs.contains("txstore::commit"));
    assert!(logs.contains("Transaction committed"));
    assert!(logs.contains("Transaction rolled back"));
    assert!(logs.contains("merged=1"));
}

#[test]
fn test_view_drift_is_logged_as_error() {
    let (c, store) = people(StoreConfig::default().with_view_checks(true));
    let registry = store.tracked_view_registry();
    registry.register("totals", Totals::default()).unwrap();
    seed(&c, &store, &["a"]);
    registry.clear_views().unwrap();

    let (result, logs) = with_tracing_capture(|| {
        c.with_local_tx("drift", || store.update(key("b"), Person::new("b", 3)))
    });

    assert!(matches!(result, Err(StoreError::ConsistencyCheck { .. })));
    assert!(logs.contains("ERROR"));
    assert!(logs.contains("Tracked view out of sync"));
}
