//! Tracked views

use crate::common::*;
use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::Arc;
use txstore::prelude::*;

#[test]
fn test_prefix_count_follows_renames() {
    let (c, store) = people(StoreConfig::default().with_view_checks(true));
    let registry = store.tracked_view_registry();
    registry.register("A-names", PrefixCount::new("A")).unwrap();

    c.with_local_tx("insert", || {
        store.update(key("A1"), Person::new("A1", 0))?;
        store.update(key("A2"), Person::new("A2", 0))?;
        store.update(key("B1"), Person::new("B1", 0))
    })
    .unwrap();
    let view: PrefixCount = registry.get_view("A-names").unwrap();
    assert_eq!(view.count, 2);

    c.with_local_tx("rename", || {
        let mut a1 = store.get(&key("A1"))?.unwrap();
        a1.set_name("B9")?;
        store.update(key("A1"), a1)
    })
    .unwrap();
    let view: PrefixCount = registry.get_view("A-names").unwrap();
    assert_eq!(view.count, 1);
}

#[test]
fn test_default_view_name() {
    let (c, store) = people(StoreConfig::default());
    seed(&c, &store, &["hank", "ivy"]);
    let registry = store.tracked_view_registry();
    let name = registry.register_default(Totals::default()).unwrap();

    assert!(name.starts_with("VIEW:"));
    assert_eq!(registry.view_names().unwrap(), vec![name]);
    let totals: Totals = registry.get_default_view().unwrap();
    assert_eq!(totals.count, 2);
}

#[derive(Debug, Clone)]
enum Op {
    Put(u8, i64),
    Delete(u8),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..6, -100i64..100).prop_map(|(k, b)| Op::Put(k, b)),
        (0u8..6).prop_map(Op::Delete),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// After any sequence of single-key commits, the live view equals a view
    /// rebuilt by replaying every committed modification in order, and a view
    /// initialized from the final committed values.
    #[test]
    fn view_matches_replay(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let (c, store) = people(StoreConfig::default().with_view_checks(true));
        let registry = store.tracked_view_registry();
        registry.register("totals", Totals::default()).unwrap();

        let log: Arc<Mutex<Vec<(Option<Person>, Option<Person>)>>> = Arc::default();
        let sink = Arc::clone(&log);
        store
            .register_modification_listener(
                move |_: &String, old: Option<&Person>, new: Option<&Person>, _: &TransactionHandle| {
                    sink.lock().push((old.cloned(), new.cloned()));
                    Ok::<(), ListenerError>(())
                },
            )
            .unwrap();

        for op in &ops {
            c.with_local_tx("op", || match op {
                Op::Put(k, b) => store.update(format!("k{}", k), Person::new("p", *b)),
                Op::Delete(k) => store.remove(&format!("k{}", k)),
            })
            .unwrap();
        }

        let live: Totals = registry.get_view("totals").unwrap();

        let mut replayed = Totals::default();
        for (old, new) in log.lock().iter() {
            replayed.track_modification(old.as_ref(), new.as_ref()).unwrap();
        }
        prop_assert_eq!(&live, &replayed);

        registry.reinitialize_view("totals").unwrap();
        let rebuilt: Totals = registry.get_view("totals").unwrap();
        prop_assert_eq!(&live, &rebuilt);
    }
}
