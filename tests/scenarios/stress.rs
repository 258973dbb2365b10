//! Several threads against one container

use crate::common::*;
use std::sync::{Arc, Barrier};
use std::thread;
use txstore::prelude::*;

#[test]
fn test_pending_writes_stay_private_across_threads() {
    let (c, store) = people(StoreConfig::default());
    seed(&c, &store, &["shared"]);
    let written = Arc::new(Barrier::new(2));
    let checked = Arc::new(Barrier::new(2));

    let writer = {
        let (c, store) = (c.clone(), store.clone());
        let (written, checked) = (Arc::clone(&written), Arc::clone(&checked));
        thread::spawn(move || {
            let tx = c.begin_local_transaction("writer").unwrap();
            let mut p = store.get(&key("shared")).unwrap().unwrap();
            p.set_balance(999).unwrap();
            store.update(key("shared"), p).unwrap();
            written.wait();
            checked.wait();
            tx.commit().unwrap();
        })
    };

    written.wait();
    let seen = c
        .with_local_tx("reader", || store.get(&key("shared")))
        .unwrap()
        .unwrap();
    assert_eq!(seen.balance(), 0);
    checked.wait();
    writer.join().unwrap();

    assert_eq!(store.get_read_only(&key("shared")).unwrap().unwrap().balance(), 999);
}

#[test]
fn test_mixed_workload_keeps_views_consistent() {
    const THREADS: usize = 6;
    const ROUNDS: usize = 30;
    let (c, store) = people(StoreConfig::default().with_view_checks(true));
    let registry = store.tracked_view_registry();
    registry.register("totals", Totals::default()).unwrap();
    registry.register("A", PrefixCount::new("A")).unwrap();
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let (c, store, barrier) = (c.clone(), store.clone(), Arc::clone(&barrier));
            thread::spawn(move || {
                barrier.wait();
                for i in 0..ROUNDS {
                    let k = key(&format!("{}", (t * 7 + i) % 10));
                    c.with_local_tx("mixed", || match i % 3 {
                        0 => store.update(k.clone(), Person::new(&format!("A{}", t), i as i64)),
                        1 => store.update(k.clone(), Person::new(&format!("B{}", t), 1)),
                        _ => store.remove(&k),
                    })
                    .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let values = store.get_all_read_only(|_| true).unwrap();
    let totals: Totals = registry.get_view("totals").unwrap();
    assert!(totals.check_view(&values).is_ok());
    let a: PrefixCount = registry.get_view("A").unwrap();
    assert!(a.check_view(&values).is_ok());
    assert_eq!(c.metrics().total_committed, (THREADS * ROUNDS) as u64);
}
