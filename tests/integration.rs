//! Multi-threaded and end-to-end scenarios that need real OS threads or a
//! table large enough to force a grow, rather than a single-threaded
//! `#[cfg(test)]` unit exercising one bucket-chain operation in isolation.

use std::sync::Arc;

use lhtab::{record, CreateOpts, KeyedEquals, MatchAll, MutateOutcome, Semantics, SelectOutcome, Table};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum V {
    Int(i64),
    Str(String),
}

fn s(v: &str) -> V {
    V::Str(v.to_string())
}

fn rec(key: i64, val: &str) -> Box<[V]> {
    record([V::Int(key), s(val)])
}

/// S1: SET semantics, last writer wins on a repeated key.
#[test]
fn set_last_writer_wins() {
    let table: Table<V> = Table::new(CreateOpts::new().semantics(Semantics::Set));
    table.insert(rec(1, "a")).unwrap();
    table.insert(rec(2, "b")).unwrap();
    table.insert(rec(1, "c")).unwrap();

    assert_eq!(table.lookup(&V::Int(1)), vec![rec(1, "c")]);
    assert_eq!(table.lookup(&V::Int(2)), vec![rec(2, "b")]);
    assert_eq!(table.stats().nitems, 2);
}

/// S2: BAG semantics suppress a structurally-identical duplicate but keep
/// distinct values under the same key, in insertion order.
#[test]
fn bag_suppresses_exact_duplicates_only() {
    let table: Table<V> = Table::new(CreateOpts::new().semantics(Semantics::Bag));
    table.insert(rec(1, "a")).unwrap();
    table.insert(rec(1, "b")).unwrap();
    table.insert(rec(1, "a")).unwrap();

    assert_eq!(table.lookup(&V::Int(1)), vec![rec(1, "a"), rec(1, "b")]);
    assert_eq!(table.stats().nitems, 2);
}

/// S3: DBAG keeps exact duplicates distinct, and `erase_object` removes
/// exactly one occurrence rather than the whole key-group.
#[test]
fn dbag_keeps_duplicates_erase_object_removes_one() {
    let table: Table<V> = Table::new(CreateOpts::new().semantics(Semantics::Dbag));
    table.insert(rec(1, "a")).unwrap();
    table.insert(rec(1, "a")).unwrap();
    assert_eq!(table.stats().nitems, 2);

    let removed = table.erase_object(&rec(1, "a")).unwrap();
    assert_eq!(removed, 1);
    assert_eq!(table.lookup(&V::Int(1)), vec![rec(1, "a")]);
    assert_eq!(table.stats().nitems, 1);
}

/// S4: fixing the table, then inserting enough keys to force growth past
/// the initial segment, still yields a first/next walk that visits every
/// key exactly once.
#[test]
fn fixed_insert_first_next_visits_every_key_once() {
    let table: Table<V> = Table::new(CreateOpts::new().semantics(Semantics::Set));
    table.fix();
    for k in 0..2000i64 {
        table.insert(record([V::Int(k), s("v")])).unwrap();
    }

    let mut seen = std::collections::HashSet::new();
    let mut cur = table.first();
    while let Some(key) = cur {
        assert!(seen.insert(key.clone()), "key visited twice: {key:?}");
        cur = table.next(&key).unwrap();
    }
    table.unfix();

    assert_eq!(seen.len(), 2000);
    assert_eq!(table.stats().nitems, 2000);
    assert!(
        table.stats().nactive >= 1024,
        "expected growth past the initial segment, got nactive={}",
        table.stats().nactive
    );
}

/// S5: erasing every key under fixation logs pseudo-deletions; `unfix`
/// reclaims them, and the freed slots are reused by later inserts rather
/// than growing the address space further.
#[test]
fn fixed_erase_all_then_unfix_reclaims() {
    let table: Table<V> = Table::new(CreateOpts::new().semantics(Semantics::Set));
    for k in 0..2000i64 {
        table.insert(record([V::Int(k), s("v")])).unwrap();
    }
    let nactive_before = table.stats().nactive;

    table.fix();
    for k in 0..2000i64 {
        table.erase(&V::Int(k)).unwrap();
    }
    assert_eq!(table.stats().nitems, 0);
    assert!(table.first().is_none());
    table.unfix();

    assert_eq!(table.stats().nitems, 0);

    // reinsert the same key set; the address space should not have grown
    // past where it already was, since the reclaimed buckets are reused.
    for k in 0..2000i64 {
        table.insert(record([V::Int(k), s("v")])).unwrap();
    }
    assert_eq!(table.stats().nitems, 2000);
    assert_eq!(table.stats().nactive, nactive_before);
}

/// P6: a key erased then re-inserted while fixed resurrects the
/// pseudo-deleted slot instead of leaking a second entry.
#[test]
fn resurrection_under_fixation_does_not_duplicate() {
    let table: Table<V> = Table::new(CreateOpts::new().semantics(Semantics::Set));
    table.insert(rec(7, "a")).unwrap();

    table.fix();
    table.erase(&V::Int(7)).unwrap();
    assert_eq!(table.lookup(&V::Int(7)), Vec::<Box<[V]>>::new());
    table.insert(rec(7, "b")).unwrap();
    table.unfix();

    assert_eq!(table.lookup(&V::Int(7)), vec![rec(7, "b")]);
    assert_eq!(table.stats().nitems, 1);
}

/// P1: `member` and `lookup` agree on presence.
#[test]
fn member_matches_lookup_presence() {
    let table: Table<V> = Table::new(CreateOpts::new().semantics(Semantics::Set));
    assert!(!table.member(&V::Int(1)));
    table.insert(rec(1, "a")).unwrap();
    assert!(table.member(&V::Int(1)));
    assert!(!table.lookup(&V::Int(1)).is_empty());
    table.erase(&V::Int(1)).unwrap();
    assert!(!table.member(&V::Int(1)));
    assert!(table.lookup(&V::Int(1)).is_empty());
}

/// Round-trip: insert then erase_object leaves lookups indistinguishable
/// from the pre-insert state.
#[test]
fn insert_then_erase_object_round_trips() {
    let table: Table<V> = Table::new(CreateOpts::new().semantics(Semantics::Set));
    assert!(table.lookup(&V::Int(9)).is_empty());
    let r = rec(9, "x");
    table.insert(r.clone()).unwrap();
    table.erase_object(&r).unwrap();
    assert!(table.lookup(&V::Int(9)).is_empty());
    assert_eq!(table.stats().nitems, 0);
}

/// select/select_count/select_delete over a keyed pattern and over a full
/// matchall scan, including select_delete's effect on the live count.
#[test]
fn select_family_matchall_and_keyed() {
    let table: Table<V> = Table::new(CreateOpts::new().semantics(Semantics::Set));
    for k in 0..50i64 {
        table.insert(record([V::Int(k), s("v")])).unwrap();
    }

    match table.select_count(&MatchAll) {
        lhtab::CountOutcome::Done(n) => assert_eq!(n, 50),
        lhtab::CountOutcome::Trapped(..) => panic!("unexpected trap at 50 items"),
    }

    let keyed = KeyedEquals {
        keys: vec![V::Int(10), V::Int(20)],
    };
    match table.select(&keyed) {
        SelectOutcome::Done(rows) => assert_eq!(rows.len(), 2),
        SelectOutcome::Trapped(..) => panic!("unexpected trap"),
    }

    match table.select_delete(&MatchAll) {
        MutateOutcome::Done(n) => assert_eq!(n, 50),
        MutateOutcome::Trapped(..) => panic!("unexpected trap at 50 items"),
    }
    assert_eq!(table.stats().nitems, 0);
}

/// select_replace is rejected outright for a BAG table (replace would not
/// have a well-defined key-preserving meaning over a multiset).
#[test]
fn select_replace_rejected_for_bag() {
    let table: Table<V> = Table::new(CreateOpts::new().semantics(Semantics::Bag));
    table.insert(rec(1, "a")).unwrap();
    assert!(table.select_replace(&MatchAll).is_err());
}

/// S6: two writer threads insert disjoint key ranges concurrently with a
/// reader thread repeatedly running select_count(matchall); every observed
/// count is monotonic and never exceeds the eventual total, and the final
/// full scan enumerates exactly the total number of keys inserted.
#[test]
fn concurrent_inserts_with_repeated_select_count() {
    const PER_THREAD: i64 = 20_000;
    let table: Arc<Table<V>> = Arc::new(Table::new(CreateOpts::new().semantics(Semantics::Set)));

    std::thread::scope(|scope| {
        let t1 = Arc::clone(&table);
        let t2 = Arc::clone(&table);
        let reader_table = Arc::clone(&table);

        let writer_a = scope.spawn(move || {
            for k in 0..PER_THREAD {
                t1.insert(record([V::Int(k), s("a")])).unwrap();
            }
        });
        let writer_b = scope.spawn(move || {
            for k in PER_THREAD..(2 * PER_THREAD) {
                t2.insert(record([V::Int(k), s("b")])).unwrap();
            }
        });
        let reader = scope.spawn(move || {
            let mut last = 0usize;
            let mut violations = Vec::new();
            loop {
                let n = match reader_table.select_count(&MatchAll) {
                    lhtab::CountOutcome::Done(n) => n,
                    lhtab::CountOutcome::Trapped(n, _) => n,
                };
                if n < last {
                    violations.push((last, n));
                }
                last = n;
                if last as i64 >= 2 * PER_THREAD {
                    break;
                }
            }
            violations
        });

        writer_a.join().unwrap();
        writer_b.join().unwrap();
        let violations = reader.join().unwrap();
        assert!(
            violations.is_empty(),
            "select_count was not monotonic: {violations:?}"
        );
    });

    assert_eq!(table.stats().nitems, 2 * PER_THREAD as isize);
    match table.select_count(&MatchAll) {
        lhtab::CountOutcome::Done(n) => assert_eq!(n, (2 * PER_THREAD) as usize),
        lhtab::CountOutcome::Trapped(n, _) => panic!("final scan trapped at {n}, expected completion"),
    }
}

/// shrink_one's mask-halving test must mirror grow_one's exactly: erasing
/// most of a table that grew past two mask-doubling boundaries (without
/// fixation, so the shrink loop actually runs) must not lose or duplicate
/// any of the surviving keys.
#[test]
fn shrink_survives_two_split_boundaries_unfixed() {
    let table: Table<V> = Table::new(CreateOpts::new().semantics(Semantics::Set));
    const TOTAL: i64 = 3000;
    const KEEP: i64 = 50;

    for k in 0..TOTAL {
        table.insert(record([V::Int(k), s("v")])).unwrap();
    }
    let nactive_grown = table.stats().nactive;
    assert!(
        nactive_grown > 513,
        "expected growth past both mask-doubling boundaries, got nactive={nactive_grown}"
    );

    for k in 0..(TOTAL - KEEP) {
        table.erase(&V::Int(k)).unwrap();
    }

    assert_eq!(table.stats().nitems, KEEP as isize);
    assert!(
        table.stats().nactive < nactive_grown,
        "expected the address space to shrink back down, stayed at {}",
        table.stats().nactive
    );

    for k in (TOTAL - KEEP)..TOTAL {
        assert_eq!(
            table.lookup(&V::Int(k)),
            vec![record([V::Int(k), s("v")])],
            "lost or corrupted surviving key {k}"
        );
    }
    for k in 0..(TOTAL - KEEP) {
        assert!(
            table.lookup(&V::Int(k)).is_empty(),
            "erased key {k} resurfaced after shrink"
        );
    }

    match table.select_count(&MatchAll) {
        lhtab::CountOutcome::Done(n) => assert_eq!(n, KEEP as usize),
        lhtab::CountOutcome::Trapped(n, _) => panic!("unexpected trap at {n} items"),
    }
}

/// select_chunk traps after the requested chunk size rather than the full
/// 1000-entry budget, and select_continue resumes from where it left off.
#[test]
fn select_chunk_traps_and_continues() {
    let table: Table<V> = Table::new(CreateOpts::new().semantics(Semantics::Set));
    for k in 0..30i64 {
        table.insert(record([V::Int(k), s("v")])).unwrap();
    }

    let mut collected = Vec::new();
    let mut outcome = table.select_chunk(&MatchAll, 7);
    loop {
        match outcome {
            SelectOutcome::Done(mut rows) => {
                collected.append(&mut rows);
                break;
            }
            SelectOutcome::Trapped(mut rows, cont) => {
                assert!(rows.len() <= 7);
                collected.append(&mut rows);
                outcome = table.select_continue(&MatchAll, cont).unwrap();
            }
        }
    }
    assert_eq!(collected.len(), 30);
}
