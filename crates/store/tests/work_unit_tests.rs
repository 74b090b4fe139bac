//! Integration tests for the work-unit retry model
//!
//! The properties under test:
//!
//! 1. `run()` commits on success and aborts+wraps on any failure
//! 2. `run_retry_with(n)` masks lock conflicts with fresh transactions,
//!    committing the body's effects exactly once
//! 3. Non-conflict failures are fatal on the first attempt
//! 4. A zero budget never executes the body and never silently succeeds
//! 5. Merged units share one transaction, second unit's body first

use burrow_store::{
    BigEndianU64Serializer, BincodeSerializer, EngineConfig, Environment, LockMode, Store,
    StoreError, Utf8Serializer, WorkUnit,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// ============================================================================
// Test Helpers
// ============================================================================

fn counter_store(env: &Environment) -> Arc<Store<String, u64>> {
    Store::new(
        env,
        "counters",
        Arc::new(Utf8Serializer),
        Arc::new(BigEndianU64Serializer),
    )
}

fn loaded_env() -> (Environment, Arc<Store<String, u64>>) {
    let env = Environment::new(EngineConfig::default());
    let store = counter_store(&env);
    env.register(store.clone()).unwrap();
    env.load().unwrap();
    (env, store)
}

fn read_committed(env: &Environment, store: &Arc<Store<String, u64>>, key: &str) -> Option<u64> {
    let mut txn = env.begin().unwrap();
    let value = store
        .get(&key.to_string(), &mut txn, LockMode::Default)
        .unwrap();
    txn.commit().unwrap();
    value
}

// ============================================================================
// SECTION 1: run()
// ============================================================================

#[test]
fn test_run_commits_the_body_once() {
    let (env, store) = loaded_env();
    let unit = {
        let store = store.clone();
        WorkUnit::new(&env, "bump", move |txn| {
            store.put(&"n".to_string(), &1, txn)
        })
    };
    unit.run().unwrap();
    assert_eq!(read_committed(&env, &store, "n"), Some(1));
}

#[test]
fn test_run_aborts_and_wraps_on_failure() {
    let (env, store) = loaded_env();
    let unit = {
        let store = store.clone();
        WorkUnit::new(&env, "doomed", move |txn| {
            store.put(&"n".to_string(), &1, txn)?;
            Err(StoreError::Config("body gave up".to_string()))
        })
    };
    let err = unit.run().unwrap_err();
    match err {
        StoreError::UnitAborted { unit, source } => {
            assert_eq!(unit, "doomed");
            assert!(matches!(*source, StoreError::Config(_)));
        }
        other => panic!("expected UnitAborted, got {other:?}"),
    }
    // The write from the failed body was rolled back
    assert_eq!(read_committed(&env, &store, "n"), None);
}

// ============================================================================
// SECTION 2: run_retry
// ============================================================================

#[test]
fn test_retry_masks_conflicts_and_commits_effects_exactly_once() {
    let (env, store) = loaded_env();

    // Pin a record so the first two attempts conflict
    let mut holder = env.begin().unwrap();
    store.put(&"blocked".to_string(), &0, &mut holder).unwrap();

    let attempts = Arc::new(AtomicUsize::new(0));
    let unit = {
        let store = store.clone();
        let attempts = attempts.clone();
        WorkUnit::new(&env, "contended-bump", move |txn| {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            let current = store
                .get(&"n".to_string(), txn, LockMode::Default)?
                .unwrap_or(0);
            store.put(&"n".to_string(), &(current + 1), txn)?;
            if n < 2 {
                // Touch the pinned record; this raises a lock conflict
                store.put(&"blocked".to_string(), &9, txn)?;
            }
            Ok(())
        })
    };

    unit.run_retry_with(3).unwrap();
    drop(holder);

    // Three body executions, exactly one committed effect
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(read_committed(&env, &store, "n"), Some(1));
}

#[test]
fn test_retry_exhaustion_carries_the_terminal_conflict() {
    let (env, store) = loaded_env();
    let mut holder = env.begin().unwrap();
    store.put(&"blocked".to_string(), &0, &mut holder).unwrap();

    let attempts = Arc::new(AtomicUsize::new(0));
    let unit = {
        let store = store.clone();
        let attempts = attempts.clone();
        WorkUnit::new(&env, "hopeless", move |txn| {
            attempts.fetch_add(1, Ordering::SeqCst);
            store.put(&"blocked".to_string(), &1, txn)
        })
    };

    let err = unit.run_retry_with(2).unwrap_err();
    match err {
        StoreError::RetriesExhausted { attempts: n, source } => {
            assert_eq!(n, 2);
            assert!(source.expect("terminal conflict").is_lock_conflict());
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    holder.abort().unwrap();
}

#[test]
fn test_zero_attempts_never_runs_the_body() {
    let (env, store) = loaded_env();
    let attempts = Arc::new(AtomicUsize::new(0));
    let unit = {
        let store = store.clone();
        let attempts = attempts.clone();
        WorkUnit::new(&env, "never", move |txn| {
            attempts.fetch_add(1, Ordering::SeqCst);
            store.put(&"n".to_string(), &1, txn)
        })
    };

    let err = unit.run_retry_with(0).unwrap_err();
    assert!(matches!(
        err,
        StoreError::RetriesExhausted {
            attempts: 0,
            source: None
        }
    ));
    assert_eq!(attempts.load(Ordering::SeqCst), 0);
    assert_eq!(read_committed(&env, &store, "n"), None);
}

#[test]
fn test_non_conflict_failure_stops_the_retry_loop() {
    let (env, store) = loaded_env();
    let attempts = Arc::new(AtomicUsize::new(0));
    let unit = {
        let store = store.clone();
        let attempts = attempts.clone();
        WorkUnit::new(&env, "broken", move |txn| {
            attempts.fetch_add(1, Ordering::SeqCst);
            store.put(&"n".to_string(), &1, txn)?;
            Err(StoreError::Config("deterministic failure".to_string()))
        })
    };

    let err = unit.run_retry_with(3).unwrap_err();
    assert!(matches!(err, StoreError::UnitAborted { .. }));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(read_committed(&env, &store, "n"), None);
}

// ============================================================================
// SECTION 3: Composition
// ============================================================================

#[test]
fn test_merge_runs_both_bodies_in_one_transaction_other_first() {
    let (env, store) = loaded_env();
    let order = Arc::new(Mutex::new(Vec::new()));

    let unit_a = {
        let store = store.clone();
        let order = order.clone();
        WorkUnit::new(&env, "a", move |txn| {
            order.lock().push("a");
            store.put(&"a".to_string(), &1, txn)
        })
    };
    let unit_b = {
        let store = store.clone();
        let order = order.clone();
        WorkUnit::new(&env, "b", move |txn| {
            order.lock().push("b");
            store.put(&"b".to_string(), &2, txn)
        })
    };

    unit_a.merge(unit_b).unwrap().run().unwrap();

    assert_eq!(*order.lock(), vec!["b", "a"]);
    assert_eq!(read_committed(&env, &store, "a"), Some(1));
    assert_eq!(read_committed(&env, &store, "b"), Some(2));
}

#[test]
fn test_merged_failure_rolls_back_both_bodies() {
    let (env, store) = loaded_env();
    let unit_ok = {
        let store = store.clone();
        WorkUnit::new(&env, "ok", move |txn| store.put(&"a".to_string(), &1, txn))
    };
    let unit_bad = WorkUnit::new(&env, "bad", move |_txn| {
        Err(StoreError::Config("no".to_string()))
    });

    assert!(unit_bad.merge(unit_ok).unwrap().run().is_err());
    assert_eq!(read_committed(&env, &store, "a"), None);
}

#[test]
fn test_merge_across_environments_is_rejected() {
    let (env_a, _store_a) = loaded_env();
    let env_b = Environment::new(EngineConfig::default());
    let store_b = Store::new(
        &env_b,
        "other",
        Arc::new(Utf8Serializer),
        Arc::new(BincodeSerializer::<u64>::new()),
    );
    env_b.register(store_b).unwrap();
    env_b.load().unwrap();

    let unit_a = WorkUnit::new(&env_a, "a", |_txn| Ok(()));
    let unit_b = WorkUnit::new(&env_b, "b", |_txn| Ok(()));
    assert!(matches!(
        unit_a.merge(unit_b),
        Err(StoreError::Config(_))
    ));
}
