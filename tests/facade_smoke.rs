//! Smoke test for the burrowdb facade re-exports

use burrowdb::{EngineConfig, Environment, LockMode, Store, Utf8Serializer, WorkUnit};
use std::sync::Arc;

#[test]
fn test_facade_exposes_the_record_store_api() {
    let env = Environment::new(EngineConfig::default());
    let blobs = Store::binary(&env, "blobs", Arc::new(Utf8Serializer));
    env.register(blobs.clone()).unwrap();
    env.load().unwrap();

    let unit = {
        let blobs = blobs.clone();
        WorkUnit::new(&env, "seed", move |txn| {
            blobs.put(&"greeting".to_string(), &b"hello".to_vec(), txn)
        })
    };
    unit.run_retry().unwrap();

    let mut txn = env.begin().unwrap();
    assert_eq!(
        blobs
            .get(&"greeting".to_string(), &mut txn, LockMode::Default)
            .unwrap(),
        Some(b"hello".to_vec())
    );
    txn.commit().unwrap();
    env.close().unwrap();
}
