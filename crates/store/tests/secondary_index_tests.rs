//! Integration tests for secondary index maintenance and reads
//!
//! Single-key and multi-key derivation, exclusion by absent projection,
//! re-derivation on update, ordered range searches, and the visit-all
//! contract for records sharing one derived key.

use burrow_store::{
    BincodeSerializer, EngineConfig, EngineError, Environment, LockMode, SecondaryIndex, Store,
    StoreError, Utf8Serializer,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ============================================================================
// Test Helpers
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Item {
    name: String,
    color: String,
    tags: Vec<String>,
}

fn item(name: &str, color: &str, tags: &[&str]) -> Item {
    Item {
        name: name.to_string(),
        color: color.to_string(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
    }
}

struct Fixture {
    env: Environment,
    store: Arc<Store<String, Item>>,
    by_color: Arc<SecondaryIndex<String, Item>>,
    by_tag: Arc<SecondaryIndex<String, Item>>,
}

/// A store with one single-key index (color; empty color excluded) and one
/// multi-key index (tags)
fn fixture() -> Fixture {
    let env = Environment::new(EngineConfig::default());
    let store: Arc<Store<String, Item>> = Store::new(
        &env,
        "items",
        Arc::new(Utf8Serializer),
        Arc::new(BincodeSerializer::new()),
    );
    let by_color = SecondaryIndex::single_key(
        "items-by-color",
        Arc::new(Utf8Serializer),
        |item: &Item| {
            if item.color.is_empty() {
                None
            } else {
                Some(item.color.clone())
            }
        },
    )
    .attach(&store)
    .unwrap();
    let by_tag = SecondaryIndex::multi_key(
        "items-by-tag",
        Arc::new(Utf8Serializer),
        |item: &Item| item.tags.clone(),
    )
    .attach(&store)
    .unwrap();
    env.register(store.clone()).unwrap();
    env.load().unwrap();
    Fixture {
        env,
        store,
        by_color,
        by_tag,
    }
}

fn put_one(f: &Fixture, value: Item) {
    let mut txn = f.env.begin().unwrap();
    f.store.put(&value.name.clone(), &value, &mut txn).unwrap();
    txn.commit().unwrap();
}

// ============================================================================
// SECTION 1: Single-key derivation
// ============================================================================

#[test]
fn test_record_appears_under_its_projected_key_after_commit() {
    let f = fixture();
    put_one(&f, item("lamp", "red", &[]));

    let mut txn = f.env.begin().unwrap();
    let found = f
        .by_color
        .get(&"red".to_string(), &mut txn, LockMode::Default)
        .unwrap();
    assert_eq!(found.map(|i| i.name), Some("lamp".to_string()));
    assert!(f
        .by_color
        .get(&"blue".to_string(), &mut txn, LockMode::Default)
        .unwrap()
        .is_none());
    txn.commit().unwrap();
}

#[test]
fn test_absent_projection_excludes_the_record() {
    let f = fixture();
    put_one(&f, item("shadow", "", &["dark"]));

    let mut txn = f.env.begin().unwrap();
    assert!(f
        .by_color
        .get(&"".to_string(), &mut txn, LockMode::Default)
        .unwrap()
        .is_none());
    // Still reachable through the primary and the other index
    assert!(f
        .store
        .get(&"shadow".to_string(), &mut txn, LockMode::Default)
        .unwrap()
        .is_some());
    assert!(f
        .by_tag
        .get(&"dark".to_string(), &mut txn, LockMode::Default)
        .unwrap()
        .is_some());
    txn.commit().unwrap();
}

#[test]
fn test_update_moves_the_record_between_derived_keys() {
    let f = fixture();
    put_one(&f, item("lamp", "red", &[]));
    put_one(&f, item("lamp", "blue", &[]));

    let mut txn = f.env.begin().unwrap();
    assert!(f
        .by_color
        .get(&"red".to_string(), &mut txn, LockMode::Default)
        .unwrap()
        .is_none());
    assert!(f
        .by_color
        .get(&"blue".to_string(), &mut txn, LockMode::Default)
        .unwrap()
        .is_some());
    txn.commit().unwrap();
}

#[test]
fn test_delete_removes_the_index_entry() {
    let f = fixture();
    put_one(&f, item("lamp", "red", &[]));

    let mut txn = f.env.begin().unwrap();
    f.store.delete(&"lamp".to_string(), &mut txn).unwrap();
    txn.commit().unwrap();

    let mut txn = f.env.begin().unwrap();
    assert!(f
        .by_color
        .get(&"red".to_string(), &mut txn, LockMode::Default)
        .unwrap()
        .is_none());
    txn.commit().unwrap();
}

// ============================================================================
// SECTION 2: Multi-key derivation
// ============================================================================

#[test]
fn test_record_appears_under_exactly_its_distinct_tags() {
    let f = fixture();
    // The duplicate tag is redundant, not an extra entry
    put_one(&f, item("lamp", "red", &["metal", "desk", "metal"]));

    let mut txn = f.env.begin().unwrap();
    for tag in ["metal", "desk"] {
        assert_eq!(
            f.by_tag
                .get(&tag.to_string(), &mut txn, LockMode::Default)
                .unwrap()
                .map(|i| i.name),
            Some("lamp".to_string()),
            "expected lamp under tag {tag}"
        );
    }
    assert!(f
        .by_tag
        .get(&"plastic".to_string(), &mut txn, LockMode::Default)
        .unwrap()
        .is_none());
    txn.commit().unwrap();
}

#[test]
fn test_empty_tag_set_excludes_the_record() {
    let f = fixture();
    put_one(&f, item("plain", "grey", &[]));

    let mut txn = f.env.begin().unwrap();
    let mut seen = Vec::new();
    f.by_tag
        .search_prefix(b"", &mut txn, |tag, _item| {
            seen.push(tag.clone());
            true
        })
        .unwrap();
    assert!(seen.is_empty());
    txn.commit().unwrap();
}

// ============================================================================
// SECTION 3: Visit and range searches
// ============================================================================

// The visit-all contract: every record sharing the derived key is visited,
// not just the first positioned entry.
#[test]
fn test_visit_sees_every_record_under_key() {
    let f = fixture();
    put_one(&f, item("lamp", "red", &[]));
    put_one(&f, item("rug", "red", &[]));
    put_one(&f, item("sofa", "red", &[]));
    put_one(&f, item("vase", "blue", &[]));

    let mut txn = f.env.begin().unwrap();
    let mut names = Vec::new();
    f.by_color
        .visit(&"red".to_string(), &mut txn, |item| {
            names.push(item.name.clone())
        })
        .unwrap();
    names.sort();
    assert_eq!(names, vec!["lamp", "rug", "sofa"]);
    txn.commit().unwrap();
}

#[test]
fn test_search_forward_walks_in_index_order_with_early_stop() {
    let f = fixture();
    put_one(&f, item("a", "amber", &[]));
    put_one(&f, item("b", "blue", &[]));
    put_one(&f, item("c", "crimson", &[]));
    put_one(&f, item("d", "denim", &[]));

    let mut txn = f.env.begin().unwrap();
    let mut colors = Vec::new();
    f.by_color
        .search_forward(&"blue".to_string(), &mut txn, |color, _item| {
            colors.push(color.clone());
            colors.len() < 2
        })
        .unwrap();
    assert_eq!(colors, vec!["blue", "crimson"]);
    txn.commit().unwrap();
}

#[test]
fn test_search_backward_walks_in_reverse_index_order() {
    let f = fixture();
    put_one(&f, item("a", "amber", &[]));
    put_one(&f, item("b", "blue", &[]));
    put_one(&f, item("c", "crimson", &[]));

    let mut txn = f.env.begin().unwrap();
    let mut colors = Vec::new();
    f.by_color
        .search_backward(&"blue".to_string(), &mut txn, |color, _item| {
            colors.push(color.clone());
            true
        })
        .unwrap();
    assert_eq!(colors, vec!["blue", "amber"]);
    txn.commit().unwrap();
}

#[test]
fn test_search_prefix_starts_at_the_raw_prefix() {
    let f = fixture();
    put_one(&f, item("a", "amber", &[]));
    put_one(&f, item("b", "blue", &[]));
    put_one(&f, item("c", "burgundy", &[]));
    put_one(&f, item("d", "denim", &[]));

    let mut txn = f.env.begin().unwrap();
    let mut colors = Vec::new();
    f.by_color
        .search_prefix(b"b", &mut txn, |color, _item| {
            if !color.starts_with('b') {
                return false;
            }
            colors.push(color.clone());
            true
        })
        .unwrap();
    assert_eq!(colors, vec!["blue", "burgundy"]);
    txn.commit().unwrap();
}

// ============================================================================
// SECTION 4: Configuration rules
// ============================================================================

#[test]
fn test_attach_to_an_open_store_is_rejected() {
    let f = fixture();
    let err = SecondaryIndex::single_key(
        "items-by-name",
        Arc::new(Utf8Serializer),
        |item: &Item| Some(item.name.clone()),
    )
    .attach(&f.store)
    .unwrap_err();
    assert!(matches!(err, StoreError::Config(_)));
}

#[test]
fn test_index_sharing_a_store_name_fails_the_load() {
    let env = Environment::new(EngineConfig::default());
    let store: Arc<Store<String, Item>> = Store::new(
        &env,
        "items",
        Arc::new(Utf8Serializer),
        Arc::new(BincodeSerializer::new()),
    );
    SecondaryIndex::single_key("items", Arc::new(Utf8Serializer), |item: &Item| {
        Some(item.color.clone())
    })
    .attach(&store)
    .unwrap();
    env.register(store).unwrap();
    assert!(matches!(env.load(), Err(StoreError::Config(_))));
}

#[test]
fn test_unique_index_rejects_a_second_record_at_commit() {
    let env = Environment::new(EngineConfig::default());
    let store: Arc<Store<String, Item>> = Store::new(
        &env,
        "items",
        Arc::new(Utf8Serializer),
        Arc::new(BincodeSerializer::new()),
    );
    SecondaryIndex::single_key("items-by-color", Arc::new(Utf8Serializer), |item: &Item| {
        Some(item.color.clone())
    })
    .allow_duplicates(false)
    .attach(&store)
    .unwrap();
    env.register(store.clone()).unwrap();
    env.load().unwrap();

    let mut txn = env.begin().unwrap();
    store
        .put(&"lamp".to_string(), &item("lamp", "red", &[]), &mut txn)
        .unwrap();
    txn.commit().unwrap();

    let mut txn = env.begin().unwrap();
    store
        .put(&"rug".to_string(), &item("rug", "red", &[]), &mut txn)
        .unwrap();
    let err = txn.commit().unwrap_err();
    assert!(matches!(err, EngineError::UniqueConstraint { .. }));

    // The rejected record never landed
    let mut txn = env.begin().unwrap();
    assert!(store
        .get(&"rug".to_string(), &mut txn, LockMode::Default)
        .unwrap()
        .is_none());
    txn.commit().unwrap();
}
