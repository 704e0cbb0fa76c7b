use std::collections::HashSet;

use anyhow::Result;

use burrowdb::index::Index;
use burrowdb::query::{join, EntryPair};

mod common;
use common::{create_test_btree, create_test_hash};

fn pair_set(pairs: &[EntryPair]) -> HashSet<(i64, i64, i64, i64)> {
    pairs
        .iter()
        .map(|p| (p.left.key, p.left.value, p.right.key, p.right.value))
        .collect()
}

#[test]
fn test_join_on_keys() -> Result<()> {
    let (left, _l) = create_test_btree()?;
    let (right, _r) = create_test_btree()?;
    for key in 0..100 {
        left.insert(key, key * 10)?;
    }
    for key in 50..150 {
        right.insert(key, key * 100)?;
    }
    let pairs = join(&left, &right, true, true)?;
    assert_eq!(pairs.len(), 50);
    let set = pair_set(&pairs);
    for key in 50..100 {
        assert!(set.contains(&(key, key * 10, key, key * 100)));
    }
    Ok(())
}

#[test]
fn test_join_value_on_key() -> Result<()> {
    // left's values join against right's keys.
    let (left, _l) = create_test_btree()?;
    let (right, _r) = create_test_btree()?;
    left.insert(1, 500)?;
    left.insert(2, 501)?;
    left.insert(3, 999)?;
    right.insert(500, 7)?;
    right.insert(501, 8)?;
    let pairs = join(&left, &right, false, true)?;
    let set = pair_set(&pairs);
    assert_eq!(pairs.len(), 2);
    assert!(set.contains(&(1, 500, 500, 7)));
    assert!(set.contains(&(2, 501, 501, 8)));
    Ok(())
}

#[test]
fn test_join_mixed_index_types() -> Result<()> {
    let (left, _l) = create_test_btree()?;
    let (right, _r) = create_test_hash()?;
    for key in 0..300 {
        left.insert(key, key)?;
    }
    for key in 0..300 {
        if key % 2 == 0 {
            right.insert(key, key + 1)?;
        }
    }
    let pairs = join(&left, &right, true, true)?;
    assert_eq!(pairs.len(), 150);
    for pair in &pairs {
        assert_eq!(pair.left.key % 2, 0);
        assert_eq!(pair.right.value, pair.right.key + 1);
    }
    Ok(())
}

#[test]
fn test_join_empty_side() -> Result<()> {
    let (left, _l) = create_test_btree()?;
    let (right, _r) = create_test_btree()?;
    for key in 0..10 {
        left.insert(key, key)?;
    }
    let pairs = join(&left, &right, true, true)?;
    assert!(pairs.is_empty());
    Ok(())
}
