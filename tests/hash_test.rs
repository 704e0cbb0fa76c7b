use anyhow::Result;

use burrowdb::index::hash::{hasher, HashIndex};
use burrowdb::index::{Index, IndexError};

mod common;
use common::create_test_hash;

#[test]
fn test_insert_find() -> Result<()> {
    let (table, _dir) = create_test_hash()?;
    for key in 0..100 {
        table.insert(key, key * 3)?;
    }
    for key in 0..100 {
        let entry = table.find(key)?;
        assert_eq!(entry.key, key);
        assert_eq!(entry.value, key * 3);
    }
    match table.find(500) {
        Err(IndexError::NotFound) => {}
        other => panic!("expected not-found, got {:?}", other),
    }
    Ok(())
}

#[test]
fn test_duplicate_insert_fails() -> Result<()> {
    let (table, _dir) = create_test_hash()?;
    table.insert(1, 10)?;
    match table.insert(1, 20) {
        Err(IndexError::DuplicateKey) => {}
        other => panic!("expected duplicate-key, got {:?}", other),
    }
    assert_eq!(table.find(1)?.value, 10);
    Ok(())
}

#[test]
fn test_update_and_delete() -> Result<()> {
    let (table, _dir) = create_test_hash()?;
    table.insert(1, 10)?;
    table.update(1, 99)?;
    assert_eq!(table.find(1)?.value, 99);
    match table.update(2, 0) {
        Err(IndexError::NotFound) => {}
        other => panic!("expected not-found, got {:?}", other),
    }
    table.delete(1)?;
    assert!(table.find(1).is_err());
    // Deleting a missing key is a no-op.
    table.delete(1)?;
    Ok(())
}

// Enough inserts to split buckets and double the directory, after which
// every key must still hash to a slot that points at its bucket.
#[test]
fn test_splits_keep_directory_consistent() -> Result<()> {
    let (table, _dir) = create_test_hash()?;
    let count = 2000i64;
    for key in 0..count {
        table.insert(key, key)?;
    }
    let inner = table.table();
    assert!(inner.global_depth() > 2);
    let depth = inner.global_depth();
    let buckets = inner.buckets();
    let entries = table.select()?;
    assert_eq!(entries.len(), count as usize);
    for entry in &entries {
        let slot = hasher(entry.key, depth) as usize;
        // The entry must live in the bucket its hash addresses.
        let addressed = buckets[slot];
        let bucket_page = inner.pager().get_page(addressed)?;
        let bucket = burrowdb::index::hash::HashBucket::load(&bucket_page);
        assert!(
            bucket.find(entry.key).is_some(),
            "key {} not reachable through slot {}",
            entry.key,
            slot
        );
    }
    for key in 0..count {
        assert_eq!(table.find(key)?.value, key);
    }
    Ok(())
}

#[test]
fn test_directory_persists_across_reopen() -> Result<()> {
    let dir = tempfile::TempDir::new()?;
    let path = dir.path().join("table");
    let depth_before;
    {
        let table = HashIndex::open(&path)?;
        for key in 0..1500 {
            table.insert(key, key + 7)?;
        }
        depth_before = table.table().global_depth();
        table.close()?;
    }
    assert!(path.exists());
    let meta = burrowdb::index::hash::meta_path(&path);
    assert!(meta.exists());
    let table = HashIndex::open(&path)?;
    assert_eq!(table.table().global_depth(), depth_before);
    for key in 0..1500 {
        assert_eq!(table.find(key)?.value, key + 7);
    }
    Ok(())
}

#[test]
fn test_close_twice_rewrites_directory() -> Result<()> {
    // The meta file is rewritten on every close; a second round of inserts
    // and closes must not leave a stale directory behind.
    let dir = tempfile::TempDir::new()?;
    let path = dir.path().join("table");
    {
        let table = HashIndex::open(&path)?;
        for key in 0..800 {
            table.insert(key, key)?;
        }
        table.close()?;
    }
    {
        let table = HashIndex::open(&path)?;
        for key in 800..1600 {
            table.insert(key, key)?;
        }
        table.close()?;
    }
    let table = HashIndex::open(&path)?;
    for key in 0..1600 {
        assert_eq!(table.find(key)?.value, key);
    }
    Ok(())
}
