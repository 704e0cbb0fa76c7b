use anyhow::Result;
use tempfile::TempDir;
use uuid::Uuid;

use burrowdb::index::IndexType;
use burrowdb::recovery::handlers;

mod common;
use common::open_recovery_env;

// Committed work survives a crash; an uncommitted update is undone.
#[test]
fn test_crash_recovers_committed_state() -> Result<()> {
    let root = TempDir::new()?;
    let client = Uuid::new_v4();
    {
        let env = open_recovery_env(root.path())?;
        handlers::create_table(&env.db, &env.rm, IndexType::BTree, "t")?;
        handlers::begin(&env.tm, &env.rm, client)?;
        handlers::insert(&env.db, &env.tm, &env.rm, "t", 1, 100, client)?;
        handlers::insert(&env.db, &env.tm, &env.rm, "t", 2, 200, client)?;
        handlers::commit(&env.tm, &env.rm, client)?;
        let client2 = Uuid::new_v4();
        handlers::begin(&env.tm, &env.rm, client2)?;
        handlers::update(&env.db, &env.tm, &env.rm, "t", 1, 999, client2)?;
        // Crash: drop everything without closing or committing.
    }
    let env = open_recovery_env(root.path())?;
    let table = env.db.get_table("t")?;
    assert_eq!(table.find(1)?.value, 100);
    assert_eq!(table.find(2)?.value, 200);
    Ok(())
}

// A checkpoint bounds replay: an update logged after the checkpoint is
// redone and then undone because its transaction never committed.
#[test]
fn test_checkpoint_then_uncommitted_update() -> Result<()> {
    let root = TempDir::new()?;
    {
        let env = open_recovery_env(root.path())?;
        let client = Uuid::new_v4();
        handlers::create_table(&env.db, &env.rm, IndexType::BTree, "t")?;
        handlers::begin(&env.tm, &env.rm, client)?;
        handlers::insert(&env.db, &env.tm, &env.rm, "t", 1, 1, client)?;
        handlers::commit(&env.tm, &env.rm, client)?;
        env.rm.checkpoint()?;
        let client2 = Uuid::new_v4();
        handlers::begin(&env.tm, &env.rm, client2)?;
        handlers::update(&env.db, &env.tm, &env.rm, "t", 1, 2, client2)?;
        // Crash before commit.
    }
    let env = open_recovery_env(root.path())?;
    let table = env.db.get_table("t")?;
    assert_eq!(table.find(1)?.value, 1);
    Ok(())
}

// The checkpoint snapshot directory is a copy of the data directory.
#[test]
fn test_checkpoint_snapshots_data_dir() -> Result<()> {
    let root = TempDir::new()?;
    let env = open_recovery_env(root.path())?;
    let client = Uuid::new_v4();
    handlers::create_table(&env.db, &env.rm, IndexType::BTree, "t")?;
    handlers::begin(&env.tm, &env.rm, client)?;
    handlers::insert(&env.db, &env.tm, &env.rm, "t", 5, 50, client)?;
    handlers::commit(&env.tm, &env.rm, client)?;
    env.rm.checkpoint()?;
    let snapshot = burrowdb::recovery::recovery_dir(&env.data_dir);
    assert!(snapshot.exists());
    assert!(snapshot.join("t").exists());
    Ok(())
}

// Abort rolls back every change of the running transaction and ends it.
#[test]
fn test_abort_rolls_back() -> Result<()> {
    let root = TempDir::new()?;
    let env = open_recovery_env(root.path())?;
    let client = Uuid::new_v4();
    handlers::create_table(&env.db, &env.rm, IndexType::BTree, "t")?;
    handlers::begin(&env.tm, &env.rm, client)?;
    handlers::insert(&env.db, &env.tm, &env.rm, "t", 1, 10, client)?;
    handlers::insert(&env.db, &env.tm, &env.rm, "t", 2, 20, client)?;
    handlers::abort(&env.tm, &env.rm, client)?;
    let table = env.db.get_table("t")?;
    assert!(table.find(1).is_err());
    assert!(table.find(2).is_err());
    assert!(env.tm.get_transaction(client).is_none());
    // The client can start fresh afterwards.
    handlers::begin(&env.tm, &env.rm, client)?;
    handlers::insert(&env.db, &env.tm, &env.rm, "t", 1, 11, client)?;
    handlers::commit(&env.tm, &env.rm, client)?;
    assert_eq!(table.find(1)?.value, 11);
    Ok(())
}

// Deletes and inserts invert each other across a crash.
#[test]
fn test_uncommitted_insert_and_delete_are_undone() -> Result<()> {
    let root = TempDir::new()?;
    {
        let env = open_recovery_env(root.path())?;
        let client = Uuid::new_v4();
        handlers::create_table(&env.db, &env.rm, IndexType::BTree, "t")?;
        handlers::begin(&env.tm, &env.rm, client)?;
        handlers::insert(&env.db, &env.tm, &env.rm, "t", 1, 10, client)?;
        handlers::commit(&env.tm, &env.rm, client)?;
        let client2 = Uuid::new_v4();
        handlers::begin(&env.tm, &env.rm, client2)?;
        handlers::insert(&env.db, &env.tm, &env.rm, "t", 2, 20, client2)?;
        handlers::delete(&env.db, &env.tm, &env.rm, "t", 1, client2)?;
        // Crash with one insert and one delete in flight.
    }
    let env = open_recovery_env(root.path())?;
    let table = env.db.get_table("t")?;
    assert_eq!(table.find(1)?.value, 10);
    assert!(table.find(2).is_err());
    Ok(())
}

// Running recovery again over the already-recovered log converges to the
// same state.
#[test]
fn test_recovery_is_idempotent() -> Result<()> {
    let root = TempDir::new()?;
    {
        let env = open_recovery_env(root.path())?;
        let client = Uuid::new_v4();
        handlers::create_table(&env.db, &env.rm, IndexType::BTree, "t")?;
        handlers::begin(&env.tm, &env.rm, client)?;
        for key in 0..50 {
            handlers::insert(&env.db, &env.tm, &env.rm, "t", key, key * 2, client)?;
        }
        handlers::commit(&env.tm, &env.rm, client)?;
        let client2 = Uuid::new_v4();
        handlers::begin(&env.tm, &env.rm, client2)?;
        handlers::update(&env.db, &env.tm, &env.rm, "t", 10, -1, client2)?;
    }
    let env = open_recovery_env(root.path())?;
    env.rm.recover()?;
    let table = env.db.get_table("t")?;
    for key in 0..50 {
        assert_eq!(table.find(key)?.value, key * 2);
    }
    Ok(())
}

// A torn final log line is ignored and truncated away.
#[test]
fn test_torn_log_tail_is_dropped() -> Result<()> {
    use std::io::Write;

    let root = TempDir::new()?;
    {
        let env = open_recovery_env(root.path())?;
        let client = Uuid::new_v4();
        handlers::create_table(&env.db, &env.rm, IndexType::BTree, "t")?;
        handlers::begin(&env.tm, &env.rm, client)?;
        handlers::insert(&env.db, &env.tm, &env.rm, "t", 1, 100, client)?;
        handlers::commit(&env.tm, &env.rm, client)?;
    }
    {
        let mut log = std::fs::OpenOptions::new()
            .append(true)
            .open(root.path().join("db.log"))?;
        write!(log, "< half-written garbag")?;
    }
    let env = open_recovery_env(root.path())?;
    let table = env.db.get_table("t")?;
    assert_eq!(table.find(1)?.value, 100);
    let content = std::fs::read_to_string(&env.log_path)?;
    assert!(!content.contains("garbag"));
    Ok(())
}

// A statement refused with a deadlock aborts its whole transaction, even
// a read-only one: the loser's edits are undone and its locks released,
// which is what lets the winner's blocked request complete.
#[test]
fn test_deadlocked_statement_rolls_back() -> Result<()> {
    use std::sync::{Arc, Barrier};
    use std::thread;

    let root = TempDir::new()?;
    let env = open_recovery_env(root.path())?;
    let setup = Uuid::new_v4();
    handlers::create_table(&env.db, &env.rm, IndexType::BTree, "t")?;
    handlers::begin(&env.tm, &env.rm, setup)?;
    handlers::insert(&env.db, &env.tm, &env.rm, "t", 0, 100, setup)?;
    handlers::insert(&env.db, &env.tm, &env.rm, "t", 1, 101, setup)?;
    handlers::commit(&env.tm, &env.rm, setup)?;

    let barrier = Arc::new(Barrier::new(2));
    let mut handles = Vec::new();
    for (own, other) in [(0i64, 1i64), (1, 0)] {
        let db = env.db.clone();
        let tm = env.tm.clone();
        let rm = env.rm.clone();
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || -> Result<(i64, Uuid, bool)> {
            let client = Uuid::new_v4();
            handlers::begin(&tm, &rm, client)?;
            handlers::insert(&db, &tm, &rm, "t", own + 10, own, client)?;
            handlers::lock(&db, &tm, &rm, "t", own, client)?;
            barrier.wait();
            // One side reads, the other locks; either way the second
            // request closes the cycle for exactly one of them.
            let refused = if own == 0 {
                let mut out = Vec::new();
                handlers::find(&db, &tm, &rm, "t", other, client, &mut out).is_err()
            } else {
                handlers::lock(&db, &tm, &rm, "t", other, client).is_err()
            };
            if !refused {
                handlers::commit(&tm, &rm, client)?;
            }
            Ok((own, client, refused))
        }));
    }
    let outcomes: Vec<(i64, Uuid, bool)> = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .collect::<Result<_>>()?;
    assert_eq!(
        outcomes.iter().filter(|&&(_, _, refused)| refused).count(),
        1,
        "exactly one of the two requests must deadlock, got {:?}",
        outcomes
    );
    let table = env.db.get_table("t")?;
    for (own, client, refused) in outcomes {
        // Both transactions are finished: the winner committed, the loser
        // was rolled back by the refused statement.
        assert!(env.tm.get_transaction(client).is_none());
        if refused {
            assert!(table.find(own + 10).is_err());
        } else {
            assert_eq!(table.find(own + 10)?.value, own);
        }
    }
    // The pre-existing entries were never touched.
    assert_eq!(table.find(0)?.value, 100);
    assert_eq!(table.find(1)?.value, 101);
    Ok(())
}

// Hash tables recover the same way B+ trees do.
#[test]
fn test_hash_table_recovery() -> Result<()> {
    let root = TempDir::new()?;
    {
        let env = open_recovery_env(root.path())?;
        let client = Uuid::new_v4();
        handlers::create_table(&env.db, &env.rm, IndexType::Hash, "h")?;
        handlers::begin(&env.tm, &env.rm, client)?;
        handlers::insert(&env.db, &env.tm, &env.rm, "h", 1, 100, client)?;
        handlers::commit(&env.tm, &env.rm, client)?;
        let client2 = Uuid::new_v4();
        handlers::begin(&env.tm, &env.rm, client2)?;
        handlers::update(&env.db, &env.tm, &env.rm, "h", 1, 999, client2)?;
    }
    let env = open_recovery_env(root.path())?;
    let table = env.db.get_table("h")?;
    assert_eq!(table.find(1)?.value, 100);
    Ok(())
}
