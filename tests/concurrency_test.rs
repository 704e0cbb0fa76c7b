use std::sync::{Arc, Barrier};
use std::thread;

use uuid::Uuid;

use burrowdb::transaction::{LockManager, LockMode, TransactionError, TransactionManager};

// Two transactions lock opposite keys, then each requests the other's.
// Exactly one request must fail with a deadlock; after the loser releases
// its locks, the winner's request completes.
#[test]
fn test_symmetric_deadlock_aborts_one() {
    let tm = Arc::new(TransactionManager::new(Arc::new(LockManager::new())));
    let barrier = Arc::new(Barrier::new(2));
    let mut handles = Vec::new();
    for (own, other) in [(0i64, 1i64), (1, 0)] {
        let tm = Arc::clone(&tm);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            let id = Uuid::new_v4();
            tm.begin(id).unwrap();
            tm.lock(id, "t", own, LockMode::Write).unwrap();
            barrier.wait();
            let result = tm.lock(id, "t", other, LockMode::Write);
            let deadlocked = matches!(result, Err(TransactionError::Deadlock));
            // The loser aborts, releasing its locks so the winner can
            // finish; the winner commits normally.
            tm.commit(id).unwrap();
            deadlocked
        }));
    }
    let outcomes: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(
        outcomes.iter().filter(|&&deadlocked| deadlocked).count(),
        1,
        "exactly one of the two requests must deadlock, got {:?}",
        outcomes
    );
}

// Writers on the same resource serialize; the sum of read-modify-write
// increments is exact.
#[test]
fn test_writers_serialize() {
    use std::sync::atomic::{AtomicI64, Ordering};

    let tm = Arc::new(TransactionManager::new(Arc::new(LockManager::new())));
    let counter = Arc::new(AtomicI64::new(0));
    let mut handles = Vec::new();
    for _ in 0..8 {
        let tm = Arc::clone(&tm);
        let counter = Arc::clone(&counter);
        handles.push(thread::spawn(move || {
            for _ in 0..50 {
                let id = Uuid::new_v4();
                tm.begin(id).unwrap();
                tm.lock(id, "t", 0, LockMode::Write).unwrap();
                let seen = counter.load(Ordering::SeqCst);
                counter.store(seen + 1, Ordering::SeqCst);
                tm.commit(id).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(counter.load(Ordering::SeqCst), 8 * 50);
}

// A transaction that merely waits (no cycle) blocks until the holder
// commits, then proceeds.
#[test]
fn test_waiter_proceeds_after_commit() {
    let tm = Arc::new(TransactionManager::new(Arc::new(LockManager::new())));
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    tm.begin(a).unwrap();
    tm.begin(b).unwrap();
    tm.lock(a, "t", 0, LockMode::Write).unwrap();
    let handle = {
        let tm = Arc::clone(&tm);
        thread::spawn(move || {
            tm.lock(b, "t", 0, LockMode::Write).unwrap();
            tm.commit(b).unwrap();
        })
    };
    thread::sleep(std::time::Duration::from_millis(50));
    tm.commit(a).unwrap();
    handle.join().unwrap();
}
