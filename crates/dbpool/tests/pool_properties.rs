//! Concurrency and lifecycle properties of the pool, driven through the mock backend.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use dbpool::testing::MockFactory;
use dbpool::{Connection, ConnectionId, Error, Interrupt, Pool, PoolConfig};
use parking_lot::Mutex;

fn pool(max_size: usize, prewarm: usize, max_wait: Duration) -> Pool<MockFactory> {
    Pool::new(
        MockFactory::new("mock://properties"),
        PoolConfig::new()
            .with_max_size(max_size)
            .with_prewarm(prewarm)
            .with_max_wait(max_wait)
            .with_validation_timeout(Duration::from_millis(10)),
    )
    .unwrap()
}

#[test]
fn test_concurrent_checkouts_never_exceed_cap() {
    const CAP: usize = 4;
    let pool = pool(CAP, 0, Duration::from_secs(10));
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..16)
        .map(|_| {
            let pool = pool.clone();
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            thread::spawn(move || {
                for _ in 0..25 {
                    let mut conn = pool.acquire().unwrap();
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    assert!(pool.stats().total <= CAP);
                    conn.execute("UPDATE t SET x = x + 1", &[]).unwrap();
                    active.fetch_sub(1, Ordering::SeqCst);
                    conn.close().unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= CAP);
    let stats = pool.stats();
    assert!(stats.total <= CAP);
    assert_eq!(stats.active, 0);
    assert!(stats.created <= CAP as u64);
}

#[test]
fn test_no_connection_is_shared_by_two_live_proxies() {
    let pool = pool(3, 0, Duration::from_secs(10));
    let in_use: Arc<Mutex<HashSet<ConnectionId>>> = Arc::new(Mutex::new(HashSet::new()));

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let pool = pool.clone();
            let in_use = Arc::clone(&in_use);
            thread::spawn(move || {
                for _ in 0..50 {
                    let conn = pool.acquire().unwrap();
                    let id = conn.connection_id().unwrap();
                    assert!(in_use.lock().insert(id), "{id} handed out twice");
                    thread::yield_now();
                    assert!(in_use.lock().remove(&id));
                    drop(conn);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
}

#[test]
fn test_reuse_below_cap_does_not_grow_total() {
    let pool = pool(5, 0, Duration::from_secs(1));

    let mut first = pool.acquire().unwrap();
    let id = first.connection_id().unwrap();
    first.close().unwrap();

    let second = pool.acquire().unwrap();
    assert_eq!(second.connection_id().unwrap(), id);
    assert_eq!(pool.stats().total, 1);
    assert_eq!(pool.stats().created, 1);
}

#[test]
fn test_double_close_returns_once() {
    let pool = pool(2, 0, Duration::from_secs(1));
    let mut conn = pool.acquire().unwrap();
    conn.close().unwrap();
    conn.close().unwrap();

    let stats = pool.stats();
    assert_eq!(stats.idle, 1);
    assert_eq!(stats.total, 1);

    // A second return would have queued the same connection twice.
    let a = pool.acquire().unwrap();
    let b = pool.acquire().unwrap();
    assert_ne!(a.connection_id().unwrap(), b.connection_id().unwrap());
}

#[test]
fn test_use_after_close_fails_fast() {
    let pool = pool(1, 0, Duration::from_secs(1));
    let mut conn = pool.acquire().unwrap();
    conn.close().unwrap();

    let err = conn.query("SELECT 1", &[]).unwrap_err();
    assert!(matches!(err, Error::UseAfterClose));
    assert!(conn.is_closed());

    // The raw connection is still healthy and back in the pool.
    let mut next = pool.acquire().unwrap();
    assert_eq!(next.query("SELECT 1", &[]).unwrap().len(), 1);
}

#[test]
fn test_exhausted_pool_times_out_after_wait_bound() {
    let wait = Duration::from_millis(200);
    let pool = pool(1, 0, wait);
    let held = pool.acquire().unwrap();

    let waiter = {
        let pool = pool.clone();
        thread::spawn(move || {
            let started = Instant::now();
            let result = pool.acquire().map(drop);
            (result, started.elapsed())
        })
    };
    let (result, elapsed) = waiter.join().unwrap();
    drop(held);

    let err = result.unwrap_err();
    assert!(err.is_resource_exhausted());
    assert!(err.is_retryable());
    assert!(elapsed >= wait, "gave up early after {elapsed:?}");
    assert!(elapsed < wait * 5, "gave up late after {elapsed:?}");
}

#[test]
fn test_invalid_idle_connection_is_replaced() {
    let pool = pool(2, 1, Duration::from_secs(1));
    let broken = pool.factory().handles()[0].clone();
    broken.break_connection();

    let conn = pool.acquire().unwrap();
    assert_ne!(conn.connection_id().unwrap(), broken.id());
    assert_eq!(broken.native_close_count(), 1);

    let stats = pool.stats();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.destroyed, 1);
    assert_eq!(stats.created, 2);
}

#[test]
fn test_invalid_idle_connection_at_cap_is_replaced_not_handed_out() {
    let pool = pool(1, 1, Duration::from_secs(1));
    let dead = pool.factory().handles()[0].clone();
    dead.kill();

    let conn = pool.acquire().unwrap();
    assert_ne!(conn.connection_id().unwrap(), dead.id());
    assert!(!conn.is_closed());
    assert_eq!(pool.stats().total, 1);
}

#[test]
fn test_connection_broken_during_checkout_is_discarded_on_return() {
    let pool = pool(2, 0, Duration::from_secs(1));
    let mut conn = pool.acquire().unwrap();
    let id = conn.connection_id().unwrap();
    pool.factory().handle(id).unwrap().break_connection();
    conn.close().unwrap();

    let stats = pool.stats();
    assert_eq!(stats.total, 0);
    assert_eq!(stats.idle, 0);

    let fresh = pool.acquire().unwrap();
    assert_ne!(fresh.connection_id().unwrap(), id);
}

#[test]
fn test_shutdown_rejects_acquire_and_closes_idle() {
    let pool = pool(4, 3, Duration::from_secs(1));
    let handles = pool.factory().handles();
    assert_eq!(handles.len(), 3);

    pool.shutdown();

    assert!(matches!(pool.acquire().unwrap_err(), Error::PoolClosed));
    assert!(!pool.acquire().unwrap_err().is_retryable());
    for handle in &handles {
        assert!(handle.is_natively_closed());
        assert_eq!(handle.native_close_count(), 1);
    }
}

#[test]
fn test_connection_checked_out_at_shutdown_is_destroyed_on_return() {
    let pool = pool(2, 0, Duration::from_secs(1));
    let conn = pool.acquire().unwrap();
    let handle = pool.factory().handle(conn.connection_id().unwrap()).unwrap();

    pool.shutdown();
    assert!(!handle.is_natively_closed());
    drop(conn);

    assert!(handle.is_natively_closed());
    let stats = pool.stats();
    assert_eq!(stats.total, 0);
    assert_eq!(stats.idle, 0);
}

#[test]
fn test_shutdown_wakes_blocked_waiters() {
    let pool = pool(1, 0, Duration::from_secs(10));
    let _held = pool.acquire().unwrap();

    let waiter = {
        let pool = pool.clone();
        thread::spawn(move || pool.acquire().map(drop))
    };
    thread::sleep(Duration::from_millis(50));
    let started = Instant::now();
    pool.shutdown();

    assert!(waiter.join().unwrap().unwrap_err().is_pool_closed());
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_blocked_acquire_receives_returned_connection() {
    let pool = pool(3, 0, Duration::from_secs(10));
    let barrier = Arc::new(Barrier::new(4));
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let release_rx = Arc::new(Mutex::new(release_rx));
    let (id_tx, id_rx) = mpsc::channel();

    // A, B and C check out concurrently; only A is told to release.
    let holders: Vec<_> = (0..3)
        .map(|index| {
            let pool = pool.clone();
            let barrier = Arc::clone(&barrier);
            let release_rx = Arc::clone(&release_rx);
            let id_tx = id_tx.clone();
            thread::spawn(move || {
                let mut conn = pool.acquire().unwrap();
                id_tx.send((index, conn.connection_id().unwrap())).unwrap();
                barrier.wait();
                if index == 0 {
                    release_rx.lock().recv().unwrap();
                    conn.close().unwrap();
                    None
                } else {
                    Some(conn)
                }
            })
        })
        .collect();
    barrier.wait();

    let ids: Vec<(usize, ConnectionId)> = id_rx.iter().take(3).collect();
    let a_id = ids.iter().find(|(index, _)| *index == 0).unwrap().1;
    let stats = pool.stats();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.active, 3);

    // D blocks at capacity.
    let d = {
        let pool = pool.clone();
        thread::spawn(move || {
            let conn = pool.acquire().unwrap();
            let id = conn.connection_id().unwrap();
            (conn, id)
        })
    };
    thread::sleep(Duration::from_millis(100));
    assert!(!d.is_finished());

    release_tx.send(()).unwrap();
    let (d_conn, d_id) = d.join().unwrap();
    assert_eq!(d_id, a_id);
    assert_eq!(pool.stats().total, 3);

    drop(d_conn);
    let others: Vec<_> = holders.into_iter().map(|h| h.join().unwrap()).collect();
    drop(others);

    let stats = pool.stats();
    assert_eq!(stats.idle, 3);
    assert_eq!(stats.active, 0);
    assert_eq!(stats.total, 3);
    assert_eq!(stats.created, 3);
}

#[test]
fn test_interrupted_wait_surfaces_error_and_keeps_flag() {
    let pool = pool(1, 0, Duration::from_secs(10));
    let _held = pool.acquire().unwrap();
    let interrupt = Interrupt::new();

    let waiter = {
        let pool = pool.clone();
        let interrupt = interrupt.clone();
        thread::spawn(move || pool.acquire_interruptible(&interrupt).map(drop))
    };
    thread::sleep(Duration::from_millis(50));
    interrupt.interrupt();

    let err = waiter.join().unwrap().unwrap_err();
    assert!(err.is_interrupted());
    assert!(!err.is_retryable());
    assert!(interrupt.is_interrupted());

    // A token that is already set fails before waiting.
    assert!(pool.acquire_interruptible(&interrupt).unwrap_err().is_interrupted());
    interrupt.clear();
    assert!(!interrupt.is_interrupted());
}

#[test]
fn test_failed_creation_releases_capacity() {
    let pool = pool(2, 0, Duration::from_millis(100));
    pool.factory().fail_next_connects(2);

    assert!(pool.acquire().unwrap_err().is_backend());
    assert!(pool.acquire().unwrap_err().is_backend());
    assert_eq!(pool.stats().total, 0);

    let a = pool.acquire().unwrap();
    let b = pool.acquire().unwrap();
    assert_ne!(a.connection_id().unwrap(), b.connection_id().unwrap());
    assert_eq!(pool.stats().total, 2);
}

#[test]
fn test_unrepresentable_wait_bound_waits_without_deadline() {
    let pool = pool(1, 0, Duration::MAX);
    let held = pool.acquire().unwrap();
    let id = held.connection_id().unwrap();

    let waiter = {
        let pool = pool.clone();
        thread::spawn(move || pool.acquire().map(|conn| conn.connection_id().unwrap()))
    };
    thread::sleep(Duration::from_millis(50));
    drop(held);

    assert_eq!(waiter.join().unwrap().unwrap(), id);
    assert_eq!(pool.stats().timeouts, 0);
}

#[test]
fn test_unrepresentable_wait_bound_still_observes_interrupt() {
    let pool = pool(1, 0, Duration::MAX);
    let _held = pool.acquire().unwrap();
    let interrupt = Interrupt::new();

    let waiter = {
        let pool = pool.clone();
        let interrupt = interrupt.clone();
        thread::spawn(move || pool.acquire_interruptible(&interrupt).map(drop))
    };
    thread::sleep(Duration::from_millis(30));
    interrupt.interrupt();

    assert!(waiter.join().unwrap().unwrap_err().is_interrupted());
}

#[test]
fn test_returned_connection_does_not_leak_open_transaction() {
    let pool = pool(1, 0, Duration::from_secs(1));

    let mut a = pool.acquire().unwrap();
    let id = a.connection_id().unwrap();
    a.set_auto_commit(false).unwrap();
    a.execute("INSERT INTO t VALUES (1)", &[]).unwrap();
    a.close().unwrap();

    let handle = pool.factory().handle(id).unwrap();
    assert_eq!(handle.rollback_count(), 1);

    let b = pool.acquire().unwrap();
    assert_eq!(b.connection_id().unwrap(), id);
    assert!(b.auto_commit().unwrap());
}

#[test]
fn test_connection_that_cannot_be_reset_is_discarded() {
    let pool = pool(1, 0, Duration::from_secs(1));

    let mut a = pool.acquire().unwrap();
    let id = a.connection_id().unwrap();
    a.set_auto_commit(false).unwrap();
    pool.factory().handle(id).unwrap().fail_reset();
    a.close().unwrap();

    assert_eq!(pool.stats().destroyed, 1);
    assert_eq!(pool.stats().total, 0);
    let b = pool.acquire().unwrap();
    assert_ne!(b.connection_id().unwrap(), id);
}
