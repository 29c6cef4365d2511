//! Capacity and aging scenarios for a single-slot pool.
//!
//! The holder of the only resource keeps it past its maximum age while another caller waits.
//! Once everything is released, the pool must grant resources again without delay.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use agepool::{Error, Pool, PoolConfig, PoolState, Pooled, ResourceFactory};
use parking_lot::Mutex;
use tokio::time::{sleep, Instant};

const SEC: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
#[error("connection refused")]
struct Refused;

#[derive(Debug)]
struct Conn {
    serial: usize,
}

/// Connection factory with test-controlled opening delay.
#[derive(Default)]
struct Database {
    opened: AtomicUsize,
    closed: AtomicUsize,
    next_delay: Mutex<Duration>,
}

#[async_trait::async_trait]
impl ResourceFactory for Database {
    type Resource = Conn;
    type Error = Refused;

    async fn create(&self) -> Result<Conn, Refused> {
        let delay = *self.next_delay.lock();
        sleep(delay).await;
        let serial = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Conn { serial })
    }

    fn close(&self, _conn: Conn) -> Result<(), Refused> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn single_slot_pool() -> Pool<Arc<Database>> {
    Pool::new(
        Arc::new(Database::default()),
        PoolConfig::new(1, 4 * SEC, 60 * SEC, 60 * SEC).with_name("regression"),
    )
    .unwrap()
}

fn spawn_task(pool: &Pool<Arc<Database>>) -> tokio::task::JoinHandle<Result<usize, Error<Refused>>> {
    let pool = pool.clone();
    tokio::spawn(async move {
        let conn = pool.acquire(8 * SEC).await?;
        Ok(conn.serial)
    })
}

fn idle_state() -> PoolState {
    PoolState {
        max_size: 1,
        ..PoolState::default()
    }
}

/// Expired resource is closed on release, and the waiter gets a fresh one in time.
#[tokio::test(start_paused = true)]
async fn waiter_gets_replacement_for_expired() {
    let pool = single_slot_pool();
    let held = pool.acquire(8 * SEC).await.unwrap();
    assert_eq!(held.serial, 1);
    *pool.factory().next_delay.lock() = SEC;

    let waiter = spawn_task(&pool);
    sleep(6 * SEC).await;
    assert_eq!(pool.status().waiting, 1);
    assert!(Pooled::age(&held) >= 4 * SEC);
    drop(held);
    assert_eq!(pool.factory().closed.load(Ordering::SeqCst), 1);

    let started = Instant::now();
    assert_eq!(waiter.await.unwrap().unwrap(), 2);
    assert!(started.elapsed() < 2 * SEC);
    assert_eq!(pool.status().idle, 1);
}

/// Pool with nothing checked out grants a resource immediately.
#[tokio::test(start_paused = true)]
async fn no_false_contention() {
    let pool = single_slot_pool();
    let held = pool.acquire(8 * SEC).await.unwrap();
    *pool.factory().next_delay.lock() = SEC;
    let waiter = spawn_task(&pool);
    sleep(6 * SEC).await;
    drop(held);
    assert!(waiter.await.unwrap().is_ok());
    sleep(SEC).await;

    // Resource handed to the waiter was released within its maximum age.
    assert_eq!(
        pool.status(),
        PoolState {
            size: 1,
            idle: 1,
            ..idle_state()
        }
    );

    let started = Instant::now();
    let conn = pool.acquire(8 * SEC).await.unwrap();
    assert!(started.elapsed() < SEC);
    assert_eq!(conn.serial, 2);
    assert_eq!(pool.factory().opened.load(Ordering::SeqCst), 2);
}

/// Waiter whose replacement resource takes too long to open times out, and does not leak the
/// slot it was creating in.
#[tokio::test(start_paused = true)]
async fn aborted_creation_frees_slot() {
    let pool = single_slot_pool();
    let held = pool.acquire(8 * SEC).await.unwrap();
    // Opening the next connection stalls, as if the database were unreachable.
    *pool.factory().next_delay.lock() = 10 * SEC;

    let waiter = spawn_task(&pool);
    sleep(6 * SEC).await;
    drop(held);

    let result = waiter.await.unwrap();
    assert!(matches!(result, Err(Error::AcquireTimeout)));
    sleep(SEC).await;
    assert_eq!(pool.status(), idle_state());

    *pool.factory().next_delay.lock() = Duration::ZERO;
    let second = spawn_task(&pool);
    let started = Instant::now();
    assert!(second.await.unwrap().is_ok());
    assert!(started.elapsed() < SEC);
}

/// Healthy resource survives a round trip through the pool.
#[tokio::test(start_paused = true)]
async fn round_trip_reuses() {
    let pool = single_slot_pool();
    let first = pool.acquire(SEC).await.unwrap();
    let id = Pooled::id(&first);
    pool.release(first);
    sleep(SEC).await;
    let second = pool.acquire(SEC).await.unwrap();
    assert_eq!(Pooled::id(&second), id);
    assert_eq!(pool.factory().opened.load(Ordering::SeqCst), 1);
}
