//! Connection pool behaviour under concurrency, staleness and shutdown.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use authn_ldap::factory::StandardClientFactory;
use authn_ldap::testing::{MockDialer, MockDirectory};
use authn_ldap::{
    ClientFactory, ClientOptions, ConnectionPool, DirectoryClient, LdapConfig, LdapError,
    PoolConfig,
};
use parking_lot::Mutex;

type MockPool = ConnectionPool<StandardClientFactory<MockDialer>>;

const ADMIN: &str = "cn=admin,dc=example,dc=com";

fn directory() -> MockDirectory {
    let directory = MockDirectory::new();
    directory.add_user(ADMIN, "secret");
    directory.add_user("uid=john,ou=users,dc=example,dc=com", "hunter2");
    directory
}

fn pool(directory: &MockDirectory, count: usize, timeout: Duration) -> MockPool {
    let config = LdapConfig::builder()
        .address("ldap://127.0.0.1:389")
        .user(ADMIN)
        .password("secret")
        .build()
        .unwrap();
    let factory = StandardClientFactory::new(&config, directory.dialer());
    ConnectionPool::new(factory, PoolConfig::new(count, 2, timeout))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_acquisitions_never_exceed_capacity() {
    let directory = directory();
    directory.set_dial_delay(Duration::from_millis(10));
    let pool = pool(&directory, 3, Duration::from_secs(5));

    let holders = Arc::new(Mutex::new(HashSet::new()));
    let mut tasks = Vec::new();

    for _ in 0..24 {
        let pool = pool.clone();
        let holders = holders.clone();
        tasks.push(tokio::spawn(async move {
            let mut client = pool.acquire().await?;
            let id = client.client()?.id();

            // At most one holder per connection at any time.
            assert!(holders.lock().insert(id), "connection {id} handed out twice");
            tokio::time::sleep(Duration::from_millis(5)).await;
            holders.lock().remove(&id);

            client.close().await
        }));
    }

    for task in futures::future::join_all(tasks).await {
        task.unwrap().unwrap();
    }

    let stats = pool.stats();
    assert!(stats.active <= 3);
    assert_eq!(stats.idle, stats.active);
    assert!(directory.max_open_connections() <= 3);
}

#[tokio::test]
async fn released_connection_is_reused() {
    let directory = directory();
    let pool = pool(&directory, 1, Duration::from_secs(1));

    let mut first = pool.acquire().await.unwrap();
    let first_id = first.client().unwrap().id();
    first.close().await.unwrap();

    let second = pool.acquire().await.unwrap();

    assert_eq!(second.client().unwrap().id(), first_id);
    assert_eq!(directory.dials(), 1);
}

#[tokio::test]
async fn stale_connection_is_replaced() {
    let directory = directory();
    let pool = pool(&directory, 1, Duration::from_secs(1));

    let mut client = pool.acquire().await.unwrap();
    let stale_id = client.client().unwrap().id();
    client.close().await.unwrap();

    directory.break_connections();

    let replacement = pool.acquire().await.unwrap();

    assert_ne!(replacement.client().unwrap().id(), stale_id);
    assert!(!replacement.is_closing());
    assert_eq!(
        replacement.client().unwrap().bound_as(),
        Some(ADMIN)
    );
    assert_eq!(pool.stats().active, 1);
    assert_eq!(directory.open_connections(), 1);
}

#[tokio::test]
async fn failed_replacement_gives_up_after_retries() {
    let directory = directory();
    let pool = pool(&directory, 1, Duration::from_millis(100));

    let mut client = pool.acquire().await.unwrap();
    client.close().await.unwrap();

    directory.break_connections();
    directory.fail_all_dials(true);
    let dials_before = directory.dials();

    let err = pool.acquire().await.unwrap_err();

    assert!(matches!(err, LdapError::PoolAcquisition { attempts: 2, .. }));
    assert_eq!(directory.dials() - dials_before, 2);
    assert_eq!(pool.stats().active, 0);

    // The freed slot can be filled again once the directory recovers.
    directory.fail_all_dials(false);
    assert!(pool.acquire().await.is_ok());
}

#[tokio::test]
async fn acquisition_times_out_when_pool_is_busy() {
    let directory = directory();
    let pool = pool(&directory, 1, Duration::from_millis(50));

    let _held = pool.acquire().await.unwrap();

    let started = Instant::now();
    let err = pool.acquire().await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, LdapError::Timeout { .. }));
    assert!(err.is_retryable());
    assert!(elapsed >= Duration::from_millis(45), "returned after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(1), "returned after {elapsed:?}");
}

#[tokio::test]
async fn slow_growth_is_bounded_by_timeout() {
    let directory = directory();
    directory.fail_next_dials(1);
    let pool = pool(&directory, 2, Duration::from_millis(50));
    pool.initialize().await.unwrap();
    let _held = pool.acquire().await.unwrap();

    // Capacity is free, but growing takes far longer than the timeout.
    directory.set_dial_delay(Duration::from_millis(400));
    directory.fail_all_dials(true);

    let started = Instant::now();
    let err = pool.acquire().await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, LdapError::Timeout { .. }));
    assert!(elapsed >= Duration::from_millis(45), "returned after {elapsed:?}");
    assert!(elapsed < Duration::from_millis(300), "returned after {elapsed:?}");
    assert_eq!(pool.stats().active, 1);
}

#[tokio::test]
async fn release_during_slow_growth_serves_waiter() {
    let directory = directory();
    directory.fail_next_dials(1);
    let pool = pool(&directory, 2, Duration::from_secs(2));
    pool.initialize().await.unwrap();

    let mut held = pool.acquire().await.unwrap();
    let held_id = held.client().unwrap().id();
    directory.set_dial_delay(Duration::from_millis(500));

    let started = Instant::now();
    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await.map(|c| c.client().unwrap().id()) })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    held.close().await.unwrap();

    assert_eq!(waiter.await.unwrap().unwrap(), held_id);
    assert!(started.elapsed() < Duration::from_millis(400));
    // The abandoned dial gave its slot back.
    assert_eq!(pool.stats().active, 1);
}

#[tokio::test]
async fn cancelled_stale_close_frees_slot() {
    let directory = directory();
    let pool = pool(&directory, 1, Duration::from_secs(1));

    let mut client = pool.acquire().await.unwrap();
    client.close().await.unwrap();

    directory.break_connections();
    directory.set_close_delay(Duration::from_millis(500));

    let cancelled = tokio::time::timeout(Duration::from_millis(20), pool.acquire()).await;
    assert!(cancelled.is_err());
    assert_eq!(pool.stats().active, 0);
    assert_eq!(directory.open_connections(), 0);

    directory.set_close_delay(Duration::ZERO);
    assert!(pool.acquire().await.is_ok());
}

#[tokio::test]
async fn cancelled_close_after_shutdown_frees_slot() {
    let directory = directory();
    let pool = pool(&directory, 1, Duration::from_secs(1));

    let mut client = pool.acquire().await.unwrap();
    pool.shutdown().await.unwrap();
    directory.set_close_delay(Duration::from_millis(500));

    let cancelled = tokio::time::timeout(Duration::from_millis(20), client.close()).await;

    assert!(cancelled.is_err());
    assert_eq!(pool.stats().active, 0);
}

#[tokio::test]
async fn waiter_is_served_by_release() {
    let directory = directory();
    let pool = pool(&directory, 1, Duration::from_secs(2));

    let mut held = pool.acquire().await.unwrap();
    let held_id = held.client().unwrap().id();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await.map(|c| c.client().unwrap().id()) })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    held.close().await.unwrap();

    assert_eq!(waiter.await.unwrap().unwrap(), held_id);
}

#[tokio::test]
async fn dropped_client_returns_to_pool() {
    let directory = directory();
    let pool = pool(&directory, 1, Duration::from_millis(100));

    let client = pool.acquire().await.unwrap();
    assert_eq!(pool.stats().idle, 0);
    drop(client);

    assert_eq!(pool.stats().idle, 1);
    assert!(pool.acquire().await.is_ok());
}

#[tokio::test]
async fn second_close_fails_without_releasing_again() {
    let directory = directory();
    let pool = pool(&directory, 2, Duration::from_secs(1));
    pool.initialize().await.unwrap();

    let mut client = pool.acquire().await.unwrap();
    client.close().await.unwrap();

    assert!(matches!(client.close().await, Err(LdapError::ClientClosed)));
    assert!(matches!(
        client.bind(ADMIN, "secret").await,
        Err(LdapError::ClientClosed)
    ));
    assert!(client.is_closing());
    assert_eq!(pool.stats().idle, 2);
}

#[tokio::test]
async fn shutdown_drains_and_rejects() {
    let directory = directory();
    let pool = pool(&directory, 3, Duration::from_secs(1));
    pool.initialize().await.unwrap();
    assert_eq!(directory.open_connections(), 3);

    pool.shutdown().await.unwrap();

    assert_eq!(directory.open_connections(), 0);
    assert!(pool.stats().closing);
    assert!(matches!(pool.acquire().await, Err(LdapError::PoolClosed)));
}

#[tokio::test]
async fn shutdown_wakes_waiters() {
    let directory = directory();
    let pool = pool(&directory, 1, Duration::from_secs(5));

    let _held = pool.acquire().await.unwrap();
    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await.map(|_| ()) })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    pool.shutdown().await.unwrap();

    assert!(matches!(waiter.await.unwrap(), Err(LdapError::PoolClosed)));
}

#[tokio::test]
async fn connection_returned_after_shutdown_is_closed() {
    let directory = directory();
    let pool = pool(&directory, 2, Duration::from_secs(1));
    pool.initialize().await.unwrap();

    let mut client = pool.acquire().await.unwrap();
    pool.shutdown().await.unwrap();
    assert_eq!(directory.open_connections(), 1);

    client.close().await.unwrap();

    assert_eq!(directory.open_connections(), 0);
    assert_eq!(pool.stats().active, 0);
}

#[tokio::test]
async fn exhausted_initialize_reports_failure() {
    let directory = directory();
    directory.fail_all_dials(true);
    let pool = pool(&directory, 5, Duration::from_secs(1));

    assert!(matches!(
        pool.initialize().await,
        Err(LdapError::PoolExhausted)
    ));
    assert_eq!(directory.dials(), 5);
    assert_eq!(pool.stats().idle, 0);
}

#[tokio::test]
async fn per_call_options_bypass_pool() {
    let directory = directory();
    let pool = pool(&directory, 1, Duration::from_secs(1));
    pool.initialize().await.unwrap();
    let dials = directory.dials();

    let options = ClientOptions::new()
        .principal("uid=john,ou=users,dc=example,dc=com")
        .credential("hunter2");
    let mut client = pool.get_client(Some(options)).await.unwrap();

    assert!(!client.is_pooled());
    assert_eq!(directory.dials(), dials + 1);
    assert_eq!(pool.stats().idle, 1);

    client.close().await.unwrap();

    // The user connection is closed, not enqueued.
    assert_eq!(pool.stats().idle, 1);
    assert_eq!(pool.stats().active, 1);
    assert_eq!(directory.open_connections(), 1);
}
