//! LDAP connection pool management.
//!
//! The pool decorates a [`ClientFactory`] and keeps up to `count`
//! authenticated connections ready for reuse.
//!
//! ## Concurrency
//!
//! - Idle connections live in a FIFO queue guarded by a mutex, together with
//!   the `active` counter and the `closing` flag.
//! - A fair semaphore mirrors the queue length: one permit per idle
//!   connection. Acquirers wait on the semaphore and never hold the mutex
//!   while suspended.
//! - `active` counts connections that exist or are being created; a slot is
//!   reserved before dialing so racing callers cannot exceed `count`.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{Semaphore, SemaphorePermit, TryAcquireError};
use tokio::time::Instant;

use crate::client::DirectoryClient;
use crate::config::{
    PoolingConfig, DEFAULT_POOL_COUNT, DEFAULT_POOL_RETRIES, DEFAULT_POOL_TIMEOUT,
};
use crate::error::{LdapError, LdapResult};
use crate::factory::{ClientFactory, ClientOptions};
use crate::pooled::{PooledClient, Relinquish, SlotRelease};

// ============================================================================
// Pool Configuration
// ============================================================================

/// Pool sizing and timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum number of connections.
    pub count: usize,
    /// Attempts made to replace a stale connection.
    pub retries: usize,
    /// Maximum time an acquisition waits for a free connection.
    pub timeout: Duration,
}

impl PoolConfig {
    /// Creates a configuration; zero values take the defaults.
    #[must_use]
    pub fn new(count: usize, retries: usize, timeout: Duration) -> Self {
        Self {
            count: if count == 0 { DEFAULT_POOL_COUNT } else { count },
            retries: if retries == 0 {
                DEFAULT_POOL_RETRIES
            } else {
                retries
            },
            timeout: if timeout.is_zero() {
                DEFAULT_POOL_TIMEOUT
            } else {
                timeout
            },
        }
    }

    /// Delay between stale-connection replacement attempts.
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        let retries = u32::try_from(self.retries.max(1)).unwrap_or(u32::MAX);
        self.timeout / retries
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new(0, 0, Duration::ZERO)
    }
}

impl From<&PoolingConfig> for PoolConfig {
    fn from(config: &PoolingConfig) -> Self {
        Self::new(config.count, config.retries, config.timeout)
    }
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Configured capacity.
    pub count: usize,
    /// Connections created and not yet closed.
    pub active: usize,
    /// Connections waiting in the queue.
    pub idle: usize,
    /// Whether the pool is shutting down.
    pub closing: bool,
}

// ============================================================================
// Connection Pool
// ============================================================================

struct PoolState<C> {
    idle: VecDeque<C>,
    active: usize,
    closing: bool,
    initialized: bool,
}

struct PoolShared<F: ClientFactory> {
    factory: F,
    config: PoolConfig,
    state: Mutex<PoolState<F::Client>>,
    /// One permit per idle connection.
    available: Semaphore,
    init: tokio::sync::Mutex<()>,
}

/// Pool of authenticated directory connections.
///
/// Cloning is cheap; clones share the same connections.
pub struct ConnectionPool<F: ClientFactory> {
    shared: Arc<PoolShared<F>>,
}

impl<F: ClientFactory> Clone for ConnectionPool<F> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<F: ClientFactory> fmt::Debug for ConnectionPool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<F: ClientFactory> ConnectionPool<F> {
    /// Creates an empty pool. Connections are established by
    /// [`initialize`](Self::initialize) or lazily on first acquisition.
    #[must_use]
    pub fn new(factory: F, config: PoolConfig) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                factory,
                config,
                state: Mutex::new(PoolState {
                    idle: VecDeque::with_capacity(config.count),
                    active: 0,
                    closing: false,
                    initialized: false,
                }),
                available: Semaphore::new(0),
                init: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Returns the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Returns the wrapped factory.
    #[must_use]
    pub fn factory(&self) -> &F {
        &self.shared.factory
    }

    /// Returns a snapshot of the pool counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock();
        PoolStats {
            count: self.shared.config.count,
            active: state.active,
            idle: state.idle.len(),
            closing: state.closing,
        }
    }

    /// Establishes up to `count` connections.
    ///
    /// Individual failures are tolerated; the call fails with
    /// [`LdapError::PoolExhausted`] only when no connection could be made.
    /// Calling it on an initialized pool does nothing.
    pub async fn initialize(&self) -> LdapResult<()> {
        let _guard = self.shared.init.lock().await;

        {
            let state = self.shared.state.lock();
            if state.closing {
                return Err(LdapError::PoolClosed);
            }
            if state.initialized {
                return Ok(());
            }
        }

        let count = self.shared.config.count;
        let mut established = 0;
        let mut failed = 0;

        for _ in 0..count {
            match self.shared.create().await {
                Ok(client) => {
                    established += 1;
                    self.shared.release(client).await;
                }
                Err(e) => {
                    failed += 1;
                    tracing::warn!(error = %e, "Failed to establish pooled LDAP connection");
                }
            }
        }

        if established == 0 {
            tracing::error!(count, "No LDAP connections could be established for the pool");
            return Err(LdapError::PoolExhausted);
        }

        self.shared.state.lock().initialized = true;
        tracing::info!(established, failed, count, "LDAP connection pool initialized");

        Ok(())
    }

    /// Acquires a connection, waiting at most the configured timeout.
    ///
    /// The timeout covers both waiting for a release and growing the pool.
    /// Stale connections are replaced transparently.
    pub async fn acquire(&self) -> LdapResult<PooledClient<F::Client>> {
        let (closing, initialized) = {
            let state = self.shared.state.lock();
            (state.closing, state.initialized)
        };
        if closing {
            return Err(LdapError::PoolClosed);
        }
        if !initialized {
            self.initialize().await?;
        }

        let timeout = self.shared.config.timeout;
        let deadline = Instant::now() + timeout;

        let permit = match self.shared.available.try_acquire() {
            Ok(permit) => permit,
            Err(TryAcquireError::Closed) => return Err(LdapError::PoolClosed),
            Err(TryAcquireError::NoPermits) => {
                match tokio::time::timeout_at(deadline, self.wait_or_grow()).await {
                    Err(elapsed) => {
                        tracing::debug!(
                            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                            "Timed out waiting for pooled LDAP connection"
                        );
                        return Err(LdapError::Timeout {
                            timeout,
                            source: elapsed,
                        });
                    }
                    Ok(Err(e)) => return Err(e),
                    Ok(Ok(Waited::Grown(client))) => return Ok(self.wrap(client)),
                    Ok(Ok(Waited::Released(permit))) => permit,
                }
            }
        };

        // The permit stands for the queued connection taken below.
        permit.forget();
        let client = self.shared.state.lock().idle.pop_front();

        match client {
            Some(client) if !client.is_closing() => Ok(self.wrap(client)),
            stale => self.replace(stale).await,
        }
    }

    /// Closes every idle connection and refuses further acquisitions.
    ///
    /// Checked-out connections are closed when they are returned.
    pub async fn shutdown(&self) -> LdapResult<()> {
        let drained = {
            let mut state = self.shared.state.lock();
            if state.closing {
                return Ok(());
            }
            state.closing = true;
            self.shared.available.close();
            std::mem::take(&mut state.idle)
        };

        tracing::info!(idle = drained.len(), "Shutting down LDAP connection pool");

        for mut client in drained {
            let _slot = SlotRelease::new(&*self.shared);
            if let Err(e) = client.close().await {
                tracing::warn!(error = %e, "Failed to close pooled LDAP connection");
            }
        }

        Ok(())
    }

    /// Waits for a released connection while growing the pool when
    /// capacity is free. Whichever finishes first wins.
    async fn wait_or_grow(&self) -> LdapResult<Waited<'_, F::Client>> {
        let grow = self.grow();
        tokio::pin!(grow);
        let mut growing = true;

        loop {
            tokio::select! {
                permit = self.shared.available.acquire() => {
                    return permit.map(Waited::Released).map_err(|_| LdapError::PoolClosed);
                }
                grown = &mut grow, if growing => match grown {
                    Some(client) => return Ok(Waited::Grown(client)),
                    None => growing = false,
                },
            }
        }
    }

    /// Creates a connection when nothing is idle but capacity is free.
    async fn grow(&self) -> Option<F::Client> {
        {
            let state = self.shared.state.lock();
            if state.active >= self.shared.config.count {
                return None;
            }
        }

        match self.shared.create().await {
            Ok(client) => Some(client),
            Err(LdapError::PoolFull) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Could not grow LDAP connection pool, waiting for a release");
                None
            }
        }
    }

    /// Discards a stale connection and creates its replacement.
    async fn replace(&self, stale: Option<F::Client>) -> LdapResult<PooledClient<F::Client>> {
        if let Some(mut stale) = stale {
            tracing::debug!("Replacing stale pooled LDAP connection");
            let _slot = SlotRelease::new(&*self.shared);
            let _ = stale.close().await;
        }

        let attempts = self.shared.config.retries;
        let delay = self.shared.config.retry_delay();
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.shared.create().await {
                Ok(client) => return Ok(self.wrap(client)),
                Err(LdapError::PoolClosed) => return Err(LdapError::PoolClosed),
                Err(e) => {
                    tracing::warn!(attempt, attempts, error = %e, "Failed to replace stale LDAP connection");
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(LdapError::PoolAcquisition {
            attempts,
            source: Box::new(last_error.unwrap_or(LdapError::PoolFull)),
        })
    }

    fn wrap(&self, client: F::Client) -> PooledClient<F::Client> {
        PooledClient::new(client, self.shared.clone())
    }
}

impl<F: ClientFactory> PoolShared<F> {
    /// Reserves a slot and asks the factory for a connection.
    async fn create(&self) -> LdapResult<F::Client> {
        let reservation = self.reserve()?;
        let client = self.factory.get_client(None).await?;
        reservation.commit();
        Ok(client)
    }

    fn reserve(&self) -> LdapResult<SlotReservation<'_, F::Client>> {
        let mut state = self.state.lock();
        if state.closing {
            return Err(LdapError::PoolClosed);
        }
        if state.active >= self.config.count {
            return Err(LdapError::PoolFull);
        }
        state.active += 1;

        Ok(SlotReservation {
            state: &self.state,
            committed: false,
        })
    }

    /// Puts a connection back, closing it when the pool refuses it.
    async fn release(&self, client: F::Client) {
        if let Some(mut refused) = self.relinquish(client) {
            let _slot = SlotRelease::new(self);
            let _ = refused.close().await;
        }
    }
}

impl<F: ClientFactory> Relinquish<F::Client> for PoolShared<F> {
    fn relinquish(&self, client: F::Client) -> Option<F::Client> {
        let mut state = self.state.lock();

        if state.closing {
            return Some(client);
        }

        // Never hold more than `count` idle connections.
        if state.idle.len() >= self.config.count {
            tracing::debug!("LDAP connection pool is full, closing returned connection");
            return Some(client);
        }

        state.idle.push_back(client);
        self.available.add_permits(1);

        None
    }

    fn forget(&self) {
        let mut state = self.state.lock();
        state.active = state.active.saturating_sub(1);
    }
}

/// Outcome of waiting for a connection.
enum Waited<'a, C> {
    /// A connection was released into the queue.
    Released(SemaphorePermit<'a>),
    /// The pool grew by one connection.
    Grown(C),
}

/// Capacity slot held while a connection is being created.
///
/// Dropping an uncommitted reservation frees the slot, which covers both a
/// failed dial and a cancelled acquisition.
struct SlotReservation<'a, C> {
    state: &'a Mutex<PoolState<C>>,
    committed: bool,
}

impl<C> SlotReservation<'_, C> {
    fn commit(mut self) {
        self.committed = true;
    }
}

impl<C> Drop for SlotReservation<'_, C> {
    fn drop(&mut self) {
        if !self.committed {
            let mut state = self.state.lock();
            state.active = state.active.saturating_sub(1);
        }
    }
}

#[async_trait]
impl<F: ClientFactory> ClientFactory for ConnectionPool<F> {
    type Client = PooledClient<F::Client>;

    async fn initialize(&self) -> LdapResult<()> {
        ConnectionPool::initialize(self).await
    }

    /// Options bypass the pool and go straight to the wrapped factory.
    async fn get_client(&self, options: Option<ClientOptions>) -> LdapResult<Self::Client> {
        match options {
            Some(options) => self
                .shared
                .factory
                .get_client(Some(options))
                .await
                .map(PooledClient::detached),
            None => self.acquire().await,
        }
    }

    async fn shutdown(&self) -> LdapResult<()> {
        ConnectionPool::shutdown(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LdapConfig;
    use crate::factory::StandardClientFactory;
    use crate::testing::{MockDialer, MockDirectory};

    fn pool(
        directory: &MockDirectory,
        count: usize,
        timeout: Duration,
    ) -> ConnectionPool<StandardClientFactory<MockDialer>> {
        let config = LdapConfig::builder()
            .address("ldap://127.0.0.1:389")
            .user("cn=admin,dc=example,dc=com")
            .password("secret")
            .build()
            .unwrap();
        let factory = StandardClientFactory::new(&config, directory.dialer());
        ConnectionPool::new(factory, PoolConfig::new(count, 2, timeout))
    }

    #[test]
    fn config_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.count, 5);
        assert_eq!(config.retries, 2);
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.retry_delay(), Duration::from_secs(5));
    }

    #[test]
    fn config_keeps_explicit_values() {
        let config = PoolConfig::new(3, 4, Duration::from_millis(400));
        assert_eq!(config.count, 3);
        assert_eq!(config.retry_delay(), Duration::from_millis(100));
    }

    #[tokio::test]
    async fn initialize_fills_pool() {
        let directory = MockDirectory::new();
        let pool = pool(&directory, 3, Duration::from_secs(1));

        pool.initialize().await.unwrap();

        let stats = pool.stats();
        assert_eq!(stats.active, 3);
        assert_eq!(stats.idle, 3);
        assert_eq!(directory.open_connections(), 3);
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let directory = MockDirectory::new();
        let pool = pool(&directory, 2, Duration::from_secs(1));

        pool.initialize().await.unwrap();
        pool.initialize().await.unwrap();

        assert_eq!(directory.dials(), 2);
        assert_eq!(pool.stats().idle, 2);
    }

    #[tokio::test]
    async fn initialize_tolerates_partial_failure() {
        let directory = MockDirectory::new();
        directory.fail_next_dials(2);
        let pool = pool(&directory, 3, Duration::from_secs(1));

        pool.initialize().await.unwrap();

        assert_eq!(pool.stats().active, 1);
    }

    #[tokio::test]
    async fn initialize_fails_when_nothing_connects() {
        let directory = MockDirectory::new();
        directory.fail_all_dials(true);
        let pool = pool(&directory, 5, Duration::from_secs(1));

        assert!(matches!(
            pool.initialize().await,
            Err(LdapError::PoolExhausted)
        ));
        assert_eq!(pool.stats().active, 0);
        assert_eq!(directory.dials(), 5);
    }

    #[tokio::test]
    async fn acquire_grows_after_partial_initialize() {
        let directory = MockDirectory::new();
        directory.fail_next_dials(1);
        let pool = pool(&directory, 2, Duration::from_millis(100));

        pool.initialize().await.unwrap();
        let first = pool.acquire().await.unwrap();
        let second = pool.acquire().await.unwrap();

        assert_ne!(
            first.client().unwrap().id(),
            second.client().unwrap().id()
        );
        assert_eq!(pool.stats().active, 2);
    }

    #[tokio::test]
    async fn release_to_full_queue_closes_connection() {
        let directory = MockDirectory::new();
        let pool = pool(&directory, 1, Duration::from_secs(1));
        pool.initialize().await.unwrap();

        // A connection that was never counted by the pool.
        let extra = directory.connect();
        pool.shared.release(extra).await;

        assert_eq!(pool.stats().idle, 1);
        assert_eq!(directory.open_connections(), 1);
    }

    #[tokio::test]
    async fn shutdown_twice_is_harmless() {
        let directory = MockDirectory::new();
        let pool = pool(&directory, 2, Duration::from_secs(1));
        pool.initialize().await.unwrap();

        pool.shutdown().await.unwrap();
        pool.shutdown().await.unwrap();

        assert_eq!(directory.open_connections(), 0);
        assert_eq!(pool.stats().active, 0);
        assert!(matches!(pool.initialize().await, Err(LdapError::PoolClosed)));
    }

    #[tokio::test]
    async fn cancelled_creation_frees_slot() {
        let directory = MockDirectory::new();
        directory.set_dial_delay(Duration::from_millis(200));
        let pool = pool(&directory, 1, Duration::from_secs(1));

        let result = tokio::time::timeout(Duration::from_millis(20), pool.initialize()).await;
        assert!(result.is_err());
        assert_eq!(pool.stats().active, 0);
    }
}
