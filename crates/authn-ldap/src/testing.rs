//! Testing utilities.
//!
//! An in-memory directory that hands out scripted connections, so the pool
//! can be exercised without a real LDAP server.
//!
//! # Example
//!
//! ```ignore
//! let directory = MockDirectory::new();
//! directory.fail_next_dials(2);
//!
//! let factory = StandardClientFactory::new(&config, directory.dialer());
//! let pool = ConnectionPool::new(factory, PoolConfig::default());
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::client::{DialOptions, Dialer, DirectoryClient};
use crate::config::TlsConfig;
use crate::error::{LdapError, LdapResult, RESULT_CODE_INVALID_CREDENTIALS};

#[derive(Debug, Default)]
struct DirectoryState {
    next_id: u64,
    dials: usize,
    open: usize,
    max_open: usize,
    fail_dials: usize,
    fail_all_dials: bool,
    fail_start_tls: bool,
    dial_delay: Option<Duration>,
    close_delay: Option<Duration>,
    credentials: HashMap<String, String>,
    connections: HashMap<u64, Arc<AtomicBool>>,
}

/// Shared, scriptable in-memory directory.
#[derive(Clone, Debug, Default)]
pub struct MockDirectory {
    state: Arc<Mutex<DirectoryState>>,
}

impl MockDirectory {
    /// Creates an empty directory that accepts any bind.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a dialer connected to this directory.
    #[must_use]
    pub fn dialer(&self) -> MockDialer {
        MockDialer {
            directory: self.clone(),
        }
    }

    /// Opens a connection directly, bypassing the dial script.
    #[must_use]
    pub fn connect(&self) -> MockClient {
        let mut state = self.state.lock();
        state.next_id += 1;
        state.open += 1;
        state.max_open = state.max_open.max(state.open);

        let id = state.next_id;
        let closing = Arc::new(AtomicBool::new(false));
        state.connections.insert(id, closing.clone());

        MockClient {
            id,
            directory: self.clone(),
            closing,
            closed: false,
            tls: false,
            bound_as: None,
        }
    }

    /// Restricts binds to the given principal/credential pairs.
    pub fn add_user(&self, principal: impl Into<String>, credential: impl Into<String>) {
        self.state
            .lock()
            .credentials
            .insert(principal.into(), credential.into());
    }

    /// Makes the next `count` dials fail.
    pub fn fail_next_dials(&self, count: usize) {
        self.state.lock().fail_dials = count;
    }

    /// Makes every dial fail until reset.
    pub fn fail_all_dials(&self, fail: bool) {
        self.state.lock().fail_all_dials = fail;
    }

    /// Makes StartTLS fail on every connection.
    pub fn fail_start_tls(&self, fail: bool) {
        self.state.lock().fail_start_tls = fail;
    }

    /// Delays every dial, widening race windows.
    pub fn set_dial_delay(&self, delay: Duration) {
        self.state.lock().dial_delay = Some(delay);
    }

    /// Delays every close, so it can be cancelled while suspended.
    pub fn set_close_delay(&self, delay: Duration) {
        self.state.lock().close_delay = Some(delay);
    }

    /// Marks every open connection as broken.
    pub fn break_connections(&self) {
        for closing in self.state.lock().connections.values() {
            closing.store(true, Ordering::SeqCst);
        }
    }

    /// Number of dial attempts so far.
    #[must_use]
    pub fn dials(&self) -> usize {
        self.state.lock().dials
    }

    /// Number of connections currently open.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.state.lock().open
    }

    /// Highest number of connections that were open at the same time.
    #[must_use]
    pub fn max_open_connections(&self) -> usize {
        self.state.lock().max_open
    }

    fn disconnect(&self, id: u64) {
        let mut state = self.state.lock();
        if state.connections.remove(&id).is_some() {
            state.open -= 1;
        }
    }

    fn check_bind(&self, principal: &str, credential: &str) -> LdapResult<()> {
        let state = self.state.lock();
        if state.credentials.is_empty() {
            return Ok(());
        }
        match state.credentials.get(principal) {
            Some(expected) if expected == credential => Ok(()),
            _ => Err(LdapError::bind(
                principal,
                Some(RESULT_CODE_INVALID_CREDENTIALS),
                "invalid credentials",
            )),
        }
    }
}

/// Dialer producing [`MockClient`] connections.
#[derive(Clone)]
pub struct MockDialer {
    directory: MockDirectory,
}

#[async_trait]
impl Dialer for MockDialer {
    type Client = MockClient;

    async fn dial(&self, address: &str, _options: &DialOptions) -> LdapResult<MockClient> {
        let delay = {
            let mut state = self.directory.state.lock();
            state.dials += 1;
            state.dial_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        {
            let mut state = self.directory.state.lock();
            if state.fail_all_dials {
                return Err(LdapError::dial(address, "connection refused"));
            }
            if state.fail_dials > 0 {
                state.fail_dials -= 1;
                return Err(LdapError::dial(address, "connection refused"));
            }
        }

        Ok(self.directory.connect())
    }
}

/// In-memory directory connection.
#[derive(Debug)]
pub struct MockClient {
    id: u64,
    directory: MockDirectory,
    closing: Arc<AtomicBool>,
    closed: bool,
    tls: bool,
    bound_as: Option<String>,
}

impl MockClient {
    /// Unique connection identifier.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Principal of the last successful bind.
    #[must_use]
    pub fn bound_as(&self) -> Option<&str> {
        self.bound_as.as_deref()
    }

    /// Whether StartTLS was performed.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        self.tls
    }

    /// Whether `close` was called.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Marks this connection as broken.
    pub fn break_connection(&self) {
        self.closing.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl DirectoryClient for MockClient {
    async fn start_tls(&mut self, _tls: &TlsConfig) -> LdapResult<()> {
        if self.directory.state.lock().fail_start_tls {
            return Err(LdapError::StartTls("handshake failure".to_string()));
        }
        self.tls = true;
        Ok(())
    }

    async fn bind(&mut self, principal: &str, credential: &str) -> LdapResult<()> {
        if self.is_closing() {
            return Err(LdapError::bind(principal, None, "connection closed"));
        }
        self.directory.check_bind(principal, credential)?;
        self.bound_as = Some(principal.to_string());
        Ok(())
    }

    async fn unauthenticated_bind(&mut self, principal: &str) -> LdapResult<()> {
        if self.is_closing() {
            return Err(LdapError::bind(principal, None, "connection closed"));
        }
        self.bound_as = Some(principal.to_string());
        Ok(())
    }

    async fn close(&mut self) -> LdapResult<()> {
        let delay = self.directory.state.lock().close_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if !self.closed {
            self.closed = true;
            self.closing.store(true, Ordering::SeqCst);
            self.directory.disconnect(self.id);
        }
        Ok(())
    }

    fn is_closing(&self) -> bool {
        self.closed || self.closing.load(Ordering::SeqCst)
    }
}

impl Drop for MockClient {
    fn drop(&mut self) {
        if !self.closed {
            self.directory.disconnect(self.id);
        }
    }
}
