//! Directory client and dialer capabilities.
//!
//! The wire protocol is provided by an external implementation. This crate
//! only depends on the small set of operations needed to establish, verify
//! and tear down an authenticated connection.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::{TlsConfig, DEFAULT_DIAL_TIMEOUT};
use crate::error::LdapResult;

/// Operations every directory connection supports.
///
/// Implementations must be `Send` so connections can move between tasks
/// while checked out of a pool.
#[async_trait]
pub trait DirectoryClient: Send + 'static {
    /// Upgrades the established transport to TLS.
    async fn start_tls(&mut self, tls: &TlsConfig) -> LdapResult<()>;

    /// Performs a simple bind with a principal and credential.
    async fn bind(&mut self, principal: &str, credential: &str) -> LdapResult<()>;

    /// Performs an unauthenticated bind with only a principal.
    async fn unauthenticated_bind(&mut self, principal: &str) -> LdapResult<()>;

    /// Closes the connection.
    async fn close(&mut self) -> LdapResult<()>;

    /// Returns `true` once the connection has started closing or is unusable.
    fn is_closing(&self) -> bool;
}

/// Options passed to a [`Dialer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialOptions {
    /// Transport connect timeout.
    pub timeout: Duration,

    /// Whether the connection will be upgraded with StartTLS.
    pub start_tls: bool,

    /// TLS settings for `ldaps://` or StartTLS.
    pub tls: TlsConfig,
}

impl DialOptions {
    /// Returns these options for dialing an address other than the
    /// configured one. The TLS server name is dropped so the certificate is
    /// checked against the dialed host.
    #[must_use]
    pub fn for_other_address(&self) -> Self {
        let mut options = self.clone();
        options.tls.server_name = None;
        options
    }
}

impl Default for DialOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_DIAL_TIMEOUT,
            start_tls: false,
            tls: TlsConfig::default(),
        }
    }
}

/// Opens raw, unauthenticated directory connections.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    /// Connection type produced by this dialer.
    type Client: DirectoryClient;

    /// Dials `address` and returns an unbound connection.
    async fn dial(&self, address: &str, options: &DialOptions) -> LdapResult<Self::Client>;
}
