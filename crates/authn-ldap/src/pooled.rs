//! Pooled client decorator.
//!
//! A [`PooledClient`] forwards every directory operation to the connection it
//! wraps, except [`close`](DirectoryClient::close): closing hands the
//! connection back to the pool that issued it and permanently invalidates the
//! wrapper.
//!
//! ## Caller Obligations
//!
//! Close each client exactly once. A second `close`, or any operation after
//! `close`, fails with [`LdapError::ClientClosed`] and releases nothing.
//! A client dropped without being closed is released as well.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::client::DirectoryClient;
use crate::config::TlsConfig;
use crate::error::{LdapError, LdapResult};

/// Release path of the pool that issued a connection.
pub(crate) trait Relinquish<C>: Send + Sync {
    /// Takes a connection back into the pool.
    ///
    /// Returns the connection when the pool refuses it (closing or full);
    /// the caller must then close it and call [`Relinquish::forget`].
    fn relinquish(&self, client: C) -> Option<C>;

    /// Frees the capacity slot of a connection that was closed for good.
    fn forget(&self);
}

/// Capacity slot of a connection that is being closed.
///
/// The slot is freed on drop, so a close that is cancelled while
/// suspended still gives its slot back.
pub(crate) struct SlotRelease<'a, C> {
    pool: &'a dyn Relinquish<C>,
}

impl<'a, C> SlotRelease<'a, C> {
    pub(crate) fn new(pool: &'a dyn Relinquish<C>) -> Self {
        Self { pool }
    }
}

impl<C> Drop for SlotRelease<'_, C> {
    fn drop(&mut self) {
        self.pool.forget();
    }
}

/// A directory client checked out of a [`ConnectionPool`](crate::pool::ConnectionPool).
pub struct PooledClient<C: DirectoryClient> {
    client: Option<C>,
    pool: Option<Arc<dyn Relinquish<C>>>,
}

impl<C: DirectoryClient> PooledClient<C> {
    pub(crate) fn new(client: C, pool: Arc<dyn Relinquish<C>>) -> Self {
        Self {
            client: Some(client),
            pool: Some(pool),
        }
    }

    /// Wraps a connection that does not belong to any pool.
    ///
    /// Closing a detached client closes the connection.
    #[must_use]
    pub fn detached(client: C) -> Self {
        Self {
            client: Some(client),
            pool: None,
        }
    }

    /// Returns `true` if the connection came from a pool.
    #[must_use]
    pub fn is_pooled(&self) -> bool {
        self.pool.is_some()
    }

    /// Returns `true` once this handle has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.client.is_none()
    }

    /// Returns the wrapped connection.
    pub fn client(&self) -> LdapResult<&C> {
        self.client.as_ref().ok_or(LdapError::ClientClosed)
    }

    /// Returns the wrapped connection mutably, for protocol operations.
    pub fn client_mut(&mut self) -> LdapResult<&mut C> {
        self.client.as_mut().ok_or(LdapError::ClientClosed)
    }
}

impl<C: DirectoryClient> fmt::Debug for PooledClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledClient")
            .field("pooled", &self.is_pooled())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[async_trait]
impl<C: DirectoryClient> DirectoryClient for PooledClient<C> {
    async fn start_tls(&mut self, tls: &TlsConfig) -> LdapResult<()> {
        self.client_mut()?.start_tls(tls).await
    }

    async fn bind(&mut self, principal: &str, credential: &str) -> LdapResult<()> {
        self.client_mut()?.bind(principal, credential).await
    }

    async fn unauthenticated_bind(&mut self, principal: &str) -> LdapResult<()> {
        self.client_mut()?.unauthenticated_bind(principal).await
    }

    /// Returns the connection to its pool.
    ///
    /// Both fields are cleared before anything else happens, so this handle
    /// can never release the same connection twice.
    async fn close(&mut self) -> LdapResult<()> {
        let client = self.client.take();
        let pool = self.pool.take();

        let Some(mut client) = client else {
            return Err(LdapError::ClientClosed);
        };

        match pool {
            Some(pool) => match pool.relinquish(client) {
                None => Ok(()),
                Some(mut refused) => {
                    let _slot = SlotRelease::new(&*pool);
                    refused.close().await
                }
            },
            None => client.close().await,
        }
    }

    fn is_closing(&self) -> bool {
        self.client.as_ref().map_or(true, |client| client.is_closing())
    }
}

impl<C: DirectoryClient> Drop for PooledClient<C> {
    fn drop(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };

        tracing::debug!("Pooled LDAP client dropped without close, releasing");

        match self.pool.take() {
            Some(pool) => {
                if let Some(refused) = pool.relinquish(client) {
                    close_in_background(refused, Some(pool));
                }
            }
            None => close_in_background(client, None),
        }
    }
}

/// Closes a connection from a synchronous context.
fn close_in_background<C: DirectoryClient>(mut client: C, pool: Option<Arc<dyn Relinquish<C>>>) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                let _slot = pool.as_deref().map(|pool| SlotRelease::new(pool));
                if let Err(e) = client.close().await {
                    tracing::debug!(error = %e, "Failed to close released LDAP connection");
                }
            });
        }
        Err(_) => {
            drop(client);
            if let Some(pool) = pool {
                pool.forget();
            }
        }
    }
}
