//! Client factories.
//!
//! A factory produces authenticated directory clients. The standard factory
//! dials, optionally upgrades with StartTLS and binds on every call; the
//! [`ConnectionPool`] decorates any factory with pooling.

use std::borrow::Cow;

use async_trait::async_trait;

use crate::client::{DialOptions, Dialer, DirectoryClient};
use crate::config::LdapConfig;
use crate::error::{LdapError, LdapResult};
use crate::pool::{ConnectionPool, PoolConfig};
use crate::pooled::PooledClient;
use crate::transport::Ldap3Dialer;

// ============================================================================
// Client Factory
// ============================================================================

/// Per-call overrides of a factory's static configuration.
///
/// Supplying options bypasses pooling.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientOptions {
    /// Address to dial instead of the configured one.
    pub address: Option<String>,
    /// Principal to bind as.
    pub principal: Option<String>,
    /// Credential for the bind.
    pub credential: Option<String>,
}

impl ClientOptions {
    /// Creates empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the address.
    #[must_use]
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Overrides the principal.
    #[must_use]
    pub fn principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    /// Overrides the credential.
    #[must_use]
    pub fn credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }
}

/// Produces authenticated directory clients.
#[async_trait]
pub trait ClientFactory: Send + Sync + 'static {
    /// Client type handed to callers.
    type Client: DirectoryClient;

    /// Prepares the factory for use.
    async fn initialize(&self) -> LdapResult<()>;

    /// Returns an authenticated client.
    ///
    /// `None` takes the common path; `Some` applies per-call overrides.
    async fn get_client(&self, options: Option<ClientOptions>) -> LdapResult<Self::Client>;

    /// Releases every resource held by the factory.
    async fn shutdown(&self) -> LdapResult<()>;
}

// ============================================================================
// Standard Factory
// ============================================================================

/// Factory that establishes a new connection on every call.
pub struct StandardClientFactory<D: Dialer = Ldap3Dialer> {
    address: String,
    user: String,
    password: String,
    options: DialOptions,
    dialer: D,
}

impl StandardClientFactory<Ldap3Dialer> {
    /// Creates a factory that dials with `ldap3`.
    #[must_use]
    pub fn ldap3(config: &LdapConfig) -> Self {
        Self::new(config, Ldap3Dialer)
    }
}

impl<D: Dialer> StandardClientFactory<D> {
    /// Creates a factory using the given dialer.
    #[must_use]
    pub fn new(config: &LdapConfig, dialer: D) -> Self {
        Self {
            address: config.address.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
            options: config.dial_options(),
            dialer,
        }
    }

    /// Returns the configured address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl<D: Dialer> ClientFactory for StandardClientFactory<D> {
    type Client = D::Client;

    async fn initialize(&self) -> LdapResult<()> {
        Ok(())
    }

    async fn get_client(&self, options: Option<ClientOptions>) -> LdapResult<D::Client> {
        let options = options.unwrap_or_default();
        let principal = options.principal.unwrap_or_else(|| self.user.clone());
        let credential = options.credential.unwrap_or_else(|| self.password.clone());

        // The configured server name belongs to the configured address; an
        // overriding address is verified against its own host.
        let (address, dial_options) = match options.address {
            Some(address) if address != self.address => {
                (address, Cow::Owned(self.options.for_other_address()))
            }
            _ => (self.address.clone(), Cow::Borrowed(&self.options)),
        };

        let mut client = self.dialer.dial(&address, &dial_options).await?;

        if self.options.start_tls {
            if let Err(e) = client.start_tls(&self.options.tls).await {
                let _ = client.close().await;
                return Err(match e {
                    LdapError::StartTls(_) => e,
                    other => LdapError::StartTls(other.to_string()),
                });
            }
        }

        let bound = if credential.is_empty() {
            client.unauthenticated_bind(&principal).await
        } else {
            client.bind(&principal, &credential).await
        };

        if let Err(e) = bound {
            let _ = client.close().await;
            return Err(match e {
                LdapError::Bind { .. } => e,
                other => LdapError::bind(&principal, None, other.to_string()),
            });
        }

        tracing::debug!(address = %address, principal = %principal, "Established LDAP client");

        Ok(client)
    }

    async fn shutdown(&self) -> LdapResult<()> {
        Ok(())
    }
}

// ============================================================================
// Configured Factory
// ============================================================================

/// Factory selected from configuration: pooled when pooling is enabled.
pub enum LdapClientFactory<D: Dialer = Ldap3Dialer> {
    /// Establishes a new connection per call.
    Standard(StandardClientFactory<D>),
    /// Pools connections.
    Pooled(ConnectionPool<StandardClientFactory<D>>),
}

/// Builds the factory described by `config`.
#[must_use]
pub fn build_factory<D: Dialer>(config: &LdapConfig, dialer: D) -> LdapClientFactory<D> {
    let standard = StandardClientFactory::new(config, dialer);

    if config.pooling.enable {
        let pool_config = PoolConfig::from(&config.pooling);
        tracing::info!(
            count = pool_config.count,
            retries = pool_config.retries,
            timeout_ms = u64::try_from(pool_config.timeout.as_millis()).unwrap_or(u64::MAX),
            "LDAP connection pooling enabled"
        );
        LdapClientFactory::Pooled(ConnectionPool::new(standard, pool_config))
    } else {
        LdapClientFactory::Standard(standard)
    }
}

impl<D: Dialer> LdapClientFactory<D> {
    /// Returns the pool when pooling is enabled.
    #[must_use]
    pub fn pool(&self) -> Option<&ConnectionPool<StandardClientFactory<D>>> {
        match self {
            Self::Standard(_) => None,
            Self::Pooled(pool) => Some(pool),
        }
    }
}

#[async_trait]
impl<D: Dialer> ClientFactory for LdapClientFactory<D> {
    type Client = PooledClient<D::Client>;

    async fn initialize(&self) -> LdapResult<()> {
        match self {
            Self::Standard(factory) => factory.initialize().await,
            Self::Pooled(pool) => pool.initialize().await,
        }
    }

    async fn get_client(&self, options: Option<ClientOptions>) -> LdapResult<Self::Client> {
        match self {
            Self::Standard(factory) => factory
                .get_client(options)
                .await
                .map(PooledClient::detached),
            Self::Pooled(pool) => pool.get_client(options).await,
        }
    }

    async fn shutdown(&self) -> LdapResult<()> {
        match self {
            Self::Standard(factory) => factory.shutdown().await,
            Self::Pooled(pool) => pool.shutdown().await,
        }
    }
}
