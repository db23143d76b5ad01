//! # authn-ldap
//!
//! Directory connection supply for the authentication backend.
//!
//! This crate provides:
//! - Client factories that dial, optionally StartTLS, and bind
//! - A bounded connection pool with timeout-bounded acquisition,
//!   stale-connection replacement and drain-on-shutdown
//! - A pooled client decorator that returns its connection on close
//! - Password verification by user bind
//!
//! The LDAP wire protocol itself comes from `ldap3`.

#![forbid(unsafe_code)]
#![deny(warnings)]
#![deny(missing_docs)]

pub mod authenticator;
pub mod client;
pub mod config;
pub mod error;
pub mod factory;
pub mod pool;
pub mod pooled;
pub mod testing;
pub mod transport;

pub use authenticator::DirectoryAuthenticator;
pub use client::{DialOptions, Dialer, DirectoryClient};
pub use config::{LdapConfig, PoolingConfig, TlsConfig, TlsVersion};
pub use error::{LdapError, LdapResult};
pub use factory::{build_factory, ClientFactory, ClientOptions, LdapClientFactory, StandardClientFactory};
pub use pool::{ConnectionPool, PoolConfig, PoolStats};
pub use pooled::PooledClient;
pub use transport::{Ldap3Client, Ldap3Dialer};
