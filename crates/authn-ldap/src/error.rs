//! LDAP connection error types.
//!
//! ## Security Note
//!
//! Error messages must not leak sensitive information like
//! passwords or bind credentials. Principals (DNs) may appear.

use thiserror::Error;

/// LDAP result code returned by a server for a bad principal/credential pair.
pub const RESULT_CODE_INVALID_CREDENTIALS: u32 = 49;

/// Errors produced while supplying directory connections.
#[derive(Debug, Error)]
pub enum LdapError {
    /// Invalid configuration.
    #[error("LDAP configuration error: {0}")]
    Configuration(String),

    /// Transport could not be established.
    #[error("error occurred dialing address '{address}': {reason}")]
    Dial {
        /// Address that was dialed.
        address: String,
        /// Transport failure description.
        reason: String,
    },

    /// StartTLS upgrade failed on an established transport.
    #[error("error occurred performing starttls: {0}")]
    StartTls(String),

    /// Bind (authentication) failed.
    #[error("error occurred performing bind for '{principal}': {reason}")]
    Bind {
        /// Principal used for the bind.
        principal: String,
        /// LDAP result code, when the server answered.
        result_code: Option<u32>,
        /// Failure description.
        reason: String,
    },

    /// Closing a connection failed.
    #[error("error occurred closing connection: {0}")]
    Close(String),

    /// No connection could be established while initializing the pool.
    #[error("errors occurred initializing the client pool: no connections could be established")]
    PoolExhausted,

    /// The pool has already reached its capacity.
    #[error("error occurred establishing new client for the pool: pool is already the maximum size")]
    PoolFull,

    /// The pool has been shut down.
    #[error("error acquiring client: the pool is closed")]
    PoolClosed,

    /// No connection became available before the acquisition deadline.
    #[error("error acquiring client: timed out after {timeout:?}")]
    Timeout {
        /// Configured acquisition timeout.
        timeout: std::time::Duration,
        /// Deadline that elapsed.
        #[source]
        source: tokio::time::error::Elapsed,
    },

    /// Replacing a stale connection failed on every retry.
    #[error("error acquiring client: failed to replace stale connection after {attempts} attempts")]
    PoolAcquisition {
        /// Number of creation attempts made.
        attempts: usize,
        /// Error from the final attempt.
        #[source]
        source: Box<LdapError>,
    },

    /// The client handle was already closed and can no longer be used.
    #[error("LDAP client is closed")]
    ClientClosed,
}

impl LdapError {
    /// Creates a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Creates a dial error.
    #[must_use]
    pub fn dial(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Dial {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Creates a bind error.
    #[must_use]
    pub fn bind(
        principal: impl Into<String>,
        result_code: Option<u32>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Bind {
            principal: principal.into(),
            result_code,
            reason: reason.into(),
        }
    }

    /// Checks if this is a connection-related error.
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Dial { .. }
                | Self::StartTls(_)
                | Self::Timeout { .. }
                | Self::PoolExhausted
                | Self::PoolAcquisition { .. }
        )
    }

    /// Checks if this is a security-related error.
    #[must_use]
    pub const fn is_security_error(&self) -> bool {
        matches!(self, Self::StartTls(_) | Self::Bind { .. })
    }

    /// Checks if the bind was rejected because of bad credentials.
    #[must_use]
    pub const fn is_invalid_credentials(&self) -> bool {
        matches!(
            self,
            Self::Bind {
                result_code: Some(RESULT_CODE_INVALID_CREDENTIALS),
                ..
            }
        )
    }

    /// Checks if a caller may sensibly retry the operation later.
    ///
    /// Terminal pool states and authentication failures are not retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Dial { .. } | Self::Timeout { .. } | Self::PoolAcquisition { .. } | Self::PoolFull
        )
    }
}

/// Result type for LDAP operations.
pub type LdapResult<T> = Result<T, LdapError>;
