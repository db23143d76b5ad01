//! CLI error types.

use authn_ldap::LdapError;
use thiserror::Error;

/// CLI error type.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Directory error.
    #[error(transparent)]
    Ldap(#[from] LdapError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parse error.
    #[error("TOML error: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("TOML error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// The directory rejected the credentials.
    #[error("invalid credentials for '{0}'")]
    InvalidCredentials(String),

    /// Some acquisitions of a check failed.
    #[error("{failed} of {total} connection acquisitions failed")]
    CheckFailed {
        /// Failed acquisitions.
        failed: usize,
        /// Attempted acquisitions.
        total: usize,
    },
}

/// CLI result type.
pub type CliResult<T> = Result<T, CliError>;
