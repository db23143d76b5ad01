//! LDAP backend configuration.
//!
//! ## Security Requirements
//!
//! - `ldap://` addresses transmit the bind credential in cleartext unless
//!   `start_tls` is enabled; a warning is logged for that combination.
//! - `start_tls` combined with `ldaps://` is rejected (TLS is already
//!   negotiated at connection start).
//! - The bind credential is never serialized.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::client::DialOptions;
use crate::error::{LdapError, LdapResult};

/// Default dial timeout.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of pooled connections.
pub const DEFAULT_POOL_COUNT: usize = 5;

/// Default number of stale-connection replacement attempts.
pub const DEFAULT_POOL_RETRIES: usize = 2;

/// Default pool acquisition timeout.
pub const DEFAULT_POOL_TIMEOUT: Duration = Duration::from_secs(10);

/// Prefix of the environment variables read by [`LdapConfig::from_env`].
pub const ENV_PREFIX: &str = "AUTHN_LDAP_";

// ============================================================================
// Address Scheme
// ============================================================================

/// Transport scheme of a directory address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressScheme {
    /// Plain TCP, optionally upgraded with StartTLS.
    Ldap,
    /// TLS from connection start.
    Ldaps,
    /// Unix domain socket.
    Ldapi,
}

impl AddressScheme {
    /// Returns the URL scheme string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ldap => "ldap",
            Self::Ldaps => "ldaps",
            Self::Ldapi => "ldapi",
        }
    }
}

impl FromStr for AddressScheme {
    type Err = LdapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ldap" => Ok(Self::Ldap),
            "ldaps" => Ok(Self::Ldaps),
            "ldapi" => Ok(Self::Ldapi),
            other => Err(LdapError::config(format!(
                "address scheme '{other}' is not supported, must be one of 'ldap', 'ldaps' or 'ldapi'"
            ))),
        }
    }
}

// ============================================================================
// TLS
// ============================================================================

/// TLS protocol versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TlsVersion {
    /// TLS 1.0.
    #[serde(rename = "TLS1.0")]
    Tls10,
    /// TLS 1.1.
    #[serde(rename = "TLS1.1")]
    Tls11,
    /// TLS 1.2.
    #[serde(rename = "TLS1.2")]
    Tls12,
    /// TLS 1.3.
    #[serde(rename = "TLS1.3")]
    Tls13,
}

impl fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Tls10 => "TLS1.0",
            Self::Tls11 => "TLS1.1",
            Self::Tls12 => "TLS1.2",
            Self::Tls13 => "TLS1.3",
        };
        f.write_str(s)
    }
}

impl FromStr for TlsVersion {
    type Err = LdapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace(' ', "").as_str() {
            "TLS1.0" => Ok(Self::Tls10),
            "TLS1.1" => Ok(Self::Tls11),
            "TLS1.2" => Ok(Self::Tls12),
            "TLS1.3" => Ok(Self::Tls13),
            _ => Err(LdapError::config(format!("unknown TLS version '{s}'"))),
        }
    }
}

/// TLS settings used for `ldaps://` and StartTLS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Lowest protocol version accepted.
    pub minimum_version: Option<TlsVersion>,

    /// Highest protocol version accepted.
    pub maximum_version: Option<TlsVersion>,

    /// Disables certificate verification.
    /// Must never be enabled in production.
    pub skip_verify: bool,

    /// Expected name on the server certificate. Defaults to the address
    /// host. Certificates are verified against the dialed host; a differing
    /// name is reported when TLS is negotiated.
    pub server_name: Option<String>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            minimum_version: Some(TlsVersion::Tls12),
            maximum_version: None,
            skip_verify: false,
            server_name: None,
        }
    }
}

// ============================================================================
// Pooling
// ============================================================================

/// Connection pooling settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolingConfig {
    /// Whether connections are pooled.
    pub enable: bool,

    /// Number of connections kept by the pool.
    pub count: usize,

    /// Attempts made to replace a stale connection.
    pub retries: usize,

    /// How long an acquisition may wait for a free connection.
    pub timeout: Duration,
}

impl Default for PoolingConfig {
    fn default() -> Self {
        Self {
            enable: false,
            count: DEFAULT_POOL_COUNT,
            retries: DEFAULT_POOL_RETRIES,
            timeout: DEFAULT_POOL_TIMEOUT,
        }
    }
}

// ============================================================================
// LDAP Configuration
// ============================================================================

/// LDAP backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LdapConfig {
    /// Directory address, e.g. `ldaps://ldap.example.com:636`.
    pub address: String,

    /// Principal (DN) used for the service bind.
    #[serde(default)]
    pub user: String,

    /// Credential for the service bind. An empty credential
    /// results in an unauthenticated bind.
    #[serde(default, skip_serializing)]
    pub password: String,

    /// Dial timeout.
    #[serde(default = "default_dial_timeout")]
    pub timeout: Duration,

    /// Upgrade `ldap://` connections with StartTLS before binding.
    #[serde(default)]
    pub start_tls: bool,

    /// TLS settings.
    #[serde(default)]
    pub tls: TlsConfig,

    /// Pooling settings.
    #[serde(default)]
    pub pooling: PoolingConfig,
}

const fn default_dial_timeout() -> Duration {
    DEFAULT_DIAL_TIMEOUT
}

impl LdapConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> LdapConfigBuilder {
        LdapConfigBuilder::new()
    }

    /// Loads the configuration from `AUTHN_LDAP_*` environment variables.
    ///
    /// A `.env` file in the working directory is honoured if present.
    ///
    /// ## Errors
    ///
    /// Returns an error if `AUTHN_LDAP_ADDRESS` is missing, a value cannot be
    /// parsed, or validation fails.
    pub fn from_env() -> LdapResult<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the configuration through an arbitrary key lookup.
    ///
    /// Keys are the variable names without [`ENV_PREFIX`], e.g. `ADDRESS`.
    ///
    /// ## Errors
    ///
    /// Same as [`LdapConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> LdapResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(&format!("{ENV_PREFIX}{key}"));

        let address = get("ADDRESS")
            .ok_or_else(|| LdapError::config(format!("{ENV_PREFIX}ADDRESS is required")))?;

        let mut builder = Self::builder()
            .address(address)
            .user(get("USER").unwrap_or_default())
            .password(get("PASSWORD").unwrap_or_default());

        if let Some(secs) = get("TIMEOUT") {
            builder = builder.timeout(Duration::from_secs(parse_value("TIMEOUT", &secs)?));
        }
        if let Some(v) = get("START_TLS") {
            builder = builder.start_tls(parse_bool(&v));
        }
        if let Some(v) = get("TLS_SKIP_VERIFY") {
            builder = builder.tls_skip_verify(parse_bool(&v));
        }
        if let Some(v) = get("TLS_SERVER_NAME") {
            builder = builder.tls_server_name(v);
        }
        if let Some(v) = get("TLS_MINIMUM_VERSION") {
            builder = builder.tls_minimum_version(Some(v.parse()?));
        }
        if let Some(v) = get("TLS_MAXIMUM_VERSION") {
            builder = builder.tls_maximum_version(Some(v.parse()?));
        }

        let mut pooling = PoolingConfig::default();
        if let Some(v) = get("POOLING_ENABLE") {
            pooling.enable = parse_bool(&v);
        }
        if let Some(v) = get("POOLING_COUNT") {
            pooling.count = parse_value("POOLING_COUNT", &v)?;
        }
        if let Some(v) = get("POOLING_RETRIES") {
            pooling.retries = parse_value("POOLING_RETRIES", &v)?;
        }
        if let Some(v) = get("POOLING_TIMEOUT") {
            pooling.timeout = Duration::from_secs(parse_value("POOLING_TIMEOUT", &v)?);
        }

        builder.pooling(pooling).build()
    }

    /// Fills in derived defaults and validates the configuration.
    ///
    /// Use this for configurations that were deserialized rather than built.
    ///
    /// ## Errors
    ///
    /// Returns an error if validation fails.
    pub fn prepare(mut self) -> LdapResult<Self> {
        if self.tls.server_name.is_none() {
            self.tls.server_name = self.host()?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> LdapResult<()> {
        if self.address.trim().is_empty() {
            return Err(LdapError::config("address cannot be empty"));
        }

        let scheme = self.scheme()?;
        if scheme != AddressScheme::Ldapi && self.host()?.is_none() {
            return Err(LdapError::config(format!(
                "address '{}' does not contain a host",
                self.address
            )));
        }

        if self.start_tls && scheme == AddressScheme::Ldaps {
            return Err(LdapError::config(
                "start_tls cannot be used with an ldaps:// address",
            ));
        }

        if let (Some(min), Some(max)) = (self.tls.minimum_version, self.tls.maximum_version) {
            if min > max {
                return Err(LdapError::config(format!(
                    "tls minimum_version {min} is greater than maximum_version {max}"
                )));
            }
        }

        if self.password.is_empty() && self.user.is_empty() && scheme != AddressScheme::Ldapi {
            tracing::debug!(address = %self.address, "No bind principal configured, anonymous bind will be used");
        }

        if scheme == AddressScheme::Ldap && !self.start_tls && !self.password.is_empty() {
            tracing::warn!(
                address = %self.address,
                "Bind credential will be sent over an unencrypted connection, consider ldaps:// or start_tls"
            );
        }

        Ok(())
    }

    /// Returns the scheme of the address.
    pub fn scheme(&self) -> LdapResult<AddressScheme> {
        self.parse_address()?.scheme().parse()
    }

    /// Returns the host of the address, if it has one.
    pub fn host(&self) -> LdapResult<Option<String>> {
        Ok(self.parse_address()?.host_str().map(str::to_string))
    }

    /// Returns the options used to dial the directory.
    #[must_use]
    pub fn dial_options(&self) -> DialOptions {
        DialOptions {
            timeout: self.timeout,
            start_tls: self.start_tls,
            tls: self.tls.clone(),
        }
    }

    fn parse_address(&self) -> LdapResult<Url> {
        Url::parse(&self.address)
            .map_err(|e| LdapError::config(format!("invalid address '{}': {e}", self.address)))
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> LdapResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| LdapError::config(format!("{ENV_PREFIX}{key} has an invalid value '{value}'")))
}

// ============================================================================
// Configuration Builder
// ============================================================================

/// Builder for LDAP configuration.
#[derive(Debug, Default)]
pub struct LdapConfigBuilder {
    address: Option<String>,
    user: String,
    password: String,
    timeout: Duration,
    start_tls: bool,
    tls: TlsConfig,
    pooling: PoolingConfig,
}

impl LdapConfigBuilder {
    /// Creates a new builder with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_DIAL_TIMEOUT,
            ..Default::default()
        }
    }

    /// Sets the directory address.
    #[must_use]
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Sets the bind principal.
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Sets the bind credential.
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    /// Sets the dial timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enables StartTLS.
    #[must_use]
    pub const fn start_tls(mut self, enabled: bool) -> Self {
        self.start_tls = enabled;
        self
    }

    /// Sets whether certificate verification is skipped.
    #[must_use]
    pub const fn tls_skip_verify(mut self, skip: bool) -> Self {
        self.tls.skip_verify = skip;
        self
    }

    /// Sets the TLS server name.
    #[must_use]
    pub fn tls_server_name(mut self, name: impl Into<String>) -> Self {
        self.tls.server_name = Some(name.into());
        self
    }

    /// Sets the minimum TLS version.
    #[must_use]
    pub const fn tls_minimum_version(mut self, version: Option<TlsVersion>) -> Self {
        self.tls.minimum_version = version;
        self
    }

    /// Sets the maximum TLS version.
    #[must_use]
    pub const fn tls_maximum_version(mut self, version: Option<TlsVersion>) -> Self {
        self.tls.maximum_version = version;
        self
    }

    /// Sets the pooling configuration.
    #[must_use]
    pub fn pooling(mut self, pooling: PoolingConfig) -> Self {
        self.pooling = pooling;
        self
    }

    /// Enables pooling with the given size, retries and acquisition timeout.
    #[must_use]
    pub const fn pool(mut self, count: usize, retries: usize, timeout: Duration) -> Self {
        self.pooling = PoolingConfig {
            enable: true,
            count,
            retries,
            timeout,
        };
        self
    }

    /// Builds and validates the configuration.
    ///
    /// ## Errors
    ///
    /// Returns an error if the address is missing or validation fails.
    pub fn build(self) -> LdapResult<LdapConfig> {
        let config = LdapConfig {
            address: self
                .address
                .ok_or_else(|| LdapError::config("address is required"))?,
            user: self.user,
            password: self.password,
            timeout: self.timeout,
            start_tls: self.start_tls,
            tls: self.tls,
            pooling: self.pooling,
        };

        config.prepare()
    }
}
