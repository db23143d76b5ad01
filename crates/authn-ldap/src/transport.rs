//! `ldap3` transport adapter.
//!
//! ## Security Requirements
//!
//! - Certificate verification is on unless `tls.skip_verify` is set
//! - StartTLS is negotiated by `ldap3` while connecting, before any bind
//! - Credentials are never logged

use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings};
use native_tls::{Protocol, TlsConnector};
use tokio::task::JoinHandle;
use url::Url;

use crate::client::{DialOptions, Dialer, DirectoryClient};
use crate::config::{TlsConfig, TlsVersion};
use crate::error::{LdapError, LdapResult};

/// Dials directory servers with `ldap3`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ldap3Dialer;

#[async_trait]
impl Dialer for Ldap3Dialer {
    type Client = Ldap3Client;

    async fn dial(&self, address: &str, options: &DialOptions) -> LdapResult<Ldap3Client> {
        if server_name_mismatch(address, options) {
            tracing::warn!(
                address,
                server_name = options.tls.server_name.as_deref().unwrap_or_default(),
                "TLS server_name differs from the address host, the certificate is verified against the address host"
            );
        }

        let connector = tls_connector(&options.tls)?;
        let settings = LdapConnSettings::new()
            .set_conn_timeout(options.timeout)
            .set_starttls(options.start_tls)
            .set_no_tls_verify(options.tls.skip_verify)
            .set_connector(connector);

        let (conn, ldap) = LdapConnAsync::with_settings(settings, address)
            .await
            .map_err(|e| LdapError::dial(address, e.to_string()))?;

        // The driver ends when the connection is closed or broken.
        let driver = tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                tracing::warn!(error = %e, "LDAP connection driver error");
            }
        });

        tracing::debug!(address, start_tls = options.start_tls, "Dialed LDAP server");

        Ok(Ldap3Client {
            ldap,
            driver,
            start_tls: options.start_tls,
            closed: false,
        })
    }
}

/// Directory connection backed by `ldap3`.
pub struct Ldap3Client {
    ldap: Ldap,
    driver: JoinHandle<()>,
    start_tls: bool,
    closed: bool,
}

impl std::fmt::Debug for Ldap3Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ldap3Client")
            .field("start_tls", &self.start_tls)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl Ldap3Client {
    /// Returns a reference to the LDAP handle.
    #[must_use]
    pub fn ldap(&self) -> &Ldap {
        &self.ldap
    }

    /// Returns a mutable reference to the LDAP handle for protocol operations.
    #[must_use]
    pub fn ldap_mut(&mut self) -> &mut Ldap {
        &mut self.ldap
    }
}

#[async_trait]
impl DirectoryClient for Ldap3Client {
    async fn start_tls(&mut self, _tls: &TlsConfig) -> LdapResult<()> {
        // ldap3 cannot upgrade an established connection in place.
        if self.start_tls {
            Ok(())
        } else {
            Err(LdapError::StartTls(
                "connection was not dialed with start_tls enabled".to_string(),
            ))
        }
    }

    async fn bind(&mut self, principal: &str, credential: &str) -> LdapResult<()> {
        let result = self
            .ldap
            .simple_bind(principal, credential)
            .await
            .map_err(|e| LdapError::bind(principal, None, e.to_string()))?;

        if result.rc != 0 {
            return Err(LdapError::bind(principal, Some(result.rc), result.text));
        }

        Ok(())
    }

    async fn unauthenticated_bind(&mut self, principal: &str) -> LdapResult<()> {
        self.bind(principal, "").await
    }

    async fn close(&mut self) -> LdapResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if self.driver.is_finished() {
            return Ok(());
        }

        self.ldap
            .unbind()
            .await
            .map_err(|e| LdapError::Close(e.to_string()))
    }

    fn is_closing(&self) -> bool {
        self.closed || self.driver.is_finished()
    }
}

/// Whether TLS is negotiated for `address` with a server name other than
/// its host. ldap3 always verifies against the host.
fn server_name_mismatch(address: &str, options: &DialOptions) -> bool {
    let Some(server_name) = options.tls.server_name.as_deref() else {
        return false;
    };
    let Ok(url) = Url::parse(address) else {
        return false;
    };

    let tls = options.start_tls || url.scheme().eq_ignore_ascii_case("ldaps");
    tls && url
        .host_str()
        .map_or(false, |host| !host.eq_ignore_ascii_case(server_name))
}

fn tls_connector(tls: &TlsConfig) -> LdapResult<TlsConnector> {
    let minimum = match tls.minimum_version {
        Some(TlsVersion::Tls13) => {
            return Err(LdapError::config(
                "tls minimum_version TLS1.3 is not supported by the native TLS transport",
            ));
        }
        Some(version) => native_protocol(version),
        None => None,
    };
    let maximum = tls.maximum_version.and_then(native_protocol);

    TlsConnector::builder()
        .min_protocol_version(minimum)
        .max_protocol_version(maximum)
        .danger_accept_invalid_certs(tls.skip_verify)
        .build()
        .map_err(|e| LdapError::config(format!("invalid tls configuration: {e}")))
}

/// Maps a version onto a native-tls bound. TLS 1.3 has no explicit bound
/// and is treated as "no maximum".
const fn native_protocol(version: TlsVersion) -> Option<Protocol> {
    match version {
        TlsVersion::Tls10 => Some(Protocol::Tlsv10),
        TlsVersion::Tls11 => Some(Protocol::Tlsv11),
        TlsVersion::Tls12 => Some(Protocol::Tlsv12),
        TlsVersion::Tls13 => None,
    }
}
