//! User password verification.

use authn_ldap::{build_factory, Dialer, DirectoryAuthenticator, LdapConfig};

use crate::cli::OutputFormat;
use crate::output::{prompt_password, success};
use crate::{CliError, CliResult};

/// Verifies `password` for `dn`.
///
/// Returns `Ok(false)` when the directory rejects the credentials.
pub async fn verify<D: Dialer>(
    config: &LdapConfig,
    dialer: D,
    dn: &str,
    password: &str,
) -> CliResult<bool> {
    let authenticator = DirectoryAuthenticator::new(build_factory(config, dialer));
    let valid = authenticator.check_user_password(dn, password).await;
    authenticator.shutdown().await?;
    Ok(valid?)
}

/// Runs the bind command.
pub async fn run_bind<D: Dialer>(
    config: &LdapConfig,
    dialer: D,
    dn: &str,
    password: Option<String>,
    format: OutputFormat,
) -> CliResult<()> {
    let password = match password {
        Some(password) => password,
        None => prompt_password(&format!("Password for {dn}: "))?,
    };

    if !verify(config, dialer, dn, &password).await? {
        return Err(CliError::InvalidCredentials(dn.to_string()));
    }

    if format != OutputFormat::Quiet {
        success(&format!("Credentials for {dn} are valid"));
    }

    Ok(())
}
