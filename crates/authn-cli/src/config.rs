//! Configuration loading.
//!
//! A TOML file named on the command line wins; otherwise the backend is
//! configured from `AUTHN_LDAP_*` environment variables.

use std::path::Path;

use authn_ldap::config::ENV_PREFIX;
use authn_ldap::LdapConfig;

use crate::{CliError, CliResult};

/// Loads the backend configuration.
///
/// The bind password may be left out of the file and supplied through
/// `AUTHN_LDAP_PASSWORD` instead.
pub fn load_config(path: Option<&Path>) -> CliResult<LdapConfig> {
    match path {
        Some(path) => {
            let contents = std::fs::read_to_string(path).map_err(|e| {
                CliError::Config(format!("cannot read {}: {e}", path.display()))
            })?;
            let password = std::env::var(format!("{ENV_PREFIX}PASSWORD")).ok();
            parse_config(&contents, password)
        }
        None => Ok(LdapConfig::from_env()?),
    }
}

/// Parses a TOML configuration, filling in a missing password.
pub fn parse_config(contents: &str, password: Option<String>) -> CliResult<LdapConfig> {
    let mut config: LdapConfig = toml::from_str(contents)?;

    if config.password.is_empty() {
        if let Some(password) = password {
            config.password = password;
        }
    }

    Ok(config.prepare()?)
}

/// Renders a configuration as TOML. The password is never included.
pub fn render_config(config: &LdapConfig) -> CliResult<String> {
    Ok(toml::to_string_pretty(config)?)
}
