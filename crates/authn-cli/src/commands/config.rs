//! Configuration display.

use authn_ldap::LdapConfig;

use crate::cli::OutputFormat;
use crate::config::render_config;
use crate::output::info;

/// Prints the effective configuration. The bind password is never shown.
pub fn run_config(config: &LdapConfig, format: OutputFormat) -> crate::CliResult<()> {
    match format {
        OutputFormat::Table => {
            info(&format!("Effective configuration for {}", config.address));
            println!();
            print!("{}", render_config(config)?);
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(config)?);
        }
        OutputFormat::Quiet => {}
    }

    Ok(())
}
