//! # authn-ldap
//!
//! Command-line tool for the LDAP authentication backend.

#![forbid(unsafe_code)]
#![deny(warnings)]

use authn_cli::{
    cli::{Cli, Command},
    commands::{run_bind, run_check, run_config},
    load_config,
    output::error,
};
use anyhow::Context;
use authn_ldap::Ldap3Dialer;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config(cli.config.as_deref()).context("failed to load configuration")?;

    let result = match cli.command {
        Command::Check { concurrency } => {
            run_check(&config, Ldap3Dialer, concurrency, cli.output).await
        }
        Command::Bind { dn, password } => {
            run_bind(&config, Ldap3Dialer, &dn, password, cli.output).await
        }
        Command::Config => run_config(&config, cli.output),
    };

    if let Err(e) = result {
        error(&e.to_string());
        std::process::exit(1);
    }

    Ok(())
}
