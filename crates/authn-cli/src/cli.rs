//! CLI argument parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// LDAP authentication backend tool.
#[derive(Debug, Parser)]
#[command(name = "authn-ldap")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// TOML configuration file. Falls back to `AUTHN_LDAP_*` variables.
    #[arg(short, long, env = "AUTHN_LDAP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format.
    #[arg(short, long, value_enum, default_value = "table")]
    pub output: OutputFormat,

    /// Enable verbose output.
    #[arg(short, long)]
    pub verbose: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,
}

/// Output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON format.
    Json,
    /// Quiet (minimal output).
    Quiet,
}

/// CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Connect, bind and exercise the connection pool.
    Check {
        /// Number of clients acquired in parallel.
        #[arg(long, default_value = "1")]
        concurrency: usize,
    },

    /// Verify a user's password by binding as the user.
    Bind {
        /// Distinguished name of the user.
        #[arg(long)]
        dn: String,

        /// Password. Prompted for when absent.
        #[arg(long, env = "AUTHN_LDAP_CHECK_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Print the effective configuration.
    Config,
}
