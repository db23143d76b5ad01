//! # authn-cli
//!
//! Operator tooling for the LDAP authentication backend.
//!
//! This crate provides command-line utilities for:
//! - Checking that the directory is reachable and the pool fills up
//! - Verifying a user's password by bind
//! - Printing the effective backend configuration

#![forbid(unsafe_code)]
#![deny(warnings)]
#![deny(missing_docs)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod output;

pub use cli::Cli;
pub use config::load_config;
pub use error::{CliError, CliResult};
