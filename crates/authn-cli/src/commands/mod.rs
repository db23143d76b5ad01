//! Command implementations.

pub mod bind;
pub mod check;
pub mod config;

pub use bind::run_bind;
pub use check::run_check;
pub use config::run_config;
