//! Output formatting utilities.

use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use crate::cli::OutputFormat;

/// Prints a success message.
pub fn success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Prints an error message.
pub fn error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Prints a warning message.
pub fn warning(message: &str) {
    eprintln!("{} {}", "⚠".yellow().bold(), message);
}

/// Prints an info message.
pub fn info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Outputs rows in the specified format.
pub fn output<T: Tabled + serde::Serialize>(
    data: &[T],
    format: OutputFormat,
) -> crate::CliResult<()> {
    match format {
        OutputFormat::Table => {
            if !data.is_empty() {
                let table = Table::new(data).with(Style::rounded()).to_string();
                println!("{table}");
            }
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(data)?;
            println!("{json}");
        }
        OutputFormat::Quiet => {}
    }
    Ok(())
}

/// Prompts for password input (hidden).
pub fn prompt_password(prompt: &str) -> crate::CliResult<String> {
    Ok(rpassword::prompt_password(prompt)?)
}
