//! Output formatting utilities

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print a table from a list of rows
pub fn print_table<T: Tabled>(items: &[T], empty: &str) {
    if items.is_empty() {
        println!("{}", empty.yellow());
        return;
    }
    let table = Table::new(items).with(Style::rounded()).to_string();
    println!("{}", table);
}

/// Print any serializable value as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format a utilization percentage
pub fn format_percent(value: f64) -> String {
    format!("{:.1}%", value)
}

/// Color utilization against the admission and rebalance thresholds
pub fn color_utilization(value: f64, rebalance: f64, admission: f64) -> String {
    let formatted = format_percent(value);
    if value >= admission {
        formatted.red().to_string()
    } else if value > rebalance {
        formatted.yellow().to_string()
    } else {
        formatted.green().to_string()
    }
}

/// Seconds elapsed since `at`, e.g. `12s ago`
pub fn format_age(at: Option<DateTime<Utc>>) -> String {
    match at {
        Some(at) => {
            let secs = (Utc::now() - at).num_seconds().max(0);
            if secs >= 3600 {
                format!("{}h ago", secs / 3600)
            } else if secs >= 60 {
                format!("{}m ago", secs / 60)
            } else {
                format!("{}s ago", secs)
            }
        }
        None => "-".to_string(),
    }
}

/// Color status based on value
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "running" | "active" | "patched" => status.green().to_string(),
        "pending" | "unchanged" => status.yellow().to_string(),
        "failed" | "unknown" | "inactive" => status.red().to_string(),
        _ => status.to_string(),
    }
}
