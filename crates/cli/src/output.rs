//! Output formatting utilities

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print a table from a list of items
pub fn print_table<T: Tabled>(items: Vec<T>, empty_message: &str) {
    if items.is_empty() {
        print_warning(empty_message);
        return;
    }
    let table = Table::new(items).with(Style::rounded()).to_string();
    println!("{}", table);
}

/// Print any response as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}

/// Print a section header
pub fn print_header(title: &str) {
    println!("{}", title.bold());
    println!("{}", "=".repeat(60));
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format epoch milliseconds as UTC time
pub fn format_timestamp(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| millis.to_string())
}

/// Format a duration in milliseconds as e.g. `1h 5m`
pub fn format_duration(millis: i64) -> String {
    let secs = millis.max(0) / 1_000;
    let (days, hours, minutes, seconds) = (secs / 86_400, secs % 86_400 / 3_600, secs % 3_600 / 60, secs % 60);
    if days > 0 {
        format!("{}d {}h", days, hours)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Parse a relative period such as `30m`, `1h` or `7d` into milliseconds
pub fn parse_period(period: &str) -> Result<i64> {
    let period = period.trim();
    let split = period
        .find(|c: char| !c.is_ascii_digit())
        .context("Period needs a unit (s, m, h, d)")?;
    let (amount, unit) = period.split_at(split);
    let amount: i64 = amount
        .parse()
        .with_context(|| format!("Invalid period: {}", period))?;
    let unit_ms = match unit {
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        other => anyhow::bail!("Unknown period unit: {}", other),
    };
    Ok(amount.saturating_mul(unit_ms))
}

/// Color status based on value
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "healthy" | "running" | "enabled" | "low" => status.green().to_string(),
        "warning" | "medium" | "starting" | "stopping" => status.yellow().to_string(),
        "critical" | "high" | "stopped" | "disabled" | "failed" => status.red().to_string(),
        _ => status.to_string(),
    }
}

/// Color a 0-100 health score
pub fn color_score(score: f64) -> String {
    let formatted = format!("{:.1}", score);
    if score >= 80.0 {
        formatted.green().to_string()
    } else if score >= 60.0 {
        formatted.yellow().to_string()
    } else {
        formatted.red().to_string()
    }
}

/// Format r² as percentage
pub fn format_confidence(confidence: f64) -> String {
    format!("{:.0}%", confidence * 100.0)
}
