//! Text and JSON rendering for command results.

use clap::ValueEnum;
use serde::Serialize;
use serde_json::json;
use std::fmt::Display;

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Print a report: its `Display` form as text, its `Serialize` form as JSON.
pub fn print<T: Serialize + Display>(report: &T, format: &OutputFormat) {
    match format {
        OutputFormat::Text => print!("{report}"),
        OutputFormat::Json => match serde_json::to_string_pretty(report) {
            Ok(json) => println!("{json}"),
            Err(_) => print!("{report}"),
        },
    }
}

pub fn print_success(message: &str, format: &OutputFormat) {
    match format {
        OutputFormat::Text => println!("{message}"),
        OutputFormat::Json => println!("{}", json!({ "ok": true, "message": message })),
    }
}

/// Errors go to stderr in both formats.
pub fn print_error(message: &str, format: &OutputFormat) {
    match format {
        OutputFormat::Text => eprintln!("Error: {message}"),
        OutputFormat::Json => eprintln!("{}", json!({ "ok": false, "error": message })),
    }
}

/// One aligned `label: value` line of a status block.
pub fn row(label: &str, value: &str) -> String {
    format!("  {:<16} {value}", format!("{label}:"))
}
