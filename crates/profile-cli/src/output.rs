//! Output formatting for the CLI.

use clap::ValueEnum;
use profile_sync::ProfileRecord;
use serde::Serialize;

/// Output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Print a serializable value as pretty JSON.
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a success message.
pub fn print_success(message: &str, format: &OutputFormat) {
    match format {
        OutputFormat::Text => println!("{}", message),
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({ "status": "success", "message": message })
            );
        }
    }
}

/// Print an error message.
pub fn print_error(message: &str, format: &OutputFormat) {
    match format {
        OutputFormat::Text => eprintln!("Error: {}", message),
        OutputFormat::Json => {
            eprintln!(
                "{}",
                serde_json::json!({ "status": "error", "message": message })
            );
        }
    }
}

/// Print a table row.
pub fn print_row(label: &str, value: &str) {
    println!("  {:<16} {}", format!("{}:", label), value);
}

/// Print a divider line.
pub fn print_divider() {
    println!("{}", "-".repeat(50));
}

/// Print a heading.
pub fn print_heading(text: &str) {
    println!("\n{}", text);
    print_divider();
}

/// Rows shown for a profile, in display order. Unset fields show as `-`.
pub fn profile_rows(record: &ProfileRecord) -> Vec<(&'static str, String)> {
    fn text(value: &Option<String>) -> String {
        value.clone().unwrap_or_else(|| "-".to_string())
    }
    fn count(value: Option<i64>) -> String {
        value.map_or_else(|| "-".to_string(), |n| n.to_string())
    }

    vec![
        ("GitHub ID", record.external_id.to_string()),
        ("Username", text(&record.username)),
        ("Name", text(&record.name)),
        ("Email", text(&record.email)),
        ("Bio", text(&record.bio)),
        ("Company", text(&record.company)),
        ("Location", text(&record.location)),
        ("Blog", text(&record.blog)),
        ("Twitter", text(&record.twitter_username)),
        ("Public repos", count(record.public_repos)),
        ("Followers", count(record.followers)),
        ("Following", count(record.following)),
        (
            "Last login",
            record
                .last_login
                .map_or_else(|| "-".to_string(), |t| t.to_rfc3339()),
        ),
        (
            "Member since",
            record
                .created_at
                .map_or_else(|| "-".to_string(), |t| t.to_rfc3339()),
        ),
    ]
}

/// Print the dashboard view of a profile.
pub fn print_profile(record: &ProfileRecord, format: &OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Text => {
            print_heading("GitHub profile");
            for (label, value) in profile_rows(record) {
                print_row(label, &value);
            }
            Ok(())
        }
        OutputFormat::Json => print_json(record),
    }
}
