//! End-of-run summary table

use colored::Colorize;
use tracing::info;

use crate::models::RunStats;

const NETWORK_ERROR: &str = "Network Error";

/// One row of the status code table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeRow {
    pub label: String,
    pub count: u64,
    pub success: bool,
}

/// Status codes plus the network error bucket, most frequent first
pub fn summary_rows(stats: &RunStats) -> Vec<CodeRow> {
    let mut rows: Vec<CodeRow> = stats
        .codes_by_count()
        .into_iter()
        .map(|(code, count)| CodeRow {
            label: code.to_string(),
            count,
            success: (200..400).contains(&code),
        })
        .collect();

    if stats.errors > 0 {
        rows.push(CodeRow {
            label: NETWORK_ERROR.to_string(),
            count: stats.errors,
            success: false,
        });
    }

    // Stable sort keeps code order among equal counts
    rows.sort_by(|a, b| b.count.cmp(&a.count));
    rows
}

/// Render the summary as colored text
pub fn render_summary(stats: &RunStats) -> String {
    let mut out = String::new();

    out.push_str(&format!("\n{}\n", "Session Summary".bold()));
    out.push_str(&format!("{:<20} {:>10}\n", "Metric", "Value"));
    out.push_str(&format!("{:<20} {:>10}\n", "Total Requests", stats.total));
    out.push_str(&format!(
        "{:<20} {}\n",
        "Success (2xx/3xx)",
        format!("{:>10}", stats.success).green()
    ));
    out.push_str(&format!(
        "{:<20} {}\n",
        "Failed (4xx/5xx)",
        format!("{:>10}", stats.failed).red()
    ));

    let rows = summary_rows(stats);
    if !rows.is_empty() {
        out.push_str(&format!("\n{}\n", "Status Codes".bold()));
        out.push_str(&format!("{:<20} {:>10}\n", "Code", "Count"));
        for row in rows {
            let label = format!("{:<20}", row.label);
            let label = if row.success { label.green() } else { label.red() };
            out.push_str(&format!("{} {:>10}\n", label, row.count));
        }
    }
    out
}

/// Print the table and log the totals as one JSON line
pub fn print_summary(stats: &RunStats) {
    println!("{}", render_summary(stats));
    match serde_json::to_string(stats) {
        Ok(json) => info!(summary = %json, "Run summary"),
        Err(e) => info!("Run summary unavailable: {}", e),
    }
}
