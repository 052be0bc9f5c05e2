//! Markdown rendering of the history log.

use netgauge_core::units::{format_latency, format_speed};
use netgauge_core::ResultRecord;

/// Placeholder for metrics that were not measured.
const ABSENT: &str = "unavailable";

/// Generate a markdown table of the `limit` most recent records.
pub fn generate_summary(records: &[ResultRecord], limit: usize) -> String {
    let mut output = String::new();

    output.push_str("# Speed Test History\n\n");
    output.push_str(&format!(
        "Generated: {}\n\n",
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    ));
    output.push_str("| Time | Latency | Download | Upload | Client | Status |\n");
    output.push_str("|------|---------|----------|--------|--------|--------|\n");

    for record in records.iter().take(limit) {
        output.push_str(&format_row(record));
        output.push('\n');
    }

    output.push_str("\n---\n");
    output.push_str(&format!(
        "Showing {} of {} runs\n",
        records.len().min(limit),
        records.len()
    ));

    output
}

/// One table row for `record`.
pub fn format_row(record: &ResultRecord) -> String {
    format!(
        "| {} | {} | {} | {} | {} | {} |",
        record.display_timestamp(),
        record.latency_ms.map(format_latency).unwrap_or_else(|| ABSENT.to_string()),
        record.download_mbps.map(format_speed).unwrap_or_else(|| ABSENT.to_string()),
        record.upload_mbps.map(format_speed).unwrap_or_else(|| ABSENT.to_string()),
        record.client_address,
        record.status,
    )
}
