#![forbid(unsafe_code)]
//! Width-aligned text tables and timestamp formatting for command output.

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Builds an aligned text table: header row, dashed rule, data rows.
/// Column widths are computed from the data.
pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }
    }

    let mut out = String::new();
    let header_parts: Vec<String> = headers
        .iter()
        .zip(widths.iter())
        .map(|(header, width)| format!("{:<width$}", header, width = *width))
        .collect();
    out.push_str(header_parts.join(" | ").trim_end());
    out.push('\n');

    let total_width: usize =
        widths.iter().sum::<usize>() + widths.len().saturating_sub(1) * 3;
    out.push_str(&"-".repeat(total_width));
    out.push('\n');

    for row in rows {
        let parts: Vec<String> = row
            .iter()
            .zip(widths.iter())
            .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
            .collect();
        out.push_str(parts.join(" | ").trim_end());
        out.push('\n');
    }
    out
}

pub fn format_ts_ms(ms: i64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .ok()
        .and_then(|dt| dt.format(&Rfc3339).ok())
        .unwrap_or_else(|| "-".to_string())
}

pub fn format_opt_ts_ms(ms: Option<i64>) -> String {
    match ms {
        Some(ms) => format_ts_ms(ms),
        None => "-".to_string(),
    }
}

pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}

pub fn opt_text(value: Option<&str>, max_chars: usize) -> String {
    match value.map(str::trim).filter(|s| !s.is_empty()) {
        Some(value) => truncate(value, max_chars),
        None => "-".to_string(),
    }
}
