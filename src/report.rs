use crate::diff::{ChangeKind, ChangeRecord};
use crate::proof::{Discrepancy, DiscrepancyKind};
use crate::snapshot::FileRecord;
use chrono::{DateTime, Local, Utc};

pub fn print_changes(changes: &[ChangeRecord], show_details: bool) {
    for change in changes {
        println!("{:<2} {}", change.kind.code(), change.relative_path);

        if show_details {
            for line in format_change_details(change) {
                println!("{}", line);
            }
        }
    }
}

pub fn print_discrepancies(discrepancies: &[Discrepancy]) {
    for discrepancy in discrepancies {
        for line in format_discrepancy(discrepancy) {
            println!("{}", line);
        }
    }
}

fn format_change_details(change: &ChangeRecord) -> Vec<String> {
    match (change.kind, &change.previous, &change.current) {
        (ChangeKind::Deleted, Some(old), _) => vec![format!("   was: {}", format_record(old))],
        (ChangeKind::Modified, Some(old), Some(new)) => format_record_diff(old, new),
        _ => Vec::new(),
    }
}

fn format_record_diff(old: &FileRecord, new: &FileRecord) -> Vec<String> {
    let mut lines = Vec::new();

    if old.size != new.size {
        lines.push(format!(
            "   size: {} -> {}",
            format_size(old.size),
            format_size(new.size)
        ));
    }
    if old.modified_at != new.modified_at {
        lines.push(format!(
            "   mtime: {} -> {}",
            format_time(old.modified_at),
            format_time(new.modified_at)
        ));
    }
    if old.content_hash != new.content_hash {
        lines.push(format!(
            "   hash: {} -> {}",
            format_hash(old.content_hash.as_deref()),
            format_hash(new.content_hash.as_deref())
        ));
    }

    lines
}

fn format_record(record: &FileRecord) -> String {
    format!(
        "file ({}, hash: {})",
        format_size(record.size),
        format_hash(record.content_hash.as_deref())
    )
}

/// Discrepancies print full hashes; they are usually compared by hand.
fn format_discrepancy(discrepancy: &Discrepancy) -> Vec<String> {
    let mut lines = vec![format!(
        "{:<9} {}",
        discrepancy.kind.to_string(),
        discrepancy.relative_path
    )];

    match &discrepancy.kind {
        DiscrepancyKind::Missing { expected } => {
            lines.push(format!("   expected: {}", full_hash(expected.as_deref())));
        }
        DiscrepancyKind::Modified { expected, actual } => {
            lines.push(format!("   expected: {}", full_hash(expected.as_deref())));
            lines.push(format!("   actual:   {}", full_hash(actual.as_deref())));
        }
        DiscrepancyKind::Added { actual } => {
            lines.push(format!("   actual:   {}", full_hash(actual.as_deref())));
        }
    }

    lines
}

fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;
    const GB: u64 = 1024 * 1024 * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    match time {
        Some(time) => time
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S%.3f")
            .to_string(),
        None => "unknown".to_string(),
    }
}

fn format_hash(hash: Option<&str>) -> String {
    match hash {
        Some(hash) if hash.chars().count() > 12 => {
            format!("{}...", hash.chars().take(12).collect::<String>())
        }
        Some(hash) => hash.to_string(),
        None => "empty".to_string(),
    }
}

fn full_hash(hash: Option<&str>) -> &str {
    hash.unwrap_or("empty")
}
