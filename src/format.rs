//! Output formatting utilities

use crate::delta::{DeltaStatus, DeltaTransferStats, FileDelta};
use crate::snapshot::{SnapshotDiff, SnapshotSummary};
use crate::sync::{SyncPlan, TransferState};
use std::time::Duration;

/// Format file size in human-readable format
pub fn format_size(bytes: u64) -> String {
    human_bytes::human_bytes(bytes as f64)
}

/// Format duration in human-readable format
pub fn format_duration(duration: Duration) -> String {
    format_duration_secs(duration.as_secs_f64())
}

/// Format duration from seconds
pub fn format_duration_secs(secs: f64) -> String {
    if secs < 1.0 {
        format!("{:.0}ms", secs * 1000.0)
    } else if secs < 60.0 {
        format!("{:.1}s", secs)
    } else if secs < 3600.0 {
        let mins = (secs / 60.0).floor();
        let remaining = secs - mins * 60.0;
        format!("{}m {:.0}s", mins as u64, remaining)
    } else {
        let hours = (secs / 3600.0).floor();
        let remaining = secs - hours * 3600.0;
        let mins = (remaining / 60.0).floor();
        format!("{}h {}m", hours as u64, mins as u64)
    }
}

/// Format transfer rate in human-readable format
pub fn format_rate(bytes_per_sec: f64) -> String {
    format!("{}/s", human_bytes::human_bytes(bytes_per_sec))
}

pub fn format_percent(value: f64) -> String {
    format!("{:.1}%", value)
}

/// Format a count with a unit
pub fn format_count(count: usize, singular: &str, plural: &str) -> String {
    if count == 1 {
        format!("{} {}", count, singular)
    } else {
        format!("{} {}", count, plural)
    }
}

pub fn format_files(count: usize) -> String {
    format_count(count, "file", "files")
}

fn status_label(status: DeltaStatus) -> &'static str {
    match status {
        DeltaStatus::New => "new",
        DeltaStatus::Modified => "modified",
        DeltaStatus::Unchanged => "unchanged",
        DeltaStatus::SmallFile => "small",
        DeltaStatus::Deleted => "deleted",
    }
}

/// One line per delta, skipping unchanged files unless `all`
pub fn format_deltas(deltas: &[FileDelta], all: bool) -> String {
    deltas
        .iter()
        .filter(|d| all || d.status != DeltaStatus::Unchanged)
        .map(|d| match d.status {
            DeltaStatus::Modified => format!(
                "{:<9} {} ({} of {}, {} saved)",
                status_label(d.status),
                d.path,
                format_size(d.transfer_size),
                format_size(d.total_size),
                format_percent(d.savings_percent)
            ),
            DeltaStatus::Deleted => format!("{:<9} {}", status_label(d.status), d.path),
            _ => format!(
                "{:<9} {} ({})",
                status_label(d.status),
                d.path,
                format_size(d.transfer_size)
            ),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Aggregate statistics as a short block
pub fn format_stats(stats: &DeltaTransferStats) -> String {
    let mut lines = Vec::new();
    lines.push(format!("New:        {}", format_files(stats.new_files)));
    lines.push(format!("Modified:   {}", format_files(stats.modified_files)));
    lines.push(format!("Small:      {}", format_files(stats.small_files)));
    lines.push(format!("Unchanged:  {}", format_files(stats.unchanged_files)));
    if stats.deleted_files > 0 {
        lines.push(format!("Deleted:    {}", format_files(stats.deleted_files)));
    }
    lines.push(String::new());
    lines.push(format!(
        "Transfer: {} (instead of {})",
        format_size(stats.transfer_size),
        format_size(stats.total_size)
    ));
    if stats.savings_bytes > 0 {
        lines.push(format!(
            "Savings:  {} ({})",
            format_size(stats.savings_bytes),
            format_percent(stats.savings_percent)
        ));
    }
    lines.join("\n")
}

/// Dry-run report
pub fn format_plan(plan: &SyncPlan, all: bool) -> String {
    let mut lines = vec![format!("=== Plan for {} ===", plan.project_id), String::new()];
    let files = format_deltas(&plan.deltas, all);
    if !files.is_empty() {
        lines.push(files);
        lines.push(String::new());
    }
    lines.push(format_stats(&plan.stats));
    lines.join("\n")
}

/// Report for a finished run
pub fn format_run(state: &TransferState) -> String {
    let mut lines = vec![format!("=== Sync {} ===", state.stage), String::new()];

    if let Some(finished) = state.finished_at {
        let elapsed = (finished - state.started_at).to_std().unwrap_or_default();
        lines.push(format!("Duration:    {}", format_duration(elapsed)));
        if elapsed.as_secs_f64() > 0.0 && state.bytes_sent > 0 {
            lines.push(format!(
                "Rate:        {}",
                format_rate(state.bytes_sent as f64 / elapsed.as_secs_f64())
            ));
        }
    }
    lines.push(format!(
        "Files:       {} of {} done",
        state.files_completed, state.files_total
    ));
    lines.push(format!("Sent:        {}", format_size(state.bytes_sent)));
    if let Some(stats) = &state.stats {
        lines.push(format!(
            "Savings:     {} ({})",
            format_size(stats.savings_bytes),
            format_percent(stats.savings_percent)
        ));
    }
    if let Some(id) = &state.snapshot_id {
        lines.push(format!("Snapshot:    {}", id));
    }

    if !state.failed_files.is_empty() {
        lines.push(String::new());
        lines.push(format!("Failed ({}):", state.failed_files.len()));
        for f in &state.failed_files {
            let note = if f.given_up { " [no retries left]" } else { "" };
            lines.push(format!("  {}: {}{}", f.path, f.error, note));
        }
    }
    if !state.warnings.is_empty() {
        lines.push(String::new());
        lines.push("Warnings:".to_string());
        for w in &state.warnings {
            lines.push(format!("  {}", w));
        }
    }
    if let Some(err) = &state.last_error {
        lines.push(String::new());
        lines.push(format!("Error: {}", err));
    }
    lines.join("\n")
}

/// Snapshot listing, one line per snapshot
pub fn format_snapshots(snapshots: &[SnapshotSummary]) -> String {
    if snapshots.is_empty() {
        return "No snapshots".to_string();
    }
    snapshots
        .iter()
        .map(|s| {
            format!(
                "{}  {}  {} ({} restorable)  {}{}",
                s.id,
                s.timestamp.format("%Y-%m-%d %H:%M:%S"),
                format_files(s.files_count),
                s.restorable_count,
                format_size(s.total_size),
                s.message
                    .as_deref()
                    .map(|m| format!("  {}", m))
                    .unwrap_or_default()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_snapshot_diff(diff: &SnapshotDiff) -> String {
    if !diff.has_changes() {
        return "No differences".to_string();
    }
    let mut lines = Vec::new();
    lines.extend(diff.added.iter().map(|p| format!("+ {}", p)));
    lines.extend(diff.modified.iter().map(|p| format!("~ {}", p)));
    lines.extend(diff.deleted.iter().map(|p| format!("- {}", p)));
    lines.join("\n")
}
