use std::io::{self, Write};

use serde::Serialize;
use tracing::info;

use crate::engine::{ProgressEvent, ProgressSink, RunReport};
use crate::index::GroupIndex;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupListing {
    pub groups: Vec<GroupListingEntry>,
    pub total_items: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupListingEntry {
    pub group: String,
    pub items: usize,
}

impl From<&GroupIndex> for GroupListing {
    fn from(index: &GroupIndex) -> Self {
        Self {
            groups: index
                .groups()
                .map(|(group, ids)| GroupListingEntry {
                    group: group.to_string(),
                    items: ids.len(),
                })
                .collect(),
            total_items: index.item_count(),
        }
    }
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_report(report: &RunReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_groups(listing: &GroupListing) -> io::Result<()> {
        Self::print_json(listing)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Progress through `tracing`, one line per finished group.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => info!("{}", event.message),
        }
    }
}

pub struct TextOutput;

impl TextOutput {
    pub fn print_report(report: &RunReport) -> io::Result<()> {
        let mut stdout = io::stdout();
        Self::write_report(&mut stdout, report)
    }

    pub fn write_report<W: Write>(out: &mut W, report: &RunReport) -> io::Result<()> {
        let title = if report.dry_run {
            "gmrepo-harvest status"
        } else {
            "gmrepo-harvest summary"
        };
        writeln!(out, "{title}")?;
        writeln!(
            out,
            "{:<16} {:>7} {:>8} {:>7} {:>8} {:>8} {:>7} {:>8}",
            "group", "total", "fetched", "empty", "known", "on-disk", "failed", "pending"
        )?;
        for group in report.groups.iter().chain(std::iter::once(&report.totals)) {
            writeln!(
                out,
                "{:<16} {:>7} {:>8} {:>7} {:>8} {:>8} {:>7} {:>8}",
                group.group,
                group.total,
                group.fetched,
                group.empty,
                group.skipped_empty,
                group.skipped_existing,
                group.failed,
                group.pending
            )?;
        }
        if report.totals.duplicates > 0 {
            writeln!(out, "duplicate entries ignored: {}", report.totals.duplicates)?;
        }
        if report.interrupted {
            writeln!(out, "stopped early; pending items will be picked up by the next run")?;
        } else if report.has_failures() {
            writeln!(out, "failed items will be retried by the next run")?;
        }
        Ok(())
    }

    pub fn print_groups(listing: &GroupListing) -> io::Result<()> {
        let mut stdout = io::stdout();
        for entry in &listing.groups {
            writeln!(stdout, "{}\t{}", entry.group, entry.items)?;
        }
        writeln!(
            stdout,
            "{} groups, {} runs",
            listing.groups.len(),
            listing.total_items
        )?;
        Ok(())
    }
}
