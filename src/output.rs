//! CLI output formatting for build, check and sync.
//!
//! Each kind gets a header line and indented detail lines; zero counts are
//! left out so a clean run reads as a short inventory.
//!
//! # Output Format
//!
//! ## Build
//!
//! ```text
//! Posts
//!     12 published → 3 pages, 5 archive months
//!     1 hidden
//! Galleries
//!     (no source directory)
//! Feed: 12 entries → feeds/atom.xml, feeds/feed.rss
//! Manifest: 31 entries → manifest.json
//! ```
//!
//! ## Check
//!
//! Same per-kind block, with "would write" in place of "→".
//!
//! ## Sync
//!
//! ```text
//! b2: 3 uploaded, 10 unchanged, 0 failed (13 total)
//! ```
//!
//! Each section has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout.

use crate::feed::{FEED_PATH, RSS_PATH};
use crate::manifest::MANIFEST_FILENAME;
use crate::pipeline::{BuildReport, KindReport};
use crate::sync::SyncStats;

fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// `1 page`, `2 pages`.
fn plural(n: usize, one: &str, many: &str) -> String {
    if n == 1 {
        format!("{n} {one}")
    } else {
        format!("{n} {many}")
    }
}

fn title(report: &KindReport) -> &'static str {
    match report.kind {
        crate::types::ContentKind::Posts => "Posts",
        crate::types::ContentKind::Galleries => "Galleries",
    }
}

fn kind_lines(report: &KindReport, arrow: &str) -> Vec<String> {
    let mut lines = vec![title(report).to_string()];
    let pad = indent(1);
    if report.missing {
        lines.push(format!("{pad}(no source directory)"));
        return lines;
    }
    lines.push(format!(
        "{pad}{} published {arrow} {}, {}",
        report.published,
        plural(report.pages, "page", "pages"),
        plural(report.archives, "archive month", "archive months"),
    ));
    if report.fatal {
        lines.push(format!("{pad}walk aborted: source directory unreadable"));
    }
    for (n, label) in [
        (report.hidden, "hidden"),
        (report.duplicates, "duplicate slugs skipped"),
        (report.invalid, "invalid"),
        (report.write_failures, "failed to write"),
    ] {
        if n > 0 {
            lines.push(format!("{pad}{n} {label}"));
        }
    }
    lines
}

/// Format a build report.
pub fn format_build_report(report: &BuildReport) -> Vec<String> {
    let mut lines: Vec<String> = report
        .kinds
        .iter()
        .flat_map(|k| kind_lines(k, "→"))
        .collect();
    lines.push(match report.feed_entries {
        Some(n) => format!("Feed: {} → {FEED_PATH}, {RSS_PATH}", plural(n, "entry", "entries")),
        None => "Feed: failed".to_string(),
    });
    lines.push(match report.manifest_entries {
        Some(n) => format!("Manifest: {} → {MANIFEST_FILENAME}", plural(n, "entry", "entries")),
        None => "Manifest: failed".to_string(),
    });
    lines
}

pub fn print_build_report(report: &BuildReport) {
    for line in format_build_report(report) {
        println!("{}", line);
    }
}

/// Format the result of a check run.
pub fn format_check_report(kinds: &[KindReport]) -> Vec<String> {
    kinds.iter().flat_map(|k| kind_lines(k, "would write")).collect()
}

pub fn print_check_report(kinds: &[KindReport]) {
    for line in format_check_report(kinds) {
        println!("{}", line);
    }
}

pub fn format_sync_stats(store: &str, stats: &SyncStats) -> String {
    format!("{store}: {stats}")
}

pub fn print_sync_stats(store: &str, stats: &SyncStats) {
    println!("{}", format_sync_stats(store, stats));
}
