//! Pretty terminal output formatting for hoard CLI.

use anyhow::Result;
use chrono::{DateTime, Utc};
use console::{Style, Term, style};
use serde::Serialize;

use hoard_core::ArchiveReport;
use hoard_core::archiver::PlannedAction;
use hoard_core::reconcile::{StatusReport, VerifyReport};

use crate::{GcSummary, ProviderStats, ProvidersOverview};

/// Items listed per section before the rest is summarized.
const MAX_LISTED: usize = 20;

/// Icons for terminal output - uses Nerd Font icons if available, ASCII fallbacks otherwise.
struct Icons {
    ok: &'static str,
    warn: &'static str,
    fail: &'static str,
    arrow: &'static str,
    bullet: &'static str,
}

impl Icons {
    fn detect() -> Self {
        if Self::has_nerd_font() {
            Self {
                ok: "\u{f00c}",     // nf-fa-check
                warn: "\u{f071}",   // nf-fa-warning
                fail: "\u{f00d}",   // nf-fa-times
                arrow: "\u{f061}",  // nf-fa-arrow_right
                bullet: "\u{f054}", // nf-fa-chevron_right
            }
        } else {
            Self {
                ok: "ok",
                warn: "!",
                fail: "x",
                arrow: "->",
                bullet: ">",
            }
        }
    }

    /// Detect if a Nerd Font is likely available.
    fn has_nerd_font() -> bool {
        // NERD_FONT=1 forces icons on, NERD_FONT=0 off
        if let Ok(val) = std::env::var("NERD_FONT") {
            return val != "0" && !val.is_empty();
        }

        if let Ok(term_prog) = std::env::var("TERM_PROGRAM") {
            let modern_terminals = ["WezTerm", "Alacritty", "kitty", "iTerm.app", "ghostty"];
            if modern_terminals.iter().any(|t| term_prog.contains(t)) {
                return true;
            }
        }

        std::env::var("STARSHIP_SESSION_KEY").is_ok()
    }
}

/// Terminal width for formatting, with fallback.
fn term_width() -> usize {
    usize::from(Term::stdout().size().1).clamp(40, 100)
}

/// Format a relative time string (e.g., "2 days ago", "just now").
fn relative_time(dt: DateTime<Utc>) -> String {
    let duration = Utc::now().signed_duration_since(dt);

    if duration.num_seconds() < 60 {
        return "just now".to_string();
    }
    if duration.num_minutes() < 60 {
        let mins = duration.num_minutes();
        return format!("{mins} min{s} ago", s = if mins == 1 { "" } else { "s" });
    }
    if duration.num_hours() < 24 {
        let hours = duration.num_hours();
        return format!("{hours} hour{s} ago", s = if hours == 1 { "" } else { "s" });
    }
    if duration.num_days() < 7 {
        let days = duration.num_days();
        return format!("{days} day{s} ago", s = if days == 1 { "" } else { "s" });
    }

    dt.format("%Y-%m-%d").to_string()
}

/// Human-readable byte count in binary units.
fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    #[expect(clippy::cast_precision_loss)]
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

/// Collapse whitespace and cut to `max` characters.
fn truncate(s: &str, max: usize) -> String {
    let clean = s.split_whitespace().collect::<Vec<_>>().join(" ");
    if clean.chars().count() <= max {
        return clean;
    }
    let cut: String = clean.chars().take(max.saturating_sub(3)).collect();
    format!("{cut}...")
}

fn title_or_placeholder(title: &str) -> &str {
    if title.trim().is_empty() {
        "(untitled)"
    } else {
        title
    }
}

fn header(title: &str) {
    let rule = "═".repeat(term_width());
    println!("{}", style(&rule).dim());
    println!(" {}", style(title).bold().white());
    println!("{}", style(&rule).dim());
}

fn section(label: &str, count: usize, tone: &Style) {
    println!(
        " {} {}",
        tone.apply_to(format!("{count:>5}")),
        style(label).bold()
    );
}

fn list_more(shown: usize, total: usize) {
    if total > shown {
        println!("       {}", style(format!("... and {} more", total - shown)).dim());
    }
}

/// Serialize a report to stdout.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_archive_report(report: &ArchiveReport) {
    let icons = Icons::detect();
    let green = Style::new().green();
    let yellow = Style::new().yellow();
    let red = Style::new().red();
    let dim = Style::new().dim();
    let width = term_width();

    let mode = if report.dry_run { " (dry run)" } else { "" };
    header(&format!("Archive {}{mode}", report.provider));

    if report.dry_run {
        for item in report.planned.iter().take(MAX_LISTED) {
            let (label, tone) = match item.action {
                PlannedAction::New => ("new", &green),
                PlannedAction::Update => ("update", &yellow),
                PlannedAction::Skip => ("skip", &dim),
            };
            println!(
                " {} {:<7} {}",
                style(icons.bullet).dim(),
                tone.apply_to(label),
                truncate(title_or_placeholder(&item.title), width.saturating_sub(12))
            );
        }
        list_more(MAX_LISTED, report.planned.len());
        println!();
    }

    section("listed", report.listed, &Style::new().white());
    section("new", report.archived_new, &green);
    section("updated", report.archived_updated, &yellow);
    section("skipped", report.skipped, &dim);
    section("failed", report.failed, &red);

    let media = &report.media;
    if !report.dry_run {
        println!(
            " {} media: {} downloaded ({}), {} skipped, {} deduplicated, {} failed",
            style(icons.arrow).dim(),
            media.downloaded,
            format_bytes(media.bytes),
            media.skipped,
            media.deduplicated,
            media.failed,
        );
    }

    for err in report.errors.iter().take(MAX_LISTED) {
        println!(
            " {} {} {}",
            red.apply_to(icons.fail),
            style(&err.id).bold(),
            style(format!("[{}] {}", err.kind, truncate(&err.message, width))).dim()
        );
    }
    list_more(MAX_LISTED, report.errors.len());

    for err in media.errors.iter().take(MAX_LISTED) {
        println!(
            " {} attachment {} {}",
            yellow.apply_to(icons.warn),
            style(&err.attachment_id).bold(),
            style(format!("[{}] {}", err.kind, truncate(&err.message, width))).dim()
        );
    }
    list_more(MAX_LISTED, media.errors.len());

    #[expect(clippy::cast_precision_loss)]
    let seconds = report.elapsed_ms as f64 / 1000.0;
    println!(" {}", style(format!("{seconds:.1}s")).dim().italic());
}

pub fn print_status_report(report: &StatusReport) {
    let icons = Icons::detect();
    let width = term_width();

    header(&format!(
        "Status {}: {} remote, {} archived",
        report.provider, report.remote_count, report.local_count
    ));

    section("new", report.new.len(), &Style::new().green());
    for item in report.new.iter().take(MAX_LISTED) {
        println!(
            "       {} {} {}",
            style(icons.bullet).dim(),
            truncate(title_or_placeholder(&item.title), width.saturating_sub(30)),
            style(relative_time(item.updated_at)).dim().italic()
        );
    }
    list_more(MAX_LISTED, report.new.len());

    section("updated", report.updated.len(), &Style::new().yellow());
    for item in report.updated.iter().take(MAX_LISTED) {
        println!(
            "       {} {} {}",
            style(icons.bullet).dim(),
            truncate(title_or_placeholder(&item.title), width.saturating_sub(40)),
            style(format!(
                "{} {} {}",
                relative_time(item.local_updated_at),
                icons.arrow,
                relative_time(item.remote_updated_at)
            ))
            .dim()
            .italic()
        );
    }
    list_more(MAX_LISTED, report.updated.len());

    section("up to date", report.archived.len(), &Style::new().dim());

    section("local only", report.local_only.len(), &Style::new().cyan());
    for item in report.local_only.iter().take(MAX_LISTED) {
        println!(
            "       {} {} {}",
            style(icons.bullet).dim(),
            truncate(title_or_placeholder(&item.title), width.saturating_sub(30)),
            style(&item.path).dim()
        );
    }
    list_more(MAX_LISTED, report.local_only.len());
    if report.filtered && !report.local_only.is_empty() {
        println!(
            "       {}",
            style("listing was filtered; local-only entries may be outside the window").dim()
        );
    }

    if !report.count_mismatches.is_empty() {
        section("count mismatch", report.count_mismatches.len(), &Style::new().red());
        for item in report.count_mismatches.iter().take(MAX_LISTED) {
            println!(
                "       {} {} local {} {} remote {}",
                style(icons.bullet).dim(),
                item.id,
                item.local,
                icons.arrow,
                item.remote
            );
        }
        list_more(MAX_LISTED, report.count_mismatches.len());
    }
}

pub fn print_verify_report(report: &VerifyReport) {
    let icons = Icons::detect();
    let red = Style::new().red();

    header(&format!(
        "Verify {}: {} conversations, {} media files",
        report.provider, report.local_entries, report.media_entries
    ));

    if let Some(status) = &report.status {
        section("new remotely", status.new.len(), &Style::new().green());
        section("updated remotely", status.updated.len(), &Style::new().yellow());
        section("local only", status.local_only.len(), &Style::new().cyan());
        section("count mismatch", status.count_mismatches.len(), &red);
    }

    section("missing content", report.missing_content.len(), &red);
    for item in report.missing_content.iter().take(MAX_LISTED) {
        let what = if item.directory_missing {
            "directory gone"
        } else {
            "no content file"
        };
        println!("       {} {} {}", style(icons.bullet).dim(), item.path, style(what).dim());
    }
    list_more(MAX_LISTED, report.missing_content.len());

    section("missing media", report.missing_media.len(), &red);
    for item in report.missing_media.iter().take(MAX_LISTED) {
        println!("       {} {}", style(icons.bullet).dim(), item.path);
    }
    list_more(MAX_LISTED, report.missing_media.len());

    section("dangling references", report.dangling_references.len(), &red);
    for item in report.dangling_references.iter().take(MAX_LISTED) {
        println!(
            "       {} {} {} {}",
            style(icons.bullet).dim(),
            &item.hash[..item.hash.len().min(12)],
            icons.arrow,
            item.conversation_id
        );
    }
    list_more(MAX_LISTED, report.dangling_references.len());

    if let Some(parity) = &report.parity {
        section("checked in full", parity.checked, &Style::new().white());
        section("parity mismatch", parity.mismatches.len(), &red);
        for item in parity.mismatches.iter().take(MAX_LISTED) {
            println!(
                "       {} {} messages {} {} {}, media {} {} {}",
                style(icons.bullet).dim(),
                item.id,
                item.local_messages,
                icons.arrow,
                item.remote_messages,
                item.local_media,
                icons.arrow,
                item.remote_media
            );
        }
        list_more(MAX_LISTED, parity.mismatches.len());
        section("permission denied", parity.permission_denied.len(), &Style::new().yellow());
        section("fetch errors", parity.errors.len(), &red);
        for item in parity.errors.iter().take(MAX_LISTED) {
            println!(
                "       {} {} {}",
                style(icons.bullet).dim(),
                item.id,
                style(format!("[{}] {}", item.kind, item.message)).dim()
            );
        }
        list_more(MAX_LISTED, parity.errors.len());
    }

    if report.has_issues() {
        println!(" {} {}", red.apply_to(icons.fail), red.apply_to("issues found"));
    } else {
        let green = Style::new().green();
        println!(" {} {}", green.apply_to(icons.ok), green.apply_to("archive is consistent"));
    }
}

pub(crate) fn print_gc_summary(summary: &GcSummary) {
    let icons = Icons::detect();
    let result = &summary.result;
    println!(
        "{} {}: {} orphaned entries, {} files removed, {} freed ({} live conversations)",
        style(icons.arrow).dim(),
        style(&summary.provider).bold(),
        result.entries_removed,
        result.files_removed,
        format_bytes(result.bytes_freed),
        summary.live_conversations
    );
}

pub(crate) fn print_provider_stats(stats: &ProviderStats) {
    let icons = Icons::detect();
    header(&format!("Stats {}", stats.provider));

    section("conversations", stats.conversations, &Style::new().white());
    section("messages", stats.messages, &Style::new().white());
    section("media references", stats.media_references, &Style::new().white());

    let media = &stats.media;
    println!(
        " {} {} files, {} stored, {} saved by deduplication",
        style(icons.arrow).dim(),
        media.entries,
        format_bytes(media.total_bytes),
        style(format_bytes(media.dedup_savings)).green()
    );
    for (category, totals) in &media.by_category {
        println!(
            "       {} {:<10} {:>6} files  {}",
            style(icons.bullet).dim(),
            category.dir_name(),
            totals.files,
            format_bytes(totals.bytes)
        );
    }
    if let Some(at) = stats.last_archived {
        println!(
            " {}",
            style(format!("last archived {}", relative_time(at))).dim().italic()
        );
    }
}

pub(crate) fn print_providers(overview: &ProvidersOverview) {
    let icons = Icons::detect();
    let runtime = overview.runtime.as_deref().unwrap_or("none found");
    println!(
        "{} {}   {} {}",
        style("archive:").dim(),
        overview.archive_dir.display(),
        style("runtime:").dim(),
        runtime
    );

    if overview.providers.is_empty() {
        println!("{}", style("No providers configured.").dim());
        return;
    }

    for row in &overview.providers {
        let marker = match (&row.adapter_path, row.enabled) {
            (Some(_), true) => Style::new().green().apply_to(icons.ok),
            (Some(_), false) => Style::new().dim().apply_to(icons.bullet),
            (None, _) => Style::new().red().apply_to(icons.fail),
        };
        let mut notes = Vec::new();
        if !row.enabled {
            notes.push("disabled".to_string());
        }
        if row.rate_limit_sensitive {
            notes.push("sequential media".to_string());
        }
        if let Some(strategy) = &row.strategy {
            notes.push(format!("via {strategy}"));
        }
        let location = row.adapter_path.as_ref().map_or_else(
            || "adapter not found".to_string(),
            |p| p.display().to_string(),
        );
        println!(
            " {marker} {} {} {} {}",
            style(&row.name).bold(),
            style(format!("({})", row.adapter)).dim(),
            style(location).dim(),
            style(notes.join(", ")).italic()
        );
    }
}
