use anyhow::Error;
use std::io::{self, Write};
use unicode_width::UnicodeWidthChar;

use crate::api::Health;
use crate::core::{Aggregates, Bucket, CompliancePayload, Percentage, Row, RowField, Status};
use crate::logs::LogFile;

const BAR_WIDTH: usize = 30;
const MAX_CELL_CHARS: usize = 40;

pub struct UiConfig {
    pub color: bool,
    pub stdin_is_tty: bool,
    pub stdout_is_tty: bool,
    pub stderr_is_tty: bool,
    pub max_table_rows: usize,
    pub quiet: bool,
    pub verbose: bool,
}

pub fn eprintln_error(err: &Error) {
    let mut stderr = io::stderr().lock();
    let _ = writeln!(stderr, "error:");
    let _ = writeln!(stderr, "  {err}");

    let mut causes = err.chain().skip(1).peekable();
    if causes.peek().is_some() {
        let _ = writeln!(stderr, "caused by:");
        for cause in causes {
            let _ = writeln!(stderr, "  - {cause}");
        }
    }

    let _ = writeln!(stderr, "next:");
    let _ = writeln!(stderr, "  - re-run with `--verbose` for more detail");
    let _ = writeln!(
        stderr,
        "  - see `compliance-dash --help` for commands and options"
    );
}

pub fn print_summary(payload: &CompliancePayload, agg: &Aggregates, cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    write_summary(&mut out, payload, agg, cfg.color, cfg.verbose);
}

pub fn write_summary(
    out: &mut dyn Write,
    payload: &CompliancePayload,
    agg: &Aggregates,
    color: bool,
    verbose: bool,
) {
    let _ = writeln!(
        out,
        "Server image compliance ({})",
        payload.reference_week_label()
    );
    if let Some(ts) = &payload.generated_at {
        let _ = writeln!(out, "generated at {ts}");
    }
    let _ = writeln!(out);

    let t = &agg.totals;
    let cards = [
        ("Total servers", t.total_servers.to_string()),
        ("Compliant", t.total_compliant.to_string()),
        ("Non-compliant", t.total_non_compliant.to_string()),
        (
            "Compliance rate",
            paint(
                &format!("{}%", t.compliance_percentage),
                rate_color(t.compliance_percentage),
                color,
            ),
        ),
    ];
    let label_w = cards
        .iter()
        .map(|(label, _)| visible_width_ansi(label))
        .max()
        .unwrap_or(0);
    for (label, value) in &cards {
        let _ = writeln!(out, "  {}  {value}", pad_end_display(label, label_w));
    }

    if !agg.by_region.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "By region:");
        write_buckets(out, &agg.by_region, color);
    }
    if !agg.by_app.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "By app:");
        write_buckets(out, &agg.by_app, color);
    }

    if agg.has_exclusions() {
        let _ = writeln!(out);
        let warn = format!(
            "warning: {} region(s) and {} app(s) reported errors and were left out of every total",
            agg.excluded_regions.len(),
            agg.excluded_apps.len()
        );
        let _ = writeln!(out, "{}", paint(&warn, "33", color));
        if verbose {
            for app in &agg.excluded_apps {
                let _ = writeln!(out, "  - app {}: {}", app.app, app.error);
            }
            for region in &agg.excluded_regions {
                let _ = writeln!(
                    out,
                    "  - {}/{}: {}",
                    region.app, region.region, region.error
                );
            }
        } else {
            let _ = writeln!(out, "  (use --verbose to list them)");
        }
    }
}

fn write_buckets(out: &mut dyn Write, buckets: &[Bucket], color: bool) {
    let name_w = buckets
        .iter()
        .map(|b| visible_width_ansi(&b.name))
        .max()
        .unwrap_or(0);
    for bucket in buckets {
        let _ = writeln!(
            out,
            "  {}  {}  {:>7}%  ({} ok / {} stale)",
            pad_end_display(&bucket.name, name_w),
            bar(bucket.compliant, bucket.non_compliant, BAR_WIDTH, color),
            bucket.percentage().to_string(),
            bucket.compliant,
            bucket.non_compliant
        );
    }
}

pub fn bar(compliant: u64, non_compliant: u64, width: usize, color: bool) -> String {
    let total = compliant.saturating_add(non_compliant);
    let filled = if total == 0 {
        0
    } else {
        let scaled = u128::from(compliant) * width as u128;
        ((scaled + u128::from(total) / 2) / u128::from(total)) as usize
    };
    let filled = filled.min(width);
    let rest = if total == 0 { 0 } else { width - filled };
    let blank = width - filled - rest;
    format!(
        "{}{}{}",
        paint(&"█".repeat(filled), "32", color),
        paint(&"░".repeat(rest), "31", color),
        " ".repeat(blank)
    )
}

fn rate_color(p: Percentage) -> &'static str {
    match p.hundredths() {
        9000.. => "32",
        7000.. => "33",
        _ => "31",
    }
}

fn paint(s: &str, code: &str, color: bool) -> String {
    if !color || s.is_empty() {
        return s.to_string();
    }
    format!("\x1b[{code}m{s}\x1b[0m")
}

pub fn table_columns(show_app: bool) -> Vec<RowField> {
    let mut cols = Vec::with_capacity(7);
    if show_app {
        cols.push(RowField::App);
    }
    cols.extend([
        RowField::Region,
        RowField::ServerName,
        RowField::ImageName,
        RowField::Status,
        RowField::ImageWeek,
        RowField::Reason,
    ]);
    cols
}

pub fn cell_text(row: &Row, field: RowField) -> String {
    let text = match field {
        RowField::App => row.app.clone(),
        RowField::Region => row.region.clone(),
        RowField::ServerName => row.server_name.clone(),
        RowField::ImageName => row.image_name.clone(),
        RowField::ImageId => row.image_id.clone(),
        RowField::Status => row.status.label().to_string(),
        RowField::ImageYear => row.image_year.map(|y| y.to_string()).unwrap_or_default(),
        RowField::ImageWeek => row.image_week_label(),
        RowField::Reason => row.reason.clone(),
    };
    if text.trim().is_empty() {
        "N/A".to_string()
    } else {
        text
    }
}

pub fn showing_line(shown: usize, total: usize) -> String {
    format!("Showing {shown} of {total} servers")
}

pub fn print_table(rows: &[Row], total: usize, show_app: bool, cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    write_table(&mut out, rows, total, show_app, cfg.max_table_rows, cfg.color);
}

pub fn write_table(
    out: &mut dyn Write,
    rows: &[Row],
    total: usize,
    show_app: bool,
    max_rows: usize,
    color: bool,
) {
    let _ = writeln!(out, "{}", showing_line(rows.len(), total));
    if rows.is_empty() {
        let _ = writeln!(out, "No servers match the current filters.");
        return;
    }

    let limit = if max_rows == 0 { rows.len() } else { max_rows.min(rows.len()) };
    let cols = table_columns(show_app);

    let cells: Vec<Vec<String>> = rows
        .iter()
        .take(limit)
        .map(|row| {
            cols.iter()
                .map(|f| truncate_middle(&cell_text(row, *f), MAX_CELL_CHARS))
                .collect()
        })
        .collect();
    let widths: Vec<usize> = cols
        .iter()
        .enumerate()
        .map(|(i, f)| {
            cells
                .iter()
                .map(|r| visible_width_ansi(&r[i]))
                .max()
                .unwrap_or(0)
                .max(visible_width_ansi(f.label()))
        })
        .collect();

    let _ = writeln!(out);
    let header: Vec<String> = cols
        .iter()
        .zip(&widths)
        .map(|(f, w)| pad_end_display(f.label(), *w))
        .collect();
    let _ = writeln!(out, "{}", header.join("  ").trim_end());
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    let _ = writeln!(out, "{}", rule.join("  "));

    for (row, line) in rows.iter().zip(&cells) {
        let rendered: Vec<String> = cols
            .iter()
            .zip(line)
            .zip(&widths)
            .map(|((field, text), w)| {
                let text = if *field == RowField::Status {
                    paint(text, status_color(row.status), color)
                } else {
                    text.clone()
                };
                pad_end_ansi(&text, *w)
            })
            .collect();
        let _ = writeln!(out, "{}", rendered.join("  ").trim_end());
    }

    if rows.len() > limit {
        let _ = writeln!(
            out,
            "... {} more (raise ui.max_table_rows or narrow the filters)",
            rows.len() - limit
        );
    }
}

fn status_color(status: Status) -> &'static str {
    match status {
        Status::Compliant => "32",
        Status::NonCompliant => "31",
    }
}

pub fn print_apps(apps: &[String], selected: Option<&str>, cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    if apps.is_empty() {
        let _ = writeln!(out, "No apps reported.");
        return;
    }
    for app in apps {
        let marker = if Some(app.as_str()) == selected { "*" } else { " " };
        let _ = writeln!(out, "{marker} {app}");
    }
}

pub fn print_health(base_url: &str, health: &Health, cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    let status = if health.is_healthy() {
        paint(&health.status, "32", cfg.color)
    } else {
        paint(&health.status, "31", cfg.color)
    };
    let _ = writeln!(out, "API:    {base_url}");
    let _ = writeln!(out, "status: {status}");
    let _ = writeln!(
        out,
        "vault:  {}",
        if health.vault_connected { "connected" } else { "not connected" }
    );
    if let Some(message) = &health.message {
        let _ = writeln!(out, "{message}");
    }
    if let Some(error) = &health.error {
        let _ = writeln!(out, "error: {error}");
    }
}

pub fn print_logs(logs: &[LogFile], cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    if logs.is_empty() {
        let _ = writeln!(out, "No refresh logs yet.");
        return;
    }
    let rows = logs.len().min(cfg.max_table_rows.max(1));
    for log in logs.iter().take(rows) {
        let _ = writeln!(
            out,
            "{}  {:>4} record(s)  {}",
            log.modified_at.as_deref().unwrap_or("unknown"),
            log.records,
            log.path
        );
    }
    if logs.len() > rows {
        let _ = writeln!(out, "... {} older", logs.len() - rows);
    }
}

pub fn truncate_middle(s: &str, max_chars: usize) -> String {
    let len = s.chars().count();
    if len <= max_chars {
        return s.to_string();
    }

    let keep = max_chars.saturating_sub(3);
    let left = keep / 2;
    let right = keep.saturating_sub(left);

    let prefix: String = s.chars().take(left).collect();
    let suffix: String = s.chars().skip(len - right).collect();

    format!("{prefix}...{suffix}")
}

fn pad_end_ansi(s: &str, width: usize) -> String {
    let w = visible_width_ansi(s);
    if w >= width {
        return s.to_string();
    }
    format!("{s}{}", " ".repeat(width - w))
}

pub fn pad_end_display(s: &str, width: usize) -> String {
    pad_end_ansi(s, width)
}

pub fn visible_width_ansi(s: &str) -> usize {
    let mut width: usize = 0;
    let mut chars = s.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\x1b' && chars.peek() == Some(&'[') {
            let _ = chars.next();
            for ch2 in chars.by_ref() {
                if ch2 == 'm' {
                    break;
                }
            }
            continue;
        }
        width = width.saturating_add(UnicodeWidthChar::width(ch).unwrap_or(0));
    }
    width
}
