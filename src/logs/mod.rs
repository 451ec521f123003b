use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::config::config_dir;
use crate::core::Totals;

const SCHEMA_VERSION: &str = "1.0";
const LOG_PREFIX: &str = "refresh-";
const LOG_SUFFIX: &str = ".jsonl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshOutcome {
    Ok,
    Error,
    Stale,
}

#[derive(Debug, Clone)]
pub struct RefreshRecord {
    pub seq: u64,
    pub trigger: String,
    pub app: String,
    pub started_at: OffsetDateTime,
    pub finished_at: OffsetDateTime,
    pub status: RefreshOutcome,
    pub error: Option<String>,
    pub totals: Option<Totals>,
    pub excluded_regions: usize,
}

#[derive(Debug, Serialize)]
struct RefreshLine<'a> {
    schema_version: &'static str,
    tool_version: &'static str,
    seq: u64,
    trigger: &'a str,
    app: &'a str,
    started_at: String,
    finished_at: String,
    status: RefreshOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    totals: Option<&'a Totals>,
    excluded_regions: usize,
}

pub fn logs_dir(home_dir: &Path) -> PathBuf {
    config_dir(home_dir).join("logs")
}

fn rfc3339(ts: OffsetDateTime) -> String {
    ts.format(&Rfc3339).unwrap_or_else(|_| "unknown".to_string())
}

#[derive(Debug)]
pub struct RefreshLog {
    path: PathBuf,
}

impl RefreshLog {
    pub fn new(home_dir: &Path, opened_at: OffsetDateTime) -> Self {
        let pid = std::process::id();
        let ts = opened_at.unix_timestamp_nanos();
        let path = logs_dir(home_dir).join(format!("{LOG_PREFIX}{pid}-{ts}{LOG_SUFFIX}"));
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &RefreshRecord) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory: {}", dir.display()))?;
        }

        let line = RefreshLine {
            schema_version: SCHEMA_VERSION,
            tool_version: env!("CARGO_PKG_VERSION"),
            seq: record.seq,
            trigger: &record.trigger,
            app: &record.app,
            started_at: rfc3339(record.started_at),
            finished_at: rfc3339(record.finished_at),
            status: record.status,
            error: record.error.as_deref(),
            totals: record.totals.as_ref(),
            excluded_regions: record.excluded_regions,
        };
        let mut buf = serde_json::to_vec(&line).context("failed to serialize log record")?;
        buf.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open log: {}", self.path.display()))?;
        file.write_all(&buf)
            .with_context(|| format!("failed to write log: {}", self.path.display()))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogFile {
    pub path: String,
    pub bytes: u64,
    pub records: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<String>,
}

pub fn list_logs(home_dir: &Path) -> Result<Vec<LogFile>> {
    let dir = logs_dir(home_dir);
    if !dir.exists() {
        return Ok(vec![]);
    }

    let mut found: Vec<(Option<SystemTime>, LogFile)> = Vec::new();
    let entries = std::fs::read_dir(&dir)
        .with_context(|| format!("failed to read log directory: {}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to read entry in {}", dir.display()))?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with(LOG_PREFIX) || !name.ends_with(LOG_SUFFIX) {
            continue;
        }
        let path = entry.path();
        let meta = entry
            .metadata()
            .with_context(|| format!("failed to stat log: {}", path.display()))?;
        let modified = meta.modified().ok();
        let records = std::fs::read_to_string(&path)
            .map(|s| s.lines().filter(|l| !l.trim().is_empty()).count())
            .unwrap_or(0);
        found.push((
            modified,
            LogFile {
                path: path.display().to_string(),
                bytes: meta.len(),
                records,
                modified_at: modified.map(|m| rfc3339(OffsetDateTime::from(m))),
            },
        ));
    }

    found.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.path.cmp(&a.1.path)));
    Ok(found.into_iter().map(|(_, f)| f).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Percentage;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn temp_home() -> PathBuf {
        static HOME_SEQ: AtomicU64 = AtomicU64::new(0);
        let seq = HOME_SEQ.fetch_add(1, Ordering::Relaxed);
        let home = std::env::temp_dir().join(format!(
            "compliance-dash-log-test-{}-{seq}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&home);
        std::fs::create_dir_all(&home).expect("create home");
        home
    }

    fn record(seq: u64, status: RefreshOutcome) -> RefreshRecord {
        let now = OffsetDateTime::now_utc();
        RefreshRecord {
            seq,
            trigger: "manual".to_string(),
            app: "all".to_string(),
            started_at: now,
            finished_at: now,
            status,
            error: (status == RefreshOutcome::Error).then(|| "http status 500".to_string()),
            totals: (status == RefreshOutcome::Ok).then(|| Totals {
                total_servers: 2,
                total_compliant: 1,
                total_non_compliant: 1,
                compliance_percentage: Percentage::of(1, 2),
            }),
            excluded_regions: 0,
        }
    }

    #[test]
    fn appends_one_json_line_per_record() {
        let home = temp_home();
        let log = RefreshLog::new(&home, OffsetDateTime::now_utc());
        assert!(!log.path().exists());

        log.append(&record(1, RefreshOutcome::Ok)).expect("append");
        log.append(&record(2, RefreshOutcome::Error)).expect("append");

        let text = std::fs::read_to_string(log.path()).expect("read log");
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).expect("json line"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["status"], "ok");
        assert_eq!(lines[0]["totals"]["compliancePercentage"], 50.0);
        assert!(lines[0].get("error").is_none());
        assert_eq!(lines[1]["seq"], 2);
        assert_eq!(lines[1]["error"], "http status 500");

        let listed = list_logs(&home).expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].records, 2);

        let _ = std::fs::remove_dir_all(&home);
    }

    #[test]
    fn list_ignores_foreign_files_and_missing_dir() {
        let home = temp_home();
        assert!(list_logs(&home).expect("list").is_empty());

        let dir = logs_dir(&home);
        std::fs::create_dir_all(&dir).expect("mkdir");
        std::fs::write(dir.join("notes.txt"), "x").expect("write");
        assert!(list_logs(&home).expect("list").is_empty());

        let _ = std::fs::remove_dir_all(&home);
    }
}
