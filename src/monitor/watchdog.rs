//! Health checks for uploaded resource logs.
//!
//! A [`Watchdog`] downloads each [`WatchedLog`] through an [`ObjectStore`],
//! averages its most recent rows and records a problem for every log that
//! could not be fetched or parsed, stopped growing since the previous check,
//! or whose averages cross the [`Thresholds`]. All problems found in one
//! check are reported together in a single [`WatchReport`].

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::{debug, info, warn};

use super::metrics::Metric;
use crate::error::{Result, TaskwardenError};
use crate::notify::Notifier;
use crate::upload::ObjectStore;

/// Subject of the report notification.
pub const REPORT_SUBJECT: &str = "Periodic update";

const RULE: &str = "---------------------------------------------------";

/// An uploaded log, addressed as `bucket`/`key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedLog {
    /// Name used in reports; the file name unless given.
    pub id: String,
    pub bucket: String,
    pub key: String,
    /// Data rows seen by the previous check.
    last_rows: Option<usize>,
}

impl WatchedLog {
    /// Parses a `[s3://]bucket/key` location.
    ///
    /// # Errors
    ///
    /// Returns [`TaskwardenError::Config`] if the bucket or the key is
    /// missing, or the key names a directory.
    pub fn new(location: &str, id: Option<&str>) -> Result<Self> {
        let trimmed = location.trim();
        let path = trimmed.strip_prefix("s3://").unwrap_or(trimmed);
        let (bucket, key) = path
            .split_once('/')
            .filter(|(bucket, key)| !bucket.is_empty() && !key.is_empty() && !key.ends_with('/'))
            .ok_or_else(|| {
                TaskwardenError::Config(format!(
                    "'{location}' is not a log location; expected [s3://]bucket/key"
                ))
            })?;
        let file_name = key.rsplit('/').next().unwrap_or(key);

        Ok(Self {
            id: id.unwrap_or(file_name).to_string(),
            bucket: bucket.to_string(),
            key: key.to_string(),
            last_rows: None,
        })
    }

    /// Parses a source line: a location, optionally followed by words that
    /// are joined with `.` into the display name.
    pub fn from_source_line(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let location = parts
            .next()
            .ok_or_else(|| TaskwardenError::Config("empty log source".to_string()))?;
        let id = parts.collect::<Vec<_>>().join(".");
        Self::new(location, (!id.is_empty()).then_some(id.as_str()))
    }

    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }

    pub fn location(&self) -> String {
        format!("{}/{}", self.bucket, self.key)
    }
}

/// Parses a source list: one source line per log; blank lines and lines
/// starting with `#` are skipped.
pub fn parse_source_list(contents: &str) -> Result<Vec<WatchedLog>> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(WatchedLog::from_source_line)
        .collect()
}

/// Averages over the most recent rows of a resource log.
#[derive(Debug, Clone, PartialEq)]
pub struct LogSummary {
    /// Data rows in the whole log.
    pub rows: usize,
    /// Rows the averages were taken over.
    pub averaged: usize,
    averages: Vec<(String, f64)>,
}

impl LogSummary {
    /// Parses a resource log and averages its last `recent_rows` rows.
    ///
    /// Everything before the time-series header (the static facts) is
    /// skipped. The error is the problem text to report.
    pub fn parse(contents: &str, recent_rows: usize) -> std::result::Result<Self, String> {
        if contents.trim().is_empty() {
            return Err("file appears to be empty".to_string());
        }

        let series_header = Metric::TimeElapsedS.header();
        let mut lines = contents.lines().filter(|line| !line.trim().is_empty());
        let header: Vec<&str> = lines
            .by_ref()
            .map(|line| line.trim_end().split('\t').collect::<Vec<_>>())
            .find(|fields| fields[0] == series_header)
            .ok_or_else(|| format!("missing {series_header} header"))?;

        let mut rows = 0;
        let mut recent = VecDeque::with_capacity(recent_rows);
        for line in lines {
            rows += 1;
            if recent.len() == recent_rows {
                recent.pop_front();
            }
            recent.push_back(line.trim_end());
        }

        let mut sums = vec![0.0; header.len()];
        for line in &recent {
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() != header.len() {
                return Err(format!(
                    "malformed file (header size: {}, line size: {}). line: '{line}'",
                    header.len(),
                    fields.len()
                ));
            }
            for (sum, field) in sums.iter_mut().zip(&fields) {
                let value: f64 = field.trim().parse().map_err(|_| {
                    format!("malformed file ('{field}' is not a number). line: '{line}'")
                })?;
                *sum += value;
            }
        }

        let averaged = recent.len();
        let averages = if averaged == 0 {
            Vec::new()
        } else {
            header
                .iter()
                .zip(sums)
                .map(|(name, sum)| (name.to_string(), sum / averaged as f64))
                .collect()
        };

        Ok(Self {
            rows,
            averaged,
            averages,
        })
    }

    pub fn average(&self, metric: Metric) -> Option<f64> {
        self.averages
            .iter()
            .find(|(name, _)| name == metric.header())
            .map(|(_, value)| *value)
    }
}

/// Limits the averaged usage is checked against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub min_cpu_percent: f64,
    pub max_disk_percent: f64,
    pub max_memory_percent: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_cpu_percent: 20.0,
            max_disk_percent: 90.0,
            max_memory_percent: 90.0,
        }
    }
}

impl Thresholds {
    /// Problems with `summary`'s averages. A log without rows has none.
    pub fn check(&self, summary: &LogSummary) -> Vec<String> {
        let mut problems = Vec::new();
        if summary.averaged == 0 {
            return problems;
        }

        let mut check = |metric: Metric, crossed: &dyn Fn(f64) -> Option<String>| {
            match summary.average(metric) {
                Some(value) => problems.extend(crossed(value)),
                None => problems.push(format!("missing {} header", metric.header())),
            }
        };
        check(Metric::CpuPercent, &|v| {
            (v < self.min_cpu_percent)
                .then(|| format!("CPU usage below {}%: {v:.2}", self.min_cpu_percent))
        });
        check(Metric::DiskUsagePercent, &|v| {
            (v > self.max_disk_percent)
                .then(|| format!("Disk usage above {}%: {v:.2}", self.max_disk_percent))
        });
        check(Metric::VirtualMemoryPercent, &|v| {
            (v > self.max_memory_percent)
                .then(|| format!("Memory usage above {}%: {v:.2}", self.max_memory_percent))
        });

        problems
    }
}

/// The result of checking one log.
#[derive(Debug, Clone, PartialEq)]
pub struct LogCheck {
    pub id: String,
    pub location: String,
    /// `None` if the log could not be fetched or parsed.
    pub summary: Option<LogSummary>,
    pub problems: Vec<String>,
}

/// Everything found by one [`Watchdog::check`].
#[derive(Debug, Clone)]
pub struct WatchReport {
    pub checked_at: DateTime<Local>,
    pub checks: Vec<LogCheck>,
}

impl WatchReport {
    pub fn problem_count(&self) -> usize {
        self.checks.iter().map(|check| check.problems.len()).sum()
    }

    pub fn has_problems(&self) -> bool {
        self.problem_count() > 0
    }

    /// Notification body listing the problems of every affected log.
    pub fn body(&self) -> String {
        let mut body = format!(
            "\n{RULE}\nErrors at {}:\n\n",
            self.checked_at.format("%Y-%m-%d %H:%M:%S")
        );
        for check in self.checks.iter().filter(|check| !check.problems.is_empty()) {
            body.push_str(&check.id);
            body.push('\n');
            for problem in &check.problems {
                body.push('\t');
                body.push_str(problem);
                body.push('\n');
            }
        }
        body.push_str(RULE);
        body
    }

    /// Sends the report if anything was found. Returns whether it was
    /// delivered.
    pub fn send(&self, notifier: &Notifier) -> bool {
        if !self.has_problems() {
            return false;
        }
        notifier.send(REPORT_SUBJECT, &self.body(), &[])
    }
}

/// Checks a fixed set of uploaded logs.
pub struct Watchdog {
    store: Box<dyn ObjectStore>,
    logs: Vec<WatchedLog>,
    scratch_dir: PathBuf,
    recent_rows: usize,
    thresholds: Thresholds,
}

impl Watchdog {
    /// Creates `scratch_dir`, which downloaded logs pass through.
    ///
    /// # Errors
    ///
    /// Returns [`TaskwardenError::Config`] if there is nothing to watch or
    /// `recent_rows` is zero, and an I/O error if `scratch_dir` cannot be
    /// created.
    pub fn new(
        store: Box<dyn ObjectStore>,
        logs: Vec<WatchedLog>,
        scratch_dir: PathBuf,
        recent_rows: usize,
        thresholds: Thresholds,
    ) -> Result<Self> {
        if logs.is_empty() {
            return Err(TaskwardenError::Config(
                "no logs to watch; pass --sources or --source-file, or set watch.sources"
                    .to_string(),
            ));
        }
        if recent_rows == 0 {
            return Err(TaskwardenError::Config(
                "the number of recent rows must be at least 1".to_string(),
            ));
        }
        fs::create_dir_all(&scratch_dir)?;
        info!(
            store = %store.describe(),
            logs = logs.len(),
            scratch_dir = %scratch_dir.display(),
            "watching resource logs"
        );

        Ok(Self {
            store,
            logs,
            scratch_dir,
            recent_rows,
            thresholds,
        })
    }

    pub fn logs(&self) -> &[WatchedLog] {
        &self.logs
    }

    /// Downloads and checks every log once.
    pub fn check(&mut self) -> WatchReport {
        let checked_at = Local::now();
        let mut checks = Vec::with_capacity(self.logs.len());
        for (index, log) in self.logs.iter_mut().enumerate() {
            let local = self
                .scratch_dir
                .join(format!("{index}_{}", log.file_name()));
            let check = check_log(
                self.store.as_ref(),
                log,
                &local,
                self.recent_rows,
                &self.thresholds,
            );
            if check.problems.is_empty() {
                debug!(log = %check.id, "log is healthy");
            } else {
                warn!(log = %check.id, problems = ?check.problems, "log needs attention");
            }
            checks.push(check);
        }
        WatchReport { checked_at, checks }
    }
}

fn check_log(
    store: &dyn ObjectStore,
    log: &mut WatchedLog,
    local: &Path,
    recent_rows: usize,
    thresholds: &Thresholds,
) -> LogCheck {
    let mut check = LogCheck {
        id: log.id.clone(),
        location: log.location(),
        summary: None,
        problems: Vec::new(),
    };

    let contents = store
        .download(&log.bucket, &log.key, local)
        .and_then(|()| Ok(fs::read_to_string(local)?));
    if local.exists() {
        if let Err(e) = fs::remove_file(local) {
            debug!(path = %local.display(), error = %e, "failed to remove downloaded log");
        }
    }
    let contents = match contents {
        Ok(contents) => contents,
        Err(e) => {
            check.problems.push(e.to_string());
            return check;
        }
    };

    let summary = match LogSummary::parse(&contents, recent_rows) {
        Ok(summary) => summary,
        Err(problem) => {
            check.problems.push(problem);
            return check;
        }
    };

    if let Some(previous) = log.last_rows {
        if summary.rows <= previous {
            check.problems.push(format!(
                "log file was not updated (curr: {}, prev: {previous})",
                summary.rows
            ));
        }
    }
    log.last_rows = Some(summary.rows);

    check.problems.extend(thresholds.check(&summary));
    check.summary = Some(summary);
    check
}
