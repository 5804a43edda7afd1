//! The tab-separated log artifact.
//!
//! Layout:
//!
//! ```text
//! cpu_total  virtual_memory_total_gb  ...      <- static header
//! 8.000      15.512                   ...      <- static row
//! time_elapsed_s  cpu_percent  ...             <- time-series header
//! 5.001           12.300       ...             <- one row per sample
//! ```
//!
//! Both headers are written by [`LogArtifact::create`], so a data row can
//! never precede them. Each row goes out as a single write followed by a
//! flush.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use super::metrics::{Metric, Sample, StaticFact, StaticFacts};
use crate::error::Result;

/// Builds the log file name: `log_<YYYYmmdd-HHMMSS-ffffff>[_<instance>].txt`.
pub fn log_file_name(now: DateTime<Local>, instance: Option<&str>) -> String {
    let stamp = now.format("%Y%m%d-%H%M%S-%6f");
    match instance {
        Some(id) => format!("log_{stamp}_{id}.txt"),
        None => format!("log_{stamp}.txt"),
    }
}

/// Formats values as one tab-separated line with three decimals.
pub fn format_row(values: &[f64]) -> String {
    let mut line = values
        .iter()
        .map(|v| format!("{v:.3}"))
        .collect::<Vec<_>>()
        .join("\t");
    line.push('\n');
    line
}

fn header_line<'a>(names: impl IntoIterator<Item = &'a str>) -> String {
    let mut line = names.into_iter().collect::<Vec<_>>().join("\t");
    line.push('\n');
    line
}

/// Append-only writer for one sampler run.
#[derive(Debug)]
pub struct LogArtifact {
    path: PathBuf,
    file: File,
    rows: u64,
}

impl LogArtifact {
    /// Creates (or truncates) the log at `path` and writes the static header,
    /// the static row and the time-series header.
    pub fn create(path: &Path, facts: &StaticFacts) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        let mut artifact = Self {
            path: path.to_path_buf(),
            file,
            rows: 0,
        };

        let static_values: Vec<f64> = StaticFact::ALL.iter().map(|f| facts.value(*f)).collect();
        let mut preamble = header_line(StaticFact::ALL.iter().map(|f| f.header()));
        preamble.push_str(&format_row(&static_values));
        preamble.push_str(&header_line(Metric::ALL.iter().map(|m| m.header())));
        artifact.write_line(&preamble)?;

        Ok(artifact)
    }

    /// Appends one data row.
    pub fn append(&mut self, row: &Sample) -> Result<()> {
        self.write_line(&format_row(row.values()))?;
        self.rows += 1;
        Ok(())
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        self.file.write_all(line.as_bytes())?;
        self.file.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of data rows written so far.
    pub fn rows(&self) -> u64 {
        self.rows
    }
}
