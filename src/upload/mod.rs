//! Periodic upload of the log artifact to an object store.
//!
//! The [`UploadScheduler`] runs on its own thread with its own period,
//! independent of the sampling cadence. Every failure doubles the period up
//! to [`MAX_UPLOAD_PERIOD`]; success leaves it where it is.

pub mod directory;
#[cfg(feature = "aws")]
pub mod s3;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};
use tracing::{debug, info, warn};

use crate::error::{Result, TaskwardenError};
use crate::signal::StopSignal;

pub use directory::DirectoryStore;
#[cfg(feature = "aws")]
pub use s3::S3Store;

/// Upper bound for the backed-off upload period.
pub const MAX_UPLOAD_PERIOD: Duration = Duration::from_secs(60 * 60);

/// A remote store that accepts whole files.
pub trait ObjectStore: Send {
    /// Uploads `local_path` to `bucket`/`key`, replacing any existing object.
    fn upload(&self, local_path: &Path, bucket: &str, key: &str) -> Result<()>;

    /// Copies `bucket`/`key` to `local_path`, replacing the local file.
    fn download(&self, bucket: &str, key: &str, local_path: &Path) -> Result<()>;

    /// Short description for log messages.
    fn describe(&self) -> String;
}

/// Where the log artifact is uploaded to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub bucket: String,
    pub key: String,
}

impl Destination {
    /// Expands a `bucket[/prefix]` template and appends `file_name` to form
    /// the object key.
    ///
    /// Supported placeholders are `{instance_id}`, `{timestamp}`
    /// (`YYYYmmdd-HHMMSS-ffffff`, matching the log file name) and `{date}`
    /// (`YYYYmmdd`). A leading `s3://` is
    /// ignored. Everything before the first `/` is the bucket.
    ///
    /// # Errors
    ///
    /// Returns [`TaskwardenError::Config`] for unknown or unterminated
    /// placeholders and for an empty bucket.
    pub fn from_template(
        template: &str,
        file_name: &str,
        instance_id: &str,
        now: DateTime<Local>,
    ) -> Result<Self> {
        let template = template.strip_prefix("s3://").unwrap_or(template);
        let expanded = expand_placeholders(template, instance_id, now)?;

        let (bucket, prefix) = expanded.split_once('/').unwrap_or((expanded.as_str(), ""));
        if bucket.is_empty() {
            return Err(TaskwardenError::Config(format!(
                "upload destination '{template}' has no bucket"
            )));
        }
        let prefix = prefix.trim_matches('/');
        let key = if prefix.is_empty() {
            file_name.to_string()
        } else {
            format!("{prefix}/{file_name}")
        };

        Ok(Self {
            bucket: bucket.to_string(),
            key,
        })
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

fn expand_placeholders(template: &str, instance_id: &str, now: DateTime<Local>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after.find('}').ok_or_else(|| {
            TaskwardenError::Config(format!("unterminated placeholder in '{template}'"))
        })?;
        match &after[..close] {
            "instance_id" => out.push_str(instance_id),
            "timestamp" => out.push_str(&now.format("%Y%m%d-%H%M%S-%6f").to_string()),
            "date" => out.push_str(&now.format("%Y%m%d").to_string()),
            other => {
                return Err(TaskwardenError::Config(format!(
                    "unknown placeholder '{{{other}}}' in '{template}'"
                )))
            }
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);

    Ok(out)
}

/// Pushes one local file to an [`ObjectStore`] on a backoff schedule.
pub struct UploadScheduler {
    store: Box<dyn ObjectStore>,
    local_path: PathBuf,
    destination: Destination,
    period: Duration,
    failures: u32,
}

impl UploadScheduler {
    /// # Errors
    ///
    /// Returns [`TaskwardenError::Config`] if `period` is zero.
    pub fn new(
        store: Box<dyn ObjectStore>,
        local_path: PathBuf,
        destination: Destination,
        period: Duration,
    ) -> Result<Self> {
        if period.is_zero() {
            return Err(TaskwardenError::Config(
                "upload period must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            store,
            local_path,
            destination,
            period: period.min(MAX_UPLOAD_PERIOD),
            failures: 0,
        })
    }

    /// The current period between uploads.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Total failed uploads so far.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Uploads once. Returns `true` on success.
    ///
    /// A failure is logged and doubles the period (capped at
    /// [`MAX_UPLOAD_PERIOD`]). It is never propagated.
    pub fn tick(&mut self) -> bool {
        match self.store.upload(
            &self.local_path,
            &self.destination.bucket,
            &self.destination.key,
        ) {
            Ok(()) => {
                debug!(destination = %self.destination, "uploaded log");
                true
            }
            Err(e) => {
                self.failures += 1;
                self.period = (self.period * 2).min(MAX_UPLOAD_PERIOD);
                warn!(
                    error = %e,
                    destination = %self.destination,
                    next_attempt_secs = self.period.as_secs_f64(),
                    "log upload failed, backing off"
                );
                false
            }
        }
    }

    /// Uploads every [`UploadScheduler::period`] until `stop` is requested.
    pub fn run(mut self, stop: &StopSignal) {
        info!(
            store = %self.store.describe(),
            destination = %self.destination,
            period_secs = self.period.as_secs_f64(),
            "uploading log periodically"
        );
        while !stop.wait_for(self.period) {
            self.tick();
        }
        debug!(failures = self.failures, "upload scheduler stopped");
    }
}
