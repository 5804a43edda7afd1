use crate::error::{Result, TaskwardenError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// The base config directory name under ~/.config/
const CONFIG_DIR_NAME: &str = "taskwarden";

// ============================================================================
// Configuration
// ============================================================================

/// Settings for a supervised run.
///
/// Every section and key is optional in the file; missing ones take the
/// defaults shown in [`DEFAULT_CONFIG_WITH_COMMENTS`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Identify the machine by its EC2 instance id instead of its host name.
    pub cloud: bool,

    /// External command that renders a resource log into an image.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plot_command: Option<String>,

    /// Where taskwarden writes its own diagnostics. Stderr when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,

    pub sampling: SamplingConfig,
    pub notify: NotifyConfig,
    pub upload: UploadConfig,
    pub watch: WatchConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub enabled: bool,
    /// Seconds between samples.
    pub interval_secs: f64,
    /// Seconds of history kept as the delta baseline.
    pub alarm_window_secs: f64,
    /// Directory the resource log is written to.
    pub output_dir: PathBuf,
    /// Filesystem whose usage is reported.
    pub mount_point: PathBuf,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 5.0,
            alarm_window_secs: 60.0,
            output_dir: PathBuf::from("output"),
            mount_point: PathBuf::from("/"),
        }
    }
}

/// How notifications leave this machine.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Unauthenticated SMTP relay on localhost.
    #[default]
    Local,
    /// Remote SMTP relay with STARTTLS and credentials.
    Smtp,
    /// Amazon SES.
    Ses,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub transport: TransportKind,
    pub sender: String,
    pub recipients: Vec<String>,
    pub max_attempts: u32,
    pub subject_prefix: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smtp_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smtp_password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ses_region: Option<String>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Local,
            sender: String::new(),
            recipients: Vec::new(),
            max_attempts: crate::notify::DEFAULT_MAX_ATTEMPTS,
            subject_prefix: crate::notify::DEFAULT_SUBJECT_PREFIX.to_string(),
            smtp_host: None,
            smtp_port: 587,
            smtp_username: None,
            smtp_password: None,
            ses_region: None,
        }
    }
}

/// Where the resource log is periodically uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    None,
    /// A local or mounted directory, `<directory>/<bucket>/<key>`.
    Directory,
    /// Amazon S3.
    S3,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub store: StoreKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    /// Key prefix template; `{instance_id}`, `{timestamp}` and `{date}` are
    /// expanded and the log file name is appended.
    pub path: String,
    /// Seconds between uploads before any backoff.
    pub period_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            store: StoreKind::None,
            bucket: None,
            path: "logs/resource_monitor/{date}_{instance_id}/".to_string(),
            period_secs: 300.0,
            directory: None,
            region: None,
        }
    }
}

impl UploadConfig {
    /// `bucket/path` template for [`crate::upload::Destination::from_template`].
    pub fn destination_template(&self) -> Option<String> {
        let bucket = self.bucket.as_deref()?.trim_end_matches('/');
        Some(format!("{bucket}/{}", self.path.trim_start_matches('/')))
    }
}

/// Settings for `taskwarden watch`, which checks uploaded resource logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Logs to check, as `[s3://]bucket/key`, optionally followed by a
    /// display name.
    pub sources: Vec<String>,
    /// Seconds between checks.
    pub interval_secs: f64,
    /// Most recent rows averaged per check.
    pub recent_rows: usize,
    /// Report when average CPU usage falls below this percentage.
    pub min_cpu_percent: f64,
    /// Report when average disk usage rises above this percentage.
    pub max_disk_percent: f64,
    /// Report when average memory usage rises above this percentage.
    pub max_memory_percent: f64,
    /// Reports sent at most this many times per process.
    pub max_attempts: u32,
    /// Where logs are downloaded to. A directory under the system temp
    /// directory when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<PathBuf>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            interval_secs: 900.0,
            recent_rows: 30,
            min_cpu_percent: 20.0,
            max_disk_percent: 90.0,
            max_memory_percent: 90.0,
            max_attempts: 1000,
            scratch_dir: None,
        }
    }
}

// ============================================================================
// Config Validation
// ============================================================================

use std::error::Error;
use std::fmt;

/// Error type for configuration validation failures.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Sampling interval is zero, negative or not a number.
    InvalidInterval(f64),

    /// Alarm window is zero, negative or not a number.
    InvalidAlarmWindow(f64),

    /// Upload period is zero, negative or not a number.
    InvalidUploadPeriod(f64),

    /// An upload store is selected but no bucket is configured.
    MissingUploadBucket,

    /// The directory store is selected without a directory.
    MissingUploadDirectory,

    /// The SMTP transport is selected without a host.
    MissingSmtpHost,

    /// The SMTP transport is selected without credentials.
    MissingSmtpCredentials,

    /// Only one of `smtp_username` / `smtp_password` is set.
    UnpairedSmtpCredentials,

    /// Recipients are configured but the sender is empty.
    MissingSender,

    /// `max_attempts = 0` would silently drop every notification.
    ZeroMaxAttempts,

    /// The named setting needs the `aws` cargo feature.
    AwsUnavailable(&'static str),

    /// Watch interval is zero, negative or not a number.
    InvalidWatchInterval(f64),

    /// `watch.recent_rows = 0` leaves nothing to average.
    ZeroRecentRows,

    /// `watch.max_attempts = 0` would silently drop every report.
    ZeroWatchAttempts,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidInterval(v) => {
                write!(f, "sampling.interval_secs must be greater than zero, got {v}")
            }
            ConfigError::InvalidAlarmWindow(v) => {
                write!(f, "sampling.alarm_window_secs must be greater than zero, got {v}")
            }
            ConfigError::InvalidUploadPeriod(v) => {
                write!(f, "upload.period_secs must be greater than zero, got {v}")
            }
            ConfigError::MissingUploadBucket => write!(
                f,
                "upload.store is set but upload.bucket is missing. \
                Set a bucket or use `store = \"none\"`"
            ),
            ConfigError::MissingUploadDirectory => write!(
                f,
                "upload.store = \"directory\" requires upload.directory"
            ),
            ConfigError::MissingSmtpHost => {
                write!(f, "notify.transport = \"smtp\" requires notify.smtp_host")
            }
            ConfigError::MissingSmtpCredentials => write!(
                f,
                "notify.transport = \"smtp\" requires notify.smtp_username and notify.smtp_password"
            ),
            ConfigError::UnpairedSmtpCredentials => write!(
                f,
                "notify.smtp_username and notify.smtp_password must be set together"
            ),
            ConfigError::MissingSender => {
                write!(f, "notify.recipients is set but notify.sender is empty")
            }
            ConfigError::ZeroMaxAttempts => {
                write!(f, "notify.max_attempts must be at least 1")
            }
            ConfigError::AwsUnavailable(setting) => write!(
                f,
                "{setting} needs AWS support; rebuild with `--features aws`"
            ),
            ConfigError::InvalidWatchInterval(v) => {
                write!(f, "watch.interval_secs must be greater than zero, got {v}")
            }
            ConfigError::ZeroRecentRows => write!(f, "watch.recent_rows must be at least 1"),
            ConfigError::ZeroWatchAttempts => write!(f, "watch.max_attempts must be at least 1"),
        }
    }
}

impl Error for ConfigError {}

fn positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

/// Validate a configuration for logical consistency.
///
/// Called after loading and after command-line overrides are applied.
pub fn validate_config(config: &Config) -> std::result::Result<(), ConfigError> {
    let sampling = &config.sampling;
    if !positive(sampling.interval_secs) {
        return Err(ConfigError::InvalidInterval(sampling.interval_secs));
    }
    if !positive(sampling.alarm_window_secs) {
        return Err(ConfigError::InvalidAlarmWindow(sampling.alarm_window_secs));
    }

    let notify = &config.notify;
    if notify.max_attempts == 0 {
        return Err(ConfigError::ZeroMaxAttempts);
    }
    if !notify.recipients.is_empty() && notify.sender.trim().is_empty() {
        return Err(ConfigError::MissingSender);
    }
    if notify.smtp_username.is_some() != notify.smtp_password.is_some() {
        return Err(ConfigError::UnpairedSmtpCredentials);
    }
    match notify.transport {
        TransportKind::Smtp if notify.smtp_host.is_none() => {
            return Err(ConfigError::MissingSmtpHost)
        }
        TransportKind::Smtp if notify.smtp_username.is_none() => {
            return Err(ConfigError::MissingSmtpCredentials)
        }
        TransportKind::Ses if !cfg!(feature = "aws") => {
            return Err(ConfigError::AwsUnavailable("notify.transport = \"ses\""))
        }
        _ => {}
    }

    let upload = &config.upload;
    if upload.store != StoreKind::None {
        if upload.bucket.as_deref().is_none_or(|b| b.trim().is_empty()) {
            return Err(ConfigError::MissingUploadBucket);
        }
        if !positive(upload.period_secs) {
            return Err(ConfigError::InvalidUploadPeriod(upload.period_secs));
        }
    }
    match upload.store {
        StoreKind::Directory if upload.directory.is_none() => {
            return Err(ConfigError::MissingUploadDirectory)
        }
        StoreKind::S3 if !cfg!(feature = "aws") => {
            return Err(ConfigError::AwsUnavailable("upload.store = \"s3\""))
        }
        _ => {}
    }

    let watch = &config.watch;
    if !positive(watch.interval_secs) {
        return Err(ConfigError::InvalidWatchInterval(watch.interval_secs));
    }
    if watch.recent_rows == 0 {
        return Err(ConfigError::ZeroRecentRows);
    }
    if watch.max_attempts == 0 {
        return Err(ConfigError::ZeroWatchAttempts);
    }

    Ok(())
}

// ============================================================================
// Config File Management
// ============================================================================

/// The filename for the global configuration file.
const GLOBAL_CONFIG_FILENAME: &str = "config.toml";

/// Default config file content with explanatory comments.
///
/// Written when no config file exists yet. Parses to [`Config::default`].
pub const DEFAULT_CONFIG_WITH_COMMENTS: &str = r#"# taskwarden configuration

# Identify this machine by its EC2 instance id (true) or its host name (false).
cloud = false

# Command that renders a resource log into an image to attach to the
# notification. Called as `<command> <log file> <output dir>`; it should print
# the image path as its last line of output.
# plot_command = "python3 plot_resource_usage.py"

# Write taskwarden's own diagnostics to this file instead of stderr.
# log_file = "/var/log/taskwarden.log"

[sampling]
# Record host CPU, memory, swap and disk usage while the command runs.
enabled = true
# Seconds between samples.
interval_secs = 5.0
# Seconds of history kept as the baseline for I/O deltas.
alarm_window_secs = 60.0
# Directory for the resource log (created if missing).
output_dir = "output"
# Filesystem whose usage is reported.
mount_point = "/"

[notify]
# "local" (SMTP relay on localhost), "smtp" (remote relay with STARTTLS) or
# "ses" (Amazon SES, needs the aws feature).
transport = "local"
sender = ""
recipients = []
# Notifications sent at most this many times per process.
max_attempts = 10
subject_prefix = "<automated> "
smtp_port = 587
# smtp_host = "smtp.gmail.com"
# smtp_username = "me@example.com"
# smtp_password = "app-password"
# ses_region = "us-west-2"

[upload]
# "none", "directory" or "s3" (needs the aws feature).
store = "none"
# Key prefix; {instance_id}, {timestamp} and {date} are expanded.
path = "logs/resource_monitor/{date}_{instance_id}/"
# Seconds between uploads. Doubles after every failed upload, up to one hour.
period_secs = 300.0
# bucket = "my-bucket"
# directory = "/mnt/shared/taskwarden"
# region = "us-west-2"

[watch]
# Uploaded logs checked by `taskwarden watch`, fetched through the upload
# store: "[s3://]bucket/key", optionally followed by a display name.
sources = []
# Seconds between checks.
interval_secs = 900.0
# Most recent rows averaged per check.
recent_rows = 30
# Reported when the averages cross these limits.
min_cpu_percent = 20.0
max_disk_percent = 90.0
max_memory_percent = 90.0
# Reports sent at most this many times per process.
max_attempts = 1000
# scratch_dir = "/tmp/taskwarden-watch"
"#;

/// Get the taskwarden config directory path (~/.config/taskwarden/).
///
/// Does not create the directory.
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| TaskwardenError::Config("Could not determine home directory".to_string()))?;
    Ok(home.join(".config").join(CONFIG_DIR_NAME))
}

/// Ensure the taskwarden config directory exists.
///
/// Returns whether the directory was newly created.
pub fn ensure_config_dir() -> Result<(PathBuf, bool)> {
    let dir = config_dir()?;
    let created = !dir.exists();
    fs::create_dir_all(&dir)?;
    Ok((dir, created))
}

/// Get the path to the global config file (`~/.config/taskwarden/config.toml`).
pub fn global_config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(GLOBAL_CONFIG_FILENAME))
}

/// Load the global configuration, creating a commented default file if
/// none exists.
pub fn load_global_config() -> Result<Config> {
    load_config_at(&global_config_path()?)
}

/// Load the configuration at `path`.
///
/// A missing file is created with [`DEFAULT_CONFIG_WITH_COMMENTS`]. The
/// loaded file is not validated here; see [`validate_config`].
///
/// # Errors
///
/// Returns an error if the file cannot be read or written, or is not valid
/// TOML for [`Config`].
pub fn load_config_at(path: &Path) -> Result<Config> {
    if !path.exists() {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, DEFAULT_CONFIG_WITH_COMMENTS)?;
        return Ok(Config::default());
    }

    let content = fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content).map_err(|e| {
        TaskwardenError::Config(format!(
            "Failed to parse config file at {}: {}",
            path.display(),
            e
        ))
    })?;

    Ok(config)
}

/// Overwrite `path` with the commented defaults.
pub fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, DEFAULT_CONFIG_WITH_COMMENTS)?;
    Ok(())
}

/// Renders `config` as TOML with secrets masked.
pub fn display_config(config: &Config) -> Result<String> {
    let mut shown = config.clone();
    if shown.notify.smtp_password.is_some() {
        shown.notify.smtp_password = Some("********".to_string());
    }
    Ok(toml::to_string_pretty(&shown)?)
}
