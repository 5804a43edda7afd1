//! CLI command handlers for taskwarden.
//!
//! Each subcommand has its own module; the helpers here turn a loaded
//! [`Config`] into the collaborators the handlers wire together.
//!
//! # Commands
//!
//! - [`run`] - Supervise a command, sample resources and notify when it ends
//! - [`monitor`] - Sample resources until interrupted
//! - [`watch`] - Check uploaded resource logs and report problems
//! - [`config`] - Show, locate or reset the config file

mod config;
mod monitor;
mod run;
mod watch;

pub use config::{config_init_command, config_path_command, config_show_command};
pub use monitor::{monitor_command, MonitorOptions};
pub use run::{run_command, RunOptions};
pub use watch::{watch_command, WatchOptions};

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Local;
use tracing::debug;

use crate::config::{
    global_config_path, load_config_at, validate_config, Config, NotifyConfig, StoreKind,
    TransportKind, UploadConfig,
};
use crate::error::{Result, TaskwardenError};
use crate::identity::{Ec2Metadata, IdentityProvider, LocalHostname, MachineIdentity};
use crate::monitor::{log_file_name, CounterSource, Sampler, SamplerSettings};
use crate::notify::{Notifier, SmtpRelay, Transport};
use crate::signal::InterruptReceiver;
use crate::upload::{Destination, DirectoryStore, ObjectStore, UploadScheduler};

const INTERRUPT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Options every command that loads the config file accepts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommonOptions {
    /// Config file to use instead of `~/.config/taskwarden/config.toml`.
    pub config: Option<PathBuf>,
    /// Diagnostics file; overrides `log_file` from the config.
    pub log_file: Option<PathBuf>,
    pub verbose: bool,
}

/// Command-line overrides for the sampling and identity settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SamplingOverrides {
    pub interval_secs: Option<f64>,
    pub alarm_window_secs: Option<f64>,
    pub output_dir: Option<PathBuf>,
    pub mount_point: Option<PathBuf>,
    /// Force cloud identity regardless of the config file.
    pub cloud: bool,
}

impl SamplingOverrides {
    pub fn apply(&self, config: &mut Config) {
        if let Some(interval) = self.interval_secs {
            config.sampling.interval_secs = interval;
        }
        if let Some(window) = self.alarm_window_secs {
            config.sampling.alarm_window_secs = window;
        }
        if let Some(dir) = &self.output_dir {
            config.sampling.output_dir = dir.clone();
        }
        if let Some(mount_point) = &self.mount_point {
            config.sampling.mount_point = mount_point.clone();
        }
        if self.cloud {
            config.cloud = true;
        }
    }
}

/// Resolves the config file path: the explicit one, or the global default.
pub(crate) fn config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => global_config_path(),
    }
}

/// Loads the config file.
///
/// The global file is created with commented defaults on first use; an
/// explicitly named file must already exist.
pub(crate) fn load_config(explicit: Option<&Path>) -> Result<Config> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(TaskwardenError::Config(format!(
                "config file {} does not exist. Run `taskwarden config init --config {}` to create it",
                path.display(),
                path.display()
            )));
        }
    }
    load_config_at(&config_path(explicit)?)
}

pub(crate) fn validate(config: &Config) -> Result<()> {
    validate_config(config).map_err(|e| TaskwardenError::Config(e.to_string()))
}

/// Starts diagnostics logging. The command line wins over the config file.
pub(crate) fn init_logging(common: &CommonOptions, config: &Config) -> Result<()> {
    let log_file = common.log_file.as_deref().or(config.log_file.as_deref());
    crate::logging::init(log_file, common.verbose)
}

pub(crate) fn identity_provider(cloud: bool) -> Result<Box<dyn IdentityProvider>> {
    if cloud {
        Ok(Box::new(Ec2Metadata::new()?))
    } else {
        Ok(Box::new(LocalHostname))
    }
}

/// Builds the notification transport selected in `notify`.
pub(crate) fn build_transport(notify: &NotifyConfig) -> Result<Box<dyn Transport>> {
    match notify.transport {
        TransportKind::Local => Ok(Box::new(SmtpRelay::local())),
        TransportKind::Smtp => {
            let missing = |key: &str| {
                TaskwardenError::Config(format!("notify.{key} is required for the smtp transport"))
            };
            let host = notify.smtp_host.as_deref().ok_or_else(|| missing("smtp_host"))?;
            let username = notify
                .smtp_username
                .as_deref()
                .ok_or_else(|| missing("smtp_username"))?;
            let password = notify
                .smtp_password
                .as_deref()
                .ok_or_else(|| missing("smtp_password"))?;
            Ok(Box::new(SmtpRelay::authenticated(
                host,
                notify.smtp_port,
                username,
                password,
            )?))
        }
        #[cfg(feature = "aws")]
        TransportKind::Ses => Ok(Box::new(crate::notify::SesTransport::new(
            notify.ses_region.clone(),
        )?)),
        #[cfg(not(feature = "aws"))]
        TransportKind::Ses => Err(TaskwardenError::Config(
            "the ses transport needs taskwarden built with the `aws` feature".to_string(),
        )),
    }
}

pub(crate) fn build_notifier(notify: &NotifyConfig) -> Result<Notifier> {
    let transport = build_transport(notify)?;
    debug!(transport = transport.name(), "notification transport ready");
    Ok(
        Notifier::new(notify.sender.clone(), notify.recipients.clone(), transport)
            .with_max_attempts(notify.max_attempts)
            .with_subject_prefix(notify.subject_prefix.clone()),
    )
}

/// Builds the object store selected in `upload`, if any.
pub(crate) fn build_store(upload: &UploadConfig) -> Result<Option<Box<dyn ObjectStore>>> {
    match upload.store {
        StoreKind::None => Ok(None),
        StoreKind::Directory => {
            let root = upload.directory.clone().ok_or_else(|| {
                TaskwardenError::Config(
                    "upload.directory is required for the directory store".to_string(),
                )
            })?;
            Ok(Some(Box::new(DirectoryStore::new(root))))
        }
        #[cfg(feature = "aws")]
        StoreKind::S3 => Ok(Some(Box::new(crate::upload::S3Store::new(
            upload.region.clone(),
        )?))),
        #[cfg(not(feature = "aws"))]
        StoreKind::S3 => Err(TaskwardenError::Config(
            "the s3 store needs taskwarden built with the `aws` feature".to_string(),
        )),
    }
}

/// Builds the sampler (with its upload scheduler, when a store is
/// configured) for `machine`.
///
/// Counter errors here are fatal: a sampler that cannot read the host at
/// construction would only produce an empty log.
pub(crate) fn build_sampler(
    config: &Config,
    machine: &MachineIdentity,
    source: Box<dyn CounterSource>,
) -> Result<Sampler> {
    let now = Local::now();
    let file_name = log_file_name(now, machine.instance_id());
    let settings = SamplerSettings {
        output_dir: config.sampling.output_dir.clone(),
        interval_secs: config.sampling.interval_secs,
        alarm_window_secs: config.sampling.alarm_window_secs,
        log_file_name: file_name.clone(),
    };
    let sampler = Sampler::new(settings, source)?;

    let Some(store) = build_store(&config.upload)? else {
        return Ok(sampler);
    };
    let template = config.upload.destination_template().ok_or_else(|| {
        TaskwardenError::Config("upload.bucket is required when an upload store is set".to_string())
    })?;
    let destination = Destination::from_template(&template, &file_name, machine.id(), now)?;
    let scheduler = UploadScheduler::new(
        store,
        sampler.log_path().to_path_buf(),
        destination,
        Duration::from_secs_f64(config.upload.period_secs),
    )?;
    Ok(sampler.with_uploader(scheduler))
}

/// Blocks until an interrupt arrives or `deadline` passes. Returns `true`
/// if it was interrupted.
pub(crate) fn wait_for_stop(interrupts: &InterruptReceiver, deadline: Option<Instant>) -> bool {
    loop {
        let timeout = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return false;
                }
                INTERRUPT_POLL_INTERVAL.min(deadline - now)
            }
            None => INTERRUPT_POLL_INTERVAL,
        };
        if interrupts.wait(timeout) {
            return true;
        }
    }
}
