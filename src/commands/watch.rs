//! Watch command handler.
//!
//! Checks uploaded resource logs every `watch.interval_secs` and mails one
//! report per check that found a problem.

use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::info;

use super::{
    build_notifier, build_store, init_logging, load_config, validate, wait_for_stop,
    CommonOptions,
};
use crate::config::{Config, TransportKind};
use crate::error::{Result, TaskwardenError};
use crate::monitor::{parse_source_list, Thresholds, WatchedLog, Watchdog};
use crate::output::{print_warning, print_watch_report};
use crate::signal::{install_handler, interrupt_channel};

const SCRATCH_DIR_NAME: &str = "taskwarden-watch";

/// Everything `taskwarden watch` accepts on the command line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WatchOptions {
    pub common: CommonOptions,
    /// Log locations checked in addition to `watch.sources`.
    pub sources: Vec<String>,
    /// File with one log location per line.
    pub source_file: Option<PathBuf>,
    pub interval_secs: Option<f64>,
    pub recent_rows: Option<usize>,
    pub scratch_dir: Option<PathBuf>,
    /// Replaces the configured recipients when non-empty.
    pub recipients: Vec<String>,
    pub sender: Option<String>,
    pub transport: Option<TransportKind>,
    /// Check once and exit.
    pub once: bool,
}

impl WatchOptions {
    /// Applies the command-line overrides on top of the config file.
    pub fn apply(&self, config: &mut Config) {
        if let Some(interval) = self.interval_secs {
            config.watch.interval_secs = interval;
        }
        if let Some(rows) = self.recent_rows {
            config.watch.recent_rows = rows;
        }
        if let Some(dir) = &self.scratch_dir {
            config.watch.scratch_dir = Some(dir.clone());
        }
        if !self.recipients.is_empty() {
            config.notify.recipients = self.recipients.clone();
        }
        if let Some(sender) = &self.sender {
            config.notify.sender = sender.clone();
        }
        if let Some(transport) = self.transport {
            config.notify.transport = transport;
        }
    }

    /// The configured sources, then `--sources`, then the source file.
    ///
    /// # Errors
    ///
    /// Returns [`TaskwardenError::Config`] if a location is malformed, the
    /// source file cannot be read, or nothing is left to watch.
    pub fn watched_logs(&self, config: &Config) -> Result<Vec<WatchedLog>> {
        let mut logs = config
            .watch
            .sources
            .iter()
            .chain(&self.sources)
            .map(|line| WatchedLog::from_source_line(line))
            .collect::<Result<Vec<_>>>()?;

        if let Some(path) = &self.source_file {
            let contents = fs::read_to_string(path).map_err(|e| {
                TaskwardenError::Config(format!(
                    "cannot read source file {}: {e}",
                    path.display()
                ))
            })?;
            logs.extend(parse_source_list(&contents)?);
        }

        if logs.is_empty() {
            return Err(TaskwardenError::Config(
                "no logs to watch; pass --sources or --source-file, or set watch.sources"
                    .to_string(),
            ));
        }
        Ok(logs)
    }
}

/// Builds the watchdog over the configured upload store.
pub(crate) fn build_watchdog(config: &Config, logs: Vec<WatchedLog>) -> Result<Watchdog> {
    let store = build_store(&config.upload)?.ok_or_else(|| {
        TaskwardenError::Config(
            "watching needs upload.store to fetch the logs from".to_string(),
        )
    })?;
    let watch = &config.watch;
    let scratch_dir = watch
        .scratch_dir
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join(SCRATCH_DIR_NAME));
    let thresholds = Thresholds {
        min_cpu_percent: watch.min_cpu_percent,
        max_disk_percent: watch.max_disk_percent,
        max_memory_percent: watch.max_memory_percent,
    };
    Watchdog::new(store, logs, scratch_dir, watch.recent_rows, thresholds)
}

/// Check uploaded logs until interrupted, or once with `--once`.
pub fn watch_command(options: WatchOptions) -> Result<()> {
    let mut config = load_config(options.common.config.as_deref())?;
    options.apply(&mut config);
    validate(&config)?;
    let logs = options.watched_logs(&config)?;
    init_logging(&options.common, &config)?;

    if config.notify.recipients.is_empty() {
        print_warning("No recipients configured; problems will only be printed.");
    }
    let notifier = build_notifier(&config.notify)?.with_max_attempts(config.watch.max_attempts);
    let mut watchdog = build_watchdog(&config, logs)?;

    let (handle, interrupts) = interrupt_channel();
    install_handler(handle)?;
    let interval = Duration::from_secs_f64(config.watch.interval_secs);

    loop {
        let report = watchdog.check();
        print_watch_report(&report);
        if report.send(&notifier) {
            info!(problems = report.problem_count(), "watch report sent");
        }
        if options.once || wait_for_stop(&interrupts, Some(Instant::now() + interval)) {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreKind;
    use tempfile::TempDir;

    fn directory_config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.upload.store = StoreKind::Directory;
        config.upload.bucket = Some("logs".to_string());
        config.upload.directory = Some(dir.path().join("store"));
        config.watch.scratch_dir = Some(dir.path().join("scratch"));
        config
    }

    #[test]
    fn test_overrides_replace_only_given_values() {
        let mut config = Config::default();
        let options = WatchOptions {
            interval_secs: Some(60.0),
            recipients: vec!["ops@example.com".to_string()],
            ..WatchOptions::default()
        };
        options.apply(&mut config);

        assert_eq!(config.watch.interval_secs, 60.0);
        assert_eq!(config.watch.recent_rows, 30);
        assert_eq!(config.notify.recipients, vec!["ops@example.com"]);
        assert_eq!(config.watch.scratch_dir, None);
    }

    #[test]
    fn test_watched_logs_combine_config_flags_and_file() {
        let dir = TempDir::new().unwrap();
        let source_file = dir.path().join("sources.txt");
        fs::write(&source_file, "# fleet\nlogs/c/log_c.txt trainer three\n").unwrap();

        let mut config = Config::default();
        config.watch.sources = vec!["s3://logs/a/log_a.txt".to_string()];
        let options = WatchOptions {
            sources: vec!["logs/b/log_b.txt".to_string()],
            source_file: Some(source_file),
            ..WatchOptions::default()
        };

        let ids: Vec<String> = options
            .watched_logs(&config)
            .unwrap()
            .into_iter()
            .map(|log| log.id)
            .collect();
        assert_eq!(ids, vec!["log_a.txt", "log_b.txt", "trainer.three"]);
    }

    #[test]
    fn test_nothing_to_watch_is_an_error() {
        let err = WatchOptions::default()
            .watched_logs(&Config::default())
            .unwrap_err();
        assert!(err.to_string().contains("no logs to watch"));

        let options = WatchOptions {
            source_file: Some(PathBuf::from("/definitely/not/here.txt")),
            ..WatchOptions::default()
        };
        let err = options.watched_logs(&Config::default()).unwrap_err();
        assert!(err.to_string().contains("cannot read source file"));
    }

    #[test]
    fn test_watch_command_rejects_missing_sources_before_starting() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("taskwarden.toml");
        fs::write(&path, "[watch]\ninterval_secs = 60.0\n").unwrap();

        let options = WatchOptions {
            common: CommonOptions {
                config: Some(path),
                ..CommonOptions::default()
            },
            once: true,
            ..WatchOptions::default()
        };
        let err = watch_command(options).unwrap_err();
        assert!(err.to_string().contains("no logs to watch"));
    }

    #[test]
    fn test_watchdog_needs_a_store() {
        let logs = vec![WatchedLog::new("logs/a.txt", None).unwrap()];
        let err = build_watchdog(&Config::default(), logs).err().unwrap();
        assert!(err.to_string().contains("upload.store"));
    }

    #[test]
    fn test_watchdog_reads_through_the_configured_store() {
        let dir = TempDir::new().unwrap();
        let mut config = directory_config(&dir);
        config.watch.min_cpu_percent = 50.0;

        let object = dir.path().join("store/logs/host/log.txt");
        fs::create_dir_all(object.parent().unwrap()).unwrap();
        fs::write(
            &object,
            "time_elapsed_s\tcpu_percent\tvirtual_memory_percent\tdisk_usage_percent\n\
             5.0\t30.0\t10.0\t10.0\n",
        )
        .unwrap();

        let logs = vec![WatchedLog::new("s3://logs/host/log.txt", None).unwrap()];
        let mut watchdog = build_watchdog(&config, logs).unwrap();
        let report = watchdog.check();
        assert_eq!(report.checks[0].problems, vec!["CPU usage below 50%: 30.00"]);
        assert!(dir.path().join("scratch").is_dir());
    }
}
