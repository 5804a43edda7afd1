//! Background resource sampler.
//!
//! A [`Sampler`] is built (and seeded) on the caller's thread, then
//! [`Sampler::start`] writes the log preamble and hands the counter source,
//! history ring and log writer to a dedicated thread. Nothing on the
//! supervising side touches them again; [`Sampler::stop`] only flips the
//! shared [`StopSignal`] and joins the sampling thread. The upload thread sees
//! the same signal but is joined separately with [`Sampler::join_uploader`],
//! since a final upload can take as long as the store does.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, warn};

use super::counters::CounterSource;
use super::history::HistoryRing;
use super::log_file::LogArtifact;
use super::metrics::{Sample, StaticFacts};
use crate::error::{Result, TaskwardenError};
use crate::signal::StopSignal;
use crate::upload::UploadScheduler;

/// Sampler construction parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerSettings {
    /// Directory the log artifact is written to; created on start.
    pub output_dir: PathBuf,
    /// Seconds between samples.
    pub interval_secs: f64,
    /// Seconds of history kept for the delta baseline.
    pub alarm_window_secs: f64,
    /// File name of the log artifact inside `output_dir`.
    pub log_file_name: String,
}

pub struct Sampler {
    log_path: PathBuf,
    output_dir: PathBuf,
    interval: Duration,
    stop: StopSignal,
    worker: Mutex<Option<SamplerWorker>>,
    uploader: Mutex<Option<UploadScheduler>>,
    sampling: Mutex<Option<JoinHandle<()>>>,
    uploading: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler")
            .field("log_path", &self.log_path)
            .field("interval", &self.interval)
            .field("stopped", &self.stop.is_requested())
            .finish()
    }
}

impl Sampler {
    /// Validates `settings`, captures the static facts and takes the seed
    /// sample that the first data row is measured against.
    ///
    /// # Errors
    ///
    /// - [`TaskwardenError::InvalidInterval`] if the interval is not a
    ///   positive finite number.
    /// - [`TaskwardenError::Config`] if the alarm window is negative.
    /// - Whatever the counter source reports if it cannot be read; the
    ///   sampler never falls back to zeros.
    pub fn new(settings: SamplerSettings, mut source: Box<dyn CounterSource>) -> Result<Self> {
        if !settings.interval_secs.is_finite() || settings.interval_secs <= 0.0 {
            return Err(TaskwardenError::InvalidInterval(settings.interval_secs));
        }
        if !settings.alarm_window_secs.is_finite() || settings.alarm_window_secs < 0.0 {
            return Err(TaskwardenError::Config(format!(
                "alarm window must be zero or more seconds, got {}",
                settings.alarm_window_secs
            )));
        }
        if settings.log_file_name.is_empty() {
            return Err(TaskwardenError::Config(
                "log file name must not be empty".to_string(),
            ));
        }

        let interval = Duration::from_secs_f64(settings.interval_secs);
        let alarm_window = Duration::from_secs_f64(settings.alarm_window_secs);

        let facts = source.read_static_facts()?;
        let seed = source.read_counters()?;
        let mut history = HistoryRing::new(HistoryRing::capacity_for(alarm_window, interval));
        history.push(Sample::from_counters(unix_seconds(), &seed));

        let worker = SamplerWorker {
            source,
            facts,
            history,
            interval,
            run_start: unix_seconds(),
        };

        Ok(Self {
            log_path: settings.output_dir.join(&settings.log_file_name),
            output_dir: settings.output_dir,
            interval,
            stop: StopSignal::new(),
            worker: Mutex::new(Some(worker)),
            uploader: Mutex::new(None),
            sampling: Mutex::new(None),
            uploading: Mutex::new(None),
        })
    }

    /// Runs `uploader` on its own thread for as long as the sampler runs.
    pub fn with_uploader(self, uploader: UploadScheduler) -> Self {
        *self.uploader.lock().unwrap_or_else(PoisonError::into_inner) = Some(uploader);
        self
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Writes the log preamble and starts the sampling thread (and the upload
    /// thread, if one is attached).
    ///
    /// Calling `start` a second time, or after [`Sampler::stop`], does
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the output directory or log file cannot be created
    /// or a thread cannot be spawned.
    pub fn start(&self) -> Result<()> {
        let mut sampling = self.sampling.lock().unwrap_or_else(PoisonError::into_inner);

        if self.stop.is_requested() {
            debug!("sampler stopped before it was started");
            return Ok(());
        }
        let Some(mut worker) = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            warn!("sampler already started");
            return Ok(());
        };

        fs::create_dir_all(&self.output_dir)?;
        let log = LogArtifact::create(&self.log_path, &worker.facts)?;
        info!(path = %self.log_path.display(), "writing resource usage log");

        worker.run_start = unix_seconds();
        let stop = self.stop.clone();
        let handle = thread::Builder::new()
            .name("taskwarden-sampler".to_string())
            .spawn(move || worker.run(log, &stop))?;
        *sampling = Some(handle);

        let uploader = self
            .uploader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(uploader) = uploader {
            let stop = self.stop.clone();
            let handle = thread::Builder::new()
                .name("taskwarden-upload".to_string())
                .spawn(move || uploader.run(&stop))?;
            *self.uploading.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        }

        Ok(())
    }

    /// Stops sampling and waits for the sampling thread to exit.
    ///
    /// Idempotent, callable from any thread and before [`Sampler::start`].
    /// Once any call returns no further rows are appended to the log: a
    /// concurrent call blocks until the in-flight tick has finished. The
    /// upload thread is signalled but not waited for.
    pub fn stop(&self) {
        self.stop.request();
        // The lock is held across the join so that a second caller cannot
        // return while the first is still waiting on the thread.
        let mut sampling = self.sampling.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = sampling.take() {
            if handle.join().is_err() {
                warn!("sampler thread panicked");
            }
        }
    }

    /// Waits for the upload thread to finish its current upload and exit.
    ///
    /// Only returns promptly after [`Sampler::stop`]; until then the thread
    /// keeps uploading.
    pub fn join_uploader(&self) {
        let handle = self
            .uploading
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("upload thread panicked");
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_requested()
    }
}

impl Drop for Sampler {
    // A pending upload thread is left to finish on its own.
    fn drop(&mut self) {
        self.stop();
    }
}

/// State owned by the sampling thread.
struct SamplerWorker {
    source: Box<dyn CounterSource>,
    facts: StaticFacts,
    history: HistoryRing,
    interval: Duration,
    run_start: f64,
}

impl SamplerWorker {
    fn run(mut self, mut log: LogArtifact, stop: &StopSignal) {
        let started = Instant::now();
        let mut deadline = started + self.interval;

        while !stop.wait_until(deadline) {
            if let Err(e) = self.tick(&mut log) {
                warn!(error = %e, "skipping resource sample");
            }

            // Deadlines are anchored to `started`, so slow ticks do not
            // accumulate drift.
            deadline += self.interval;
            let now = Instant::now();
            if deadline <= now {
                let behind = now - deadline;
                let skipped = (behind.as_secs_f64() / self.interval.as_secs_f64()).floor() as u32 + 1;
                deadline += self.interval * skipped;
                debug!(skipped, "sampler fell behind, skipping missed ticks");
            }
        }

        debug!(rows = log.rows(), "sampler stopped");
    }

    /// Takes one sample and appends its row.
    fn tick(&mut self, log: &mut LogArtifact) -> Result<()> {
        let counters = self.source.read_counters()?;
        let sample = Sample::from_counters(unix_seconds(), &counters);
        let row = match self.history.latest() {
            Some(previous) => sample.report(previous, self.run_start),
            None => sample.report(&sample, self.run_start),
        };
        self.history.push(sample);
        log.append(&row)
    }
}

fn unix_seconds() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::metrics::{Counters, Metric};
    use crate::test_utils::{FakeCounters, FlakyStore};
    use crate::upload::Destination;
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Counter source whose reads after the seed take `delay`.
    struct SlowCounters {
        inner: FakeCounters,
        reads: usize,
        delay: Duration,
    }

    impl CounterSource for SlowCounters {
        fn read_counters(&mut self) -> Result<Counters> {
            self.reads += 1;
            if self.reads > 1 {
                thread::sleep(self.delay);
            }
            self.inner.read_counters()
        }

        fn read_static_facts(&mut self) -> Result<StaticFacts> {
            self.inner.read_static_facts()
        }
    }

    fn uploader(store: &FlakyStore, log_path: &Path) -> UploadScheduler {
        UploadScheduler::new(
            Box::new(store.clone()),
            log_path.to_path_buf(),
            Destination {
                bucket: "logs".to_string(),
                key: "log_test.txt".to_string(),
            },
            Duration::from_millis(20),
        )
        .unwrap()
    }

    fn settings(dir: &Path, interval_secs: f64) -> SamplerSettings {
        SamplerSettings {
            output_dir: dir.join("out"),
            interval_secs,
            alarm_window_secs: 60.0,
            log_file_name: "log_test.txt".to_string(),
        }
    }

    fn read_ops(n: u64) -> Counters {
        Counters {
            disk_read_ops: n,
            ..Default::default()
        }
    }

    fn data_rows(path: &Path) -> Vec<Vec<f64>> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .skip(3)
            .map(|line| line.split('\t').map(|v| v.parse().unwrap()).collect())
            .collect()
    }

    #[test]
    fn test_rejects_non_positive_interval() {
        let dir = TempDir::new().unwrap();
        for interval in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let err = Sampler::new(settings(dir.path(), interval), Box::new(FakeCounters::idle()))
                .unwrap_err();
            assert!(matches!(err, TaskwardenError::InvalidInterval(_)));
        }
    }

    #[test]
    fn test_unreadable_counters_fail_construction() {
        let dir = TempDir::new().unwrap();
        let err = Sampler::new(settings(dir.path(), 1.0), Box::new(FakeCounters::broken()))
            .unwrap_err();
        assert!(matches!(err, TaskwardenError::CounterUnavailable(_)));
    }

    #[test]
    fn test_cumulative_counters_are_reported_as_deltas() {
        let dir = TempDir::new().unwrap();
        // Seed reading, then four ticks.
        let source = FakeCounters::scripted([0, 0, 100, 250, 400].map(read_ops));
        let sampler = Sampler::new(settings(dir.path(), 1.0), Box::new(source)).unwrap();

        std::fs::create_dir_all(sampler.output_dir()).unwrap();
        let mut worker = sampler.worker.lock().unwrap().take().unwrap();
        let mut log = LogArtifact::create(sampler.log_path(), &worker.facts).unwrap();
        for _ in 0..4 {
            worker.tick(&mut log).unwrap();
        }

        let deltas: Vec<f64> = data_rows(sampler.log_path())
            .iter()
            .map(|row| row[Metric::IoActivityReadCount.ordinal()])
            .collect();
        assert_eq!(deltas, vec![0.0, 100.0, 150.0, 150.0]);
    }

    #[test]
    fn test_history_stays_within_capacity() {
        let dir = TempDir::new().unwrap();
        let mut s = settings(dir.path(), 10.0);
        s.alarm_window_secs = 30.0;
        let sampler = Sampler::new(s, Box::new(FakeCounters::idle())).unwrap();

        std::fs::create_dir_all(sampler.output_dir()).unwrap();
        let mut worker = sampler.worker.lock().unwrap().take().unwrap();
        assert_eq!(worker.history.capacity(), 3);
        let mut log = LogArtifact::create(sampler.log_path(), &worker.facts).unwrap();
        for _ in 0..10 {
            worker.tick(&mut log).unwrap();
            assert!(worker.history.len() <= 3);
        }
        assert_eq!(log.rows(), 10);
    }

    #[test]
    fn test_stop_before_start_is_harmless() {
        let dir = TempDir::new().unwrap();
        let sampler = Sampler::new(settings(dir.path(), 0.05), Box::new(FakeCounters::idle())).unwrap();
        sampler.stop();
        sampler.stop();
        sampler.start().unwrap();
        assert!(sampler.is_stopped());
        assert!(!sampler.log_path().exists());
    }

    #[test]
    fn test_running_sampler_writes_rows_until_stopped() {
        let dir = TempDir::new().unwrap();
        let sampler = Sampler::new(settings(dir.path(), 0.02), Box::new(FakeCounters::idle())).unwrap();
        sampler.start().unwrap();
        // Second start is a no-op.
        sampler.start().unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        while data_rows(sampler.log_path()).len() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        sampler.stop();
        sampler.stop();

        let rows_at_stop = data_rows(sampler.log_path()).len();
        assert!(rows_at_stop >= 3);
        thread::sleep(Duration::from_millis(100));
        assert_eq!(data_rows(sampler.log_path()).len(), rows_at_stop);

        let contents = std::fs::read_to_string(sampler.log_path()).unwrap();
        let static_headers = contents
            .lines()
            .filter(|line| line.starts_with("cpu_total\t"))
            .count();
        assert_eq!(static_headers, 1);
        assert!(contents.lines().next().unwrap().starts_with("cpu_total\t"));
        assert!(contents.lines().nth(2).unwrap().starts_with("time_elapsed_s\t"));

        let elapsed: Vec<f64> = data_rows(sampler.log_path()).iter().map(|r| r[0]).collect();
        assert!(elapsed.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_stop_from_another_thread_is_prompt() {
        let dir = TempDir::new().unwrap();
        let sampler = std::sync::Arc::new(
            Sampler::new(settings(dir.path(), 3600.0), Box::new(FakeCounters::idle())).unwrap(),
        );
        sampler.start().unwrap();

        let remote = std::sync::Arc::clone(&sampler);
        let started = Instant::now();
        thread::spawn(move || remote.stop()).join().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(data_rows(sampler.log_path()).is_empty());
    }

    #[test]
    fn test_failed_tick_is_skipped() {
        let dir = TempDir::new().unwrap();
        let source = FakeCounters::scripted([read_ops(0), read_ops(10)]);
        let failing = source.clone();
        let sampler = Sampler::new(settings(dir.path(), 1.0), Box::new(source)).unwrap();

        std::fs::create_dir_all(sampler.output_dir()).unwrap();
        let mut worker = sampler.worker.lock().unwrap().take().unwrap();
        let mut log = LogArtifact::create(sampler.log_path(), &worker.facts).unwrap();

        failing.set_failing(true);
        assert!(worker.tick(&mut log).is_err());
        failing.set_failing(false);
        worker.tick(&mut log).unwrap();

        let rows = data_rows(sampler.log_path());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][Metric::IoActivityReadCount.ordinal()], 10.0);
    }

    #[test]
    fn test_concurrent_stop_waits_for_in_flight_tick() {
        let dir = TempDir::new().unwrap();
        let source = SlowCounters {
            inner: FakeCounters::idle(),
            reads: 0,
            delay: Duration::from_millis(500),
        };
        let sampler = Arc::new(Sampler::new(settings(dir.path(), 0.01), Box::new(source)).unwrap());
        sampler.start().unwrap();

        // Let the first tick get stuck in its slow read.
        thread::sleep(Duration::from_millis(100));
        let first = Arc::clone(&sampler);
        let first_stop = thread::spawn(move || first.stop());
        thread::sleep(Duration::from_millis(50));

        sampler.stop();
        let rows_at_stop = data_rows(sampler.log_path()).len();
        assert!(rows_at_stop <= 1);

        thread::sleep(Duration::from_millis(700));
        assert_eq!(data_rows(sampler.log_path()).len(), rows_at_stop);
        first_stop.join().unwrap();
    }

    #[test]
    fn test_stop_does_not_wait_for_slow_upload() {
        let dir = TempDir::new().unwrap();
        let store = FlakyStore::slow(Duration::from_secs(2));
        let s = settings(dir.path(), 0.02);
        let log_path = s.output_dir.join(&s.log_file_name);
        let sampler = Sampler::new(s, Box::new(FakeCounters::idle()))
            .unwrap()
            .with_uploader(uploader(&store, &log_path));
        sampler.start().unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        while store.calls() == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(store.calls(), 1);

        let started = Instant::now();
        sampler.stop();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(store.completed(), 0);
    }

    #[test]
    fn test_join_uploader_waits_for_in_flight_upload() {
        let dir = TempDir::new().unwrap();
        let store = FlakyStore::slow(Duration::from_millis(300));
        let s = settings(dir.path(), 0.02);
        let log_path = s.output_dir.join(&s.log_file_name);
        let sampler = Sampler::new(s, Box::new(FakeCounters::idle()))
            .unwrap()
            .with_uploader(uploader(&store, &log_path));
        sampler.start().unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        while store.calls() == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        sampler.stop();
        sampler.join_uploader();
        assert_eq!(store.completed(), store.calls());
        assert!(store.completed() >= 1);

        // Nothing left to join.
        sampler.join_uploader();
    }
}
