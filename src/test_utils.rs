//! Test doubles for the collaborator traits.
//!
//! Clones share state, so a test can keep one handle for inspection after
//! moving another into the code under test.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{Result, TaskwardenError};
use crate::identity::{IdentityProvider, MachineIdentity};
use crate::monitor::{CounterSource, Counters, StaticFacts};
use crate::notify::{Email, Transport};
use crate::upload::ObjectStore;

/// Scripted [`CounterSource`]. Replays its readings in order and then keeps
/// returning the last one.
#[derive(Clone)]
pub struct FakeCounters {
    script: Arc<Mutex<VecDeque<Counters>>>,
    last: Arc<Mutex<Counters>>,
    failing: Arc<AtomicBool>,
}

impl FakeCounters {
    pub fn scripted(readings: impl IntoIterator<Item = Counters>) -> Self {
        Self {
            script: Arc::new(Mutex::new(readings.into_iter().collect())),
            last: Arc::new(Mutex::new(Counters::default())),
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Always reports an idle host.
    pub fn idle() -> Self {
        Self::scripted([])
    }

    /// Every read fails.
    pub fn broken() -> Self {
        let fake = Self::idle();
        fake.set_failing(true);
        fake
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TaskwardenError::CounterUnavailable(
                "fake counters are failing".to_string(),
            ));
        }
        Ok(())
    }
}

impl CounterSource for FakeCounters {
    fn read_counters(&mut self) -> Result<Counters> {
        self.check()?;
        let mut last = self.last.lock().unwrap();
        if let Some(next) = self.script.lock().unwrap().pop_front() {
            *last = next;
        }
        Ok(*last)
    }

    fn read_static_facts(&mut self) -> Result<StaticFacts> {
        self.check()?;
        Ok(StaticFacts {
            cpu_count: 4,
            vm_total_bytes: 8 * 1024 * 1024 * 1024,
            swap_total_bytes: 1024 * 1024 * 1024,
            disk_total_bytes: 100 * 1024 * 1024 * 1024,
        })
    }
}

/// [`Transport`] that records every message it is asked to deliver.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    sent: Arc<Mutex<Vec<Email>>>,
    calls: Arc<AtomicUsize>,
    failing: bool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the call, then reports a delivery failure.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    /// Messages delivered successfully.
    pub fn sent(&self) -> Vec<Email> {
        self.sent.lock().unwrap().clone()
    }

    /// Delivery attempts, successful or not.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transport for RecordingTransport {
    fn name(&self) -> &str {
        "recording"
    }

    fn deliver(&self, email: &Email) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(TaskwardenError::Notify("relay unreachable".to_string()));
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

/// [`ObjectStore`] whose failures can be switched on and off.
#[derive(Clone)]
pub struct FlakyStore {
    failing: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
    completed: Arc<AtomicUsize>,
    delay: Duration,
}

impl FlakyStore {
    pub fn failing() -> Self {
        Self {
            failing: Arc::new(AtomicBool::new(true)),
            calls: Arc::new(AtomicUsize::new(0)),
            completed: Arc::new(AtomicUsize::new(0)),
            delay: Duration::ZERO,
        }
    }

    /// Every call succeeds after `delay`.
    pub fn slow(delay: Duration) -> Self {
        let store = Self::failing();
        store.set_failing(false);
        Self { delay, ..store }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Calls that have returned, successful or not.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    fn attempt(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.completed.fetch_add(1, Ordering::SeqCst);
        !self.failing.load(Ordering::SeqCst)
    }
}

impl ObjectStore for FlakyStore {
    fn upload(&self, local_path: &Path, _bucket: &str, _key: &str) -> Result<()> {
        if !self.attempt() {
            return Err(TaskwardenError::Upload {
                path: local_path.to_path_buf(),
                message: "network unreachable".to_string(),
            });
        }
        Ok(())
    }

    /// Writes an empty file when healthy.
    fn download(&self, bucket: &str, key: &str, local_path: &Path) -> Result<()> {
        if !self.attempt() {
            return Err(TaskwardenError::Download {
                location: format!("{bucket}/{key}"),
                message: "network unreachable".to_string(),
            });
        }
        std::fs::write(local_path, "")?;
        Ok(())
    }

    fn describe(&self) -> String {
        "flaky".to_string()
    }
}

/// [`IdentityProvider`] with a fixed answer.
pub struct FixedIdentity(pub MachineIdentity);

impl FixedIdentity {
    pub fn host(name: &str) -> Self {
        Self(MachineIdentity::Host(name.to_string()))
    }

    pub fn instance(id: &str) -> Self {
        Self(MachineIdentity::Instance(id.to_string()))
    }
}

impl IdentityProvider for FixedIdentity {
    fn resolve(&self) -> Result<MachineIdentity> {
        Ok(self.0.clone())
    }
}
