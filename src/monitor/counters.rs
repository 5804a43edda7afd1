//! Host resource counter sources.
//!
//! [`CounterSource`] is the seam between the sampler and the operating
//! system. [`HostCounters`] reads the live host through `sysinfo` plus
//! platform-specific disk I/O totals.

use std::path::PathBuf;

use sysinfo::{Disks, System};

use super::metrics::{Counters, StaticFacts};
use crate::error::{Result, TaskwardenError};

/// Supplies raw resource readings to the sampler.
pub trait CounterSource: Send {
    /// Reads the current gauges and cumulative counters.
    fn read_counters(&mut self) -> Result<Counters>;

    /// Reads the host facts that do not change while the sampler runs.
    fn read_static_facts(&mut self) -> Result<StaticFacts>;
}

/// Live host counters.
pub struct HostCounters {
    sys: System,
    mount_point: PathBuf,
}

impl HostCounters {
    /// Reads disk usage for the root filesystem.
    pub fn new() -> Self {
        Self::for_mount_point("/")
    }

    /// Reads disk usage for the filesystem mounted at `mount_point`.
    pub fn for_mount_point(mount_point: impl Into<PathBuf>) -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        // CPU usage is measured between refreshes; prime the first one.
        sys.refresh_cpu_all();
        Self {
            sys,
            mount_point: mount_point.into(),
        }
    }

    /// Returns `(total, available)` bytes for the configured mount point.
    fn disk_space(&self) -> Result<(u64, u64)> {
        let disks = Disks::new_with_refreshed_list();
        disks
            .list()
            .iter()
            .find(|disk| disk.mount_point() == self.mount_point.as_path())
            .map(|disk| (disk.total_space(), disk.available_space()))
            .ok_or_else(|| {
                TaskwardenError::CounterUnavailable(format!(
                    "no filesystem mounted at {}",
                    self.mount_point.display()
                ))
            })
    }
}

impl Default for HostCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterSource for HostCounters {
    fn read_counters(&mut self) -> Result<Counters> {
        self.sys.refresh_memory();
        self.sys.refresh_cpu_usage();

        let io = read_disk_io()?;
        let (disk_total, disk_available) = self.disk_space()?;

        Ok(Counters {
            cpu_percent: f64::from(self.sys.global_cpu_usage()),
            vm_percent: percent_used(
                self.sys.total_memory(),
                self.sys.total_memory().saturating_sub(self.sys.available_memory()),
            ),
            swap_percent: percent_used(self.sys.total_swap(), self.sys.used_swap()),
            disk_read_bytes: io.read_bytes,
            disk_write_bytes: io.write_bytes,
            disk_read_ops: io.read_ops,
            disk_write_ops: io.write_ops,
            disk_usage_percent: percent_used(disk_total, disk_total.saturating_sub(disk_available)),
        })
    }

    fn read_static_facts(&mut self) -> Result<StaticFacts> {
        self.sys.refresh_memory();
        let cpu_count = self.sys.cpus().len();
        if cpu_count == 0 {
            return Err(TaskwardenError::CounterUnavailable(
                "host reports no CPUs".to_string(),
            ));
        }
        let (disk_total, _) = self.disk_space()?;

        Ok(StaticFacts {
            cpu_count,
            vm_total_bytes: self.sys.total_memory(),
            swap_total_bytes: self.sys.total_swap(),
            disk_total_bytes: disk_total,
        })
    }
}

fn percent_used(total: u64, used: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        used as f64 / total as f64 * 100.0
    }
}

#[cfg(target_os = "linux")]
fn read_disk_io() -> Result<super::diskstats::DiskIo> {
    super::diskstats::read_disk_io()
}

#[cfg(not(target_os = "linux"))]
fn read_disk_io() -> Result<super::diskstats::DiskIo> {
    Err(TaskwardenError::CounterUnavailable(
        "disk I/O counters are only implemented for Linux".to_string(),
    ))
}
