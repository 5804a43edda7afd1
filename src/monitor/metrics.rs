//! Metric definitions and the per-tick [`Sample`].
//!
//! Column order in the log artifact comes from the explicit ordinals on
//! [`Metric`] and [`StaticFact`], never from map iteration order.

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Time-series columns, in log order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    TimeElapsedS = 0,
    CpuPercent = 1,
    VirtualMemoryPercent = 2,
    SwapMemoryPercent = 3,
    IoActivityReadMb = 4,
    IoActivityWriteMb = 5,
    IoActivityReadCount = 6,
    IoActivityWriteCount = 7,
    DiskUsagePercent = 8,
}

impl Metric {
    pub const COUNT: usize = 9;

    pub const ALL: [Metric; Self::COUNT] = [
        Metric::TimeElapsedS,
        Metric::CpuPercent,
        Metric::VirtualMemoryPercent,
        Metric::SwapMemoryPercent,
        Metric::IoActivityReadMb,
        Metric::IoActivityWriteMb,
        Metric::IoActivityReadCount,
        Metric::IoActivityWriteCount,
        Metric::DiskUsagePercent,
    ];

    pub const fn ordinal(self) -> usize {
        self as usize
    }

    pub const fn header(self) -> &'static str {
        match self {
            Metric::TimeElapsedS => "time_elapsed_s",
            Metric::CpuPercent => "cpu_percent",
            Metric::VirtualMemoryPercent => "virtual_memory_percent",
            Metric::SwapMemoryPercent => "swap_memory_percent",
            Metric::IoActivityReadMb => "io_activity_read_mb",
            Metric::IoActivityWriteMb => "io_activity_write_mb",
            Metric::IoActivityReadCount => "io_activity_read_count",
            Metric::IoActivityWriteCount => "io_activity_write_count",
            Metric::DiskUsagePercent => "disk_usage_percent",
        }
    }

    /// Counters that only ever grow since boot and must be reported as
    /// per-interval deltas.
    pub const fn is_cumulative(self) -> bool {
        matches!(
            self,
            Metric::IoActivityReadMb
                | Metric::IoActivityWriteMb
                | Metric::IoActivityReadCount
                | Metric::IoActivityWriteCount
        )
    }
}

/// Static header columns, in log order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StaticFact {
    CpuTotal = 0,
    VirtualMemoryTotalGb = 1,
    SwapMemoryTotalGb = 2,
    DiskUsageTotalGb = 3,
}

impl StaticFact {
    pub const COUNT: usize = 4;

    pub const ALL: [StaticFact; Self::COUNT] = [
        StaticFact::CpuTotal,
        StaticFact::VirtualMemoryTotalGb,
        StaticFact::SwapMemoryTotalGb,
        StaticFact::DiskUsageTotalGb,
    ];

    pub const fn header(self) -> &'static str {
        match self {
            StaticFact::CpuTotal => "cpu_total",
            StaticFact::VirtualMemoryTotalGb => "virtual_memory_total_gb",
            StaticFact::SwapMemoryTotalGb => "swap_memory_total_gb",
            StaticFact::DiskUsageTotalGb => "disk_usage_total_gb",
        }
    }
}

/// Raw readings from a counter source. Byte and operation counts are
/// cumulative since boot.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Counters {
    pub cpu_percent: f64,
    pub vm_percent: f64,
    pub swap_percent: f64,
    pub disk_read_bytes: u64,
    pub disk_write_bytes: u64,
    pub disk_read_ops: u64,
    pub disk_write_ops: u64,
    pub disk_usage_percent: f64,
}

/// Host facts captured once when the sampler is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StaticFacts {
    pub cpu_count: usize,
    pub vm_total_bytes: u64,
    pub swap_total_bytes: u64,
    pub disk_total_bytes: u64,
}

impl StaticFacts {
    /// Value of `fact` in the units written to the log.
    pub fn value(&self, fact: StaticFact) -> f64 {
        match fact {
            StaticFact::CpuTotal => self.cpu_count as f64,
            StaticFact::VirtualMemoryTotalGb => self.vm_total_bytes as f64 / BYTES_PER_GB,
            StaticFact::SwapMemoryTotalGb => self.swap_total_bytes as f64 / BYTES_PER_GB,
            StaticFact::DiskUsageTotalGb => self.disk_total_bytes as f64 / BYTES_PER_GB,
        }
    }
}

/// One measurement, with every value already in log units.
///
/// Before [`Sample::report`] the elapsed-time slot holds the absolute unix
/// timestamp and the cumulative slots hold totals since boot.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    values: [f64; Metric::COUNT],
}

impl Sample {
    pub fn from_counters(timestamp_s: f64, counters: &Counters) -> Self {
        let mut values = [0.0; Metric::COUNT];
        values[Metric::TimeElapsedS.ordinal()] = timestamp_s;
        values[Metric::CpuPercent.ordinal()] = counters.cpu_percent;
        values[Metric::VirtualMemoryPercent.ordinal()] = counters.vm_percent;
        values[Metric::SwapMemoryPercent.ordinal()] = counters.swap_percent;
        values[Metric::IoActivityReadMb.ordinal()] = counters.disk_read_bytes as f64 / BYTES_PER_MB;
        values[Metric::IoActivityWriteMb.ordinal()] =
            counters.disk_write_bytes as f64 / BYTES_PER_MB;
        values[Metric::IoActivityReadCount.ordinal()] = counters.disk_read_ops as f64;
        values[Metric::IoActivityWriteCount.ordinal()] = counters.disk_write_ops as f64;
        values[Metric::DiskUsagePercent.ordinal()] = counters.disk_usage_percent;
        Self { values }
    }

    pub fn get(&self, metric: Metric) -> f64 {
        self.values[metric.ordinal()]
    }

    /// Unix timestamp (seconds) the sample was taken at.
    pub fn timestamp(&self) -> f64 {
        self.get(Metric::TimeElapsedS)
    }

    /// Values in column order.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Builds the row that gets written for this sample: cumulative counters
    /// become deltas against `previous` and the timestamp becomes seconds
    /// since `run_start`.
    pub fn report(&self, previous: &Sample, run_start: f64) -> Sample {
        let mut values = self.values;
        for metric in Metric::ALL {
            let slot = &mut values[metric.ordinal()];
            if metric.is_cumulative() {
                // Summed disk counters can shrink when a device goes away.
                *slot = (*slot - previous.get(metric)).max(0.0);
            } else if metric == Metric::TimeElapsedS {
                *slot -= run_start;
            }
        }
        Sample { values }
    }
}
