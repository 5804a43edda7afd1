//! Host resource sampling.
//!
//! The sampler reads host counters on a fixed interval and appends one row
//! per sample to a tab-separated log artifact:
//!
//! - [`metrics`]: metric and static-fact catalogues, raw counters, samples
//! - [`counters`]: the [`CounterSource`] seam and the live host source
//! - [`history`]: the bounded ring used as the delta baseline
//! - [`log_file`]: the on-disk artifact
//! - [`sampler`]: the background worker and its start/stop lifecycle
//! - [`watchdog`]: periodic health checks of uploaded logs

pub mod counters;
pub mod diskstats;
pub mod history;
pub mod log_file;
pub mod metrics;
pub mod sampler;
pub mod watchdog;

pub use counters::{CounterSource, HostCounters};
pub use history::HistoryRing;
pub use log_file::{log_file_name, LogArtifact};
pub use metrics::{Counters, Metric, Sample, StaticFact, StaticFacts};
pub use sampler::{Sampler, SamplerSettings};
pub use watchdog::{parse_source_list, Thresholds, WatchReport, WatchedLog, Watchdog};
