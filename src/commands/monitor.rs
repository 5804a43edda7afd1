//! Monitor command handler.
//!
//! Samples the host on its own, without a supervised command, until Ctrl+C
//! or an optional duration runs out.

use std::time::{Duration, Instant};

use tracing::info;

use super::{
    build_sampler, identity_provider, init_logging, load_config, validate, wait_for_stop,
    CommonOptions, SamplingOverrides,
};
use crate::error::{Result, TaskwardenError};
use crate::monitor::HostCounters;
use crate::output::{print_monitor_started, print_monitor_stopped};
use crate::signal::{install_handler, interrupt_channel};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitorOptions {
    pub common: CommonOptions,
    pub sampling: SamplingOverrides,
    /// Stop after this many seconds.
    pub duration_secs: Option<f64>,
}

/// Sample host resources until interrupted.
pub fn monitor_command(options: MonitorOptions) -> Result<()> {
    let deadline = match options.duration_secs {
        Some(secs) if !secs.is_finite() || secs <= 0.0 => {
            return Err(TaskwardenError::Config(format!(
                "--duration must be a positive number of seconds, got {secs}"
            )))
        }
        Some(secs) => Some(Instant::now() + Duration::from_secs_f64(secs)),
        None => None,
    };

    let mut config = load_config(options.common.config.as_deref())?;
    options.sampling.apply(&mut config);
    validate(&config)?;
    init_logging(&options.common, &config)?;

    let (handle, interrupts) = interrupt_channel();
    install_handler(handle)?;

    let machine = identity_provider(config.cloud)?.resolve()?;
    let counters = HostCounters::for_mount_point(config.sampling.mount_point.clone());
    let sampler = build_sampler(&config, &machine, Box::new(counters))?;

    sampler.start()?;
    info!(log = %sampler.log_path().display(), machine = %machine, "monitoring");
    print_monitor_started(sampler.log_path(), sampler.interval());

    wait_for_stop(&interrupts, deadline);

    sampler.stop();
    sampler.join_uploader();
    print_monitor_stopped(sampler.log_path());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_positive_duration() {
        let options = MonitorOptions {
            duration_secs: Some(0.0),
            ..MonitorOptions::default()
        };
        let err = monitor_command(options).unwrap_err();
        assert!(err.to_string().contains("--duration"));
    }
}
