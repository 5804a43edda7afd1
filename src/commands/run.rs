//! Run command handler.
//!
//! Supervises one command: samples the host while it runs, uploads the
//! resource log as configured, and sends a single notification when the
//! command concludes or taskwarden is interrupted.

use std::path::PathBuf;

use tracing::info;

use super::{
    build_notifier, build_sampler, identity_provider, init_logging, load_config, validate,
    CommonOptions, SamplingOverrides,
};
use crate::config::{Config, TransportKind};
use crate::error::Result;
use crate::monitor::{HostCounters, Sampler};
use crate::output::{print_run_summary, print_warning};
use crate::process::{CommandSpec, Supervisor};
use crate::render::CommandRenderer;
use crate::signal::{install_handler, interrupt_channel};

/// Everything `taskwarden run` accepts on the command line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOptions {
    pub common: CommonOptions,
    pub sampling: SamplingOverrides,
    /// Replaces the configured recipients when non-empty.
    pub recipients: Vec<String>,
    pub sender: Option<String>,
    pub transport: Option<TransportKind>,
    pub no_sampling: bool,
    pub plot_command: Option<String>,
    pub working_dir: Option<PathBuf>,
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
    /// The command and its arguments.
    pub command: Vec<String>,
}

impl RunOptions {
    /// Applies the command-line overrides on top of the config file.
    pub fn apply(&self, config: &mut Config) {
        self.sampling.apply(config);
        if !self.recipients.is_empty() {
            config.notify.recipients = self.recipients.clone();
        }
        if let Some(sender) = &self.sender {
            config.notify.sender = sender.clone();
        }
        if let Some(transport) = self.transport {
            config.notify.transport = transport;
        }
        if self.no_sampling {
            config.sampling.enabled = false;
        }
        if let Some(command) = &self.plot_command {
            config.plot_command = Some(command.clone());
        }
    }

    pub fn command_spec(&self) -> CommandSpec {
        CommandSpec {
            argv: self.command.clone(),
            working_dir: self.working_dir.clone(),
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
        }
    }
}

/// Run a command under supervision.
///
/// # Returns
///
/// * `Ok(code)` with the exit code taskwarden should exit with: the
///   command's own code when it concluded, 1 when it was terminated
/// * `Err(TaskwardenError)` if configuration, identity or launch fail
pub fn run_command(options: RunOptions) -> Result<i32> {
    let mut config = load_config(options.common.config.as_deref())?;
    options.apply(&mut config);
    validate(&config)?;
    init_logging(&options.common, &config)?;

    let (handle, interrupts) = interrupt_channel();
    install_handler(handle)?;

    if config.notify.recipients.is_empty() {
        print_warning("No recipients configured; this run will not be reported by email.");
    }

    let identity = identity_provider(config.cloud)?;
    let notifier = build_notifier(&config.notify)?;
    let mut supervisor = Supervisor::new(notifier, identity.as_ref(), interrupts)?;

    if config.sampling.enabled {
        let counters = HostCounters::for_mount_point(config.sampling.mount_point.clone());
        let sampler = build_sampler(&config, supervisor.machine(), Box::new(counters))?;
        supervisor = supervisor.with_sampler(sampler);
    }
    if let Some(renderer) = config
        .plot_command
        .as_deref()
        .and_then(CommandRenderer::from_command_line)
    {
        supervisor = supervisor.with_renderer(Box::new(renderer));
    }

    let spec = options.command_spec();
    info!(command = %spec.argv.join(" "), machine = %supervisor.machine(), "launching");
    let outcome = supervisor.launch(&spec)?;

    print_run_summary(
        &outcome,
        supervisor.sampler().map(Sampler::log_path),
        supervisor.notifier().attempts() > 0,
    );
    // The notification is out; let the last upload finish before exiting.
    if let Some(sampler) = supervisor.sampler() {
        sampler.join_uploader();
    }
    Ok(outcome.exit_code())
}
