//! Runs one child process to completion (or interruption) and reports on it.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::record::{RunOutcome, RunRecord};
use super::state::{RunState, RunStateCell};
use crate::error::{Result, TaskwardenError};
use crate::identity::{IdentityProvider, MachineIdentity};
use crate::monitor::Sampler;
use crate::notify::Notifier;
use crate::render::PlotRenderer;
use crate::signal::InterruptReceiver;

/// How often the supervising thread checks the child for exit.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub const CONCLUDED_SUBJECT: &str = "Process concluded";
pub const TERMINATED_SUBJECT: &str = "Process terminated";

/// What to run and where its output goes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandSpec {
    pub argv: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn stdout(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout = Some(path.into());
        self
    }

    pub fn stderr(mut self, path: impl Into<PathBuf>) -> Self {
        self.stderr = Some(path.into());
        self
    }

    fn command(&self) -> Result<Command> {
        let (program, args) = self.argv.split_first().ok_or(TaskwardenError::EmptyCommand)?;
        let mut command = Command::new(program);
        command.args(args).stdin(Stdio::inherit());
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        if let Some(path) = &self.stdout {
            command.stdout(redirect(path)?);
        }
        if let Some(path) = &self.stderr {
            command.stderr(redirect(path)?);
        }
        Ok(command)
    }
}

fn redirect(path: &Path) -> Result<Stdio> {
    let file = File::create(path).map_err(|e| {
        TaskwardenError::Process(format!("cannot redirect output to {}: {e}", path.display()))
    })?;
    Ok(Stdio::from(file))
}

/// Supervises a single child process.
///
/// One instance runs at most one child. The resource sampler is started just
/// before the child and stopped before its log is read for attachments. The
/// run ends either when the child exits (a "Process concluded" notification)
/// or when an interrupt arrives (a "Process terminated" notification, then
/// the child is killed). A single compare-and-set on the run state decides
/// which of the two happens.
pub struct Supervisor {
    notifier: Notifier,
    machine: MachineIdentity,
    interrupts: InterruptReceiver,
    sampler: Option<Sampler>,
    renderer: Option<Box<dyn PlotRenderer>>,
    state: RunStateCell,
    child: Mutex<Option<Child>>,
}

impl Supervisor {
    /// Resolves the machine identity once, up front.
    ///
    /// # Errors
    ///
    /// Returns the identity provider's error, e.g. when cloud identity was
    /// requested off-cloud.
    pub fn new(
        notifier: Notifier,
        identity: &dyn IdentityProvider,
        interrupts: InterruptReceiver,
    ) -> Result<Self> {
        let machine = identity.resolve()?;
        debug!(machine = %machine, "resolved machine identity");
        Ok(Self {
            notifier,
            machine,
            interrupts,
            sampler: None,
            renderer: None,
            state: RunStateCell::new(),
            child: Mutex::new(None),
        })
    }

    pub fn with_sampler(mut self, sampler: Sampler) -> Self {
        self.sampler = Some(sampler);
        self
    }

    pub fn with_renderer(mut self, renderer: Box<dyn PlotRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn state(&self) -> RunState {
        self.state.get()
    }

    pub fn machine(&self) -> &MachineIdentity {
        &self.machine
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn sampler(&self) -> Option<&Sampler> {
        self.sampler.as_ref()
    }

    /// Launches `spec` and blocks until the run ends.
    ///
    /// # Errors
    ///
    /// - [`TaskwardenError::EmptyCommand`] if `spec.argv` is empty.
    /// - [`TaskwardenError::AlreadyLaunched`] on a second call.
    /// - [`TaskwardenError::Launch`] if the child cannot be spawned. The
    ///   sampler is stopped and no notification is sent.
    pub fn launch(&self, spec: &CommandSpec) -> Result<RunOutcome> {
        if spec.argv.is_empty() {
            return Err(TaskwardenError::EmptyCommand);
        }
        if !self.state.transition(RunState::Idle, RunState::Launching) {
            return Err(TaskwardenError::AlreadyLaunched);
        }

        let mut record = RunRecord::new(spec.argv.clone(), self.machine.clone());
        info!(command = %record.argument_string(), "launching");

        if let Some(sampler) = &self.sampler {
            if let Err(e) = sampler.start() {
                warn!(error = %e, "resource sampling unavailable for this run");
            }
        }

        let child = match spec.command().and_then(|mut command| {
            command.spawn().map_err(|source| TaskwardenError::Launch {
                program: spec.argv[0].clone(),
                source,
            })
        }) {
            Ok(child) => child,
            Err(e) => {
                self.stop_sampler();
                self.state.transition(RunState::Launching, RunState::Terminated);
                return Err(e);
            }
        };
        debug!(pid = child.id(), "child started");
        record.started_at = Utc::now();
        *self.child.lock().unwrap_or_else(PoisonError::into_inner) = Some(child);
        self.state.transition(RunState::Launching, RunState::Running);

        loop {
            let status = match self.poll_child() {
                Ok(status) => status,
                Err(e) => return Err(self.abandon_run(record, e)),
            };
            match status {
                ChildStatus::Exited(status) => {
                    if let Some(outcome) = self.finish_completed(record.clone(), status) {
                        return Ok(outcome);
                    }
                }
                ChildStatus::Gone => {
                    if let Some(outcome) = self.finish_terminated(record.clone()) {
                        return Ok(outcome);
                    }
                }
                ChildStatus::Running => {}
            }
            if self.interrupts.wait(POLL_INTERVAL) {
                if let Some(outcome) = self.finish_terminated(record.clone()) {
                    return Ok(outcome);
                }
            }
            if self.state().is_terminal() {
                return Err(TaskwardenError::Process(format!(
                    "run was finalized elsewhere ({})",
                    self.state()
                )));
            }
        }
    }

    fn poll_child(&self) -> Result<ChildStatus> {
        let mut guard = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(child) = guard.as_mut() else {
            return Ok(ChildStatus::Gone);
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                guard.take();
                Ok(ChildStatus::Exited(status))
            }
            Ok(None) => Ok(ChildStatus::Running),
            Err(e) => Err(TaskwardenError::Process(format!(
                "failed to check child status: {e}"
            ))),
        }
    }

    fn finish_completed(&self, mut record: RunRecord, exit_status: ExitStatus) -> Option<RunOutcome> {
        if !self.state.transition(RunState::Running, RunState::Completed) {
            return None;
        }
        record.finished_at = Some(Utc::now());
        info!(status = %exit_status, "process concluded");

        self.stop_sampler();
        record.attachments = self.collect_attachments();
        self.notifier.send(
            CONCLUDED_SUBJECT,
            &record.summary("has concluded"),
            &record.attachments,
        );

        Some(RunOutcome::Completed {
            exit_status,
            record,
        })
    }

    fn finish_terminated(&self, mut record: RunRecord) -> Option<RunOutcome> {
        if !self.state.transition(RunState::Running, RunState::Terminated) {
            return None;
        }
        record.finished_at = Some(Utc::now());
        warn!("run interrupted, notifying and killing the child process");

        self.stop_sampler();
        record.attachments = self.collect_attachments();
        self.notifier.send(
            TERMINATED_SUBJECT,
            &record.summary("was terminated"),
            &record.attachments,
        );
        if let Err(e) = self.kill_child() {
            warn!(error = %e, "failed to kill child process");
        }

        Some(RunOutcome::Terminated { record })
    }

    /// Ends a run whose child can no longer be watched as a terminated run,
    /// then hands `error` back to the caller.
    fn abandon_run(&self, record: RunRecord, error: TaskwardenError) -> TaskwardenError {
        warn!(error = %error, "lost track of the child process");
        self.finish_terminated(record);
        error
    }

    fn stop_sampler(&self) {
        if let Some(sampler) = &self.sampler {
            sampler.stop();
        }
    }

    /// Resource log and, when a renderer is configured, its plot.
    fn collect_attachments(&self) -> Vec<PathBuf> {
        let Some(sampler) = &self.sampler else {
            return Vec::new();
        };
        let log_path = sampler.log_path();
        if !log_path.is_file() {
            return Vec::new();
        }

        let mut attachments = vec![log_path.to_path_buf()];
        if let Some(renderer) = &self.renderer {
            attachments.extend(renderer.render(log_path, sampler.output_dir()));
        }
        attachments
    }

    /// Kills the child process and stops the sampler.
    ///
    /// Safe to call from another thread and more than once. Returns
    /// `Ok(true)` if a process was killed, `Ok(false)` if none was running.
    pub fn kill(&self) -> Result<bool> {
        let killed = self.kill_child()?;
        self.stop_sampler();
        if !killed {
            warn!("no running process to kill");
        }
        Ok(killed)
    }

    fn kill_child(&self) -> Result<bool> {
        let mut guard = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(mut child) = guard.take() else {
            return Ok(false);
        };
        if let Err(e) = child.kill() {
            // Already exited
            if e.kind() != std::io::ErrorKind::InvalidInput {
                return Err(TaskwardenError::Process(format!(
                    "failed to kill process {}: {e}",
                    child.id()
                )));
            }
        }
        // Reap to avoid a zombie
        if let Err(e) = child.wait() {
            debug!(pid = child.id(), error = %e, "failed to reap child process");
        }
        Ok(true)
    }
}

enum ChildStatus {
    Running,
    Exited(ExitStatus),
    /// Taken by [`Supervisor::kill`] from another thread.
    Gone,
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::monitor::SamplerSettings;
    use crate::signal::{interrupt_channel, InterruptHandle};
    use crate::test_utils::{FakeCounters, FixedIdentity, RecordingTransport};
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;
    use tempfile::TempDir;

    fn supervisor(transport: &RecordingTransport) -> (Supervisor, InterruptHandle) {
        let (handle, receiver) = interrupt_channel();
        let notifier = Notifier::new(
            "runner@example.com",
            vec!["ops@example.com".to_string()],
            Box::new(transport.clone()),
        );
        let supervisor = Supervisor::new(notifier, &FixedIdentity::host("build01"), receiver).unwrap();
        (supervisor, handle)
    }

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new(["sh", "-c", script])
    }

    #[test]
    fn test_natural_exit_sends_one_concluded_notification() {
        let transport = RecordingTransport::new();
        let (supervisor, _handle) = supervisor(&transport);

        let outcome = supervisor.launch(&sh("exit 0")).unwrap();

        assert!(matches!(outcome, RunOutcome::Completed { .. }));
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(supervisor.state(), RunState::Completed);
        assert_eq!(supervisor.notifier().attempts(), 1);

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "<automated> Process concluded");
        assert!(sent[0].body.contains("sh -c exit 0"));
        assert!(sent[0].body.contains("local machine build01 has concluded"));
    }

    #[test]
    fn test_child_exit_code_is_reported() {
        let transport = RecordingTransport::new();
        let (supervisor, _handle) = supervisor(&transport);
        let outcome = supervisor.launch(&sh("exit 7")).unwrap();
        assert_eq!(outcome.exit_code(), 7);
    }

    #[test]
    fn test_second_launch_is_rejected() {
        let transport = RecordingTransport::new();
        let (supervisor, _handle) = supervisor(&transport);
        supervisor.launch(&sh("true")).unwrap();

        let err = supervisor.launch(&sh("true")).unwrap_err();
        assert!(matches!(err, TaskwardenError::AlreadyLaunched));
        assert_eq!(transport.calls(), 1);
    }

    #[test]
    fn test_empty_command_is_rejected() {
        let transport = RecordingTransport::new();
        let (supervisor, _handle) = supervisor(&transport);
        let err = supervisor.launch(&CommandSpec::default()).unwrap_err();
        assert!(matches!(err, TaskwardenError::EmptyCommand));
        assert_eq!(supervisor.state(), RunState::Idle);
    }

    #[test]
    fn test_spawn_failure_is_reported_without_notification() {
        let transport = RecordingTransport::new();
        let (supervisor, _handle) = supervisor(&transport);

        let err = supervisor
            .launch(&CommandSpec::new(["/definitely/not/a/program"]))
            .unwrap_err();

        assert!(matches!(err, TaskwardenError::Launch { .. }));
        assert_eq!(transport.calls(), 0);
        assert!(supervisor.state().is_terminal());
    }

    #[test]
    fn test_interrupt_sends_terminated_notification_and_kills_child() {
        let transport = RecordingTransport::new();
        let (supervisor, handle) = supervisor(&transport);

        let interrupter = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            handle.interrupt();
        });
        let started = Instant::now();
        let outcome = supervisor.launch(&sh("sleep 30")).unwrap();
        interrupter.join().unwrap();

        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(matches!(outcome, RunOutcome::Terminated { .. }));
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(supervisor.state(), RunState::Terminated);

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "<automated> Process terminated");
        assert!(!supervisor.kill().unwrap());
    }

    #[test]
    fn test_interrupt_racing_exit_notifies_exactly_once() {
        for _ in 0..5 {
            let transport = RecordingTransport::new();
            let (supervisor, handle) = supervisor(&transport);
            handle.interrupt();

            let outcome = supervisor.launch(&sh("true")).unwrap();

            assert!(outcome.record().finished_at.is_some());
            assert_eq!(supervisor.notifier().attempts(), 1);
            assert_eq!(transport.calls(), 1);
            assert!(supervisor.state().is_terminal());
        }
    }

    #[test]
    fn test_unwatchable_child_is_terminated_and_reported() {
        let transport = RecordingTransport::new();
        let (supervisor, _handle) = supervisor(&transport);
        assert!(supervisor.state.transition(RunState::Idle, RunState::Launching));
        let child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        *supervisor.child.lock().unwrap() = Some(child);
        assert!(supervisor.state.transition(RunState::Launching, RunState::Running));

        let argv = vec!["sleep".to_string(), "30".to_string()];
        let record = RunRecord::new(argv, supervisor.machine.clone());
        let err = supervisor.abandon_run(
            record,
            TaskwardenError::Process("failed to check child status".to_string()),
        );

        assert!(matches!(err, TaskwardenError::Process(_)));
        assert_eq!(supervisor.state(), RunState::Terminated);
        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "<automated> Process terminated");
        // Already killed and reaped.
        assert!(!supervisor.kill().unwrap());
    }

    #[test]
    fn test_kill_without_child_returns_false() {
        let transport = RecordingTransport::new();
        let (supervisor, _handle) = supervisor(&transport);
        assert!(!supervisor.kill().unwrap());
        assert!(!supervisor.kill().unwrap());
    }

    #[test]
    fn test_kill_from_another_thread_ends_the_run_once() {
        let transport = RecordingTransport::new();
        let (supervisor, _handle) = supervisor(&transport);
        let supervisor = Arc::new(supervisor);

        let remote = Arc::clone(&supervisor);
        let killer = thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(10);
            while remote.state() != RunState::Running && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            remote.kill().unwrap()
        });

        let outcome = supervisor.launch(&sh("sleep 30")).unwrap();
        assert!(killer.join().unwrap());
        assert!(supervisor.state().is_terminal());
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(transport.calls(), 1);
    }

    #[test]
    fn test_stdout_is_redirected_to_file() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("stdout.txt");
        let transport = RecordingTransport::new();
        let (supervisor, _handle) = supervisor(&transport);

        supervisor
            .launch(&sh("echo hello from child").stdout(&out).working_dir(dir.path()))
            .unwrap();

        assert_eq!(std::fs::read_to_string(&out).unwrap(), "hello from child\n");
    }

    #[test]
    fn test_sampler_log_is_attached_after_stop() {
        let dir = TempDir::new().unwrap();
        let settings = SamplerSettings {
            output_dir: dir.path().join("logs"),
            interval_secs: 0.02,
            alarm_window_secs: 1.0,
            log_file_name: "log_run.txt".to_string(),
        };
        let sampler = Sampler::new(settings, Box::new(FakeCounters::idle())).unwrap();
        let log_path = sampler.log_path().to_path_buf();

        let transport = RecordingTransport::new();
        let (supervisor, _handle) = supervisor(&transport);
        let supervisor = supervisor.with_sampler(sampler);

        let outcome = supervisor.launch(&sh("sleep 0.2")).unwrap();

        assert_eq!(outcome.record().attachments, vec![log_path.clone()]);
        assert!(supervisor.sampler().unwrap().is_stopped());

        let sent = transport.sent();
        assert_eq!(sent[0].attachments.len(), 1);
        assert_eq!(sent[0].attachments[0].file_name, "log_run.txt");
        let attached = String::from_utf8(sent[0].attachments[0].content.clone()).unwrap();
        assert_eq!(attached, std::fs::read_to_string(&log_path).unwrap());
    }
}
