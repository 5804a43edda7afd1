use std::path::PathBuf;
use std::process::ExitStatus;

use chrono::{DateTime, Utc};

use crate::identity::MachineIdentity;

/// Everything the final notification needs to know about one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub arguments: Vec<String>,
    pub machine: MachineIdentity,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub attachments: Vec<PathBuf>,
}

impl RunRecord {
    pub fn new(arguments: Vec<String>, machine: MachineIdentity) -> Self {
        Self {
            arguments,
            machine,
            started_at: Utc::now(),
            finished_at: None,
            attachments: Vec::new(),
        }
    }

    pub fn argument_string(&self) -> String {
        self.arguments.join(" ")
    }

    /// Minutes between start and finish (or now, while still running).
    pub fn elapsed_minutes(&self) -> f64 {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds() as f64 / 60_000.0
    }

    /// Plain-text notification body; `ending` is e.g. "has concluded".
    pub fn summary(&self, ending: &str) -> String {
        format!(
            "Process with the following arguments:\n\t{}\non {} {} after {:.2} minutes.\n",
            self.argument_string(),
            self.machine,
            ending,
            self.elapsed_minutes()
        )
    }
}

/// How a supervised run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// The child exited on its own.
    Completed {
        exit_status: ExitStatus,
        record: RunRecord,
    },
    /// The run was interrupted and the child killed.
    Terminated { record: RunRecord },
}

impl RunOutcome {
    pub fn record(&self) -> &RunRecord {
        match self {
            RunOutcome::Completed { record, .. } | RunOutcome::Terminated { record } => record,
        }
    }

    /// Exit code for this program: the child's own code when it completed,
    /// 1 when it was terminated or killed by a signal.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Completed { exit_status, .. } => exit_status.code().unwrap_or(1),
            RunOutcome::Terminated { .. } => 1,
        }
    }
}
