use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of one supervised run.
///
/// `Idle -> Launching -> Running -> {Completed, Terminated}`. The two
/// terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunState {
    Idle = 0,
    Launching = 1,
    Running = 2,
    Completed = 3,
    Terminated = 4,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed | RunState::Terminated)
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => RunState::Idle,
            1 => RunState::Launching,
            2 => RunState::Running,
            3 => RunState::Completed,
            _ => RunState::Terminated,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Launching => "launching",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Atomic holder for a [`RunState`]; every change is a compare-and-set.
#[derive(Debug)]
pub struct RunStateCell(AtomicU8);

impl RunStateCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(RunState::Idle as u8))
    }

    pub fn get(&self) -> RunState {
        RunState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Moves `from -> to`. Returns `false`, changing nothing, if the current
    /// state is not `from`.
    pub fn transition(&self, from: RunState, to: RunState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

impl Default for RunStateCell {
    fn default() -> Self {
        Self::new()
    }
}
