//! Child process supervision.
//!
//! [`Supervisor`] launches one child, runs the resource sampler alongside it
//! and sends exactly one notification when the run ends.

mod record;
mod state;
mod supervisor;

pub use record::{RunOutcome, RunRecord};
pub use state::{RunState, RunStateCell};
pub use supervisor::{CommandSpec, Supervisor, CONCLUDED_SUBJECT, TERMINATED_SUBJECT};
