//! Supervise a long-running command, record host resource usage while it
//! runs, and send one notification when it ends.
//!
//! The pieces are usable on their own: [`monitor::Sampler`] writes the
//! resource log, [`upload::UploadScheduler`] ships it, [`notify::Notifier`]
//! delivers the summary and [`process::Supervisor`] ties them to a child
//! process.

pub mod commands;
pub mod config;
pub mod error;
pub mod identity;
pub mod logging;
pub mod monitor;
pub mod notify;
pub mod output;
pub mod process;
pub mod render;
pub mod signal;
pub mod upload;

#[cfg(test)]
pub(crate) mod test_utils;

pub use error::{Result, TaskwardenError};
pub use process::{CommandSpec, RunOutcome, Supervisor};
