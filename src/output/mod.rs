//! Terminal output formatting for taskwarden.
//!
//! - [`messages`] - Error and warning messages
//! - [`summary`] - Run, monitor and watch summaries

pub mod messages;
pub mod summary;

/// ANSI color codes for terminal output.
pub mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const BLUE: &str = "\x1b[34m";
    pub const CYAN: &str = "\x1b[36m";
    pub const RED: &str = "\x1b[31m";
    pub const GRAY: &str = "\x1b[90m";
}

// Re-export colors at module level for convenience
pub use colors::*;

pub use messages::{print_error, print_warning};
pub use summary::{
    format_outcome_line, print_monitor_started, print_monitor_stopped, print_run_summary,
    print_watch_report,
};
