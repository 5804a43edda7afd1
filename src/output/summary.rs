//! End-of-run and monitor summaries.
//!
//! Written to stderr; the supervised command owns stdout.

use std::path::Path;
use std::time::Duration;

use super::colors::*;
use crate::monitor::WatchReport;
use crate::process::RunOutcome;

/// One-line description of how a run ended, without colors.
pub fn format_outcome_line(outcome: &RunOutcome) -> String {
    let record = outcome.record();
    match outcome {
        RunOutcome::Completed { exit_status, .. } => match exit_status.code() {
            Some(code) => format!(
                "concluded with exit code {code} after {:.2} minutes",
                record.elapsed_minutes()
            ),
            None => format!(
                "concluded by signal after {:.2} minutes",
                record.elapsed_minutes()
            ),
        },
        RunOutcome::Terminated { .. } => format!(
            "was terminated after {:.2} minutes",
            record.elapsed_minutes()
        ),
    }
}

/// Print the summary shown after `taskwarden run` finishes.
pub fn print_run_summary(outcome: &RunOutcome, log_path: Option<&Path>, notified: bool) {
    let record = outcome.record();
    let color = match outcome {
        RunOutcome::Completed { .. } if outcome.exit_code() == 0 => GREEN,
        RunOutcome::Completed { .. } => YELLOW,
        RunOutcome::Terminated { .. } => RED,
    };

    eprintln!();
    eprintln!(
        "{BOLD}{}{RESET} {color}{}{RESET}",
        record.argument_string(),
        format_outcome_line(outcome)
    );
    eprintln!("{GRAY}on {}{RESET}", record.machine);
    if let Some(path) = log_path {
        eprintln!("{DIM}Resource log:{RESET} {}", path.display());
    }
    for attachment in &record.attachments {
        eprintln!("{DIM}Attached:{RESET} {}", attachment.display());
    }
    if !notified {
        eprintln!("{YELLOW}No notification was sent.{RESET}");
    }
}

/// Print where `taskwarden monitor` is writing.
pub fn print_monitor_started(log_path: &Path, interval: Duration) {
    eprintln!(
        "{CYAN}Sampling every {:.1}s to{RESET} {BOLD}{}{RESET}",
        interval.as_secs_f64(),
        log_path.display()
    );
    eprintln!("{GRAY}Press Ctrl+C to stop.{RESET}");
}

pub fn print_monitor_stopped(log_path: &Path) {
    eprintln!("{GREEN}Sampling stopped.{RESET} Log kept at {}", log_path.display());
}

/// Print one line per checked log, with its problems underneath.
pub fn print_watch_report(report: &WatchReport) {
    eprintln!(
        "{GRAY}Checked {} log(s) at {}{RESET}",
        report.checks.len(),
        report.checked_at.format("%Y-%m-%d %H:%M:%S")
    );
    for check in &report.checks {
        let (color, mark) = if check.problems.is_empty() {
            (GREEN, "ok")
        } else {
            (RED, "!!")
        };
        let rows = check
            .summary
            .as_ref()
            .map(|summary| format!(" {DIM}({} rows){RESET}", summary.rows))
            .unwrap_or_default();
        eprintln!(
            "{color}{mark}{RESET} {BOLD}{}{RESET} {GRAY}{}{RESET}{rows}",
            check.id, check.location
        );
        for problem in &check.problems {
            eprintln!("   {YELLOW}{problem}{RESET}");
        }
    }
}
