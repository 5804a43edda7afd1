//! Rendering of the resource log into an image attachment.
//!
//! Plotting itself is left to an external program; this module only runs it
//! and finds the image it produced.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, warn};

/// Produces a summary image for a finished log.
pub trait PlotRenderer: Send + Sync {
    /// Returns the rendered image path, or `None` if nothing was produced.
    fn render(&self, log_path: &Path, output_dir: &Path) -> Option<PathBuf>;
}

/// Runs `<program> <args...> <log_path> <output_dir>`.
///
/// The image path is taken from the last non-empty line the command prints
/// to stdout. If it prints nothing, `<output_dir>/<log stem>.png` is used
/// when it exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRenderer {
    program: String,
    args: Vec<String>,
}

impl CommandRenderer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Splits a whitespace-separated command line. Returns `None` for an
    /// empty command.
    pub fn from_command_line(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }
}

impl PlotRenderer for CommandRenderer {
    fn render(&self, log_path: &Path, output_dir: &Path) -> Option<PathBuf> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(log_path)
            .arg(output_dir)
            .stdin(Stdio::null())
            .stderr(Stdio::inherit())
            .output();

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                warn!(program = %self.program, error = %e, "could not run plot renderer");
                return None;
            }
        };
        if !output.status.success() {
            warn!(program = %self.program, status = %output.status, "plot renderer failed");
            return None;
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let candidate = match stdout.lines().rev().map(str::trim).find(|l| !l.is_empty()) {
            Some(line) => PathBuf::from(line),
            None => {
                let stem = log_path.file_stem()?;
                output_dir.join(stem).with_extension("png")
            }
        };

        if candidate.is_file() {
            debug!(path = %candidate.display(), "rendered resource plot");
            Some(candidate)
        } else {
            warn!(path = %candidate.display(), "plot renderer did not produce an image");
            None
        }
    }
}
