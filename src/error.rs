use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaskwardenError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid sampling interval: {0}s (must be a finite number greater than zero)")]
    InvalidInterval(f64),

    #[error("Failed to resolve machine identity: {0}")]
    Identity(String),

    #[error("Resource counter unavailable: {0}")]
    CounterUnavailable(String),

    #[error("Process already launched")]
    AlreadyLaunched,

    #[error("No command given to launch")]
    EmptyCommand,

    #[error("Failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Process error: {0}")]
    Process(String),

    #[error("Upload of {} failed: {message}", path.display())]
    Upload { path: PathBuf, message: String },

    #[error("Download of {location} failed: {message}")]
    Download { location: String, message: String },

    #[error("Notification failed: {0}")]
    Notify(String),

    #[error("Signal handler error: {0}")]
    SignalHandler(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize TOML: {0}")]
    TomlWrite(#[from] toml::ser::Error),
}

pub type Result<T> = std::result::Result<T, TaskwardenError>;
