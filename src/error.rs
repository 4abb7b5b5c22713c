//! Error types for the cradle supervisor.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for supervisor operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while supervising the main process.
#[derive(Error, Debug)]
pub enum Error {
    /// No main command was supplied
    #[error("No command passed to run")]
    NoCommand,

    /// The main process could not be spawned
    #[error("Failed to spawn process: {command}: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The environment file could not be read
    #[error("Failed to read env file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A hook directory could not be listed
    #[error("Failed to list hook directory {path}: {source}")]
    HookDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Signal registration error
    #[error("Signal error: {0}")]
    Signal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error ends the whole program.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::NoCommand | Error::SpawnFailed { .. })
    }
}
