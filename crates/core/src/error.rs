use std::path::PathBuf;

use thiserror::Error;

/// Every failure the condition engine can report.
///
/// None of these escape [`Condition::test`]-style calls; they are routed to an
/// [`ErrorSink`](crate::ErrorSink) instead.
#[derive(Error, Debug)]
pub enum GateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The script text could not be compiled.
    #[error("failed to compile condition '{name}': {message}")]
    Compile { name: String, message: String },

    /// The compiled script failed at runtime.
    #[error("failed to evaluate condition '{name}': {message}")]
    Evaluate { name: String, message: String },

    /// The script ran but did not produce a boolean.
    #[error("condition '{name}' produced {kind}, expected a boolean")]
    NonBoolean { name: String, kind: String },

    /// The backing file of a script source is gone or unreadable.
    #[error("no readable script source at {}", path.display())]
    NoSource { path: PathBuf },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Watch error: {0}")]
    Watch(String),

    #[error("Config error: {0}")]
    Config(String),

    /// The owning watcher/store has already been shut down.
    #[error("{0} is closed")]
    Closed(String),
}

/// Result alias for condition engine operations.
pub type Result<T> = std::result::Result<T, GateError>;
