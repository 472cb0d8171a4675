//! Error taxonomy of the delineation pipeline
//!
//! A run either fully succeeds or reports exactly one first-failure cause;
//! nothing here is ever downgraded to a warning.

use std::path::PathBuf;
use thiserror::Error;

/// Pipeline error type
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration, surfaced before any stage runs and never
    /// retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A declared input artifact is missing or empty before a stage.
    #[error("stage '{stage}' precondition failed: input {path} is missing or empty")]
    PreconditionFailure { stage: String, path: PathBuf },

    /// The external process exited non-zero.
    #[error("stage '{stage}' failed with exit code {code}")]
    StageExecutionFailure {
        stage: String,
        code: i32,
        diagnostics: String,
    },

    /// The external process reported success but a declared output artifact
    /// is missing or empty. Distinguished from `StageExecutionFailure`
    /// because it indicates a tool/contract mismatch rather than a
    /// computational failure.
    #[error("stage '{stage}' produced no output: {path} is missing or empty")]
    StageProducedNoOutput { stage: String, path: PathBuf },

    /// The stage executable could not be resolved.
    #[error("executable '{0}' not found")]
    ExecutableNotFound(String),

    /// The process could not be launched.
    #[error("failed to launch stage '{stage}': {source}")]
    Launch {
        stage: String,
        #[source]
        source: std::io::Error,
    },

    /// The run was cancelled cooperatively.
    #[error("pipeline run cancelled")]
    Cancelled,

    #[error(transparent)]
    Flow(#[from] hydroshed_flow::Error),

    #[error(transparent)]
    Core(#[from] hydroshed_core::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;
