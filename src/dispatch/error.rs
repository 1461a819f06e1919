//! Error types for the dispatcher
//!
//! Fatal conditions abort a run and are modelled by [`DispatchError`].
//! Interpreter-reported failures are [`PdlError`]s; inside a job they are
//! recoverable and only become fatal when raised by a lifecycle switch.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level fatal error for a dispatch run
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Byte source could not be opened or refilled
    #[error("I/O error at offset {offset}: {source}")]
    Io {
        /// Stream offset at the time of failure
        offset: u64,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Input file could not be opened
    #[error("Cannot open {path:?}: {source}")]
    Open {
        /// Path that failed to open
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Switching implementations failed
    #[error("Switch from {from} to {to} failed during {stage}: {source}")]
    Switch {
        /// Implementation being left ("none" if nothing was current)
        from: String,
        /// Implementation being entered
        to: String,
        /// Which half of the switch failed
        stage: SwitchStage,
        /// Interpreter error
        #[source]
        source: PdlError,
    },

    /// Reverting to the control layer after a job failed
    #[error("Revert to control layer from {from} failed during {stage}: {source}")]
    Revert {
        /// Implementation that was current
        from: String,
        /// Which half of the switch failed
        stage: SwitchStage,
        /// Interpreter error
        #[source]
        source: PdlError,
    },

    /// A job bracket (begin/end) failed
    #[error("{language} failed to {stage} job {job}: {source}")]
    Job {
        /// Implementation name
        language: String,
        /// Index of the job within the run
        job: usize,
        /// Bracket that failed
        stage: JobStage,
        /// Interpreter error
        #[source]
        source: PdlError,
    },

    /// A job step ran with no implementation current
    #[error("No implementation is current")]
    NoCurrentImplementation,

    /// The output device failed outside of an interpreter call
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    /// A language name that no registered implementation answers to
    #[error("Unknown language '{0}'")]
    UnknownLanguage(String),

    /// Registry construction failed
    #[error("Registry error: {0}")]
    Registry(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DispatchError {
    pub(crate) fn io(offset: u64, source: io::Error) -> Self {
        Self::Io { offset, source }
    }
}

/// Half of an implementation switch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchStage {
    /// Tearing down the outgoing implementation
    Deinitialize,
    /// Bringing up the incoming implementation
    Initialize,
}

impl std::fmt::Display for SwitchStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SwitchStage::Deinitialize => f.write_str("deinitialize"),
            SwitchStage::Initialize => f.write_str("initialize"),
        }
    }
}

/// Job bracket operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStage {
    /// `begin_job`
    Begin,
    /// `end_job`
    End,
}

impl std::fmt::Display for JobStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStage::Begin => f.write_str("begin"),
            JobStage::End => f.write_str("end"),
        }
    }
}

/// Result type using DispatchError
pub type DispatchResult<T> = std::result::Result<T, DispatchError>;

/// Errors reported by interpreter implementations
#[derive(Debug, Error)]
pub enum PdlError {
    /// Input could not be parsed
    #[error("Syntax error at offset {offset}: {detail}")]
    Syntax {
        /// Stream offset of the offending input
        offset: u64,
        /// Description of the problem
        detail: String,
    },

    /// Operation not supported by this implementation
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Operation called out of lifecycle order
    #[error("Lifecycle violation: {0}")]
    Lifecycle(String),

    /// Output device failure
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Any other interpreter-specific failure
    #[error("{0}")]
    Other(String),
}

/// Convenience result alias for interpreter operations
pub type PdlResult<T> = std::result::Result<T, PdlError>;

/// Output device errors
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Write attempted with no open job
    #[error("No job is open on device {0}")]
    NoOpenJob(String),

    /// A job was opened while another is still open
    #[error("Job {0} is still open")]
    JobStillOpen(usize),

    /// Spool write failed
    #[error("Spool write failed for {path}: {detail}")]
    SpoolFailed {
        /// Path being written
        path: PathBuf,
        /// Error details
        detail: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Convenience result alias for device operations
pub type DeviceResult<T> = std::result::Result<T, DeviceError>;
