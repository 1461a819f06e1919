//! Interpreter implementation contract
//!
//! Every page-description language, and the resident control layer, plugs into
//! the dispatcher through [`Implementation`]. The dispatcher only ever talks to
//! implementations through this trait; their internals are their own.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::cursor::Window;
use super::device::OutputDevice;
use super::error::{PdlError, PdlResult};

/// Universal Exit Language marker: ends a job and returns control to the control layer
pub const UNIVERSAL_EXIT: &[u8] = b"\x1b%-12345X";

/// Static description of an implementation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Characteristics {
    /// Language name, matched case-insensitively by selections
    pub language: String,
    /// Implementation version
    pub version: String,
    /// Whether `process_file` is available
    pub direct_file: bool,
}

/// Status returned by [`Implementation::process`]
#[derive(Debug)]
pub enum ProcessStatus {
    /// The window is exhausted (or ends mid-token); refill and call again
    NeedInput,
    /// Input was consumed; call again with the same window
    Progress,
    /// The job's data is complete; the next unread byte belongs to another job
    BenignExit,
    /// The job failed; the remainder of the job must be flushed
    Error(PdlError),
}

/// Result of one [`Implementation::flush_to_job_boundary`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// The cursor sits on the next job boundary
    Found,
    /// Boundary not yet seen; refill and call again
    NotFound,
}

/// Uniform lifecycle and processing contract for interpreters
///
/// Call order per switch is `initialize`, then any number of
/// `begin_job` .. `end_job` brackets, then `deinitialize`. Within a bracket the
/// dispatcher calls `process` (and possibly `process_eof` or
/// `flush_to_job_boundary`) or, for a direct-file job, `process_file`.
pub trait Implementation {
    /// Name, version, and capabilities
    fn characteristics(&self) -> Characteristics;

    /// Language name
    fn name(&self) -> String {
        self.characteristics().language
    }

    /// Confidence that `prefix` is in this language; 0 means no match
    ///
    /// Must be a pure function of `prefix`.
    fn auto_sense(&self, prefix: &[u8]) -> u32;

    /// Whether whole files can be handed to [`Implementation::process_file`]
    fn supports_direct_file(&self) -> bool {
        self.characteristics().direct_file
    }

    /// Bind to the output device and prepare for jobs
    fn initialize(&mut self, device: &mut dyn OutputDevice) -> PdlResult<()>;

    /// Release everything acquired by `initialize`
    fn deinitialize(&mut self, device: &mut dyn OutputDevice) -> PdlResult<()>;

    /// Start a job
    fn begin_job(&mut self, device: &mut dyn OutputDevice) -> PdlResult<()>;

    /// Consume bytes from the window
    fn process(&mut self, input: &mut Window<'_>, device: &mut dyn OutputDevice)
        -> ProcessStatus;

    /// The source ended while this job was open; consume what is left if possible
    fn process_eof(
        &mut self,
        _input: &mut Window<'_>,
        _device: &mut dyn OutputDevice,
    ) -> PdlResult<()> {
        Ok(())
    }

    /// Finish the job, flushing any pending output
    fn end_job(&mut self, device: &mut dyn OutputDevice) -> PdlResult<()>;

    /// Discard input up to the next job boundary
    ///
    /// The default skips to the next Universal Exit and leaves it unread.
    fn flush_to_job_boundary(&mut self, input: &mut Window<'_>) -> FlushOutcome {
        skip_to_universal_exit(input)
    }

    /// Interpret a whole file as one job
    fn process_file(&mut self, path: &Path, _device: &mut dyn OutputDevice) -> ProcessStatus {
        ProcessStatus::Error(PdlError::Unsupported(format!(
            "{} cannot process {:?} directly",
            self.name(),
            path
        )))
    }

    /// Describe a recovered job error
    ///
    /// `verbose` asks for any extended diagnostics the implementation keeps.
    fn report_errors(&self, error: &PdlError, offset: u64, verbose: bool) -> String {
        let _ = verbose;
        format!("{} error at offset {}: {}", self.name(), offset, error)
    }

    /// Control-layer view, present only on the control layer
    fn as_control_layer(&self) -> Option<&dyn ControlLayer> {
        None
    }
}

/// Variable store exposed by the control layer
pub trait ControlLayer {
    /// Current value of a job-environment variable
    fn get_variable(&self, name: &str) -> Option<String>;
}

/// Whether `data` starts with the Universal Exit marker
pub fn starts_with_universal_exit(data: &[u8]) -> bool {
    data.starts_with(UNIVERSAL_EXIT)
}

/// Whether `data` is a non-empty proper prefix of the Universal Exit marker
pub fn is_partial_universal_exit(data: &[u8]) -> bool {
    !data.is_empty() && data.len() < UNIVERSAL_EXIT.len() && UNIVERSAL_EXIT.starts_with(data)
}

/// Offset of the first Universal Exit in `data`
pub fn find_universal_exit(data: &[u8]) -> Option<usize> {
    data.windows(UNIVERSAL_EXIT.len())
        .position(|window| window == UNIVERSAL_EXIT)
}

/// Length of the longest suffix of `data` that could begin a Universal Exit
pub fn partial_exit_suffix(data: &[u8]) -> usize {
    let max = data.len().min(UNIVERSAL_EXIT.len() - 1);
    (1..=max)
        .rev()
        .find(|&n| UNIVERSAL_EXIT.starts_with(&data[data.len() - n..]))
        .unwrap_or(0)
}

/// Consume up to the next Universal Exit, keeping a possible partial marker unread
pub fn skip_to_universal_exit(input: &mut Window<'_>) -> FlushOutcome {
    let rest = input.remaining();
    if let Some(at) = find_universal_exit(rest) {
        input.consume(at);
        return FlushOutcome::Found;
    }
    let keep = partial_exit_suffix(rest);
    input.consume(rest.len() - keep);
    FlushOutcome::NotFound
}
