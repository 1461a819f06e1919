//! PDF
//!
//! PDF needs random access, so a PDF file named on the command line is handed
//! over whole through `process_file`. Streamed PDF is spooled like any other
//! job, header first.

use std::path::Path;

use crate::dispatch::cursor::Window;
use crate::dispatch::device::OutputDevice;
use crate::dispatch::error::{PdlError, PdlResult};
use crate::dispatch::implementation::{
    Characteristics, Implementation, ProcessStatus, UNIVERSAL_EXIT,
};

use super::spool::{Session, SpoolRules, Spooler};

const NAME: &str = "PDF";

/// File header, followed by the version number
pub const HEADER: &[u8] = b"%PDF-";

/// Spooling PDF implementation with direct-file support
#[derive(Debug, Clone)]
pub struct Pdf {
    session: Session,
    spooler: Spooler,
}

impl Default for Pdf {
    fn default() -> Self {
        Self::new()
    }
}

impl Pdf {
    /// Create an uninitialized instance
    pub fn new() -> Self {
        let rules = SpoolRules {
            header: Some(HEADER),
            end_of_job: None,
        };
        Self {
            session: Session::new(NAME),
            spooler: Spooler::new(NAME, rules),
        }
    }

    fn read_file(&self, path: &Path) -> PdlResult<Vec<u8>> {
        let data = std::fs::read(path)?;
        let body = data.strip_prefix(UNIVERSAL_EXIT).unwrap_or(&data);
        if !body.starts_with(HEADER) {
            return Err(PdlError::Syntax {
                offset: (data.len() - body.len()) as u64,
                detail: format!("{:?} is not a PDF file", path),
            });
        }
        Ok(data)
    }
}

impl Implementation for Pdf {
    fn characteristics(&self) -> Characteristics {
        Characteristics {
            language: NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            direct_file: true,
        }
    }

    fn auto_sense(&self, prefix: &[u8]) -> u32 {
        if prefix.starts_with(HEADER) { 100 } else { 0 }
    }

    fn initialize(&mut self, _device: &mut dyn OutputDevice) -> PdlResult<()> {
        self.session.initialize()
    }

    fn deinitialize(&mut self, _device: &mut dyn OutputDevice) -> PdlResult<()> {
        self.session.deinitialize()
    }

    fn begin_job(&mut self, _device: &mut dyn OutputDevice) -> PdlResult<()> {
        self.session.begin_job()?;
        self.spooler.reset();
        Ok(())
    }

    fn process(&mut self, input: &mut Window<'_>, device: &mut dyn OutputDevice) -> ProcessStatus {
        self.spooler.process(input, device)
    }

    fn process_eof(
        &mut self,
        input: &mut Window<'_>,
        device: &mut dyn OutputDevice,
    ) -> PdlResult<()> {
        self.spooler.finish(input, device)
    }

    fn end_job(&mut self, _device: &mut dyn OutputDevice) -> PdlResult<()> {
        self.session.end_job()
    }

    fn process_file(&mut self, path: &Path, device: &mut dyn OutputDevice) -> ProcessStatus {
        let data = match self.read_file(path) {
            Ok(data) => data,
            Err(error) => return ProcessStatus::Error(error),
        };
        tracing::debug!(path = ?path, bytes = data.len(), "PDF processed from file");
        match device.write(&data) {
            Ok(()) => ProcessStatus::BenignExit,
            Err(error) => ProcessStatus::Error(error.into()),
        }
    }
}
