//! PCL XL (PCL 6)
//!
//! Every job must open with the stream header; a job that does not is failed
//! at its first byte and flushed.

use crate::dispatch::cursor::Window;
use crate::dispatch::device::OutputDevice;
use crate::dispatch::error::PdlResult;
use crate::dispatch::implementation::{Characteristics, Implementation, ProcessStatus};

use super::spool::{Session, SpoolRules, Spooler};

const NAME: &str = "PCLXL";

/// Stream header preceding the binding and protocol class
pub const STREAM_HEADER: &[u8] = b") HP-PCL XL;";

/// Spooling PCL XL implementation
#[derive(Debug, Clone)]
pub struct PclXl {
    session: Session,
    spooler: Spooler,
}

impl Default for PclXl {
    fn default() -> Self {
        Self::new()
    }
}

impl PclXl {
    /// Create an uninitialized instance
    pub fn new() -> Self {
        let rules = SpoolRules {
            header: Some(STREAM_HEADER),
            end_of_job: None,
        };
        Self {
            session: Session::new(NAME),
            spooler: Spooler::new(NAME, rules),
        }
    }
}

impl Implementation for PclXl {
    fn characteristics(&self) -> Characteristics {
        Characteristics {
            language: NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            direct_file: false,
        }
    }

    fn auto_sense(&self, prefix: &[u8]) -> u32 {
        if prefix.starts_with(STREAM_HEADER) { 100 } else { 0 }
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
}
