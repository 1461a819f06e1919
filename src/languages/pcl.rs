//! PCL 5

use crate::dispatch::cursor::Window;
use crate::dispatch::device::OutputDevice;
use crate::dispatch::error::PdlResult;
use crate::dispatch::implementation::{Characteristics, Implementation, ProcessStatus};

use super::spool::{Session, SpoolRules, Spooler};

const NAME: &str = "PCL";
const ESC: u8 = 0x1b;

/// PCL printer reset, the conventional first command of a job
const RESET: &[u8] = b"\x1bE";

/// Spooling PCL implementation
#[derive(Debug, Clone)]
pub struct Pcl {
    session: Session,
    spooler: Spooler,
}

impl Default for Pcl {
    fn default() -> Self {
        Self::new()
    }
}

impl Pcl {
    /// Create an uninitialized instance
    pub fn new() -> Self {
        Self {
            session: Session::new(NAME),
            spooler: Spooler::new(NAME, SpoolRules::default()),
        }
    }
}

impl Implementation for Pcl {
    fn characteristics(&self) -> Characteristics {
        Characteristics {
            language: NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            direct_file: false,
        }
    }

    fn auto_sense(&self, prefix: &[u8]) -> u32 {
        if prefix.starts_with(RESET) {
            80
        } else if prefix.first() == Some(&ESC) {
            40
        } else {
            0
        }
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
        tracing::trace!(bytes = self.spooler.written(), "PCL job spooled");
        self.session.end_job()
    }
}
