//! PostScript
//!
//! Jobs end at a Universal Exit or at the `^D` end-of-job byte used on
//! serial and parallel channels. Leading `^D`s are skipped.

use crate::dispatch::cursor::Window;
use crate::dispatch::device::OutputDevice;
use crate::dispatch::error::PdlResult;
use crate::dispatch::implementation::{Characteristics, Implementation, ProcessStatus};

use super::spool::{Session, SpoolRules, Spooler};

const NAME: &str = "POSTSCRIPT";

/// Control-D, PostScript end of job
pub const END_OF_JOB: u8 = 0x04;

/// Spooling PostScript implementation
#[derive(Debug, Clone)]
pub struct PostScript {
    session: Session,
    spooler: Spooler,
}

impl Default for PostScript {
    fn default() -> Self {
        Self::new()
    }
}

impl PostScript {
    /// Create an uninitialized instance
    pub fn new() -> Self {
        let rules = SpoolRules {
            header: None,
            end_of_job: Some(END_OF_JOB),
        };
        Self {
            session: Session::new(NAME),
            spooler: Spooler::new(NAME, rules),
        }
    }
}

impl Implementation for PostScript {
    fn characteristics(&self) -> Characteristics {
        Characteristics {
            language: NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            direct_file: false,
        }
    }

    fn auto_sense(&self, prefix: &[u8]) -> u32 {
        match prefix {
            [b'%', b'!', ..] => 100,
            [END_OF_JOB, b'%', b'!', ..] => 90,
            _ => 0,
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
        self.session.end_job()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::cursor::ByteCursor;
    use crate::dispatch::device::{MemoryDevice, OutputDevice};

    #[test]
    fn test_scores() {
        let ps = PostScript::new();
        assert_eq!(ps.auto_sense(b"%!PS-Adobe-3.0"), 100);
        assert_eq!(ps.auto_sense(b"\x04%!"), 90);
        assert_eq!(ps.auto_sense(b"%PDF-1.4"), 0);
    }

    #[test]
    fn test_control_d_ends_job() {
        let mut ps = PostScript::new();
        let mut device = MemoryDevice::new();
        ps.initialize(&mut device).unwrap();
        device.open_job(0, NAME).unwrap();
        ps.begin_job(&mut device).unwrap();

        let mut cursor = ByteCursor::from_bytes(b"\x04%!\nshowpage\n\x04%!second".to_vec());
        let status = ps.process(&mut cursor.window(), &mut device);
        assert!(matches!(status, ProcessStatus::BenignExit));
        assert_eq!(cursor.available(), b"%!second");

        ps.end_job(&mut device).unwrap();
        device.close_job().unwrap();
        assert_eq!(device.jobs()[0].data, b"%!\nshowpage\n");
    }
}
