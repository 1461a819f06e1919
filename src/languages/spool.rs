//! Job plumbing shared by the bundled implementations
//!
//! [`Session`] enforces the initialize / job / deinitialize call order.
//! [`Spooler`] copies a job's bytes to the output device until the next job
//! boundary, checking an optional stream header on the way in.

use crate::dispatch::cursor::Window;
use crate::dispatch::device::OutputDevice;
use crate::dispatch::error::{PdlError, PdlResult};
use crate::dispatch::implementation::{
    ProcessStatus, UNIVERSAL_EXIT, find_universal_exit, is_partial_universal_exit,
    partial_exit_suffix, starts_with_universal_exit,
};

/// Lifecycle bookkeeping for one implementation
#[derive(Debug, Clone)]
pub(crate) struct Session {
    name: &'static str,
    initialized: bool,
    in_job: bool,
}

impl Session {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            initialized: false,
            in_job: false,
        }
    }

    pub(crate) fn initialize(&mut self) -> PdlResult<()> {
        if self.initialized {
            return Err(self.violation("initialized twice"));
        }
        self.initialized = true;
        Ok(())
    }

    /// Deinitialize, abandoning any open job
    pub(crate) fn deinitialize(&mut self) -> PdlResult<()> {
        if !self.initialized {
            return Err(self.violation("deinitialized while not initialized"));
        }
        if self.in_job {
            tracing::warn!(language = self.name, "deinitialized with a job still open");
        }
        self.initialized = false;
        self.in_job = false;
        Ok(())
    }

    pub(crate) fn begin_job(&mut self) -> PdlResult<()> {
        if !self.initialized {
            return Err(self.violation("job started before initialize"));
        }
        if self.in_job {
            return Err(self.violation("job started inside another job"));
        }
        self.in_job = true;
        Ok(())
    }

    pub(crate) fn end_job(&mut self) -> PdlResult<()> {
        if !self.in_job {
            return Err(self.violation("job ended without being started"));
        }
        self.in_job = false;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn violation(&self, what: &str) -> PdlError {
        PdlError::Lifecycle(format!("{} {}", self.name, what))
    }
}

/// How a spooled language recognises the edges of its jobs
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SpoolRules {
    /// Bytes every job must begin with
    pub header: Option<&'static [u8]>,
    /// In-band end-of-job byte
    pub end_of_job: Option<u8>,
}

enum Start {
    Ready,
    NeedInput,
    Failed(PdlError),
}

/// Copies job bytes to the device up to the next job boundary
#[derive(Debug, Clone)]
pub(crate) struct Spooler {
    language: &'static str,
    rules: SpoolRules,
    started: bool,
    skipped_exit: bool,
    written: u64,
}

impl Spooler {
    pub(crate) fn new(language: &'static str, rules: SpoolRules) -> Self {
        Self {
            language,
            rules,
            started: false,
            skipped_exit: false,
            written: 0,
        }
    }

    /// Forget the previous job
    pub(crate) fn reset(&mut self) {
        self.started = false;
        self.skipped_exit = false;
        self.written = 0;
    }

    /// Bytes written for the current job
    pub(crate) fn written(&self) -> u64 {
        self.written
    }

    pub(crate) fn process(
        &mut self,
        input: &mut Window<'_>,
        device: &mut dyn OutputDevice,
    ) -> ProcessStatus {
        if !self.started {
            match self.start(input) {
                Start::Ready => {}
                Start::NeedInput => return ProcessStatus::NeedInput,
                Start::Failed(error) => return ProcessStatus::Error(error),
            }
        }

        let data = input.remaining();
        let (end, boundary) = match find_universal_exit(data) {
            Some(at) => (at, true),
            None if input.at_end_of_data() => (data.len(), false),
            None => (data.len() - partial_exit_suffix(data), false),
        };

        if let Some(eoj) = self.rules.end_of_job {
            if let Some(at) = data[..end].iter().position(|&b| b == eoj) {
                if let Err(error) = self.emit(&data[..at], device) {
                    return ProcessStatus::Error(error);
                }
                input.consume(at + 1);
                return ProcessStatus::BenignExit;
            }
        }

        if let Err(error) = self.emit(&data[..end], device) {
            return ProcessStatus::Error(error);
        }
        input.consume(end);

        if boundary {
            ProcessStatus::BenignExit
        } else {
            ProcessStatus::NeedInput
        }
    }

    /// Take whatever the source left behind as the tail of the job
    pub(crate) fn finish(
        &mut self,
        input: &mut Window<'_>,
        device: &mut dyn OutputDevice,
    ) -> PdlResult<()> {
        let rest = input.remaining();
        if rest.is_empty() {
            return Ok(());
        }
        if !self.started {
            if let Some(header) = self.rules.header {
                if !rest.starts_with(header) {
                    return Err(self.missing_header(input.position(), header));
                }
            }
            self.started = true;
        }
        self.emit(rest, device)?;
        input.consume_all();
        Ok(())
    }

    fn start(&mut self, input: &mut Window<'_>) -> Start {
        loop {
            let data = input.remaining();

            if !self.skipped_exit && starts_with_universal_exit(data) {
                input.consume(UNIVERSAL_EXIT.len());
                self.skipped_exit = true;
                continue;
            }
            if data.is_empty() {
                return Start::NeedInput;
            }
            if !self.skipped_exit && is_partial_universal_exit(data) && !input.at_end_of_data() {
                return Start::NeedInput;
            }
            if self.rules.end_of_job == Some(data[0]) {
                input.consume(1);
                continue;
            }

            if let Some(header) = self.rules.header {
                let n = header.len().min(data.len());
                if data[..n] != header[..n] {
                    return Start::Failed(self.missing_header(input.position(), header));
                }
                if n < header.len() {
                    if input.at_end_of_data() {
                        return Start::Failed(self.missing_header(input.position(), header));
                    }
                    return Start::NeedInput;
                }
            }

            self.started = true;
            return Start::Ready;
        }
    }

    fn emit(&mut self, data: &[u8], device: &mut dyn OutputDevice) -> PdlResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        device.write(data)?;
        self.written += data.len() as u64;
        Ok(())
    }

    fn missing_header(&self, offset: u64, header: &[u8]) -> PdlError {
        PdlError::Syntax {
            offset,
            detail: format!(
                "{} job does not begin with {:?}",
                self.language,
                String::from_utf8_lossy(header)
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::cursor::ByteCursor;
    use crate::dispatch::device::MemoryDevice;

    fn open_device() -> MemoryDevice {
        let mut device = MemoryDevice::new();
        device.open_job(0, "TEST").unwrap();
        device
    }

    #[test]
    fn test_session_order_is_enforced() {
        let mut session = Session::new("TEST");
        assert!(session.begin_job().is_err());
        session.initialize().unwrap();
        assert!(session.initialize().is_err());
        session.begin_job().unwrap();
        assert!(session.begin_job().is_err());
        session.end_job().unwrap();
        assert!(session.end_job().is_err());
        session.deinitialize().unwrap();
        assert!(!session.is_initialized());
        assert!(session.deinitialize().is_err());
    }

    #[test]
    fn test_spool_stops_before_universal_exit() {
        let mut data = b"page data".to_vec();
        data.extend_from_slice(UNIVERSAL_EXIT);
        let mut cursor = ByteCursor::from_bytes(data);
        let mut device = open_device();
        let mut spooler = Spooler::new("TEST", SpoolRules::default());

        let status = spooler.process(&mut cursor.window(), &mut device);
        assert!(matches!(status, ProcessStatus::BenignExit));
        assert_eq!(cursor.position(), 9);
        assert_eq!(spooler.written(), 9);
    }

    #[test]
    fn test_leading_universal_exit_is_skipped_once() {
        let mut data = UNIVERSAL_EXIT.to_vec();
        data.extend_from_slice(b"abc");
        data.extend_from_slice(UNIVERSAL_EXIT);
        let mut cursor = ByteCursor::from_bytes(data);
        let mut device = open_device();
        let mut spooler = Spooler::new("TEST", SpoolRules::default());

        let status = spooler.process(&mut cursor.window(), &mut device);
        assert!(matches!(status, ProcessStatus::BenignExit));
        assert!(starts_with_universal_exit(cursor.available()));
        assert_eq!(device.close_job().unwrap().bytes, 3);
    }

    #[test]
    fn test_missing_header_is_syntax_error() {
        let mut cursor = ByteCursor::from_bytes(b"not a header".to_vec());
        let mut device = open_device();
        let rules = SpoolRules {
            header: Some(b"HDR;"),
            end_of_job: None,
        };
        let mut spooler = Spooler::new("TEST", rules);

        let status = spooler.process(&mut cursor.window(), &mut device);
        assert!(matches!(status, ProcessStatus::Error(PdlError::Syntax { offset: 0, .. })));
    }

    #[test]
    fn test_end_of_job_byte_ends_job() {
        let mut cursor = ByteCursor::from_bytes(b"\x04job\x04next".to_vec());
        let mut device = open_device();
        let rules = SpoolRules {
            header: None,
            end_of_job: Some(0x04),
        };
        let mut spooler = Spooler::new("TEST", rules);

        let status = spooler.process(&mut cursor.window(), &mut device);
        assert!(matches!(status, ProcessStatus::BenignExit));
        assert_eq!(cursor.available(), b"next");
        assert_eq!(spooler.written(), 3);
    }

    #[test]
    fn test_finish_writes_trailing_partial_marker() {
        let mut cursor = ByteCursor::from_bytes(b"tail\x1b%-1".to_vec());
        let mut device = open_device();
        let mut spooler = Spooler::new("TEST", SpoolRules::default());

        spooler.finish(&mut cursor.window(), &mut device).unwrap();
        assert!(cursor.available().is_empty());
        assert_eq!(spooler.written(), 8);
    }
}
