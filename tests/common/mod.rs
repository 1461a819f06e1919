//! Shared harness for the dispatcher integration tests
//!
//! `Probe` is a scripted page-description language that records every
//! contract call into a shared trace.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::io::{self, Read};
use std::path::Path;
use std::rc::Rc;

use pdl_dispatch::dispatch::implementation::{
    find_universal_exit, partial_exit_suffix, starts_with_universal_exit,
};
use pdl_dispatch::dispatch::{
    Characteristics, DispatchConfig, Dispatcher, Implementation, MemoryDevice, OutputDevice,
    PdlError, PdlResult, ProcessStatus, Registry, UNIVERSAL_EXIT, Window,
};
use pdl_dispatch::languages::Pjl;

/// One recorded contract call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Initialize(String),
    Deinitialize(String),
    BeginJob(String),
    /// End of a job with the bytes it consumed
    EndJob(String, usize),
    Eof(String),
    ProcessFile(String),
}

pub type Trace = Rc<RefCell<Vec<Event>>>;

pub fn trace() -> Trace {
    Rc::new(RefCell::new(Vec::new()))
}

/// Scripted implementation
pub struct Probe {
    name: String,
    signature: Vec<u8>,
    score: u32,
    poison: Option<u8>,
    fail_initialize: bool,
    fail_deinitialize: bool,
    fail_begin: bool,
    direct_file: bool,
    sense_calls: Rc<Cell<usize>>,
    trace: Trace,
    consumed: usize,
    started: bool,
}

impl Probe {
    pub fn new(name: &str, trace: &Trace) -> Self {
        Self {
            name: name.to_string(),
            signature: Vec::new(),
            score: 0,
            poison: None,
            fail_initialize: false,
            fail_deinitialize: false,
            fail_begin: false,
            direct_file: false,
            sense_calls: Rc::new(Cell::new(0)),
            trace: trace.clone(),
            consumed: 0,
            started: false,
        }
    }

    /// Score `score` for prefixes starting with `signature`
    pub fn signature(mut self, signature: &[u8], score: u32) -> Self {
        self.signature = signature.to_vec();
        self.score = score;
        self
    }

    /// Fail the job when this byte is seen
    pub fn poison(mut self, byte: u8) -> Self {
        self.poison = Some(byte);
        self
    }

    pub fn failing_initialize(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    pub fn failing_deinitialize(mut self) -> Self {
        self.fail_deinitialize = true;
        self
    }

    pub fn failing_begin(mut self) -> Self {
        self.fail_begin = true;
        self
    }

    pub fn direct_file(mut self) -> Self {
        self.direct_file = true;
        self
    }

    /// Count `auto_sense` calls into `counter`
    pub fn sense_counter(mut self, counter: &Rc<Cell<usize>>) -> Self {
        self.sense_calls = counter.clone();
        self
    }

    fn record(&self, event: Event) {
        self.trace.borrow_mut().push(event);
    }
}

impl Implementation for Probe {
    fn characteristics(&self) -> Characteristics {
        Characteristics {
            language: self.name.clone(),
            version: "test".to_string(),
            direct_file: self.direct_file,
        }
    }

    fn auto_sense(&self, prefix: &[u8]) -> u32 {
        self.sense_calls.set(self.sense_calls.get() + 1);
        if !self.signature.is_empty() && prefix.starts_with(&self.signature) {
            self.score
        } else {
            0
        }
    }

    fn initialize(&mut self, _device: &mut dyn OutputDevice) -> PdlResult<()> {
        self.record(Event::Initialize(self.name.clone()));
        if self.fail_initialize {
            return Err(PdlError::Other(format!("{} cannot start", self.name)));
        }
        Ok(())
    }

    fn deinitialize(&mut self, _device: &mut dyn OutputDevice) -> PdlResult<()> {
        self.record(Event::Deinitialize(self.name.clone()));
        if self.fail_deinitialize {
            return Err(PdlError::Other(format!("{} cannot stop", self.name)));
        }
        Ok(())
    }

    fn begin_job(&mut self, _device: &mut dyn OutputDevice) -> PdlResult<()> {
        self.record(Event::BeginJob(self.name.clone()));
        self.consumed = 0;
        self.started = false;
        if self.fail_begin {
            return Err(PdlError::Other(format!("{} refused the job", self.name)));
        }
        Ok(())
    }

    fn process(&mut self, input: &mut Window<'_>, device: &mut dyn OutputDevice) -> ProcessStatus {
        if !self.started {
            if input.remaining().len() < UNIVERSAL_EXIT.len()
                && UNIVERSAL_EXIT.starts_with(input.remaining())
                && !input.at_end_of_data()
                && !input.is_empty()
            {
                return ProcessStatus::NeedInput;
            }
            if starts_with_universal_exit(input.remaining()) {
                input.consume(UNIVERSAL_EXIT.len());
            }
            self.started = true;
        }

        let data = input.remaining();
        let (end, boundary) = match find_universal_exit(data) {
            Some(at) => (at, true),
            None if input.at_end_of_data() => (data.len(), false),
            None => (data.len() - partial_exit_suffix(data), false),
        };

        if let Some(poison) = self.poison {
            if let Some(at) = data[..end].iter().position(|&b| b == poison) {
                if let Err(err) = device.write(&data[..at]) {
                    return ProcessStatus::Error(err.into());
                }
                input.consume(at + 1);
                self.consumed += at + 1;
                return ProcessStatus::Error(PdlError::Other(format!(
                    "{} hit a poison byte",
                    self.name
                )));
            }
        }

        if let Err(err) = device.write(&data[..end]) {
            return ProcessStatus::Error(err.into());
        }
        input.consume(end);
        self.consumed += end;

        if boundary {
            ProcessStatus::BenignExit
        } else {
            ProcessStatus::NeedInput
        }
    }

    fn process_eof(
        &mut self,
        input: &mut Window<'_>,
        device: &mut dyn OutputDevice,
    ) -> PdlResult<()> {
        self.record(Event::Eof(self.name.clone()));
        let rest = input.remaining();
        device.write(rest)?;
        self.consumed += input.consume_all();
        Ok(())
    }

    fn end_job(&mut self, _device: &mut dyn OutputDevice) -> PdlResult<()> {
        self.record(Event::EndJob(self.name.clone(), self.consumed));
        Ok(())
    }

    fn process_file(&mut self, path: &Path, device: &mut dyn OutputDevice) -> ProcessStatus {
        self.record(Event::ProcessFile(self.name.clone()));
        match std::fs::read(path) {
            Ok(data) => {
                self.consumed = data.len();
                match device.write(&data) {
                    Ok(()) => ProcessStatus::BenignExit,
                    Err(err) => ProcessStatus::Error(err.into()),
                }
            }
            Err(err) => ProcessStatus::Error(err.into()),
        }
    }
}

/// Registry with PJL in slot 0 and `probes` after it
pub fn registry(probes: Vec<Probe>) -> Registry {
    probes
        .into_iter()
        .fold(Registry::builder().control(Pjl::new()), |builder, probe| {
            builder.register(probe)
        })
        .build()
        .expect("registry builds")
}

pub fn dispatcher(probes: Vec<Probe>, config: DispatchConfig) -> (Dispatcher, MemoryDevice) {
    let device = MemoryDevice::new();
    let dispatcher = Dispatcher::new(registry(probes), Box::new(device.clone()), config)
        .expect("dispatcher starts");
    (dispatcher, device)
}

/// `<UEL>@PJL ENTER LANGUAGE=<language>` followed by `body`
pub fn segment(language: &str, body: &[u8]) -> Vec<u8> {
    let mut data = UNIVERSAL_EXIT.to_vec();
    data.extend_from_slice(format!("@PJL ENTER LANGUAGE={}\r\n", language).as_bytes());
    data.extend_from_slice(body);
    data
}

pub fn count(trace: &Trace, wanted: impl Fn(&Event) -> bool) -> usize {
    trace.borrow().iter().filter(|event| wanted(event)).count()
}

/// Reader returning at most `chunk` bytes per call
pub struct Trickle {
    data: Vec<u8>,
    pos: usize,
    chunk: usize,
}

impl Trickle {
    pub fn new(data: Vec<u8>, chunk: usize) -> Self {
        Self {
            data,
            pos: 0,
            chunk: chunk.max(1),
        }
    }
}

impl Read for Trickle {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let n = self.chunk.min(out.len()).min(self.data.len() - self.pos);
        out[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Reader that fails after yielding `data`
pub struct Broken {
    data: Vec<u8>,
    served: bool,
}

impl Broken {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            served: false,
        }
    }
}

impl Read for Broken {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.served {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "source went away"));
        }
        self.served = true;
        let n = out.len().min(self.data.len());
        out[..n].copy_from_slice(&self.data[..n]);
        Ok(n)
    }
}
