//! Refillable byte cursor over a job source
//!
//! A [`ByteCursor`] owns the read buffer for one run. The dispatcher refills it
//! and hands implementations a [`Window`] onto the unread bytes. Offsets are
//! absolute stream positions: compaction moves bytes inside the buffer but the
//! reported position never decreases.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use super::error::{DispatchError, DispatchResult};

/// Default size of the read buffer
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Where a run reads its bytes from
pub enum Source {
    /// A regular file; eligible for the direct-file fast path
    File(PathBuf),
    /// Standard input
    Stdin,
    /// Any reader (treated as a pipe)
    Reader(Box<dyn Read>),
    /// An in-memory buffer (treated as a pipe)
    Bytes(Vec<u8>),
}

impl Source {
    /// Interpret a command-line argument; `-` means standard input
    pub fn from_arg(arg: &str) -> Self {
        if arg == "-" {
            Source::Stdin
        } else {
            Source::File(PathBuf::from(arg))
        }
    }

    /// Human-readable name used in logs and reports
    pub fn describe(&self) -> String {
        match self {
            Source::File(path) => path.display().to_string(),
            Source::Stdin => "<stdin>".to_string(),
            Source::Reader(_) => "<reader>".to_string(),
            Source::Bytes(bytes) => format!("<{} bytes>", bytes.len()),
        }
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Source({})", self.describe())
    }
}

/// Outcome of a refill
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refill {
    /// New bytes were appended to the window
    Data,
    /// The source is permanently exhausted
    EndOfData,
}

/// Read buffer with absolute position tracking
pub struct ByteCursor {
    reader: Option<Box<dyn Read>>,
    buf: Vec<u8>,
    pos: usize,
    limit: usize,
    /// Absolute stream offset of `buf[0]`
    base: u64,
    eof: bool,
    path: Option<PathBuf>,
    piped: bool,
    name: String,
}

impl ByteCursor {
    /// Open a source with the given initial buffer capacity
    pub fn open(source: Source, capacity: usize) -> DispatchResult<Self> {
        let capacity = capacity.max(16);
        let name = source.describe();
        let cursor = match source {
            Source::File(path) => {
                let file = File::open(&path).map_err(|source| DispatchError::Open {
                    path: path.clone(),
                    source,
                })?;
                Self::with_reader(Box::new(file), capacity, Some(path), false, name)
            }
            Source::Stdin => Self::with_reader(Box::new(io::stdin()), capacity, None, true, name),
            Source::Reader(reader) => Self::with_reader(reader, capacity, None, true, name),
            Source::Bytes(bytes) => Self::from_bytes(bytes),
        };
        Ok(cursor)
    }

    /// Cursor over an in-memory buffer, already at end-of-data
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let buf = bytes.into();
        let limit = buf.len();
        Self {
            reader: None,
            name: format!("<{} bytes>", limit),
            buf,
            pos: 0,
            limit,
            base: 0,
            eof: true,
            path: None,
            piped: true,
        }
    }

    fn with_reader(
        reader: Box<dyn Read>,
        capacity: usize,
        path: Option<PathBuf>,
        piped: bool,
        name: String,
    ) -> Self {
        Self {
            reader: Some(reader),
            buf: vec![0; capacity],
            pos: 0,
            limit: 0,
            base: 0,
            eof: false,
            path,
            piped,
            name,
        }
    }

    /// Absolute offset of the next unread byte
    pub fn position(&self) -> u64 {
        self.base + self.pos as u64
    }

    /// Unread bytes currently buffered
    pub fn available(&self) -> &[u8] {
        &self.buf[self.pos..self.limit]
    }

    /// Whether the source has reported permanent end-of-data
    pub fn at_end_of_data(&self) -> bool {
        self.eof
    }

    /// No buffered bytes remain and the source is at end-of-data
    pub fn is_exhausted(&self) -> bool {
        self.pos == self.limit && self.eof
    }

    /// Whether the source is a pipe rather than a seekable file
    pub fn is_piped(&self) -> bool {
        self.piped
    }

    /// Path of the underlying file, if the source is one
    pub fn file_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Source name for diagnostics
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read more bytes, blocking until at least one arrives or the source ends
    ///
    /// Consumed bytes are compacted away first; if the buffer is full of
    /// unread bytes it grows. An I/O error is always fatal.
    pub fn refill(&mut self) -> DispatchResult<Refill> {
        if self.eof {
            return Ok(Refill::EndOfData);
        }

        if self.pos > 0 {
            self.buf.copy_within(self.pos..self.limit, 0);
            self.base += self.pos as u64;
            self.limit -= self.pos;
            self.pos = 0;
        }
        if self.limit == self.buf.len() {
            let grow = self.buf.len().max(DEFAULT_BUFFER_SIZE);
            self.buf.resize(self.buf.len() + grow, 0);
        }

        let Some(reader) = self.reader.as_mut() else {
            self.eof = true;
            return Ok(Refill::EndOfData);
        };

        loop {
            match reader.read(&mut self.buf[self.limit..]) {
                Ok(0) => {
                    self.eof = true;
                    self.reader = None;
                    return Ok(Refill::EndOfData);
                }
                Ok(n) => {
                    self.limit += n;
                    return Ok(Refill::Data);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(DispatchError::io(self.position(), e)),
            }
        }
    }

    /// Refill until at least `want` unread bytes are buffered or the source ends
    pub fn fill_to(&mut self, want: usize) -> DispatchResult<()> {
        while self.available().len() < want {
            if self.refill()? == Refill::EndOfData {
                break;
            }
        }
        Ok(())
    }

    /// Borrow the unread bytes for an implementation call
    pub fn window(&mut self) -> Window<'_> {
        Window {
            buf: &self.buf[..self.limit],
            start: self.pos,
            pos: &mut self.pos,
            base: self.base,
            eof: self.eof,
        }
    }

    /// Drop every buffered unread byte, returning how many were dropped
    pub fn discard_available(&mut self) -> usize {
        let dropped = self.limit - self.pos;
        self.pos = self.limit;
        dropped
    }

    /// Release the source; the cursor reports end-of-data from now on
    pub fn close(&mut self) {
        self.discard_available();
        self.reader = None;
        self.eof = true;
    }
}

impl fmt::Debug for ByteCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteCursor")
            .field("name", &self.name)
            .field("position", &self.position())
            .field("available", &(self.limit - self.pos))
            .field("eof", &self.eof)
            .finish()
    }
}

/// View of the unread bytes handed to an implementation
///
/// Positions always name the next unread byte. Implementations that peek one
/// byte past a token may give it back with [`Window::step_back`], which is the
/// only way a position moves backwards and never crosses the window start.
pub struct Window<'a> {
    buf: &'a [u8],
    pos: &'a mut usize,
    start: usize,
    base: u64,
    eof: bool,
}

impl<'a> Window<'a> {
    /// Unread bytes
    pub fn remaining(&self) -> &'a [u8] {
        let buf: &'a [u8] = self.buf;
        &buf[*self.pos..]
    }

    /// Number of unread bytes
    pub fn len(&self) -> usize {
        self.buf.len() - *self.pos
    }

    /// Whether every buffered byte has been consumed
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mark `n` bytes as consumed (clamped to what is available)
    pub fn consume(&mut self, n: usize) {
        *self.pos += n.min(self.len());
    }

    /// Consume everything, returning the count
    pub fn consume_all(&mut self) -> usize {
        let n = self.len();
        *self.pos += n;
        n
    }

    /// Give back the most recently consumed byte of this window
    pub fn step_back(&mut self) -> bool {
        if *self.pos > self.start {
            *self.pos -= 1;
            true
        } else {
            false
        }
    }

    /// Absolute offset of the next unread byte
    pub fn position(&self) -> u64 {
        self.base + *self.pos as u64
    }

    /// Bytes consumed through this window so far
    pub fn consumed(&self) -> usize {
        *self.pos - self.start
    }

    /// Whether no more bytes will follow the ones in this window
    pub fn at_end_of_data(&self) -> bool {
        self.eof
    }
}
