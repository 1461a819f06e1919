//! Output devices
//!
//! The device is the single resource shared by every implementation. The
//! lifecycle manager owns it and lends it only to the current implementation,
//! so exclusive access follows from the borrow rules rather than locking.
//! Devices bracket each job so the dispatcher can record size and digest.

use std::cell::RefCell;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use blake3::Hasher;
use serde::{Deserialize, Serialize};

use super::error::{DeviceError, DeviceResult};

/// Summary of one job's output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutput {
    /// Job index within the run
    pub job: usize,
    /// Implementation that produced the output
    pub language: String,
    /// Bytes written
    pub bytes: u64,
    /// Blake3 digest of the bytes, hex encoded
    pub digest: String,
}

/// Sink for job output
pub trait OutputDevice {
    /// Device name for diagnostics
    fn name(&self) -> &str;

    /// Start collecting output for a job
    fn open_job(&mut self, job: usize, language: &str) -> DeviceResult<()>;

    /// Append output to the open job
    fn write(&mut self, data: &[u8]) -> DeviceResult<()>;

    /// Finish the open job
    fn close_job(&mut self) -> DeviceResult<JobOutput>;

    /// Drop the open job without producing output
    ///
    /// Returns whether a job was open.
    fn abandon_job(&mut self) -> bool;
}

/// Bookkeeping for the job currently open on a device
struct OpenJob {
    job: usize,
    language: String,
    hasher: Hasher,
    bytes: u64,
}

impl OpenJob {
    fn new(job: usize, language: &str) -> Self {
        Self {
            job,
            language: language.to_string(),
            hasher: Hasher::new(),
            bytes: 0,
        }
    }

    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.bytes += data.len() as u64;
    }

    fn finish(self) -> JobOutput {
        JobOutput {
            job: self.job,
            language: self.language,
            bytes: self.bytes,
            digest: self.hasher.finalize().to_hex().to_string(),
        }
    }
}

fn open_slot(slot: &mut Option<OpenJob>, job: usize, language: &str) -> DeviceResult<()> {
    if let Some(open) = slot {
        return Err(DeviceError::JobStillOpen(open.job));
    }
    *slot = Some(OpenJob::new(job, language));
    Ok(())
}

/// Device that discards output, keeping only size and digest
#[derive(Default)]
pub struct NullDevice {
    open: Option<OpenJob>,
}

impl NullDevice {
    /// Create a null device
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutputDevice for NullDevice {
    fn name(&self) -> &str {
        "null"
    }

    fn open_job(&mut self, job: usize, language: &str) -> DeviceResult<()> {
        open_slot(&mut self.open, job, language)
    }

    fn write(&mut self, data: &[u8]) -> DeviceResult<()> {
        let open = self
            .open
            .as_mut()
            .ok_or_else(|| DeviceError::NoOpenJob("null".to_string()))?;
        open.update(data);
        Ok(())
    }

    fn close_job(&mut self) -> DeviceResult<JobOutput> {
        let open = self
            .open
            .take()
            .ok_or_else(|| DeviceError::NoOpenJob("null".to_string()))?;
        Ok(open.finish())
    }

    fn abandon_job(&mut self) -> bool {
        self.open.take().is_some()
    }
}

/// A job captured by a [`MemoryDevice`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedJob {
    /// Size and digest
    pub output: JobOutput,
    /// Raw bytes
    pub data: Vec<u8>,
}

/// Device that keeps every job in memory
///
/// Clones share the same capture list, so a caller can keep one clone to
/// inspect output after handing the other to a dispatcher.
#[derive(Clone, Default)]
pub struct MemoryDevice {
    open: Rc<RefCell<Option<(OpenJob, Vec<u8>)>>>,
    jobs: Rc<RefCell<Vec<CapturedJob>>>,
}

impl MemoryDevice {
    /// Create an empty memory device
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the finished jobs
    pub fn jobs(&self) -> Vec<CapturedJob> {
        self.jobs.borrow().clone()
    }

    /// Finished jobs whose output came from `language`
    pub fn jobs_for(&self, language: &str) -> Vec<CapturedJob> {
        self.jobs
            .borrow()
            .iter()
            .filter(|job| job.output.language == language)
            .cloned()
            .collect()
    }
}

impl OutputDevice for MemoryDevice {
    fn name(&self) -> &str {
        "memory"
    }

    fn open_job(&mut self, job: usize, language: &str) -> DeviceResult<()> {
        let mut open = self.open.borrow_mut();
        if let Some((current, _)) = open.as_ref() {
            return Err(DeviceError::JobStillOpen(current.job));
        }
        *open = Some((OpenJob::new(job, language), Vec::new()));
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> DeviceResult<()> {
        let mut open = self.open.borrow_mut();
        let (job, buf) = open
            .as_mut()
            .ok_or_else(|| DeviceError::NoOpenJob("memory".to_string()))?;
        job.update(data);
        buf.extend_from_slice(data);
        Ok(())
    }

    fn close_job(&mut self) -> DeviceResult<JobOutput> {
        let (job, data) = self
            .open
            .borrow_mut()
            .take()
            .ok_or_else(|| DeviceError::NoOpenJob("memory".to_string()))?;
        let output = job.finish();
        self.jobs.borrow_mut().push(CapturedJob {
            output: output.clone(),
            data,
        });
        Ok(output)
    }

    fn abandon_job(&mut self) -> bool {
        self.open.borrow_mut().take().is_some()
    }
}

/// Device that spools each non-empty job to `job-NNNN.<language>` in a directory
pub struct SpoolDevice {
    dir: PathBuf,
    open: Option<(OpenJob, Vec<u8>)>,
    written: Vec<PathBuf>,
}

impl SpoolDevice {
    /// Create a spool device, creating the directory if needed
    pub fn new(dir: impl Into<PathBuf>) -> DeviceResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            open: None,
            written: Vec::new(),
        })
    }

    /// Spool directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Files written so far
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    /// Path a job would be spooled to
    pub fn job_path(&self, job: usize, language: &str) -> PathBuf {
        self.dir
            .join(format!("job-{:04}.{}", job, language.to_ascii_lowercase()))
    }
}

impl OutputDevice for SpoolDevice {
    fn name(&self) -> &str {
        "spool"
    }

    fn open_job(&mut self, job: usize, language: &str) -> DeviceResult<()> {
        if let Some((current, _)) = &self.open {
            return Err(DeviceError::JobStillOpen(current.job));
        }
        self.open = Some((OpenJob::new(job, language), Vec::new()));
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> DeviceResult<()> {
        let (job, buf) = self
            .open
            .as_mut()
            .ok_or_else(|| DeviceError::NoOpenJob("spool".to_string()))?;
        job.update(data);
        buf.extend_from_slice(data);
        Ok(())
    }

    fn close_job(&mut self) -> DeviceResult<JobOutput> {
        let (job, data) = self
            .open
            .take()
            .ok_or_else(|| DeviceError::NoOpenJob("spool".to_string()))?;
        let output = job.finish();
        if !data.is_empty() {
            let path = self.job_path(output.job, &output.language);
            write_atomic(&path, &data)?;
            self.written.push(path);
        }
        Ok(output)
    }

    fn abandon_job(&mut self) -> bool {
        self.open.take().is_some()
    }
}

/// Write data atomically to a file
///
/// Creates a temporary file, writes the data, syncs, then renames.
pub fn write_atomic(path: &Path, data: &[u8]) -> DeviceResult<()> {
    let temp_path = path.with_extension("tmp");
    let spool_failed = |detail: String| DeviceError::SpoolFailed {
        path: path.to_path_buf(),
        detail,
    };

    let mut file = File::create(&temp_path)
        .map_err(|e| spool_failed(format!("create {:?}: {}", temp_path, e)))?;
    file.write_all(data)
        .map_err(|e| spool_failed(format!("write: {}", e)))?;
    file.sync_all()
        .map_err(|e| spool_failed(format!("sync: {}", e)))?;
    drop(file);

    fs::rename(&temp_path, path)
        .map_err(|e| spool_failed(format!("rename {:?}: {}", temp_path, e)))?;

    if let Some(parent) = path.parent() {
        let dir = OpenOptions::new().read(true).open(parent)?;
        dir.sync_all()?;
    }

    Ok(())
}
