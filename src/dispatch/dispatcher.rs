//! Job dispatcher state machine
//!
//! Drives one run over a byte source: at each job boundary it selects an
//! implementation, feeds it the stream until the job ends, flushes to the next
//! boundary after a failure, closes the job, and reverts to the control layer.
//! Per-job interpreter errors are contained; anything surfaced as a
//! [`DispatchError`] ends the run immediately.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::config::DispatchConfig;
use super::cursor::{ByteCursor, Refill, Source};
use super::device::{JobOutput, OutputDevice};
use super::error::{DispatchError, DispatchResult, JobStage, PdlError};
use super::implementation::{FlushOutcome, ProcessStatus, UNIVERSAL_EXIT};
use super::lifecycle::{Active, Lifecycle, LifecycleStats};
use super::registry::{Registry, SlotId};
use super::sense::{AUTO_SENSE_PREFIX, Selection, SelectionReason, Selector};

/// Observable phase of the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DispatchPhase {
    /// Between jobs
    AwaitingJob,
    /// Choosing the next job's language
    Dispatching,
    /// Feeding the current implementation
    Processing,
    /// Discarding the rest of a failed job
    FlushingError,
    /// Closing a job and reverting to the control layer
    EndingJob,
}

/// How a job came to an end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobOutcome {
    /// The implementation signalled a benign exit
    Exited,
    /// The source ran out while the job was open
    EndOfData,
    /// The job failed and was flushed to the next boundary
    Recovered,
    /// The whole file was handed to the implementation
    DirectFile,
}

/// One job of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Job index, unique across the dispatcher's lifetime
    pub index: usize,
    /// Implementation that handled the job
    pub language: String,
    /// Why that implementation was chosen
    pub selection: SelectionReason,
    /// Stream offset of the job's first byte
    pub start_offset: u64,
    /// Stream offset just past the job
    pub end_offset: u64,
    /// How the job ended
    pub outcome: JobOutcome,
    /// Reported error, for failed jobs
    pub error: Option<String>,
    /// Output summary from the device
    pub output: Option<JobOutput>,
    /// When the job started
    pub started_at: DateTime<Utc>,
    /// When the job ended
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    fn new(index: usize, language: String, selection: SelectionReason, start_offset: u64) -> Self {
        Self {
            index,
            language,
            selection,
            start_offset,
            end_offset: start_offset,
            outcome: JobOutcome::Exited,
            error: None,
            output: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}

/// Summary of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique run identifier
    pub run_id: Uuid,
    /// Source description
    pub source: String,
    /// Jobs in stream order
    pub jobs: Vec<JobRecord>,
    /// Switches performed during the run
    pub switches: usize,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run ended
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunReport {
    fn new(source: String) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            source,
            jobs: Vec::new(),
            switches: 0,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Jobs handled by `language`
    pub fn jobs_for<'a>(&'a self, language: &'a str) -> impl Iterator<Item = &'a JobRecord> + 'a {
        self.jobs
            .iter()
            .filter(move |job| job.language.eq_ignore_ascii_case(language))
    }

    /// Number of jobs that ended in a recovered error
    pub fn error_count(&self) -> usize {
        self.jobs.iter().filter(|job| job.error.is_some()).count()
    }
}

/// Per-job ending, carried into `EndingJob`
#[derive(Debug)]
enum JobEnd {
    Exited,
    EndOfData,
    Recovered(String),
    DirectFile(Option<String>),
}

/// Internal state, carrying the in-flight job record
#[derive(Debug)]
enum DispatchState {
    AwaitingJob,
    Dispatching,
    Processing(JobRecord),
    FlushingError {
        job: JobRecord,
        error: PdlError,
        offset: u64,
    },
    EndingJob {
        job: JobRecord,
        end: JobEnd,
    },
}

impl DispatchState {
    fn phase(&self) -> DispatchPhase {
        match self {
            DispatchState::AwaitingJob => DispatchPhase::AwaitingJob,
            DispatchState::Dispatching => DispatchPhase::Dispatching,
            DispatchState::Processing(_) => DispatchPhase::Processing,
            DispatchState::FlushingError { .. } => DispatchPhase::FlushingError,
            DispatchState::EndingJob { .. } => DispatchPhase::EndingJob,
        }
    }
}

/// Whether the run loop keeps going after a job ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    /// Keep dispatching until the source is exhausted
    Stream,
    /// Stop after the first job
    SingleJob,
}

/// Sequential job dispatcher
pub struct Dispatcher {
    config: DispatchConfig,
    lifecycle: Lifecycle,
    selector: Selector,
    forced: Option<SlotId>,
    prefix_pending: Option<String>,
    jobs_started: usize,
    phase: DispatchPhase,
}

impl Dispatcher {
    /// Build a dispatcher and bring up the control layer
    pub fn new(
        registry: Registry,
        device: Box<dyn OutputDevice>,
        config: DispatchConfig,
    ) -> DispatchResult<Self> {
        config.validate()?;

        let forced = match &config.forced_language {
            Some(name) => {
                let slot = registry
                    .find(name)
                    .ok_or_else(|| DispatchError::UnknownLanguage(name.clone()))?;
                if slot.is_control() {
                    return Err(DispatchError::Config(format!(
                        "{} is the control layer and cannot be forced",
                        registry.name(slot)
                    )));
                }
                Some(slot)
            }
            None => None,
        };

        let mut lifecycle = Lifecycle::new(registry, device);
        lifecycle.switch_to(SlotId::CONTROL)?;

        Ok(Self {
            selector: Selector::new(config.forced_persistence),
            prefix_pending: config.prefix_commands.clone(),
            config,
            lifecycle,
            forced,
            jobs_started: 0,
            phase: DispatchPhase::AwaitingJob,
        })
    }

    /// Build a dispatcher over the bundled languages
    pub fn with_standard_languages(
        device: Box<dyn OutputDevice>,
        config: DispatchConfig,
    ) -> DispatchResult<Self> {
        Self::new(crate::languages::standard_registry()?, device, config)
    }

    /// Configuration in use
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// The registry
    pub fn registry(&self) -> &Registry {
        self.lifecycle.registry()
    }

    /// Name of the current implementation
    pub fn current_language(&self) -> &str {
        self.lifecycle.current_name()
    }

    /// Phase the dispatcher is in
    pub fn phase(&self) -> DispatchPhase {
        self.phase
    }

    /// Lifecycle counters accumulated so far
    pub fn lifecycle_stats(&self) -> LifecycleStats {
        self.lifecycle.stats()
    }

    /// Process an in-memory stream
    pub fn run_bytes(&mut self, bytes: impl Into<Vec<u8>>) -> DispatchResult<RunReport> {
        self.run(Source::Bytes(bytes.into()))
    }

    /// Process a file (`-` for standard input)
    pub fn run_file(&mut self, path: impl Into<PathBuf>) -> DispatchResult<RunReport> {
        let path = path.into();
        let source = if path.as_os_str() == "-" {
            Source::Stdin
        } else {
            Source::File(path)
        };
        self.run(source)
    }

    /// Process every job in `source`
    ///
    /// Returns once the source is exhausted. Any error returned is fatal;
    /// recovered job errors are in the report.
    pub fn run(&mut self, source: Source) -> DispatchResult<RunReport> {
        let mut cursor = ByteCursor::open(source, self.config.buffer_size)?;
        let mut report = RunReport::new(cursor.name().to_string());
        let stats_before = self.lifecycle.stats();
        tracing::info!(source = %report.source, run = %report.run_id, "run started");

        let result = self.run_jobs(&mut cursor, &mut report);
        self.phase = DispatchPhase::AwaitingJob;
        if let Err(err) = result {
            tracing::error!(error = %err, offset = cursor.position(), "run aborted");
            self.abandon_run();
            return Err(err);
        }

        report.switches = self.lifecycle.stats().switches - stats_before.switches;
        report.finished_at = Some(Utc::now());
        tracing::info!(
            source = %report.source,
            jobs = report.jobs.len(),
            errors = report.error_count(),
            "run finished"
        );
        Ok(report)
    }

    fn run_jobs(&mut self, cursor: &mut ByteCursor, report: &mut RunReport) -> DispatchResult<()> {
        if let Some(commands) = self.prefix_pending.take() {
            self.run_prefix(&commands, report)?;
        }

        self.selector.arm(self.forced);
        if let Some(slot) = self.forced {
            self.lifecycle.switch_to(slot)?;
        }

        self.drive(cursor, report, DispatchState::AwaitingJob, Scope::Stream)
    }

    /// Put the dispatcher back in front of the control layer after a fatal error
    ///
    /// Output of the interrupted job is dropped. Failures here are logged; the
    /// caller still sees the error that aborted the run.
    fn abandon_run(&mut self) {
        if self.lifecycle.device_mut().abandon_job() {
            tracing::debug!("dropped output of the interrupted job");
        }
        if let Err(err) = self.lifecycle.revert_to_control_layer() {
            tracing::error!(error = %err, "could not return to the control layer");
        }
    }

    /// Run control-layer commands as their own job, ahead of the stream
    fn run_prefix(&mut self, commands: &str, report: &mut RunReport) -> DispatchResult<()> {
        self.lifecycle.switch_to(SlotId::CONTROL)?;
        let mut cursor = ByteCursor::from_bytes(commands.as_bytes().to_vec());
        let job = self.open_job(SelectionReason::Injected, &cursor)?;
        self.drive(&mut cursor, report, DispatchState::Processing(job), Scope::SingleJob)?;

        let leftover = cursor.discard_available();
        if leftover > 0 {
            tracing::warn!(bytes = leftover, "prefix commands left unparsed data");
        }
        Ok(())
    }

    /// Deinitialize the current implementation
    pub fn shutdown(mut self) -> DispatchResult<()> {
        self.lifecycle.shutdown()
    }

    fn drive(
        &mut self,
        cursor: &mut ByteCursor,
        report: &mut RunReport,
        mut state: DispatchState,
        scope: Scope,
    ) -> DispatchResult<()> {
        let mut first_job = true;

        loop {
            self.phase = state.phase();
            tracing::debug!(phase = ?self.phase, offset = cursor.position(), "dispatch step");

            state = match state {
                DispatchState::AwaitingJob => {
                    cursor.fill_to(AUTO_SENSE_PREFIX)?;
                    if cursor.is_exhausted() {
                        tracing::debug!(offset = cursor.position(), "end of data");
                        return Ok(());
                    }
                    if self.only_exit_remains(cursor) {
                        // The job before it already ended on this marker.
                        cursor.discard_available();
                        tracing::debug!(offset = cursor.position(), "trailing universal exit");
                        return Ok(());
                    }
                    DispatchState::Dispatching
                }

                DispatchState::Dispatching => {
                    let direct = self.dispatch(cursor, first_job)?;
                    first_job = false;
                    let job = self.open_job(direct.reason, cursor)?;
                    match direct.path {
                        Some(path) => self.process_file(cursor, job, path),
                        None => DispatchState::Processing(job),
                    }
                }

                DispatchState::Processing(job) => self.process(cursor, job)?,

                DispatchState::FlushingError { job, error, offset } => {
                    self.flush(cursor, job, error, offset)?
                }

                DispatchState::EndingJob { job, end } => {
                    let record = self.end_job(cursor, job, end)?;
                    report.jobs.push(record);
                    self.lifecycle.revert_to_control_layer()?;
                    if scope == Scope::SingleJob {
                        return Ok(());
                    }
                    DispatchState::AwaitingJob
                }
            };
        }
    }

    /// A lone Universal Exit is all that is left of the stream
    fn only_exit_remains(&self, cursor: &ByteCursor) -> bool {
        cursor.at_end_of_data()
            && cursor.available() == UNIVERSAL_EXIT
            && self.selector.forced().is_none()
            && self.lifecycle.current() == Some(SlotId::CONTROL)
    }

    /// Choose and switch to the next job's implementation
    fn dispatch(&mut self, cursor: &ByteCursor, first_job: bool) -> DispatchResult<Dispatched> {
        let registry = self.lifecycle.registry();
        let selection = match self.lifecycle.current() {
            // A language forced before the run is already current.
            Some(slot) if !slot.is_control() => Selection {
                slot,
                reason: SelectionReason::Forced,
            },
            _ => self.selector.select(registry, cursor.available()),
        };

        tracing::info!(
            language = registry.name(selection.slot),
            reason = ?selection.reason,
            offset = cursor.position(),
            "PDL detected"
        );

        self.lifecycle.switch_to(selection.slot)?;
        self.selector.job_started();

        let direct_file = first_job
            && self.config.direct_file
            && !cursor.is_piped()
            && !selection.slot.is_control()
            && self
                .lifecycle
                .registry()
                .get(selection.slot)
                .is_some_and(|implementation| implementation.supports_direct_file());

        Ok(Dispatched {
            reason: selection.reason,
            path: direct_file
                .then(|| cursor.file_path().map(|path| path.to_path_buf()))
                .flatten(),
        })
    }

    fn open_job(
        &mut self,
        reason: SelectionReason,
        cursor: &ByteCursor,
    ) -> DispatchResult<JobRecord> {
        let index = self.jobs_started;
        self.jobs_started += 1;

        let active = self.active()?;
        let language = active.implementation.name();
        active.device.open_job(index, &language)?;
        active
            .implementation
            .begin_job(&mut *active.device)
            .map_err(|source| DispatchError::Job {
                language: language.clone(),
                job: index,
                stage: JobStage::Begin,
                source,
            })?;

        tracing::debug!(
            job = index,
            language = %language,
            offset = cursor.position(),
            "job started"
        );
        Ok(JobRecord::new(index, language, reason, cursor.position()))
    }

    fn process(
        &mut self,
        cursor: &mut ByteCursor,
        job: JobRecord,
    ) -> DispatchResult<DispatchState> {
        if cursor.available().is_empty() {
            return Ok(match cursor.refill()? {
                Refill::Data => DispatchState::Processing(job),
                Refill::EndOfData => DispatchState::EndingJob {
                    job,
                    end: JobEnd::EndOfData,
                },
            });
        }

        let active = self.active()?;
        let status = {
            let mut window = cursor.window();
            active
                .implementation
                .process(&mut window, &mut *active.device)
        };

        Ok(match status {
            ProcessStatus::NeedInput => match cursor.refill()? {
                Refill::Data => DispatchState::Processing(job),
                Refill::EndOfData => DispatchState::EndingJob {
                    job,
                    end: JobEnd::EndOfData,
                },
            },
            ProcessStatus::Progress => DispatchState::Processing(job),
            ProcessStatus::BenignExit => DispatchState::EndingJob {
                job,
                end: JobEnd::Exited,
            },
            ProcessStatus::Error(error) => {
                let offset = cursor.position();
                tracing::warn!(
                    language = %job.language,
                    offset,
                    error = %error,
                    "interpreter exited with error"
                );
                DispatchState::FlushingError { job, error, offset }
            }
        })
    }

    fn flush(
        &mut self,
        cursor: &mut ByteCursor,
        job: JobRecord,
        error: PdlError,
        offset: u64,
    ) -> DispatchResult<DispatchState> {
        let verbose = self.config.verbose_errors();
        let active = self.active()?;
        tracing::debug!(
            language = %job.language,
            offset = cursor.position(),
            "flushing to end of job"
        );

        loop {
            let outcome = active
                .implementation
                .flush_to_job_boundary(&mut cursor.window());
            if outcome == FlushOutcome::Found {
                break;
            }
            if cursor.at_end_of_data() {
                let dropped = cursor.discard_available();
                tracing::debug!(dropped, "end of data found while flushing");
                break;
            }
            cursor.refill()?;
        }

        let message = active.implementation.report_errors(&error, offset, verbose);
        tracing::warn!(
            language = %job.language,
            offset,
            resumed_at = cursor.position(),
            "{}",
            message
        );

        Ok(DispatchState::EndingJob {
            job,
            end: JobEnd::Recovered(message),
        })
    }

    fn process_file(
        &mut self,
        cursor: &mut ByteCursor,
        mut job: JobRecord,
        path: PathBuf,
    ) -> DispatchState {
        tracing::debug!(language = %job.language, path = ?path, "processing job from file");
        cursor.close();
        job.end_offset = std::fs::metadata(&path).map_or(job.start_offset, |meta| meta.len());

        let verbose = self.config.verbose_errors();
        let error = match self.lifecycle.active() {
            Some(active) => match active.implementation.process_file(&path, &mut *active.device) {
                ProcessStatus::Error(error) => {
                    let message = active.implementation.report_errors(&error, 0, verbose);
                    tracing::warn!(language = %job.language, "{}", message);
                    Some(message)
                }
                _ => None,
            },
            None => Some(DispatchError::NoCurrentImplementation.to_string()),
        };

        DispatchState::EndingJob {
            job,
            end: JobEnd::DirectFile(error),
        }
    }

    fn end_job(
        &mut self,
        cursor: &mut ByteCursor,
        mut job: JobRecord,
        end: JobEnd,
    ) -> DispatchResult<JobRecord> {
        let active = self.active()?;

        let (outcome, mut error) = match end {
            JobEnd::Exited => (JobOutcome::Exited, None),
            JobEnd::EndOfData => (JobOutcome::EndOfData, None),
            JobEnd::Recovered(message) => (JobOutcome::Recovered, Some(message)),
            JobEnd::DirectFile(message) => (JobOutcome::DirectFile, message),
        };

        if outcome == JobOutcome::EndOfData {
            let result = active
                .implementation
                .process_eof(&mut cursor.window(), &mut *active.device);
            if let Err(err) = result {
                tracing::warn!(
                    language = %job.language,
                    offset = cursor.position(),
                    error = %err,
                    "end-of-data handling failed"
                );
                error = Some(err.to_string());
            }
            let dropped = cursor.discard_available();
            if dropped > 0 {
                tracing::debug!(dropped, "discarded unconsumed bytes at end of data");
            }
        }

        active
            .implementation
            .end_job(&mut *active.device)
            .map_err(|source| DispatchError::Job {
                language: job.language.clone(),
                job: job.index,
                stage: JobStage::End,
                source,
            })?;
        let output = active.device.close_job()?;

        if outcome != JobOutcome::DirectFile {
            job.end_offset = cursor.position();
        }
        job.outcome = outcome;
        job.error = error;
        job.output = Some(output);
        job.finished_at = Some(Utc::now());

        tracing::debug!(
            job = job.index,
            language = %job.language,
            outcome = ?job.outcome,
            "job ended"
        );
        Ok(job)
    }

    fn active(&mut self) -> DispatchResult<Active<'_>> {
        self.lifecycle
            .active()
            .ok_or(DispatchError::NoCurrentImplementation)
    }
}

/// Result of choosing a job's implementation
struct Dispatched {
    reason: SelectionReason,
    /// Set when the job takes the direct-file fast path
    path: Option<PathBuf>,
}
