//! Job dispatch core
//!
//! A print stream is a sequence of jobs, each in some page-description
//! language. This module finds the job boundaries, selects an implementation
//! for every job, and keeps exactly one implementation live at a time.

// Submodules
pub mod config;
pub mod cursor;
pub mod device;
pub mod dispatcher;
pub mod error;
pub mod implementation;
pub mod lifecycle;
pub mod registry;
pub mod sense;

pub use config::{DispatchConfig, ErrorReport, load_config, write_config};
pub use cursor::{ByteCursor, Source, Window};
pub use device::{JobOutput, MemoryDevice, NullDevice, OutputDevice, SpoolDevice};
pub use dispatcher::{DispatchPhase, Dispatcher, JobOutcome, JobRecord, RunReport};
pub use error::{DeviceError, DispatchError, DispatchResult, PdlError, PdlResult};
pub use implementation::{
    Characteristics, ControlLayer, FlushOutcome, Implementation, ProcessStatus, UNIVERSAL_EXIT,
};
pub use lifecycle::LifecycleStats;
pub use registry::{Registry, RegistryBuilder, SlotId};
pub use sense::{ForcedPersistence, Selection, SelectionReason};
