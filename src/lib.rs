//! pdl-dispatch – job dispatch for multi-language print streams
//!
//! A print stream interleaves jobs written in different page-description
//! languages, separated by Universal Exit markers and driven by a resident
//! PJL control layer. This crate:
//! - Finds job boundaries in a streamed byte source
//! - Selects the language of each job (forced, PJL-requested, or auto-sensed)
//! - Keeps one interpreter live at a time, switching only when needed
//! - Contains per-job errors by flushing to the next job boundary

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Dispatcher core: cursor, registry, selection, lifecycle and state machine
pub mod dispatch;

/// Bundled control layer and page-description languages
pub mod languages;

// Re-export key types for convenience
pub use dispatch::{DispatchConfig, DispatchError, Dispatcher, RunReport, Source};
pub use languages::standard_registry;

/// Current version of pdl-dispatch
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
