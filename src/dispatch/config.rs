//! Dispatcher configuration and its on-disk form

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::cursor::DEFAULT_BUFFER_SIZE;
use super::device::write_atomic;
use super::error::{DispatchError, DispatchResult};
use super::sense::ForcedPersistence;

/// How much detail recovered job errors are reported with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorReport {
    /// One line per error
    #[default]
    Quiet,
    /// Include the implementation's extended diagnostics
    Verbose,
}

/// Configuration for a dispatcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Language to use without auto-sensing
    pub forced_language: Option<String>,

    /// How long `forced_language` applies
    pub forced_persistence: ForcedPersistence,

    /// Control-layer commands run before the first job
    pub prefix_commands: Option<String>,

    /// Error report detail
    pub error_report: ErrorReport,

    /// Initial read buffer size in bytes
    pub buffer_size: usize,

    /// Allow handing whole files to implementations that support it
    pub direct_file: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            forced_language: None,
            forced_persistence: ForcedPersistence::NextJob,
            prefix_commands: None,
            error_report: ErrorReport::Quiet,
            buffer_size: DEFAULT_BUFFER_SIZE,
            direct_file: true,
        }
    }
}

impl DispatchConfig {
    /// Reject settings the dispatcher cannot honour
    pub fn validate(&self) -> DispatchResult<()> {
        if self.buffer_size == 0 {
            return Err(DispatchError::Config("buffer_size must be positive".into()));
        }
        if let Some(language) = &self.forced_language {
            if language.trim().is_empty() {
                return Err(DispatchError::Config("forced_language is empty".into()));
            }
        }
        Ok(())
    }

    /// Whether recovered errors are reported verbosely
    pub fn verbose_errors(&self) -> bool {
        self.error_report == ErrorReport::Verbose
    }
}

/// Write a configuration file
pub fn write_config(config: &DispatchConfig, path: &Path) -> Result<()> {
    let json = serde_json::to_vec_pretty(config).context("Failed to serialize config")?;
    write_atomic(path, &json).with_context(|| format!("Failed to write config: {:?}", path))?;
    Ok(())
}

/// Load a configuration file; missing fields take their defaults
pub fn load_config(path: &Path) -> Result<DispatchConfig> {
    let data = std::fs::read(path).with_context(|| format!("Failed to read config: {:?}", path))?;
    let config: DispatchConfig =
        serde_json::from_slice(&data).context("Failed to deserialize config")?;
    config.validate()?;
    Ok(config)
}
