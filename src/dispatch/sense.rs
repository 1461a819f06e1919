//! Language selection for new jobs
//!
//! Precedence, first match wins:
//! 1. a language forced by configuration;
//! 2. a Universal Exit at the start of the prefix selects the control layer;
//! 3. the control layer's `LANGUAGE` variable, when it names a registered PDL;
//! 4. auto-sense scoring over slots 1..N, seeded with slot 1 at score 0.
//!
//! Selection is a pure function of the prefix, the registry, and the
//! selector's forced state.

use serde::{Deserialize, Serialize};

use super::implementation::starts_with_universal_exit;
use super::registry::{Registry, SlotId};

/// Bytes buffered before a job's language is chosen (fewer at end-of-data)
pub const AUTO_SENSE_PREFIX: usize = 32;

/// Control-layer variable holding the requested language
pub const LANGUAGE_VARIABLE: &str = "LANGUAGE";

/// Control-layer value meaning "no explicit language"
pub const AUTO_LANGUAGE: &str = "AUTO";

/// How long a configuration-forced language stays in effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ForcedPersistence {
    /// Only the first job of a run; auto-sensing resumes afterwards
    #[default]
    NextJob,
    /// Every job of the run
    EveryJob,
}

/// Why a language was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum SelectionReason {
    /// Forced by configuration
    Forced,
    /// Prefix began with the Universal Exit marker
    UniversalExit,
    /// Named by the control layer's language variable
    ControlVariable,
    /// Highest auto-sense score
    AutoSense {
        /// Winning score
        score: u32,
    },
    /// Nothing scored; the default slot was used
    Default,
    /// Control-layer commands supplied outside the stream
    Injected,
}

/// A language choice for the next job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    /// Chosen slot
    pub slot: SlotId,
    /// Why it was chosen
    pub reason: SelectionReason,
}

/// Score-based detection over the registry
///
/// A Universal Exit prefix selects the control layer without scoring. Ties
/// keep the earliest slot, including the seeded default.
pub fn auto_sense(registry: &Registry, prefix: &[u8]) -> Selection {
    if starts_with_universal_exit(prefix) {
        return Selection {
            slot: SlotId::CONTROL,
            reason: SelectionReason::UniversalExit,
        };
    }

    let mut best = Selection {
        slot: if registry.has_languages() {
            SlotId(1)
        } else {
            SlotId::CONTROL
        },
        reason: SelectionReason::Default,
    };
    let mut best_score = 0;

    for slot in registry.language_slots() {
        let Some(implementation) = registry.get(slot) else {
            continue;
        };
        let score = implementation.auto_sense(prefix);
        if score > best_score {
            best_score = score;
            best = Selection {
                slot,
                reason: SelectionReason::AutoSense { score },
            };
        }
    }

    best
}

/// Language named by the control layer, if it names a registered PDL
pub fn control_variable_selection(registry: &Registry) -> Option<SlotId> {
    let value = registry.control_layer().get_variable(LANGUAGE_VARIABLE)?;
    if value.trim().eq_ignore_ascii_case(AUTO_LANGUAGE) {
        return None;
    }
    registry.find(&value).filter(|slot| !slot.is_control())
}

/// Run-scoped selection state
#[derive(Debug, Clone)]
pub struct Selector {
    forced: Option<SlotId>,
    persistence: ForcedPersistence,
}

impl Selector {
    /// Create a selector with no forced language
    pub fn new(persistence: ForcedPersistence) -> Self {
        Self {
            forced: None,
            persistence,
        }
    }

    /// Set (or clear) the configuration-forced language for the coming run
    pub fn arm(&mut self, forced: Option<SlotId>) {
        self.forced = forced;
    }

    /// Currently forced language
    pub fn forced(&self) -> Option<SlotId> {
        self.forced
    }

    /// Choose the implementation for a job whose buffered prefix is `prefix`
    pub fn select(&self, registry: &Registry, prefix: &[u8]) -> Selection {
        if let Some(slot) = self.forced {
            return Selection {
                slot,
                reason: SelectionReason::Forced,
            };
        }

        if starts_with_universal_exit(prefix) {
            return Selection {
                slot: SlotId::CONTROL,
                reason: SelectionReason::UniversalExit,
            };
        }

        if let Some(slot) = control_variable_selection(registry) {
            return Selection {
                slot,
                reason: SelectionReason::ControlVariable,
            };
        }

        auto_sense(registry, prefix)
    }

    /// A job has started; a next-job-only forced language is spent
    pub fn job_started(&mut self) {
        if self.persistence == ForcedPersistence::NextJob {
            self.forced = None;
        }
    }
}
