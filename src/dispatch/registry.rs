//! Implementation registry
//!
//! An ordered, fixed collection of implementations built once per dispatcher.
//! Slot 0 is always the control layer; the remaining slots hold page
//! description languages in registration order, which is also the tie-break
//! order for auto-sensing.

use std::fmt;

use super::error::{DispatchError, DispatchResult};
use super::implementation::{Characteristics, ControlLayer, Implementation};

/// Position of an implementation in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub usize);

impl SlotId {
    /// The control layer's slot
    pub const CONTROL: SlotId = SlotId(0);

    /// Whether this is the control layer's slot
    pub fn is_control(self) -> bool {
        self == Self::CONTROL
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot {}", self.0)
    }
}

/// Collects implementations before the registry is frozen
#[derive(Default)]
pub struct RegistryBuilder {
    control: Option<Box<dyn Implementation>>,
    languages: Vec<Box<dyn Implementation>>,
}

impl RegistryBuilder {
    /// Start an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the control layer (slot 0)
    pub fn control<I>(mut self, control: I) -> Self
    where
        I: Implementation + 'static,
    {
        self.control = Some(Box::new(control));
        self
    }

    /// Append a page description language
    pub fn register<I>(mut self, language: I) -> Self
    where
        I: Implementation + 'static,
    {
        self.languages.push(Box::new(language));
        self
    }

    /// Append an already boxed implementation
    pub fn register_boxed(mut self, language: Box<dyn Implementation>) -> Self {
        self.languages.push(language);
        self
    }

    /// Freeze the registry
    ///
    /// Fails if no control layer was given, if it does not expose a variable
    /// store, or if two implementations share a name.
    pub fn build(self) -> DispatchResult<Registry> {
        let control = self
            .control
            .ok_or_else(|| DispatchError::Registry("no control layer registered".into()))?;
        if control.as_control_layer().is_none() {
            return Err(DispatchError::Registry(format!(
                "{} does not expose a control-layer variable store",
                control.name()
            )));
        }

        let mut implementations = Vec::with_capacity(self.languages.len() + 1);
        implementations.push(control);
        implementations.extend(self.languages);

        let names: Vec<String> = implementations.iter().map(|i| i.name()).collect();
        for (index, name) in names.iter().enumerate() {
            if names[..index].iter().any(|seen| seen.eq_ignore_ascii_case(name)) {
                return Err(DispatchError::Registry(format!(
                    "language '{}' registered twice",
                    name
                )));
            }
        }

        Ok(Registry {
            implementations,
            names,
        })
    }
}

/// Frozen, ordered set of implementations
pub struct Registry {
    implementations: Vec<Box<dyn Implementation>>,
    names: Vec<String>,
}

impl Registry {
    /// Start building a registry
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Number of slots, control layer included
    pub fn len(&self) -> usize {
        self.implementations.len()
    }

    /// Whether only the control layer is registered
    pub fn has_languages(&self) -> bool {
        self.implementations.len() > 1
    }

    /// Implementation in `slot`
    pub fn get(&self, slot: SlotId) -> Option<&dyn Implementation> {
        self.implementations.get(slot.0).map(|i| i.as_ref())
    }

    /// Mutable implementation in `slot`
    pub fn get_mut(&mut self, slot: SlotId) -> Option<&mut (dyn Implementation + 'static)> {
        self.implementations.get_mut(slot.0).map(|i| i.as_mut())
    }

    /// Name of the implementation in `slot`
    pub fn name(&self, slot: SlotId) -> &str {
        self.names.get(slot.0).map(String::as_str).unwrap_or("none")
    }

    /// Slot answering to `language`, compared case-insensitively
    pub fn find(&self, language: &str) -> Option<SlotId> {
        self.names
            .iter()
            .position(|name| name.eq_ignore_ascii_case(language.trim()))
            .map(SlotId)
    }

    /// Slots 1..N, in registration order
    pub fn language_slots(&self) -> impl Iterator<Item = SlotId> + '_ {
        (1..self.implementations.len()).map(SlotId)
    }

    /// The control layer's variable store
    pub fn control_layer(&self) -> &dyn ControlLayer {
        // Checked non-None in `RegistryBuilder::build`.
        match self.implementations[0].as_control_layer() {
            Some(control) => control,
            None => &NoVariables,
        }
    }

    /// Characteristics of every slot, in order
    pub fn characteristics(&self) -> Vec<Characteristics> {
        self.implementations
            .iter()
            .map(|i| i.characteristics())
            .collect()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry").field("slots", &self.names).finish()
    }
}

struct NoVariables;

impl ControlLayer for NoVariables {
    fn get_variable(&self, _name: &str) -> Option<String> {
        None
    }
}
