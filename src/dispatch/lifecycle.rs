//! Instance lifecycle manager
//!
//! Owns the registry, the output device, and the single "current
//! implementation" slot. Switching always clears the slot before the outgoing
//! implementation is deinitialized, and sets it only after the incoming one
//! initialized successfully, so the slot never names a torn-down or
//! half-initialized implementation and at most one is live at a time.

use super::device::OutputDevice;
use super::error::{DispatchError, DispatchResult, PdlError, SwitchStage};
use super::implementation::Implementation;
use super::registry::{Registry, SlotId};

/// Current implementation together with the device it may use
pub struct Active<'a> {
    /// Slot of the current implementation
    pub slot: SlotId,
    /// The current implementation
    pub implementation: &'a mut (dyn Implementation + 'static),
    /// The shared output device
    pub device: &'a mut (dyn OutputDevice + 'static),
}

/// Counters for switch bookkeeping
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LifecycleStats {
    /// Completed switches away from a live implementation (reverts included)
    pub switches: usize,
    /// `initialize` calls issued
    pub initializations: usize,
    /// `deinitialize` calls issued
    pub deinitializations: usize,
}

/// Holder of the current-implementation slot
pub struct Lifecycle {
    registry: Registry,
    device: Box<dyn OutputDevice>,
    current: Option<SlotId>,
    stats: LifecycleStats,
}

impl Lifecycle {
    /// Create a manager with nothing current
    pub fn new(registry: Registry, device: Box<dyn OutputDevice>) -> Self {
        Self {
            registry,
            device,
            current: None,
            stats: LifecycleStats::default(),
        }
    }

    /// The registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Slot of the current implementation
    pub fn current(&self) -> Option<SlotId> {
        self.current
    }

    /// Name of the current implementation ("none" if nothing is current)
    pub fn current_name(&self) -> &str {
        match self.current {
            Some(slot) => self.registry.name(slot),
            None => "none",
        }
    }

    /// Switch bookkeeping so far
    pub fn stats(&self) -> LifecycleStats {
        self.stats
    }

    /// Borrow the current implementation and the device
    pub fn active(&mut self) -> Option<Active<'_>> {
        let slot = self.current?;
        let implementation = self.registry.get_mut(slot)?;
        Some(Active {
            slot,
            implementation,
            device: self.device.as_mut(),
        })
    }

    /// Borrow the device alone
    pub fn device_mut(&mut self) -> &mut (dyn OutputDevice + 'static) {
        self.device.as_mut()
    }

    /// Make `target` the current implementation
    ///
    /// A no-op when `target` is already current. Any failure is fatal: after a
    /// failed initialize nothing is current.
    pub fn switch_to(&mut self, target: SlotId) -> DispatchResult<()> {
        if self.current == Some(target) {
            return Ok(());
        }
        if self.registry.get(target).is_none() {
            return Err(DispatchError::Registry(format!(
                "{} is not registered",
                target
            )));
        }

        let had_current = self.current.is_some();
        let from = self.current_name().to_string();
        let to = self.registry.name(target).to_string();

        self.teardown_current()
            .map_err(|(stage, source)| DispatchError::Switch {
                from: from.clone(),
                to: to.clone(),
                stage,
                source,
            })?;

        self.bring_up(target)
            .map_err(|(stage, source)| DispatchError::Switch {
                from: from.clone(),
                to: to.clone(),
                stage,
                source,
            })?;

        if had_current {
            self.stats.switches += 1;
        }
        tracing::info!(from = %from, to = %to, "switched implementation");
        Ok(())
    }

    /// Return to the control layer at the end of a job
    ///
    /// Does nothing if the control layer is already current, which keeps its
    /// accumulated state intact across control-layer-only jobs.
    pub fn revert_to_control_layer(&mut self) -> DispatchResult<()> {
        if self.current == Some(SlotId::CONTROL) {
            return Ok(());
        }

        let had_current = self.current.is_some();
        let from = self.current_name().to_string();
        self.teardown_current()
            .and_then(|()| self.bring_up(SlotId::CONTROL))
            .map_err(|(stage, source)| DispatchError::Revert {
                from: from.clone(),
                stage,
                source,
            })?;

        if had_current {
            self.stats.switches += 1;
        }
        tracing::debug!(from = %from, "reverted to control layer");
        Ok(())
    }

    /// Deinitialize whatever is current, leaving nothing current
    pub fn shutdown(&mut self) -> DispatchResult<()> {
        let from = self.current_name().to_string();
        self.teardown_current()
            .map_err(|(stage, source)| DispatchError::Switch {
                from,
                to: "none".to_string(),
                stage,
                source,
            })
    }

    fn teardown_current(&mut self) -> Result<(), (SwitchStage, PdlError)> {
        // The slot is cleared before deinitialize runs.
        let Some(outgoing) = self.current.take() else {
            return Ok(());
        };
        if let Some(implementation) = self.registry.get_mut(outgoing) {
            self.stats.deinitializations += 1;
            implementation
                .deinitialize(self.device.as_mut())
                .map_err(|e| (SwitchStage::Deinitialize, e))?;
        }
        Ok(())
    }

    fn bring_up(&mut self, target: SlotId) -> Result<(), (SwitchStage, PdlError)> {
        let implementation = self.registry.get_mut(target).ok_or_else(|| {
            (
                SwitchStage::Initialize,
                PdlError::Lifecycle(format!("{} is not registered", target)),
            )
        })?;
        self.stats.initializations += 1;
        implementation
            .initialize(self.device.as_mut())
            .map_err(|e| (SwitchStage::Initialize, e))?;
        self.current = Some(target);
        Ok(())
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        if self.current.is_some() {
            if let Err(err) = self.shutdown() {
                tracing::warn!(error = %err, "deinitialize during teardown failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::device::NullDevice;
    use crate::languages::{Pcl, Pjl, PostScript};

    fn lifecycle() -> Lifecycle {
        let registry = Registry::builder()
            .control(Pjl::new())
            .register(Pcl::new())
            .register(PostScript::new())
            .build()
            .unwrap();
        Lifecycle::new(registry, Box::new(NullDevice::new()))
    }

    #[test]
    fn test_switch_to_current_is_noop() {
        let mut lifecycle = lifecycle();
        lifecycle.switch_to(SlotId::CONTROL).unwrap();
        lifecycle.switch_to(SlotId::CONTROL).unwrap();

        let stats = lifecycle.stats();
        assert_eq!(stats.switches, 0);
        assert_eq!(stats.initializations, 1);
        assert_eq!(stats.deinitializations, 0);
    }

    #[test]
    fn test_switch_pairs_init_and_deinit() {
        let mut lifecycle = lifecycle();
        lifecycle.switch_to(SlotId::CONTROL).unwrap();
        lifecycle.switch_to(SlotId(1)).unwrap();
        lifecycle.switch_to(SlotId(2)).unwrap();
        lifecycle.revert_to_control_layer().unwrap();

        assert_eq!(lifecycle.current(), Some(SlotId::CONTROL));
        let stats = lifecycle.stats();
        assert_eq!(stats.switches, 3);
        assert_eq!(stats.initializations, 4);
        assert_eq!(stats.deinitializations, 3);
    }

    #[test]
    fn test_revert_when_already_control_keeps_state() {
        let mut lifecycle = lifecycle();
        lifecycle.switch_to(SlotId::CONTROL).unwrap();
        lifecycle.revert_to_control_layer().unwrap();
        assert_eq!(lifecycle.stats().initializations, 1);
    }

    #[test]
    fn test_unknown_slot_is_rejected_without_teardown() {
        let mut lifecycle = lifecycle();
        lifecycle.switch_to(SlotId(1)).unwrap();
        assert!(lifecycle.switch_to(SlotId(9)).is_err());
        assert_eq!(lifecycle.current(), Some(SlotId(1)));
    }

    #[test]
    fn test_shutdown_leaves_nothing_current() {
        let mut lifecycle = lifecycle();
        lifecycle.switch_to(SlotId(2)).unwrap();
        lifecycle.shutdown().unwrap();
        assert_eq!(lifecycle.current(), None);
        assert!(lifecycle.active().is_none());
    }
}
