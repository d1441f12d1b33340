//! ResourceLedger: the controller's authoritative record of which peer owns
//! the microphone and speaker. Mutated only by the controller.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    Available,
    OwnedByController,
    OwnedByDevice,
    Paused,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceLedger {
    pub mic: ResourceState,
    pub spk: ResourceState,
}

impl Default for ResourceLedger {
    fn default() -> Self {
        Self {
            mic: ResourceState::Available,
            spk: ResourceState::Available,
        }
    }
}

impl ResourceLedger {
    /// `mic` and `spk` must never both be `owned_by_device` simultaneously.
    pub fn check_invariant(&self) -> Result<(), String> {
        if self.mic == ResourceState::OwnedByDevice && self.spk == ResourceState::OwnedByDevice {
            return Err("mic and spk both owned_by_device".to_string());
        }
        Ok(())
    }

    pub fn both_available(&self) -> bool {
        self.mic == ResourceState::Available && self.spk == ResourceState::Available
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_both_available() {
        let ledger = ResourceLedger::default();
        assert!(ledger.both_available());
        assert!(ledger.check_invariant().is_ok());
    }

    #[test]
    fn flags_double_device_ownership() {
        let ledger = ResourceLedger {
            mic: ResourceState::OwnedByDevice,
            spk: ResourceState::OwnedByDevice,
        };
        assert!(ledger.check_invariant().is_err());
    }
}
