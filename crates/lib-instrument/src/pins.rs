//! Output pin bank.
//!
//! Records the level of every output line and each transition with the
//! clock cycle it happened on. The transition log is the observable
//! hardware behaviour of a run: repeatability and isolation ordering are
//! checked against it.

use lib_types::sequence::{PinMask, PinRole};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};

/// Extension trait for recovering from poisoned mutexes.
///
/// A panicking hardware thread must not leave the pin bank unusable: the
/// supervisor still has to drive every line safe afterwards.
pub(crate) trait RecoverMutex<T> {
    fn lock_recover(&self) -> MutexGuard<'_, T>;
}

impl<T> RecoverMutex<T> for Mutex<T> {
    fn lock_recover(&self) -> MutexGuard<'_, T> {
        self.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Mutex was poisoned, recovering data");
            poisoned.into_inner()
        })
    }
}

/// Output level change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinTransition {
    pub cycle: u64,
    /// Full output level after the change.
    pub level: PinMask,
}

#[derive(Debug, Default)]
struct PinLog {
    level: PinMask,
    last_cycle: u64,
    transitions: Vec<PinTransition>,
}

/// Shared output lines.
#[derive(Debug, Default)]
pub struct PinBank {
    log: Mutex<PinLog>,
}

impl PinBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drive the lines selected by `lines` to `value` at `cycle`.
    pub fn drive(&self, cycle: u64, value: PinMask, lines: PinMask) {
        let mut log = self.log.lock_recover();
        let next = log.level.with_lines(value, lines);
        log.last_cycle = log.last_cycle.max(cycle);
        if next != log.level {
            log.level = next;
            log.transitions.push(PinTransition { cycle, level: next });
        }
    }

    /// Drive every output low at the latest cycle seen.
    pub fn release(&self) {
        let cycle = self.log.lock_recover().last_cycle;
        self.drive(cycle, PinMask::EMPTY, PinMask::ALL);
    }

    /// Current output level.
    pub fn level(&self) -> PinMask {
        self.log.lock_recover().level
    }

    pub fn is_asserted(&self, role: PinRole) -> bool {
        let mask = role.mask();
        !mask.is_empty() && self.level().contains(mask)
    }

    /// Transitions since the last reset.
    pub fn transitions(&self) -> Vec<PinTransition> {
        self.log.lock_recover().transitions.clone()
    }

    /// Cycles at which `role` went high.
    pub fn rising_edges(&self, role: PinRole) -> Vec<u64> {
        self.edges(role, true)
    }

    /// Cycles at which `role` went low.
    pub fn falling_edges(&self, role: PinRole) -> Vec<u64> {
        self.edges(role, false)
    }

    fn edges(&self, role: PinRole, rising: bool) -> Vec<u64> {
        let mask = role.mask();
        let log = self.log.lock_recover();
        let mut previous = PinMask::EMPTY;
        let mut edges = Vec::new();
        for t in &log.transitions {
            let was = previous.contains(mask);
            let is = t.level.contains(mask);
            if !mask.is_empty() && was != is && is == rising {
                edges.push(t.cycle);
            }
            previous = t.level;
        }
        edges
    }

    /// Start a fresh log with every line low.
    pub fn reset(&self) {
        *self.log.lock_recover() = PinLog::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_changes_recorded() {
        let bank = PinBank::new();
        bank.drive(0, PinMask::SEQUENCER_LINES, PinMask::SEQUENCER_LINES);
        bank.drive(10, PinMask::SEQUENCER_LINES, PinMask::SEQUENCER_LINES);
        bank.drive(20, PinMask::RX_ISOLATION, PinMask::SEQUENCER_LINES);

        let t = bank.transitions();
        assert_eq!(t.len(), 2);
        assert_eq!(t[1], PinTransition { cycle: 20, level: PinMask::RX_ISOLATION });
        assert!(bank.is_asserted(PinRole::RxIsolation));
        assert!(!bank.is_asserted(PinRole::RfPulse));
    }

    #[test]
    fn test_lines_are_masked() {
        let bank = PinBank::new();
        bank.drive(0, PinMask::POLARIZATION, PinMask::POLARIZATION);
        // Sequencer lines cannot clear polarization.
        bank.drive(5, PinMask::EMPTY, PinMask::SEQUENCER_LINES);
        assert_eq!(bank.level(), PinMask::POLARIZATION);

        bank.release();
        assert_eq!(bank.level(), PinMask::EMPTY);
        assert_eq!(bank.transitions().last().map(|t| t.cycle), Some(5));
    }

    #[test]
    fn test_edges() {
        let bank = PinBank::new();
        bank.drive(0, PinMask::POLARIZATION, PinMask::ALL);
        bank.drive(100, PinMask::EMPTY, PinMask::ALL);
        bank.drive(150, PinMask::RX_ISOLATION, PinMask::ALL);

        assert_eq!(bank.rising_edges(PinRole::Polarization), vec![0]);
        assert_eq!(bank.falling_edges(PinRole::Polarization), vec![100]);
        assert_eq!(bank.rising_edges(PinRole::RxIsolation), vec![150]);
        assert!(bank.rising_edges(PinRole::AdcInput).is_empty());

        bank.reset();
        assert!(bank.transitions().is_empty());
    }
}
