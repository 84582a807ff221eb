//! Fault injection for the simulated chip.

use super::rng::MockRng;
use crate::error::{X4Error, X4Result};
use parking_lot::Mutex;
use std::collections::HashMap;

/// A failure the mock should produce.
#[derive(Debug, Clone, PartialEq)]
pub enum FaultScenario {
    /// `operation` succeeds `count` times, then fails with [`X4Error::Nok`].
    FailAfterN {
        /// Driver method name, e.g. `"read_frame_normalized"`
        operation: &'static str,
        /// Successful calls before failing
        count: u32,
    },
    /// Every operation fails with this raw status.
    HardwareFault {
        /// Status code, e.g. 27 for a PLL lock failure
        code: u32,
    },
    /// Any operation fails with probability `rate`.
    RandomFailures {
        /// Failure probability in `[0, 1]`
        rate: f64,
    },
}

/// Per-operation call counters plus the active scenarios.
#[derive(Debug, Default)]
pub(crate) struct FaultInjector {
    scenarios: Mutex<Vec<FaultScenario>>,
    calls: Mutex<HashMap<&'static str, u32>>,
}

impl FaultInjector {
    pub fn set(&self, scenarios: Vec<FaultScenario>) {
        *self.scenarios.lock() = scenarios;
    }

    pub fn clear(&self) {
        self.scenarios.lock().clear();
    }

    pub fn calls(&self, operation: &str) -> u32 {
        self.calls.lock().get(operation).copied().unwrap_or(0)
    }

    /// Count the call, then decide whether it fails.
    pub fn check(&self, operation: &'static str, rng: &MockRng) -> X4Result<()> {
        let previous = {
            let mut calls = self.calls.lock();
            let n = calls.entry(operation).or_insert(0);
            let previous = *n;
            *n += 1;
            previous
        };

        for scenario in self.scenarios.lock().iter() {
            match *scenario {
                FaultScenario::FailAfterN {
                    operation: op,
                    count,
                } if op == operation && previous >= count => {
                    return Err(X4Error::Nok);
                }
                FaultScenario::HardwareFault { code } => return Err(X4Error::Hardware(code)),
                FaultScenario::RandomFailures { rate } if rng.should_fail(rate) => {
                    return Err(X4Error::Nok);
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fail_after_n() {
        let rng = MockRng::new(Some(1));
        let faults = FaultInjector::default();
        faults.set(vec![FaultScenario::FailAfterN {
            operation: "init",
            count: 2,
        }]);

        assert!(faults.check("init", &rng).is_ok());
        assert!(faults.check("set_fps", &rng).is_ok());
        assert!(faults.check("init", &rng).is_ok());
        assert_eq!(faults.check("init", &rng), Err(X4Error::Nok));
        assert_eq!(faults.calls("init"), 3);
    }

    #[test]
    fn test_hardware_fault_hits_everything() {
        let rng = MockRng::new(Some(1));
        let faults = FaultInjector::default();
        faults.set(vec![FaultScenario::HardwareFault { code: 28 }]);
        assert_eq!(faults.check("set_tx_power", &rng), Err(X4Error::Hardware(28)));

        faults.clear();
        assert!(faults.check("set_tx_power", &rng).is_ok());
    }
}
