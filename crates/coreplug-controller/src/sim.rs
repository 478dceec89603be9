//! In-memory simulated pool.
//!
//! Implements both [`UnitPowerDriver`] and [`LoadTelemetry`] over a
//! mutex-protected table. Used by the daemon's `simulate` mode and by the
//! test suites, which inspect the recorded power-state history.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use tokio::time::Instant;

use coreplug_core::{PRIMARY_UNIT, UnitId};

use crate::collaborators::{LoadTelemetry, UnitPowerDriver};
use crate::error::DriverError;

/// A recorded power-state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerOp {
    pub at: Instant,
    pub unit: UnitId,
    pub online: bool,
}

#[derive(Debug)]
struct SimState {
    online: Vec<bool>,
    loads: Vec<Option<f64>>,
    refused: HashSet<UnitId>,
    history: Vec<PowerOp>,
}

#[derive(Debug)]
pub struct SimulatedPool {
    capacity: usize,
    state: Mutex<SimState>,
}

impl SimulatedPool {
    /// A pool with only the primary unit online and no load.
    pub fn new(capacity: usize) -> Self {
        Self::with_online(capacity, &[PRIMARY_UNIT])
    }

    pub fn with_online(capacity: usize, online_units: &[UnitId]) -> Self {
        let mut online = vec![false; capacity];
        for &u in online_units {
            if let Some(slot) = online.get_mut(u) {
                *slot = true;
            }
        }
        Self {
            capacity,
            state: Mutex::new(SimState {
                online,
                loads: vec![Some(0.0); capacity],
                refused: HashSet::new(),
                history: Vec::new(),
            }),
        }
    }

    pub fn set_load(&self, unit: UnitId, load: Option<f64>) {
        if let Some(slot) = self.lock().loads.get_mut(unit) {
            *slot = load;
        }
    }

    pub fn set_all_loads(&self, load: Option<f64>) {
        self.lock().loads.fill(load);
    }

    /// Make every power-state change of `unit` fail until [`allow`](Self::allow).
    pub fn refuse(&self, unit: UnitId) {
        self.lock().refused.insert(unit);
    }

    pub fn allow(&self, unit: UnitId) {
        self.lock().refused.remove(&unit);
    }

    /// Every successful power-state change so far.
    pub fn history(&self) -> Vec<PowerOp> {
        self.lock().history.clone()
    }

    pub fn deactivations(&self) -> Vec<PowerOp> {
        self.history().into_iter().filter(|op| !op.online).collect()
    }

    pub fn activations(&self) -> Vec<PowerOp> {
        self.history().into_iter().filter(|op| op.online).collect()
    }

    fn set_online(&self, unit: UnitId, online: bool) -> Result<(), DriverError> {
        let mut state = self.lock();
        if unit >= self.capacity {
            return Err(DriverError::OutOfRange {
                unit,
                capacity: self.capacity,
            });
        }
        if state.refused.contains(&unit) || (unit == PRIMARY_UNIT && !online) {
            return Err(DriverError::Refused(unit));
        }
        if state.online[unit] != online {
            state.online[unit] = online;
            state.history.push(PowerOp {
                at: Instant::now(),
                unit,
                online,
            });
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl UnitPowerDriver for SimulatedPool {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn activate(&self, unit: UnitId) -> Result<(), DriverError> {
        self.set_online(unit, true)
    }

    fn deactivate(&self, unit: UnitId) -> Result<(), DriverError> {
        self.set_online(unit, false)
    }

    fn is_online(&self, unit: UnitId) -> bool {
        self.lock().online.get(unit).copied().unwrap_or(false)
    }
}

impl LoadTelemetry for SimulatedPool {
    fn running_average(&self, unit: UnitId) -> Option<f64> {
        self.lock().loads.get(unit).copied().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_only_real_changes() {
        let pool = SimulatedPool::new(4);
        pool.activate(2).unwrap();
        pool.activate(2).unwrap();
        pool.deactivate(2).unwrap();

        let history = pool.history();
        assert_eq!(history.len(), 2);
        assert!(history[0].online && !history[1].online);
        assert_eq!(pool.online_units(), vec![0]);
    }

    #[test]
    fn primary_cannot_go_offline() {
        let pool = SimulatedPool::new(2);
        assert!(matches!(pool.deactivate(0), Err(DriverError::Refused(0))));
        assert!(pool.is_online(0));
    }

    #[test]
    fn refused_unit_fails_until_allowed() {
        let pool = SimulatedPool::new(2);
        pool.refuse(1);
        assert!(pool.activate(1).is_err());
        pool.allow(1);
        pool.activate(1).unwrap();
        assert_eq!(pool.online_count(), 2);
    }

    #[test]
    fn out_of_range_rejected() {
        let pool = SimulatedPool::new(2);
        assert!(matches!(
            pool.activate(5),
            Err(DriverError::OutOfRange { unit: 5, capacity: 2 })
        ));
    }
}
