//! Pool actuator — moves the online-unit count toward a target.
//!
//! # Algorithm
//!
//! ```text
//! target = clamp(target, bounds)
//! loop:
//!     online = driver.online_count()
//!     if online == target: done
//!     if online > target:
//!         if boost window active: refuse (whole step)
//!         pick lowest-load online unit, unlocked, non-primary,
//!              with load < 2 * nr_run_threshold / online
//!         deactivate it
//!     else:
//!         activate lowest-id offline non-primary unit, down-lock it
//! ```
//!
//! Each unit is touched at most once per pass, so a pass always ends.
//! Stopping early is final for that pass; the next tick tries again.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, warn};

use coreplug_core::{Bounds, PRIMARY_UNIT, UnitId};

use crate::boost::BoostWindow;
use crate::collaborators::UnitPowerDriver;
use crate::down_lock::DownLockRegistry;

/// Everything a pass needs besides the target, captured from the shared
/// state when the pass is queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActuationContext {
    pub bounds: Bounds,
    pub boost: Option<BoostWindow>,
    /// Per-unit deactivation threshold in centi-threads, before scaling.
    pub nr_run_threshold: u32,
}

/// Why a pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Satisfied,
    /// A shrink was refused because a boost is still in effect.
    BoostLocked,
    /// No unlocked, eligible candidate was left.
    NoCandidate,
}

/// Outcome of one [`PoolActuator::apply`] pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActuationReport {
    pub target: usize,
    pub activated: Vec<UnitId>,
    pub deactivated: Vec<UnitId>,
    pub failed: Vec<UnitId>,
    pub stop: StopReason,
    pub online: usize,
}

impl ActuationReport {
    /// Whether the pass moved any unit.
    pub fn changed(&self) -> bool {
        !self.activated.is_empty() || !self.deactivated.is_empty()
    }
}

pub struct PoolActuator {
    driver: Arc<dyn UnitPowerDriver>,
    locks: DownLockRegistry,
}

impl PoolActuator {
    /// Actuator over `driver`, protecting fresh activations with `locks`.
    pub fn new(driver: Arc<dyn UnitPowerDriver>, locks: DownLockRegistry) -> Self {
        Self { driver, locks }
    }

    /// The down-lock table consulted when picking shrink candidates.
    pub fn locks(&self) -> &DownLockRegistry {
        &self.locks
    }

    /// Mutable access for the per-tick sweep and teardown.
    pub fn locks_mut(&mut self) -> &mut DownLockRegistry {
        &mut self.locks
    }

    /// Units the driver currently reports online.
    pub fn online_count(&self) -> usize {
        self.driver.online_count()
    }

    /// Run one pass toward `target`. `loads` is the sampler's per-unit
    /// cache in centi-threads.
    pub fn apply(&mut self, target: usize, ctx: &ActuationContext, loads: &[u32], now: Instant) -> ActuationReport {
        let capacity = self.driver.capacity();
        let target = ctx.bounds.clamp(target).clamp(1, capacity.max(1));

        let mut touched = vec![false; capacity];
        let mut report = ActuationReport {
            target,
            activated: Vec::new(),
            deactivated: Vec::new(),
            failed: Vec::new(),
            stop: StopReason::Satisfied,
            online: 0,
        };

        loop {
            let online = self.driver.online_count();
            if online == target {
                report.stop = StopReason::Satisfied;
                break;
            }

            if online > target {
                if ctx.boost.is_some_and(|b| b.is_active(now)) {
                    debug!(online, target, "shrink refused inside boost window");
                    report.stop = StopReason::BoostLocked;
                    break;
                }
                let Some(unit) = self.shrink_candidate(ctx, loads, online, &touched, now) else {
                    report.stop = StopReason::NoCandidate;
                    break;
                };
                touched[unit] = true;
                match self.driver.deactivate(unit) {
                    Ok(()) => report.deactivated.push(unit),
                    Err(e) => {
                        warn!(unit, error = %e, "failed to deactivate unit");
                        report.failed.push(unit);
                    }
                }
            } else {
                let Some(unit) = self.grow_candidate(&touched) else {
                    report.stop = StopReason::NoCandidate;
                    break;
                };
                touched[unit] = true;
                match self.driver.activate(unit) {
                    Ok(()) => {
                        self.locks.apply_lock(unit, now);
                        report.activated.push(unit);
                    }
                    Err(e) => {
                        warn!(unit, error = %e, "failed to activate unit");
                        report.failed.push(unit);
                    }
                }
            }
        }

        report.online = self.driver.online_count();
        report
    }

    /// Bring every offline unit online. Non-primary units are down-locked
    /// when `lock` is set. Returns the units that came up.
    pub fn force_activate_all(&mut self, lock: bool, now: Instant) -> Vec<UnitId> {
        let mut activated = Vec::new();
        for unit in 0..self.driver.capacity() {
            if self.driver.is_online(unit) {
                continue;
            }
            match self.driver.activate(unit) {
                Ok(()) => {
                    if lock && unit != PRIMARY_UNIT {
                        self.locks.apply_lock(unit, now);
                    }
                    activated.push(unit);
                }
                Err(e) => warn!(unit, error = %e, "failed to activate unit"),
            }
        }
        activated
    }

    fn grow_candidate(&self, touched: &[bool]) -> Option<UnitId> {
        (0..touched.len()).find(|&u| u != PRIMARY_UNIT && !touched[u] && !self.driver.is_online(u))
    }

    /// Lowest cached load wins; ties go to the highest unit id.
    fn shrink_candidate(
        &self,
        ctx: &ActuationContext,
        loads: &[u32],
        online: usize,
        touched: &[bool],
        now: Instant,
    ) -> Option<UnitId> {
        let threshold = (ctx.nr_run_threshold as u64 * 2) / online.max(1) as u64;
        (0..touched.len())
            .filter(|&u| u != PRIMARY_UNIT && !touched[u])
            .filter(|&u| self.driver.is_online(u) && !self.locks.is_locked(u, now))
            .map(|u| (u, loads.get(u).copied().unwrap_or(0) as u64))
            .filter(|&(_, load)| load < threshold)
            .min_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
            .map(|(u, _)| u)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::sim::SimulatedPool;

    const SEC: Duration = Duration::from_secs(1);

    fn ctx(min: usize, max: usize) -> ActuationContext {
        ActuationContext {
            bounds: Bounds {
                min_active: min,
                max_active: max,
            },
            boost: None,
            nr_run_threshold: 500,
        }
    }

    fn actuator(pool: &Arc<SimulatedPool>) -> PoolActuator {
        PoolActuator::new(pool.clone(), DownLockRegistry::new(pool.capacity(), SEC))
    }

    #[test]
    fn grows_lowest_id_first_and_locks() {
        let pool = Arc::new(SimulatedPool::new(4));
        let mut act = actuator(&pool);
        let t0 = Instant::now();

        let report = act.apply(3, &ctx(1, 4), &[0; 4], t0);
        assert_eq!(report.activated, vec![1, 2]);
        assert_eq!(report.stop, StopReason::Satisfied);
        assert_eq!(report.online, 3);
        assert!(act.locks().is_locked(1, t0));
        assert!(act.locks().is_locked(2, t0));
    }

    #[test]
    fn shrinks_lowest_load_ties_to_highest_id() {
        let pool = Arc::new(SimulatedPool::with_online(4, &[0, 1, 2, 3]));
        let mut act = actuator(&pool);

        let report = act.apply(3, &ctx(1, 4), &[0, 10, 10, 10], Instant::now());
        assert_eq!(report.deactivated, vec![3]);

        let report = act.apply(2, &ctx(1, 4), &[0, 20, 5, 0], Instant::now());
        assert_eq!(report.deactivated, vec![2]);
    }

    #[test]
    fn locked_units_are_skipped() {
        let pool = Arc::new(SimulatedPool::new(4));
        let mut act = actuator(&pool);
        let t0 = Instant::now();
        act.apply(4, &ctx(1, 4), &[0; 4], t0);

        let report = act.apply(1, &ctx(1, 4), &[0; 4], t0 + Duration::from_millis(999));
        assert!(report.deactivated.is_empty());
        assert_eq!(report.stop, StopReason::NoCandidate);

        let report = act.apply(1, &ctx(1, 4), &[0; 4], t0 + SEC);
        assert_eq!(report.deactivated, vec![3, 2, 1]);
        assert_eq!(report.online, 1);
    }

    #[test]
    fn primary_never_deactivated() {
        let pool = Arc::new(SimulatedPool::with_online(2, &[0, 1]));
        let mut act = actuator(&pool);
        // Bounds that would allow zero are clamped to one.
        let report = act.apply(0, &ctx(1, 2), &[0, 0], Instant::now());
        assert_eq!(report.deactivated, vec![1]);
        assert!(pool.is_online(0));
        assert!(pool.deactivations().iter().all(|op| op.unit != PRIMARY_UNIT));
    }

    #[test]
    fn busy_units_are_not_candidates() {
        let pool = Arc::new(SimulatedPool::with_online(4, &[0, 1, 2, 3]));
        let mut act = actuator(&pool);
        // Threshold at four online: 2 * 500 / 4 = 250, then 333 at three.
        let report = act.apply(2, &ctx(1, 4), &[0, 400, 350, 100], Instant::now());
        assert_eq!(report.deactivated, vec![3]);
        assert_eq!(report.stop, StopReason::NoCandidate);
        assert_eq!(report.online, 3);
    }

    #[test]
    fn shrink_refused_inside_boost_window() {
        let pool = Arc::new(SimulatedPool::with_online(4, &[0, 1, 2, 3]));
        let mut act = actuator(&pool);
        let t0 = Instant::now();
        let c = ActuationContext {
            boost: Some(BoostWindow::new(t0, Duration::from_millis(500))),
            ..ctx(1, 4)
        };

        let report = act.apply(2, &c, &[0; 4], t0 + Duration::from_millis(100));
        assert_eq!(report.stop, StopReason::BoostLocked);
        assert!(report.deactivated.is_empty());

        let report = act.apply(2, &c, &[0; 4], t0 + Duration::from_millis(500));
        assert_eq!(report.deactivated, vec![3, 2]);
    }

    #[test]
    fn growth_ignores_boost_window() {
        let pool = Arc::new(SimulatedPool::new(4));
        let mut act = actuator(&pool);
        let t0 = Instant::now();
        let c = ActuationContext {
            boost: Some(BoostWindow::new(t0, SEC)),
            ..ctx(1, 4)
        };
        assert_eq!(act.apply(2, &c, &[0; 4], t0).activated, vec![1]);
    }

    #[test]
    fn driver_failure_gives_partial_progress() {
        let pool = Arc::new(SimulatedPool::new(4));
        pool.refuse(1);
        let mut act = actuator(&pool);

        let report = act.apply(4, &ctx(1, 4), &[0; 4], Instant::now());
        assert_eq!(report.failed, vec![1]);
        assert_eq!(report.activated, vec![2, 3]);
        assert_eq!(report.stop, StopReason::NoCandidate);
        assert_eq!(report.online, 3);
    }

    #[test]
    fn idempotent_at_target() {
        let pool = Arc::new(SimulatedPool::with_online(4, &[0, 1]));
        let mut act = actuator(&pool);
        let now = Instant::now();
        for _ in 0..3 {
            let report = act.apply(2, &ctx(1, 4), &[0; 4], now);
            assert!(!report.changed());
            assert_eq!(report.stop, StopReason::Satisfied);
        }
        assert!(pool.history().is_empty());
    }

    #[test]
    fn target_clamped_to_bounds() {
        let pool = Arc::new(SimulatedPool::new(4));
        let mut act = actuator(&pool);
        let report = act.apply(4, &ctx(1, 2), &[0; 4], Instant::now());
        assert_eq!(report.target, 2);
        assert_eq!(report.online, 2);
    }

    #[test]
    fn force_activate_all_locks_non_primary() {
        let pool = Arc::new(SimulatedPool::with_online(4, &[0, 2]));
        let mut act = actuator(&pool);
        let t0 = Instant::now();

        assert_eq!(act.force_activate_all(true, t0), vec![1, 3]);
        assert_eq!(pool.online_count(), 4);
        assert_eq!(act.locks().deadlines(t0), vec![(1, t0 + SEC), (3, t0 + SEC)]);

        let pool = Arc::new(SimulatedPool::new(3));
        let mut act = actuator(&pool);
        act.force_activate_all(false, t0);
        assert!(act.locks().deadlines(t0).is_empty());
    }
}
