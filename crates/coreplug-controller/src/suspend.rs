//! Suspend coordinator — narrows the pool while the display is off.
//!
//! ```text
//! Active --power-off--> PendingSuspend --defer elapsed--> Suspended
//!   ^                        |                                |
//!   +------power-on----------+----------power-on--------------+
//! ```
//!
//! Entering `Suspended` saves the live bounds and replaces them with
//! [`SUSPENDED_BOUNDS`]; resuming restores them exactly. A deferred
//! suspend is identified by a generation number so a stale timer that
//! fires after a cancel is ignored.

use std::time::Duration;

use tracing::{debug, info};

use coreplug_core::{Bounds, PoolConfig, SuspendPhase};

/// Bounds applied while suspended, clamped to the pool capacity.
pub const SUSPENDED_BOUNDS: Bounds = Bounds {
    min_active: 1,
    max_active: 2,
};

pub fn suspended_bounds(capacity: usize) -> Bounds {
    let max_active = SUSPENDED_BOUNDS.max_active.min(capacity.max(1));
    Bounds {
        min_active: SUSPENDED_BOUNDS.min_active.min(max_active),
        max_active,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerOffAction {
    Ignored,
    /// Arm a timer for `delay`, then call
    /// [`SuspendCoordinator::on_defer_elapsed`] with `generation`.
    Defer { generation: u64, delay: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerOnAction {
    None,
    /// A pending suspend was cancelled; nothing else changed.
    CancelPending,
    /// Left `Suspended`; `restored` bounds are live again.
    Resume { restored: Bounds },
    /// Suspend-unaware wake: bring every unit up, bounds untouched.
    WakeBoost,
}

#[derive(Debug)]
pub struct SuspendCoordinator {
    phase: SuspendPhase,
    generation: u64,
    saved: Option<Bounds>,
}

impl Default for SuspendCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl SuspendCoordinator {
    pub fn new() -> Self {
        Self {
            phase: SuspendPhase::Active,
            generation: 0,
            saved: None,
        }
    }

    pub fn phase(&self) -> SuspendPhase {
        self.phase
    }

    pub fn is_suspended(&self) -> bool {
        self.phase == SuspendPhase::Suspended
    }

    /// Bounds that will be restored on resume, while suspended.
    pub fn saved_bounds(&self) -> Option<Bounds> {
        self.saved
    }

    /// Replace the bounds restored on resume. No-op unless suspended.
    pub fn set_saved_bounds(&mut self, bounds: Bounds) -> bool {
        if !self.is_suspended() {
            return false;
        }
        self.saved = Some(bounds);
        true
    }

    pub fn on_power_off(&mut self, aware: bool, defer: Duration) -> PowerOffAction {
        if !aware || self.phase != SuspendPhase::Active {
            debug!(aware, phase = ?self.phase, "power-off ignored");
            return PowerOffAction::Ignored;
        }
        self.phase = SuspendPhase::PendingSuspend;
        self.generation += 1;
        debug!(generation = self.generation, ?defer, "suspend pending");
        PowerOffAction::Defer {
            generation: self.generation,
            delay: defer,
        }
    }

    /// Complete a deferred suspend. Returns `false` for a stale or
    /// cancelled generation.
    pub fn on_defer_elapsed(&mut self, generation: u64, config: &mut PoolConfig) -> bool {
        if self.phase != SuspendPhase::PendingSuspend || generation != self.generation {
            return false;
        }
        let saved = config.bounds();
        let narrowed = suspended_bounds(config.capacity);
        config.set_bounds(narrowed);
        self.saved = Some(saved);
        self.phase = SuspendPhase::Suspended;
        info!(
            saved_min = saved.min_active,
            saved_max = saved.max_active,
            max_active = narrowed.max_active,
            "suspended"
        );
        true
    }

    pub fn on_power_on(&mut self, aware: bool, config: &mut PoolConfig) -> PowerOnAction {
        match self.phase {
            SuspendPhase::PendingSuspend => {
                self.phase = SuspendPhase::Active;
                self.generation += 1;
                debug!("pending suspend cancelled");
                PowerOnAction::CancelPending
            }
            SuspendPhase::Suspended => {
                let restored = self.saved.take().unwrap_or_else(|| config.bounds());
                config.set_bounds(restored);
                self.phase = SuspendPhase::Active;
                info!(
                    min_active = restored.min_active,
                    max_active = restored.max_active,
                    "resumed"
                );
                PowerOnAction::Resume { restored }
            }
            SuspendPhase::Active if !aware => PowerOnAction::WakeBoost,
            SuspendPhase::Active => PowerOnAction::None,
        }
    }

    /// Return to `Active`, restoring saved bounds if suspended.
    pub fn reset(&mut self, config: &mut PoolConfig) {
        if let Some(saved) = self.saved.take() {
            config.set_bounds(saved);
        }
        self.phase = SuspendPhase::Active;
        self.generation += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFER: Duration = Duration::from_secs(10);

    fn suspend(coord: &mut SuspendCoordinator, config: &mut PoolConfig) {
        let PowerOffAction::Defer { generation, .. } = coord.on_power_off(true, DEFER) else {
            panic!("expected a deferred suspend");
        };
        assert!(coord.on_defer_elapsed(generation, config));
    }

    #[test]
    fn suspend_resume_restores_bounds_exactly() {
        let mut config = PoolConfig::new(4).unwrap();
        config.set_bounds(Bounds {
            min_active: 2,
            max_active: 3,
        });
        let mut coord = SuspendCoordinator::new();

        suspend(&mut coord, &mut config);
        assert!(coord.is_suspended());
        assert_eq!(config.bounds(), SUSPENDED_BOUNDS);

        let action = coord.on_power_on(true, &mut config);
        let expected = Bounds {
            min_active: 2,
            max_active: 3,
        };
        assert_eq!(action, PowerOnAction::Resume { restored: expected });
        assert_eq!(config.bounds(), expected);
        assert_eq!(coord.phase(), SuspendPhase::Active);
    }

    #[test]
    fn power_on_cancels_pending_and_stale_timer_is_ignored() {
        let mut config = PoolConfig::new(4).unwrap();
        let before = config.bounds();
        let mut coord = SuspendCoordinator::new();

        let PowerOffAction::Defer { generation, delay } = coord.on_power_off(true, DEFER) else {
            panic!("expected a deferred suspend");
        };
        assert_eq!(delay, DEFER);
        assert_eq!(coord.phase(), SuspendPhase::PendingSuspend);

        assert_eq!(coord.on_power_on(true, &mut config), PowerOnAction::CancelPending);
        assert!(!coord.on_defer_elapsed(generation, &mut config));
        assert_eq!(coord.phase(), SuspendPhase::Active);
        assert_eq!(config.bounds(), before);
    }

    #[test]
    fn new_power_off_supersedes_old_generation() {
        let mut config = PoolConfig::new(4).unwrap();
        let mut coord = SuspendCoordinator::new();

        let PowerOffAction::Defer { generation: first, .. } = coord.on_power_off(true, DEFER) else {
            panic!("expected a deferred suspend");
        };
        coord.on_power_on(true, &mut config);
        let PowerOffAction::Defer { generation: second, .. } = coord.on_power_off(true, DEFER) else {
            panic!("expected a deferred suspend");
        };
        assert_ne!(first, second);
        assert!(!coord.on_defer_elapsed(first, &mut config));
        assert!(coord.on_defer_elapsed(second, &mut config));
    }

    #[test]
    fn unaware_ignores_power_off_and_wakes_on_power_on() {
        let mut config = PoolConfig::new(4).unwrap();
        let mut coord = SuspendCoordinator::new();
        assert_eq!(coord.on_power_off(false, DEFER), PowerOffAction::Ignored);
        assert_eq!(coord.on_power_on(false, &mut config), PowerOnAction::WakeBoost);
        assert_eq!(coord.on_power_on(true, &mut config), PowerOnAction::None);
    }

    #[test]
    fn repeated_power_off_is_ignored() {
        let mut config = PoolConfig::new(4).unwrap();
        let mut coord = SuspendCoordinator::new();
        suspend(&mut coord, &mut config);
        assert_eq!(coord.on_power_off(true, DEFER), PowerOffAction::Ignored);
    }

    #[test]
    fn single_unit_pool_suspends_to_one() {
        let mut config = PoolConfig::new(1).unwrap();
        let mut coord = SuspendCoordinator::new();
        suspend(&mut coord, &mut config);
        assert_eq!(
            config.bounds(),
            Bounds {
                min_active: 1,
                max_active: 1
            }
        );
    }

    #[test]
    fn saved_bounds_writable_only_while_suspended() {
        let mut config = PoolConfig::new(4).unwrap();
        let mut coord = SuspendCoordinator::new();
        let wanted = Bounds {
            min_active: 1,
            max_active: 3,
        };
        assert!(!coord.set_saved_bounds(wanted));

        suspend(&mut coord, &mut config);
        assert!(coord.set_saved_bounds(wanted));
        coord.on_power_on(true, &mut config);
        assert_eq!(config.bounds(), wanted);
    }

    #[test]
    fn reset_restores_saved_bounds() {
        let mut config = PoolConfig::new(4).unwrap();
        let before = config.bounds();
        let mut coord = SuspendCoordinator::new();
        suspend(&mut coord, &mut config);
        coord.reset(&mut config);
        assert_eq!(config.bounds(), before);
        assert_eq!(coord.phase(), SuspendPhase::Active);
    }
}
