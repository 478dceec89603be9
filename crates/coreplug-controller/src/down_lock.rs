//! Down-lock registry — per-unit protection after activation.
//!
//! A freshly activated unit is locked for `down_lock_duration` so the
//! next sampling tick cannot immediately reclaim it. Expiry is a deadline
//! stored per unit: [`DownLockRegistry::is_locked`] honours it directly,
//! and [`DownLockRegistry::sweep`] clears expired flags once per tick.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use coreplug_core::UnitId;

/// Lock state of one unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitLockState {
    pub locked: bool,
    pub unlock_deadline: Option<Instant>,
}

impl UnitLockState {
    fn holds_at(&self, now: Instant) -> bool {
        self.locked && self.unlock_deadline.is_some_and(|d| now < d)
    }
}

/// Fixed-size table of [`UnitLockState`], one slot per possible unit.
#[derive(Debug)]
pub struct DownLockRegistry {
    units: Box<[UnitLockState]>,
    duration: Duration,
}

impl DownLockRegistry {
    /// One unlocked slot per unit; locks last `duration`.
    pub fn new(capacity: usize, duration: Duration) -> Self {
        Self {
            units: vec![UnitLockState::default(); capacity].into_boxed_slice(),
            duration,
        }
    }

    /// Change the duration used by future [`apply_lock`](Self::apply_lock)
    /// calls. Existing deadlines are kept.
    pub fn set_duration(&mut self, duration: Duration) {
        self.duration = duration;
    }

    /// Lock `unit` until `now + duration`, re-arming any existing lock.
    ///
    /// Returns `false` if `unit` is outside the pool.
    pub fn apply_lock(&mut self, unit: UnitId, now: Instant) -> bool {
        let Some(slot) = self.units.get_mut(unit) else {
            return false;
        };
        slot.locked = true;
        slot.unlock_deadline = Some(now + self.duration);
        true
    }

    /// Whether `unit` is protected from deactivation at `now`.
    pub fn is_locked(&self, unit: UnitId, now: Instant) -> bool {
        self.units.get(unit).is_some_and(|s| s.holds_at(now))
    }

    /// Clear every lock whose deadline has passed. Returns the released units.
    pub fn sweep(&mut self, now: Instant) -> Vec<UnitId> {
        let mut released = Vec::new();
        for (unit, slot) in self.units.iter_mut().enumerate() {
            if slot.locked && !slot.holds_at(now) {
                slot.locked = false;
                slot.unlock_deadline = None;
                released.push(unit);
            }
        }
        if !released.is_empty() {
            debug!(units = ?released, "down-locks expired");
        }
        released
    }

    /// Deadlines of every lock still held at `now`.
    pub fn deadlines(&self, now: Instant) -> Vec<(UnitId, Instant)> {
        self.units
            .iter()
            .enumerate()
            .filter(|(_, s)| s.holds_at(now))
            .filter_map(|(u, s)| s.unlock_deadline.map(|d| (u, d)))
            .collect()
    }

    /// Drop every lock (teardown).
    pub fn clear_all(&mut self) {
        self.units.fill(UnitLockState::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEC: Duration = Duration::from_secs(1);

    fn held(reg: &DownLockRegistry, now: Instant) -> Vec<UnitId> {
        reg.deadlines(now).into_iter().map(|(u, _)| u).collect()
    }

    #[test]
    fn lock_holds_until_deadline() {
        let t0 = Instant::now();
        let mut reg = DownLockRegistry::new(4, SEC);
        assert!(reg.apply_lock(2, t0));

        assert!(reg.is_locked(2, t0));
        assert!(reg.is_locked(2, t0 + Duration::from_millis(999)));
        assert!(!reg.is_locked(2, t0 + SEC));
        assert!(!reg.is_locked(1, t0));
    }

    #[test]
    fn locks_are_independent() {
        let t0 = Instant::now();
        let mut reg = DownLockRegistry::new(4, SEC);
        reg.apply_lock(1, t0);
        reg.apply_lock(3, t0 + Duration::from_millis(500));

        let t = t0 + Duration::from_millis(1200);
        assert_eq!(held(&reg, t), vec![3]);
        assert_eq!(reg.deadlines(t), vec![(3, t0 + Duration::from_millis(1500))]);
        assert_eq!(reg.sweep(t), vec![1]);
        assert!(reg.is_locked(3, t));
        assert_eq!(reg.units[1], UnitLockState::default());
    }

    #[test]
    fn reapply_rearms() {
        let t0 = Instant::now();
        let mut reg = DownLockRegistry::new(2, SEC);
        reg.apply_lock(1, t0);
        reg.apply_lock(1, t0 + Duration::from_millis(800));
        assert!(reg.is_locked(1, t0 + Duration::from_millis(1500)));
    }

    #[test]
    fn sweep_does_not_rearm() {
        let t0 = Instant::now();
        let mut reg = DownLockRegistry::new(2, SEC);
        reg.apply_lock(1, t0);
        reg.sweep(t0 + 2 * SEC);
        assert!(reg.sweep(t0 + 3 * SEC).is_empty());
        assert!(!reg.is_locked(1, t0));
    }

    #[test]
    fn out_of_range_unit_rejected() {
        let mut reg = DownLockRegistry::new(2, SEC);
        assert!(!reg.apply_lock(2, Instant::now()));
        assert!(!reg.is_locked(2, Instant::now()));
    }

    #[test]
    fn zero_duration_never_locks() {
        let t0 = Instant::now();
        let mut reg = DownLockRegistry::new(2, Duration::ZERO);
        reg.apply_lock(1, t0);
        assert!(!reg.is_locked(1, t0));
    }

    #[test]
    fn clear_all_drops_everything() {
        let t0 = Instant::now();
        let mut reg = DownLockRegistry::new(3, SEC);
        reg.apply_lock(1, t0);
        reg.apply_lock(2, t0);
        reg.clear_all();
        assert!(held(&reg, t0).is_empty());
    }
}
