//! Boost controller — input-triggered temporary growth.
//!
//! An accepted input event raises the pool to `boosted_count` at once and
//! opens a [`BoostWindow`] during which the actuator refuses to shrink.
//! Events are debounced twice: against the last accepted event
//! (`min_input_interval`) and against the last boost (`boost_lock_duration`).

use std::time::Duration;

use tokio::time::Instant;

/// Self-expiring boost window opened by an accepted input event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoostWindow {
    pub trigger_time: Instant,
    pub duration: Duration,
}

impl BoostWindow {
    pub fn new(trigger_time: Instant, duration: Duration) -> Self {
        Self {
            trigger_time,
            duration,
        }
    }

    pub fn is_active(&self, now: Instant) -> bool {
        now < self.trigger_time + self.duration
    }
}

/// Snapshot of the state an input event is judged against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoostInputs {
    pub suspended: bool,
    pub boosted_count: usize,
    pub online: usize,
    pub min_active: usize,
    pub max_active: usize,
    pub min_input_interval: Duration,
    pub boost_lock_duration: Duration,
}

/// What became of one input event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputVerdict {
    Suspended,
    /// Within `min_input_interval` of the last accepted event.
    Debounced,
    /// A boost is still in effect.
    BoostLocked,
    /// Accepted, but the pool is already at least `boosted_count` strong.
    NotNeeded,
    /// Raise the pool to `target` now.
    Boost { target: usize },
}

/// Result of a performance-override write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideChange {
    Engaged,
    Released,
    Unchanged,
}

#[derive(Debug, Default)]
pub struct BoostController {
    last_accepted: Option<Instant>,
    last_boost: Option<BoostWindow>,
    performance_override: bool,
}

impl BoostController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_input_event(&mut self, now: Instant, inputs: &BoostInputs) -> InputVerdict {
        if inputs.suspended {
            return InputVerdict::Suspended;
        }
        if self
            .last_accepted
            .is_some_and(|t| now.saturating_duration_since(t) < inputs.min_input_interval)
        {
            return InputVerdict::Debounced;
        }
        if self.last_boost.is_some_and(|w| w.is_active(now)) {
            return InputVerdict::BoostLocked;
        }

        self.last_accepted = Some(now);

        let target = inputs.boosted_count.min(inputs.max_active);
        if target <= inputs.online || target <= inputs.min_active {
            return InputVerdict::NotNeeded;
        }

        self.last_boost = Some(BoostWindow::new(now, inputs.boost_lock_duration));
        InputVerdict::Boost { target }
    }

    /// The most recent boost window, active or not.
    pub fn last_boost(&self) -> Option<BoostWindow> {
        self.last_boost
    }

    /// The boost window if it is still active at `now`.
    pub fn window(&self, now: Instant) -> Option<BoostWindow> {
        self.last_boost.filter(|w| w.is_active(now))
    }

    pub fn performance_override(&self) -> bool {
        self.performance_override
    }

    pub fn set_performance_override(&mut self, enabled: bool) -> OverrideChange {
        match (self.performance_override, enabled) {
            (false, true) => {
                self.performance_override = true;
                OverrideChange::Engaged
            }
            (true, false) => {
                self.performance_override = false;
                OverrideChange::Released
            }
            _ => OverrideChange::Unchanged,
        }
    }

    /// Forget every window and release the override.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(online: usize) -> BoostInputs {
        BoostInputs {
            suspended: false,
            boosted_count: 2,
            online,
            min_active: 1,
            max_active: 4,
            min_input_interval: Duration::from_millis(150),
            boost_lock_duration: Duration::from_millis(500),
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn first_event_boosts() {
        let mut boost = BoostController::new();
        let t0 = Instant::now();
        assert_eq!(boost.on_input_event(t0, &inputs(1)), InputVerdict::Boost { target: 2 });
        assert!(boost.window(t0 + ms(499)).is_some());
        assert!(boost.window(t0 + ms(500)).is_none());
    }

    #[test]
    fn second_event_inside_interval_is_debounced() {
        let mut boost = BoostController::new();
        let t0 = Instant::now();
        boost.on_input_event(t0, &inputs(1));
        assert_eq!(boost.on_input_event(t0 + ms(100), &inputs(1)), InputVerdict::Debounced);
        assert_eq!(boost.on_input_event(t0 + ms(200), &inputs(1)), InputVerdict::BoostLocked);
        assert_eq!(
            boost.on_input_event(t0 + ms(600), &inputs(1)),
            InputVerdict::Boost { target: 2 }
        );
    }

    #[test]
    fn at_most_one_boost_per_lock_window() {
        let mut boost = BoostController::new();
        let t0 = Instant::now();
        let boosts = (0..50)
            .map(|i| boost.on_input_event(t0 + ms(i * 10), &inputs(1)))
            .filter(|v| matches!(v, InputVerdict::Boost { .. }))
            .count();
        assert_eq!(boosts, 1);
    }

    #[test]
    fn not_needed_when_pool_already_large() {
        let mut boost = BoostController::new();
        let t0 = Instant::now();
        assert_eq!(boost.on_input_event(t0, &inputs(2)), InputVerdict::NotNeeded);
        assert!(boost.last_boost().is_none());

        let floor = BoostInputs {
            min_active: 2,
            ..inputs(1)
        };
        assert_eq!(boost.on_input_event(t0 + ms(200), &floor), InputVerdict::NotNeeded);
    }

    #[test]
    fn target_capped_by_max_active() {
        let mut boost = BoostController::new();
        let capped = BoostInputs {
            boosted_count: 4,
            max_active: 3,
            ..inputs(1)
        };
        assert_eq!(
            boost.on_input_event(Instant::now(), &capped),
            InputVerdict::Boost { target: 3 }
        );
    }

    #[test]
    fn ignored_while_suspended() {
        let mut boost = BoostController::new();
        let suspended = BoostInputs {
            suspended: true,
            ..inputs(1)
        };
        assert_eq!(boost.on_input_event(Instant::now(), &suspended), InputVerdict::Suspended);
        // A suspended event does not count as accepted.
        assert_eq!(
            boost.on_input_event(Instant::now(), &inputs(1)),
            InputVerdict::Boost { target: 2 }
        );
    }

    #[test]
    fn override_transitions() {
        let mut boost = BoostController::new();
        assert_eq!(boost.set_performance_override(false), OverrideChange::Unchanged);
        assert_eq!(boost.set_performance_override(true), OverrideChange::Engaged);
        assert_eq!(boost.set_performance_override(true), OverrideChange::Unchanged);
        assert_eq!(boost.set_performance_override(false), OverrideChange::Released);

        boost.set_performance_override(true);
        boost.reset();
        assert!(!boost.performance_override());
    }
}
