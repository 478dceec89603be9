//! Decision engine — maps aggregate load to a target unit count.
//!
//! # Algorithm
//!
//! ```text
//! ladder = ThresholdLadder(profile, max_active)      // max_active - 1 rungs
//! shift  = LOAD_FSHIFT - (max_active - 1)
//!
//! for level in 1..max_active:
//!     t = ladder[level]
//!     if previous_target <= level: t += hysteresis   // stick to current level
//!     if load <= t << shift: return clamp(level)
//! return clamp(max_active)
//! ```
//!
//! The bias only applies to rungs at or above the previous target, so
//! growing past a boundary needs `hysteresis` more load than staying
//! below it did.

use coreplug_core::{LOAD_FSHIFT, PoolConfig, Profile, ThresholdLadder};

/// Inputs of [`calculate_target`] taken from the live config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecisionParams {
    pub profile: Profile,
    pub min_active: usize,
    pub max_active: usize,
    pub hysteresis: u32,
    pub thread_capacity: u32,
}

impl From<&PoolConfig> for DecisionParams {
    fn from(config: &PoolConfig) -> Self {
        Self {
            profile: config.profile,
            min_active: config.min_active,
            max_active: config.max_active,
            hysteresis: config.hysteresis(),
            thread_capacity: config.thread_capacity,
        }
    }
}

/// Target active-unit count for `aggregate_load` (fixed point, see
/// [`coreplug_core::FIXED_1`]).
///
/// Pure and deterministic. The result always lies in
/// `[min_active, max_active]`.
pub fn calculate_target(aggregate_load: u32, previous_target: usize, params: &DecisionParams) -> usize {
    let max_active = params.max_active.max(1);
    let min_active = params.min_active.clamp(1, max_active);

    let ladder = ThresholdLadder::select(params.profile, max_active, params.thread_capacity);
    let shift = LOAD_FSHIFT.saturating_sub((max_active - 1) as u32);
    let load = aggregate_load as u64;

    let level = (1..max_active)
        .find(|&level| {
            let mut threshold = ladder.rung(level).unwrap_or(u32::MAX) as u64;
            if previous_target <= level {
                threshold += params.hysteresis as u64;
            }
            load <= threshold << shift
        })
        .unwrap_or(max_active);

    level.clamp(min_active, max_active)
}

/// Tick-to-tick wrapper around [`calculate_target`].
///
/// Remembers the previous target for hysteresis and requires a grow or
/// shrink verdict to repeat for `up_ticks` / `down_ticks` consecutive
/// ticks before it is handed to the actuator.
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    previous_target: usize,
    up_streak: u32,
    down_streak: u32,
}

impl DecisionEngine {
    /// Start from `initial` (the pool size at start-up).
    pub fn new(initial: usize) -> Self {
        Self {
            previous_target: initial,
            up_streak: 0,
            down_streak: 0,
        }
    }

    pub fn previous_target(&self) -> usize {
        self.previous_target
    }

    /// Evaluate one sample. Returns the target to actuate, or `None` while
    /// a direction change is still being confirmed.
    pub fn evaluate(
        &mut self,
        aggregate_load: u32,
        online: usize,
        params: &DecisionParams,
        up_ticks: u32,
        down_ticks: u32,
    ) -> Option<usize> {
        let target = calculate_target(aggregate_load, self.previous_target, params);
        self.previous_target = target;

        if target > online {
            self.down_streak = 0;
            self.up_streak = self.up_streak.saturating_add(1);
            (self.up_streak >= up_ticks).then_some(target)
        } else if target < online {
            self.up_streak = 0;
            self.down_streak = self.down_streak.saturating_add(1);
            (self.down_streak >= down_ticks).then_some(target)
        } else {
            self.up_streak = 0;
            self.down_streak = 0;
            Some(target)
        }
    }
}
