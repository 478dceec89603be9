//! Domain types shared across the controller and its surfaces.

use serde::{Deserialize, Serialize};

/// Index of a compute unit within the pool (`0..capacity`).
pub type UnitId = usize;

/// The primary unit. Always online, never a deactivation candidate.
pub const PRIMARY_UNIT: UnitId = 0;

/// Fixed-point shift used for aggregate load.
pub const LOAD_FSHIFT: u32 = 11;

/// One running thread in aggregate fixed-point units.
pub const FIXED_1: u32 = 1 << LOAD_FSHIFT;

/// Power-state transitions delivered by a notifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerEvent {
    ScreenOff,
    ScreenOn,
}

/// A pointer/touch activity notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InputEvent;

/// Externally visible suspend phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspendPhase {
    Active,
    PendingSuspend,
    Suspended,
}

/// Lower/upper bound on the number of online units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_active: usize,
    pub max_active: usize,
}

impl Bounds {
    /// Clamp a requested unit count into these bounds.
    pub fn clamp(&self, target: usize) -> usize {
        target.clamp(self.min_active, self.max_active)
    }
}

/// Point-in-time view of the controller, served by the status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerStatus {
    pub enabled: bool,
    pub phase: SuspendPhase,
    pub performance_override: bool,
    pub capacity: usize,
    pub bounds: Bounds,
    pub online_units: Vec<UnitId>,
    pub locked_units: Vec<UnitId>,
    pub last_target: Option<usize>,
}
