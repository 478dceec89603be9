//! Threshold profiles and ladder generation.
//!
//! A profile is a list of per-mille factors of the SoC's thread capacity.
//! Each factor becomes one rung of the [`ThresholdLadder`]: rung `i` is the
//! highest aggregate load at which `i` units are still enough.
//!
//! ```text
//! threshold = thread_capacity * per_mille * MULT_FACTOR / DIV_FACTOR
//! ```
//!
//! Pools with fewer than four usable units switch to reduced variants
//! regardless of the selected profile.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Load headroom held back from the raw per-core thread capacity.
pub const CAPACITY_RESERVE: u32 = 50;

/// Generic SoC thread capacity (raw 250 minus the reserve).
pub const DEFAULT_THREAD_CAPACITY: u32 = 250 - CAPACITY_RESERVE;

pub const MULT_FACTOR: u64 = 4;
pub const DIV_FACTOR: u64 = 100_000;

const BALANCED: &[u32] = &[625, 875, 1125];
const PERFORMANCE: &[u32] = &[380, 625, 875];
const CONSERVATIVE: &[u32] = &[875, 1625, 2125];
const DISABLED: &[u32] = &[0, 0, 0];
const TRI: &[u32] = &[625, 875];
const ECO: &[u32] = &[380];
const STRICT: &[u32] = &[];

/// Selectable threshold profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    #[default]
    Balanced,
    Performance,
    Conservative,
    /// Every rung at zero: any load asks for the full pool.
    Disabled,
}

impl Profile {
    pub const ALL: [Profile; 4] = [
        Profile::Balanced,
        Profile::Performance,
        Profile::Conservative,
        Profile::Disabled,
    ];

    /// Numeric id used by the configuration surface.
    pub fn id(self) -> u64 {
        match self {
            Profile::Balanced => 0,
            Profile::Performance => 1,
            Profile::Conservative => 2,
            Profile::Disabled => 3,
        }
    }

    pub fn from_id(id: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.id() == id)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Profile::Balanced => "balanced",
            Profile::Performance => "performance",
            Profile::Conservative => "conservative",
            Profile::Disabled => "disabled",
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Profile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(id) = s.parse::<u64>() {
            return Self::from_id(id).ok_or_else(|| format!("unknown profile id {id}"));
        }
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown profile {s:?}"))
    }
}

/// Which rung table a ladder was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LadderVariant {
    Base(Profile),
    /// Three usable units.
    Tri,
    /// Two usable units.
    Eco,
    /// A single unit; the ladder is empty.
    Strict,
}

impl LadderVariant {
    fn for_pool(profile: Profile, max_active: usize) -> Self {
        match max_active {
            0 | 1 => LadderVariant::Strict,
            2 => LadderVariant::Eco,
            3 => LadderVariant::Tri,
            _ => LadderVariant::Base(profile),
        }
    }

    fn per_mille(self) -> &'static [u32] {
        match self {
            LadderVariant::Base(Profile::Balanced) => BALANCED,
            LadderVariant::Base(Profile::Performance) => PERFORMANCE,
            LadderVariant::Base(Profile::Conservative) => CONSERVATIVE,
            LadderVariant::Base(Profile::Disabled) => DISABLED,
            LadderVariant::Tri => TRI,
            LadderVariant::Eco => ECO,
            LadderVariant::Strict => STRICT,
        }
    }
}

/// Ordered, non-decreasing thresholds for a given profile and pool size.
///
/// Always holds exactly `max_active - 1` rungs. Base tables cover a
/// four-unit pool; larger pools keep climbing by the table's last step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdLadder {
    variant: LadderVariant,
    thresholds: Vec<u32>,
}

impl ThresholdLadder {
    /// Build the ladder for `profile` at `max_active` units.
    pub fn select(profile: Profile, max_active: usize, thread_capacity: u32) -> Self {
        let variant = LadderVariant::for_pool(profile, max_active);
        let table = variant.per_mille();
        let rungs = max_active.saturating_sub(1);

        let step = match table {
            [.., a, b] => b - a,
            _ => 0,
        };

        let mut thresholds = Vec::with_capacity(rungs);
        let mut last = 0u32;
        for i in 0..rungs {
            let per_mille = match table.get(i) {
                Some(&pm) => pm,
                None => last + step,
            };
            last = per_mille;
            thresholds.push(scale(thread_capacity, per_mille));
        }

        Self {
            variant,
            thresholds,
        }
    }

    pub fn variant(&self) -> LadderVariant {
        self.variant
    }

    pub fn thresholds(&self) -> &[u32] {
        &self.thresholds
    }

    pub fn len(&self) -> usize {
        self.thresholds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }

    /// Threshold of rung `level` (1-based, `1..=len()`).
    pub fn rung(&self, level: usize) -> Option<u32> {
        level
            .checked_sub(1)
            .and_then(|i| self.thresholds.get(i))
            .copied()
    }
}

fn scale(thread_capacity: u32, per_mille: u32) -> u32 {
    let v = thread_capacity as u64 * per_mille as u64 * MULT_FACTOR / DIV_FACTOR;
    v.min(u32::MAX as u64) as u32
}
