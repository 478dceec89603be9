//! Load sampler — one telemetry read per tick.
//!
//! Sampling is best-effort: an offline unit, a unit without telemetry,
//! or a nonsensical reading (negative, NaN) all count as zero load for
//! that tick only.

use std::sync::Arc;

use tokio::time::Instant;

use coreplug_core::FIXED_1;

use crate::collaborators::{LoadTelemetry, UnitPowerDriver};

/// One sampling tick's worth of load. Consumed immediately.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadSample {
    pub taken_at: Instant,
    /// Per-unit load in centi-threads.
    pub per_unit: Vec<u32>,
    /// Pool-wide running threads, fixed point.
    pub aggregate: u32,
}

/// Reads telemetry and keeps the per-unit instantaneous-load cache the
/// actuator ranks deactivation candidates with.
pub struct Sampler {
    telemetry: Arc<dyn LoadTelemetry>,
    cache: Vec<u32>,
}

impl Sampler {
    /// Sampler for a pool of `capacity` units; the cache starts at zero.
    pub fn new(telemetry: Arc<dyn LoadTelemetry>, capacity: usize) -> Self {
        Self {
            telemetry,
            cache: vec![0; capacity],
        }
    }

    /// Refresh telemetry and read every online unit.
    pub fn sample(&mut self, driver: &dyn UnitPowerDriver, now: Instant) -> LoadSample {
        self.telemetry.refresh();

        let mut aggregate = 0.0f64;
        for unit in 0..self.cache.len() {
            let threads = if driver.is_online(unit) {
                self.telemetry
                    .running_average(unit)
                    .filter(|v| v.is_finite() && *v > 0.0)
                    .unwrap_or(0.0)
            } else {
                0.0
            };
            aggregate += threads;
            self.cache[unit] = to_u32(threads * 100.0);
        }

        LoadSample {
            taken_at: now,
            per_unit: self.cache.clone(),
            aggregate: to_u32(aggregate * FIXED_1 as f64),
        }
    }

    /// Per-unit load (centi-threads) from the most recent sample.
    pub fn cache(&self) -> &[u32] {
        &self.cache
    }
}

fn to_u32(v: f64) -> u32 {
    v.round().clamp(0.0, u32::MAX as f64) as u32
}
