//! Pool configuration and the numeric key/value surface.
//!
//! Every tunable is addressable by a [`ConfigKey`]. Writes go through
//! [`PoolConfig::set`], which parses, range-checks and only then applies
//! the value, so a rejected write never changes state.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::profile::{DEFAULT_THREAD_CAPACITY, Profile};
use crate::types::Bounds;

pub const DEFAULT_SAMPLING_MS: u64 = 30;
pub const DEFAULT_BOOSTED_COUNT: usize = 2;
pub const DEFAULT_DOWN_LOCK_MS: u64 = 1000;
pub const DEFAULT_BOOST_LOCK_MS: u64 = 500;
pub const MIN_INPUT_INTERVAL_MS: u64 = 150;
pub const DEFAULT_SUSPEND_DEFER_S: u64 = 10;
pub const MAX_HYSTERESIS: u32 = 100;

/// A key on the configuration surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConfigKey {
    Enabled,
    UpThreshold,
    DownThreshold,
    BoostedCount,
    MinActive,
    MaxActive,
    SamplingIntervalMs,
    DownLockDurationMs,
    BoostLockDurationMs,
    Profile,
    Hysteresis,
    NrRunThreshold,
    Debug,
    SuspendDeferTimeS,
    SuspendAware,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 15] = [
        ConfigKey::Enabled,
        ConfigKey::UpThreshold,
        ConfigKey::DownThreshold,
        ConfigKey::BoostedCount,
        ConfigKey::MinActive,
        ConfigKey::MaxActive,
        ConfigKey::SamplingIntervalMs,
        ConfigKey::DownLockDurationMs,
        ConfigKey::BoostLockDurationMs,
        ConfigKey::Profile,
        ConfigKey::Hysteresis,
        ConfigKey::NrRunThreshold,
        ConfigKey::Debug,
        ConfigKey::SuspendDeferTimeS,
        ConfigKey::SuspendAware,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ConfigKey::Enabled => "enabled",
            ConfigKey::UpThreshold => "up_threshold",
            ConfigKey::DownThreshold => "down_threshold",
            ConfigKey::BoostedCount => "boosted_count",
            ConfigKey::MinActive => "min_active",
            ConfigKey::MaxActive => "max_active",
            ConfigKey::SamplingIntervalMs => "sampling_interval_ms",
            ConfigKey::DownLockDurationMs => "down_lock_duration_ms",
            ConfigKey::BoostLockDurationMs => "boost_lock_duration_ms",
            ConfigKey::Profile => "profile",
            ConfigKey::Hysteresis => "hysteresis",
            ConfigKey::NrRunThreshold => "nr_run_threshold",
            ConfigKey::Debug => "debug",
            ConfigKey::SuspendDeferTimeS => "suspend_defer_time_s",
            ConfigKey::SuspendAware => "suspend_aware",
        }
    }

    /// Inclusive accepted range for this key in a pool of `capacity` units.
    pub fn range(self, capacity: usize) -> (u64, u64) {
        let cap = capacity as u64;
        match self {
            ConfigKey::Enabled | ConfigKey::Debug | ConfigKey::SuspendAware => (0, 1),
            ConfigKey::UpThreshold | ConfigKey::DownThreshold => (1, 50),
            ConfigKey::BoostedCount | ConfigKey::MinActive | ConfigKey::MaxActive => (1, cap),
            ConfigKey::SamplingIntervalMs => (10, 1000),
            ConfigKey::DownLockDurationMs | ConfigKey::BoostLockDurationMs => (0, 10_000),
            ConfigKey::Profile => (0, Profile::ALL.len() as u64 - 1),
            ConfigKey::Hysteresis => (0, MAX_HYSTERESIS as u64),
            ConfigKey::NrRunThreshold => (0, 10_000),
            ConfigKey::SuspendDeferTimeS => (0, 600),
        }
    }

    /// Parse and range-check a raw value without applying it.
    pub fn parse_value(self, raw: &str, capacity: usize) -> ConfigResult<u64> {
        let value = raw
            .trim()
            .parse::<u64>()
            .map_err(|_| ConfigError::Malformed {
                key: self.as_str(),
                value: raw.to_string(),
            })?;
        self.check(value, capacity)?;
        Ok(value)
    }

    fn check(self, value: u64, capacity: usize) -> ConfigResult<()> {
        let (min, max) = self.range(capacity);
        if value < min || value > max {
            return Err(ConfigError::OutOfRange {
                key: self.as_str(),
                value,
                min,
                max,
            });
        }
        Ok(())
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfigKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownKey(s.to_string()))
    }
}

/// Live tunables of the controller.
///
/// Invariant: `1 <= min_active <= max_active <= capacity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Physical unit count. Fixed for the controller's lifetime.
    pub capacity: usize,
    pub enabled: bool,
    pub min_active: usize,
    pub max_active: usize,
    pub boosted_count: usize,
    pub sampling_interval_ms: u64,
    pub profile: Profile,
    pub down_lock_duration_ms: u64,
    pub boost_lock_duration_ms: u64,
    pub min_input_interval_ms: u64,
    /// Pinned rung bias. `None` tracks `2 × max_active`, see
    /// [`hysteresis`](Self::hysteresis).
    pub hysteresis: Option<u32>,
    /// Per-unit load (centi-threads) below which a unit may be reclaimed,
    /// before scaling by the online count.
    pub nr_run_threshold: u32,
    pub thread_capacity: u32,
    /// Consecutive ticks a grow decision must persist.
    pub up_threshold: u32,
    /// Consecutive ticks a shrink decision must persist.
    pub down_threshold: u32,
    pub suspend_defer_time_s: u64,
    pub suspend_aware: bool,
    pub debug: bool,
}

impl PoolConfig {
    /// Defaults for a pool of `capacity` units.
    pub fn new(capacity: usize) -> ConfigResult<Self> {
        if capacity == 0 {
            return Err(ConfigError::NoCapacity);
        }
        let thread_capacity = DEFAULT_THREAD_CAPACITY;
        Ok(Self {
            capacity,
            enabled: true,
            min_active: 1,
            max_active: capacity,
            boosted_count: DEFAULT_BOOSTED_COUNT.min(capacity),
            sampling_interval_ms: DEFAULT_SAMPLING_MS,
            profile: Profile::Balanced,
            down_lock_duration_ms: DEFAULT_DOWN_LOCK_MS,
            boost_lock_duration_ms: DEFAULT_BOOST_LOCK_MS,
            min_input_interval_ms: MIN_INPUT_INTERVAL_MS,
            hysteresis: None,
            nr_run_threshold: default_nr_run_threshold(thread_capacity),
            thread_capacity,
            up_threshold: 1,
            down_threshold: 1,
            suspend_defer_time_s: DEFAULT_SUSPEND_DEFER_S,
            suspend_aware: true,
            debug: false,
        })
    }

    /// Build a config from file settings, validating every provided key.
    pub fn from_settings(capacity: usize, settings: &PoolSettings) -> ConfigResult<Self> {
        let mut config = Self::new(capacity)?;
        if let Some(tc) = settings.thread_capacity {
            config.thread_capacity = tc;
            config.nr_run_threshold = default_nr_run_threshold(tc);
        }
        for (key, value) in settings.entries() {
            if let Some(v) = value {
                config.set_value(key, v)?;
            }
        }
        Ok(config)
    }

    pub fn bounds(&self) -> Bounds {
        Bounds {
            min_active: self.min_active,
            max_active: self.max_active,
        }
    }

    /// Overwrite both bounds at once (suspend/resume path).
    pub fn set_bounds(&mut self, bounds: Bounds) {
        self.min_active = bounds.min_active;
        self.max_active = bounds.max_active;
    }

    /// Bias added to a rung when the previous target sits at or below it.
    /// Follows the live `max_active` until a value is written.
    pub fn hysteresis(&self) -> u32 {
        self.hysteresis
            .unwrap_or_else(|| (self.max_active as u32).saturating_mul(2).min(MAX_HYSTERESIS))
    }

    pub fn sampling_interval(&self) -> Duration {
        Duration::from_millis(self.sampling_interval_ms)
    }

    pub fn down_lock_duration(&self) -> Duration {
        Duration::from_millis(self.down_lock_duration_ms)
    }

    pub fn boost_lock_duration(&self) -> Duration {
        Duration::from_millis(self.boost_lock_duration_ms)
    }

    pub fn min_input_interval(&self) -> Duration {
        Duration::from_millis(self.min_input_interval_ms)
    }

    pub fn suspend_defer_time(&self) -> Duration {
        Duration::from_secs(self.suspend_defer_time_s)
    }

    /// Current value of `key` as exposed by the configuration surface.
    pub fn get(&self, key: ConfigKey) -> u64 {
        match key {
            ConfigKey::Enabled => self.enabled as u64,
            ConfigKey::UpThreshold => self.up_threshold as u64,
            ConfigKey::DownThreshold => self.down_threshold as u64,
            ConfigKey::BoostedCount => self.boosted_count as u64,
            ConfigKey::MinActive => self.min_active as u64,
            ConfigKey::MaxActive => self.max_active as u64,
            ConfigKey::SamplingIntervalMs => self.sampling_interval_ms,
            ConfigKey::DownLockDurationMs => self.down_lock_duration_ms,
            ConfigKey::BoostLockDurationMs => self.boost_lock_duration_ms,
            ConfigKey::Profile => self.profile.id(),
            ConfigKey::Hysteresis => self.hysteresis() as u64,
            ConfigKey::NrRunThreshold => self.nr_run_threshold as u64,
            ConfigKey::Debug => self.debug as u64,
            ConfigKey::SuspendDeferTimeS => self.suspend_defer_time_s,
            ConfigKey::SuspendAware => self.suspend_aware as u64,
        }
    }

    /// All keys and their current values.
    pub fn snapshot(&self) -> BTreeMap<&'static str, u64> {
        ConfigKey::ALL
            .into_iter()
            .map(|k| (k.as_str(), self.get(k)))
            .collect()
    }

    /// Parse, validate and apply a raw textual write.
    pub fn set(&mut self, key: ConfigKey, raw: &str) -> ConfigResult<()> {
        let value = key.parse_value(raw, self.capacity)?;
        self.apply(key, value);
        Ok(())
    }

    /// Validate and apply a numeric write.
    pub fn set_value(&mut self, key: ConfigKey, value: u64) -> ConfigResult<()> {
        key.check(value, self.capacity)?;
        self.apply(key, value);
        Ok(())
    }

    fn apply(&mut self, key: ConfigKey, value: u64) {
        match key {
            ConfigKey::Enabled => self.enabled = value != 0,
            ConfigKey::UpThreshold => self.up_threshold = value as u32,
            ConfigKey::DownThreshold => self.down_threshold = value as u32,
            ConfigKey::BoostedCount => self.boosted_count = value as usize,
            ConfigKey::MinActive => {
                let v = value as usize;
                if self.max_active < v {
                    self.max_active = v;
                }
                self.min_active = v;
            }
            ConfigKey::MaxActive => {
                let v = value as usize;
                if self.min_active > v {
                    self.min_active = v;
                }
                self.max_active = v;
            }
            ConfigKey::SamplingIntervalMs => self.sampling_interval_ms = value,
            ConfigKey::DownLockDurationMs => self.down_lock_duration_ms = value,
            ConfigKey::BoostLockDurationMs => self.boost_lock_duration_ms = value,
            ConfigKey::Profile => {
                // Range check guarantees a known id.
                self.profile = Profile::from_id(value).unwrap_or_default();
            }
            ConfigKey::Hysteresis => self.hysteresis = Some(value as u32),
            ConfigKey::NrRunThreshold => self.nr_run_threshold = value as u32,
            ConfigKey::Debug => self.debug = value != 0,
            ConfigKey::SuspendDeferTimeS => self.suspend_defer_time_s = value,
            ConfigKey::SuspendAware => self.suspend_aware = value != 0,
        }
    }
}

/// Two and a half threads' worth of capacity.
fn default_nr_run_threshold(thread_capacity: u32) -> u32 {
    (thread_capacity << 1) + thread_capacity / 2
}

/// The `[pool]` table of the daemon config file. Every field is optional
/// and validated like a surface write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolSettings {
    pub enabled: Option<u64>,
    pub up_threshold: Option<u64>,
    pub down_threshold: Option<u64>,
    pub boosted_count: Option<u64>,
    pub min_active: Option<u64>,
    pub max_active: Option<u64>,
    pub sampling_interval_ms: Option<u64>,
    pub down_lock_duration_ms: Option<u64>,
    pub boost_lock_duration_ms: Option<u64>,
    pub profile: Option<u64>,
    pub hysteresis: Option<u64>,
    pub nr_run_threshold: Option<u64>,
    pub debug: Option<u64>,
    pub suspend_defer_time_s: Option<u64>,
    pub suspend_aware: Option<u64>,
    /// SoC thread capacity; not writable at runtime.
    pub thread_capacity: Option<u32>,
}

impl PoolSettings {
    // Bounds go last so min/max interplay resolves the same way as
    // two successive surface writes.
    fn entries(&self) -> [(ConfigKey, Option<u64>); 15] {
        [
            (ConfigKey::Enabled, self.enabled),
            (ConfigKey::UpThreshold, self.up_threshold),
            (ConfigKey::DownThreshold, self.down_threshold),
            (ConfigKey::BoostedCount, self.boosted_count),
            (ConfigKey::SamplingIntervalMs, self.sampling_interval_ms),
            (ConfigKey::DownLockDurationMs, self.down_lock_duration_ms),
            (ConfigKey::BoostLockDurationMs, self.boost_lock_duration_ms),
            (ConfigKey::Profile, self.profile),
            (ConfigKey::Hysteresis, self.hysteresis),
            (ConfigKey::NrRunThreshold, self.nr_run_threshold),
            (ConfigKey::Debug, self.debug),
            (ConfigKey::SuspendDeferTimeS, self.suspend_defer_time_s),
            (ConfigKey::SuspendAware, self.suspend_aware),
            (ConfigKey::MinActive, self.min_active),
            (ConfigKey::MaxActive, self.max_active),
        ]
    }
}
