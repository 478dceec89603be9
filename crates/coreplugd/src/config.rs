//! coreplugd.toml configuration parser.
//!
//! ```toml
//! [pool]
//! profile = 1
//! sampling_interval_ms = 50
//!
//! [daemon]
//! port = 8470
//! power_source = "backlight"
//! backlight_path = "/sys/class/backlight/panel0/brightness"
//! input_devices = ["/dev/input/event2"]
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use coreplug_core::PoolSettings;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    pub pool: PoolSettings,
    pub daemon: DaemonSettings,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerSource {
    /// Fed through `POST /api/v1/power/{on|off}`.
    #[default]
    Manual,
    Backlight,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonSettings {
    pub port: u16,
    pub power_source: PowerSource,
    pub backlight_path: PathBuf,
    /// evdev devices to watch. Empty means input arrives through the API.
    pub input_devices: Vec<PathBuf>,
    pub cpu_root: PathBuf,
    pub proc_stat: PathBuf,
    /// Run against an in-memory pool of this many units instead of sysfs.
    pub simulate: Option<usize>,
    /// Per-unit running threads reported by the simulated pool.
    pub simulate_load: f64,
    pub start_delay_ms: u64,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            port: 8470,
            power_source: PowerSource::Manual,
            backlight_path: PathBuf::from("/sys/class/backlight/panel0/brightness"),
            input_devices: Vec::new(),
            cpu_root: PathBuf::from(coreplug_controller::sysfs::DEFAULT_CPU_ROOT),
            proc_stat: PathBuf::from(coreplug_controller::sysfs::DEFAULT_PROC_STAT),
            simulate: None,
            simulate_load: 0.0,
            start_delay_ms: 5000,
        }
    }
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: DaemonConfig = toml::from_str(content)?;
        Ok(config)
    }
}
