//! Linux adapters: CPU hotplug through sysfs and load from `/proc/stat`.
//!
//! `SysfsUnitDriver` writes `cpuN/online` below a root directory
//! (normally `/sys/devices/system/cpu`). A CPU without an `online` file
//! cannot be hot-unplugged and is reported as always online.
//!
//! `ProcStatTelemetry` estimates running threads per CPU. Each CPU's busy
//! fraction comes from two consecutive `/proc/stat` snapshots; when
//! `procs_running` reports more runnable threads than the busy fractions
//! account for, the excess is spread over the CPUs in proportion to how
//! busy they were. The first tick has no history and reads as unknown.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, warn};

use coreplug_core::UnitId;

use crate::collaborators::{LoadTelemetry, UnitPowerDriver};
use crate::error::DriverError;

pub const DEFAULT_CPU_ROOT: &str = "/sys/devices/system/cpu";
pub const DEFAULT_PROC_STAT: &str = "/proc/stat";

pub struct SysfsUnitDriver {
    root: PathBuf,
    capacity: usize,
}

impl SysfsUnitDriver {
    /// Open the CPU directory, sizing the pool from its `possible` list.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        let possible = std::fs::read_to_string(root.join("possible"))?;
        let capacity = parse_cpu_list(&possible)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, format!("bad cpu list: {}", possible.trim())))?;
        debug!(root = %root.display(), capacity, "sysfs unit driver opened");
        Ok(Self { root, capacity })
    }

    fn online_path(&self, unit: UnitId) -> PathBuf {
        self.root.join(format!("cpu{unit}")).join("online")
    }

    fn write_online(&self, unit: UnitId, online: bool) -> Result<(), DriverError> {
        if unit >= self.capacity {
            return Err(DriverError::OutOfRange {
                unit,
                capacity: self.capacity,
            });
        }
        let path = self.online_path(unit);
        if !path.exists() {
            // Not hot-pluggable: permanently online.
            return if online {
                Ok(())
            } else {
                Err(DriverError::Refused(unit))
            };
        }
        std::fs::write(&path, if online { "1" } else { "0" }).map_err(|source| DriverError::Io { unit, source })
    }
}

/// Highest CPU id in a kernel cpu list (`"0-3,6"`) plus one.
fn parse_cpu_list(list: &str) -> Option<usize> {
    let mut max = None;
    for part in list.trim().split(',').filter(|p| !p.is_empty()) {
        let last = match part.split_once('-') {
            Some((_, hi)) => hi,
            None => part,
        };
        let id: usize = last.trim().parse().ok()?;
        max = max.max(Some(id));
    }
    max.map(|m| m + 1)
}

impl UnitPowerDriver for SysfsUnitDriver {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn activate(&self, unit: UnitId) -> Result<(), DriverError> {
        self.write_online(unit, true)
    }

    fn deactivate(&self, unit: UnitId) -> Result<(), DriverError> {
        self.write_online(unit, false)
    }

    fn is_online(&self, unit: UnitId) -> bool {
        if unit >= self.capacity {
            return false;
        }
        match std::fs::read_to_string(self.online_path(unit)) {
            Ok(v) => v.trim() == "1",
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(_) => false,
        }
    }
}

// ── /proc/stat ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct CpuTimes {
    busy: u64,
    total: u64,
}

#[derive(Debug, Default)]
struct StatSnapshot {
    cpus: Vec<(UnitId, CpuTimes)>,
    /// Runnable threads at read time, including the reader itself.
    procs_running: Option<u64>,
}

#[derive(Debug, Default)]
struct StatState {
    previous: Vec<Option<CpuTimes>>,
    load: Vec<Option<f64>>,
}

pub struct ProcStatTelemetry {
    path: PathBuf,
    state: Mutex<StatState>,
}

impl ProcStatTelemetry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(StatState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StatState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn parse_cpu_line(line: &str) -> Option<(UnitId, CpuTimes)> {
    let mut fields = line.split_whitespace();
    let unit: UnitId = fields.next()?.strip_prefix("cpu")?.parse().ok()?;
    let values: Vec<u64> = fields.filter_map(|f| f.parse().ok()).collect();
    if values.len() < 4 {
        return None;
    }
    let total: u64 = values.iter().sum();
    // idle + iowait
    let idle = values[3] + values.get(4).copied().unwrap_or(0);
    Some((
        unit,
        CpuTimes {
            busy: total.saturating_sub(idle),
            total,
        },
    ))
}

fn parse_proc_stat(text: &str) -> StatSnapshot {
    let mut snapshot = StatSnapshot::default();
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("procs_running") {
            snapshot.procs_running = rest.trim().parse().ok();
        } else if let Some(cpu) = parse_cpu_line(line) {
            snapshot.cpus.push(cpu);
        }
    }
    snapshot
}

fn read_stat(path: &Path) -> io::Result<StatSnapshot> {
    Ok(parse_proc_stat(&std::fs::read_to_string(path)?))
}

/// Scale busy fractions up so they sum to the runnable thread count.
/// Never scales down: a CPU busy for the whole interval ran at least one
/// thread.
fn spread_runnable(load: &mut [Option<f64>], procs_running: Option<u64>) {
    // The sampling thread is runnable while it reads the file.
    let runnable = procs_running.unwrap_or(0).saturating_sub(1) as f64;
    let busy: f64 = load.iter().flatten().sum();
    if busy <= 0.0 || runnable <= busy {
        return;
    }
    let scale = runnable / busy;
    for v in load.iter_mut().flatten() {
        *v *= scale;
    }
}

impl LoadTelemetry for ProcStatTelemetry {
    fn refresh(&self) {
        let snapshot = match read_stat(&self.path) {
            Ok(s) => s,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read cpu statistics");
                self.lock().load.fill(None);
                return;
            }
        };

        let mut state = self.lock();
        state.load.fill(None);
        for (unit, now) in snapshot.cpus {
            if state.previous.len() <= unit {
                state.previous.resize(unit + 1, None);
                state.load.resize(unit + 1, None);
            }
            if let Some(prev) = state.previous[unit] {
                let total = now.total.saturating_sub(prev.total);
                if total > 0 {
                    let busy = now.busy.saturating_sub(prev.busy);
                    state.load[unit] = Some(busy as f64 / total as f64);
                }
            }
            state.previous[unit] = Some(now);
        }
        spread_runnable(&mut state.load, snapshot.procs_running);
    }

    fn running_average(&self, unit: UnitId) -> Option<f64> {
        self.lock().load.get(unit).copied().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use coreplug_core::PoolConfig;
    use tokio::time::Instant;

    use crate::decision::{DecisionParams, calculate_target};
    use crate::sampler::Sampler;

    fn cpu_tree(units: usize, hotplug: &[UnitId]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("possible"), format!("0-{}\n", units - 1)).unwrap();
        for u in 0..units {
            let cpu = dir.path().join(format!("cpu{u}"));
            std::fs::create_dir(&cpu).unwrap();
            if hotplug.contains(&u) {
                std::fs::write(cpu.join("online"), "1\n").unwrap();
            }
        }
        dir
    }

    #[test]
    fn cpu_list_parsing() {
        assert_eq!(parse_cpu_list("0-7\n"), Some(8));
        assert_eq!(parse_cpu_list("0"), Some(1));
        assert_eq!(parse_cpu_list("0-3,6"), Some(7));
        assert_eq!(parse_cpu_list(""), None);
        assert_eq!(parse_cpu_list("x"), None);
    }

    #[test]
    fn toggles_online_file() {
        let dir = cpu_tree(4, &[1, 2, 3]);
        let driver = SysfsUnitDriver::open(dir.path()).unwrap();
        assert_eq!(driver.capacity(), 4);
        assert_eq!(driver.online_count(), 4);

        driver.deactivate(2).unwrap();
        assert!(!driver.is_online(2));
        assert_eq!(std::fs::read_to_string(dir.path().join("cpu2/online")).unwrap(), "0");
        driver.activate(2).unwrap();
        assert!(driver.is_online(2));
    }

    #[test]
    fn cpu_without_online_file_is_fixed() {
        let dir = cpu_tree(2, &[1]);
        let driver = SysfsUnitDriver::open(dir.path()).unwrap();
        assert!(driver.is_online(0));
        assert!(matches!(driver.deactivate(0), Err(DriverError::Refused(0))));
        driver.activate(0).unwrap();
    }

    #[test]
    fn out_of_range_unit() {
        let dir = cpu_tree(2, &[1]);
        let driver = SysfsUnitDriver::open(dir.path()).unwrap();
        assert!(!driver.is_online(5));
        assert!(matches!(driver.activate(5), Err(DriverError::OutOfRange { .. })));
    }

    #[test]
    fn missing_possible_file_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SysfsUnitDriver::open(dir.path()).is_err());
    }

    #[test]
    fn busy_fraction_from_two_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let stat = dir.path().join("stat");
        std::fs::write(
            &stat,
            "cpu  200 0 0 200 0 0 0 0\ncpu0 100 0 0 100 0 0 0 0\ncpu1 100 0 0 100 0 0 0 0\nintr 1\n",
        )
        .unwrap();

        let telemetry = ProcStatTelemetry::new(&stat);
        telemetry.refresh();
        assert_eq!(telemetry.running_average(0), None);

        // cpu0: +75 busy / +100 total. cpu1: idle only.
        std::fs::write(
            &stat,
            "cpu  275 0 0 325 0 0 0 0\ncpu0 175 0 0 125 0 0 0 0\ncpu1 100 0 0 200 0 0 0 0\n",
        )
        .unwrap();
        telemetry.refresh();
        assert_eq!(telemetry.running_average(0), Some(0.75));
        assert_eq!(telemetry.running_average(1), Some(0.0));
        assert_eq!(telemetry.running_average(7), None);
    }

    #[test]
    fn runnable_threads_spread_over_busy_cpus() {
        let dir = tempfile::tempdir().unwrap();
        let stat = dir.path().join("stat");
        std::fs::write(&stat, "cpu0 0 0 0 0\ncpu1 0 0 0 0\nprocs_running 1\n").unwrap();
        let telemetry = ProcStatTelemetry::new(&stat);
        telemetry.refresh();

        // cpu0 fully busy, cpu1 half busy, four runnable besides the reader.
        std::fs::write(
            &stat,
            "cpu0 100 0 0 0\ncpu1 50 0 0 50\nprocs_running 5\nprocs_blocked 0\n",
        )
        .unwrap();
        telemetry.refresh();
        let cpu0 = telemetry.running_average(0).unwrap();
        let cpu1 = telemetry.running_average(1).unwrap();
        assert!((cpu0 - 8.0 / 3.0).abs() < 1e-9);
        assert!((cpu1 - 4.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn fewer_runnable_than_busy_keeps_fractions() {
        let mut load = vec![Some(0.75), None, Some(0.5)];
        spread_runnable(&mut load, Some(1));
        assert_eq!(load, vec![Some(0.75), None, Some(0.5)]);
        spread_runnable(&mut load, None);
        assert_eq!(load, vec![Some(0.75), None, Some(0.5)]);

        let mut idle = vec![Some(0.0), Some(0.0)];
        spread_runnable(&mut idle, Some(6));
        assert_eq!(idle, vec![Some(0.0), Some(0.0)]);
    }

    #[test]
    fn unreadable_stat_clears_loads() {
        let dir = tempfile::tempdir().unwrap();
        let stat = dir.path().join("stat");
        std::fs::write(&stat, "cpu0 1 0 0 1\n").unwrap();
        let telemetry = ProcStatTelemetry::new(&stat);
        telemetry.refresh();
        std::fs::write(&stat, "cpu0 3 0 0 1\n").unwrap();
        telemetry.refresh();
        assert_eq!(telemetry.running_average(0), Some(1.0));

        std::fs::remove_file(&stat).unwrap();
        telemetry.refresh();
        assert_eq!(telemetry.running_average(0), None);
    }

    #[test]
    fn saturated_single_unit_grows_from_sampling() {
        let dir = cpu_tree(4, &[1, 2, 3]);
        for u in 1..4 {
            std::fs::write(dir.path().join(format!("cpu{u}/online")), "0\n").unwrap();
        }
        let driver = SysfsUnitDriver::open(dir.path()).unwrap();
        assert_eq!(driver.online_count(), 1);

        let stat = dir.path().join("stat");
        std::fs::write(&stat, "cpu0 0 0 0 0\nprocs_running 1\n").unwrap();
        let telemetry = Arc::new(ProcStatTelemetry::new(&stat));
        let mut sampler = Sampler::new(telemetry, 4);
        sampler.sample(&driver, Instant::now());

        // cpu0 busy for the whole interval with three threads queued on it.
        std::fs::write(&stat, "cpu0 1000 0 0 0\nprocs_running 4\n").unwrap();
        let sample = sampler.sample(&driver, Instant::now());
        assert_eq!(sample.per_unit[0], 300);

        let params = DecisionParams::from(&PoolConfig::new(4).unwrap());
        assert_eq!(calculate_target(sample.aggregate, 1, &params), 4);
    }
}
