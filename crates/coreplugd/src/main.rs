//! coreplugd — the coreplug daemon.
//!
//! Single binary that assembles the pool controller:
//! - Unit driver (sysfs, or a simulated pool)
//! - Load telemetry (`/proc/stat`, or the simulated pool)
//! - Power-state and input sources
//! - REST API for tunables, status and manual events
//!
//! # Usage
//!
//! ```text
//! coreplugd run --config /etc/coreplugd.toml --port 8470
//! coreplugd ladder --profile performance --max-active 4
//! ```

mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use coreplug_api::{ApiState, build_router};
use coreplug_controller::{
    BacklightNotifier, Collaborators, ControllerOptions, DeviceInputSource, InputEventSource,
    LoadTelemetry, ManualInputSource, ManualPowerNotifier, PoolController, PowerStateNotifier,
    ProcStatTelemetry, SimulatedPool, SysfsUnitDriver, UnitPowerDriver,
};
use coreplug_core::profile::DEFAULT_THREAD_CAPACITY;
use coreplug_core::{LOAD_FSHIFT, PoolConfig, Profile, ThresholdLadder};

use crate::config::{DaemonConfig, DaemonSettings, PowerSource};

#[derive(Parser)]
#[command(name = "coreplugd", about = "Adaptive compute-unit pool controller")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller and its API server.
    Run {
        /// Path to coreplugd.toml. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on (overrides the config file).
        #[arg(long)]
        port: Option<u16>,

        /// Drive a simulated pool of this many units.
        #[arg(long)]
        simulate: Option<usize>,
    },
    /// Print the threshold ladder a profile selects for a pool size.
    Ladder {
        #[arg(long, default_value = "balanced")]
        profile: Profile,

        #[arg(long, default_value = "4")]
        max_active: usize,

        #[arg(long, default_value_t = DEFAULT_THREAD_CAPACITY)]
        thread_capacity: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,coreplugd=debug,coreplug=debug"));
    if cli.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    match cli.command {
        Command::Run {
            config,
            port,
            simulate,
        } => {
            let mut daemon_config = match config {
                Some(path) => DaemonConfig::from_file(&path)
                    .with_context(|| format!("failed to load {}", path.display()))?,
                None => DaemonConfig::default(),
            };
            if let Some(port) = port {
                daemon_config.daemon.port = port;
            }
            if simulate.is_some() {
                daemon_config.daemon.simulate = simulate;
            }
            run(daemon_config).await
        }
        Command::Ladder {
            profile,
            max_active,
            thread_capacity,
        } => {
            print_ladder(profile, max_active, thread_capacity);
            Ok(())
        }
    }
}

/// Concrete adapters selected by the `[daemon]` table.
struct Adapters {
    collab: Collaborators,
    manual_power: Option<Arc<ManualPowerNotifier>>,
    manual_input: Option<Arc<ManualInputSource>>,
}

fn build_adapters(settings: &DaemonSettings) -> anyhow::Result<Adapters> {
    let (driver, telemetry): (Arc<dyn UnitPowerDriver>, Arc<dyn LoadTelemetry>) =
        match settings.simulate {
            Some(capacity) => {
                anyhow::ensure!(capacity > 0, "simulated pool needs at least one unit");
                let pool = Arc::new(SimulatedPool::new(capacity));
                pool.set_all_loads(Some(settings.simulate_load));
                info!(capacity, load = settings.simulate_load, "using simulated pool");
                let driver: Arc<dyn UnitPowerDriver> = pool.clone();
                let telemetry: Arc<dyn LoadTelemetry> = pool;
                (driver, telemetry)
            }
            None => {
                let driver = SysfsUnitDriver::open(&settings.cpu_root)
                    .with_context(|| format!("failed to open {}", settings.cpu_root.display()))?;
                info!(root = %settings.cpu_root.display(), "using sysfs unit driver");
                let driver: Arc<dyn UnitPowerDriver> = Arc::new(driver);
                let telemetry: Arc<dyn LoadTelemetry> = Arc::new(ProcStatTelemetry::new(&settings.proc_stat));
                (driver, telemetry)
            }
        };

    let mut manual_power = None;
    let power: Arc<dyn PowerStateNotifier> = match settings.power_source {
        PowerSource::Manual => {
            let notifier = Arc::new(ManualPowerNotifier::new());
            manual_power = Some(notifier.clone());
            notifier
        }
        PowerSource::Backlight => Arc::new(BacklightNotifier::new(&settings.backlight_path)),
    };

    let mut manual_input = None;
    let input: Arc<dyn InputEventSource> = if settings.input_devices.is_empty() {
        let source = Arc::new(ManualInputSource::new());
        manual_input = Some(source.clone());
        source
    } else {
        Arc::new(DeviceInputSource::new(settings.input_devices.clone()))
    };

    Ok(Adapters {
        collab: Collaborators {
            driver,
            telemetry,
            power,
            input,
        },
        manual_power,
        manual_input,
    })
}

async fn run(config: DaemonConfig) -> anyhow::Result<()> {
    info!("coreplug daemon starting");

    // ── Initialize subsystems ──────────────────────────────────

    let adapters = build_adapters(&config.daemon)?;
    let capacity = adapters.collab.driver.capacity();
    let pool_config = PoolConfig::from_settings(capacity, &config.pool).context("invalid [pool] settings")?;
    let enabled = pool_config.enabled;

    let controller = PoolController::new(
        adapters.collab,
        pool_config,
        ControllerOptions {
            start_delay: Duration::from_millis(config.daemon.start_delay_ms),
            ..ControllerOptions::default()
        },
    )?;

    if enabled {
        if let Err(e) = controller.start().await {
            warn!(error = %e, "controller inert until re-enabled");
        }
    } else {
        info!("controller disabled by configuration");
    }

    // ── Start API server ───────────────────────────────────────

    let mut api_state = ApiState::new(controller.clone());
    if let Some(power) = adapters.manual_power {
        api_state = api_state.with_power(power);
    }
    if let Some(input) = adapters.manual_input {
        api_state = api_state.with_input(input);
    }
    let router = build_router(api_state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.daemon.port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
        })
        .await?;

    if controller.is_running() {
        controller.stop().await?;
    }

    info!("coreplug daemon stopped");
    Ok(())
}

fn print_ladder(profile: Profile, max_active: usize, thread_capacity: u32) {
    let ladder = ThresholdLadder::select(profile, max_active.max(1), thread_capacity);
    let shift = LOAD_FSHIFT.saturating_sub(max_active.saturating_sub(1) as u32);
    println!("profile {profile} ({:?}), max_active {max_active}", ladder.variant());
    if ladder.is_empty() {
        println!("  (no thresholds: single-unit pool)");
    }
    for (i, t) in ladder.thresholds().iter().enumerate() {
        println!("  level {}: {t:>4}  (scaled {})", i + 1, (*t as u64) << shift);
    }
}
