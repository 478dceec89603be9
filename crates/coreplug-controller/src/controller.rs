//! Pool controller — wires the components into one running service.
//!
//! ```text
//! ticker ───────Tick──────┐
//! input pump ───Apply─────┤
//! power pump ───Apply─────┼──> work queue ──> worker
//! config writes ──────────┘                    Sampler → DecisionEngine → PoolActuator
//! ```
//!
//! Shared state lives in one [`ControlState`] behind a `std::sync::Mutex`
//! that is never held across an `.await`. Only the worker changes unit
//! power state, so at most one actuation is in flight. Spawned tasks hold
//! a `Weak` handle and exit once the controller is stopped or dropped.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use coreplug_core::{
    ConfigKey, ControllerStatus, InputEvent, PoolConfig, PowerEvent, UnitId,
};

use crate::actuator::{ActuationContext, ActuationReport, PoolActuator, StopReason};
use crate::boost::{BoostController, BoostInputs, InputVerdict, OverrideChange};
use crate::collaborators::{InputEventSource, LoadTelemetry, PowerStateNotifier, UnitPowerDriver};
use crate::decision::{DecisionEngine, DecisionParams};
use crate::down_lock::DownLockRegistry;
use crate::error::{ControllerError, ControllerResult};
use crate::sampler::Sampler;
use crate::suspend::{PowerOffAction, PowerOnAction, SuspendCoordinator};

/// The external collaborators a controller drives.
#[derive(Clone)]
pub struct Collaborators {
    pub driver: Arc<dyn UnitPowerDriver>,
    pub telemetry: Arc<dyn LoadTelemetry>,
    pub power: Arc<dyn PowerStateNotifier>,
    pub input: Arc<dyn InputEventSource>,
}

/// Timing of the sampling loop around start and resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerOptions {
    /// Delay before the first sampling tick after start.
    pub start_delay: Duration,
    /// Delay before the first sampling tick after resume.
    pub resume_delay: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            start_delay: Duration::from_secs(5),
            resume_delay: Duration::from_millis(100),
        }
    }
}

enum Work {
    Tick,
    Apply { target: usize, reason: &'static str },
    ForceActivate { lock: bool },
    Flush(oneshot::Sender<()>),
}

/// Handles of a started controller. Dropping the sender ends the worker.
struct Running {
    work_tx: mpsc::UnboundedSender<Work>,
    worker: JoinHandle<()>,
    ticker: Option<JoinHandle<()>>,
    suspend_timer: Option<JoinHandle<()>>,
    pumps: Vec<JoinHandle<()>>,
}

impl Running {
    fn send(&self, work: Work) {
        if self.work_tx.send(work).is_err() {
            warn!("actuator worker is gone, work dropped");
        }
    }

    fn cancel_ticker(&mut self) {
        if let Some(t) = self.ticker.take() {
            t.abort();
        }
    }

    fn cancel_suspend_timer(&mut self) {
        if let Some(t) = self.suspend_timer.take() {
            t.abort();
        }
    }
}

struct ControlState {
    config: PoolConfig,
    boost: BoostController,
    suspend: SuspendCoordinator,
    last_target: Option<usize>,
    /// Lock deadlines as last published by the worker.
    locks: Vec<(UnitId, Instant)>,
    running: Option<Running>,
}

struct Shared {
    collab: Collaborators,
    options: ControllerOptions,
    state: Mutex<ControlState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// The adaptive pool controller. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct PoolController {
    shared: Arc<Shared>,
}

impl PoolController {
    pub fn new(
        collab: Collaborators,
        config: PoolConfig,
        options: ControllerOptions,
    ) -> ControllerResult<Self> {
        let driver = collab.driver.capacity();
        if config.capacity != driver {
            return Err(ControllerError::CapacityMismatch {
                config: config.capacity,
                driver,
            });
        }
        Ok(Self {
            shared: Arc::new(Shared {
                collab,
                options,
                state: Mutex::new(ControlState {
                    config,
                    boost: BoostController::new(),
                    suspend: SuspendCoordinator::new(),
                    last_target: None,
                    locks: Vec::new(),
                    running: None,
                }),
            }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.shared.collab.driver.capacity()
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().running.is_some()
    }

    // ── Lifecycle ──────────────────────────────────────────────

    /// Subscribe to the event sources, spawn the worker, bring every unit
    /// online (down-locked) and schedule the first tick after the start
    /// delay.
    ///
    /// On failure the controller stays inert with `enabled = 0` until it
    /// is explicitly re-enabled.
    pub async fn start(&self) -> ControllerResult<()> {
        let mut guard = self.shared.lock();
        let state = &mut *guard;
        if state.running.is_some() {
            return Err(ControllerError::AlreadyRunning);
        }

        let subscribed = self
            .shared
            .collab
            .power
            .subscribe()
            .map_err(|source| ControllerError::Subscribe {
                what: "power-state notifier",
                source,
            })
            .and_then(|power| {
                self.shared
                    .collab
                    .input
                    .subscribe()
                    .map(|input| (power, input))
                    .map_err(|source| ControllerError::Subscribe {
                        what: "input source",
                        source,
                    })
            });
        let (power_rx, input_rx) = match subscribed {
            Ok(rx) => rx,
            Err(e) => {
                state.config.enabled = false;
                error!(error = %e, "controller failed to start, staying disabled");
                return Err(e);
            }
        };

        state.config.enabled = true;
        state.boost.reset();
        state.suspend.reset(&mut state.config);
        state.last_target = None;

        let capacity = state.config.capacity;
        let weak = Arc::downgrade(&self.shared);
        let (work_tx, work_rx) = mpsc::unbounded_channel();
        let worker = Worker {
            shared: weak.clone(),
            driver: self.shared.collab.driver.clone(),
            sampler: Sampler::new(self.shared.collab.telemetry.clone(), capacity),
            engine: DecisionEngine::new(capacity),
            actuator: PoolActuator::new(
                self.shared.collab.driver.clone(),
                DownLockRegistry::new(capacity, state.config.down_lock_duration()),
            ),
            last_target: None,
        };

        let running = Running {
            work_tx,
            worker: tokio::spawn(worker.run(work_rx)),
            ticker: Some(spawn_ticker(weak.clone(), self.shared.options.start_delay)),
            suspend_timer: None,
            pumps: vec![
                tokio::spawn(pump_power(weak.clone(), power_rx)),
                tokio::spawn(pump_input(weak, input_rx)),
            ],
        };
        running.send(Work::ForceActivate { lock: true });
        state.running = Some(running);

        info!(
            capacity,
            profile = %state.config.profile,
            min_active = state.config.min_active,
            max_active = state.config.max_active,
            start_delay = ?self.shared.options.start_delay,
            "pool controller started"
        );
        Ok(())
    }

    /// Cancel every timer, drain the work queue and return every unit to
    /// service. Saved suspend bounds are restored.
    pub async fn stop(&self) -> ControllerResult<()> {
        let running = {
            let mut guard = self.shared.lock();
            let state = &mut *guard;
            let mut running = state.running.take().ok_or(ControllerError::NotRunning)?;
            state.suspend.reset(&mut state.config);
            state.boost.reset();
            running.cancel_ticker();
            running.cancel_suspend_timer();
            for pump in running.pumps.drain(..) {
                pump.abort();
            }
            running.send(Work::ForceActivate { lock: false });
            running
        };

        let Running { work_tx, worker, .. } = running;
        drop(work_tx);
        let joined = worker.await;

        {
            let mut state = self.shared.lock();
            state.locks.clear();
            state.last_target = None;
        }
        joined.map_err(|e| ControllerError::Worker(e.to_string()))?;
        info!("pool controller stopped");
        Ok(())
    }

    /// Wait until every work item queued so far has been processed.
    pub async fn flush(&self) -> ControllerResult<()> {
        let (tx, rx) = oneshot::channel();
        {
            let state = self.shared.lock();
            let running = state.running.as_ref().ok_or(ControllerError::NotRunning)?;
            running.send(Work::Flush(tx));
        }
        rx.await
            .map_err(|_| ControllerError::Worker("worker exited before flush".to_string()))
    }

    // ── Configuration surface ──────────────────────────────────

    pub fn config(&self) -> PoolConfig {
        self.shared.lock().config.clone()
    }

    pub fn get(&self, key: ConfigKey) -> u64 {
        self.shared.lock().config.get(key)
    }

    /// Validate and apply a raw write. Invalid values leave every setting
    /// unchanged. Writing `enabled` starts or stops the controller.
    pub async fn set(&self, key: ConfigKey, raw: &str) -> ControllerResult<()> {
        let value = key.parse_value(raw, self.capacity())?;

        if key == ConfigKey::Enabled {
            return self.set_enabled(value != 0).await;
        }

        let mut guard = self.shared.lock();
        let state = &mut *guard;
        let suspended_bounds = matches!(key, ConfigKey::MinActive | ConfigKey::MaxActive)
            .then(|| state.suspend.saved_bounds())
            .flatten();

        if let Some(saved) = suspended_bounds {
            let mut shadow = state.config.clone();
            shadow.set_bounds(saved);
            shadow.set_value(key, value)?;
            state.suspend.set_saved_bounds(shadow.bounds());
            debug!(key = %key, value, "bound write deferred until resume");
            return Ok(());
        }

        state.config.set_value(key, value)?;
        debug!(key = %key, value, "config updated");
        Ok(())
    }

    async fn set_enabled(&self, enabled: bool) -> ControllerResult<()> {
        if enabled {
            if self.is_running() {
                return Ok(());
            }
            return self.start().await;
        }

        self.shared.lock().config.enabled = false;
        match self.stop().await {
            Ok(()) | Err(ControllerError::NotRunning) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn status(&self) -> ControllerStatus {
        let online_units = self.shared.collab.driver.online_units();
        let now = Instant::now();
        let state = self.shared.lock();
        ControllerStatus {
            enabled: state.config.enabled,
            phase: state.suspend.phase(),
            performance_override: state.boost.performance_override(),
            capacity: state.config.capacity,
            bounds: state.config.bounds(),
            online_units,
            locked_units: state
                .locks
                .iter()
                .filter(|(_, deadline)| now < *deadline)
                .map(|(u, _)| *u)
                .collect(),
            last_target: state.last_target,
        }
    }

    // ── Events ─────────────────────────────────────────────────

    /// Judge one input event. Returns `None` while stopped.
    pub fn on_input_event(&self) -> Option<InputVerdict> {
        let online = self.shared.collab.driver.online_count();
        let now = Instant::now();

        let mut guard = self.shared.lock();
        let state = &mut *guard;
        let running = state.running.as_ref()?;
        if state.boost.performance_override() {
            return None;
        }

        let inputs = BoostInputs {
            suspended: state.suspend.is_suspended(),
            boosted_count: state.config.boosted_count,
            online,
            min_active: state.config.min_active,
            max_active: state.config.max_active,
            min_input_interval: state.config.min_input_interval(),
            boost_lock_duration: state.config.boost_lock_duration(),
        };
        let verdict = state.boost.on_input_event(now, &inputs);
        match verdict {
            InputVerdict::Boost { target } => {
                debug!(target, online, "input boost");
                running.send(Work::Apply {
                    target,
                    reason: "boost",
                });
            }
            other => debug!(verdict = ?other, "input event not boosted"),
        }
        Some(verdict)
    }

    pub fn on_power_off(&self) {
        let mut guard = self.shared.lock();
        let state = &mut *guard;
        let Some(running) = state.running.as_mut() else {
            return;
        };

        let action = state
            .suspend
            .on_power_off(state.config.suspend_aware, state.config.suspend_defer_time());
        if let PowerOffAction::Defer { generation, delay } = action {
            running.cancel_suspend_timer();
            let weak = Arc::downgrade(&self.shared);
            running.suspend_timer = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(shared) = weak.upgrade() {
                    PoolController { shared }.complete_suspend(generation);
                }
            }));
        }
    }

    fn complete_suspend(&self, generation: u64) {
        let mut guard = self.shared.lock();
        let state = &mut *guard;
        let Some(running) = state.running.as_mut() else {
            return;
        };
        if !state.suspend.on_defer_elapsed(generation, &mut state.config) {
            return;
        }
        running.suspend_timer = None;
        running.cancel_ticker();
        running.send(Work::Apply {
            target: state.config.max_active,
            reason: "suspend",
        });
    }

    pub fn on_power_on(&self) {
        let mut guard = self.shared.lock();
        let state = &mut *guard;
        let Some(running) = state.running.as_mut() else {
            return;
        };

        match state.suspend.on_power_on(state.config.suspend_aware, &mut state.config) {
            PowerOnAction::None => {}
            PowerOnAction::CancelPending => running.cancel_suspend_timer(),
            PowerOnAction::Resume { .. } => {
                running.send(Work::ForceActivate { lock: true });
                if !state.boost.performance_override() {
                    running.cancel_ticker();
                    running.ticker = Some(spawn_ticker(
                        Arc::downgrade(&self.shared),
                        self.shared.options.resume_delay,
                    ));
                }
            }
            PowerOnAction::WakeBoost => {
                debug!("wake without suspend awareness, activating every unit");
                running.send(Work::ForceActivate { lock: true });
            }
        }
    }

    /// Engage or release the performance override. While engaged every
    /// unit is online and periodic sampling is paused.
    pub fn set_performance_override(&self, enabled: bool) {
        let mut guard = self.shared.lock();
        let state = &mut *guard;
        match state.boost.set_performance_override(enabled) {
            OverrideChange::Unchanged => {}
            OverrideChange::Engaged => {
                info!("performance override engaged");
                if let Some(running) = state.running.as_mut() {
                    running.cancel_ticker();
                    running.send(Work::ForceActivate { lock: false });
                }
            }
            OverrideChange::Released => {
                info!("performance override released");
                if let Some(running) = state.running.as_mut() {
                    if !state.suspend.is_suspended() {
                        running.cancel_ticker();
                        running.ticker = Some(spawn_ticker(
                            Arc::downgrade(&self.shared),
                            state.config.sampling_interval(),
                        ));
                    }
                }
            }
        }
    }
}

// ── Background tasks ───────────────────────────────────────────

/// Queue a tick every `sampling_interval`, re-read on each round so
/// interval writes apply from the next tick.
fn spawn_ticker(weak: Weak<Shared>, first_delay: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(first_delay).await;
        loop {
            let interval = {
                let Some(shared) = weak.upgrade() else { break };
                let state = shared.lock();
                let Some(running) = state.running.as_ref() else {
                    break;
                };
                running.send(Work::Tick);
                state.config.sampling_interval()
            };
            tokio::time::sleep(interval).await;
        }
    })
}

async fn pump_power(weak: Weak<Shared>, mut rx: mpsc::Receiver<PowerEvent>) {
    while let Some(event) = rx.recv().await {
        let Some(shared) = weak.upgrade() else { break };
        let controller = PoolController { shared };
        debug!(?event, "power-state event");
        match event {
            PowerEvent::ScreenOff => controller.on_power_off(),
            PowerEvent::ScreenOn => controller.on_power_on(),
        }
    }
}

async fn pump_input(weak: Weak<Shared>, mut rx: mpsc::Receiver<InputEvent>) {
    while let Some(InputEvent) = rx.recv().await {
        let Some(shared) = weak.upgrade() else { break };
        PoolController { shared }.on_input_event();
    }
}

// ── Worker ─────────────────────────────────────────────────────

/// Per-pass inputs copied out of the shared state.
struct PassInputs {
    params: DecisionParams,
    up_ticks: u32,
    down_ticks: u32,
    ctx: ActuationContext,
    down_lock: Duration,
    debug: bool,
    sampling: bool,
}

impl PassInputs {
    fn capture(state: &ControlState) -> Self {
        let config = &state.config;
        Self {
            params: DecisionParams::from(config),
            up_ticks: config.up_threshold,
            down_ticks: config.down_threshold,
            ctx: ActuationContext {
                bounds: config.bounds(),
                boost: state.boost.last_boost(),
                nr_run_threshold: config.nr_run_threshold,
            },
            down_lock: config.down_lock_duration(),
            debug: config.debug,
            sampling: state.running.is_some()
                && !state.suspend.is_suspended()
                && !state.boost.performance_override(),
        }
    }
}

struct Worker {
    shared: Weak<Shared>,
    driver: Arc<dyn UnitPowerDriver>,
    sampler: Sampler,
    engine: DecisionEngine,
    actuator: PoolActuator,
    /// Set once the first tick has been evaluated.
    last_target: Option<usize>,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Work>) {
        debug!("actuator worker started");
        while let Some(work) = rx.recv().await {
            if let Work::Flush(done) = work {
                let _ = done.send(());
                continue;
            }
            let Some(inputs) = self.capture() else { break };
            let now = Instant::now();
            self.actuator.locks_mut().set_duration(inputs.down_lock);

            match work {
                Work::Tick => self.tick(&inputs, now),
                Work::Apply { target, reason } => {
                    let report = self.actuator.apply(target, &inputs.ctx, self.sampler.cache(), now);
                    log_report(reason, &report, inputs.debug);
                }
                Work::ForceActivate { lock } => {
                    let units = self.actuator.force_activate_all(lock, now);
                    if !units.is_empty() {
                        debug!(?units, lock, "activated every unit");
                    }
                }
                Work::Flush(_) => {}
            }
            self.publish(now);
        }

        self.actuator.locks_mut().clear_all();
        self.publish(Instant::now());
        debug!("actuator worker stopped");
    }

    fn capture(&self) -> Option<PassInputs> {
        let shared = self.shared.upgrade()?;
        let state = shared.lock();
        Some(PassInputs::capture(&state))
    }

    fn tick(&mut self, inputs: &PassInputs, now: Instant) {
        if !inputs.sampling {
            return;
        }
        self.actuator.locks_mut().sweep(now);

        let sample = self.sampler.sample(self.driver.as_ref(), now);
        let online = self.actuator.online_count();
        let verdict = self.engine.evaluate(
            sample.aggregate,
            online,
            &inputs.params,
            inputs.up_ticks,
            inputs.down_ticks,
        );
        self.last_target = Some(self.engine.previous_target());

        if inputs.debug {
            info!(load = sample.aggregate, online, target = ?verdict, "decision");
        } else {
            debug!(load = sample.aggregate, online, target = ?verdict, "decision");
        }

        if let Some(target) = verdict {
            let report = self.actuator.apply(target, &inputs.ctx, &sample.per_unit, now);
            log_report("tick", &report, inputs.debug);
        }
    }

    fn publish(&self, now: Instant) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let mut state = shared.lock();
        state.locks = self.actuator.locks().deadlines(now);
        state.last_target = self.last_target;
    }
}

fn log_report(reason: &'static str, report: &ActuationReport, verbose: bool) {
    if !report.changed() && report.failed.is_empty() {
        if report.stop == StopReason::BoostLocked {
            debug!(reason, target = report.target, "shrink held by boost window");
        }
        return;
    }
    if verbose {
        info!(
            reason,
            target = report.target,
            online = report.online,
            activated = ?report.activated,
            deactivated = ?report.deactivated,
            failed = ?report.failed,
            stop = ?report.stop,
            "pool resized"
        );
    } else {
        debug!(
            reason,
            target = report.target,
            online = report.online,
            activated = ?report.activated,
            deactivated = ?report.deactivated,
            stop = ?report.stop,
            "pool resized"
        );
    }
}
