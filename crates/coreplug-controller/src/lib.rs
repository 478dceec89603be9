//! coreplug-controller — the adaptive pool controller.
//!
//! Components, leaves first:
//!
//! - [`down_lock`] — per-unit protection after activation
//! - [`boost`] — debounced input boost and the performance override
//! - [`suspend`] — pool narrowing while the display is off
//! - [`sampler`] — per-tick load measurement
//! - [`decision`] — load → target unit count
//! - [`actuator`] — moves the online count toward the target
//!
//! [`PoolController`] runs them on tokio. The traits in [`collaborators`]
//! are the only way the controller reaches hardware; [`sysfs`],
//! [`sources`] and [`sim`] provide implementations.

pub mod actuator;
pub mod boost;
pub mod collaborators;
pub mod controller;
pub mod decision;
pub mod down_lock;
pub mod error;
pub mod sampler;
pub mod sim;
pub mod sources;
pub mod suspend;
pub mod sysfs;

pub use actuator::{ActuationContext, ActuationReport, PoolActuator, StopReason};
pub use boost::{BoostController, BoostWindow, InputVerdict};
pub use collaborators::{Fanout, InputEventSource, LoadTelemetry, PowerStateNotifier, UnitPowerDriver};
pub use controller::{Collaborators, ControllerOptions, PoolController};
pub use decision::{DecisionEngine, DecisionParams, calculate_target};
pub use down_lock::{DownLockRegistry, UnitLockState};
pub use error::{ControllerError, ControllerResult, DriverError, SourceError};
pub use sampler::{LoadSample, Sampler};
pub use sim::SimulatedPool;
pub use sources::{BacklightNotifier, DeviceInputSource, ManualInputSource, ManualPowerNotifier, NoInput};
pub use suspend::{SUSPENDED_BOUNDS, SuspendCoordinator};
pub use sysfs::{ProcStatTelemetry, SysfsUnitDriver};
