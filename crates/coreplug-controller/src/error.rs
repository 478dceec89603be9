//! Controller error types.

use thiserror::Error;

use coreplug_core::{ConfigError, UnitId};

/// Errors reported by a unit power driver.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("unit {unit} out of range (capacity {capacity})")]
    OutOfRange { unit: UnitId, capacity: usize },

    #[error("unit {0} refused the power-state change")]
    Refused(UnitId),

    #[error("unit {unit}: {source}")]
    Io {
        unit: UnitId,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while subscribing to an event source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("event source unavailable: {0}")]
    Unavailable(String),

    #[error("event source I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while driving the controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("controller already running")]
    AlreadyRunning,

    #[error("controller is not running")]
    NotRunning,

    #[error("actuator worker failed: {0}")]
    Worker(String),

    #[error("config is sized for {config} units but the driver reports {driver}")]
    CapacityMismatch { config: usize, driver: usize },

    #[error("failed to subscribe to {what}: {source}")]
    Subscribe {
        what: &'static str,
        #[source]
        source: SourceError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type ControllerResult<T> = Result<T, ControllerError>;
