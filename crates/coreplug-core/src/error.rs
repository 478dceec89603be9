//! Error types for configuration writes.

use thiserror::Error;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors returned by the numeric configuration surface.
///
/// A failed write never changes state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unknown configuration key: {0}")]
    UnknownKey(String),

    #[error("malformed value for {key}: {value:?}")]
    Malformed { key: &'static str, value: String },

    #[error("value {value} for {key} out of range [{min}, {max}]")]
    OutOfRange {
        key: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },

    #[error("pool capacity must be at least 1")]
    NoCapacity,
}
