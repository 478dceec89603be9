//! coreplug-core — shared types for the coreplug pool controller.
//!
//! Holds everything that both the controller and its outer surfaces (HTTP
//! API, daemon) need to agree on:
//!
//! - [`PoolConfig`] and the numeric [`ConfigKey`] surface with per-key
//!   range validation
//! - [`Profile`] and [`ThresholdLadder`] generation
//! - Status snapshots and power/input event types
//!
//! # Load units
//!
//! ```text
//! aggregate load : fixed point, FIXED_1 (= 1 << 11) per running thread
//! per-unit load  : centi-threads, running threads × 100
//! ```

pub mod config;
pub mod error;
pub mod profile;
pub mod types;

pub use config::{ConfigKey, PoolConfig, PoolSettings};
pub use error::{ConfigError, ConfigResult};
pub use profile::{Profile, ThresholdLadder};
pub use types::*;
