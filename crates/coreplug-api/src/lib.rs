//! coreplug-api — REST surface of the pool controller.
//!
//! Writes carry the raw textual value in the request body, the same way
//! a sysfs attribute is written.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/config` | All tunables and their values |
//! | GET | `/api/v1/config/{key}` | One tunable |
//! | PUT | `/api/v1/config/{key}` | Write one tunable (body: value) |
//! | POST | `/api/v1/perf_boost` | Performance override (body: `0`/`1`) |
//! | GET | `/api/v1/status` | Runtime status |
//! | POST | `/api/v1/power/{on\|off}` | Feed the manual power-state notifier |
//! | POST | `/api/v1/input` | Feed the manual input source |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use coreplug_controller::{ManualInputSource, ManualPowerNotifier, PoolController};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub controller: PoolController,
    /// Present when the daemon runs with the manual power source.
    pub power: Option<Arc<ManualPowerNotifier>>,
    /// Present when the daemon runs with the manual input source.
    pub input: Option<Arc<ManualInputSource>>,
}

impl ApiState {
    pub fn new(controller: PoolController) -> Self {
        Self {
            controller,
            power: None,
            input: None,
        }
    }

    pub fn with_power(mut self, power: Arc<ManualPowerNotifier>) -> Self {
        self.power = Some(power);
        self
    }

    pub fn with_input(mut self, input: Arc<ManualInputSource>) -> Self {
        self.input = Some(input);
        self
    }
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/config", get(handlers::list_config))
        .route("/config/{key}", get(handlers::get_config).put(handlers::set_config))
        .route("/perf_boost", post(handlers::perf_boost))
        .route("/status", get(handlers::status))
        .route("/power/{state}", post(handlers::power_event))
        .route("/input", post(handlers::input_event))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
