//! REST API handlers.
//!
//! Each handler talks to the `PoolController` and returns JSON responses.

use std::str::FromStr;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use tracing::{debug, warn};

use coreplug_controller::ControllerError;
use coreplug_core::{ConfigError, ConfigKey, PowerEvent};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn controller_error(e: &ControllerError) -> axum::response::Response {
    let status = match e {
        ControllerError::Config(ConfigError::UnknownKey(_)) => StatusCode::NOT_FOUND,
        ControllerError::Config(_) => StatusCode::BAD_REQUEST,
        ControllerError::AlreadyRunning | ControllerError::NotRunning => StatusCode::CONFLICT,
        ControllerError::Subscribe { .. } => StatusCode::SERVICE_UNAVAILABLE,
        ControllerError::Worker(_) | ControllerError::CapacityMismatch { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error_response(&e.to_string(), status).into_response()
}

fn parse_key(raw: &str) -> Result<ConfigKey, axum::response::Response> {
    ConfigKey::from_str(raw).map_err(|e| error_response(&e.to_string(), StatusCode::NOT_FOUND).into_response())
}

// ── Configuration ──────────────────────────────────────────────

/// GET /api/v1/config
pub async fn list_config(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.controller.config().snapshot())
}

/// GET /api/v1/config/{key}
pub async fn get_config(State(state): State<ApiState>, Path(key): Path<String>) -> impl IntoResponse {
    let key = match parse_key(&key) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    ApiResponse::ok(serde_json::json!({
        "key": key.as_str(),
        "value": state.controller.get(key),
    }))
    .into_response()
}

/// PUT /api/v1/config/{key}
pub async fn set_config(
    State(state): State<ApiState>,
    Path(key): Path<String>,
    body: String,
) -> impl IntoResponse {
    let key = match parse_key(&key) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    match state.controller.set(key, &body).await {
        Ok(()) => ApiResponse::ok(serde_json::json!({
            "key": key.as_str(),
            "value": state.controller.get(key),
        }))
        .into_response(),
        Err(e) => {
            warn!(key = %key, value = %body.trim(), error = %e, "config write rejected");
            controller_error(&e)
        }
    }
}

/// POST /api/v1/perf_boost
pub async fn perf_boost(State(state): State<ApiState>, body: String) -> impl IntoResponse {
    let enabled = match body.trim() {
        "0" => false,
        "1" => true,
        other => {
            return error_response(&format!("perf_boost expects 0 or 1, got {other:?}"), StatusCode::BAD_REQUEST)
                .into_response();
        }
    };
    state.controller.set_performance_override(enabled);
    ApiResponse::ok(serde_json::json!({ "performance_override": enabled })).into_response()
}

// ── Status ─────────────────────────────────────────────────────

/// GET /api/v1/status
pub async fn status(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.controller.status())
}

// ── Manual sources ─────────────────────────────────────────────

/// POST /api/v1/power/{on|off}
pub async fn power_event(State(state): State<ApiState>, Path(which): Path<String>) -> impl IntoResponse {
    let Some(power) = state.power.as_ref() else {
        return error_response("manual power source not configured", StatusCode::NOT_FOUND).into_response();
    };
    let event = match which.as_str() {
        "on" => PowerEvent::ScreenOn,
        "off" => PowerEvent::ScreenOff,
        other => {
            return error_response(&format!("unknown power state: {other}"), StatusCode::BAD_REQUEST)
                .into_response();
        }
    };
    let delivered = power.notify(event);
    debug!(?event, delivered, "manual power event");
    ApiResponse::ok(serde_json::json!({ "event": event, "delivered": delivered })).into_response()
}

/// POST /api/v1/input
pub async fn input_event(State(state): State<ApiState>) -> impl IntoResponse {
    let Some(input) = state.input.as_ref() else {
        return error_response("manual input source not configured", StatusCode::NOT_FOUND).into_response();
    };
    let delivered = input.publish();
    ApiResponse::ok(serde_json::json!({ "delivered": delivered })).into_response()
}
