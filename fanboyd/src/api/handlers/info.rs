//! Info handlers for the root and stop endpoints

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::api_ok;

use axum::{extract::State, Json};
use fanboy_core::api::ApiResponse;
use serde_json::{json, Value};
use tracing::{debug, info};

/// Handle the root endpoint.
///
/// Provide basic service identification and status. Useful for health checks
/// and verifying the API is accessible.
///
/// # Endpoint
///
/// `GET /`
pub(crate) async fn root(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Value>>, ApiError> {
    debug!("Request: GET /");

    let data = json!({
        "service": "fanboy",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "ok",
        "channels": state.driver.channel_count(),
        "uptime": state.start_time.elapsed().as_secs(),
    });

    api_ok!(data)
}

/// Request an orderly daemon shutdown.
///
/// The response is sent before the server stops accepting connections.
///
/// # Endpoint
///
/// `GET /stop`
pub(crate) async fn stop(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<String>>, ApiError> {
    info!("Request: GET /stop");
    state.shutdown.trigger();
    api_ok!("Going down".to_string())
}
