//! Fan handlers for snapshot and speed control endpoints

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::{api_fail, api_ok};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use fanboy_core::api::{ApiResponse, SpeedQuery};
use fanboy_core::{Channel, ChannelSelector, MAX_SPEED_PERCENT};
use fanboy_hardware::FanDriver;

use tracing::debug;

/// Returns the last observed state of every channel.
///
/// Values are whatever the most recent poll recorded; during an outage they
/// stay at their last known values.
///
/// # Endpoint
///
/// `GET /fans`
pub(crate) async fn list_fans(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<Channel>>>, ApiError> {
    debug!("Request: GET /fans");
    api_ok!(state.driver.snapshot())
}

/// Returns the last observed state of one channel.
///
/// # Endpoint
///
/// `GET /fans/:id`
pub(crate) async fn get_fan(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Channel>>, ApiError> {
    debug!("Request: GET /fans/{}", id);

    let id = parse_channel_id(&state.driver, &id)?;
    match state.driver.snapshot().into_iter().find(|c| c.id == id) {
        Some(channel) => api_ok!(channel),
        None => Err(ApiError::internal_error(format!(
            "Channel {} missing from snapshot",
            id
        ))),
    }
}

/// Sets every channel to the same speed.
///
/// # Validation
///
/// - `speed` must be an integer in 0-100; anything else is rejected
///
/// # Endpoint
///
/// `POST /fans?speed=50`
pub(crate) async fn set_all_fans(
    State(state): State<AppState>,
    Query(params): Query<SpeedQuery>,
) -> Result<Json<ApiResponse<String>>, ApiError> {
    debug!("Request: POST /fans");

    let speed = parse_speed(params.speed.as_deref())?;
    if speed < 0 {
        return api_fail!("speed must not be smaller than 0");
    }
    if speed > MAX_SPEED_PERCENT as i64 {
        return api_fail!(format!(
            "speed must not be larger than {}",
            MAX_SPEED_PERCENT
        ));
    }

    state.driver.set_speed(ChannelSelector::All, speed)?;
    api_ok!("success".to_string())
}

/// Sets one channel's speed.
///
/// # Validation
///
/// - The id must name a configured channel
/// - `speed` must be an integer; it is clamped to 0-100
///
/// # Endpoint
///
/// `POST /fans/:id?speed=50`
pub(crate) async fn set_fan(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<SpeedQuery>,
) -> Result<Json<ApiResponse<String>>, ApiError> {
    debug!("Request: POST /fans/{}", id);

    let id = parse_channel_id(&state.driver, &id)?;
    let speed = parse_speed(params.speed.as_deref())?;

    state.driver.set_speed(ChannelSelector::Channel(id), speed)?;
    api_ok!("success".to_string())
}

fn parse_channel_id(driver: &FanDriver, raw: &str) -> Result<u8, ApiError> {
    let Ok(id) = raw.trim().parse::<i64>() else {
        return api_fail!("id is not an integer");
    };
    let Ok(id) = u8::try_from(id) else {
        return api_fail!(format!(
            "Channel out of range: {} (must be 1-{})",
            id,
            driver.channel_count()
        ));
    };
    driver.validate_channel(id)?;
    Ok(id)
}

fn parse_speed(raw: Option<&str>) -> Result<i64, ApiError> {
    match raw.map(|s| s.trim().parse::<i64>()) {
        Some(Ok(speed)) => Ok(speed),
        _ => api_fail!("speed is not an integer"),
    }
}
