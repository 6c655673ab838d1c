//! API models for the fanboy REST and WebSocket front end

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Generic API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum ApiResponse<T> {
    #[serde(rename = "success")]
    Success { data: T },
    #[serde(rename = "error")]
    Error { error: String },
}

impl<T> ApiResponse<T> {
    /// Create a successful response
    pub fn success(data: T) -> Self {
        Self::Success { data }
    }

    /// Create an error response
    pub fn error(error: String) -> Self {
        Self::Error { error }
    }
}

/// Query parameters for speed endpoints (`?speed=50`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeedQuery {
    /// Raw speed value; parsed by the handler so bad input maps to 400
    pub speed: Option<String>,
}

/// Message a WebSocket client may send.
///
/// `{"cmd": "setspeed", "speed": "60"}`; the speed may also be a JSON number
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsCommand {
    pub cmd: String,
    #[serde(default)]
    pub speed: Option<Value>,
}

/// Speed used when a WebSocket client sends a speed that cannot be used
pub const WS_FALLBACK_SPEED: u8 = 45;

impl WsCommand {
    /// Returns the speed to apply if this is a `setspeed` command.
    ///
    /// Non-integer or negative speeds fall back to [`WS_FALLBACK_SPEED`];
    /// speeds above 100 are clamped.
    pub fn set_speed(&self) -> Option<u8> {
        if self.cmd != "setspeed" {
            return None;
        }

        let requested = match &self.speed {
            Some(Value::String(text)) => text.trim().parse::<i64>().ok(),
            Some(Value::Number(number)) => number.as_i64(),
            _ => None,
        };
        let speed = match requested {
            Some(value) if value >= 0 => crate::clamp_percentage(value),
            _ => WS_FALLBACK_SPEED,
        };
        Some(speed)
    }
}
